pub mod app;
pub mod config;
pub mod export;
pub mod highlight;
pub mod io;
pub mod persist;
pub mod store;
pub mod tree;
pub mod ui;
