use clap::Parser;
use epitree::app::{AppConfig, EpiTreeApp};

fn main() {
    let _ = env_logger::builder().format_timestamp(None).try_init();

    let config = AppConfig::parse();
    if let Err(err) = EpiTreeApp::run(&config) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
