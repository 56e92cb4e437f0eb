use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};

use crate::config::EpiConfig;
use crate::io::{self, LocalCaseSource};
use crate::persist::{self, JsonFileStateStore, TreeViewState};
use crate::store::epi::EpiStore;
use crate::store::stratify::StratifyMode;
use crate::ui;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "epitree",
    about = "Lays out a case phylogeny, links it to a filtered line list and exports the view."
)]
pub struct AppConfig {
    /// Tree file (Newick or Nexus). Without it only the line list is loaded.
    #[arg(long, value_name = "TREE_FILE")]
    pub tree: Option<PathBuf>,

    /// Line list JSON with `columns` and `cases`.
    #[arg(long, value_name = "CASES_FILE")]
    pub cases: PathBuf,

    /// Comma separated case ids to select.
    #[arg(long, value_delimiter = ',')]
    pub select: Vec<String>,

    /// Column id to stratify by, `selection`, or `none`.
    #[arg(long)]
    pub stratify: Option<String>,

    /// Name of the ancestor to zoom into.
    #[arg(long)]
    pub zoom: Option<String>,

    /// Show branch distance labels on highlighted branches.
    #[arg(long)]
    pub show_distances: bool,

    /// Canvas width in pixels
    #[arg(long, default_value_t = 1000)]
    pub width: u32,

    /// Minimum canvas height in pixels
    #[arg(long, default_value_t = 400)]
    pub height: u32,

    /// Engine settings (JSON); missing fields take their defaults.
    #[arg(long, value_name = "CONFIG")]
    pub config: Option<PathBuf>,

    /// UI state file; remembers zoom and distance labels per column layout.
    #[arg(long, value_name = "STATE")]
    pub state: Option<PathBuf>,

    /// Export the tree view as SVG.
    #[arg(short, long, value_name = "OUTPUT")]
    pub output: Option<PathBuf>,
}

pub struct EpiTreeApp;

impl EpiTreeApp {
    pub fn run(config: &AppConfig) -> Result<()> {
        let engine = match &config.config {
            Some(path) => EpiConfig::load(path)?,
            None => EpiConfig::default(),
        };

        let dataset = io::load_case_dataset(&config.cases)?;
        let tree = config
            .tree
            .as_deref()
            .map(io::load_tree_string)
            .transpose()?;
        if tree.is_none() {
            info!("No tree file given; the tree view will show an error state.");
        }
        let columns = dataset.columns.clone();
        let source = LocalCaseSource::new(dataset.cases, tree);
        let mut store = EpiStore::new(dataset.columns, engine)?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to start async runtime")?;
        runtime.block_on(store.refresh(&source));

        let mut state_store = config
            .state
            .as_deref()
            .map(JsonFileStateStore::open)
            .transpose()?;
        let saved: TreeViewState = state_store
            .as_ref()
            .and_then(|store| persist::load(store, &columns))
            .unwrap_or_default();

        if !config.select.is_empty() {
            store.set_selected_ids(config.select.clone());
        }

        if let Some(target) = config.zoom.as_ref().or(saved.zoom_target.as_ref()) {
            if !store.zoom_into(target) {
                warn!("Cannot zoom into {target:?}; showing the whole tree.");
            }
        }

        match config.stratify.as_deref() {
            None => {}
            Some("none") => store.stratify(StratifyMode::None, None)?,
            Some("selection") => store.stratify(StratifyMode::Selection, None)?,
            Some(column) => store.stratify(StratifyMode::Field, Some(column))?,
        }

        let show_distances = config.show_distances || saved.show_distances;
        ui::print_summary(&mut store);

        if let Some(dest) = &config.output {
            ui::export(&store, config, show_distances, dest)?;
        }

        if let Some(state_store) = state_store.as_mut() {
            let current = TreeViewState {
                zoom_target: store.zoom_target().map(str::to_owned),
                show_distances,
            };
            persist::save(state_store, &columns, &current)?;
        }

        store.teardown();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cli_flags() {
        let config = AppConfig::try_parse_from([
            "epitree",
            "--cases",
            "cases.json",
            "--tree",
            "tree.nwk",
            "--select",
            "A,B",
            "--stratify",
            "selection",
            "--show-distances",
        ])
        .unwrap();
        assert_eq!(config.select, vec!["A", "B"]);
        assert_eq!(config.stratify.as_deref(), Some("selection"));
        assert!(config.show_distances);
        assert_eq!(config.width, 1000);
        assert!(AppConfig::try_parse_from(["epitree"]).is_err());
    }
}
