use std::collections::HashSet;
use std::path::Path;

use anyhow::{anyhow, Result};
use egui::vec2;

use crate::app::AppConfig;
use crate::export::svg::export_svg;
use crate::store::case::{STAGE_DEFAULT, STAGE_SELECTION, STAGE_TREE};
use crate::store::epi::{EpiStore, TreeState};
use crate::tree::assembly::{AssemblyConfig, TreeAssembly};
use crate::tree::scene::{build_body_scene, build_header_scene, RenderState, SceneStyle, ViewTransform};

pub fn print_summary(store: &mut EpiStore) {
    let pipeline = store.filter_sort();
    println!("Loaded {} case(s).", pipeline.base_data().len());
    for stage in [STAGE_DEFAULT, STAGE_SELECTION, STAGE_TREE] {
        println!("- stage {stage}: {} row(s)", pipeline.stage_data(stage).len());
    }

    match store.tree_state() {
        TreeState::Ready => {
            if let Some(tree) = store.visible_tree() {
                println!(
                    "Tree: {} leaves, max distance {}.",
                    tree.leaf_count(),
                    tree.max_branch_length
                );
            }
        }
        TreeState::Unavailable(reason) => println!("Tree unavailable: {reason}."),
        TreeState::Failed(message) => println!("Tree failed to load: {message}"),
        TreeState::Idle | TreeState::Loading => println!("Tree not loaded."),
    }

    if let Some(target) = store.zoom_target().map(str::to_owned) {
        let address = store
            .tree_addresses()
            .and_then(|addresses| addresses.get(&target))
            .unwrap_or("?")
            .to_owned();
        println!("Zoomed into {target} (address {address}).");
    }

    if let Some(stratification) = store.stratification() {
        println!("Legend ({:?}):", stratification.mode);
        for item in &stratification.legend_items {
            println!("- {}: {} case(s)", item.label, item.count());
        }
    }

    let preview: Vec<&str> = store
        .visible_rows()
        .into_iter()
        .take(10)
        .map(|case| case.id.as_str())
        .collect();
    println!("First rows: {}", preview.join(", "));

    for notice in store.take_notices() {
        println!("Note: {}", notice.message);
    }
}

/// Render the visible tree to SVG: scale header on top, full-height body.
pub fn export(store: &EpiStore, config: &AppConfig, show_distances: bool, output: &Path) -> Result<()> {
    let tree = store.visible_tree().ok_or_else(|| match store.tree_state() {
        TreeState::Failed(message) => anyhow!("cannot export tree: {message}"),
        TreeState::Unavailable(reason) => anyhow!("cannot export tree: {reason}"),
        _ => anyhow!("cannot export tree: no tree loaded"),
    })?;

    let tree_config = &store.config().tree;
    let width = config.width as f32;
    let assembly = TreeAssembly::build(tree, &AssemblyConfig::new(tree_config, width))
        .map_err(|reason| anyhow!("cannot export tree: {reason}"))?;
    let style = SceneStyle::from_config(tree_config);
    let view = ViewTransform::identity(width);

    let highlight: HashSet<String> = store.selected_ids().iter().cloned().collect();
    let state = RenderState {
        highlight: (!highlight.is_empty()).then_some(&highlight),
        leaf_colors: store.leaf_colors(),
        show_distances,
    };
    let viewport = vec2(width, assembly.height.max(config.height as f32));

    let header = build_header_scene(&assembly, &view, width, &style);
    let body = build_body_scene(&assembly, &view, viewport, &state, &style);
    export_svg(output, &header, &body, style.background_color)?;
    println!("Exported tree view to {}", output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::config::EpiConfig;
    use crate::io::LocalCaseSource;
    use crate::store::case::{CaseColumn, CaseRecord, ColumnKind};

    #[tokio::test]
    async fn exports_visible_tree() {
        let cases = ["A", "B", "C", "D", "E"].map(CaseRecord::new).to_vec();
        let source = LocalCaseSource::new(cases, Some("((A:1,B:1):1,(C:2,D:1,E:1):1);".into()));
        let columns = vec![CaseColumn::new("region", ColumnKind::Text)];
        let mut store = EpiStore::new(columns, EpiConfig::default()).unwrap();
        assert!(store.refresh(&source).await);
        store.set_selected_ids(vec!["C".into()]);

        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("view.svg");
        let config = AppConfig::try_parse_from(["epitree", "--cases", "cases.json"]).unwrap();
        export(&store, &config, true, &output).unwrap();
        assert!(std::fs::read_to_string(&output).unwrap().contains("<circle"));
    }

    #[test]
    fn export_without_tree_fails() {
        let store = EpiStore::new(Vec::new(), EpiConfig::default()).unwrap();
        let config = AppConfig::try_parse_from(["epitree", "--cases", "cases.json"]).unwrap();
        let dir = tempfile::tempdir().unwrap();
        assert!(export(&store, &config, false, &dir.path().join("x.svg")).is_err());
    }
}
