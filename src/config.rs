use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use egui::Color32;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::tree::scale::TickBudget;

/// Engine constants. Every field has a default, so a config file only needs
/// the values it overrides.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EpiConfig {
    pub tree: TreeConfig,
    pub stratification: StratificationConfig,
}

impl EpiConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid config file: {}", path.display()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    pub row_height: f32,
    pub padding_left: f32,
    pub padding_right: f32,
    pub header_height: f32,
    pub marker_radius: f32,
    pub line_width: f32,
    pub font_size: f32,
    pub min_px_per_tick: f32,
    pub max_px_per_tick: f32,
    /// Branch labels shorter than this fraction of the tree's max distance
    /// are not shown.
    pub label_min_percentage: Decimal,
    pub dimmed_alpha: f32,
    pub support_dash: (f32, f32),
    pub branch_color: String,
    pub support_color: String,
    pub marker_color: String,
    pub label_color: String,
    pub tick_color: String,
    pub background_color: String,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            row_height: 20.0,
            padding_left: 20.0,
            padding_right: 20.0,
            header_height: 32.0,
            marker_radius: 4.0,
            line_width: 1.0,
            font_size: 10.0,
            min_px_per_tick: 50.0,
            max_px_per_tick: 100.0,
            label_min_percentage: Decimal::new(5, 2),
            dimmed_alpha: 0.25,
            support_dash: (2.0, 3.0),
            branch_color: "#1e1e1e".to_owned(),
            support_color: "#c8c8c8".to_owned(),
            marker_color: "#1e1e1e".to_owned(),
            label_color: "#505050".to_owned(),
            tick_color: "#969696".to_owned(),
            background_color: "#ffffff".to_owned(),
        }
    }
}

impl TreeConfig {
    pub fn tick_budget(&self) -> TickBudget {
        TickBudget {
            min_px_per_tick: self.min_px_per_tick,
            max_px_per_tick: self.max_px_per_tick,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StratificationConfig {
    /// Columns with more distinct values than this cannot be stratified.
    pub max_values: usize,
    pub palette: Vec<String>,
    pub missing_color: String,
    pub unselected_color: String,
}

impl Default for StratificationConfig {
    fn default() -> Self {
        let palette = [
            "#1f77b4", "#ff7f0e", "#2ca02c", "#d62728", "#9467bd", "#8c564b", "#e377c2",
            "#bcbd22", "#17becf", "#aec7e8", "#ffbb78", "#98df8a", "#ff9896", "#c5b0d5",
            "#c49c94", "#f7b6d2", "#dbdb8d", "#9edae5", "#393b79", "#637939",
        ];
        Self {
            max_values: 20,
            palette: palette.iter().map(|hex| hex.to_string()).collect(),
            missing_color: "#7f7f7f".to_owned(),
            unselected_color: "#c7c7c7".to_owned(),
        }
    }
}

impl StratificationConfig {
    /// Palette colour for the `index`-th legend value, cycling when needed.
    pub fn color_at(&self, index: usize) -> Color32 {
        if self.palette.is_empty() {
            return Color32::GRAY;
        }
        parse_hex_color(&self.palette[index % self.palette.len()]).unwrap_or(Color32::GRAY)
    }

    pub fn missing(&self) -> Color32 {
        parse_hex_color(&self.missing_color).unwrap_or(Color32::GRAY)
    }

    pub fn unselected(&self) -> Color32 {
        parse_hex_color(&self.unselected_color).unwrap_or(Color32::LIGHT_GRAY)
    }
}

/// `#rrggbb` or `#rrggbbaa`.
pub fn parse_hex_color(hex: &str) -> Option<Color32> {
    let digits = hex.trim().strip_prefix('#')?;
    let channel = |index: usize| u8::from_str_radix(digits.get(index..index + 2)?, 16).ok();
    match digits.len() {
        6 => Some(Color32::from_rgb(channel(0)?, channel(2)?, channel(4)?)),
        8 => Some(Color32::from_rgba_unmultiplied(
            channel(0)?,
            channel(2)?,
            channel(4)?,
            channel(6)?,
        )),
        _ => None,
    }
}

pub fn color_to_hex(color: Color32) -> String {
    let [r, g, b, _a] = color.to_srgba_unmultiplied();
    format!("#{:02x}{:02x}{:02x}", r, g, b)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn parses_hex_colors() {
        assert_eq!(parse_hex_color("#ff0000"), Some(Color32::from_rgb(255, 0, 0)));
        assert_eq!(parse_hex_color("00ff00"), None);
        assert_eq!(parse_hex_color("#12"), None);
        assert_eq!(color_to_hex(Color32::from_rgb(31, 119, 180)), "#1f77b4");
    }

    #[test]
    fn partial_config_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"tree": {{"row_height": 12.0}}, "stratification": {{"max_values": 5}}}}"#)
            .unwrap();

        let config = EpiConfig::load(file.path()).unwrap();
        assert_eq!(config.tree.row_height, 12.0);
        assert_eq!(config.tree.padding_left, 20.0);
        assert_eq!(config.stratification.max_values, 5);
        assert_eq!(config.stratification.palette.len(), 20);
    }

    #[test]
    fn palette_cycles() {
        let config = StratificationConfig::default();
        assert_eq!(config.color_at(0), config.color_at(20));
        assert_eq!(config.color_at(21), Color32::from_rgb(0xff, 0x7f, 0x0e));
    }

    #[test]
    fn unusable_palette_falls_back_to_gray() {
        let mut config = StratificationConfig {
            palette: vec!["#00ff00".into(), "green".into()],
            ..StratificationConfig::default()
        };
        assert_eq!(config.color_at(2), Color32::from_rgb(0, 255, 0));
        assert_eq!(config.color_at(1), Color32::GRAY);
        config.palette.clear();
        assert_eq!(config.color_at(0), Color32::GRAY);
    }
}
