use std::collections::{HashMap, HashSet};

use egui::Color32;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::case::CaseColumn;
use super::filter::{CellValue, Row};
use crate::config::StratificationConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StratifyMode {
    None,
    Field,
    Selection,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StratifyError {
    #[error("field stratification needs a column")]
    MissingColumn,
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error("column {column} has {count} distinct values, more than {cap}")]
    TooManyValues {
        column: String,
        count: usize,
        cap: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LegendItem {
    pub label: String,
    pub value: CellValue,
    pub color: Color32,
    pub row_ids: Vec<String>,
    pub is_missing: bool,
}

impl LegendItem {
    pub fn count(&self) -> usize {
        self.row_ids.len()
    }
}

/// Legend plus the lookups renderers need. Every visible row belongs to
/// exactly one legend item.
#[derive(Debug, Clone, PartialEq)]
pub struct Stratification {
    pub mode: StratifyMode,
    pub source_column: Option<String>,
    pub legend_items: Vec<LegendItem>,
    pub case_id_to_color: HashMap<String, Color32>,
    pub color_to_legend_item: HashMap<Color32, usize>,
    pub value_to_legend_item: HashMap<String, usize>,
}

impl Stratification {
    fn from_items(mode: StratifyMode, source_column: Option<String>, legend_items: Vec<LegendItem>) -> Self {
        let mut case_id_to_color = HashMap::new();
        let mut color_to_legend_item = HashMap::new();
        let mut value_to_legend_item = HashMap::new();
        for (index, item) in legend_items.iter().enumerate() {
            color_to_legend_item.entry(item.color).or_insert(index);
            value_to_legend_item.insert(item.value.to_string(), index);
            for id in &item.row_ids {
                case_id_to_color.insert(id.clone(), item.color);
            }
        }
        Self {
            mode,
            source_column,
            legend_items,
            case_id_to_color,
            color_to_legend_item,
            value_to_legend_item,
        }
    }

    pub fn total_count(&self) -> usize {
        self.legend_items.iter().map(LegendItem::count).sum()
    }

    pub fn legend_item_for_case(&self, id: &str) -> Option<&LegendItem> {
        let color = self.case_id_to_color.get(id)?;
        self.color_to_legend_item
            .get(color)
            .and_then(|index| self.legend_items.get(*index))
    }
}

fn distinct_values<R: Row>(rows: &[&R], column: &str) -> Vec<CellValue> {
    let mut seen = HashSet::new();
    let mut values = Vec::new();
    for row in rows {
        let cell = row.cell(column);
        if !cell.is_missing() && seen.insert(cell.clone()) {
            values.push(cell);
        }
    }
    values
}

/// Whether `column` can be stratified over `rows`: a bounded domain within
/// the cap, or at most `cap` distinct values among the rows.
pub fn is_stratifiable<R: Row>(rows: &[&R], column: &CaseColumn, cap: usize) -> bool {
    match column.domain() {
        Some(domain) if domain.len() <= cap => true,
        _ => distinct_values(rows, &column.id).len() <= cap,
    }
}

pub fn stratifiable_columns<R: Row>(rows: &[&R], columns: &[CaseColumn], cap: usize) -> Vec<String> {
    columns
        .iter()
        .filter(|column| is_stratifiable(rows, column, cap))
        .map(|column| column.id.clone())
        .collect()
}

/// Colour `rows` by the values of `column`.
///
/// A bounded domain within the cap keeps domain order and colours, dropping
/// values no row has. Otherwise the values present in `rows` are ordered
/// by the generic value comparator. Rows without a value (or with a value
/// outside the domain) go to a trailing missing bucket, which is left out
/// when empty.
pub fn stratify_field<R: Row>(
    rows: &[&R],
    column: &CaseColumn,
    config: &StratificationConfig,
) -> Result<Stratification, StratifyError> {
    let cap = config.max_values;
    let values = match column.domain() {
        Some(domain) if domain.len() <= cap => domain,
        _ => {
            let mut present = distinct_values(rows, &column.id);
            if present.len() > cap {
                return Err(StratifyError::TooManyValues {
                    column: column.id.clone(),
                    count: present.len(),
                    cap,
                });
            }
            present.sort_by(|a, b| a.compare(b));
            present
        }
    };

    let position: HashMap<&CellValue, usize> = values.iter().enumerate().map(|(i, v)| (v, i)).collect();
    let mut buckets: Vec<Vec<String>> = vec![Vec::new(); values.len()];
    let mut missing = Vec::new();
    for row in rows {
        let cell = row.cell(&column.id);
        match position.get(&cell) {
            Some(&index) => buckets[index].push(row.row_id().to_owned()),
            None => missing.push(row.row_id().to_owned()),
        }
    }

    let mut items: Vec<LegendItem> = values
        .into_iter()
        .zip(buckets)
        .enumerate()
        .filter(|(_, (_, ids))| !ids.is_empty())
        .map(|(index, (value, row_ids))| LegendItem {
            label: value.to_string(),
            value,
            color: config.color_at(index),
            row_ids,
            is_missing: false,
        })
        .collect();
    if !missing.is_empty() {
        items.push(LegendItem {
            label: "Missing".to_owned(),
            value: CellValue::Missing,
            color: config.missing(),
            row_ids: missing,
            is_missing: true,
        });
    }

    Ok(Stratification::from_items(
        StratifyMode::Field,
        Some(column.id.clone()),
        items,
    ))
}

/// Two buckets: selected rows and everything else.
pub fn stratify_selection<R: Row>(
    rows: &[&R],
    selected: &HashSet<&str>,
    config: &StratificationConfig,
) -> Stratification {
    let (chosen, rest): (Vec<&&R>, Vec<&&R>) = rows.iter().partition(|row| selected.contains(row.row_id()));
    let ids = |rows: Vec<&&R>| -> Vec<String> { rows.into_iter().map(|row| row.row_id().to_owned()).collect() };
    let items = vec![
        LegendItem {
            label: "Selected".to_owned(),
            value: CellValue::Bool(true),
            color: config.color_at(0),
            row_ids: ids(chosen),
            is_missing: false,
        },
        LegendItem {
            label: "Not selected".to_owned(),
            value: CellValue::Bool(false),
            color: config.unselected(),
            row_ids: ids(rest),
            is_missing: false,
        },
    ];
    Stratification::from_items(StratifyMode::Selection, None, items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::case::{CaseRecord, ColumnKind};
    use crate::tree::test_support::dec;

    fn cases() -> Vec<CaseRecord> {
        let text = |s: &str| CellValue::Text(s.to_owned());
        vec![
            CaseRecord::new("1").with("region", text("south")).with("age", CellValue::Number(dec("40"))),
            CaseRecord::new("2").with("region", text("north")).with("age", CellValue::Number(dec("7"))),
            CaseRecord::new("3").with("age", CellValue::Number(dec("40"))),
            CaseRecord::new("4").with("region", text("south")),
        ]
    }

    fn rows(cases: &[CaseRecord]) -> Vec<&CaseRecord> {
        cases.iter().collect()
    }

    #[test]
    fn bounded_domain_keeps_domain_order_and_drops_unused() {
        let cases = cases();
        let region = CaseColumn::new(
            "region",
            ColumnKind::Options(vec!["north".into(), "east".into(), "south".into()]),
        );
        let config = StratificationConfig::default();
        let strat = stratify_field(&rows(&cases), &region, &config).unwrap();

        let labels: Vec<&str> = strat.legend_items.iter().map(|i| i.label.as_str()).collect();
        assert_eq!(labels, vec!["north", "south", "Missing"]);
        // "south" keeps the colour of its domain slot
        assert_eq!(strat.legend_items[1].color, config.color_at(2));
        assert_eq!(strat.legend_items[2].color, config.missing());
        assert_eq!(strat.total_count(), 4);
        assert_eq!(strat.case_id_to_color.get("4"), Some(&config.color_at(2)));
        assert_eq!(strat.legend_item_for_case("3").map(|i| i.is_missing), Some(true));
    }

    #[test]
    fn open_domain_sorts_present_values() {
        let cases = cases();
        let age = CaseColumn::new("age", ColumnKind::Number);
        let strat = stratify_field(&rows(&cases), &age, &StratificationConfig::default()).unwrap();
        let labels: Vec<&str> = strat.legend_items.iter().map(|i| i.label.as_str()).collect();
        assert_eq!(labels, vec!["7", "40", "Missing"]);
        assert_eq!(strat.legend_items[1].count(), 2);
        assert_eq!(strat.value_to_legend_item.get("40"), Some(&1));
    }

    #[test]
    fn empty_missing_bucket_is_dropped() {
        let cases = cases();
        let age = CaseColumn::new("age", ColumnKind::Number);
        let visible: Vec<&CaseRecord> = cases.iter().take(3).collect();
        let strat = stratify_field(&visible, &age, &StratificationConfig::default()).unwrap();
        assert!(strat.legend_items.iter().all(|item| !item.is_missing));
    }

    #[test]
    fn too_many_values_is_rejected() {
        let cases = cases();
        let age = CaseColumn::new("age", ColumnKind::Number);
        let config = StratificationConfig {
            max_values: 1,
            ..StratificationConfig::default()
        };
        assert_eq!(
            stratify_field(&rows(&cases), &age, &config).unwrap_err(),
            StratifyError::TooManyValues {
                column: "age".into(),
                count: 2,
                cap: 1
            }
        );
        assert!(!is_stratifiable(&rows(&cases), &age, 1));
        let flag = CaseColumn::new("flag", ColumnKind::Boolean);
        assert_eq!(
            stratifiable_columns(&rows(&cases), &[age, flag], 2),
            vec!["age".to_string(), "flag".to_string()]
        );
    }

    #[test]
    fn selection_has_two_buckets() {
        let cases = cases();
        let selected: HashSet<&str> = ["2", "4"].into_iter().collect();
        let config = StratificationConfig::default();
        let strat = stratify_selection(&rows(&cases), &selected, &config);
        assert_eq!(strat.mode, StratifyMode::Selection);
        assert_eq!(strat.legend_items.len(), 2);
        assert_eq!(strat.legend_items[0].row_ids, vec!["2", "4"]);
        assert_eq!(strat.legend_items[1].color, config.unselected());
        assert_eq!(strat.total_count(), 4);
    }
}
