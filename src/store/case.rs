use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::filter::{CellValue, Filter, FilterDimension, FilterMode, FilterValue, Row};

pub const STAGE_DEFAULT: &str = "default";
pub const STAGE_SELECTION: &str = "selection";
pub const STAGE_TREE: &str = "tree";
pub const SELECTION_FILTER_ID: &str = "selection";
pub const TREE_FILTER_ID: &str = "tree";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "options", rename_all = "snake_case")]
pub enum ColumnKind {
    Text,
    Number,
    Date,
    Boolean,
    /// Enumerated values, in legend order.
    Options(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseColumn {
    pub id: String,
    #[serde(default)]
    pub label: String,
    pub kind: ColumnKind,
    #[serde(default = "default_true")]
    pub sortable: bool,
    #[serde(default = "default_filter_mode")]
    pub filter_mode: FilterMode,
}

fn default_true() -> bool {
    true
}

fn default_filter_mode() -> FilterMode {
    FilterMode::Frontend
}

impl CaseColumn {
    pub fn new(id: impl Into<String>, kind: ColumnKind) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id,
            kind,
            sortable: true,
            filter_mode: FilterMode::Frontend,
        }
    }

    pub fn backend(mut self) -> Self {
        self.filter_mode = FilterMode::Backend;
        self
    }

    /// Enumerable value domain, in legend order. `None` for open-ended kinds.
    pub fn domain(&self) -> Option<Vec<CellValue>> {
        match &self.kind {
            ColumnKind::Options(options) => Some(
                options
                    .iter()
                    .map(|option| CellValue::Text(option.clone()))
                    .collect(),
            ),
            ColumnKind::Boolean => Some(vec![CellValue::Bool(true), CellValue::Bool(false)]),
            _ => None,
        }
    }

    /// Convert a raw JSON cell into this column's typed value. Unparseable
    /// values become `Missing`.
    pub fn parse_cell(&self, raw: &serde_json::Value) -> CellValue {
        use serde_json::Value;

        match (&self.kind, raw) {
            (_, Value::Null) => CellValue::Missing,
            (ColumnKind::Number, Value::Number(number)) => Decimal::from_str(&number.to_string())
                .or_else(|_| Decimal::from_scientific(&number.to_string()))
                .map(CellValue::Number)
                .unwrap_or(CellValue::Missing),
            (ColumnKind::Number, Value::String(text)) => Decimal::from_str(text.trim())
                .map(CellValue::Number)
                .unwrap_or(CellValue::Missing),
            (ColumnKind::Date, Value::String(text)) => NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
                .map(CellValue::Date)
                .unwrap_or(CellValue::Missing),
            (ColumnKind::Boolean, Value::Bool(flag)) => CellValue::Bool(*flag),
            (ColumnKind::Text | ColumnKind::Options(_), Value::String(text)) if text.is_empty() => {
                CellValue::Missing
            }
            (ColumnKind::Text | ColumnKind::Options(_), Value::String(text)) => CellValue::Text(text.clone()),
            (ColumnKind::Text | ColumnKind::Options(_), Value::Number(number)) => {
                CellValue::Text(number.to_string())
            }
            _ => CellValue::Missing,
        }
    }
}

/// One row of the line list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub id: String,
    #[serde(default)]
    pub values: BTreeMap<String, CellValue>,
}

impl CaseRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn with(mut self, column: &str, value: CellValue) -> Self {
        self.values.insert(column.to_owned(), value);
        self
    }
}

impl Row for CaseRecord {
    fn row_id(&self) -> &str {
        &self.id
    }

    fn cell(&self, column: &str) -> CellValue {
        self.values.get(column).cloned().unwrap_or(CellValue::Missing)
    }
}

/// Filters for a case schema: one per column in the default stage, exact day
/// and range alternatives for date columns, then the selection and tree
/// allow-lists.
pub fn default_filters(columns: &[CaseColumn]) -> (Vec<Filter>, Vec<FilterDimension>) {
    let mut filters = Vec::new();
    let mut dimensions = Vec::new();

    for column in columns {
        let filter = |id: String| {
            Filter::new(
                id,
                Some(column.id.as_str()),
                column.filter_mode,
                STAGE_DEFAULT,
                FilterValue::Empty,
            )
        };
        if column.kind == ColumnKind::Date {
            let range_id = format!("{}:range", column.id);
            filters.push(filter(column.id.clone()));
            filters.push(filter(range_id.clone()));
            dimensions.push(FilterDimension::new(
                column.id.clone(),
                vec![column.id.clone(), range_id],
            ));
        } else {
            filters.push(filter(column.id.clone()));
        }
    }

    filters.push(Filter::new(
        SELECTION_FILTER_ID,
        None,
        FilterMode::Frontend,
        STAGE_SELECTION,
        FilterValue::Empty,
    ));
    filters.push(Filter::new(
        TREE_FILTER_ID,
        None,
        FilterMode::Frontend,
        STAGE_TREE,
        FilterValue::Empty,
    ));

    (filters, dimensions)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::tree::test_support::dec;

    #[test]
    fn parses_raw_cells_by_kind() {
        let age = CaseColumn::new("age", ColumnKind::Number);
        assert_eq!(age.parse_cell(&json!(34.5)), CellValue::Number(dec("34.5")));
        assert_eq!(age.parse_cell(&json!("12")), CellValue::Number(dec("12")));
        assert_eq!(age.parse_cell(&json!("n/a")), CellValue::Missing);

        let onset = CaseColumn::new("onset", ColumnKind::Date);
        assert_eq!(
            onset.parse_cell(&json!("2024-02-29")),
            CellValue::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap())
        );
        assert_eq!(onset.parse_cell(&json!(null)), CellValue::Missing);

        let region = CaseColumn::new("region", ColumnKind::Options(vec!["north".into()]));
        assert_eq!(region.parse_cell(&json!("")), CellValue::Missing);
        assert_eq!(region.domain().map(|d| d.len()), Some(1));
    }

    #[test]
    fn date_columns_get_a_dimension() {
        let columns = vec![
            CaseColumn::new("region", ColumnKind::Text),
            CaseColumn::new("onset", ColumnKind::Date).backend(),
        ];
        let (filters, dimensions) = default_filters(&columns);
        let ids: Vec<&str> = filters.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["region", "onset", "onset:range", "selection", "tree"]);
        assert_eq!(dimensions.len(), 1);
        assert!(dimensions[0].contains("onset:range"));
        assert_eq!(filters[1].mode, FilterMode::Backend);
        assert_eq!(filters[4].priority, STAGE_TREE);
    }
}
