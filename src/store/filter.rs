use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single typed cell of a row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CellValue {
    Missing,
    Bool(bool),
    Number(Decimal),
    Date(NaiveDate),
    Text(String),
}

impl CellValue {
    pub fn is_missing(&self) -> bool {
        matches!(self, CellValue::Missing)
    }

    fn rank(&self) -> u8 {
        match self {
            CellValue::Bool(_) => 0,
            CellValue::Number(_) => 1,
            CellValue::Date(_) => 2,
            CellValue::Text(_) => 3,
            CellValue::Missing => 4,
        }
    }

    /// Generic value order. Missing always sorts last; values of different
    /// kinds order by kind.
    pub fn compare(&self, other: &CellValue) -> Ordering {
        match (self, other) {
            (CellValue::Bool(a), CellValue::Bool(b)) => a.cmp(b),
            (CellValue::Number(a), CellValue::Number(b)) => a.cmp(b),
            (CellValue::Date(a), CellValue::Date(b)) => a.cmp(b),
            (CellValue::Text(a), CellValue::Text(b)) => a
                .to_lowercase()
                .cmp(&b.to_lowercase())
                .then_with(|| a.cmp(b)),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Missing => Ok(()),
            CellValue::Bool(value) => write!(f, "{value}"),
            CellValue::Number(value) => write!(f, "{}", value.normalize()),
            CellValue::Date(value) => write!(f, "{}", value.format("%Y-%m-%d")),
            CellValue::Text(value) => f.write_str(value),
        }
    }
}

/// Anything the filter/sort pipeline can hold.
pub trait Row: Clone {
    fn row_id(&self) -> &str;
    fn cell(&self, column: &str) -> CellValue;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    /// Changes the base dataset; handled by a re-fetch.
    Backend,
    /// Evaluated locally over already fetched rows.
    Frontend,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FilterValue {
    Empty,
    /// Case-insensitive substring.
    Text(String),
    OneOf(BTreeSet<String>),
    Bool(bool),
    Date(NaiveDate),
    DateRange {
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    },
    NumberRange {
        min: Option<Decimal>,
        max: Option<Decimal>,
    },
    /// Row id allow-list.
    Ids(BTreeSet<String>),
}

impl FilterValue {
    pub fn ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FilterValue::Ids(ids.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, row_id: &str, cell: &CellValue) -> bool {
        match self {
            FilterValue::Empty => true,
            FilterValue::Ids(ids) => ids.contains(row_id),
            FilterValue::Text(needle) => {
                !cell.is_missing() && cell.to_string().to_lowercase().contains(&needle.to_lowercase())
            }
            FilterValue::OneOf(values) => !cell.is_missing() && values.contains(&cell.to_string()),
            FilterValue::Bool(expected) => cell == &CellValue::Bool(*expected),
            FilterValue::Date(day) => cell == &CellValue::Date(*day),
            FilterValue::DateRange { from, to } => match cell {
                CellValue::Date(day) => {
                    from.map_or(true, |from| *day >= from) && to.map_or(true, |to| *day <= to)
                }
                _ => false,
            },
            FilterValue::NumberRange { min, max } => match cell {
                CellValue::Number(number) => {
                    min.map_or(true, |min| *number >= min) && max.map_or(true, |max| *number <= max)
                }
                _ => false,
            },
        }
    }
}

/// Named predicate over one row field. `priority` names the pipeline stage
/// the filter runs in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub id: String,
    /// `None` filters on the row id.
    pub column: Option<String>,
    pub mode: FilterMode,
    pub priority: String,
    pub initial_value: FilterValue,
    pub value: FilterValue,
}

impl Filter {
    pub fn new(
        id: impl Into<String>,
        column: Option<&str>,
        mode: FilterMode,
        priority: impl Into<String>,
        initial_value: FilterValue,
    ) -> Self {
        Self {
            id: id.into(),
            column: column.map(str::to_owned),
            mode,
            priority: priority.into(),
            value: initial_value.clone(),
            initial_value,
        }
    }

    pub fn is_initial_value(&self) -> bool {
        self.value == self.initial_value
    }

    pub fn reset(&mut self) {
        self.value = self.initial_value.clone();
    }

    /// A filter holding its initial value passes every row.
    pub fn matches<R: Row>(&self, row: &R) -> bool {
        if self.is_initial_value() {
            return true;
        }
        let cell = match &self.column {
            Some(column) => row.cell(column),
            None => CellValue::Missing,
        };
        self.value.matches(row.row_id(), &cell)
    }
}

/// Mutually exclusive filters sharing one semantic slot: setting one resets
/// the others.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterDimension {
    pub id: String,
    pub filter_ids: Vec<String>,
}

impl FilterDimension {
    pub fn new(id: impl Into<String>, filter_ids: Vec<String>) -> Self {
        Self {
            id: id.into(),
            filter_ids,
        }
    }

    pub fn contains(&self, filter_id: &str) -> bool {
        self.filter_ids.iter().any(|id| id == filter_id)
    }
}
