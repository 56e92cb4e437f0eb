//! Priority-chained filtering, sorting and selection over an arbitrary row
//! type, plus the case-specific layer built on top of it.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use anyhow::{bail, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

pub mod case;
pub mod epi;
pub mod fetch;
pub mod filter;
pub mod stratify;

#[cfg(test)]
mod scenarios;

use filter::{CellValue, Filter, FilterDimension, FilterMode, FilterValue, Row};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sorting {
    pub column: String,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreStatus {
    Idle,
    Loading,
    Ready,
    /// The pending fetch was aborted and nothing replaced it.
    Cancelled,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterChange {
    Unchanged,
    /// Frontend filters changed and the affected stages were re-derived.
    Refiltered,
    /// A backend filter changed; the base data must be fetched again before
    /// anything is re-derived.
    RefetchRequired,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub stage_passes: u64,
    pub sort_passes: u64,
}

/// Called before a stage filters its input. Lets a specialisation derive
/// state from the stage input and adjust that stage's filters.
pub trait StageHook<R> {
    fn before_stage(&mut self, _stage: &str, _input: &[&R], _filters: &mut [Filter]) {}
}

impl<R> StageHook<R> for () {}

#[derive(Debug, Clone)]
struct Stage {
    name: String,
    filters: Vec<Filter>,
    /// Indices into the base data, in base order.
    rows: Vec<usize>,
}

/// `base → stage 1 → … → stage N → sorted`. Each stage keeps a subset of the
/// previous one in the same relative order.
#[derive(Debug, Clone)]
pub struct FilterSortStore<R, H = ()> {
    base: Vec<R>,
    stages: Vec<Stage>,
    dimensions: Vec<FilterDimension>,
    sortable: HashSet<String>,
    sorting: Option<Sorting>,
    sorted_ids: Option<Vec<String>>,
    sorted: Vec<usize>,
    selected_ids: Vec<String>,
    status: StoreStatus,
    stats: StoreStats,
    hook: H,
}

impl<R: Row, H: StageHook<R>> FilterSortStore<R, H> {
    /// `stage_names` are the filter priorities in pipeline order; every filter
    /// must name one of them.
    pub fn new(
        stage_names: &[&str],
        filters: Vec<Filter>,
        dimensions: Vec<FilterDimension>,
        sortable: HashSet<String>,
        hook: H,
    ) -> Result<Self> {
        let mut stages: Vec<Stage> = stage_names
            .iter()
            .map(|name| Stage {
                name: (*name).to_owned(),
                filters: Vec::new(),
                rows: Vec::new(),
            })
            .collect();

        for filter in filters {
            let Some(stage) = stages.iter_mut().find(|stage| stage.name == filter.priority) else {
                bail!("filter {} names unknown stage {}", filter.id, filter.priority);
            };
            stage.filters.push(filter);
        }

        Ok(Self {
            base: Vec::new(),
            stages,
            dimensions,
            sortable,
            sorting: None,
            sorted_ids: None,
            sorted: Vec::new(),
            selected_ids: Vec::new(),
            status: StoreStatus::Idle,
            stats: StoreStats::default(),
            hook,
        })
    }

    pub fn hook(&self) -> &H {
        &self.hook
    }

    pub fn hook_mut(&mut self) -> &mut H {
        &mut self.hook
    }

    pub fn status(&self) -> &StoreStatus {
        &self.status
    }

    pub fn set_status(&mut self, status: StoreStatus) {
        self.status = status;
    }

    pub fn stats(&self) -> StoreStats {
        self.stats
    }

    pub fn base_data(&self) -> &[R] {
        &self.base
    }

    /// Replace the base data and re-derive every stage.
    pub fn set_base_data(&mut self, rows: Vec<R>) {
        self.base = rows;
        self.status = StoreStatus::Ready;
        self.refilter_from(0);
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|stage| stage.name.as_str()).collect()
    }

    pub fn stage_data(&self, stage: &str) -> Vec<&R> {
        self.stages
            .iter()
            .find(|candidate| candidate.name == stage)
            .map(|stage| stage.rows.iter().map(|&index| &self.base[index]).collect())
            .unwrap_or_default()
    }

    pub fn sorted_data(&self) -> Vec<&R> {
        self.sorted.iter().map(|&index| &self.base[index]).collect()
    }

    pub fn sorted_row_ids(&self) -> Vec<&str> {
        self.sorted.iter().map(|&index| self.base[index].row_id()).collect()
    }

    pub fn filters(&self) -> impl Iterator<Item = &Filter> {
        self.stages.iter().flat_map(|stage| stage.filters.iter())
    }

    pub fn filter(&self, id: &str) -> Option<&Filter> {
        self.filters().find(|filter| filter.id == id)
    }

    fn locate(&self, id: &str) -> Option<(usize, usize)> {
        self.stages.iter().enumerate().find_map(|(stage_index, stage)| {
            stage
                .filters
                .iter()
                .position(|filter| filter.id == id)
                .map(|filter_index| (stage_index, filter_index))
        })
    }

    /// Apply new filter values. Backend changes only mark the store as
    /// loading; frontend changes re-derive from the earliest affected stage.
    pub fn set_filter_values(&mut self, values: Vec<(String, FilterValue)>) -> FilterChange {
        let mut backend_changed = false;
        let mut earliest: Option<usize> = None;

        for (id, value) in values {
            let Some((stage_index, filter_index)) = self.locate(&id) else {
                warn!("Ignoring value for unknown filter {id:?}");
                continue;
            };

            let mut touched = Vec::new();
            if self.stages[stage_index].filters[filter_index].value != value {
                touched.push((stage_index, filter_index));
                self.stages[stage_index].filters[filter_index].value = value;
            }

            let siblings: Vec<String> = self
                .dimensions
                .iter()
                .filter(|dimension| dimension.contains(&id))
                .flat_map(|dimension| dimension.filter_ids.iter())
                .filter(|sibling| **sibling != id)
                .cloned()
                .collect();
            for sibling in siblings {
                if let Some((s, f)) = self.locate(&sibling) {
                    let filter = &mut self.stages[s].filters[f];
                    if !filter.is_initial_value() {
                        filter.reset();
                        touched.push((s, f));
                    }
                }
            }

            for (s, f) in touched {
                match self.stages[s].filters[f].mode {
                    FilterMode::Backend => backend_changed = true,
                    FilterMode::Frontend => {
                        earliest = Some(earliest.map_or(s, |current| current.min(s)));
                    }
                }
            }
        }

        if backend_changed {
            debug!("Backend filter changed; waiting for a re-fetch");
            self.status = StoreStatus::Loading;
            return FilterChange::RefetchRequired;
        }
        match earliest {
            Some(stage) => {
                self.refilter_from(stage);
                FilterChange::Refiltered
            }
            None => FilterChange::Unchanged,
        }
    }

    /// Re-derive the named stage and everything after it.
    pub fn refresh_from_stage(&mut self, stage: &str) {
        match self.stages.iter().position(|candidate| candidate.name == stage) {
            Some(index) => self.refilter_from(index),
            None => warn!("Unknown stage {stage:?}"),
        }
    }

    fn refilter_from(&mut self, first: usize) {
        for index in first..self.stages.len() {
            let input: Vec<usize> = if index == 0 {
                (0..self.base.len()).collect()
            } else {
                self.stages[index - 1].rows.clone()
            };

            let rows: Vec<&R> = input.iter().map(|&row| &self.base[row]).collect();
            let stage = &mut self.stages[index];
            self.hook.before_stage(&stage.name, &rows, &mut stage.filters);

            // Backend filters are already reflected in the base data.
            let filters: Vec<&Filter> = stage
                .filters
                .iter()
                .filter(|filter| filter.mode == FilterMode::Frontend)
                .collect();
            stage.rows = input
                .into_iter()
                .filter(|&row| filters.iter().all(|filter| filter.matches(&self.base[row])))
                .collect();
            self.stats.stage_passes += 1;
        }
        self.resort();
        self.retain_visible_selection();
    }

    pub fn sorting(&self) -> Option<&Sorting> {
        self.sorting.as_ref()
    }

    pub fn set_sorting(&mut self, column: &str, direction: SortDirection) {
        self.sorting = Some(Sorting {
            column: column.to_owned(),
            direction,
        });
        self.resort();
    }

    pub fn clear_sorting(&mut self) {
        self.sorting = None;
        self.resort();
    }

    /// External row order, e.g. the tree's leaf order. Used when the sort
    /// column has no comparator.
    pub fn set_sorted_ids(&mut self, ids: Option<Vec<String>>) {
        self.sorted_ids = ids;
        self.resort();
    }

    pub fn sorted_ids(&self) -> Option<&[String]> {
        self.sorted_ids.as_deref()
    }

    fn resort(&mut self) {
        let mut order = self
            .stages
            .last()
            .map(|stage| stage.rows.clone())
            .unwrap_or_else(|| (0..self.base.len()).collect());
        let direction = self
            .sorting
            .as_ref()
            .map_or(SortDirection::Ascending, |sorting| sorting.direction);
        let directed = |ordering: Ordering| match direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        };

        let comparator_column = self
            .sorting
            .as_ref()
            .filter(|sorting| self.sortable.contains(&sorting.column))
            .map(|sorting| sorting.column.clone());

        if let Some(column) = comparator_column {
            let mut keyed: Vec<(usize, CellValue)> = order
                .iter()
                .map(|&row| (row, self.base[row].cell(&column)))
                .collect();
            keyed.sort_by(|(_, left), (_, right)| match (left.is_missing(), right.is_missing()) {
                (false, false) => directed(left.compare(right)),
                (missing_left, missing_right) => missing_left.cmp(&missing_right),
            });
            order = keyed.into_iter().map(|(row, _)| row).collect();
        } else if let Some(ids) = &self.sorted_ids {
            let positions: HashMap<&str, usize> = ids
                .iter()
                .enumerate()
                .map(|(position, id)| (id.as_str(), position))
                .collect();
            let base = &self.base;
            order.sort_by(|&a, &b| {
                match (positions.get(base[a].row_id()), positions.get(base[b].row_id())) {
                    (Some(left), Some(right)) => directed(left.cmp(right)),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                }
            });
        }

        self.sorted = order;
        self.stats.sort_passes += 1;
    }

    pub fn selected_ids(&self) -> &[String] {
        &self.selected_ids
    }

    /// Store the selection, keeping only ids of rows currently in the sorted
    /// data.
    pub fn set_selected_ids(&mut self, ids: Vec<String>) {
        self.selected_ids = ids;
        self.retain_visible_selection();
    }

    fn retain_visible_selection(&mut self) {
        if self.selected_ids.is_empty() {
            return;
        }
        let visible: HashSet<&str> = self
            .sorted
            .iter()
            .map(|&index| self.base[index].row_id())
            .collect();
        let before = self.selected_ids.len();
        self.selected_ids.retain(|id| visible.contains(id.as_str()));
        if self.selected_ids.len() != before {
            debug!(
                "Dropped {} selected id(s) no longer visible",
                before - self.selected_ids.len()
            );
        }
    }
}
