use std::collections::{HashMap, HashSet};

use anyhow::Result;
use egui::Color32;
use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use super::case::{
    default_filters, CaseColumn, CaseRecord, SELECTION_FILTER_ID, STAGE_DEFAULT, STAGE_SELECTION,
    STAGE_TREE, TREE_FILTER_ID,
};
use super::fetch::{
    cancellable, CaseFetcher, CaseQuery, FetchError, FetchRegistry, FetchResource, FetchTicket,
    TreeRequest, TreeResponse,
};
use super::filter::{Filter, FilterMode, FilterValue};
use super::stratify::{
    is_stratifiable, stratifiable_columns, stratify_field, stratify_selection, Stratification,
    StratifyError, StratifyMode,
};
use super::{FilterChange, FilterSortStore, SortDirection, StageHook, StoreStatus};
use crate::config::EpiConfig;
use crate::tree::address::TreeAddress;
use crate::tree::prune::prune;
use crate::tree::reroot::{reroot_by_node, reroot_by_parent};
use crate::tree::sanitize::sanitize;
use crate::tree::{parse_newick, TreeNode, TreeUnavailable};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TreeState {
    #[default]
    Idle,
    Loading,
    Ready,
    Unavailable(TreeUnavailable),
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    StratificationCleared,
    ZoomReset,
    FetchFailed,
}

/// Something the user should be told about, e.g. a setting that was reset
/// because it no longer applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

/// Tree side of the store. Runs as the hook of the tree stage: it prunes the
/// full tree to the stage input, re-applies the zoom and sets the tree filter.
#[derive(Debug, Default)]
pub struct TreeContext {
    full: Option<TreeNode>,
    pruned: Option<TreeNode>,
    visible: Option<TreeNode>,
    zoom: Option<String>,
    addresses: Option<TreeAddress>,
    state: TreeState,
    notices: Vec<Notice>,
}

impl TreeContext {
    pub fn full(&self) -> Option<&TreeNode> {
        self.full.as_ref()
    }

    pub fn pruned(&self) -> Option<&TreeNode> {
        self.pruned.as_ref()
    }

    pub fn visible(&self) -> Option<&TreeNode> {
        self.visible.as_ref()
    }

    pub fn zoom(&self) -> Option<&str> {
        self.zoom.as_deref()
    }

    pub fn state(&self) -> &TreeState {
        &self.state
    }

    fn addresses(&mut self) -> Option<&TreeAddress> {
        if self.addresses.is_none() {
            self.addresses = self.visible.as_ref().map(TreeAddress::compute);
        }
        self.addresses.as_ref()
    }

    fn set_full(&mut self, tree: TreeNode) {
        self.full = Some(tree);
        self.state = TreeState::Ready;
    }

    fn fail(&mut self, message: String) {
        self.full = None;
        self.pruned = None;
        self.visible = None;
        self.addresses = None;
        self.state = TreeState::Failed(message);
    }

    fn rebuild(&mut self, keep: &HashSet<String>) {
        self.addresses = None;
        let Some(full) = &self.full else {
            self.pruned = None;
            self.visible = None;
            return;
        };

        self.pruned = prune(full, keep).map(|tree| sanitize(&tree));
        let Some(pruned) = &self.pruned else {
            self.visible = None;
            self.state = TreeState::Unavailable(TreeUnavailable::Empty);
            return;
        };

        self.visible = None;
        if let Some(target) = &self.zoom {
            match pruned.find(target) {
                Some(node) if !node.is_leaf() && *target != pruned.name => {
                    self.visible = Some(reroot_by_node(pruned, target));
                }
                _ => {
                    info!("Zoom target {target:?} left the tree; showing the whole tree.");
                    self.notices.push(Notice {
                        kind: NoticeKind::ZoomReset,
                        message: format!("Zoomed subtree {target} is no longer part of the tree"),
                    });
                    self.zoom = None;
                }
            }
        }
        let visible = self.visible.get_or_insert_with(|| pruned.clone());

        self.state = match visible.unavailable_reason() {
            Some(reason) => TreeState::Unavailable(reason),
            None => TreeState::Ready,
        };
    }
}

impl StageHook<CaseRecord> for TreeContext {
    fn before_stage(&mut self, stage: &str, input: &[&CaseRecord], filters: &mut [Filter]) {
        if stage != STAGE_TREE {
            return;
        }
        let keep: HashSet<String> = input.iter().map(|case| case.id.clone()).collect();
        self.rebuild(&keep);

        let value = match (&self.zoom, &self.visible) {
            (Some(_), Some(visible)) => FilterValue::ids(visible.sub_tree_names.iter().cloned()),
            _ => FilterValue::Empty,
        };
        for filter in filters.iter_mut().filter(|filter| filter.id == TREE_FILTER_ID) {
            filter.value = value.clone();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum StratifyTarget {
    Off,
    Field(String),
    Selection,
}

/// A started case fetch. Running it borrows nothing from the store, so a
/// newer fetch can start while it is pending.
#[derive(Debug, Clone)]
pub struct CaseFetch {
    pub ticket: FetchTicket,
    pub query: CaseQuery,
}

impl CaseFetch {
    pub async fn run(&self, fetcher: &dyn CaseFetcher) -> Result<Vec<CaseRecord>, FetchError> {
        let token = &self.ticket.token;
        cancellable(token, fetch_cases(fetcher, &self.query, token)).await
    }
}

async fn fetch_cases(
    fetcher: &dyn CaseFetcher,
    query: &CaseQuery,
    token: &CancellationToken,
) -> Result<Vec<CaseRecord>, FetchError> {
    let ids = fetcher.fetch_case_ids_by_query(query, token).await?;
    fetcher.fetch_cases_by_ids(&ids, token).await
}

#[derive(Debug, Clone)]
pub struct TreeFetch {
    pub ticket: FetchTicket,
    pub request: TreeRequest,
}

impl TreeFetch {
    pub async fn run(&self, fetcher: &dyn CaseFetcher) -> Result<TreeResponse, FetchError> {
        let token = &self.ticket.token;
        cancellable(token, fetcher.fetch_tree(&self.request, token)).await
    }
}

/// Case-record specialisation of the filter/sort store: selection and tree
/// stages, stratification, zoom, and fetch orchestration.
pub struct EpiStore {
    columns: Vec<CaseColumn>,
    config: EpiConfig,
    store: FilterSortStore<CaseRecord, TreeContext>,
    registry: FetchRegistry,
    target: StratifyTarget,
    stratification: Option<Stratification>,
    notices: Vec<Notice>,
}

impl EpiStore {
    pub fn new(columns: Vec<CaseColumn>, config: EpiConfig) -> Result<Self> {
        let (filters, dimensions) = default_filters(&columns);
        let sortable = columns
            .iter()
            .filter(|column| column.sortable)
            .map(|column| column.id.clone())
            .collect();
        let store = FilterSortStore::new(
            &[STAGE_DEFAULT, STAGE_SELECTION, STAGE_TREE],
            filters,
            dimensions,
            sortable,
            TreeContext::default(),
        )?;
        Ok(Self {
            columns,
            config,
            store,
            registry: FetchRegistry::new(),
            target: StratifyTarget::Off,
            stratification: None,
            notices: Vec::new(),
        })
    }

    pub fn columns(&self) -> &[CaseColumn] {
        &self.columns
    }

    pub fn config(&self) -> &EpiConfig {
        &self.config
    }

    pub fn filter_sort(&self) -> &FilterSortStore<CaseRecord, TreeContext> {
        &self.store
    }

    pub fn status(&self) -> &StoreStatus {
        self.store.status()
    }

    pub fn visible_rows(&self) -> Vec<&CaseRecord> {
        self.store.sorted_data()
    }

    pub fn fetch_registry(&self) -> &FetchRegistry {
        &self.registry
    }

    fn column(&self, id: &str) -> Option<&CaseColumn> {
        self.columns.iter().find(|column| column.id == id)
    }

    // ---- filters and sorting ----

    pub fn set_filter_values(&mut self, values: Vec<(String, FilterValue)>) -> FilterChange {
        let change = self.store.set_filter_values(values);
        if change == FilterChange::Refiltered {
            self.after_rows_changed();
        }
        change
    }

    /// Apply filter values and, when a backend filter changed, fetch the
    /// matching cases and their tree before returning.
    pub async fn apply_filter_values(
        &mut self,
        values: Vec<(String, FilterValue)>,
        fetcher: &dyn CaseFetcher,
    ) -> FilterChange {
        let change = self.set_filter_values(values);
        if change == FilterChange::RefetchRequired {
            debug!("Backend filters changed; refetching cases.");
            self.refresh(fetcher).await;
        }
        change
    }

    /// Restrict the rows to `ids`, or lift the restriction.
    pub fn set_selection_filter(&mut self, ids: Option<Vec<String>>) {
        let value = match ids {
            Some(ids) => FilterValue::ids(ids),
            None => FilterValue::Empty,
        };
        self.set_filter_values(vec![(SELECTION_FILTER_ID.to_owned(), value)]);
    }

    pub fn set_sorting(&mut self, column: &str, direction: SortDirection) {
        self.store.set_sorting(column, direction);
    }

    /// Back to tree leaf order.
    pub fn clear_sorting(&mut self) {
        self.store.clear_sorting();
    }

    /// Backend filters currently away from their initial value.
    pub fn backend_query(&self) -> CaseQuery {
        CaseQuery {
            filters: self
                .store
                .filters()
                .filter(|filter| filter.mode == FilterMode::Backend && !filter.is_initial_value())
                .map(|filter| (filter.id.clone(), filter.value.clone()))
                .collect(),
        }
    }

    // ---- fetching ----

    pub fn begin_case_fetch(&mut self) -> CaseFetch {
        self.store.set_status(StoreStatus::Loading);
        CaseFetch {
            ticket: self.registry.begin(FetchResource::Cases),
            query: self.backend_query(),
        }
    }

    /// Commit the outcome of `fetch`. Returns whether rows were replaced;
    /// superseded and cancelled fetches are dropped without effect.
    pub fn apply_cases(&mut self, fetch: &CaseFetch, result: Result<Vec<CaseRecord>, FetchError>) -> bool {
        if !self.registry.finish(&fetch.ticket) {
            debug!("Discarding superseded case fetch #{}", fetch.ticket.generation);
            self.settle_cancelled_cases();
            return false;
        }
        match result {
            Ok(cases) => {
                info!("Loaded {} case(s).", cases.len());
                self.store.set_base_data(cases);
                self.after_rows_changed();
                true
            }
            Err(FetchError::Cancelled) => {
                debug!("Case fetch #{} cancelled", fetch.ticket.generation);
                self.settle_cancelled_cases();
                false
            }
            Err(FetchError::Failed(message)) => {
                warn!("Case fetch failed: {message}");
                self.store.set_status(StoreStatus::Failed(message.clone()));
                self.notices.push(Notice {
                    kind: NoticeKind::FetchFailed,
                    message,
                });
                false
            }
        }
    }

    /// A cancelled case fetch that no newer fetch replaced must not leave
    /// the store looking busy.
    fn settle_cancelled_cases(&mut self) {
        if self.store.status() == &StoreStatus::Loading
            && !self.registry.is_in_flight(FetchResource::Cases)
        {
            self.store.set_status(StoreStatus::Cancelled);
        }
    }

    pub async fn refresh_cases(&mut self, fetcher: &dyn CaseFetcher) -> bool {
        let fetch = self.begin_case_fetch();
        let result = fetch.run(fetcher).await;
        self.apply_cases(&fetch, result)
    }

    pub fn begin_tree_fetch(&mut self) -> TreeFetch {
        self.store.hook_mut().state = TreeState::Loading;
        TreeFetch {
            ticket: self.registry.begin(FetchResource::Tree),
            request: TreeRequest {
                case_ids: self
                    .store
                    .base_data()
                    .iter()
                    .map(|case| case.id.clone())
                    .collect(),
            },
        }
    }

    /// Commit a tree fetch. Failures only affect the tree; rows stay as they are.
    pub fn apply_tree(&mut self, fetch: &TreeFetch, result: Result<TreeResponse, FetchError>) -> bool {
        if !self.registry.finish(&fetch.ticket) {
            debug!("Discarding superseded tree fetch #{}", fetch.ticket.generation);
            return false;
        }
        let parsed = match result {
            Ok(response) => parse_newick(&response.tree_string),
            Err(FetchError::Cancelled) => {
                debug!("Tree fetch #{} cancelled", fetch.ticket.generation);
                return false;
            }
            Err(FetchError::Failed(message)) => {
                warn!("Tree fetch failed: {message}");
                self.store.hook_mut().fail(message);
                self.store.refresh_from_stage(STAGE_TREE);
                self.after_rows_changed();
                return false;
            }
        };

        match parsed {
            Ok(tree) => {
                self.store.hook_mut().set_full(sanitize(&tree));
                self.store.refresh_from_stage(STAGE_TREE);
                self.after_rows_changed();
                true
            }
            Err(err) => {
                error!("{err:#}");
                self.store.hook_mut().fail(format!("{err:#}"));
                self.store.refresh_from_stage(STAGE_TREE);
                self.after_rows_changed();
                false
            }
        }
    }

    pub async fn refresh_tree(&mut self, fetcher: &dyn CaseFetcher) -> bool {
        let fetch = self.begin_tree_fetch();
        let result = fetch.run(fetcher).await;
        self.apply_tree(&fetch, result)
    }

    /// Cases first, then the tree of the new case set.
    pub async fn refresh(&mut self, fetcher: &dyn CaseFetcher) -> bool {
        self.refresh_cases(fetcher).await && self.refresh_tree(fetcher).await
    }

    /// Abort every in-flight fetch; later fetches are born cancelled.
    pub fn teardown(&mut self) {
        info!("Tearing down epi store fetches.");
        self.registry.teardown();
        if self.store.status() == &StoreStatus::Loading {
            self.store.set_status(StoreStatus::Cancelled);
        }
        let tree = self.store.hook_mut();
        if tree.state == TreeState::Loading {
            tree.state = TreeState::Idle;
        }
    }

    // ---- tree ----

    pub fn tree_state(&self) -> &TreeState {
        self.store.hook().state()
    }

    pub fn visible_tree(&self) -> Option<&TreeNode> {
        self.store.hook().visible()
    }

    pub fn zoom_target(&self) -> Option<&str> {
        self.store.hook().zoom()
    }

    pub fn tree_addresses(&mut self) -> Option<&TreeAddress> {
        self.store.hook_mut().addresses()
    }

    /// Re-root the visible tree at the ancestor `name`. Leaves and unknown
    /// names are ignored.
    pub fn zoom_into(&mut self, name: &str) -> bool {
        let Some(pruned) = self.store.hook().pruned() else {
            warn!("Cannot zoom into {name:?}: no tree loaded");
            return false;
        };
        match pruned.find(name) {
            None => {
                warn!("Cannot zoom into {name:?}: not in the current tree");
                false
            }
            Some(node) if node.is_leaf() => {
                debug!("Ignoring zoom into leaf {name:?}");
                false
            }
            Some(node) if node.name == pruned.name => {
                self.reset_zoom();
                true
            }
            Some(_) => {
                self.store.hook_mut().zoom = Some(name.to_owned());
                self.refresh_tree_stage();
                true
            }
        }
    }

    /// Step out to the parent of the current zoom target.
    pub fn zoom_out(&mut self) {
        let context = self.store.hook();
        let (Some(current), Some(pruned)) = (context.zoom(), context.pruned()) else {
            return;
        };
        let parent = reroot_by_parent(pruned, current);
        let next = (parent.name != pruned.name).then_some(parent.name);
        self.store.hook_mut().zoom = next;
        self.refresh_tree_stage();
    }

    pub fn reset_zoom(&mut self) {
        if self.store.hook().zoom().is_some() {
            self.store.hook_mut().zoom = None;
            self.refresh_tree_stage();
        }
    }

    fn refresh_tree_stage(&mut self) {
        self.store.refresh_from_stage(STAGE_TREE);
        self.after_rows_changed();
    }

    // ---- selection and stratification ----

    pub fn selected_ids(&self) -> &[String] {
        self.store.selected_ids()
    }

    /// Store the selection. A non-empty selection with no stratification
    /// switches to selection stratification; an empty one ends it.
    pub fn set_selected_ids(&mut self, ids: Vec<String>) {
        self.store.set_selected_ids(ids);
        if !self.store.selected_ids().is_empty() && self.target == StratifyTarget::Off {
            debug!("Selection made; stratifying by selection");
            self.target = StratifyTarget::Selection;
        }
        self.refresh_stratification();
    }

    pub fn stratification(&self) -> Option<&Stratification> {
        self.stratification.as_ref()
    }

    pub fn leaf_colors(&self) -> Option<&HashMap<String, Color32>> {
        self.stratification
            .as_ref()
            .map(|stratification| &stratification.case_id_to_color)
    }

    pub fn stratifiable_columns(&self) -> Vec<String> {
        stratifiable_columns(
            &self.visible_rows(),
            &self.columns,
            self.config.stratification.max_values,
        )
    }

    pub fn stratify(&mut self, mode: StratifyMode, column: Option<&str>) -> Result<(), StratifyError> {
        match mode {
            StratifyMode::None => {
                self.target = StratifyTarget::Off;
                self.stratification = None;
            }
            StratifyMode::Selection => {
                self.target = StratifyTarget::Selection;
                self.refresh_stratification();
            }
            StratifyMode::Field => {
                let id = column.ok_or(StratifyError::MissingColumn)?;
                let column = self
                    .column(id)
                    .ok_or_else(|| StratifyError::UnknownColumn(id.to_owned()))?;
                let stratification =
                    stratify_field(&self.visible_rows(), column, &self.config.stratification)?;
                self.target = StratifyTarget::Field(id.to_owned());
                self.stratification = Some(stratification);
            }
        }
        Ok(())
    }

    fn refresh_stratification(&mut self) {
        self.stratification = match self.target.clone() {
            StratifyTarget::Off => None,
            StratifyTarget::Selection if self.store.selected_ids().is_empty() => {
                debug!("Selection emptied; clearing stratification");
                self.target = StratifyTarget::Off;
                None
            }
            StratifyTarget::Selection => {
                let selected: HashSet<&str> =
                    self.store.selected_ids().iter().map(String::as_str).collect();
                Some(stratify_selection(
                    &self.visible_rows(),
                    &selected,
                    &self.config.stratification,
                ))
            }
            StratifyTarget::Field(id) => {
                let rows = self.visible_rows();
                let cap = self.config.stratification.max_values;
                let result = match self.column(&id) {
                    Some(column) if is_stratifiable(&rows, column, cap) => {
                        stratify_field(&rows, column, &self.config.stratification).ok()
                    }
                    _ => None,
                };
                if result.is_none() {
                    info!("Column {id:?} can no longer be stratified; clearing stratification.");
                    self.notices.push(Notice {
                        kind: NoticeKind::StratificationCleared,
                        message: format!("Stratification by {id} was cleared: too many distinct values"),
                    });
                    self.target = StratifyTarget::Off;
                }
                result
            }
        };
    }

    fn after_rows_changed(&mut self) {
        let order = self
            .store
            .hook()
            .visible()
            .map(|tree| tree.sub_tree_names.clone());
        if self.store.sorted_ids() != order.as_deref() {
            self.store.set_sorted_ids(order);
        }
        self.refresh_stratification();
    }

    /// Notices raised since the last call.
    pub fn take_notices(&mut self) -> Vec<Notice> {
        let mut notices = std::mem::take(&mut self.store.hook_mut().notices);
        notices.append(&mut self.notices);
        notices
    }
}
