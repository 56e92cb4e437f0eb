//! End-to-end runs of the epi store through the fetch boundary.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::case::{CaseColumn, CaseRecord, ColumnKind};
use super::epi::{EpiStore, NoticeKind, TreeState};
use super::fetch::{CaseFetcher, CaseQuery, FetchError, TreeRequest, TreeResponse};
use super::filter::{CellValue, FilterValue, Row};
use super::stratify::StratifyMode;
use super::{FilterChange, StoreStatus};
use crate::config::{EpiConfig, StratificationConfig};
use crate::tree::test_support::dec;

const TREE: &str = "((A:1,B:1):1,(C:2,D:1,E:1):1);";

struct MockFetcher {
    cases: Vec<CaseRecord>,
    tree: Option<String>,
    queries: AtomicUsize,
    trees: AtomicUsize,
}

impl MockFetcher {
    fn new(tree: Option<&str>) -> Self {
        let text = |s: &str| CellValue::Text(s.to_owned());
        let cases = [
            ("A", "north", "x", "4"),
            ("B", "north", "x", "8"),
            ("C", "south", "y", "15"),
            ("D", "south", "y", "16"),
            ("E", "east", "y", "23"),
        ]
        .into_iter()
        .map(|(id, region, district, age)| {
            CaseRecord::new(id)
                .with("region", text(region))
                .with("district", text(district))
                .with("age", CellValue::Number(dec(age)))
        })
        .collect();
        Self {
            cases,
            tree: tree.map(str::to_owned),
            queries: AtomicUsize::new(0),
            trees: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl CaseFetcher for MockFetcher {
    async fn fetch_case_ids_by_query(
        &self,
        query: &CaseQuery,
        _cancel: &CancellationToken,
    ) -> Result<Vec<String>, FetchError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .cases
            .iter()
            .filter(|case| {
                query
                    .filters
                    .iter()
                    .all(|(column, value)| value.matches(case.row_id(), &case.cell(column)))
            })
            .map(|case| case.id.clone())
            .collect())
    }

    async fn fetch_cases_by_ids(
        &self,
        ids: &[String],
        _cancel: &CancellationToken,
    ) -> Result<Vec<CaseRecord>, FetchError> {
        Ok(self
            .cases
            .iter()
            .filter(|case| ids.contains(&case.id))
            .cloned()
            .collect())
    }

    async fn fetch_tree(
        &self,
        _request: &TreeRequest,
        _cancel: &CancellationToken,
    ) -> Result<TreeResponse, FetchError> {
        self.trees.fetch_add(1, Ordering::SeqCst);
        match &self.tree {
            Some(tree) => Ok(TreeResponse {
                tree_string: tree.clone(),
            }),
            None => Err(FetchError::Failed("tree service unavailable".into())),
        }
    }
}

fn columns() -> Vec<CaseColumn> {
    vec![
        CaseColumn::new("region", ColumnKind::Text),
        CaseColumn::new("district", ColumnKind::Text).backend(),
        CaseColumn::new("age", ColumnKind::Number),
    ]
}

fn store_with(config: EpiConfig) -> EpiStore {
    EpiStore::new(columns(), config).unwrap()
}

fn visible_ids(store: &EpiStore) -> Vec<String> {
    store
        .visible_rows()
        .into_iter()
        .map(|case| case.id.clone())
        .collect()
}

#[tokio::test]
async fn selection_stratification_covers_every_leaf() {
    let fetcher = MockFetcher::new(Some(TREE));
    let mut store = store_with(EpiConfig::default());
    assert!(store.refresh(&fetcher).await);
    assert_eq!(store.tree_state(), &TreeState::Ready);
    assert_eq!(store.visible_tree().map(|tree| tree.leaf_count()), Some(5));

    store.set_selected_ids(vec!["A".into(), "D".into()]);
    store.stratify(StratifyMode::Selection, None).unwrap();

    let stratification = store.stratification().unwrap();
    assert_eq!(stratification.legend_items.len(), 2);
    assert_eq!(stratification.legend_items[0].count(), 2);
    assert_eq!(stratification.total_count(), 5);

    store.set_selected_ids(Vec::new());
    assert!(store.stratification().is_none());
}

#[tokio::test]
async fn backend_change_refetches_once_without_local_passes() {
    let fetcher = MockFetcher::new(Some(TREE));
    let mut store = store_with(EpiConfig::default());
    assert!(store.refresh(&fetcher).await);
    let queries = fetcher.queries.load(Ordering::SeqCst);
    let passes = store.filter_sort().stats().stage_passes;

    let change = store.set_filter_values(vec![
        ("region".into(), FilterValue::Text("south".into())),
        ("district".into(), FilterValue::Text("y".into())),
    ]);
    assert_eq!(change, FilterChange::RefetchRequired);
    assert_eq!(store.status(), &StoreStatus::Loading);
    assert_eq!(store.filter_sort().stats().stage_passes, passes);
    assert_eq!(visible_ids(&store).len(), 5);

    assert!(store.refresh_cases(&fetcher).await);
    assert_eq!(fetcher.queries.load(Ordering::SeqCst), queries + 1);
    assert_eq!(store.status(), &StoreStatus::Ready);
    // district leaves C, D, E; the frontend region filter keeps C, D
    assert_eq!(visible_ids(&store), vec!["C", "D"]);
}

#[tokio::test]
async fn backend_filter_change_refetches_cases_and_tree() {
    let fetcher = MockFetcher::new(Some(TREE));
    let mut store = store_with(EpiConfig::default());
    assert!(store.refresh(&fetcher).await);
    let queries = fetcher.queries.load(Ordering::SeqCst);
    let trees = fetcher.trees.load(Ordering::SeqCst);

    let change = store
        .apply_filter_values(
            vec![
                ("region".into(), FilterValue::Text("south".into())),
                ("district".into(), FilterValue::Text("y".into())),
            ],
            &fetcher,
        )
        .await;
    assert_eq!(change, FilterChange::RefetchRequired);
    assert_eq!(fetcher.queries.load(Ordering::SeqCst), queries + 1);
    assert_eq!(fetcher.trees.load(Ordering::SeqCst), trees + 1);
    assert_eq!(store.status(), &StoreStatus::Ready);
    assert_eq!(store.tree_state(), &TreeState::Ready);
    assert_eq!(visible_ids(&store), vec!["C", "D"]);
    assert_eq!(
        store.visible_tree().map(|tree| tree.sub_tree_names.clone()),
        Some(vec!["C".to_string(), "D".to_string()])
    );

    // frontend-only changes stay local
    let change = store
        .apply_filter_values(vec![("region".into(), FilterValue::Empty)], &fetcher)
        .await;
    assert_eq!(change, FilterChange::Refiltered);
    assert_eq!(fetcher.queries.load(Ordering::SeqCst), queries + 1);
    assert_eq!(visible_ids(&store), vec!["C", "D", "E"]);
}

#[tokio::test]
async fn superseded_fetch_is_never_applied() {
    let fetcher = MockFetcher::new(Some(TREE));
    let mut store = store_with(EpiConfig::default());

    let stale = store.begin_case_fetch();
    store.set_filter_values(vec![("district".into(), FilterValue::Text("x".into()))]);
    let fresh = store.begin_case_fetch();
    assert!(stale.ticket.is_cancelled());

    let stale_result = stale.run(&fetcher).await;
    assert_eq!(stale_result, Err(FetchError::Cancelled));
    let fresh_result = fresh.run(&fetcher).await;

    assert!(store.apply_cases(&fresh, fresh_result));
    assert!(!store.apply_cases(&stale, Ok(MockFetcher::new(None).cases)));
    assert_eq!(visible_ids(&store), vec!["A", "B"]);
}

#[tokio::test]
async fn failed_tree_fetch_leaves_rows_intact() {
    let fetcher = MockFetcher::new(None);
    let mut store = store_with(EpiConfig::default());
    assert!(!store.refresh(&fetcher).await);

    assert_eq!(fetcher.trees.load(Ordering::SeqCst), 1);
    assert!(matches!(store.tree_state(), TreeState::Failed(_)));
    assert_eq!(store.status(), &StoreStatus::Ready);
    assert_eq!(visible_ids(&store).len(), 5);
    assert!(store.take_notices().is_empty());
}

#[tokio::test]
async fn ineligible_field_stratification_is_cleared_with_notice() {
    let fetcher = MockFetcher::new(Some(TREE));
    let config = EpiConfig {
        stratification: StratificationConfig {
            max_values: 3,
            ..StratificationConfig::default()
        },
        ..EpiConfig::default()
    };
    let mut store = store_with(config);
    assert!(store.refresh(&fetcher).await);

    store.set_filter_values(vec![("region".into(), FilterValue::Text("north".into()))]);
    assert!(store.stratifiable_columns().contains(&"age".to_string()));
    store.stratify(StratifyMode::Field, Some("age")).unwrap();
    assert_eq!(store.stratification().map(|s| s.legend_items.len()), Some(2));

    store.set_filter_values(vec![("region".into(), FilterValue::Empty)]);
    assert!(store.stratification().is_none());
    let notices = store.take_notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].kind, NoticeKind::StratificationCleared);
}

#[tokio::test]
async fn teardown_stops_later_fetches() {
    let fetcher = MockFetcher::new(Some(TREE));
    let mut store = store_with(EpiConfig::default());
    store.teardown();
    assert!(!store.refresh(&fetcher).await);
    assert_eq!(store.status(), &StoreStatus::Cancelled);
    assert!(store.visible_rows().is_empty());
    assert!(store.fetch_registry().is_torn_down());
}
