use std::collections::{BTreeMap, HashMap};
use std::future::Future;

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::case::CaseRecord;
use super::filter::FilterValue;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Superseded by a newer fetch or torn down. Never shown to the user.
    #[error("fetch cancelled")]
    Cancelled,
    #[error("fetch failed: {0}")]
    Failed(String),
}

/// Backend filter values of a case query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseQuery {
    pub filters: BTreeMap<String, FilterValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeRequest {
    pub case_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeResponse {
    pub tree_string: String,
}

/// Data source of the epi store. Implementations should stop early when
/// `cancel` fires; results of a cancelled fetch are discarded either way.
#[async_trait]
pub trait CaseFetcher: Send + Sync {
    async fn fetch_case_ids_by_query(
        &self,
        query: &CaseQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, FetchError>;

    async fn fetch_cases_by_ids(
        &self,
        ids: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<CaseRecord>, FetchError>;

    async fn fetch_tree(
        &self,
        request: &TreeRequest,
        cancel: &CancellationToken,
    ) -> Result<TreeResponse, FetchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchResource {
    Cases,
    Tree,
}

/// Handle of one fetch. Its token is cancelled when a newer fetch of the same
/// resource starts or the registry is torn down.
#[derive(Debug, Clone)]
pub struct FetchTicket {
    pub resource: FetchResource,
    pub generation: u64,
    pub token: CancellationToken,
}

impl FetchTicket {
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// At most one in-flight fetch per resource, all under one teardown token.
#[derive(Debug)]
pub struct FetchRegistry {
    root: CancellationToken,
    in_flight: HashMap<FetchResource, FetchTicket>,
    started: HashMap<FetchResource, u64>,
}

impl Default for FetchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FetchRegistry {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            in_flight: HashMap::new(),
            started: HashMap::new(),
        }
    }

    /// Start a fetch, aborting the previous one for `resource`.
    pub fn begin(&mut self, resource: FetchResource) -> FetchTicket {
        if let Some(previous) = self.in_flight.remove(&resource) {
            debug!("Superseding {resource:?} fetch #{}", previous.generation);
            previous.token.cancel();
        }
        let generation = self.started.entry(resource).or_insert(0);
        *generation += 1;
        let ticket = FetchTicket {
            resource,
            generation: *generation,
            token: self.root.child_token(),
        };
        self.in_flight.insert(resource, ticket.clone());
        ticket
    }

    /// Release `ticket` if it is still the current fetch. Returns whether its
    /// result may be applied.
    pub fn finish(&mut self, ticket: &FetchTicket) -> bool {
        let current = self
            .in_flight
            .get(&ticket.resource)
            .is_some_and(|active| active.generation == ticket.generation);
        if current {
            self.in_flight.remove(&ticket.resource);
        }
        current && !ticket.is_cancelled()
    }

    pub fn is_in_flight(&self, resource: FetchResource) -> bool {
        self.in_flight.contains_key(&resource)
    }

    pub fn started(&self, resource: FetchResource) -> u64 {
        self.started.get(&resource).copied().unwrap_or(0)
    }

    /// Abort everything, including fetches started later.
    pub fn teardown(&mut self) {
        self.root.cancel();
        self.in_flight.clear();
    }

    pub fn is_torn_down(&self) -> bool {
        self.root.is_cancelled()
    }
}

/// Race `fetch` against `token`.
pub async fn cancellable<T, F>(token: &CancellationToken, fetch: F) -> Result<T, FetchError>
where
    F: Future<Output = Result<T, FetchError>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(FetchError::Cancelled),
        result = fetch => result,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn newer_fetch_cancels_older() {
        let mut registry = FetchRegistry::new();
        let first = registry.begin(FetchResource::Cases);
        let tree = registry.begin(FetchResource::Tree);
        let second = registry.begin(FetchResource::Cases);

        assert!(first.is_cancelled());
        assert!(!tree.is_cancelled());
        assert!(!registry.finish(&first));
        assert!(registry.finish(&second));
        assert!(!registry.is_in_flight(FetchResource::Cases));
        assert_eq!(registry.started(FetchResource::Cases), 2);
    }

    #[test]
    fn teardown_cancels_everything() {
        let mut registry = FetchRegistry::new();
        let cases = registry.begin(FetchResource::Cases);
        registry.teardown();
        assert!(cases.is_cancelled());
        let late = registry.begin(FetchResource::Tree);
        assert!(late.is_cancelled());
        assert!(!registry.finish(&late));
    }

    #[tokio::test]
    async fn cancellable_stops_pending_fetch() {
        let token = CancellationToken::new();
        let pending = async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok::<_, FetchError>(1)
        };
        token.cancel();
        assert_eq!(cancellable(&token, pending).await, Err(FetchError::Cancelled));

        let fresh = CancellationToken::new();
        assert_eq!(cancellable(&fresh, async { Ok::<_, FetchError>(7) }).await, Ok(7));
    }
}
