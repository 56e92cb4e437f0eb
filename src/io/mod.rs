use std::fs;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::store::case::{CaseColumn, CaseRecord};
use crate::store::fetch::{CaseFetcher, CaseQuery, FetchError, TreeRequest, TreeResponse};
use crate::store::filter::Row;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeFileFormat {
    Newick,
    Nexus,
}

/// Read the first tree of a newick or nexus file as a newick string.
pub fn load_tree_string(path: &Path) -> Result<String> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read tree file: {}", path.display()))?;
    first_tree(&raw).with_context(|| format!("no usable tree in {}", path.display()))
}

fn first_tree(raw: &str) -> Result<String> {
    let tree = match detect_format(raw) {
        TreeFileFormat::Newick => raw
            .split_inclusive(';')
            .map(str::trim)
            .find(|chunk| chunk.ends_with(';') && chunk.contains('('))
            .map(normalise_newick),
        TreeFileFormat::Nexus => first_nexus_tree(raw)?,
    };
    match tree {
        Some(tree) => Ok(tree),
        None => bail!("tree file did not contain any trees"),
    }
}

fn detect_format(raw: &str) -> TreeFileFormat {
    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || (trimmed.starts_with('[') && trimmed.ends_with(']')) {
            continue;
        }

        let upper = trimmed.to_ascii_uppercase();
        if upper.starts_with("#NEXUS") || upper.starts_with("BEGIN ") || upper.starts_with("TREE ") {
            return TreeFileFormat::Nexus;
        }
        if trimmed.contains('(') {
            return TreeFileFormat::Newick;
        }
    }

    TreeFileFormat::Newick
}

fn first_nexus_tree(raw: &str) -> Result<Option<String>> {
    let mut in_trees_block = false;
    let mut pending: Vec<String> = Vec::new();

    for line in raw.lines() {
        let line = strip_comment(line.trim());
        if line.is_empty() {
            continue;
        }
        let upper = line.to_ascii_uppercase();

        if upper.starts_with("BEGIN TREES") {
            in_trees_block = true;
            continue;
        }
        if !in_trees_block {
            continue;
        }
        if upper.starts_with("END") && pending.is_empty() {
            in_trees_block = false;
            continue;
        }

        if upper.starts_with("TREE ") || upper.starts_with("UTREE ") || !pending.is_empty() {
            pending.push(line);
            if pending.last().is_some_and(|last| last.ends_with(';')) {
                return nexus_tree_line(&pending.join(" ")).map(Some);
            }
        }
    }

    if pending.is_empty() {
        Ok(None)
    } else {
        nexus_tree_line(&pending.join(" ")).map(Some)
    }
}

/// Remove `[...]` comments that open and close on this line. Comments
/// starting with `&` are annotations and stay in place.
fn strip_comment(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    while let Some(start) = rest.find('[') {
        let Some(len) = rest[start..].find(']') else {
            break;
        };
        out.push_str(&rest[..start]);
        let comment = &rest[start..start + len + 1];
        if comment.starts_with("[&") {
            out.push_str(comment);
        }
        rest = &rest[start + len + 1..];
    }
    out.push_str(rest);
    out.trim().to_owned()
}

fn nexus_tree_line(line: &str) -> Result<String> {
    let (_, definition) = line
        .split_once('=')
        .ok_or_else(|| anyhow!("missing tree definition in nexus line: {line}"))?;

    let mut payload = definition.trim().trim_end_matches(';').trim();
    // rooting hints such as [&R] before the tree
    while payload.starts_with('[') {
        match payload.find(']') {
            Some(end) => payload = payload[end + 1..].trim(),
            None => break,
        }
    }
    Ok(normalise_newick(payload))
}

fn normalise_newick(raw: &str) -> String {
    let mut cleaned = raw.trim().trim_end_matches(';').trim().to_owned();
    cleaned.push(';');
    cleaned
}

/// Line list file: column schema plus raw case values.
#[derive(Debug, Clone, Deserialize)]
struct RawDataset {
    columns: Vec<CaseColumn>,
    cases: Vec<RawCase>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawCase {
    id: String,
    #[serde(default)]
    values: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseDataset {
    pub columns: Vec<CaseColumn>,
    pub cases: Vec<CaseRecord>,
}

pub fn load_case_dataset(path: &Path) -> Result<CaseDataset> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read case file: {}", path.display()))?;
    parse_case_dataset(&raw).with_context(|| format!("invalid case file: {}", path.display()))
}

fn parse_case_dataset(raw: &str) -> Result<CaseDataset> {
    let dataset: RawDataset = serde_json::from_str(raw)?;
    if dataset.columns.is_empty() {
        bail!("case file declares no columns");
    }

    let cases = dataset
        .cases
        .into_iter()
        .map(|raw_case| {
            let mut record = CaseRecord::new(raw_case.id);
            for column in &dataset.columns {
                if let Some(value) = raw_case.values.get(&column.id) {
                    record = record.with(&column.id, column.parse_cell(value));
                }
            }
            record
        })
        .collect::<Vec<_>>();
    debug!(
        "Parsed {} case(s) over {} column(s).",
        cases.len(),
        dataset.columns.len()
    );

    Ok(CaseDataset {
        columns: dataset.columns,
        cases,
    })
}

/// File-backed fetcher: answers queries from an in-memory case list and a
/// single tree.
#[derive(Debug, Clone)]
pub struct LocalCaseSource {
    cases: Vec<CaseRecord>,
    tree: Option<String>,
}

impl LocalCaseSource {
    pub fn new(cases: Vec<CaseRecord>, tree: Option<String>) -> Self {
        info!("Local case source with {} case(s).", cases.len());
        Self { cases, tree }
    }
}

#[async_trait]
impl CaseFetcher for LocalCaseSource {
    async fn fetch_case_ids_by_query(
        &self,
        query: &CaseQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        Ok(self
            .cases
            .iter()
            .filter(|case| {
                query.filters.iter().all(|(filter_id, value)| {
                    let column = filter_id.strip_suffix(":range").unwrap_or(filter_id);
                    value.matches(case.row_id(), &case.cell(column))
                })
            })
            .map(|case| case.id.clone())
            .collect())
    }

    async fn fetch_cases_by_ids(
        &self,
        ids: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<CaseRecord>, FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        let wanted: std::collections::HashSet<&str> = ids.iter().map(String::as_str).collect();
        Ok(self
            .cases
            .iter()
            .filter(|case| wanted.contains(case.id.as_str()))
            .cloned()
            .collect())
    }

    async fn fetch_tree(
        &self,
        _request: &TreeRequest,
        cancel: &CancellationToken,
    ) -> Result<TreeResponse, FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        self.tree
            .clone()
            .map(|tree_string| TreeResponse { tree_string })
            .ok_or_else(|| FetchError::Failed("no tree file was given".into()))
    }
}
