//! Stats propagation.
//!
//! Takes one decoded batch (single tenant), assembles the working forest —
//! batch spans, their stored ancestors, and any stored descendants not yet
//! accounted for — and recomputes subtree statistics bottom-up. Batches may
//! arrive in any order: the `_childStats` map on each internal span records
//! the last-known subtree stats per direct child, so a late-arriving sibling
//! adds to its ancestors without double counting subtrees that were already
//! aggregated.
//!
//! The traversal itself is pure: it computes a per-span result map over the
//! immutable working set, and mutations (batch spans in place, loaded spans
//! as store patches) are applied afterwards.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cost::{ATTR_COST_USD, TokenUsage};
use crate::model::{AttrValue, Span, SpanStats};
use crate::store::{
    QueryNode, SearchRequest, SortOrder, SpanStore, StoreError, STATS_PROJECTION,
};

/// Page size for in-store children discovery.
const CHILD_PAGE: usize = 1000;

/// What one propagation round did, besides mutating the batch.
#[derive(Debug, Default)]
pub struct PropagationOutcome {
    /// Root spans of the working forest, with final stats. Fed to the
    /// experiment updater.
    pub roots: Vec<Span>,
    /// Store patches successfully applied to loaded spans.
    pub patches_applied: usize,
    /// Store patches that failed or hit a vanished document. Best-effort:
    /// the next batch touching those ancestors repairs them.
    pub patches_failed: usize,
}

struct WorkItem {
    span: Span,
    /// True when fetched from the store (ancestor or discovered descendant),
    /// meaning changes persist via an individual patch. Batch spans are
    /// bulk-written by the endpoint after propagation.
    loaded: bool,
}

/// A span's own statistics, excluding any child contribution: token counts
/// and cost from its attributes, one error if its status is failed, and its
/// duration.
#[must_use]
pub fn own_stats(span: &Span) -> SpanStats {
    let usage = TokenUsage::from_span(span);
    SpanStats {
        input_tokens: usage.input,
        output_tokens: usage.output,
        cached_input_tokens: usage.cached_input,
        total_tokens: usage.total,
        cost: span
            .attributes
            .get(ATTR_COST_USD)
            .and_then(AttrValue::as_f64),
        errors: Some(i64::from(span.status.is_error())),
        descendants: None,
        duration: span.duration_ms,
    }
}

/// Propagate stats for one batch.
///
/// Batch spans get their final `stats`/`_childStats` set in place; visited
/// store-resident spans are patched individually. Store failures during
/// assembly or patching degrade the round but never fail it.
pub async fn propagate_batch(
    store: &dyn SpanStore,
    tenant: Uuid,
    batch: &mut [Span],
) -> PropagationOutcome {
    let mut order: Vec<String> = Vec::new();
    let mut items: HashMap<String, WorkItem> = HashMap::new();

    for span in batch.iter() {
        if items.contains_key(&span.id) {
            warn!(span = %span.id, "Duplicate span id in batch, keeping first occurrence");
            continue;
        }
        order.push(span.id.clone());
        items.insert(
            span.id.clone(),
            WorkItem {
                span: span.clone(),
                loaded: false,
            },
        );
    }

    load_ancestors(store, tenant, &mut order, &mut items).await;
    discover_children(store, tenant, &mut order, &mut items).await;

    // Build the forest. A span whose parent is absent or outside the
    // working set is a root; that covers both true trace roots and loaded
    // ancestors whose own parent could not be loaded.
    let mut children_of: HashMap<String, Vec<String>> = HashMap::new();
    let mut roots: Vec<String> = Vec::new();
    for id in &order {
        let parent = items[id]
            .span
            .parent
            .clone()
            .filter(|p| !p.is_empty() && items.contains_key(p));
        match parent {
            Some(parent) => children_of.entry(parent).or_default().push(id.clone()),
            None => roots.push(id.clone()),
        }
    }

    // Pure bottom-up pass
    let mut visited: HashSet<String> = HashSet::new();
    let mut computed: HashMap<String, (SpanStats, BTreeMap<String, SpanStats>)> = HashMap::new();
    for root in &roots {
        process(root, &items, &children_of, &mut visited, &mut computed);
    }
    if visited.len() < items.len() {
        warn!(
            unvisited = items.len() - visited.len(),
            "Working-set spans unreachable from any root; parent cycle suspected"
        );
    }

    // Apply mutations and patch loaded spans
    let mut outcome = PropagationOutcome::default();
    for id in &order {
        let Some((total, child_stats)) = computed.get(id) else {
            continue;
        };
        let Some(item) = items.get_mut(id) else {
            continue;
        };
        if item.span.stats.as_ref() == Some(total) {
            continue;
        }
        item.span.stats = Some(total.clone());
        if !child_stats.is_empty() {
            item.span.child_stats = Some(child_stats.clone());
        }

        if item.loaded {
            let mut patch = json!({ "stats": total });
            if let Some(child_stats) = &item.span.child_stats {
                patch["_childStats"] = json!(child_stats);
            }
            match store.update_partial(tenant, id, &patch).await {
                Ok(Some(_)) => outcome.patches_applied += 1,
                Ok(None) => {
                    debug!(span = %id, "Span vanished before stats patch");
                    outcome.patches_failed += 1;
                }
                Err(e) => {
                    warn!(span = %id, error = %e, "Stats patch failed, skipping span");
                    outcome.patches_failed += 1;
                }
            }
        }
    }

    // Write final stats back onto the caller's batch
    for span in batch.iter_mut() {
        if let Some(item) = items.get(&span.id) {
            span.stats = item.span.stats.clone();
            span.child_stats = item.span.child_stats.clone();
        }
    }

    outcome.roots = roots
        .iter()
        .filter_map(|id| items.get(id).map(|item| item.span.clone()))
        .collect();
    outcome
}

/// Load referenced parents, then grandparents, until the frontier empties.
/// Parents that are missing or unreachable are skipped; a later batch that
/// reaches them repairs their stats.
async fn load_ancestors(
    store: &dyn SpanStore,
    tenant: Uuid,
    order: &mut Vec<String>,
    items: &mut HashMap<String, WorkItem>,
) {
    let mut frontier: Vec<String> = items
        .values()
        .filter_map(|item| item.span.parent.clone())
        .filter(|p| !p.is_empty() && !items.contains_key(p))
        .collect();
    let mut requested: HashSet<String> = frontier.iter().cloned().collect();

    while let Some(id) = frontier.pop() {
        if items.contains_key(&id) {
            continue;
        }
        match store
            .get_by_id(tenant, &id, Some(&STATS_PROJECTION))
            .await
        {
            Ok(Some(span)) => {
                if let Some(parent) = span.parent.clone().filter(|p| !p.is_empty()) {
                    if !items.contains_key(&parent) && requested.insert(parent.clone()) {
                        frontier.push(parent);
                    }
                }
                order.push(id.clone());
                items.insert(id, WorkItem { span, loaded: true });
            }
            Ok(None) => {
                debug!(span = %id, "Referenced parent not in store, treating subtree as root");
            }
            Err(e) => {
                debug!(span = %id, error = %e, "Ancestor load failed, skipping");
            }
        }
    }
}

/// Find store-resident children of batch spans, recursing into children the
/// working set did not already account for. A child whose subtree stats are
/// cached in its parent's `_childStats` is not expanded: the cached value is
/// authoritative and re-expanding it would double count.
async fn discover_children(
    store: &dyn SpanStore,
    tenant: Uuid,
    order: &mut Vec<String>,
    items: &mut HashMap<String, WorkItem>,
) {
    let mut wave: Vec<String> = items
        .iter()
        .filter(|(_, item)| !item.loaded)
        .map(|(id, _)| id.clone())
        .collect();
    wave.sort();

    while !wave.is_empty() {
        let mut next_wave: Vec<String> = Vec::new();
        let mut offset = 0;
        loop {
            let request = SearchRequest {
                query: QueryNode::terms("parent", wave.iter().cloned()),
                limit: CHILD_PAGE,
                offset,
                sort: Some(("id".to_owned(), SortOrder::Asc)),
                source_includes: STATS_PROJECTION.iter().map(|f| (*f).to_owned()).collect(),
                source_excludes: Vec::new(),
            };
            let page = match store.search(tenant, &request).await {
                Ok(page) => page,
                Err(e) => {
                    log_discovery_failure(&e);
                    return;
                }
            };
            let page_len = page.hits.len();
            for child in page.hits {
                if items.contains_key(&child.id) {
                    continue;
                }
                let Some(parent_id) = child.parent.clone() else {
                    continue;
                };
                let cached = items
                    .get(&parent_id)
                    .and_then(|p| p.span.child_stats.as_ref())
                    .is_some_and(|cs| cs.contains_key(&child.id));
                if cached {
                    continue;
                }
                next_wave.push(child.id.clone());
                order.push(child.id.clone());
                items.insert(
                    child.id.clone(),
                    WorkItem {
                        span: child,
                        loaded: true,
                    },
                );
            }
            offset += page_len;
            if page_len < CHILD_PAGE {
                break;
            }
        }
        wave = next_wave;
    }
}

fn log_discovery_failure(error: &StoreError) {
    warn!(error = %error, "Children discovery failed, continuing with partial working set");
}

/// Depth-first post-order stats computation. Returns the subtree total and
/// records `(total, child_stats)` for every visited span.
fn process(
    id: &str,
    items: &HashMap<String, WorkItem>,
    children_of: &HashMap<String, Vec<String>>,
    visited: &mut HashSet<String>,
    computed: &mut HashMap<String, (SpanStats, BTreeMap<String, SpanStats>)>,
) -> SpanStats {
    let Some(item) = items.get(id) else {
        return SpanStats::default();
    };
    if !visited.insert(id.to_owned()) {
        warn!(span = %id, "Cycle or duplicate during stats traversal");
        return own_stats(&item.span);
    }

    let own = own_stats(&item.span);
    let mut child_stats = item.span.child_stats.clone().unwrap_or_default();
    if let Some(child_ids) = children_of.get(id) {
        for child_id in child_ids {
            let child_total = process(child_id, items, children_of, visited, computed);
            child_stats.insert(child_id.clone(), child_total);
        }
    }

    let mut total = child_stats
        .values()
        .fold(own, |acc, child| acc.combine(child));
    // Errors usually bubble up by re-throwing: when this span failed and a
    // child already contributed an error, one of them is the same failure.
    // Applied within a single round only; counts never shrink across rounds.
    if item.span.status.is_error() && total.errors.unwrap_or(0) > 1 {
        total.errors = total.errors.map(|e| e - 1);
    }
    let child_descendants: i64 = child_stats
        .values()
        .map(|child| child.descendants.unwrap_or(0))
        .sum();
    total.descendants = Some(child_descendants + child_stats.len() as i64);

    computed.insert(id.to_owned(), (total.clone(), child_stats));
    total
}
