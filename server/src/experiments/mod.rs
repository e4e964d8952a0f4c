//! Experiment result updates.
//!
//! When an ingested trace belongs to an offline experiment, the matching
//! result rows get the root span's stats merged into their score maps and
//! the experiment summaries are recomputed. Runs after the ingest response
//! is sent; nothing here may fail the ingest.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db::{ExperimentResult, MetaStore};
use crate::model::Span;

/// Fan out experiment updates for the propagation roots, detached from the
/// request.
pub fn spawn_updates(meta: Arc<dyn MetaStore>, tenant: Uuid, roots: Vec<Span>) {
    if roots.iter().all(|r| r.experiment.is_none()) {
        return;
    }
    tokio::spawn(async move {
        update_for_roots(meta.as_ref(), tenant, &roots).await;
    });
}

/// Apply updates for every root span tagged with an experiment id.
pub async fn update_for_roots(meta: &dyn MetaStore, tenant: Uuid, roots: &[Span]) {
    for root in roots {
        let Some(raw_id) = root.experiment.as_deref() else {
            continue;
        };
        let Ok(experiment_id) = Uuid::parse_str(raw_id) else {
            debug!(experiment = %raw_id, "Span carries a non-UUID experiment id, skipping");
            continue;
        };
        if let Err(e) = update_one(meta, tenant, experiment_id, root).await {
            warn!(
                experiment = %experiment_id,
                trace = %root.trace,
                error = %e,
                "Experiment update failed"
            );
        }
    }
}

async fn update_one(
    meta: &dyn MetaStore,
    tenant: Uuid,
    experiment_id: Uuid,
    root: &Span,
) -> Result<(), crate::db::MetaError> {
    let Some(mut experiment) = meta.get_experiment(experiment_id, tenant).await? else {
        debug!(experiment = %experiment_id, "No such experiment for tenant, skipping");
        return Ok(());
    };
    let Some(stats) = &root.stats else {
        return Ok(());
    };

    let mut touched = false;
    for row in experiment
        .results
        .iter_mut()
        .filter(|row| row.trace == root.trace)
    {
        for (name, value) in stats.numeric_fields() {
            if row.scores.get(name) != Some(&value) {
                row.scores.insert(name.to_owned(), value);
                touched = true;
            }
        }
    }

    if touched {
        experiment.summaries = summarize(&experiment.results);
        meta.update_experiment(&experiment).await?;
        debug!(experiment = %experiment_id, trace = %root.trace, "Experiment results refreshed");
    }
    Ok(())
}

/// Recompute experiment summaries from its result rows: per score name the
/// count/mean/min/max across rows, plus row and error totals.
#[must_use]
pub fn summarize(results: &[ExperimentResult]) -> serde_json::Value {
    #[derive(Default)]
    struct Acc {
        count: u64,
        sum: f64,
        min: f64,
        max: f64,
    }

    let mut per_score: BTreeMap<&str, Acc> = BTreeMap::new();
    for row in results {
        for (name, value) in &row.scores {
            let acc = per_score.entry(name.as_str()).or_default();
            if acc.count == 0 {
                acc.min = *value;
                acc.max = *value;
            } else {
                acc.min = acc.min.min(*value);
                acc.max = acc.max.max(*value);
            }
            acc.count += 1;
            acc.sum += value;
        }
    }

    let scores: serde_json::Map<String, serde_json::Value> = per_score
        .into_iter()
        .map(|(name, acc)| {
            (
                name.to_owned(),
                json!({
                    "count": acc.count,
                    "mean": acc.sum / acc.count as f64,
                    "min": acc.min,
                    "max": acc.max,
                }),
            )
        })
        .collect();

    json!({
        "resultCount": results.len(),
        "errorCount": results.iter().filter_map(|r| r.errors).sum::<i64>(),
        "scores": scores,
    })
}
