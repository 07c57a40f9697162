//! Trend aggregator
//!
//! Buckets mention counts per entity over a trailing window and flags an
//! entity when its newest bucket exceeds `mean + k * std_dev` of the buckets
//! before it. Reads mentions; only ever appends analysis results.

use crate::config::TrendConfig;
use crate::model::{result_type, AnalysisResult, EntityId, NewAnalysisResult, TrendPayload};
use crate::storage::{EntityStore, StorageResult};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// The buckets tiling `[as_of - buckets * bucket_seconds, as_of)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrendWindow {
    pub as_of: DateTime<Utc>,
    pub bucket_seconds: i64,
    pub buckets: usize,
    start: DateTime<Utc>,
}

impl TrendWindow {
    /// Cover `span` with whole buckets. Needs room for at least one
    /// baseline bucket plus the tested one, and a start that is still a
    /// representable date.
    pub fn covering(as_of: DateTime<Utc>, span: Duration, bucket_seconds: i64) -> Option<Self> {
        if bucket_seconds <= 0 {
            return None;
        }
        let seconds = span.num_seconds();
        if seconds <= 0 {
            return None;
        }
        let whole = seconds.checked_add(bucket_seconds - 1)? / bucket_seconds;
        if whole < 2 {
            return None;
        }
        let length = Duration::try_seconds(whole.checked_mul(bucket_seconds)?)?;
        let start = as_of.checked_sub_signed(length)?;
        Some(Self {
            as_of,
            bucket_seconds,
            buckets: usize::try_from(whole).ok()?,
            start,
        })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Bucket index of an instant, if it falls inside the window
    pub fn bucket_of(&self, at: DateTime<Utc>) -> Option<usize> {
        if at < self.start() || at >= self.as_of {
            return None;
        }
        let offset = (at - self.start()).num_seconds() / self.bucket_seconds;
        usize::try_from(offset).ok().filter(|i| *i < self.buckets)
    }
}

/// Raw bucket counts for one entity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Timeline {
    pub entity_id: EntityId,
    pub window_start: DateTime<Utc>,
    pub as_of: DateTime<Utc>,
    pub bucket_seconds: i64,
    pub counts: Vec<u64>,
}

/// Baseline statistics for one series
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendStats {
    pub mean: f64,
    pub std_dev: f64,
    pub threshold: f64,
    pub score: f64,
    pub trending: bool,
}

/// Test the last bucket of `counts` against the ones before it.
///
/// Uses the population standard deviation. The score divides by at least 1
/// so a perfectly flat baseline does not blow up.
pub fn evaluate(counts: &[u64], k: f64) -> Option<TrendStats> {
    let (&last, baseline) = counts.split_last()?;
    if baseline.is_empty() {
        return None;
    }

    let n = baseline.len() as f64;
    let mean = baseline.iter().map(|&c| c as f64).sum::<f64>() / n;
    let variance = baseline.iter().map(|&c| (c as f64 - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();
    let threshold = mean + k * std_dev;
    let last = last as f64;

    Some(TrendStats {
        mean,
        std_dev,
        threshold,
        score: (last - mean) / std_dev.max(1.0),
        trending: last > threshold,
    })
}

pub struct TrendAggregator {
    store: Arc<dyn EntityStore>,
    config: TrendConfig,
}

impl TrendAggregator {
    pub fn new(store: Arc<dyn EntityStore>, config: TrendConfig) -> Self {
        Self { store, config }
    }

    pub fn window(&self, as_of: DateTime<Utc>, span: Duration) -> Option<TrendWindow> {
        TrendWindow::covering(as_of, span, self.config.bucket_seconds)
    }

    /// Per-entity bucket counts for every entity mentioned in the window
    pub fn series(&self, window: &TrendWindow) -> StorageResult<BTreeMap<EntityId, Vec<u64>>> {
        let mut series: BTreeMap<EntityId, Vec<u64>> = BTreeMap::new();
        for (entity_id, at) in self.store.mention_times(window.start(), window.as_of)? {
            if let Some(bucket) = window.bucket_of(at) {
                series.entry(entity_id).or_insert_with(|| vec![0; window.buckets])[bucket] += 1;
            }
        }
        Ok(series)
    }

    pub fn timeline(&self, entity_id: EntityId, window: &TrendWindow) -> StorageResult<Timeline> {
        let counts = self
            .series(window)?
            .remove(&entity_id)
            .unwrap_or_else(|| vec![0; window.buckets]);
        Ok(Timeline {
            entity_id,
            window_start: window.start(),
            as_of: window.as_of,
            bucket_seconds: window.bucket_seconds,
            counts,
        })
    }

    /// Flag trending entities and append one result for each, strongest first.
    pub fn compute(&self, window: &TrendWindow) -> StorageResult<Vec<AnalysisResult>> {
        let series = self.series(window)?;
        let mut flagged = Vec::new();

        for (entity_id, counts) in series {
            let active = counts.iter().filter(|&&c| c > 0).count();
            if active < self.config.min_active_buckets {
                continue;
            }
            let Some(stats) = evaluate(&counts, self.config.k) else {
                continue;
            };
            if !stats.trending {
                continue;
            }
            debug!(entity_id = %entity_id, score = stats.score, "entity trending");
            flagged.push((entity_id, counts, stats));
        }

        flagged.sort_by(|x, y| y.2.score.total_cmp(&x.2.score).then_with(|| x.0.cmp(&y.0)));

        let created_at = Utc::now();
        let mut results = Vec::with_capacity(flagged.len());
        for (entity_id, counts, stats) in flagged {
            let payload = TrendPayload {
                counts,
                mean: stats.mean,
                std_dev: stats.std_dev,
                k: self.config.k,
                threshold: stats.threshold,
                score: stats.score,
                bucket_seconds: window.bucket_seconds,
                window_start: window.start(),
                as_of: window.as_of,
            };
            results.push(self.store.append_analysis(&NewAnalysisResult {
                result_type: result_type::ENTITY_TREND.to_string(),
                entity_id: Some(entity_id),
                article_id: None,
                payload: serde_json::to_value(&payload)?,
                created_at,
            })?);
        }

        info!(
            as_of = %window.as_of,
            buckets = window.buckets,
            trending = results.len(),
            "trend pass complete"
        );
        Ok(results)
    }

    /// Newest trend result per entity, nothing superseded
    pub fn latest(&self, limit: usize) -> StorageResult<Vec<AnalysisResult>> {
        self.store.current_analyses(result_type::ENTITY_TREND, limit)
    }
}
