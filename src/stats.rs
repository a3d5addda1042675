//! Live stats snapshot and offline liveness simulation.
//!
//! SYSTEM CONTEXT
//! ==============
//! The snapshot is the in-memory mapping of metric name to value that the
//! dashboard renders. Live `stats_update` payloads are shallow-merged into it:
//! each top-level key in a patch replaces the previous value, every other key
//! is left alone.
//!
//! While no live feed is connected, `simulate_tick` can nudge a handful of
//! well-known metrics with small random deltas. Each nudged metric is clamped
//! to its declared range after every tick.

#[cfg(test)]
#[path = "stats_test.rs"]
mod stats_test;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

pub const TOTAL_POSTS: &str = "total_posts";
pub const TOTAL_ENGAGEMENT: &str = "total_engagement";
pub const SENTIMENT_DISTRIBUTION: &str = "sentiment_distribution";
pub const PLATFORM_BREAKDOWN: &str = "platform_breakdown";

/// Exclusive upper bound of the per-tick post count increment.
pub const POSTS_STEP_MAX: u64 = 3;
/// Exclusive upper bound of the per-tick engagement increment.
pub const ENGAGEMENT_STEP_MAX: u64 = 50;

/// Inclusive numeric range a simulated metric must stay within.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    #[must_use]
    pub fn clamp(self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    #[must_use]
    pub fn contains(self, value: f64) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

/// Random-walk parameters for one sentiment percentage.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SentimentDrift {
    /// Key inside the `sentiment_distribution` object.
    pub key: &'static str,
    /// Width of the uniform delta, centered on zero.
    pub spread: f64,
    pub bounds: Bounds,
    /// Starting point when the snapshot has no usable value.
    pub fallback: f64,
}

pub const SENTIMENT_DRIFT: [SentimentDrift; 3] = [
    SentimentDrift { key: "positive", spread: 5.0, bounds: Bounds { min: 50.0, max: 80.0 }, fallback: 65.0 },
    SentimentDrift { key: "neutral", spread: 3.0, bounds: Bounds { min: 15.0, max: 35.0 }, fallback: 25.0 },
    SentimentDrift { key: "negative", spread: 2.0, bounds: Bounds { min: 5.0, max: 20.0 }, fallback: 10.0 },
];

/// Current metric values, keyed by metric name.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatsSnapshot {
    metrics: Map<String, Value>,
}

impl StatsSnapshot {
    /// The dashboard's demo dataset, used as the starting point when
    /// simulating liveness.
    #[must_use]
    pub fn demo() -> Self {
        let value = json!({
            TOTAL_POSTS: 1247,
            TOTAL_ENGAGEMENT: 45632,
            SENTIMENT_DISTRIBUTION: { "positive": 65, "neutral": 25, "negative": 10 },
            PLATFORM_BREAKDOWN: {
                "twitter": { "posts": 523, "engagement": 18234 },
                "linkedin": { "posts": 324, "engagement": 15234 },
                "facebook": { "posts": 267, "engagement": 9876 },
                "instagram": { "posts": 133, "engagement": 2288 },
            },
        });
        match value {
            Value::Object(metrics) => Self { metrics },
            _ => Self::default(),
        }
    }

    /// Shallow-merge `patch` into the snapshot. Returns the number of keys written.
    pub fn merge(&mut self, patch: Map<String, Value>) -> usize {
        let written = patch.len();
        for (key, value) in patch {
            self.metrics.insert(key, value);
        }
        written
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.metrics.get(key)
    }

    /// Numeric value of a top-level metric.
    #[must_use]
    pub fn number(&self, key: &str) -> Option<f64> {
        self.metrics.get(key).and_then(Value::as_f64)
    }

    /// Numeric value of one entry in `sentiment_distribution`.
    #[must_use]
    pub fn sentiment(&self, key: &str) -> Option<f64> {
        self.metrics
            .get(SENTIMENT_DISTRIBUTION)
            .and_then(|dist| dist.get(key))
            .and_then(Value::as_f64)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.metrics.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

/// Apply one simulated liveness tick to `snapshot`.
pub fn simulate_tick<R: Rng + ?Sized>(snapshot: &mut StatsSnapshot, rng: &mut R) {
    let posts = counter(snapshot, TOTAL_POSTS).saturating_add(rng.random_range(0..POSTS_STEP_MAX));
    let engagement =
        counter(snapshot, TOTAL_ENGAGEMENT).saturating_add(rng.random_range(0..ENGAGEMENT_STEP_MAX));

    let mut sentiment = snapshot
        .metrics
        .get(SENTIMENT_DISTRIBUTION)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    for drift in &SENTIMENT_DRIFT {
        let current = sentiment
            .get(drift.key)
            .and_then(Value::as_f64)
            .unwrap_or(drift.fallback);
        let next = drift.bounds.clamp(current + (rng.random::<f64>() - 0.5) * drift.spread);
        sentiment.insert(drift.key.to_owned(), Value::from(next));
    }

    snapshot.metrics.insert(TOTAL_POSTS.to_owned(), Value::from(posts));
    snapshot.metrics.insert(TOTAL_ENGAGEMENT.to_owned(), Value::from(engagement));
    snapshot
        .metrics
        .insert(SENTIMENT_DISTRIBUTION.to_owned(), Value::Object(sentiment));
}

/// Non-negative integer view of a counter metric.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn counter(snapshot: &StatsSnapshot, key: &str) -> u64 {
    match snapshot.metrics.get(key) {
        Some(value) => value
            .as_u64()
            .or_else(|| value.as_f64().filter(|v| v.is_finite() && *v > 0.0).map(|v| v as u64))
            .unwrap_or(0),
        None => 0,
    }
}
