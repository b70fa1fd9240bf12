//! Aggregation over a session's metrics history

use cairn_core::{Metrics, Stage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Averages within this distance count as unchanged
const TREND_TOLERANCE: f64 = 0.01;

/// Direction of quality between the first and last recorded metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Improving,
    Declining,
    Stable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub count: usize,
    /// Per-component mean over every entry
    pub mean: Option<Metrics>,
    /// Most recent entry for each stage
    pub latest_by_stage: BTreeMap<Stage, Metrics>,
    pub lowest_average: Option<f64>,
    pub highest_average: Option<f64>,
    pub trend: Trend,
    pub first_recorded: Option<DateTime<Utc>>,
    pub last_recorded: Option<DateTime<Utc>>,
}

impl MetricsSummary {
    /// Summarize entries in any order; they are sorted by timestamp first
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = (Stage, &'a Metrics)>) -> Self {
        let mut entries: Vec<(Stage, &Metrics)> = entries.into_iter().collect();
        entries.sort_by_key(|(_, m)| m.timestamp);

        let mut latest_by_stage = BTreeMap::new();
        for (stage, metrics) in &entries {
            latest_by_stage.insert(*stage, (*metrics).clone());
        }

        let averages: Vec<f64> = entries.iter().map(|(_, m)| m.average()).collect();
        let trend = match (averages.first(), averages.last()) {
            (Some(first), Some(last)) if last - first > TREND_TOLERANCE => Trend::Improving,
            (Some(first), Some(last)) if first - last > TREND_TOLERANCE => Trend::Declining,
            _ => Trend::Stable,
        };

        Self {
            count: entries.len(),
            mean: Metrics::mean(entries.iter().map(|(_, m)| *m)),
            latest_by_stage,
            lowest_average: averages.iter().copied().reduce(f64::min),
            highest_average: averages.iter().copied().reduce(f64::max),
            trend,
            first_recorded: entries.first().map(|(_, m)| m.timestamp),
            last_recorded: entries.last().map(|(_, m)| m.timestamp),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}
