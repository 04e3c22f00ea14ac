// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Rolling performance statistics for one (model or strategy, task
/// type) pair. All averages are incremental means updated as
/// `new = (old*(n-1) + x)/n`; they are never recomputed from history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub avg_score: f64,
    pub avg_latency: f64,
    pub success_rate: f64,
    pub sample_count: u64,
    /// Samples that actually carried a quality score; keeps
    /// `avg_score` a true mean when scores are only sometimes known.
    pub score_samples: u64,
    pub last_used: DateTime<Utc>,
}

impl Default for PerformanceRecord {
    fn default() -> Self {
        Self {
            avg_score: 0.0,
            avg_latency: 0.0,
            success_rate: 0.0,
            sample_count: 0,
            score_samples: 0,
            last_used: Utc::now(),
        }
    }
}

impl PerformanceRecord {
    pub fn record(&mut self, success: bool, latency_secs: f64, score: Option<f64>) {
        self.sample_count += 1;
        let n = self.sample_count as f64;
        let observed = if success { 1.0 } else { 0.0 };
        self.success_rate = (self.success_rate * (n - 1.0) + observed) / n;
        self.avg_latency = (self.avg_latency * (n - 1.0) + latency_secs) / n;

        if let Some(score) = score {
            self.score_samples += 1;
            let m = self.score_samples as f64;
            self.avg_score = (self.avg_score * (m - 1.0) + score) / m;
        }
        self.last_used = Utc::now();
    }

    /// Blend used everywhere a "best performer" is picked:
    /// 0.4 success rate + 0.4 quality + 0.2 inverse latency.
    pub fn weighted_score(&self) -> f64 {
        self.success_rate * 0.4 + self.avg_score * 0.4 + (1.0 / (1.0 + self.avg_latency)) * 0.2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streaming_mean_matches_batch_average() {
        let latencies = [0.5, 1.5, 2.0, 0.25, 3.0, 1.0, 0.75];
        let scores = [4.0, 3.5, 2.0, 5.0, 1.5, 4.5, 3.0];
        let successes = [true, true, false, true, false, true, true];

        let mut record = PerformanceRecord::default();
        for i in 0..latencies.len() {
            record.record(successes[i], latencies[i], Some(scores[i]));
        }

        let n = latencies.len() as f64;
        let batch_latency: f64 = latencies.iter().sum::<f64>() / n;
        let batch_score: f64 = scores.iter().sum::<f64>() / n;
        let batch_success: f64 =
            successes.iter().filter(|s| **s).count() as f64 / n;

        assert!((record.avg_latency - batch_latency).abs() < 1e-9);
        assert!((record.avg_score - batch_score).abs() < 1e-9);
        assert!((record.success_rate - batch_success).abs() < 1e-9);
        assert_eq!(record.sample_count, latencies.len() as u64);
    }

    #[test]
    fn test_score_mean_ignores_unscored_samples() {
        let mut record = PerformanceRecord::default();
        record.record(true, 1.0, Some(4.0));
        record.record(true, 1.0, None);
        record.record(false, 1.0, Some(2.0));

        assert_eq!(record.sample_count, 3);
        assert_eq!(record.score_samples, 2);
        assert!((record.avg_score - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_score_prefers_fast_reliable_records() {
        let mut good = PerformanceRecord::default();
        let mut bad = PerformanceRecord::default();
        for _ in 0..10 {
            good.record(true, 0.5, Some(4.5));
            bad.record(false, 20.0, Some(2.0));
        }
        assert!(good.weighted_score() > bad.weighted_score());
    }
}
