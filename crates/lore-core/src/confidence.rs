//! Confidence thresholds shared by the worker, the preview path and
//! bulk-approval tooling.
//!
//! These three numbers are a cross-cutting contract. Every call site buckets
//! through [`ConfidenceTally`] or the helpers below rather than comparing
//! against literals.

use serde::{Deserialize, Serialize};

/// At or above: auto-approvable.
pub const HIGH: f32 = 0.80;

/// Below: flagged for mandatory human review.
pub const REVIEW: f32 = 0.65;

/// Below: too unreliable to act on automatically.
pub const LOW: f32 = 0.50;

/// Clamp a model-reported confidence into `[0, 1]`. NaN maps to 0.
pub fn clamp_confidence(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Coarse band a confidence value falls in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceBucket {
    /// `>= HIGH`
    High,
    /// `[REVIEW, HIGH)`
    Medium,
    /// `[LOW, REVIEW)`
    Low,
    /// `< LOW`
    Unreliable,
}

impl ConfidenceBucket {
    pub fn of(confidence: f32) -> Self {
        let c = clamp_confidence(confidence);
        if c >= HIGH {
            Self::High
        } else if c >= REVIEW {
            Self::Medium
        } else if c >= LOW {
            Self::Low
        } else {
            Self::Unreliable
        }
    }
}

pub fn is_high(confidence: f32) -> bool {
    clamp_confidence(confidence) >= HIGH
}

pub fn needs_review(confidence: f32) -> bool {
    clamp_confidence(confidence) < REVIEW
}

/// Running confidence counts for one enrichment run or preview.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfidenceTally {
    pub high: i32,
    pub low: i32,
    pub review_required: i32,
}

impl ConfidenceTally {
    pub fn record(&mut self, confidence: f32) {
        if is_high(confidence) {
            self.high += 1;
        }
        if needs_review(confidence) {
            self.low += 1;
            self.review_required += 1;
        }
    }

    pub fn record_all<I: IntoIterator<Item = f32>>(&mut self, values: I) {
        for v in values {
            self.record(v);
        }
    }
}
