// src/error.rs
//
// Typed failures. Nothing here is fatal to a running pipeline: rejected
// detections are counted and skipped, invariant violations are recovered
// from in release builds.

use thiserror::Error;
use tracing::error;

/// Why a detection was refused before matching
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DetectionError {
    #[error("non-finite box coordinates")]
    NonFiniteBox,

    #[error("degenerate box [{x1:.1}, {y1:.1}, {x2:.1}, {y2:.1}]")]
    DegenerateBox { x1: f32, y1: f32, x2: f32, y2: f32 },

    #[error("unknown class id {0}")]
    UnknownClass(u32),

    #[error("invalid frame dimensions {width}x{height}")]
    InvalidFrame { width: u32, height: u32 },

    #[error("invalid frame timestamp {0}")]
    InvalidTimestamp(f64),

    #[error("confidence {confidence:.2} below class {class_id} threshold {threshold:.2}")]
    LowConfidence {
        class_id: u32,
        confidence: f32,
        threshold: f32,
    },
}

impl DetectionError {
    /// Low-confidence rejections are routine filtering, everything else is malformed input
    pub fn is_malformed(&self) -> bool {
        !matches!(self, Self::LowConfidence { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("matcher weights must be non-negative with a positive sum (iou={iou}, centroid={centroid})")]
    InvalidWeights { iou: f32, centroid: f32 },

    #[error("{field} must be positive, got {value}")]
    NonPositive { field: &'static str, value: f64 },

    #[error("{field} must be within [{min}, {max}], got {value}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("class {0}: band thresholds must satisfy very_close > close > medium > 0")]
    InvertedBands(u32),

    #[error("class {0} is defined more than once")]
    DuplicateClass(u32),

    #[error("class table is empty")]
    NoClasses,
}

/// A broken internal invariant is a programming defect. Debug and test
/// builds stop immediately; release builds log and let the caller recover.
pub(crate) fn invariant_violation(message: &str) {
    if cfg!(debug_assertions) {
        panic!("invariant violated: {message}");
    }
    error!("invariant violated: {message} (recovering)");
}
