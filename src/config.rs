// src/config.rs

use crate::error::ConfigError;
use crate::types::Config;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.tracking;
        if t.iou_weight < 0.0 || t.centroid_weight < 0.0 || t.iou_weight + t.centroid_weight <= 0.0
        {
            return Err(ConfigError::InvalidWeights {
                iou: t.iou_weight,
                centroid: t.centroid_weight,
            });
        }
        in_range("tracking.min_similarity", t.min_similarity as f64, 0.0, 1.0)?;
        positive("tracking.centroid_normalizer_px", t.centroid_normalizer_px as f64)?;
        positive("tracking.max_tracks", t.max_tracks as f64)?;
        positive("tracking.min_stable_frames", t.min_stable_frames as f64)?;
        positive("tracking.max_missed_frames", t.max_missed_frames as f64)?;
        positive("tracking.max_age_seconds", t.max_age_seconds)?;
        positive("tracking.position_history_len", t.position_history_len as f64)?;
        positive("tracking.distance_history_len", t.distance_history_len as f64)?;
        positive("tracking.confidence_window", t.confidence_window as f64)?;
        if t.min_detection_area < 0.0 {
            return Err(ConfigError::NonPositive {
                field: "tracking.min_detection_area",
                value: t.min_detection_area as f64,
            });
        }

        let e = &self.estimator;
        positive("estimator.focal_length_px", e.focal_length_px as f64)?;
        positive("estimator.min_distance_m", e.min_distance_m as f64)?;
        in_range(
            "estimator.max_distance_m",
            e.max_distance_m as f64,
            e.min_distance_m as f64,
            f64::MAX,
        )?;

        let a = &self.alerts;
        positive("alerts.very_close_interval_s", a.very_close_interval_s)?;
        positive("alerts.close_interval_s", a.close_interval_s)?;
        positive("alerts.medium_interval_s", a.medium_interval_s)?;
        positive("alerts.guidance_interval_s", a.guidance_interval_s)?;
        positive("alerts.voice_queue_capacity", a.voice_queue_capacity as f64)?;
        positive("alerts.guidance_blocking_weight", a.guidance_blocking_weight as f64)?;

        if self.classes.profiles().is_empty() {
            return Err(ConfigError::NoClasses);
        }
        let mut seen = HashSet::new();
        for profile in self.classes.profiles() {
            if !seen.insert(profile.id) {
                return Err(ConfigError::DuplicateClass(profile.id));
            }
            let b = &profile.bands;
            if !(b.very_close > b.close && b.close > b.medium && b.medium > 0.0) {
                return Err(ConfigError::InvertedBands(profile.id));
            }
            in_range("classes.min_confidence", profile.min_confidence as f64, 0.0, 1.0)?;
        }

        Ok(())
    }
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::NonPositive { field, value })
    }
}

fn in_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if value >= min && value <= max {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}
