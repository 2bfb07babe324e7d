// src/analysis/proximity.rs
//
// Box geometry → proximity band, horizontal zone and an approximate metric
// distance. Everything here is a pure function of the current box and
// frame size.
//
// The metric distance is a pinhole approximation from an assumed real-world
// width per class. It is not measured depth.

use super::track_store::TrackStore;
use crate::types::{
    bbox_area, bbox_center, bbox_width, BBox, BandThresholds, ClassProfile, DistanceBand,
    EstimatorConfig, Zone,
};
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Proximity {
    pub band: DistanceBand,
    pub zone: Zone,
    /// Box area / frame area
    pub area_ratio: f32,
    pub distance_m: Option<f32>,
}

pub fn classify_band(area_ratio: f32, bands: &BandThresholds) -> DistanceBand {
    if area_ratio >= bands.very_close {
        DistanceBand::VeryClose
    } else if area_ratio >= bands.close {
        DistanceBand::Close
    } else if area_ratio >= bands.medium {
        DistanceBand::Medium
    } else {
        DistanceBand::Far
    }
}

/// Third of the frame containing the box's horizontal center
pub fn classify_zone(center_x: f32, frame_width: u32) -> Zone {
    let third = frame_width as f32 / 3.0;
    if center_x < third {
        Zone::Left
    } else if center_x < 2.0 * third {
        Zone::Center
    } else {
        Zone::Right
    }
}

/// real_width · focal / pixel_width, clamped to the configured range
pub fn metric_distance(real_width_m: f32, box_width_px: f32, config: &EstimatorConfig) -> Option<f32> {
    if box_width_px <= 0.0 || real_width_m <= 0.0 {
        return None;
    }
    let d = real_width_m * config.focal_length_px / box_width_px;
    Some(d.clamp(config.min_distance_m, config.max_distance_m))
}

pub fn estimate(
    bbox: &BBox,
    frame_size: (u32, u32),
    profile: &ClassProfile,
    config: &EstimatorConfig,
) -> Proximity {
    let frame_area = frame_size.0 as f32 * frame_size.1 as f32;
    let area_ratio = if frame_area > 0.0 {
        bbox_area(bbox) / frame_area
    } else {
        0.0
    };
    let (cx, _) = bbox_center(bbox);
    Proximity {
        band: classify_band(area_ratio, &profile.bands),
        zone: classify_zone(cx, frame_size.0),
        area_ratio,
        distance_m: profile
            .real_width_m
            .and_then(|w| metric_distance(w, bbox_width(bbox), config)),
    }
}

pub struct ProximityEstimator {
    config: EstimatorConfig,
}

impl ProximityEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        Self { config }
    }

    /// Annotate every live track with this tick's band and zone.
    pub fn annotate(&self, store: &mut TrackStore) {
        let profiles: Vec<Option<ClassProfile>> = store
            .tracks()
            .iter()
            .map(|t| store.catalog().get(t.class_id()).cloned())
            .collect();

        for (track, profile) in store.tracks_mut().iter_mut().zip(profiles) {
            // Validation guarantees a profile for every tracked class
            let Some(profile) = profile else { continue };
            let p = estimate(track.bbox(), track.frame_size(), &profile, &self.config);
            if track.band() != Some(p.band) {
                debug!(
                    "Track T{} band {} → {} (ratio={:.3})",
                    track.id(),
                    track.band().map(|b| b.as_str()).unwrap_or("-"),
                    p.band.as_str(),
                    p.area_ratio
                );
            }
            track.annotate(p.band, p.zone, p.distance_m);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClassCatalog, Detection, TrackingConfig};

    fn profile(class_id: u32) -> ClassProfile {
        ClassCatalog::default()
            .get(class_id)
            .cloned()
            .expect("class in default catalog")
    }

    #[test]
    fn test_band_thresholds_inclusive() {
        let person = profile(0).bands;
        assert_eq!(classify_band(0.15, &person), DistanceBand::VeryClose);
        assert_eq!(classify_band(0.149, &person), DistanceBand::Close);
        assert_eq!(classify_band(0.08, &person), DistanceBand::Close);
        assert_eq!(classify_band(0.05, &person), DistanceBand::Medium);
        assert_eq!(classify_band(0.01, &person), DistanceBand::Far);
    }

    #[test]
    fn test_large_classes_need_bigger_boxes() {
        // Same 20% box: very close for a bicycle, only medium for a bus
        assert_eq!(classify_band(0.20, &profile(1).bands), DistanceBand::VeryClose);
        assert_eq!(classify_band(0.20, &profile(5).bands), DistanceBand::Medium);
    }

    #[test]
    fn test_uncalibrated_classes_use_default_bands() {
        for class_id in [4, 6, 8, 17, 19, 20, 21, 22, 23] {
            let bands = profile(class_id).bands;
            assert_eq!(classify_band(0.13, &bands), DistanceBand::VeryClose, "class {class_id}");
            assert_eq!(classify_band(0.07, &bands), DistanceBand::Close, "class {class_id}");
            assert_eq!(classify_band(0.04, &bands), DistanceBand::Medium, "class {class_id}");
        }
    }

    #[test]
    fn test_zone_thirds() {
        assert_eq!(classify_zone(0.0, 600), Zone::Left);
        assert_eq!(classify_zone(199.9, 600), Zone::Left);
        assert_eq!(classify_zone(200.0, 600), Zone::Center);
        assert_eq!(classify_zone(399.0, 600), Zone::Center);
        assert_eq!(classify_zone(400.0, 600), Zone::Right);
        assert_eq!(classify_zone(650.0, 600), Zone::Right);
    }

    #[test]
    fn test_metric_distance_clamped() {
        let cfg = EstimatorConfig::default();
        // 0.5m * 500px / 50px = 5m
        assert_eq!(metric_distance(0.5, 50.0, &cfg), Some(5.0));
        assert_eq!(metric_distance(0.5, 1.0, &cfg), Some(50.0));
        assert_eq!(metric_distance(1.8, 2000.0, &cfg), Some(1.0));
        assert_eq!(metric_distance(0.5, 0.0, &cfg), None);
    }

    #[test]
    fn test_estimate_without_real_width() {
        let cfg = EstimatorConfig::default();
        let p = estimate(&[0.0, 0.0, 100.0, 100.0], (640, 480), &profile(4), &cfg);
        assert_eq!(p.distance_m, None);
        assert_eq!(p.zone, Zone::Left);
    }

    #[test]
    fn test_annotate_tracks_previous_band() {
        let mut store = TrackStore::new(TrackingConfig::default(), ClassCatalog::default());
        let estimator = ProximityEstimator::new(EstimatorConfig::default());
        let frame = |bbox: BBox, t: f64| Detection {
            class_id: 0,
            confidence: 0.9,
            bbox,
            frame_width: 640,
            frame_height: 480,
            frame_timestamp: t,
        };

        // 100x200 = 20000 / 307200 ≈ 0.065 → Medium
        store.update(&[frame([270.0, 100.0, 370.0, 300.0], 0.0)], 0.0);
        estimator.annotate(&mut store);
        let t = &store.tracks()[0];
        assert_eq!(t.band(), Some(DistanceBand::Medium));
        assert_eq!(t.previous_band(), None);
        assert_eq!(t.zone(), Some(Zone::Center));
        assert_eq!(t.distance_m(), Some(2.5));

        // 220x240 = 52800 / 307200 ≈ 0.17 → VeryClose
        store.update(&[frame([210.0, 60.0, 430.0, 300.0], 0.1)], 0.1);
        estimator.annotate(&mut store);
        let t = &store.tracks()[0];
        assert_eq!(t.band(), Some(DistanceBand::VeryClose));
        assert_eq!(t.previous_band(), Some(DistanceBand::Medium));
    }
}
