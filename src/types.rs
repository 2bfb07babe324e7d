// src/types.rs

use serde::{Deserialize, Serialize};

/// Bounding box in pixels: [x1, y1, x2, y2]
pub type BBox = [f32; 4];

pub fn bbox_width(b: &BBox) -> f32 {
    (b[2] - b[0]).max(0.0)
}

pub fn bbox_height(b: &BBox) -> f32 {
    (b[3] - b[1]).max(0.0)
}

pub fn bbox_area(b: &BBox) -> f32 {
    bbox_width(b) * bbox_height(b)
}

pub fn bbox_center(b: &BBox) -> (f32, f32) {
    ((b[0] + b[2]) * 0.5, (b[1] + b[3]) * 0.5)
}

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tracking: TrackingConfig,
    pub estimator: EstimatorConfig,
    pub alerts: AlertConfig,
    pub classes: ClassCatalog,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Weight of IoU in the match score
    pub iou_weight: f32,
    /// Weight of (1 - normalized centroid distance) in the match score
    pub centroid_weight: f32,
    /// Pairs scoring below this are never matched
    pub min_similarity: f32,
    /// Centroid distance (px) at which the centroid term reaches zero
    pub centroid_normalizer_px: f32,
    /// Unmatched detections smaller than this (px²) never spawn a track
    pub min_detection_area: f32,
    pub max_tracks: usize,
    /// Consecutive matches required for Provisional → Stable
    pub min_stable_frames: u32,
    pub max_missed_frames: u32,
    /// Seconds since last match before a Lost track expires
    pub max_age_seconds: f64,
    pub position_history_len: usize,
    pub distance_history_len: usize,
    pub confidence_window: usize,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            iou_weight: 0.7,
            centroid_weight: 0.3,
            min_similarity: 0.3,
            centroid_normalizer_px: 100.0,
            min_detection_area: 500.0,
            max_tracks: 20,
            min_stable_frames: 3,
            max_missed_frames: 10,
            max_age_seconds: 5.0,
            position_history_len: 10,
            distance_history_len: 5,
            confidence_window: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Pinhole focal length in pixels, calibrated for the 640px camera
    pub focal_length_px: f32,
    pub min_distance_m: f32,
    pub max_distance_m: f32,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            focal_length_px: 500.0,
            min_distance_m: 1.0,
            max_distance_m: 50.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub very_close_interval_s: f64,
    pub close_interval_s: f64,
    pub medium_interval_s: f64,
    pub guidance_interval_s: f64,
    pub voice_queue_capacity: usize,
    /// Zone occupancy at which a zone counts as blocked for guidance
    pub guidance_blocking_weight: f32,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            very_close_interval_s: 5.0,
            close_interval_s: 10.0,
            medium_interval_s: 20.0,
            guidance_interval_s: 10.0,
            voice_queue_capacity: 10,
            guidance_blocking_weight: 8.0,
        }
    }
}

impl AlertConfig {
    /// Minimum seconds between two alerts for a track in `band`.
    /// Far tracks are never announced.
    pub fn interval_for(&self, band: DistanceBand) -> Option<f64> {
        match band {
            DistanceBand::VeryClose => Some(self.very_close_interval_s),
            DistanceBand::Close => Some(self.close_interval_s),
            DistanceBand::Medium => Some(self.medium_interval_s),
            DistanceBand::Far => None,
        }
    }
}

// ============================================================================
// CLASSES
// ============================================================================

/// Alert priority tier. Declaration order is priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityTier {
    Person,
    Vehicle,
    TwoWheeler,
    TrafficElement,
    Animal,
    Obstacle,
}

impl PriorityTier {
    /// Contribution of one object of this tier to zone occupancy
    pub fn occupancy_weight(&self) -> f32 {
        match self {
            Self::Person => 5.0,
            Self::Vehicle => 4.0,
            Self::TwoWheeler => 3.0,
            Self::TrafficElement => 2.0,
            Self::Animal => 1.5,
            Self::Obstacle => 1.0,
        }
    }
}

/// Area-ratio thresholds (box area / frame area) for each band
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandThresholds {
    pub very_close: f32,
    pub close: f32,
    pub medium: f32,
}

impl BandThresholds {
    pub const fn new(very_close: f32, close: f32, medium: f32) -> Self {
        Self {
            very_close,
            close,
            medium,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassProfile {
    pub id: u32,
    pub name: String,
    pub tier: PriorityTier,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    pub bands: BandThresholds,
    /// Assumed physical width used for the metric distance approximation
    #[serde(default)]
    pub real_width_m: Option<f32>,
}

fn default_min_confidence() -> f32 {
    0.5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassCatalog {
    profiles: Vec<ClassProfile>,
}

impl ClassCatalog {
    pub fn new(profiles: Vec<ClassProfile>) -> Self {
        Self { profiles }
    }

    pub fn get(&self, class_id: u32) -> Option<&ClassProfile> {
        self.profiles.iter().find(|p| p.id == class_id)
    }

    pub fn profiles(&self) -> &[ClassProfile] {
        &self.profiles
    }

    /// COCO classes an assistive camera cares about
    pub fn coco() -> Self {
        use PriorityTier::*;

        const PERSON: BandThresholds = BandThresholds::new(0.15, 0.08, 0.04);
        const CAR: BandThresholds = BandThresholds::new(0.25, 0.15, 0.08);
        const LARGE: BandThresholds = BandThresholds::new(0.35, 0.25, 0.15);
        // Everything without its own calibration
        const SMALL: BandThresholds = BandThresholds::new(0.12, 0.06, 0.03);

        let table: &[(u32, &str, PriorityTier, BandThresholds, Option<f32>)] = &[
            (0, "person", Person, PERSON, Some(0.5)),
            (1, "bicycle", TwoWheeler, SMALL, Some(0.6)),
            (2, "car", Vehicle, CAR, Some(1.8)),
            (3, "motorcycle", TwoWheeler, SMALL, Some(0.8)),
            (4, "airplane", Vehicle, SMALL, None),
            (5, "bus", Vehicle, LARGE, Some(2.5)),
            (6, "train", Vehicle, SMALL, Some(3.0)),
            (7, "truck", Vehicle, LARGE, Some(2.5)),
            (8, "boat", Vehicle, SMALL, None),
            (9, "traffic_light", TrafficElement, SMALL, Some(0.3)),
            (10, "fire_hydrant", TrafficElement, SMALL, Some(0.3)),
            (11, "stop_sign", TrafficElement, SMALL, Some(0.75)),
            (12, "parking_meter", TrafficElement, SMALL, Some(0.3)),
            (13, "bench", TrafficElement, SMALL, Some(1.5)),
            (15, "cat", Animal, SMALL, Some(0.3)),
            (16, "dog", Animal, SMALL, Some(0.4)),
            (17, "horse", Animal, SMALL, Some(0.6)),
            (18, "sheep", Animal, SMALL, Some(0.5)),
            (19, "cow", Animal, SMALL, Some(0.7)),
            (20, "elephant", Animal, SMALL, None),
            (21, "bear", Animal, SMALL, None),
            (22, "zebra", Animal, SMALL, None),
            (23, "giraffe", Animal, SMALL, None),
            (32, "sports_ball", Obstacle, SMALL, Some(0.22)),
            (37, "skateboard", Obstacle, SMALL, Some(0.8)),
            (38, "surfboard", Obstacle, SMALL, None),
            (39, "tennis_racket", Obstacle, SMALL, None),
            (56, "chair", Obstacle, SMALL, Some(0.5)),
            (57, "couch", Obstacle, SMALL, Some(2.0)),
            (58, "potted_plant", Obstacle, SMALL, Some(0.4)),
            (59, "bed", Obstacle, SMALL, Some(1.6)),
            (60, "dining_table", Obstacle, SMALL, Some(1.2)),
            (61, "toilet", Obstacle, SMALL, Some(0.4)),
            (62, "tv", Obstacle, SMALL, Some(1.0)),
        ];

        Self::new(
            table
                .iter()
                .map(|&(id, name, tier, bands, real_width_m)| ClassProfile {
                    id,
                    name: name.to_string(),
                    tier,
                    min_confidence: default_min_confidence(),
                    bands,
                    real_width_m,
                })
                .collect(),
        )
    }
}

impl Default for ClassCatalog {
    fn default() -> Self {
        Self::coco()
    }
}

// ============================================================================
// PROXIMITY
// ============================================================================

/// Coarse proximity band. Declaration order is closest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceBand {
    VeryClose,
    Close,
    Medium,
    Far,
}

impl DistanceBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VeryClose => "VERY_CLOSE",
            Self::Close => "CLOSE",
            Self::Medium => "MEDIUM",
            Self::Far => "FAR",
        }
    }

    pub fn occupancy_weight(&self) -> f32 {
        match self {
            Self::VeryClose => 4.0,
            Self::Close => 3.0,
            Self::Medium => 2.0,
            Self::Far => 1.0,
        }
    }
}

/// Horizontal third of the frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Zone {
    Left,
    Center,
    Right,
}

impl Zone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left => "LEFT",
            Self::Center => "CENTER",
            Self::Right => "RIGHT",
        }
    }
}

// ============================================================================
// DETECTION INPUT
// ============================================================================

/// One detector output for one frame. Never outlives a matching cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: u32,
    pub confidence: f32,
    pub bbox: BBox,
    pub frame_width: u32,
    pub frame_height: u32,
    pub frame_timestamp: f64,
}

impl Detection {
    pub fn center(&self) -> (f32, f32) {
        bbox_center(&self.bbox)
    }

    pub fn area(&self) -> f32 {
        bbox_area(&self.bbox)
    }
}
