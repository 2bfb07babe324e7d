// src/lib.rs
//
// Detection tracking and spoken-alert scheduling for an assistive
// navigation camera. Feed one frame of detections per tick into
// `NavigationPipeline::tick`; pull speech from `next_utterance`.

pub mod analysis;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod types;

pub use error::{ConfigError, DetectionError};
pub use pipeline::{NavigationPipeline, PipelineMetrics, TickOutput};
pub use types::{Config, Detection, DistanceBand, PriorityTier, Zone};
