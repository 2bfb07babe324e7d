// src/pipeline/mod.rs

pub mod metrics;
pub mod orchestrator;
pub mod voice_channel;

pub use metrics::{MetricsSummary, PipelineMetrics};
pub use orchestrator::{NavigationPipeline, TickOutput};
pub use voice_channel::{MessagePriority, OfferOutcome, Utterance, VoiceChannel, VoiceMessage};
