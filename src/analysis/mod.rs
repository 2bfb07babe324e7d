// src/analysis/mod.rs
//
// Per-tick tracking and alerting stages.
//
// Signal flow:
//   Detections → track_store (match/create/miss) → lifecycle (state advance)
//              → proximity (band/zone) → alert_scheduler ─┬→ AlertEvent
//                                        navigation ──────┴→ GuidanceEvent
//
// Orchestrated by pipeline::orchestrator::NavigationPipeline.

pub mod alert_scheduler;
pub mod lifecycle;
pub mod navigation;
pub mod proximity;
pub mod track_store;

pub use alert_scheduler::{AlertEvent, AlertScheduler, ScheduleOutcome};
pub use lifecycle::{StabilityStateMachine, StateTransition, TrackState, TransitionCause};
pub use navigation::{GuidanceDirection, GuidanceEvent, NavigationGuide, ZoneOccupancy};
pub use proximity::{Proximity, ProximityEstimator};
pub use track_store::{MatchReport, Track, TrackSnapshot, TrackStore, TrackingStats};
