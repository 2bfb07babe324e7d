// src/analysis/lifecycle.rs
//
// Track lifecycle: Provisional → Stable → Lost → Expired.
//
// Transitions are pure functions of a track's match/miss counters, its last
// match time and the tick timestamp. Nothing here schedules callbacks; the
// pipeline calls advance() exactly once per tick, after matching.
//
//   Provisional ──(≥ min_stable_frames matches)──→ Stable
//   Provisional ──(≥ max_missed_frames misses)───→ Expired
//   Stable ──────(first miss)────────────────────→ Lost
//   Lost ────────(next match)────────────────────→ Stable
//   Lost ────────(≥ max_missed or ≥ max_age s)───→ Expired
//
// Lost → Stable does not re-accumulate the confirmation threshold: a track
// occluded for a few frames comes back announced-eligible immediately.

use super::track_store::{Track, TrackStore};
use crate::error::invariant_violation;
use crate::types::TrackingConfig;
use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackState {
    Provisional,
    Stable,
    Lost,
    Expired,
}

impl TrackState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provisional => "PROVISIONAL",
            Self::Stable => "STABLE",
            Self::Lost => "LOST",
            Self::Expired => "EXPIRED",
        }
    }

    /// The only edges the lifecycle may take
    pub fn can_transition_to(&self, next: TrackState) -> bool {
        matches!(
            (self, next),
            (Self::Provisional, Self::Stable)
                | (Self::Provisional, Self::Expired)
                | (Self::Stable, Self::Lost)
                | (Self::Lost, Self::Stable)
                | (Self::Lost, Self::Expired)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionCause {
    /// Reached the consecutive-match threshold
    Confirmed,
    /// Missed a frame while stable
    Missed,
    /// Matched again after an occlusion
    Recovered,
    MissLimit,
    AgeLimit,
    /// Removed to make room for a higher-priority detection
    Evicted,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StateTransition {
    pub track_id: u64,
    pub from: TrackState,
    pub to: TrackState,
    pub cause: TransitionCause,
    pub timestamp: f64,
}

#[derive(Debug, Clone)]
pub struct StabilityStateMachine {
    min_stable_frames: u32,
    max_missed_frames: u32,
    max_age_seconds: f64,
}

impl StabilityStateMachine {
    pub fn new(config: &TrackingConfig) -> Self {
        Self {
            min_stable_frames: config.min_stable_frames,
            max_missed_frames: config.max_missed_frames,
            max_age_seconds: config.max_age_seconds,
        }
    }

    /// Next state for a track, if it should move this tick
    pub fn evaluate(&self, track: &Track, now: f64) -> Option<(TrackState, TransitionCause)> {
        let matches = track.consecutive_match_count();
        let misses = track.consecutive_miss_count();

        match track.state() {
            TrackState::Provisional => {
                if matches >= self.min_stable_frames {
                    Some((TrackState::Stable, TransitionCause::Confirmed))
                } else if misses >= self.max_missed_frames {
                    Some((TrackState::Expired, TransitionCause::MissLimit))
                } else {
                    None
                }
            }
            TrackState::Stable => {
                if misses >= 1 {
                    Some((TrackState::Lost, TransitionCause::Missed))
                } else {
                    None
                }
            }
            TrackState::Lost => {
                if misses == 0 && matches >= 1 {
                    Some((TrackState::Stable, TransitionCause::Recovered))
                } else if misses >= self.max_missed_frames {
                    Some((TrackState::Expired, TransitionCause::MissLimit))
                } else if now - track.last_matched_at() >= self.max_age_seconds {
                    Some((TrackState::Expired, TransitionCause::AgeLimit))
                } else {
                    None
                }
            }
            TrackState::Expired => None,
        }
    }

    /// Apply one tick of transitions and drop every track that expired.
    pub fn advance(&self, store: &mut TrackStore, now: f64) -> Vec<StateTransition> {
        let mut transitions = Vec::new();

        for track in store.tracks_mut() {
            let Some((next, cause)) = self.evaluate(track, now) else {
                continue;
            };
            let from = track.state();
            if !from.can_transition_to(next) {
                invariant_violation(&format!(
                    "track {} attempted {} → {}",
                    track.id(),
                    from.as_str(),
                    next.as_str()
                ));
                continue;
            }
            track.set_state(next);

            match next {
                TrackState::Stable if cause == TransitionCause::Confirmed => info!(
                    "✅ Track T{} stable (class={}, {} consecutive matches)",
                    track.id(),
                    track.class_id(),
                    track.consecutive_match_count()
                ),
                TrackState::Expired => info!(
                    "🗑️  Track T{} expired ({:?}, {} misses, {:.1}s since match)",
                    track.id(),
                    cause,
                    track.consecutive_miss_count(),
                    now - track.last_matched_at()
                ),
                _ => debug!(
                    "Track T{} {} → {} ({:?})",
                    track.id(),
                    from.as_str(),
                    next.as_str(),
                    cause
                ),
            }

            transitions.push(StateTransition {
                track_id: track.id(),
                from,
                to: next,
                cause,
                timestamp: now,
            });
        }

        store.remove_expired();
        transitions
    }
}
