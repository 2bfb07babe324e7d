// src/analysis/navigation.rs
//
// Aggregate directional guidance from the Stable tracks.
//
// Each Stable track adds tier_weight × band_weight to the zone it sits in.
// The user is pointed toward the least-occupied zone; when every zone is at
// or above the blocking weight there is nowhere to go and the advice is Stop.

use super::track_store::TrackStore;
use crate::types::{AlertConfig, Zone};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GuidanceDirection {
    Forward,
    TurnLeft,
    TurnRight,
    Stop,
}

impl GuidanceDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Forward => "FORWARD",
            Self::TurnLeft => "TURN_LEFT",
            Self::TurnRight => "TURN_RIGHT",
            Self::Stop => "STOP",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ZoneOccupancy {
    pub left: f32,
    pub center: f32,
    pub right: f32,
}

impl ZoneOccupancy {
    pub fn get(&self, zone: Zone) -> f32 {
        match zone {
            Zone::Left => self.left,
            Zone::Center => self.center,
            Zone::Right => self.right,
        }
    }

    fn add(&mut self, zone: Zone, weight: f32) {
        match zone {
            Zone::Left => self.left += weight,
            Zone::Center => self.center += weight,
            Zone::Right => self.right += weight,
        }
    }

    /// Ties prefer going straight, then left
    pub fn least_occupied(&self) -> Zone {
        [Zone::Center, Zone::Left, Zone::Right]
            .into_iter()
            .fold(Zone::Center, |best, z| {
                if self.get(z) < self.get(best) {
                    z
                } else {
                    best
                }
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GuidanceEvent {
    pub direction: GuidanceDirection,
    pub occupancy: ZoneOccupancy,
    pub timestamp: f64,
}

/// Priority-weighted occupancy of the Stable tracks, `None` if there are none.
pub fn zone_occupancy(store: &TrackStore) -> Option<ZoneOccupancy> {
    let mut occupancy = ZoneOccupancy::default();
    let mut any = false;
    for track in store.stable_tracks() {
        let (Some(zone), Some(band)) = (track.zone(), track.band()) else {
            continue;
        };
        occupancy.add(zone, track.tier().occupancy_weight() * band.occupancy_weight());
        any = true;
    }
    any.then_some(occupancy)
}

pub fn recommend(occupancy: &ZoneOccupancy, blocking_weight: f32) -> GuidanceDirection {
    let blocked = [Zone::Left, Zone::Center, Zone::Right]
        .iter()
        .all(|z| occupancy.get(*z) >= blocking_weight);
    if blocked {
        return GuidanceDirection::Stop;
    }
    match occupancy.least_occupied() {
        Zone::Center => GuidanceDirection::Forward,
        Zone::Left => GuidanceDirection::TurnLeft,
        Zone::Right => GuidanceDirection::TurnRight,
    }
}

/// Rate-limits guidance to one per interval
#[derive(Debug, Clone)]
pub struct NavigationGuide {
    interval_s: f64,
    blocking_weight: f32,
    last_emitted_at: Option<f64>,
}

impl NavigationGuide {
    pub fn new(config: &AlertConfig) -> Self {
        Self {
            interval_s: config.guidance_interval_s,
            blocking_weight: config.guidance_blocking_weight,
            last_emitted_at: None,
        }
    }

    pub fn is_due(&self, now: f64) -> bool {
        self.last_emitted_at
            .map_or(true, |t| now - t >= self.interval_s)
    }

    /// Guidance for this tick if one is due and there is anything to say
    pub fn propose(&self, store: &TrackStore, now: f64) -> Option<GuidanceEvent> {
        if !self.is_due(now) {
            return None;
        }
        let occupancy = zone_occupancy(store)?;
        Some(GuidanceEvent {
            direction: recommend(&occupancy, self.blocking_weight),
            occupancy,
            timestamp: now,
        })
    }

    /// Only accepted guidance restarts the interval
    pub fn mark_emitted(&mut self, now: f64) {
        self.last_emitted_at = Some(now);
    }

    pub fn reset(&mut self) {
        self.last_emitted_at = None;
    }
}
