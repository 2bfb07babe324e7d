// src/analysis/track_store.rs
//
// Owns every live track and associates each frame's detections with them.
//
// Matching:
//   - Same-class pairs only; a track's class never changes after creation
//   - score = iou_weight·IoU + centroid_weight·(1 − min(dist / normalizer, 1))
//   - Pairs below min_similarity are never considered
//   - Greedy: best score first, ties → higher IoU → lower track id → earlier detection
//
// Capacity:
//   - At max_tracks, a new detection is only admitted by evicting a
//     non-Stable track of a lower tier (or a Lost track of the same tier).
//     Stable tracks are never evicted. No victim → the detection waits for
//     the next frame.

use super::lifecycle::{StateTransition, TrackState, TransitionCause};
use crate::error::{invariant_violation, DetectionError};
use crate::types::{
    bbox_center, bbox_height, bbox_width, BBox, ClassCatalog, ClassProfile, Detection,
    DistanceBand, PriorityTier, TrackingConfig, Zone,
};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{HashSet, VecDeque};
use tracing::{debug, info, warn};

// ============================================================================
// TRACK
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PositionSample {
    pub center: (f32, f32),
    pub width: f32,
    pub height: f32,
    pub timestamp: f64,
}

#[derive(Debug, Clone, Copy)]
struct HistoryLimits {
    positions: usize,
    distances: usize,
    confidences: usize,
}

impl HistoryLimits {
    fn from_config(config: &TrackingConfig) -> Self {
        Self {
            positions: config.position_history_len,
            distances: config.distance_history_len,
            confidences: config.confidence_window,
        }
    }
}

fn push_bounded<T>(buf: &mut VecDeque<T>, value: T, cap: usize) {
    buf.push_back(value);
    while buf.len() > cap {
        buf.pop_front();
    }
}

/// One physical object followed across frames
#[derive(Debug, Clone)]
pub struct Track {
    id: u64,
    class_id: u32,
    tier: PriorityTier,
    bbox: BBox,
    frame_size: (u32, u32),
    position_history: VecDeque<PositionSample>,
    distance_history: VecDeque<f32>,
    confidences: VecDeque<f32>,
    consecutive_match_count: u32,
    consecutive_miss_count: u32,
    state: TrackState,
    created_at: f64,
    last_matched_at: f64,
    last_alert_at: Option<f64>,
    last_emergency_at: Option<f64>,
    alert_count: u32,
    zone: Option<Zone>,
    band: Option<DistanceBand>,
    previous_band: Option<DistanceBand>,
    matched_this_tick: bool,
    limits: HistoryLimits,
}

impl Track {
    fn new(id: u64, det: &Detection, tier: PriorityTier, now: f64, limits: HistoryLimits) -> Self {
        let mut track = Self {
            id,
            class_id: det.class_id,
            tier,
            bbox: det.bbox,
            frame_size: (det.frame_width, det.frame_height),
            position_history: VecDeque::with_capacity(limits.positions),
            distance_history: VecDeque::with_capacity(limits.distances),
            confidences: VecDeque::with_capacity(limits.confidences),
            // The creating detection is the first match
            consecutive_match_count: 1,
            consecutive_miss_count: 0,
            state: TrackState::Provisional,
            created_at: now,
            last_matched_at: now,
            last_alert_at: None,
            last_emergency_at: None,
            alert_count: 0,
            zone: None,
            band: None,
            previous_band: None,
            matched_this_tick: true,
            limits,
        };
        track.record_observation(det, now);
        track
    }

    pub fn id(&self) -> u64 {
        self.id
    }
    pub fn class_id(&self) -> u32 {
        self.class_id
    }
    pub fn tier(&self) -> PriorityTier {
        self.tier
    }
    pub fn bbox(&self) -> &BBox {
        &self.bbox
    }
    pub fn frame_size(&self) -> (u32, u32) {
        self.frame_size
    }
    pub fn state(&self) -> TrackState {
        self.state
    }
    pub fn consecutive_match_count(&self) -> u32 {
        self.consecutive_match_count
    }
    pub fn consecutive_miss_count(&self) -> u32 {
        self.consecutive_miss_count
    }
    pub fn created_at(&self) -> f64 {
        self.created_at
    }
    pub fn last_matched_at(&self) -> f64 {
        self.last_matched_at
    }
    pub fn last_alert_at(&self) -> Option<f64> {
        self.last_alert_at
    }
    pub fn last_emergency_at(&self) -> Option<f64> {
        self.last_emergency_at
    }
    pub fn alert_count(&self) -> u32 {
        self.alert_count
    }
    pub fn zone(&self) -> Option<Zone> {
        self.zone
    }
    pub fn band(&self) -> Option<DistanceBand> {
        self.band
    }
    /// Band before the most recent annotation, `None` until annotated twice
    pub fn previous_band(&self) -> Option<DistanceBand> {
        self.previous_band
    }
    pub fn matched_this_tick(&self) -> bool {
        self.matched_this_tick
    }
    pub fn position_history(&self) -> &VecDeque<PositionSample> {
        &self.position_history
    }
    pub fn distance_history(&self) -> &VecDeque<f32> {
        &self.distance_history
    }

    pub fn is_stable(&self) -> bool {
        self.state == TrackState::Stable
    }

    /// Smoothed metric distance: mean of the recent estimates
    pub fn distance_m(&self) -> Option<f32> {
        if self.distance_history.is_empty() {
            return None;
        }
        Some(self.distance_history.iter().sum::<f32>() / self.distance_history.len() as f32)
    }

    pub fn average_confidence(&self) -> f32 {
        if self.confidences.is_empty() {
            return 0.0;
        }
        self.confidences.iter().sum::<f32>() / self.confidences.len() as f32
    }

    pub fn age(&self, now: f64) -> f64 {
        (now - self.created_at).max(0.0)
    }

    fn record_observation(&mut self, det: &Detection, now: f64) {
        self.bbox = det.bbox;
        self.frame_size = (det.frame_width, det.frame_height);
        push_bounded(
            &mut self.position_history,
            PositionSample {
                center: bbox_center(&det.bbox),
                width: bbox_width(&det.bbox),
                height: bbox_height(&det.bbox),
                timestamp: now,
            },
            self.limits.positions,
        );
        push_bounded(&mut self.confidences, det.confidence, self.limits.confidences);
    }

    fn update_with_detection(&mut self, det: &Detection, now: f64) {
        self.record_observation(det, now);
        self.consecutive_match_count += 1;
        self.consecutive_miss_count = 0;
        self.last_matched_at = now;
        self.matched_this_tick = true;
    }

    fn mark_missed(&mut self) {
        self.consecutive_miss_count += 1;
        self.consecutive_match_count = 0;
        self.matched_this_tick = false;
    }

    pub(crate) fn set_state(&mut self, state: TrackState) {
        self.state = state;
    }

    /// Store this tick's proximity annotation. Only a fresh observation
    /// extends the distance history.
    pub(crate) fn annotate(&mut self, band: DistanceBand, zone: Zone, distance_m: Option<f32>) {
        self.previous_band = self.band;
        self.band = Some(band);
        self.zone = Some(zone);
        if self.matched_this_tick {
            if let Some(d) = distance_m {
                push_bounded(&mut self.distance_history, d, self.limits.distances);
            }
        }
    }

    fn is_corrupt(&self, now: f64) -> Option<String> {
        if self.bbox.iter().any(|v| !v.is_finite()) {
            return Some(format!("track {} has a non-finite box", self.id));
        }
        if !self.created_at.is_finite() || self.created_at < 0.0 || self.created_at > now {
            return Some(format!(
                "track {} created_at {} outside [0, {}]",
                self.id, self.created_at, now
            ));
        }
        if !self.last_matched_at.is_finite() || self.last_matched_at > now {
            return Some(format!(
                "track {} last_matched_at {} is after tick {}",
                self.id, self.last_matched_at, now
            ));
        }
        for (name, stamp) in [
            ("last_alert_at", self.last_alert_at),
            ("last_emergency_at", self.last_emergency_at),
        ] {
            if let Some(t) = stamp {
                if !t.is_finite() || t > now {
                    return Some(format!("track {} {} {} is after tick {}", self.id, name, t, now));
                }
            }
        }
        None
    }
}

// ============================================================================
// OUTPUT TYPES
// ============================================================================

/// Read-only view of one live track for display and logging
#[derive(Debug, Clone, Serialize)]
pub struct TrackSnapshot {
    pub track_id: u64,
    pub class_id: u32,
    pub bbox: BBox,
    pub state: TrackState,
    pub age_s: f64,
    pub zone: Option<Zone>,
    pub distance_band: Option<DistanceBand>,
    pub estimated_distance_m: Option<f32>,
    pub average_confidence: f32,
    pub consecutive_matches: u32,
    pub alert_count: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrackingStats {
    pub total: usize,
    pub stable: usize,
    pub lost: usize,
    pub provisional: usize,
    pub next_id: u64,
}

/// What one update did with the frame's detections
#[derive(Debug, Clone, Default)]
pub struct MatchReport {
    pub received: usize,
    pub rejected: Vec<DetectionError>,
    pub matched: usize,
    pub created: Vec<u64>,
    pub undersized: usize,
    pub capacity_dropped: usize,
    pub evictions: Vec<StateTransition>,
}

impl MatchReport {
    pub fn malformed(&self) -> usize {
        self.rejected.iter().filter(|e| e.is_malformed()).count()
    }

    pub fn low_confidence(&self) -> usize {
        self.rejected.len() - self.malformed()
    }
}

// ============================================================================
// IoU
// ============================================================================

pub fn iou(a: &BBox, b: &BBox) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    if inter <= 0.0 {
        return 0.0;
    }

    let area_a = bbox_width(a) * bbox_height(a);
    let area_b = bbox_width(b) * bbox_height(b);
    let union = area_a + area_b - inter;

    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

struct Candidate {
    ti: usize,
    di: usize,
    score: f32,
    iou: f32,
    track_id: u64,
}

// ============================================================================
// STORE
// ============================================================================

pub struct TrackStore {
    config: TrackingConfig,
    catalog: ClassCatalog,
    tracks: Vec<Track>,
    next_id: u64,
}

impl TrackStore {
    pub fn new(config: TrackingConfig, catalog: ClassCatalog) -> Self {
        Self {
            tracks: Vec::with_capacity(config.max_tracks),
            config,
            catalog,
            next_id: 1,
        }
    }

    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    pub fn catalog(&self) -> &ClassCatalog {
        &self.catalog
    }

    /// Reject anything the matcher must never see
    pub fn validate(&self, det: &Detection) -> Result<&ClassProfile, DetectionError> {
        if det.frame_width == 0 || det.frame_height == 0 {
            return Err(DetectionError::InvalidFrame {
                width: det.frame_width,
                height: det.frame_height,
            });
        }
        if !det.frame_timestamp.is_finite() || det.frame_timestamp < 0.0 {
            return Err(DetectionError::InvalidTimestamp(det.frame_timestamp));
        }
        if det.bbox.iter().any(|v| !v.is_finite()) {
            return Err(DetectionError::NonFiniteBox);
        }
        let [x1, y1, x2, y2] = det.bbox;
        if x2 <= x1 || y2 <= y1 {
            return Err(DetectionError::DegenerateBox { x1, y1, x2, y2 });
        }
        let profile = self
            .catalog
            .get(det.class_id)
            .ok_or(DetectionError::UnknownClass(det.class_id))?;
        // NaN confidence falls through to a rejection here
        if !(det.confidence >= profile.min_confidence) {
            return Err(DetectionError::LowConfidence {
                class_id: det.class_id,
                confidence: det.confidence,
                threshold: profile.min_confidence,
            });
        }
        Ok(profile)
    }

    fn similarity(&self, track: &Track, det: &Detection) -> (f32, f32) {
        let overlap = iou(&track.bbox, &det.bbox);
        let (tx, ty) = bbox_center(&track.bbox);
        let (dx, dy) = det.center();
        let dist = ((tx - dx).powi(2) + (ty - dy).powi(2)).sqrt();
        let normalized = (dist / self.config.centroid_normalizer_px).min(1.0);
        let score =
            self.config.iou_weight * overlap + self.config.centroid_weight * (1.0 - normalized);
        (score, overlap)
    }

    /// Process one frame of detections.
    pub fn update(&mut self, detections: &[Detection], now: f64) -> MatchReport {
        let mut report = MatchReport {
            received: detections.len(),
            ..Default::default()
        };

        let mut valid: Vec<(&Detection, PriorityTier)> = Vec::with_capacity(detections.len());
        for det in detections {
            match self.validate(det) {
                Ok(profile) => valid.push((det, profile.tier)),
                Err(e) => {
                    if e.is_malformed() {
                        warn!("Dropping malformed detection (class={}): {}", det.class_id, e);
                    } else {
                        debug!("Filtered detection: {}", e);
                    }
                    report.rejected.push(e);
                }
            }
        }

        // ════════════════════════════════════════════════════════════════════
        // PHASE 1: SCORE SAME-CLASS PAIRS
        // ════════════════════════════════════════════════════════════════════
        let mut candidates: Vec<Candidate> = Vec::new();
        for (ti, track) in self.tracks.iter().enumerate() {
            for (di, (det, _)) in valid.iter().enumerate() {
                if det.class_id != track.class_id {
                    continue;
                }
                let (score, overlap) = self.similarity(track, det);
                if score < self.config.min_similarity {
                    continue;
                }
                candidates.push(Candidate {
                    ti,
                    di,
                    score,
                    iou: overlap,
                    track_id: track.id,
                });
            }
        }
        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.iou.partial_cmp(&a.iou).unwrap_or(Ordering::Equal))
                .then_with(|| a.track_id.cmp(&b.track_id))
                .then_with(|| a.di.cmp(&b.di))
        });

        // ════════════════════════════════════════════════════════════════════
        // PHASE 2: GREEDY ASSIGNMENT
        // ════════════════════════════════════════════════════════════════════
        let mut matched_track_indices: Vec<bool> = vec![false; self.tracks.len()];
        let mut matched_det_indices: Vec<bool> = vec![false; valid.len()];

        for c in &candidates {
            if matched_track_indices[c.ti] || matched_det_indices[c.di] {
                continue;
            }
            matched_track_indices[c.ti] = true;
            matched_det_indices[c.di] = true;
            debug!(
                "Track T{} ↔ det #{} (score={:.3}, IoU={:.3})",
                c.track_id, c.di, c.score, c.iou
            );
            self.tracks[c.ti].update_with_detection(valid[c.di].0, now);
            report.matched += 1;
        }

        // ════════════════════════════════════════════════════════════════════
        // UNMATCHED TRACKS → MISS
        // ════════════════════════════════════════════════════════════════════
        for (ti, matched) in matched_track_indices.iter().enumerate() {
            if !matched {
                self.tracks[ti].mark_missed();
            }
        }

        // ════════════════════════════════════════════════════════════════════
        // UNMATCHED DETECTIONS → NEW TRACKS (highest tier first)
        // ════════════════════════════════════════════════════════════════════
        let mut pending: Vec<usize> = Vec::new();
        for (di, matched) in matched_det_indices.iter().enumerate() {
            if *matched {
                continue;
            }
            let det = valid[di].0;
            if det.area() < self.config.min_detection_area {
                debug!(
                    "Ignoring small detection (class={}, area={:.0}px²)",
                    det.class_id,
                    det.area()
                );
                report.undersized += 1;
                continue;
            }
            pending.push(di);
        }
        pending.sort_by(|&a, &b| {
            valid[a]
                .1
                .cmp(&valid[b].1)
                .then_with(|| {
                    valid[b]
                        .0
                        .confidence
                        .partial_cmp(&valid[a].0.confidence)
                        .unwrap_or(Ordering::Equal)
                })
                .then_with(|| a.cmp(&b))
        });

        for di in pending {
            let (det, tier) = valid[di];
            if self.tracks.len() >= self.config.max_tracks {
                match self.evict_for(tier, now) {
                    Some(transition) => report.evictions.push(transition),
                    None => {
                        debug!(
                            "Track capacity {} reached, dropping class={} detection this frame",
                            self.config.max_tracks, det.class_id
                        );
                        report.capacity_dropped += 1;
                        continue;
                    }
                }
            }
            let id = self.spawn(det, tier, now);
            report.created.push(id);
        }

        report
    }

    fn spawn(&mut self, det: &Detection, tier: PriorityTier, now: f64) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        let track = Track::new(id, det, tier, now, HistoryLimits::from_config(&self.config));
        info!(
            "🆕 New track T{} created: class={}, conf={:.2}, bbox=[{:.0},{:.0},{:.0},{:.0}]",
            id, det.class_id, det.confidence, det.bbox[0], det.bbox[1], det.bbox[2], det.bbox[3]
        );
        self.tracks.push(track);
        id
    }

    /// Remove the least valuable non-Stable track to make room for a
    /// detection of `tier`.
    fn evict_for(&mut self, tier: PriorityTier, now: f64) -> Option<StateTransition> {
        let victim = self
            .tracks
            .iter()
            .enumerate()
            .filter(|(_, t)| match t.state {
                TrackState::Stable | TrackState::Expired => false,
                TrackState::Provisional => t.tier > tier,
                TrackState::Lost => t.tier >= tier,
            })
            .max_by(|(_, a), (_, b)| {
                a.tier
                    .cmp(&b.tier)
                    .then_with(|| {
                        b.last_matched_at
                            .partial_cmp(&a.last_matched_at)
                            .unwrap_or(Ordering::Equal)
                    })
                    .then_with(|| b.id.cmp(&a.id))
            })
            .map(|(i, _)| i)?;

        let track = self.tracks.remove(victim);
        info!(
            "⚠️  Track T{} ({:?}, {}) evicted for a {:?} detection",
            track.id,
            track.tier,
            track.state.as_str(),
            tier
        );
        Some(StateTransition {
            track_id: track.id,
            from: track.state,
            to: TrackState::Expired,
            cause: TransitionCause::Evicted,
            timestamp: now,
        })
    }

    /// Check store invariants. An offending track is discarded and recreated
    /// as a fresh Provisional track. Returns the ids that were replaced.
    pub fn audit(&mut self, now: f64) -> Vec<u64> {
        let mut seen = HashSet::with_capacity(self.tracks.len());
        let mut offenders = Vec::new();
        for (i, track) in self.tracks.iter().enumerate() {
            if !seen.insert(track.id) {
                invariant_violation(&format!("duplicate track id {}", track.id));
                offenders.push(i);
            } else if let Some(reason) = track.is_corrupt(now) {
                invariant_violation(&reason);
                offenders.push(i);
            }
        }

        let mut replaced = Vec::with_capacity(offenders.len());
        for i in offenders {
            let old = &self.tracks[i];
            let id = self.next_id;
            self.next_id += 1;
            let bbox = if old.bbox.iter().all(|v| v.is_finite()) {
                old.bbox
            } else {
                [0.0; 4]
            };
            let det = Detection {
                class_id: old.class_id,
                confidence: old.average_confidence(),
                bbox,
                frame_width: old.frame_size.0,
                frame_height: old.frame_size.1,
                frame_timestamp: now,
            };
            warn!("Recreating track T{} as T{}", old.id, id);
            replaced.push(old.id);
            let fresh = Track::new(id, &det, old.tier, now, old.limits);
            self.tracks[i] = fresh;
        }
        replaced
    }

    pub(crate) fn tracks_mut(&mut self) -> &mut [Track] {
        &mut self.tracks
    }

    pub(crate) fn remove_expired(&mut self) {
        self.tracks.retain(|t| t.state != TrackState::Expired);
    }

    /// Stamp an alert on a track. Returns the previous stamp so a rejected
    /// dispatch can be rolled back. An alert that replaced the track's own
    /// pending message is still one utterance and is not counted again.
    pub(crate) fn record_alert(
        &mut self,
        track_id: u64,
        now: f64,
        emergency: bool,
        replaced_pending: bool,
    ) -> Option<Option<f64>> {
        let track = self.tracks.iter_mut().find(|t| t.id == track_id)?;
        let previous = track.last_alert_at.replace(now);
        if emergency {
            track.last_emergency_at = Some(now);
        }
        if !replaced_pending {
            track.alert_count += 1;
        }
        Some(previous)
    }

    pub(crate) fn restore_alert(&mut self, track_id: u64, previous: Option<f64>) {
        if let Some(track) = self.tracks.iter_mut().find(|t| t.id == track_id) {
            track.last_alert_at = previous;
            track.alert_count = track.alert_count.saturating_sub(1);
        }
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn stable_tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter().filter(|t| t.is_stable())
    }

    pub fn get(&self, track_id: u64) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == track_id)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn snapshots(&self, now: f64) -> Vec<TrackSnapshot> {
        self.tracks
            .iter()
            .map(|t| TrackSnapshot {
                track_id: t.id,
                class_id: t.class_id,
                bbox: t.bbox,
                state: t.state,
                age_s: t.age(now),
                zone: t.zone,
                distance_band: t.band,
                estimated_distance_m: t.distance_m(),
                average_confidence: t.average_confidence(),
                consecutive_matches: t.consecutive_match_count,
                alert_count: t.alert_count,
            })
            .collect()
    }

    pub fn stats(&self) -> TrackingStats {
        let count = |s: TrackState| self.tracks.iter().filter(|t| t.state == s).count();
        TrackingStats {
            total: self.tracks.len(),
            stable: count(TrackState::Stable),
            lost: count(TrackState::Lost),
            provisional: count(TrackState::Provisional),
            next_id: self.next_id,
        }
    }

    /// Drop every track. Ids keep counting up.
    pub fn clear(&mut self) {
        self.tracks.clear();
    }

    #[cfg(test)]
    pub(crate) fn push_raw(&mut self, track: Track) {
        self.tracks.push(track);
    }
}

// ============================================================================
// TESTS
// ============================================================================
