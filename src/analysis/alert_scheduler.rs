// src/analysis/alert_scheduler.rs
//
// Decides, once per tick, which Stable tracks get spoken about.
//
//   1. Emergencies: a Stable track whose band just changed INTO VeryClose.
//      Sent regardless of its band interval, ahead of all queued
//      non-emergencies. A track re-arms only after the VeryClose interval,
//      so a box jittering on the threshold falls back to regular timing.
//   2. Regular alerts: a Stable track is eligible once its band interval has
//      elapsed since its own last alert (Far is never announced).
//      Order: tier → closer band → longest waiting → lower id.
//   3. Guidance, on its own timer, behind the object alerts.
//
// Each track is timed independently. Only a message the voice channel
// accepts stamps the track; a dropped one leaves it eligible next tick,
// and an evicted one rolls the stamp back. Alerts reported in an earlier
// tick that will now never be spoken come back as `retracted`.

use super::navigation::{GuidanceEvent, NavigationGuide};
use super::track_store::{Track, TrackStore};
use crate::pipeline::voice_channel::{OfferOutcome, VoiceChannel, VoiceMessage};
use crate::types::{AlertConfig, DistanceBand, PriorityTier, Zone};
use serde::Serialize;
use std::cmp::Ordering;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    pub track_id: u64,
    pub class_id: u32,
    pub tier: PriorityTier,
    pub distance_band: DistanceBand,
    pub zone: Zone,
    pub estimated_distance_m: Option<f32>,
    pub emergency: bool,
    pub timestamp: f64,
}

impl AlertEvent {
    fn from_track(track: &Track, band: DistanceBand, zone: Zone, emergency: bool, now: f64) -> Self {
        Self {
            track_id: track.id(),
            class_id: track.class_id(),
            tier: track.tier(),
            distance_band: band,
            zone,
            estimated_distance_m: track.distance_m(),
            emergency,
            timestamp: now,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScheduleOutcome {
    /// Alerts the voice channel accepted, in dispatch order
    pub alerts: Vec<AlertEvent>,
    pub guidance: Option<GuidanceEvent>,
    /// Alerts reported by an earlier tick that were evicted or superseded
    /// before being spoken
    pub retracted: Vec<AlertEvent>,
    pub emergencies: usize,
    pub dropped: usize,
    pub evicted: usize,
}

/// A track just moved into VeryClose from a farther band
pub fn entered_very_close(track: &Track) -> bool {
    track.band() == Some(DistanceBand::VeryClose)
        && matches!(track.previous_band(), Some(prev) if prev != DistanceBand::VeryClose)
}

pub struct AlertScheduler {
    config: AlertConfig,
    guide: NavigationGuide,
}

impl AlertScheduler {
    pub fn new(config: AlertConfig) -> Self {
        Self {
            guide: NavigationGuide::new(&config),
            config,
        }
    }

    /// Whether a Stable track's own interval has elapsed
    pub fn is_eligible(&self, track: &Track, now: f64) -> bool {
        let Some(interval) = track.band().and_then(|b| self.config.interval_for(b)) else {
            return false;
        };
        track.last_alert_at().map_or(true, |t| now - t >= interval)
    }

    /// Entered VeryClose with no emergency for this track in the last
    /// VeryClose interval
    pub fn emergency_due(&self, track: &Track, now: f64) -> bool {
        entered_very_close(track)
            && track
                .last_emergency_at()
                .map_or(true, |t| now - t >= self.config.very_close_interval_s)
    }

    pub fn schedule(
        &mut self,
        store: &mut TrackStore,
        voice: &mut VoiceChannel,
        now: f64,
    ) -> ScheduleOutcome {
        let mut outcome = ScheduleOutcome::default();

        // ════════════════════════════════════════════════════════════════════
        // EMERGENCY PRE-EMPTION
        // ════════════════════════════════════════════════════════════════════
        let mut emergencies: Vec<&Track> =
            store.stable_tracks().filter(|t| self.emergency_due(t, now)).collect();
        emergencies.sort_by(|a, b| a.tier().cmp(&b.tier()).then_with(|| a.id().cmp(&b.id())));
        let emergency_events: Vec<AlertEvent> = emergencies
            .iter()
            .filter_map(|t| {
                let zone = t.zone()?;
                Some(AlertEvent::from_track(t, DistanceBand::VeryClose, zone, true, now))
            })
            .collect();

        // ════════════════════════════════════════════════════════════════════
        // REGULAR ALERTS
        // ════════════════════════════════════════════════════════════════════
        let mut eligible: Vec<&Track> = store
            .stable_tracks()
            .filter(|t| !self.emergency_due(t, now) && self.is_eligible(t, now))
            .collect();
        eligible.sort_by(|a, b| {
            a.tier()
                .cmp(&b.tier())
                .then_with(|| a.band().cmp(&b.band()))
                .then_with(|| waited_longer(a.last_alert_at(), b.last_alert_at()))
                .then_with(|| a.id().cmp(&b.id()))
        });
        let regular_events: Vec<AlertEvent> = eligible
            .iter()
            .filter_map(|t| {
                let (band, zone) = (t.band()?, t.zone()?);
                Some(AlertEvent::from_track(t, band, zone, false, now))
            })
            .collect();

        for event in emergency_events {
            warn!(
                "🚨 EMERGENCY: T{} (class={}) now VERY_CLOSE in {}",
                event.track_id,
                event.class_id,
                event.zone.as_str()
            );
            if self.dispatch(store, voice, event, &mut outcome) {
                outcome.emergencies += 1;
            }
        }
        for event in regular_events {
            self.dispatch(store, voice, event, &mut outcome);
        }

        // ════════════════════════════════════════════════════════════════════
        // DIRECTIONAL GUIDANCE
        // ════════════════════════════════════════════════════════════════════
        if let Some(guidance) = self.guide.propose(store, now) {
            let result = voice.offer(VoiceMessage::Guidance(guidance.clone()), None);
            if result.accepted() {
                info!(
                    "🧭 Guidance: {} (L={:.1} C={:.1} R={:.1})",
                    guidance.direction.as_str(),
                    guidance.occupancy.left,
                    guidance.occupancy.center,
                    guidance.occupancy.right
                );
                self.guide.mark_emitted(now);
                outcome.guidance = Some(guidance);
            } else {
                outcome.dropped += 1;
            }
            self.settle_eviction(store, result, &mut outcome);
        }

        outcome
    }

    /// Offer one alert to the voice channel. Returns whether it was accepted.
    fn dispatch(
        &mut self,
        store: &mut TrackStore,
        voice: &mut VoiceChannel,
        event: AlertEvent,
        outcome: &mut ScheduleOutcome,
    ) -> bool {
        let restore = store.get(event.track_id).and_then(|t| t.last_alert_at());
        let result = voice.offer(VoiceMessage::Alert(event.clone()), restore);
        if !result.accepted() {
            debug!(
                "Alert for T{} dropped, track stays eligible",
                event.track_id
            );
            outcome.dropped += 1;
            return false;
        }

        let replaced_pending = matches!(result, OfferOutcome::Replaced(_));
        store.record_alert(event.track_id, event.timestamp, event.emergency, replaced_pending);
        info!(
            "🔊 Alert T{}: class={} {} {}{}",
            event.track_id,
            event.class_id,
            event.distance_band.as_str(),
            event.zone.as_str(),
            event
                .estimated_distance_m
                .map(|d| format!(" ~{d:.1}m"))
                .unwrap_or_default()
        );
        outcome.alerts.push(event);
        self.settle_eviction(store, result, outcome);
        true
    }

    fn settle_eviction(
        &mut self,
        store: &mut TrackStore,
        result: OfferOutcome,
        outcome: &mut ScheduleOutcome,
    ) {
        let evicted = match result {
            OfferOutcome::QueuedEvicting(evicted) => evicted,
            OfferOutcome::Replaced(old) => {
                // The stamp already carries over to the replacement
                if let VoiceMessage::Alert(alert) = old.message {
                    debug!("Pending alert for T{} superseded", alert.track_id);
                    withdraw(outcome, alert);
                }
                return;
            }
            OfferOutcome::Queued | OfferOutcome::Dropped => return,
        };
        outcome.evicted += 1;
        match evicted.message {
            VoiceMessage::Alert(alert) => {
                store.restore_alert(alert.track_id, evicted.restore_alert_at);
                debug!("Alert for T{} evicted from voice queue", alert.track_id);
                withdraw(outcome, alert);
            }
            VoiceMessage::Guidance(g) => {
                if outcome.guidance.as_ref() == Some(&g) {
                    outcome.guidance = None;
                }
                self.guide.reset();
            }
        }
    }

    pub fn reset(&mut self) {
        self.guide.reset();
    }
}

/// Drop an unspoken alert from this tick's list, or retract it if an
/// earlier tick already reported it
fn withdraw(outcome: &mut ScheduleOutcome, alert: AlertEvent) {
    let same = |a: &AlertEvent| a.track_id == alert.track_id && a.timestamp == alert.timestamp;
    match outcome.alerts.iter().position(same) {
        Some(i) => {
            outcome.alerts.remove(i);
        }
        None => outcome.retracted.push(alert),
    }
}

/// Never-alerted first, then earliest stamp
fn waited_longer(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::lifecycle::TrackState;
    use crate::analysis::navigation::GuidanceDirection;
    use crate::types::{ClassCatalog, Detection, TrackingConfig};

    fn det_with_class(x: f32, class_id: u32) -> Detection {
        Detection {
            class_id,
            confidence: 0.9,
            bbox: [x, 100.0, x + 80.0, 300.0],
            frame_width: 640,
            frame_height: 480,
            frame_timestamp: 0.0,
        }
    }

    /// Store with one Stable track per (class, band), annotated in the center
    fn stable_store(tracks: &[(u32, DistanceBand)]) -> TrackStore {
        let mut store = TrackStore::new(TrackingConfig::default(), ClassCatalog::default());
        // One new detection per update so ids follow the input order
        let mut dets: Vec<Detection> = Vec::new();
        for (i, (class_id, _)) in tracks.iter().enumerate() {
            dets.push(det_with_class(i as f32 * 100.0, *class_id));
            store.update(&dets, 0.0);
        }
        for (track, (_, band)) in store.tracks_mut().iter_mut().zip(tracks) {
            track.set_state(TrackState::Stable);
            track.annotate(*band, Zone::Center, None);
        }
        store
    }

    fn band_to(store: &mut TrackStore, track_id: u64, band: DistanceBand) {
        for t in store.tracks_mut() {
            if t.id() == track_id {
                t.annotate(band, Zone::Center, None);
            } else if let (Some(b), Some(z)) = (t.band(), t.zone()) {
                t.annotate(b, z, None);
            }
        }
    }

    #[test]
    fn test_person_before_car() {
        let mut store = stable_store(&[(2, DistanceBand::Close), (0, DistanceBand::Medium)]);
        let mut scheduler = AlertScheduler::new(AlertConfig::default());
        let mut voice = VoiceChannel::new(10);
        let out = scheduler.schedule(&mut store, &mut voice, 1.0);
        let classes: Vec<u32> = out.alerts.iter().map(|a| a.class_id).collect();
        assert_eq!(classes, vec![0, 2], "person outranks car regardless of band");
        let spoken: Vec<Option<u64>> = std::iter::from_fn(|| {
            let u = voice.next_utterance()?;
            voice.finish_current();
            Some(u.message.track_id())
        })
        .collect();
        assert_eq!(spoken, vec![Some(2), Some(1), None]);
    }

    #[test]
    fn test_closer_band_first_within_tier() {
        let mut store = stable_store(&[(2, DistanceBand::Medium), (7, DistanceBand::VeryClose)]);
        let mut scheduler = AlertScheduler::new(AlertConfig::default());
        let mut voice = VoiceChannel::new(10);
        let out = scheduler.schedule(&mut store, &mut voice, 1.0);
        assert_eq!(out.alerts[0].class_id, 7);
        assert_eq!(out.alerts[1].class_id, 2);
    }

    #[test]
    fn test_per_band_intervals() {
        let mut store = stable_store(&[
            (0, DistanceBand::VeryClose),
            (2, DistanceBand::Close),
            (16, DistanceBand::Medium),
            (9, DistanceBand::Far),
        ]);
        let mut scheduler = AlertScheduler::new(AlertConfig::default());
        let mut voice = VoiceChannel::new(10);

        let count = |out: &ScheduleOutcome, id: u64| {
            out.alerts.iter().filter(|a| a.track_id == id).count()
        };

        let mut per_track = [0usize; 5];
        for step in 0..=40 {
            let now = step as f64 * 0.5;
            let out = scheduler.schedule(&mut store, &mut voice, now);
            for id in 1..=4u64 {
                per_track[id as usize] += count(&out, id);
            }
            voice.clear();
        }
        // 0..=20s: VeryClose every 5s, Close every 10s, Medium every 20s, Far never
        assert_eq!(per_track[1], 5);
        assert_eq!(per_track[2], 3);
        assert_eq!(per_track[3], 2);
        assert_eq!(per_track[4], 0);
    }

    #[test]
    fn test_no_alerts_for_non_stable() {
        let mut store = stable_store(&[(0, DistanceBand::VeryClose), (0, DistanceBand::VeryClose)]);
        store.tracks_mut()[0].set_state(TrackState::Lost);
        store.tracks_mut()[1].set_state(TrackState::Provisional);
        let mut scheduler = AlertScheduler::new(AlertConfig::default());
        let mut voice = VoiceChannel::new(10);
        let out = scheduler.schedule(&mut store, &mut voice, 1.0);
        assert!(out.alerts.is_empty());
        assert!(out.guidance.is_none(), "no stable tracks, no guidance");
    }

    #[test]
    fn test_emergency_on_entering_very_close() {
        let mut store = stable_store(&[(0, DistanceBand::Close), (2, DistanceBand::Medium)]);
        let mut scheduler = AlertScheduler::new(AlertConfig::default());
        let mut voice = VoiceChannel::new(10);
        scheduler.schedule(&mut store, &mut voice, 10.0);
        voice.clear();

        // Two seconds later the person steps in close
        band_to(&mut store, 1, DistanceBand::VeryClose);
        let out = scheduler.schedule(&mut store, &mut voice, 12.0);
        assert_eq!(out.alerts.len(), 1);
        assert!(out.alerts[0].emergency);
        assert_eq!(out.alerts[0].track_id, 1);
        assert_eq!(out.emergencies, 1);

        // Staying VeryClose is not another emergency, and the 5s interval holds
        band_to(&mut store, 1, DistanceBand::VeryClose);
        let out = scheduler.schedule(&mut store, &mut voice, 13.0);
        assert!(out.alerts.is_empty());
    }

    #[test]
    fn test_threshold_jitter_does_not_repeat_emergencies() {
        let mut store = stable_store(&[(0, DistanceBand::Close)]);
        let mut scheduler = AlertScheduler::new(AlertConfig::default());
        let mut voice = VoiceChannel::new(10);
        let mut alerts = Vec::new();

        // Box flickers across the VeryClose threshold every tick at 10 fps
        for step in 0..40 {
            let now = step as f64 / 10.0;
            if step > 0 {
                let band = if step % 2 == 1 { DistanceBand::VeryClose } else { DistanceBand::Close };
                band_to(&mut store, 1, band);
            }
            alerts.extend(scheduler.schedule(&mut store, &mut voice, now).alerts);
            voice.clear();
        }
        let seen: Vec<(f64, bool)> = alerts.iter().map(|a| (a.timestamp, a.emergency)).collect();
        assert_eq!(seen, vec![(0.0, false), (0.1, true)]);

        // Re-armed once the VeryClose interval has passed
        band_to(&mut store, 1, DistanceBand::Close);
        assert!(scheduler.schedule(&mut store, &mut voice, 6.0).alerts.is_empty());
        band_to(&mut store, 1, DistanceBand::VeryClose);
        let out = scheduler.schedule(&mut store, &mut voice, 6.5);
        assert_eq!(out.alerts.len(), 1);
        assert!(out.alerts[0].emergency);
        assert_eq!(store.get(1).and_then(|t| t.last_emergency_at()), Some(6.5));
    }

    #[test]
    fn test_superseded_pending_alert_is_retracted_and_counted_once() {
        let mut store = stable_store(&[(16, DistanceBand::Close)]);
        let mut scheduler = AlertScheduler::new(AlertConfig::default());
        let mut voice = VoiceChannel::new(10);
        let out = scheduler.schedule(&mut store, &mut voice, 0.0);
        assert_eq!(out.alerts.len(), 1);
        assert!(out.retracted.is_empty());

        // Still unspoken when the dog steps in close
        band_to(&mut store, 1, DistanceBand::VeryClose);
        let out = scheduler.schedule(&mut store, &mut voice, 1.0);
        assert_eq!(out.alerts.len(), 1);
        assert!(out.alerts[0].emergency);
        assert_eq!(out.retracted.len(), 1);
        assert_eq!(out.retracted[0].timestamp, 0.0);
        assert_eq!(store.get(1).map(|t| t.alert_count()), Some(1), "one utterance");
    }

    #[test]
    fn test_emergency_jumps_queue() {
        let mut store = stable_store(&[(2, DistanceBand::Close), (16, DistanceBand::Close)]);
        let mut scheduler = AlertScheduler::new(AlertConfig::default());
        let mut voice = VoiceChannel::new(10);
        scheduler.schedule(&mut store, &mut voice, 0.0);
        // Car being spoken, dog pending
        assert_eq!(voice.next_utterance().and_then(|u| u.message.track_id()), Some(1));

        band_to(&mut store, 2, DistanceBand::VeryClose);
        scheduler.schedule(&mut store, &mut voice, 1.0);
        let pending: Vec<bool> = voice
            .pending()
            .map(|u| matches!(&u.message, VoiceMessage::Alert(a) if a.emergency))
            .collect();
        assert_eq!(
            pending,
            vec![true, false],
            "emergency replaced the dog's pending alert, guidance behind it"
        );
        assert!(voice.is_busy(), "car alert keeps playing");
    }

    #[test]
    fn test_dropped_alert_stays_eligible() {
        let mut store = stable_store(&[(0, DistanceBand::Close), (16, DistanceBand::Close)]);
        let mut scheduler = AlertScheduler::new(AlertConfig::default());
        let mut voice = VoiceChannel::new(1);
        let out = scheduler.schedule(&mut store, &mut voice, 0.0);
        assert_eq!(out.alerts.len(), 1);
        assert_eq!(out.dropped, 2, "dog alert and guidance found the queue full");
        assert_eq!(store.get(2).and_then(|t| t.last_alert_at()), None);

        voice.clear();
        let out = scheduler.schedule(&mut store, &mut voice, 0.5);
        assert_eq!(out.alerts.len(), 1);
        assert_eq!(out.alerts[0].track_id, 2);
    }

    #[test]
    fn test_evicted_alert_restores_stamp() {
        let mut store = stable_store(&[(16, DistanceBand::Close), (0, DistanceBand::Close)]);
        let mut scheduler = AlertScheduler::new(AlertConfig::default());
        let mut voice = VoiceChannel::new(1);
        // Only the dog is stable at first
        store.tracks_mut()[1].set_state(TrackState::Provisional);
        let out = scheduler.schedule(&mut store, &mut voice, 0.0);
        assert_eq!(out.alerts.len(), 1);
        assert_eq!(store.get(1).and_then(|t| t.last_alert_at()), Some(0.0));

        store.tracks_mut()[1].set_state(TrackState::Stable);
        let out = scheduler.schedule(&mut store, &mut voice, 1.0);
        assert_eq!(out.evicted, 1);
        assert_eq!(out.alerts.len(), 1);
        assert_eq!(out.alerts[0].track_id, 2);
        let retracted: Vec<(u64, f64)> =
            out.retracted.iter().map(|a| (a.track_id, a.timestamp)).collect();
        assert_eq!(retracted, vec![(1, 0.0)], "dog alert from the earlier tick withdrawn");
        assert_eq!(
            store.get(1).and_then(|t| t.last_alert_at()),
            None,
            "dog never heard, stamp rolled back"
        );
        assert_eq!(store.get(1).map(|t| t.alert_count()), Some(0));
    }

    #[test]
    fn test_guidance_every_interval() {
        let mut store = stable_store(&[(0, DistanceBand::Close)]);
        let mut scheduler = AlertScheduler::new(AlertConfig::default());
        let mut voice = VoiceChannel::new(10);
        let mut emitted = Vec::new();
        for step in 0..=25 {
            let now = step as f64;
            if let Some(g) = scheduler.schedule(&mut store, &mut voice, now).guidance {
                emitted.push(g);
            }
            voice.clear();
        }
        let times: Vec<f64> = emitted.iter().map(|g| g.timestamp).collect();
        assert_eq!(times, vec![0.0, 10.0, 20.0]);
        assert_eq!(emitted[0].direction, GuidanceDirection::TurnLeft);
    }
}
