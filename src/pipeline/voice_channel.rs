// src/pipeline/voice_channel.rs
//
// The speaker is a single serialized resource: one utterance in flight,
// a bounded priority-ordered queue behind it. Nothing ever interrupts the
// utterance in flight; urgency only decides queue position.
//
// Queue order (front = spoken next):
//   Emergency < Object{tier, band} < Guidance, FIFO among equals.

use crate::analysis::alert_scheduler::AlertEvent;
use crate::analysis::navigation::GuidanceEvent;
use crate::types::{DistanceBand, PriorityTier};
use serde::Serialize;
use std::collections::VecDeque;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VoiceMessage {
    Alert(AlertEvent),
    Guidance(GuidanceEvent),
}

/// Lower sorts first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum MessagePriority {
    Emergency,
    Object {
        tier: PriorityTier,
        band: DistanceBand,
    },
    Guidance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageKey {
    Track(u64),
    Guidance,
}

impl VoiceMessage {
    pub fn priority(&self) -> MessagePriority {
        match self {
            Self::Alert(a) if a.emergency => MessagePriority::Emergency,
            Self::Alert(a) => MessagePriority::Object {
                tier: a.tier,
                band: a.distance_band,
            },
            Self::Guidance(_) => MessagePriority::Guidance,
        }
    }

    pub fn track_id(&self) -> Option<u64> {
        match self {
            Self::Alert(a) => Some(a.track_id),
            Self::Guidance(_) => None,
        }
    }

    fn key(&self) -> MessageKey {
        self.track_id()
            .map(MessageKey::Track)
            .unwrap_or(MessageKey::Guidance)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Utterance {
    pub seq: u64,
    pub message: VoiceMessage,
    pub priority: MessagePriority,
    /// Alert stamp the owning track had before this message was queued
    pub restore_alert_at: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OfferOutcome {
    Queued,
    /// Took the place of a pending message for the same track (or the
    /// pending guidance), which is returned unspoken
    Replaced(Utterance),
    /// Queued by pushing out the least urgent pending message
    QueuedEvicting(Utterance),
    /// Queue full of more urgent messages
    Dropped,
}

impl OfferOutcome {
    pub fn accepted(&self) -> bool {
        !matches!(self, Self::Dropped)
    }
}

pub struct VoiceChannel {
    pending: VecDeque<Utterance>,
    current: Option<Utterance>,
    capacity: usize,
    next_seq: u64,
}

impl VoiceChannel {
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: VecDeque::with_capacity(capacity),
            current: None,
            capacity: capacity.max(1),
            next_seq: 0,
        }
    }

    pub fn offer(&mut self, message: VoiceMessage, restore_alert_at: Option<f64>) -> OfferOutcome {
        let mut priority = message.priority();
        let mut restore_alert_at = restore_alert_at;
        let key = message.key();

        let mut superseded = None;
        if let Some(i) = self.pending.iter().position(|u| u.message.key() == key) {
            if let Some(old) = self.pending.remove(i) {
                // Never downgrade, and remember the stamp from before the
                // first unspoken message
                priority = priority.min(old.priority);
                restore_alert_at = old.restore_alert_at;
                superseded = Some(old);
            }
        }

        let utterance = Utterance {
            seq: self.next_seq,
            message,
            priority,
            restore_alert_at,
        };
        self.next_seq += 1;

        if let Some(old) = superseded {
            self.insert(utterance);
            return OfferOutcome::Replaced(old);
        }

        if self.pending.len() < self.capacity {
            self.insert(utterance);
            return OfferOutcome::Queued;
        }

        let outranks_tail = self
            .pending
            .back()
            .is_some_and(|tail| priority < tail.priority);
        if outranks_tail {
            if let Some(evicted) = self.pending.pop_back() {
                warn!(
                    "Voice queue full ({}), evicting {:?} for {:?}",
                    self.capacity, evicted.priority, priority
                );
                self.insert(utterance);
                return OfferOutcome::QueuedEvicting(evicted);
            }
        }

        warn!(
            "Voice queue full ({}), dropping {:?} message",
            self.capacity, priority
        );
        OfferOutcome::Dropped
    }

    fn insert(&mut self, utterance: Utterance) {
        let at = self
            .pending
            .iter()
            .position(|u| u.priority > utterance.priority)
            .unwrap_or(self.pending.len());
        debug!(
            "Queued {:?} at position {}/{}",
            utterance.priority,
            at,
            self.pending.len() + 1
        );
        self.pending.insert(at, utterance);
    }

    /// Hand the next message to the speaker. `None` while one is still playing.
    pub fn next_utterance(&mut self) -> Option<Utterance> {
        if self.current.is_some() {
            return None;
        }
        let next = self.pending.pop_front()?;
        self.current = Some(next.clone());
        Some(next)
    }

    /// The speaker reports the in-flight utterance as done
    pub fn finish_current(&mut self) -> Option<Utterance> {
        self.current.take()
    }

    pub fn is_busy(&self) -> bool {
        self.current.is_some()
    }

    pub fn queue_depth(&self) -> usize {
        self.pending.len()
    }

    pub fn pending(&self) -> impl Iterator<Item = &Utterance> {
        self.pending.iter()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::navigation::{GuidanceDirection, ZoneOccupancy};
    use crate::types::Zone;

    fn alert(track_id: u64, tier: PriorityTier, band: DistanceBand, emergency: bool) -> VoiceMessage {
        VoiceMessage::Alert(AlertEvent {
            track_id,
            class_id: 0,
            tier,
            distance_band: band,
            zone: Zone::Center,
            estimated_distance_m: None,
            emergency,
            timestamp: 0.0,
        })
    }

    fn guidance() -> VoiceMessage {
        VoiceMessage::Guidance(GuidanceEvent {
            direction: GuidanceDirection::TurnLeft,
            occupancy: ZoneOccupancy::default(),
            timestamp: 0.0,
        })
    }

    fn order(ch: &VoiceChannel) -> Vec<u64> {
        ch.pending()
            .map(|u| u.message.track_id().unwrap_or(0))
            .collect()
    }

    #[test]
    fn test_priority_order() {
        use DistanceBand::*;
        use PriorityTier::*;
        let mut ch = VoiceChannel::new(10);
        ch.offer(guidance(), None);
        ch.offer(alert(1, Animal, VeryClose, false), None);
        ch.offer(alert(2, Person, Medium, false), None);
        ch.offer(alert(3, Person, Close, false), None);
        ch.offer(alert(4, Vehicle, Far, true), None);
        assert_eq!(order(&ch), vec![4, 3, 2, 1, 0]);
    }

    #[test]
    fn test_emergencies_stay_fifo() {
        let mut ch = VoiceChannel::new(10);
        ch.offer(alert(1, PriorityTier::Person, DistanceBand::Close, false), None);
        ch.offer(alert(2, PriorityTier::Animal, DistanceBand::VeryClose, true), None);
        ch.offer(alert(3, PriorityTier::Person, DistanceBand::VeryClose, true), None);
        assert_eq!(order(&ch), vec![2, 3, 1]);
    }

    #[test]
    fn test_emergency_does_not_interrupt() {
        let mut ch = VoiceChannel::new(10);
        ch.offer(alert(1, PriorityTier::Animal, DistanceBand::Medium, false), None);
        let playing = ch.next_utterance();
        assert_eq!(playing.and_then(|u| u.message.track_id()), Some(1));

        ch.offer(alert(2, PriorityTier::Person, DistanceBand::VeryClose, true), None);
        assert!(ch.is_busy());
        assert!(ch.next_utterance().is_none(), "speaker still busy");

        assert!(ch.finish_current().is_some());
        assert_eq!(ch.next_utterance().and_then(|u| u.message.track_id()), Some(2));
    }

    #[test]
    fn test_replace_same_track_keeps_urgency_and_restore_stamp() {
        let mut ch = VoiceChannel::new(10);
        ch.offer(alert(1, PriorityTier::Person, DistanceBand::VeryClose, true), Some(3.0));
        ch.offer(alert(2, PriorityTier::Person, DistanceBand::Close, false), None);
        let outcome = ch.offer(alert(1, PriorityTier::Person, DistanceBand::Close, false), Some(9.0));
        match outcome {
            OfferOutcome::Replaced(old) => assert_eq!(old.message.track_id(), Some(1)),
            other => panic!("expected replacement, got {other:?}"),
        }
        assert_eq!(ch.queue_depth(), 2);
        let first = ch.pending().next().cloned();
        assert_eq!(first.as_ref().map(|u| u.priority), Some(MessagePriority::Emergency));
        assert_eq!(first.and_then(|u| u.restore_alert_at), Some(3.0));
    }

    #[test]
    fn test_single_pending_guidance() {
        let mut ch = VoiceChannel::new(10);
        assert_eq!(ch.offer(guidance(), None), OfferOutcome::Queued);
        assert!(matches!(ch.offer(guidance(), None), OfferOutcome::Replaced(_)));
        assert_eq!(ch.queue_depth(), 1);
    }

    #[test]
    fn test_full_queue_evicts_or_drops() {
        let mut ch = VoiceChannel::new(2);
        ch.offer(alert(1, PriorityTier::Vehicle, DistanceBand::Close, false), None);
        ch.offer(alert(2, PriorityTier::Animal, DistanceBand::Medium, false), Some(1.5));

        let outcome = ch.offer(alert(3, PriorityTier::Animal, DistanceBand::Far, false), None);
        assert_eq!(outcome, OfferOutcome::Dropped);
        assert!(!outcome.accepted());

        let outcome = ch.offer(alert(4, PriorityTier::Person, DistanceBand::Medium, false), None);
        match outcome {
            OfferOutcome::QueuedEvicting(evicted) => {
                assert_eq!(evicted.message.track_id(), Some(2));
                assert_eq!(evicted.restore_alert_at, Some(1.5));
            }
            other => panic!("expected eviction, got {other:?}"),
        }
        assert_eq!(order(&ch), vec![4, 1]);
    }

    #[test]
    fn test_clear() {
        let mut ch = VoiceChannel::new(4);
        ch.offer(guidance(), None);
        ch.offer(alert(1, PriorityTier::Person, DistanceBand::Close, false), None);
        ch.next_utterance();
        ch.clear();
        assert!(!ch.is_busy());
        assert_eq!(ch.queue_depth(), 0);
        assert!(ch.next_utterance().is_none());
    }
}
