// src/pipeline/orchestrator.rs
//
// One synchronous tick per frame:
//
//   audit → match (TrackStore) → lifecycle → proximity → alerts/guidance
//
// The caller supplies the timestamp; nothing in here reads the clock or
// blocks. The voice channel is polled by whoever owns the speaker through
// next_utterance()/finish_utterance() between ticks.

use crate::analysis::alert_scheduler::{AlertEvent, AlertScheduler};
use crate::analysis::lifecycle::{
    StabilityStateMachine, StateTransition, TrackState, TransitionCause,
};
use crate::analysis::navigation::GuidanceEvent;
use crate::analysis::proximity::ProximityEstimator;
use crate::analysis::track_store::{TrackSnapshot, TrackStore, TrackingStats};
use crate::error::invariant_violation;
use crate::pipeline::metrics::PipelineMetrics;
use crate::pipeline::voice_channel::{Utterance, VoiceChannel};
use crate::types::{Config, Detection};
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, Serialize)]
pub struct TickOutput {
    pub frame_id: u64,
    pub timestamp: f64,
    pub alerts: Vec<AlertEvent>,
    /// Alerts from earlier ticks that were evicted or superseded unspoken
    pub retracted: Vec<AlertEvent>,
    pub guidance: Option<GuidanceEvent>,
    pub snapshots: Vec<TrackSnapshot>,
    pub transitions: Vec<StateTransition>,
    pub stats: TrackingStats,
}

pub struct NavigationPipeline {
    config: Config,
    store: TrackStore,
    lifecycle: StabilityStateMachine,
    estimator: ProximityEstimator,
    scheduler: AlertScheduler,
    voice: VoiceChannel,
    metrics: PipelineMetrics,
    frame_id: u64,
    last_tick: Option<f64>,
    shut_down: bool,
}

impl NavigationPipeline {
    pub fn new(config: Config) -> Self {
        Self::with_metrics(config, PipelineMetrics::new())
    }

    pub fn with_metrics(config: Config, metrics: PipelineMetrics) -> Self {
        Self {
            store: TrackStore::new(config.tracking.clone(), config.classes.clone()),
            lifecycle: StabilityStateMachine::new(&config.tracking),
            estimator: ProximityEstimator::new(config.estimator.clone()),
            scheduler: AlertScheduler::new(config.alerts.clone()),
            voice: VoiceChannel::new(config.alerts.voice_queue_capacity),
            metrics,
            frame_id: 0,
            last_tick: None,
            shut_down: false,
            config,
        }
    }

    /// A usable tick time: finite, non-negative and never behind the last one.
    fn resolve_timestamp(&mut self, now: f64) -> f64 {
        let floor = self.last_tick.unwrap_or(0.0);
        if !now.is_finite() || now < 0.0 {
            invariant_violation(&format!("tick timestamp {now} is not a valid time"));
            self.metrics.inc(&self.metrics.invariant_recoveries);
            return floor;
        }
        match self.last_tick {
            Some(last) if now < last => {
                warn!(
                    "Tick timestamp went backwards ({:.3}s < {:.3}s), holding at last tick",
                    now, last
                );
                last
            }
            _ => now,
        }
    }

    pub fn tick(&mut self, detections: &[Detection], now: f64) -> TickOutput {
        if self.shut_down {
            debug!("Tick after shutdown ignored");
            return TickOutput {
                frame_id: self.frame_id,
                timestamp: now,
                ..Default::default()
            };
        }

        let now = self.resolve_timestamp(now);
        self.last_tick = Some(now);
        self.frame_id += 1;
        let m = &self.metrics;
        m.inc(&m.total_frames);

        // ── Invariants ──
        let replaced = self.store.audit(now);
        m.add(&m.invariant_recoveries, replaced.len());

        // ── Matching ──
        let report = self.store.update(detections, now);
        m.add(&m.detections_received, report.received);
        m.add(&m.malformed_detections, report.malformed());
        m.add(&m.low_confidence_detections, report.low_confidence());
        m.add(&m.undersized_detections, report.undersized);
        m.add(&m.capacity_drops, report.capacity_dropped);
        m.add(&m.evictions, report.evictions.len());
        m.add(&m.tracks_created, report.created.len());

        // ── Lifecycle ──
        let mut transitions = report.evictions;
        transitions.extend(self.lifecycle.advance(&mut self.store, now));
        let expired = transitions
            .iter()
            .filter(|t| t.to == TrackState::Expired && t.cause != TransitionCause::Evicted)
            .count();
        m.add(&m.tracks_expired, expired);

        // ── Proximity ──
        self.estimator.annotate(&mut self.store);

        // ── Alerts & guidance ──
        let outcome = self.scheduler.schedule(&mut self.store, &mut self.voice, now);
        m.add(&m.alerts_dispatched, outcome.alerts.len());
        m.add(&m.emergency_alerts, outcome.emergencies);
        m.sub(&m.alerts_dispatched, outcome.retracted.len());
        m.sub(
            &m.emergency_alerts,
            outcome.retracted.iter().filter(|a| a.emergency).count(),
        );
        m.add(&m.alerts_retracted, outcome.retracted.len());
        m.add(&m.voice_dropped, outcome.dropped);
        m.add(&m.voice_evicted, outcome.evicted);
        if outcome.guidance.is_some() {
            m.inc(&m.guidance_dispatched);
        }

        TickOutput {
            frame_id: self.frame_id,
            timestamp: now,
            alerts: outcome.alerts,
            retracted: outcome.retracted,
            guidance: outcome.guidance,
            snapshots: self.store.snapshots(now),
            transitions,
            stats: self.store.stats(),
        }
    }

    /// Discard every track and pending message. Later ticks do nothing.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        info!(
            "🛑 Shutting down: discarding {} track(s), {} pending message(s)",
            self.store.len(),
            self.voice.queue_depth()
        );
        self.store.clear();
        self.voice.clear();
        self.scheduler.reset();
        self.shut_down = true;
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Next message for an idle speaker
    pub fn next_utterance(&mut self) -> Option<Utterance> {
        if self.shut_down {
            return None;
        }
        self.voice.next_utterance()
    }

    pub fn finish_utterance(&mut self) -> Option<Utterance> {
        self.voice.finish_current()
    }

    pub fn voice(&self) -> &VoiceChannel {
        &self.voice
    }

    pub fn store(&self) -> &TrackStore {
        &self.store
    }

    pub fn stats(&self) -> TrackingStats {
        self.store.stats()
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
