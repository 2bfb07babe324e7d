// src/pipeline/metrics.rs
//
// Diagnostic counters for the tracking and alerting core. Cloning shares
// the counters, so a reporter task can read while the pipeline writes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub total_frames: Arc<AtomicU64>,
    pub detections_received: Arc<AtomicU64>,
    pub malformed_detections: Arc<AtomicU64>,
    pub low_confidence_detections: Arc<AtomicU64>,
    pub undersized_detections: Arc<AtomicU64>,
    pub capacity_drops: Arc<AtomicU64>,
    pub evictions: Arc<AtomicU64>,
    pub tracks_created: Arc<AtomicU64>,
    pub tracks_expired: Arc<AtomicU64>,
    /// Alerts queued for speech, net of later retractions
    pub alerts_dispatched: Arc<AtomicU64>,
    pub emergency_alerts: Arc<AtomicU64>,
    pub alerts_retracted: Arc<AtomicU64>,
    pub guidance_dispatched: Arc<AtomicU64>,
    pub voice_dropped: Arc<AtomicU64>,
    pub voice_evicted: Arc<AtomicU64>,
    pub invariant_recoveries: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            total_frames: Arc::new(AtomicU64::new(0)),
            detections_received: Arc::new(AtomicU64::new(0)),
            malformed_detections: Arc::new(AtomicU64::new(0)),
            low_confidence_detections: Arc::new(AtomicU64::new(0)),
            undersized_detections: Arc::new(AtomicU64::new(0)),
            capacity_drops: Arc::new(AtomicU64::new(0)),
            evictions: Arc::new(AtomicU64::new(0)),
            tracks_created: Arc::new(AtomicU64::new(0)),
            tracks_expired: Arc::new(AtomicU64::new(0)),
            alerts_dispatched: Arc::new(AtomicU64::new(0)),
            emergency_alerts: Arc::new(AtomicU64::new(0)),
            alerts_retracted: Arc::new(AtomicU64::new(0)),
            guidance_dispatched: Arc::new(AtomicU64::new(0)),
            voice_dropped: Arc::new(AtomicU64::new(0)),
            voice_evicted: Arc::new(AtomicU64::new(0)),
            invariant_recoveries: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, counter: &AtomicU64, n: usize) {
        if n > 0 {
            counter.fetch_add(n as u64, Ordering::Relaxed);
        }
    }

    /// Take back counts that turned out not to happen. Never wraps below zero.
    pub fn sub(&self, counter: &AtomicU64, n: usize) {
        if n > 0 {
            let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(n as u64))
            });
        }
    }

    pub fn fps(&self) -> f64 {
        let frames = self.total_frames.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            frames as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSummary {
            total_frames: load(&self.total_frames),
            fps: self.fps(),
            detections_received: load(&self.detections_received),
            malformed_detections: load(&self.malformed_detections),
            low_confidence_detections: load(&self.low_confidence_detections),
            undersized_detections: load(&self.undersized_detections),
            capacity_drops: load(&self.capacity_drops),
            evictions: load(&self.evictions),
            tracks_created: load(&self.tracks_created),
            tracks_expired: load(&self.tracks_expired),
            alerts_dispatched: load(&self.alerts_dispatched),
            emergency_alerts: load(&self.emergency_alerts),
            alerts_retracted: load(&self.alerts_retracted),
            guidance_dispatched: load(&self.guidance_dispatched),
            voice_dropped: load(&self.voice_dropped),
            voice_evicted: load(&self.voice_evicted),
            invariant_recoveries: load(&self.invariant_recoveries),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub total_frames: u64,
    pub fps: f64,
    pub detections_received: u64,
    pub malformed_detections: u64,
    pub low_confidence_detections: u64,
    pub undersized_detections: u64,
    pub capacity_drops: u64,
    pub evictions: u64,
    pub tracks_created: u64,
    pub tracks_expired: u64,
    pub alerts_dispatched: u64,
    pub emergency_alerts: u64,
    pub alerts_retracted: u64,
    pub guidance_dispatched: u64,
    pub voice_dropped: u64,
    pub voice_evicted: u64,
    pub invariant_recoveries: u64,
    pub elapsed_secs: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sub_saturates() {
        let m = PipelineMetrics::new();
        m.add(&m.alerts_dispatched, 3);
        m.sub(&m.alerts_dispatched, 2);
        assert_eq!(m.summary().alerts_dispatched, 1);
        m.sub(&m.alerts_dispatched, 5);
        assert_eq!(m.summary().alerts_dispatched, 0);
    }

    #[test]
    fn test_clones_share_counters() {
        let m = PipelineMetrics::new();
        let reader = m.clone();
        m.inc(&m.total_frames);
        assert_eq!(reader.summary().total_frames, 1);
    }
}
