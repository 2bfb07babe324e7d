// src/main.rs
//
// Replay driver: feeds recorded detections through the pipeline frame by
// frame and plays the resulting speech on a simulated speaker task.
//
// Usage: assistive-vision <replay.jsonl>
//   one JSON object per line: {"timestamp", "width", "height", "detections": [...]}

use anyhow::{Context, Result};
use assistive_vision::analysis::GuidanceDirection;
use assistive_vision::pipeline::{NavigationPipeline, Utterance, VoiceMessage};
use assistive_vision::types::{ClassCatalog, Config, Detection};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const CONFIG_ENV: &str = "ASSISTIVE_VISION_CONFIG";
const DEFAULT_CONFIG: &str = "config.yaml";
/// Simulated time to speak one message
const UTTERANCE_DURATION: Duration = Duration::from_millis(1500);
/// Longest real pause between two replayed frames
const MAX_FRAME_GAP: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize)]
struct ReplayFrame {
    timestamp: f64,
    width: u32,
    height: u32,
    #[serde(default)]
    detections: Vec<RawDetection>,
}

#[derive(Debug, Deserialize)]
struct RawDetection {
    class_id: u32,
    confidence: f32,
    bbox: [f32; 4],
}

impl ReplayFrame {
    fn detections(&self) -> Vec<Detection> {
        self.detections
            .iter()
            .map(|d| Detection {
                class_id: d.class_id,
                confidence: d.confidence,
                bbox: d.bbox,
                frame_width: self.width,
                frame_height: self.height,
                frame_timestamp: self.timestamp,
            })
            .collect()
    }
}

fn load_config() -> Result<Config> {
    let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG.to_string());
    if Path::new(&path).exists() {
        let config = Config::load(&path)?;
        info!("✓ Configuration loaded from {}", path);
        Ok(config)
    } else {
        warn!("{} not found, using built-in defaults", path);
        Ok(Config::default())
    }
}

fn parse_replay(contents: &str) -> Result<Vec<ReplayFrame>> {
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).with_context(|| format!("replay line {}", i + 1))
        })
        .collect()
}

/// Real pause between two replayed frames. Backwards or garbage
/// timestamps don't pause at all; huge gaps are capped.
fn frame_gap(prev: f64, next: f64) -> Duration {
    let delta = next - prev;
    match Duration::try_from_secs_f64(delta) {
        Ok(gap) => gap.min(MAX_FRAME_GAP),
        Err(_) if delta > 0.0 => MAX_FRAME_GAP,
        Err(_) => Duration::ZERO,
    }
}

fn describe(utterance: &Utterance, catalog: &ClassCatalog) -> String {
    match &utterance.message {
        VoiceMessage::Alert(a) => {
            let name = catalog
                .get(a.class_id)
                .map(|p| p.name.replace('_', " "))
                .unwrap_or_else(|| "object".to_string());
            let distance = a
                .estimated_distance_m
                .map(|d| format!(", about {d:.0} meters"))
                .unwrap_or_default();
            let prefix = if a.emergency { "Emergency! " } else { "" };
            format!(
                "{prefix}{name} {} on the {}{distance}",
                a.distance_band.as_str().to_lowercase().replace('_', " "),
                a.zone.as_str().to_lowercase()
            )
        }
        VoiceMessage::Guidance(g) => match g.direction {
            GuidanceDirection::Forward => "Path ahead is clear".to_string(),
            GuidanceDirection::TurnLeft => "Move to the left".to_string(),
            GuidanceDirection::TurnRight => "Move to the right".to_string(),
            GuidanceDirection::Stop => "Stop, path blocked".to_string(),
        },
    }
}

/// Plays utterances one at a time and reports each finished sequence number.
async fn speaker(
    catalog: ClassCatalog,
    mut rx: mpsc::Receiver<Utterance>,
    done: mpsc::UnboundedSender<u64>,
) {
    while let Some(utterance) = rx.recv().await {
        info!("🗣️  \"{}\"", describe(&utterance, &catalog));
        tokio::time::sleep(UTTERANCE_DURATION).await;
        if done.send(utterance.seq).is_err() {
            break;
        }
    }
    debug!("Speaker stopped");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("assistive_vision=info")),
        )
        .init();

    info!("🦯 Assistive vision replay starting");

    let replay_path = std::env::args()
        .nth(1)
        .context("usage: assistive-vision <replay.jsonl>")?;
    let config = load_config()?;

    let contents = tokio::fs::read_to_string(&replay_path)
        .await
        .with_context(|| format!("failed to read replay {}", replay_path))?;
    let frames = parse_replay(&contents)?;
    info!("Loaded {} frame(s) from {}", frames.len(), replay_path);

    let (speak_tx, speak_rx) = mpsc::channel::<Utterance>(1);
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<u64>();
    let speaker_task = tokio::spawn(speaker(config.classes.clone(), speak_rx, done_tx));

    let mut pipeline = NavigationPipeline::new(config);
    let mut previous_ts: Option<f64> = None;

    for frame in &frames {
        if let Some(prev) = previous_ts {
            tokio::time::sleep(frame_gap(prev, frame.timestamp)).await;
        }
        previous_ts = Some(frame.timestamp);

        // Speech results arrive between ticks
        while let Ok(seq) = done_rx.try_recv() {
            if let Some(finished) = pipeline.finish_utterance() {
                debug!("Utterance #{} finished (reported #{})", finished.seq, seq);
            }
        }

        let output = pipeline.tick(&frame.detections(), frame.timestamp);
        for alert in &output.alerts {
            debug!("Frame {}: alert {:?}", output.frame_id, alert);
        }

        if let Some(next) = pipeline.next_utterance() {
            if speak_tx.send(next).await.is_err() {
                warn!("Speaker task is gone, stopping replay");
                break;
            }
        }
    }

    pipeline.shutdown();
    drop(speak_tx);
    speaker_task.await.context("speaker task panicked")?;

    let stats = pipeline.stats();
    info!(
        "✓ Replay finished: next track id {}, {} voice message(s) dropped",
        stats.next_id,
        pipeline.metrics().summary().voice_dropped
    );
    let summary = serde_json::to_string_pretty(&pipeline.metrics().summary())?;
    info!("Metrics:\n{}", summary);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_gap_is_bounded() {
        assert_eq!(frame_gap(1.0, 1.5), Duration::from_millis(500));
        assert_eq!(frame_gap(0.0, 30.0), MAX_FRAME_GAP);
        assert_eq!(frame_gap(0.0, 1e20), MAX_FRAME_GAP);
        assert_eq!(frame_gap(0.0, f64::INFINITY), MAX_FRAME_GAP);
        assert_eq!(frame_gap(5.0, 4.0), Duration::ZERO);
        assert_eq!(frame_gap(0.0, f64::NAN), Duration::ZERO);
    }

    #[test]
    fn test_parse_replay_skips_blank_lines() {
        let contents = r#"{"timestamp": 0.0, "width": 640, "height": 480, "detections": [{"class_id": 0, "confidence": 0.9, "bbox": [1, 2, 3, 4]}]}

{"timestamp": 0.1, "width": 640, "height": 480}
"#;
        let frames = parse_replay(contents).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].detections().len(), 1);
        assert!(frames[1].detections.is_empty());
    }
}
