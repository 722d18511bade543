// src/telemetry.rs
//
// Episode telemetry sinks.
// - EpisodeSink: trait used by the training harness
// - NoopSink:    discards all records
// - JsonlSink:   writes one JSON object per episode for offline analysis

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

/// One record per completed episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeRecord {
    pub episode: u32,
    pub epsilon: f64,
    pub simulation_time: f64,
    pub training_time: f64,
    /// Cumulative negative reward over the episode.
    pub reward: f64,
    /// Cumulative delay in seconds.
    pub cumulative_wait: f64,
    /// Average halted vehicles per step.
    pub avg_queue_length: f64,
    /// Whether the target network was refreshed at the end of this episode.
    pub target_synced: bool,
}

/// Abstract sink for per-episode telemetry.
pub trait EpisodeSink {
    fn log_episode(&mut self, record: &EpisodeRecord);

    fn flush(&mut self) {}
}

/// Sink that discards all records.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EpisodeSink for NoopSink {
    fn log_episode(&mut self, _record: &EpisodeRecord) {
        // intentionally no-op
    }
}

/// JSONL file sink, one record per line.
pub struct JsonlSink {
    writer: BufWriter<File>,
}

impl JsonlSink {
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

impl EpisodeSink for JsonlSink {
    fn log_episode(&mut self, record: &EpisodeRecord) {
        // Telemetry must not crash training, so I/O errors are
        // deliberately ignored here.
        if let Ok(line) = serde_json::to_string(record) {
            let _ = writeln!(self.writer, "{line}");
        }
    }

    fn flush(&mut self) {
        let _ = self.writer.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(episode: u32) -> EpisodeRecord {
        EpisodeRecord {
            episode,
            epsilon: 1.0 - episode as f64 / 10.0,
            simulation_time: 1.25,
            training_time: 0.5,
            reward: -42.0,
            cumulative_wait: 310.0,
            avg_queue_length: 2.6,
            target_synced: episode == 4,
        }
    }

    #[test]
    fn jsonl_sink_writes_one_line_per_episode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("episodes.jsonl");

        let mut sink = JsonlSink::create(&path).unwrap();
        for episode in 0..5 {
            sink.log_episode(&record(episode));
        }
        sink.flush();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);

        let parsed: EpisodeRecord = serde_json::from_str(lines[4]).unwrap();
        assert_eq!(parsed, record(4));
    }
}
