//! Execution trace: a timeline of driver calls with page frames.
//!
//! Written as a zip holding `trace.json` (the event list) and `frames/<n>.png`
//! (a frame after each page interaction). The assembler later appends the
//! task's own files to this same archive.

use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::error::AssemblyError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub at: DateTime<Local>,
    pub call: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame: Option<String>,
}

#[derive(Debug, Default)]
pub struct TraceRecorder {
    events: Vec<TraceEvent>,
    frames: Vec<Vec<u8>>,
}

impl TraceRecorder {
    pub fn record(&mut self, call: &str, target: Option<String>, error: Option<String>) {
        self.events.push(TraceEvent {
            at: Local::now(),
            call: call.to_string(),
            target,
            error,
            frame: None,
        });
    }

    /// Attach a PNG to the most recent event.
    pub fn attach_frame(&mut self, png: Vec<u8>) {
        let name = format!("frames/{}.png", self.frames.len());
        if let Some(last) = self.events.last_mut() {
            last.frame = Some(name);
            self.frames.push(png);
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn write_zip(&self, path: &Path) -> Result<(), AssemblyError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(path)?;
        let mut zip = ZipWriter::new(file);
        let options = SimpleFileOptions::default();

        zip.start_file("trace.json", options)?;
        serde_json::to_writer_pretty(&mut zip, &self.events)?;

        for (i, png) in self.frames.iter().enumerate() {
            zip.start_file(format!("frames/{i}.png"), options)?;
            zip.write_all(png)?;
        }
        zip.finish()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_attach_to_latest_event() {
        let mut trace = TraceRecorder::default();
        trace.attach_frame(vec![1]); // nothing to attach to yet
        trace.record("click", Some("css=#go".into()), None);
        trace.attach_frame(vec![1, 2, 3]);
        assert_eq!(trace.len(), 1);
        assert_eq!(trace.events[0].frame.as_deref(), Some("frames/0.png"));
        assert_eq!(trace.frames.len(), 1);
    }

    #[test]
    fn writes_readable_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t").join("trace.zip");
        let mut trace = TraceRecorder::default();
        trace.record("navigate", Some("https://example.com".into()), None);
        trace.attach_frame(b"png".to_vec());
        trace.write_zip(&path).unwrap();

        let mut archive = zip::ZipArchive::new(std::fs::File::open(&path).unwrap()).unwrap();
        assert_eq!(archive.len(), 2);
        let events: Vec<TraceEvent> =
            serde_json::from_reader(archive.by_name("trace.json").unwrap()).unwrap();
        assert_eq!(events[0].call, "navigate");
    }
}
