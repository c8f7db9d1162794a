//! Task artifacts on disk.
//!
//! ```text
//! <data_dir>/
//!   <task_id>/             working directory while the task is active
//!     screenshots/0.png
//!     trace.zip
//!     actions.json
//!   <task_id>.zip          final archive, the only thing left after packaging
//! ```

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::driver::BrowserDriver;
use crate::error::AssemblyError;
use crate::types::{ActionRecord, TaskSession};

pub const ACTIONS_FILE: &str = "actions.json";
pub const TRACE_FILE: &str = "trace.zip";
pub const SCREENSHOTS_DIR: &str = "screenshots";

/// Persisted form of a finished task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFile {
    pub task_id: String,
    pub task_description: String,
    pub website: String,
    pub timestamp: DateTime<Local>,
    pub actions: Vec<ActionRecord>,
}

impl From<&TaskSession> for TaskFile {
    fn from(session: &TaskSession) -> Self {
        Self {
            task_id: session.task_id.clone(),
            task_description: session.description.clone(),
            website: session.url.clone(),
            timestamp: session.started_at,
            actions: session.actions.clone(),
        }
    }
}

/// Screenshot and markup taken just before an action runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Capture {
    /// Relative to the data directory.
    pub screenshot: Option<String>,
    pub snapshot: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Assembler {
    data_dir: PathBuf,
}

impl Assembler {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn task_dir(&self, task_id: &str) -> PathBuf {
        self.data_dir.join(task_id)
    }

    pub fn trace_path(&self, task_id: &str) -> PathBuf {
        self.task_dir(task_id).join(TRACE_FILE)
    }

    pub fn archive_path(&self, task_id: &str) -> PathBuf {
        self.data_dir.join(format!("{task_id}.zip"))
    }

    pub fn prepare(&self, task_id: &str) -> Result<(), AssemblyError> {
        std::fs::create_dir_all(self.task_dir(task_id).join(SCREENSHOTS_DIR))?;
        Ok(())
    }

    /// Screenshot `<index>.png` plus the page markup. Each half is best-effort.
    ///
    /// The recorded screenshot path is the archive entry name, so it stays
    /// valid once the task is packaged.
    pub async fn capture<D: BrowserDriver + ?Sized>(
        &self,
        driver: &D,
        task_id: &str,
        index: usize,
    ) -> Capture {
        let relative = format!("{SCREENSHOTS_DIR}/{index}.png");
        let screenshot = match driver.screenshot(&self.task_dir(task_id).join(&relative)).await {
            Ok(()) => Some(relative),
            Err(e) => {
                warn!(error = %e, index, "screenshot failed");
                None
            }
        };
        let snapshot = match driver.outer_html().await {
            Ok(html) => Some(html),
            Err(e) => {
                warn!(error = %e, index, "markup snapshot failed");
                None
            }
        };
        Capture {
            screenshot,
            snapshot,
        }
    }

    pub fn write_actions(&self, session: &TaskSession) -> Result<PathBuf, AssemblyError> {
        let dir = self.task_dir(&session.task_id);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(ACTIONS_FILE);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        serde_json::to_writer_pretty(file, &TaskFile::from(session))?;
        Ok(path)
    }

    pub fn read_actions(path: &Path) -> Result<TaskFile, AssemblyError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Bundle the task directory into `<task_id>.zip` and remove the directory.
    ///
    /// The trace archive is reused in append mode so the result is a single
    /// self-contained file. Runs on the blocking pool.
    pub async fn package(&self, task_id: &str) -> Result<PathBuf, AssemblyError> {
        let this = self.clone();
        let task_id = task_id.to_string();
        tokio::task::spawn_blocking(move || this.package_blocking(&task_id)).await?
    }

    fn package_blocking(&self, task_id: &str) -> Result<PathBuf, AssemblyError> {
        let dir = self.task_dir(task_id);
        let trace = dir.join(TRACE_FILE);
        let options = SimpleFileOptions::default();

        let mut zip = if trace.exists() {
            let file = OpenOptions::new().read(true).write(true).open(&trace)?;
            ZipWriter::new_append(file)?
        } else {
            warn!(task_id, "no execution trace on disk, packaging without it");
            ZipWriter::new(File::create(&trace)?)
        };

        zip.start_file(ACTIONS_FILE, options)?;
        zip.write_all(&std::fs::read(dir.join(ACTIONS_FILE))?)?;

        for path in sorted_screenshots(&dir.join(SCREENSHOTS_DIR))? {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            zip.start_file(format!("{SCREENSHOTS_DIR}/{name}"), options)?;
            zip.write_all(&std::fs::read(&path)?)?;
        }
        zip.finish()?;

        let archive = self.archive_path(task_id);
        std::fs::rename(&trace, &archive)?;
        if let Err(e) = std::fs::remove_dir_all(&dir) {
            warn!(error = %e, dir = %dir.display(), "could not remove task working directory");
        }
        info!(archive = %archive.display(), "task archive written");
        Ok(archive)
    }
}

/// Screenshots in capture order (`2.png` before `10.png`).
fn sorted_screenshots(dir: &Path) -> Result<Vec<PathBuf>, AssemblyError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut shots: Vec<(u64, PathBuf)> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter_map(|p| {
            let index = p.file_stem()?.to_str()?.parse().ok()?;
            Some((index, p))
        })
        .collect();
    shots.sort_by_key(|(i, _)| *i);
    Ok(shots.into_iter().map(|(_, p)| p).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::TraceRecorder;
    use crate::types::{ActionKind, ElementDescriptor};

    fn session() -> TaskSession {
        let mut s = TaskSession::new("buy socks", "https://shop.example");
        s.actions.push(ActionRecord {
            kind: ActionKind::Type,
            value: Some("wool socks".into()),
            element: ElementDescriptor {
                tag_name: "INPUT".into(),
                xpath: Some("/html[1]/body[1]/input[1]".into()),
                id: Some("q".into()),
                text_content: String::new(),
                value: Some(String::new()),
                attributes: [("name".to_string(), "q".to_string())].into(),
            },
            secondary_elements: vec![],
            timestamp: Local::now(),
            screenshot: Some("screenshots/0.png".into()),
            snapshot: Some("<html></html>".into()),
            executed: true,
        });
        s
    }

    #[test]
    fn actions_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let assembler = Assembler::new(dir.path());
        let s = session();
        let path = assembler.write_actions(&s).unwrap();
        let back = Assembler::read_actions(&path).unwrap();
        assert_eq!(back, TaskFile::from(&s));
        assert_eq!(back.actions[0].kind, ActionKind::Type);
    }

    #[test]
    fn kinds_are_lowercase_in_json() {
        let json = serde_json::to_value(TaskFile::from(&session())).unwrap();
        assert_eq!(json["actions"][0]["kind"], "type");
        assert_eq!(json["actions"][0]["element"]["tagName"], "INPUT");
    }

    #[tokio::test]
    async fn package_appends_to_trace_archive() {
        let dir = tempfile::tempdir().unwrap();
        let assembler = Assembler::new(dir.path());
        let s = session();
        assembler.prepare(&s.task_id).unwrap();

        let shots = assembler.task_dir(&s.task_id).join(SCREENSHOTS_DIR);
        for i in [0, 1, 10, 2] {
            std::fs::write(shots.join(format!("{i}.png")), [i as u8]).unwrap();
        }
        let mut trace = TraceRecorder::default();
        trace.record("click", None, None);
        trace.write_zip(&assembler.trace_path(&s.task_id)).unwrap();
        assembler.write_actions(&s).unwrap();

        let archive = assembler.package(&s.task_id).await.unwrap();
        assert_eq!(archive, dir.path().join(format!("{}.zip", s.task_id)));
        assert!(!assembler.task_dir(&s.task_id).exists());

        let zip = zip::ZipArchive::new(File::open(&archive).unwrap()).unwrap();
        let names: Vec<&str> = zip.file_names().collect();
        for expected in [
            "trace.json",
            "actions.json",
            "screenshots/0.png",
            "screenshots/1.png",
            "screenshots/2.png",
            "screenshots/10.png",
        ] {
            assert!(names.contains(&expected), "missing {expected}");
        }
        for action in &s.actions {
            let shot = action.screenshot.as_deref().unwrap();
            assert!(names.contains(&shot), "{shot} is not in the archive");
        }
    }

    #[tokio::test]
    async fn package_without_trace_still_produces_archive() {
        let dir = tempfile::tempdir().unwrap();
        let assembler = Assembler::new(dir.path());
        let s = session();
        assembler.prepare(&s.task_id).unwrap();
        assembler.write_actions(&s).unwrap();

        let archive = assembler.package(&s.task_id).await.unwrap();
        let zip = zip::ZipArchive::new(File::open(&archive).unwrap()).unwrap();
        assert_eq!(zip.len(), 1);
    }
}
