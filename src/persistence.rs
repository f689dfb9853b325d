// THEORY:
// The `persistence` module is the engine's output boundary. The engine hands each
// finished frame, together with its edge cases, to a `FrameWriter` in one call and
// waits for it to return. The writer, not the engine, decides the frame's durable
// identity; edge cases are always keyed to that identity and never to the per-file
// sequence number, which repeats across files.
//
// Two writers are provided. `InMemoryWriter` keeps everything in a `Vec` and can be
// told to fail, which makes the pipeline testable without touching disk.
// `JsonLinesWriter` appends tagged JSON lines to a file and resumes its id counter
// from whatever the file already holds.

use crate::core_modules::edge_case::{EdgeCaseKind, EdgeCaseRecord};
use crate::core_modules::frame_sample::Intent;
use crate::core_modules::kinematics::MotionAggregates;
use crate::core_modules::panorama::PanoramaThumbnail;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, warn};

/// Durable, globally unique frame identity assigned by a writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FrameId(pub u64);

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything stored about one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRecord {
    /// Position within the source file. Not unique across files.
    pub sequence: u64,
    pub file_id: String,
    pub timestamp_micros: i64,
    pub intent: Intent,
    pub motion: MotionAggregates,
    pub thumbnail: Option<PanoramaThumbnail>,
}

#[derive(Debug, Error)]
pub enum WriterError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("write rejected: {0}")]
    Rejected(String),
    #[error("storage connection lost: {0}")]
    Disconnected(String),
}

impl WriterError {
    /// Fatal errors abort the run; the rest are retried once and then skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(self, WriterError::Disconnected(_))
    }
}

/// Narrow write contract between the engine and storage.
pub trait FrameWriter: Send {
    /// Durably stores one frame and its edge cases, returning the frame's identity.
    /// The write must be visible to readers when this returns.
    fn write(&mut self, frame: &FrameRecord, edge_cases: &[EdgeCaseRecord]) -> Result<FrameId, WriterError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredFrame {
    pub id: FrameId,
    pub record: FrameRecord,
    pub edge_cases: Vec<EdgeCaseRecord>,
}

/// A writer that keeps everything in memory.
#[derive(Debug, Default)]
pub struct InMemoryWriter {
    frames: Vec<StoredFrame>,
    last_id: u64,
    failures_remaining: usize,
    disconnected: bool,
}

impl InMemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` writes fail with a transient error.
    pub fn fail_next(&mut self, count: usize) {
        self.failures_remaining = count;
    }

    /// Makes every following write fail fatally.
    pub fn disconnect(&mut self) {
        self.disconnected = true;
    }

    pub fn frames(&self) -> &[StoredFrame] {
        &self.frames
    }

    pub fn edge_case_count(&self) -> usize {
        self.frames.iter().map(|f| f.edge_cases.len()).sum()
    }
}

impl FrameWriter for InMemoryWriter {
    fn write(&mut self, frame: &FrameRecord, edge_cases: &[EdgeCaseRecord]) -> Result<FrameId, WriterError> {
        if self.disconnected {
            return Err(WriterError::Disconnected("in-memory writer disconnected".to_string()));
        }
        if self.failures_remaining > 0 {
            self.failures_remaining -= 1;
            return Err(WriterError::Rejected("injected failure".to_string()));
        }
        self.last_id += 1;
        let id = FrameId(self.last_id);
        self.frames.push(StoredFrame {
            id,
            record: frame.clone(),
            edge_cases: edge_cases.to_vec(),
        });
        Ok(id)
    }
}

/// One line of the JSON-lines store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum StoredLine {
    Frame(FrameLine),
    EdgeCase(EdgeCaseLine),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameLine {
    pub id: FrameId,
    pub sequence: u64,
    pub file_id: String,
    pub timestamp_micros: i64,
    pub intent: Intent,
    pub motion: MotionAggregates,
    /// Base64 JPEG thumbnail.
    pub panorama_thumbnail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeCaseLine {
    pub frame_id: FrameId,
    pub edge_case_type: EdgeCaseKind,
    pub severity: f64,
    pub reason: String,
}

/// Append-only storage that can drop a torn tail.
pub trait AppendLog: Write + Send {
    /// Length of everything written so far.
    fn committed_len(&self) -> std::io::Result<u64>;

    /// Discards everything past `len`.
    fn roll_back(&mut self, len: u64) -> std::io::Result<()>;
}

impl AppendLog for File {
    fn committed_len(&self) -> std::io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn roll_back(&mut self, len: u64) -> std::io::Result<()> {
        self.set_len(len)
    }
}

/// Appends frames and edge cases to a JSON-lines file.
pub struct JsonLinesWriter<L: AppendLog = File> {
    path: PathBuf,
    log: L,
    last_id: u64,
}

impl JsonLinesWriter<File> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, WriterError> {
        let path = path.as_ref().to_path_buf();
        let last_id = if path.exists() {
            load(&path)?
                .iter()
                .filter_map(|line| match line {
                    StoredLine::Frame(frame) => Some(frame.id.0),
                    StoredLine::EdgeCase(_) => None,
                })
                .max()
                .unwrap_or(0)
        } else {
            0
        };
        let log = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, log, last_id })
    }
}

impl<L: AppendLog> JsonLinesWriter<L> {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<L: AppendLog> FrameWriter for JsonLinesWriter<L> {
    fn write(&mut self, frame: &FrameRecord, edge_cases: &[EdgeCaseRecord]) -> Result<FrameId, WriterError> {
        let id = FrameId(self.last_id + 1);

        let mut buffer = serde_json::to_string(&StoredLine::Frame(FrameLine {
            id,
            sequence: frame.sequence,
            file_id: frame.file_id.clone(),
            timestamp_micros: frame.timestamp_micros,
            intent: frame.intent,
            motion: frame.motion,
            panorama_thumbnail: frame.thumbnail.as_ref().map(|t| BASE64.encode(&t.jpeg)),
        }))?;
        buffer.push('\n');
        for edge_case in edge_cases {
            buffer.push_str(&serde_json::to_string(&StoredLine::EdgeCase(EdgeCaseLine {
                frame_id: id,
                edge_case_type: edge_case.kind,
                severity: edge_case.severity,
                reason: edge_case.reason.clone(),
            }))?);
            buffer.push('\n');
        }

        // One write per frame so a frame and its edge cases land together. A torn
        // append is cut off again so a retry starts on a clean line.
        let committed = self.log.committed_len()?;
        if let Err(e) = self.log.write_all(buffer.as_bytes()).and_then(|_| self.log.flush()) {
            if let Err(rollback) = self.log.roll_back(committed) {
                error!(path = %self.path.display(), error = %rollback, "cannot remove partial frame write");
                return Err(WriterError::Disconnected(format!(
                    "store left with a partial frame after '{e}': {rollback}"
                )));
            }
            return Err(e.into());
        }
        self.last_id = id.0;
        Ok(id)
    }
}

/// Reads every parseable line of a JSON-lines store.
pub fn load(path: impl AsRef<Path>) -> Result<Vec<StoredLine>, WriterError> {
    let reader = BufReader::new(File::open(path.as_ref())?);
    let mut lines = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(stored) => lines.push(stored),
            Err(e) => warn!(line = index + 1, error = %e, "ignoring unreadable store line"),
        }
    }
    Ok(lines)
}
