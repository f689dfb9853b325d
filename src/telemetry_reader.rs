// THEORY:
// The `telemetry_reader` module is the engine's input boundary. A `FrameSource`
// yields a log file's frames one at a time, in file order, so a run never holds more
// than a handful of frames in memory no matter how large the log is.
//
// Errors are split by blast radius. Failing to open or read the file is fatal for
// that file. A single line that cannot be decoded is reported as a recoverable,
// per-frame error, and the source carries on with the next line.
//
// The on-disk format is JSON lines: one object per frame with a timestamp, an intent,
// the past velocity states and base64-encoded camera images.

use crate::core_modules::frame_sample::{CameraPosition, FrameSample, Intent, VelocitySample};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("cannot open log file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error while reading log: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed frame on line {line}: {reason}")]
    Malformed { line: u64, reason: String },
}

impl ReadError {
    /// Malformed frames can be skipped; everything else ends the file.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ReadError::Malformed { .. })
    }
}

/// An ordered, streaming supply of frames from one log file.
pub trait FrameSource: Send {
    /// Identifier of the file being read, usually its base name.
    fn file_id(&self) -> &str;

    /// The next frame in file order, or `None` at end of file.
    fn next_frame(&mut self) -> Option<Result<FrameSample, ReadError>>;
}

/// One line of a JSON-lines driving log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    #[serde(default)]
    pub timestamp_micros: i64,
    #[serde(default)]
    pub intent: Intent,
    #[serde(default)]
    pub past_states: Vec<VelocitySample>,
    /// Base64-encoded camera images.
    #[serde(default)]
    pub images: BTreeMap<CameraPosition, String>,
}

impl LogLine {
    pub fn from_frame(frame: &FrameSample) -> Self {
        Self {
            timestamp_micros: frame.timestamp_micros,
            intent: frame.intent,
            past_states: frame.velocities.clone(),
            images: frame
                .images
                .iter()
                .map(|(position, bytes)| (*position, BASE64.encode(bytes)))
                .collect(),
        }
    }

    fn into_frame(self, sequence: u64) -> FrameSample {
        let images = self
            .images
            .into_iter()
            .filter_map(|(position, encoded)| match BASE64.decode(encoded.as_bytes()) {
                Ok(bytes) => Some((position, bytes)),
                Err(e) => {
                    warn!(sequence, ?position, error = %e, "dropping camera image with invalid base64");
                    None
                }
            })
            .collect();
        FrameSample {
            sequence,
            timestamp_micros: self.timestamp_micros,
            intent: self.intent,
            velocities: self.past_states,
            images,
        }
    }
}

/// Reads a JSON-lines log file frame by frame.
pub struct JsonLinesSource {
    file_id: String,
    lines: std::io::Lines<BufReader<File>>,
    line_number: u64,
    sequence: u64,
}

impl JsonLinesSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ReadError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ReadError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let file_id = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self {
            file_id,
            lines: BufReader::new(file).lines(),
            line_number: 0,
            sequence: 0,
        })
    }
}

impl FrameSource for JsonLinesSource {
    fn file_id(&self) -> &str {
        &self.file_id
    }

    fn next_frame(&mut self) -> Option<Result<FrameSample, ReadError>> {
        loop {
            let next = self.lines.next()?;
            self.line_number += 1;
            let line = match next {
                Ok(line) => line,
                // The undecodable bytes are already consumed; the next line is readable.
                Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                    self.sequence += 1;
                    return Some(Err(ReadError::Malformed {
                        line: self.line_number,
                        reason: e.to_string(),
                    }));
                }
                Err(e) => return Some(Err(ReadError::Io(e))),
            };
            if line.trim().is_empty() {
                continue;
            }
            self.sequence += 1;

            return Some(
                serde_json::from_str::<LogLine>(&line)
                    .map(|parsed| parsed.into_frame(self.sequence))
                    .map_err(|e| ReadError::Malformed {
                        line: self.line_number,
                        reason: e.to_string(),
                    }),
            );
        }
    }
}

/// A source over frames already in memory.
pub struct MemorySource {
    file_id: String,
    frames: VecDeque<Result<FrameSample, ReadError>>,
}

impl MemorySource {
    pub fn new(file_id: impl Into<String>, frames: Vec<Result<FrameSample, ReadError>>) -> Self {
        Self {
            file_id: file_id.into(),
            frames: frames.into(),
        }
    }

    pub fn from_frames(file_id: impl Into<String>, frames: Vec<FrameSample>) -> Self {
        Self::new(file_id, frames.into_iter().map(Ok).collect())
    }
}

impl FrameSource for MemorySource {
    fn file_id(&self) -> &str {
        &self.file_id
    }

    fn next_frame(&mut self) -> Option<Result<FrameSample, ReadError>> {
        self.frames.pop_front()
    }
}
