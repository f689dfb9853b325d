// THEORY:
// The `summary` module turns a run into something an operator can read. Each file
// produces a `FileSummary` (what was read, written, skipped and flagged), and a
// `RunSummary` folds those together with dataset-wide statistics: frames per intent,
// severity spread and the motion extremes useful for later threshold recalibration.

use crate::core_modules::edge_case::{EdgeCaseKind, EdgeCaseRecord};
use crate::core_modules::frame_sample::Intent;
use crate::persistence::FrameRecord;
use std::collections::BTreeMap;
use tracing::{error, info};

/// Running min/max/mean of a scalar.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Spread {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    sum: f64,
}

impl Spread {
    pub fn observe(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    fn merge(&mut self, other: &Spread) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = *other;
            return;
        }
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.count += other.count;
        self.sum += other.sum;
    }
}

/// Dataset statistics over written frames.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MotionStats {
    pub frames_by_intent: BTreeMap<Intent, u64>,
    pub edge_cases_by_kind: BTreeMap<EdgeCaseKind, u64>,
    pub severity: Spread,
    pub accel_x_min: Option<f64>,
    pub speed_max: Option<f64>,
    pub accel_y_max: Option<f64>,
    pub jerk_x_max: Option<f64>,
}

impl MotionStats {
    pub fn observe(&mut self, record: &FrameRecord, edge_cases: &[EdgeCaseRecord]) {
        *self.frames_by_intent.entry(record.intent).or_default() += 1;
        for edge_case in edge_cases {
            *self.edge_cases_by_kind.entry(edge_case.kind).or_default() += 1;
            self.severity.observe(edge_case.severity);
        }
        let motion = &record.motion;
        self.accel_x_min = lowest(self.accel_x_min, motion.accel_x_min);
        self.speed_max = highest(self.speed_max, Some(motion.speed_max));
        self.accel_y_max = highest(self.accel_y_max, motion.accel_y_max);
        self.jerk_x_max = highest(self.jerk_x_max, motion.jerk_x_max);
    }

    pub fn edge_case_total(&self) -> u64 {
        self.edge_cases_by_kind.values().sum()
    }

    fn merge(&mut self, other: &MotionStats) {
        for (intent, count) in &other.frames_by_intent {
            *self.frames_by_intent.entry(*intent).or_default() += count;
        }
        for (kind, count) in &other.edge_cases_by_kind {
            *self.edge_cases_by_kind.entry(*kind).or_default() += count;
        }
        self.severity.merge(&other.severity);
        self.accel_x_min = lowest(self.accel_x_min, other.accel_x_min);
        self.speed_max = highest(self.speed_max, other.speed_max);
        self.accel_y_max = highest(self.accel_y_max, other.accel_y_max);
        self.jerk_x_max = highest(self.jerk_x_max, other.jerk_x_max);
    }
}

fn lowest(current: Option<f64>, candidate: Option<f64>) -> Option<f64> {
    match (current, candidate) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn highest(current: Option<f64>, candidate: Option<f64>) -> Option<f64> {
    match (current, candidate) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

/// Outcome of processing one log file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileSummary {
    pub file_id: String,
    /// Frames pulled from the source, including malformed ones.
    pub frames_read: u64,
    pub frames_written: u64,
    /// Frames dropped because their line or velocity history was malformed.
    pub frames_skipped_malformed: u64,
    /// Frames dropped after the write retry also failed.
    pub frames_skipped_write_failure: u64,
    pub thumbnails: u64,
    /// In-flight frames dropped without being written when the run was cancelled.
    pub frames_discarded: u64,
    /// True when the run was cancelled before the file was finished.
    pub cancelled: bool,
    pub stats: MotionStats,
}

impl FileSummary {
    pub fn new(file_id: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            ..Self::default()
        }
    }

    pub fn edge_cases(&self, kind: EdgeCaseKind) -> u64 {
        self.stats.edge_cases_by_kind.get(&kind).copied().unwrap_or(0)
    }

    pub fn log(&self) {
        info!(
            file = %self.file_id,
            frames_read = self.frames_read,
            frames_written = self.frames_written,
            skipped_malformed = self.frames_skipped_malformed,
            skipped_write_failure = self.frames_skipped_write_failure,
            hard_brake = self.edge_cases(EdgeCaseKind::HardBrake),
            evasive_maneuver = self.edge_cases(EdgeCaseKind::EvasiveManeuver),
            high_jerk = self.edge_cases(EdgeCaseKind::HighJerk),
            thumbnails = self.thumbnails,
            discarded = self.frames_discarded,
            cancelled = self.cancelled,
            "file processed"
        );
    }
}

/// Aggregate over every file of a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub files: Vec<FileSummary>,
    pub stats: MotionStats,
}

impl RunSummary {
    pub fn add(&mut self, file: FileSummary) {
        self.stats.merge(&file.stats);
        self.files.push(file);
    }

    pub fn frames_written(&self) -> u64 {
        self.files.iter().map(|f| f.frames_written).sum()
    }

    pub fn log(&self) {
        info!(
            files = self.files.len(),
            frames_written = self.frames_written(),
            edge_cases = self.stats.edge_case_total(),
            "run complete"
        );
        for (intent, count) in &self.stats.frames_by_intent {
            info!(intent = intent.as_str(), frames = count, "frames by intent");
        }
        for (kind, count) in &self.stats.edge_cases_by_kind {
            info!(edge_case = kind.as_str(), count, "edge cases by type");
        }
        if let Some(mean) = self.stats.severity.mean() {
            info!(
                min = self.stats.severity.min,
                max = self.stats.severity.max,
                mean,
                "severity spread"
            );
            if self.stats.severity.max > 1.0 || self.stats.severity.min < 0.0 {
                error!(
                    min = self.stats.severity.min,
                    max = self.stats.severity.max,
                    "severity escaped [0, 1]"
                );
            }
        }
        info!(
            accel_x_min = ?self.stats.accel_x_min,
            speed_max = ?self.stats.speed_max,
            accel_y_max = ?self.stats.accel_y_max,
            jerk_x_max = ?self.stats.jerk_x_max,
            "motion extremes"
        );
    }
}
