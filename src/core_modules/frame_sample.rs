// THEORY:
// The `frame_sample` module defines the raw input unit of the engine: a single
// sampled instant of a driving log. A `FrameSample` is produced by a telemetry
// source and is read-only to everything downstream of it.
//
// Key architectural principles:
// 1.  **Raw, Not Derived**: The sample carries exactly what the log recorded: a short
//     velocity history, an intent label, and the encoded camera views. Nothing here
//     is computed; derivation belongs to the `kinematics` module.
// 2.  **Axis Convention**: `vx` is longitudinal (forward/braking) and `vy` is lateral
//     (turning). Every later stage relies on this convention for its sign logic.
// 3.  **Sparse Imagery**: A frame may carry any subset of the three front cameras.
//     Images stay encoded until the panorama stage needs them, so frames that never
//     get flagged never pay the decode cost.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// One entry of a frame's motion history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VelocitySample {
    /// Sample time in seconds.
    pub t: f64,
    /// Longitudinal velocity in m/s.
    pub vx: f64,
    /// Lateral velocity in m/s.
    pub vy: f64,
}

impl VelocitySample {
    pub fn new(t: f64, vx: f64, vy: f64) -> Self {
        Self { t, vx, vy }
    }

    pub fn speed(&self) -> f64 {
        (self.vx * self.vx + self.vy * self.vy).sqrt()
    }
}

/// Front camera positions, in panorama order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CameraPosition {
    Left,
    Center,
    Right,
}

impl CameraPosition {
    /// Left to right, the order views are joined in.
    pub const ALL: [CameraPosition; 3] = [CameraPosition::Left, CameraPosition::Center, CameraPosition::Right];
}

/// Coarse driving-maneuver label attached to a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    #[default]
    Unknown,
    GoStraight,
    GoLeft,
    GoRight,
}

impl Intent {
    /// Maps the integer codes used by the recorded logs.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => Intent::GoStraight,
            2 => Intent::GoLeft,
            3 => Intent::GoRight,
            _ => Intent::Unknown,
        }
    }

    pub fn from_label(label: &str) -> Self {
        match label {
            "GO_STRAIGHT" => Intent::GoStraight,
            "GO_LEFT" => Intent::GoLeft,
            "GO_RIGHT" => Intent::GoRight,
            _ => Intent::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Unknown => "UNKNOWN",
            Intent::GoStraight => "GO_STRAIGHT",
            Intent::GoLeft => "GO_LEFT",
            Intent::GoRight => "GO_RIGHT",
        }
    }
}

impl<'de> Deserialize<'de> for Intent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Code(i64),
            Label(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Code(code) => Intent::from_code(code),
            Raw::Label(label) => Intent::from_label(&label),
        })
    }
}

/// A single sampled instant of a driving log.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSample {
    /// 1-based position of this frame within its log file. Not unique across files.
    pub sequence: u64,
    /// Frame capture time in microseconds.
    pub timestamp_micros: i64,
    pub intent: Intent,
    /// The motion history recorded for this frame, oldest first.
    pub velocities: Vec<VelocitySample>,
    /// Encoded (JPEG/PNG) camera views keyed by position.
    pub images: BTreeMap<CameraPosition, Vec<u8>>,
}

impl FrameSample {
    pub fn image(&self, position: CameraPosition) -> Option<&[u8]> {
        self.images.get(&position).map(|bytes| bytes.as_slice())
    }
}
