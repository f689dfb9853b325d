// THEORY:
// This file is the main entry point for the `motion_sentinel` library crate. It
// exposes the engine that scans recorded driving logs for safety-relevant edge cases:
// hard braking, evasive lateral maneuvers and abrupt jerk.
//
// The layers, leaves first:
// - `telemetry_reader` streams `FrameSample`s out of a log file.
// - `core_modules` holds the analysis itself: kinematics, the edge-case classifier,
//   the panorama stitcher and offline threshold calibration.
// - `pipeline` runs that stack on one frame; `parallel_pipeline` runs it over a whole
//   file on a worker pool while keeping output in file order.
// - `persistence` is the narrow write contract to storage, and `summary` reports what
//   a run did.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod parallel_pipeline;
pub mod persistence;
pub mod pipeline;
pub mod summary;
pub mod telemetry_reader;

pub use config::{EngineConfig, ThresholdConfig};
pub use core_modules::edge_case::{EdgeCaseClassifier, EdgeCaseKind, EdgeCaseRecord, normalized_severity};
pub use core_modules::frame_sample::{CameraPosition, FrameSample, Intent, VelocitySample};
pub use core_modules::kinematics::MotionAggregates;
pub use core_modules::panorama::PanoramaThumbnail;
pub use error::EngineError;
pub use parallel_pipeline::{CancelHandle, CancelToken, ParallelPipeline};
pub use persistence::{FrameId, FrameRecord, FrameWriter, InMemoryWriter, JsonLinesWriter};
pub use summary::{FileSummary, RunSummary};
