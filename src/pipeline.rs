// THEORY:
// The `pipeline` module is the per-frame API of the engine. It encapsulates the full
// analytical stack into one call: give it a raw `FrameSample`, get back the record to
// store and the edge cases found on it.
//
// Each frame is independent of every other frame, so `FrameAnalyzer` holds nothing
// but the run's immutable settings. That is what lets the parallel pipeline share one
// analyzer across all of its workers.

use crate::config::{EngineConfig, ThresholdConfig};
use crate::core_modules::edge_case::{EdgeCaseClassifier, EdgeCaseRecord};
use crate::core_modules::frame_sample::FrameSample;
use crate::core_modules::kinematics::{self, KinematicsError};
use crate::core_modules::panorama::{self, PanoramaThumbnail};
use crate::persistence::FrameRecord;

/// A frame ready for hand-off to the writer.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameAnalysis {
    pub record: FrameRecord,
    pub edge_cases: Vec<EdgeCaseRecord>,
}

impl FrameAnalysis {
    pub fn is_flagged(&self) -> bool {
        !self.edge_cases.is_empty()
    }
}

/// Stateless per-frame analysis stack.
#[derive(Debug, Clone)]
pub struct FrameAnalyzer {
    classifier: EdgeCaseClassifier,
    build_panoramas: bool,
}

impl FrameAnalyzer {
    pub fn new(thresholds: ThresholdConfig, config: &EngineConfig) -> Self {
        Self {
            classifier: EdgeCaseClassifier::new(thresholds),
            build_panoramas: config.build_panoramas,
        }
    }

    pub fn thresholds(&self) -> &ThresholdConfig {
        self.classifier.thresholds()
    }

    pub fn analyze(&self, file_id: &str, frame: FrameSample) -> Result<FrameAnalysis, KinematicsError> {
        // Stage 1: Kinematics
        let motion = kinematics::extract(&frame.velocities)?;

        // Stage 2: Classification
        let edge_cases = self.classifier.classify(&motion);

        // Stage 3: Imagery, for flagged frames only
        let thumbnail: Option<PanoramaThumbnail> = if self.build_panoramas && !edge_cases.is_empty() {
            panorama::stitch(&frame.images)
        } else {
            None
        };

        Ok(FrameAnalysis {
            record: FrameRecord {
                sequence: frame.sequence,
                file_id: file_id.to_string(),
                timestamp_micros: frame.timestamp_micros,
                intent: frame.intent,
                motion,
                thumbnail,
            },
            edge_cases,
        })
    }
}
