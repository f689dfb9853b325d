// THEORY:
// The `edge_case` module is the decision layer of the engine. It compares a frame's
// motion aggregates against the run's thresholds and emits zero or more independent
// edge-case records, each with a normalized severity and a human-readable reason.
//
// Key architectural principles:
// 1.  **One Severity Curve**: Every edge-case type is scored by the same pure
//     function over positive magnitudes. Each type first selects its axis and folds
//     the sign into a magnitude; only then is the shared curve applied.
// 2.  **Independent Types**: Hard braking, evasive maneuvers and high jerk are
//     evaluated separately. A frame crossing two thresholds yields two records, in
//     the fixed order hard_brake, evasive_maneuver, high_jerk.
// 3.  **Unknown Never Triggers**: An aggregate that could not be computed suppresses
//     its edge-case type for the frame. It is never treated as a zero measurement.
// 4.  **Purity**: Classification has no state. The same aggregates and thresholds
//     always produce the same records in the same order.

use crate::config::ThresholdConfig;
use crate::core_modules::kinematics::MotionAggregates;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::error;

/// Severity reaches 1.0 at this multiple of the threshold.
const SATURATION_MULTIPLE: f64 = 3.0;
/// Severities are quantized to 1e-9 so decimal threshold multiples land exactly on
/// 0.0 and 1.0.
const SEVERITY_SCALE: f64 = 1e9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeCaseKind {
    HardBrake,
    EvasiveManeuver,
    HighJerk,
}

impl EdgeCaseKind {
    pub const ALL: [EdgeCaseKind; 3] = [EdgeCaseKind::HardBrake, EdgeCaseKind::EvasiveManeuver, EdgeCaseKind::HighJerk];

    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeCaseKind::HardBrake => "hard_brake",
            EdgeCaseKind::EvasiveManeuver => "evasive_maneuver",
            EdgeCaseKind::HighJerk => "high_jerk",
        }
    }
}

impl fmt::Display for EdgeCaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single flagged event on a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeCaseRecord {
    #[serde(rename = "type")]
    pub kind: EdgeCaseKind,
    /// Normalized to [0.0, 1.0].
    pub severity: f64,
    pub reason: String,
}

/// Maps how far `raw` exceeds `threshold` onto [0, 1], saturating at three times the
/// threshold. Both arguments are magnitudes; callers fold signs in beforehand.
///
/// Always returns a value in [0, 1]. A NaN input, which validated kinematics and
/// thresholds never produce, scores 0.0 and is logged.
pub fn normalized_severity(raw: f64, threshold: f64) -> f64 {
    let t = threshold.abs();
    let span = (SATURATION_MULTIPLE - 1.0) * t;
    let severity = (raw.abs() - t) / span;
    if severity.is_nan() {
        error!(raw, threshold, "severity is undefined; scoring 0.0");
        return 0.0;
    }
    let severity = severity.clamp(0.0, 1.0);
    ((severity * SEVERITY_SCALE).round() / SEVERITY_SCALE).clamp(0.0, 1.0)
}

fn percent_beyond(raw: f64, threshold: f64) -> f64 {
    (raw.abs() - threshold.abs()) / threshold.abs() * 100.0
}

/// Stateless classifier bound to one run's thresholds.
#[derive(Debug, Clone, Copy)]
pub struct EdgeCaseClassifier {
    thresholds: ThresholdConfig,
}

impl EdgeCaseClassifier {
    pub fn new(thresholds: ThresholdConfig) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &ThresholdConfig {
        &self.thresholds
    }

    /// Returns every edge case the aggregates trigger, in canonical order.
    pub fn classify(&self, aggregates: &MotionAggregates) -> Vec<EdgeCaseRecord> {
        [
            self.hard_brake(aggregates),
            self.evasive_maneuver(aggregates),
            self.high_jerk(aggregates),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    fn hard_brake(&self, aggregates: &MotionAggregates) -> Option<EdgeCaseRecord> {
        let accel_x = known(aggregates.accel_x_min)?;
        let threshold = self.thresholds.hard_brake;
        if accel_x > threshold {
            return None;
        }
        Some(EdgeCaseRecord {
            kind: EdgeCaseKind::HardBrake,
            severity: normalized_severity(-accel_x, threshold),
            reason: format!(
                "accel_x={accel_x:.3} m/s² <= threshold {threshold:.3} m/s² ({:.1}% beyond threshold)",
                percent_beyond(accel_x, threshold)
            ),
        })
    }

    fn evasive_maneuver(&self, aggregates: &MotionAggregates) -> Option<EdgeCaseRecord> {
        let accel_y = dominant(known(aggregates.accel_y_min), known(aggregates.accel_y_max))?;
        let threshold = self.thresholds.lateral;
        if accel_y.abs() < threshold {
            return None;
        }
        Some(EdgeCaseRecord {
            kind: EdgeCaseKind::EvasiveManeuver,
            severity: normalized_severity(accel_y.abs(), threshold),
            reason: format!(
                "accel_y={accel_y:.3} m/s², |accel_y| >= threshold {threshold:.3} m/s² ({:.1}% beyond threshold)",
                percent_beyond(accel_y, threshold)
            ),
        })
    }

    fn high_jerk(&self, aggregates: &MotionAggregates) -> Option<EdgeCaseRecord> {
        let (axis, jerk) = match (known(aggregates.jerk_x_max), known(aggregates.jerk_y_max)) {
            (None, None) => return None,
            (Some(x), None) => ("jerk_x", x),
            (None, Some(y)) => ("jerk_y", y),
            (Some(x), Some(y)) if y.abs() > x.abs() => ("jerk_y", y),
            (Some(x), Some(_)) => ("jerk_x", x),
        };
        let threshold = self.thresholds.jerk;
        if jerk.abs() < threshold {
            return None;
        }
        Some(EdgeCaseRecord {
            kind: EdgeCaseKind::HighJerk,
            severity: normalized_severity(jerk.abs(), threshold),
            reason: format!(
                "{axis}={:.3} m/s³ >= threshold {threshold:.3} m/s³ ({:.1}% beyond threshold)",
                jerk.abs(),
                percent_beyond(jerk, threshold)
            ),
        })
    }
}

/// Non-finite aggregates are as unknown as absent ones.
fn known(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

/// The extreme with the larger magnitude, keeping its sign.
fn dominant(min: Option<f64>, max: Option<f64>) -> Option<f64> {
    match (min, max) {
        (Some(lo), Some(hi)) => Some(if lo.abs() > hi.abs() { lo } else { hi }),
        (lo, hi) => lo.or(hi),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calm() -> MotionAggregates {
        MotionAggregates {
            speed_min: 10.0,
            speed_max: 10.0,
            speed_mean: 10.0,
            accel_x_min: Some(0.0),
            accel_x_max: Some(0.0),
            accel_y_min: Some(0.0),
            accel_y_max: Some(0.0),
            jerk_x_max: Some(0.0),
            jerk_y_max: Some(0.0),
        }
    }

    fn classifier() -> EdgeCaseClassifier {
        EdgeCaseClassifier::new(ThresholdConfig { hard_brake: -0.8, lateral: 0.6, jerk: 0.4 })
    }

    fn brake(accel_x_min: f64) -> Vec<EdgeCaseRecord> {
        classifier().classify(&MotionAggregates { accel_x_min: Some(accel_x_min), ..calm() })
    }

    #[test]
    fn hard_brake_severity_table() {
        for (accel, expected) in [(-0.8, 0.0), (-1.6, 0.5), (-2.4, 1.0), (-3.0, 1.0)] {
            let events = brake(accel);
            assert_eq!(events.len(), 1, "accel {accel}");
            assert_eq!(events[0].kind, EdgeCaseKind::HardBrake);
            assert_eq!(events[0].severity, expected, "accel {accel}");
        }
        assert!(brake(-0.5).is_empty());
    }

    #[test]
    fn severity_anchors() {
        for t in [0.4, 0.6, 0.8, 1.3, 2.5] {
            assert_eq!(normalized_severity(t, t), 0.0);
            assert_eq!(normalized_severity(3.0 * t, t), 1.0);
            assert_eq!(normalized_severity(10.0 * t, t), 1.0);
            assert_eq!(normalized_severity(0.5 * t, t), 0.0);
        }
        assert_eq!(normalized_severity(-1.6, -0.8), 0.5);
    }

    #[test]
    fn lateral_at_threshold_triggers_with_zero_severity() {
        let events = classifier().classify(&MotionAggregates { accel_y_max: Some(0.6), ..calm() });
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EdgeCaseKind::EvasiveManeuver);
        assert_eq!(events[0].severity, 0.0);
    }

    #[test]
    fn jerk_at_threshold_triggers_with_zero_severity() {
        let events = classifier().classify(&MotionAggregates { jerk_x_max: Some(0.4), ..calm() });
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EdgeCaseKind::HighJerk);
        assert_eq!(events[0].severity, 0.0);
    }

    #[test]
    fn non_finite_aggregates_never_trigger() {
        let events = classifier().classify(&MotionAggregates {
            accel_x_min: Some(f64::NAN),
            accel_y_max: Some(f64::INFINITY),
            jerk_x_max: Some(f64::NAN),
            ..calm()
        });
        assert!(events.is_empty());
    }

    #[test]
    fn undefined_severity_scores_zero() {
        assert_eq!(normalized_severity(f64::NAN, 0.4), 0.0);
        assert_eq!(normalized_severity(0.4, f64::NAN), 0.0);
        assert_eq!(normalized_severity(f64::INFINITY, 0.4), 1.0);
    }

    #[test]
    fn below_threshold_is_absent_not_zero() {
        let events = classifier().classify(&MotionAggregates {
            accel_x_min: Some(-0.79),
            accel_y_max: Some(0.59),
            jerk_x_max: Some(0.39),
            ..calm()
        });
        assert!(events.is_empty());
    }

    #[test]
    fn lateral_uses_magnitude_of_either_extreme() {
        let events = classifier().classify(&MotionAggregates {
            accel_y_min: Some(-1.2),
            accel_y_max: Some(0.1),
            ..calm()
        });
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EdgeCaseKind::EvasiveManeuver);
        assert_eq!(events[0].severity, 0.5);
        assert!(events[0].reason.contains("accel_y=-1.200"), "{}", events[0].reason);
    }

    #[test]
    fn jerk_picks_the_larger_axis() {
        let events = classifier().classify(&MotionAggregates {
            jerk_x_max: Some(0.5),
            jerk_y_max: Some(1.2),
            ..calm()
        });
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EdgeCaseKind::HighJerk);
        assert_eq!(events[0].severity, 1.0);
        assert!(events[0].reason.starts_with("jerk_y=1.200"));
    }

    #[test]
    fn two_crossings_yield_two_records_in_order() {
        let events = classifier().classify(&MotionAggregates {
            accel_x_min: Some(-1.6),
            accel_y_max: Some(0.9),
            ..calm()
        });
        let kinds: Vec<_> = events.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EdgeCaseKind::HardBrake, EdgeCaseKind::EvasiveManeuver]);
    }

    #[test]
    fn all_three_types_in_canonical_order() {
        let events = classifier().classify(&MotionAggregates {
            accel_x_min: Some(-5.0),
            accel_y_min: Some(-5.0),
            jerk_x_max: Some(5.0),
            ..calm()
        });
        let kinds: Vec<_> = events.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, EdgeCaseKind::ALL.to_vec());
    }

    #[test]
    fn absent_aggregates_suppress_detection() {
        let speed_only = MotionAggregates {
            speed_min: 80.0,
            speed_max: 80.0,
            speed_mean: 80.0,
            accel_x_min: None,
            accel_x_max: None,
            accel_y_min: None,
            accel_y_max: None,
            jerk_x_max: None,
            jerk_y_max: None,
        };
        assert!(classifier().classify(&speed_only).is_empty());
    }

    #[test]
    fn classification_is_repeatable() {
        let aggregates = MotionAggregates {
            accel_x_min: Some(-2.0),
            accel_y_max: Some(0.7),
            jerk_y_max: Some(0.45),
            ..calm()
        };
        let first = classifier().classify(&aggregates);
        let second = classifier().classify(&aggregates);
        assert_eq!(first, second);
    }

    #[test]
    fn reason_reports_percentage() {
        let events = brake(-1.6);
        assert_eq!(
            events[0].reason,
            "accel_x=-1.600 m/s² <= threshold -0.800 m/s² (100.0% beyond threshold)"
        );
    }
}
