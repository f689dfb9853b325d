/// End-to-end tests: JSON-lines log in, JSON-lines store out.
///
/// Run with: cargo test --test pipeline_tests -- --nocapture

use image::{Rgb, RgbImage};
use motion_sentinel::core_modules::calibration;
use motion_sentinel::core_modules::utils::image_helper::encode_jpeg;
use motion_sentinel::persistence::{self, StoredLine};
use motion_sentinel::telemetry_reader::{JsonLinesSource, LogLine};
use motion_sentinel::{
    CameraPosition, CancelHandle, EdgeCaseKind, EngineConfig, FrameSample, Intent, JsonLinesWriter,
    ParallelPipeline, RunSummary, ThresholdConfig, VelocitySample,
};
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn camera(shade: u8) -> Vec<u8> {
    encode_jpeg(&RgbImage::from_pixel(160, 90, Rgb([shade, shade, shade])), 90).unwrap()
}

/// Constant 0.25 s spacing; `delta_vx` and `delta_vy` applied per step.
fn frame(sequence: u64, delta_vx: f64, delta_vy: f64, with_images: bool) -> FrameSample {
    let velocities = (0..4)
        .map(|i| VelocitySample::new(i as f64 * 0.25, 15.0 + delta_vx * i as f64, delta_vy * i as f64))
        .collect();
    let images = if with_images {
        BTreeMap::from([
            (CameraPosition::Left, camera(40)),
            (CameraPosition::Center, camera(128)),
            (CameraPosition::Right, camera(220)),
        ])
    } else {
        BTreeMap::new()
    };
    FrameSample {
        sequence,
        timestamp_micros: 1_600_000_000_000_000 + sequence as i64 * 250_000,
        intent: if delta_vy != 0.0 { Intent::GoLeft } else { Intent::GoStraight },
        velocities,
        images,
    }
}

fn write_log(dir: &Path, name: &str, frames: &[FrameSample], extra_lines: &[&str]) -> PathBuf {
    let path = dir.join(name);
    let mut file = File::create(&path).unwrap();
    for frame in frames {
        writeln!(file, "{}", serde_json::to_string(&LogLine::from_frame(frame)).unwrap()).unwrap();
    }
    for line in extra_lines {
        writeln!(file, "{line}").unwrap();
    }
    path
}

fn config() -> EngineConfig {
    EngineConfig::with_workers(3)
}

#[tokio::test]
async fn flags_frames_and_links_edge_cases_to_stored_ids() {
    let dir = TempDir::new().unwrap();
    let frames = vec![
        frame(1, 0.0, 0.0, true),   // cruising
        frame(2, -0.4, 0.0, true),  // -1.6 m/s² braking
        frame(3, 0.0, 0.3, true),   // 1.2 m/s² lateral
        frame(4, -0.6, 0.0, false), // -2.4 m/s² braking, no cameras
    ];
    let log = write_log(dir.path(), "segment-a.jsonl", &frames, &["{broken"]);
    let store = dir.path().join("edge_cases.jsonl");

    let (_handle, token) = CancelHandle::new();
    let pipeline = ParallelPipeline::new(ThresholdConfig::default(), config(), token);
    let mut writer = JsonLinesWriter::open(&store).unwrap();
    let mut source = JsonLinesSource::open(&log).unwrap();

    let summary = pipeline.process_file(&mut source, &mut writer).await.unwrap();
    pipeline.shutdown().await;

    println!("{summary:?}");
    assert_eq!(summary.frames_read, 5);
    assert_eq!(summary.frames_written, 4);
    assert_eq!(summary.frames_skipped_malformed, 1);
    assert_eq!(summary.edge_cases(EdgeCaseKind::HardBrake), 2);
    assert_eq!(summary.edge_cases(EdgeCaseKind::EvasiveManeuver), 1);
    assert_eq!(summary.thumbnails, 2);

    let lines = persistence::load(&store).unwrap();
    let frame_lines: Vec<_> = lines
        .iter()
        .filter_map(|l| match l {
            StoredLine::Frame(f) => Some(f),
            _ => None,
        })
        .collect();
    let edge_lines: Vec<_> = lines
        .iter()
        .filter_map(|l| match l {
            StoredLine::EdgeCase(e) => Some(e),
            _ => None,
        })
        .collect();

    let sequences: Vec<u64> = frame_lines.iter().map(|f| f.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3, 4]);
    assert!(frame_lines[0].panorama_thumbnail.is_none());
    assert!(frame_lines[1].panorama_thumbnail.is_some());
    assert!(frame_lines[3].panorama_thumbnail.is_none());

    let braking = frame_lines[1].id;
    let brake = edge_lines.iter().find(|e| e.frame_id == braking).unwrap();
    assert_eq!(brake.edge_case_type, EdgeCaseKind::HardBrake);
    assert_eq!(brake.severity, 0.5);

    let hardest = edge_lines.iter().find(|e| e.frame_id == frame_lines[3].id).unwrap();
    assert_eq!(hardest.severity, 1.0);
}

#[tokio::test]
async fn frame_ids_stay_unique_across_files() {
    let dir = TempDir::new().unwrap();
    let first = write_log(dir.path(), "a.jsonl", &[frame(1, -0.4, 0.0, false), frame(2, 0.0, 0.0, false)], &[]);
    let second = write_log(dir.path(), "b.jsonl", &[frame(1, -0.4, 0.0, false)], &[]);
    let store = dir.path().join("edge_cases.jsonl");

    let (_handle, token) = CancelHandle::new();
    let pipeline = ParallelPipeline::new(ThresholdConfig::default(), config(), token);
    let mut writer = JsonLinesWriter::open(&store).unwrap();
    let mut run = RunSummary::default();

    for log in [&first, &second] {
        let mut source = JsonLinesSource::open(log).unwrap();
        run.add(pipeline.process_file(&mut source, &mut writer).await.unwrap());
    }
    pipeline.shutdown().await;

    assert_eq!(run.frames_written(), 3);
    assert_eq!(run.stats.edge_cases_by_kind[&EdgeCaseKind::HardBrake], 2);

    let lines = persistence::load(&store).unwrap();
    let ids: HashSet<_> = lines
        .iter()
        .filter_map(|l| match l {
            StoredLine::Frame(f) => Some(f.id),
            _ => None,
        })
        .collect();
    assert_eq!(ids.len(), 3);

    let referenced: Vec<_> = lines
        .iter()
        .filter_map(|l| match l {
            StoredLine::EdgeCase(e) => Some(e.frame_id),
            _ => None,
        })
        .collect();
    assert_eq!(referenced.len(), 2);
    assert_ne!(referenced[0], referenced[1]);
}

#[tokio::test]
async fn calibrated_thresholds_drive_analysis() {
    let dir = TempDir::new().unwrap();
    // Braking harder at every step, weaving slightly.
    let frames: Vec<_> = (1..=20)
        .map(|i| {
            let step = 0.05 * i as f64;
            let mut sample = frame(i, 0.0, 0.0, false);
            sample.velocities = vec![
                VelocitySample::new(0.0, 15.0, 0.0),
                VelocitySample::new(0.25, 15.0 - step, 0.05),
                VelocitySample::new(0.5, 15.0 - 3.0 * step, 0.0),
                VelocitySample::new(0.75, 15.0 - 6.0 * step, 0.05),
            ];
            sample
        })
        .collect();
    let log = write_log(dir.path(), "calibration.jsonl", &frames, &[]);
    let thresholds_path = dir.path().join("thresholds.json");

    let mut source = JsonLinesSource::open(&log).unwrap();
    let thresholds = calibration::calibrate(&mut source).unwrap();
    thresholds.save(&thresholds_path).unwrap();
    let loaded = ThresholdConfig::load(&thresholds_path).unwrap();
    assert_eq!(loaded, thresholds);
    assert!(loaded.hard_brake < 0.0);
    assert!(loaded.jerk > 0.0);

    let (_handle, token) = CancelHandle::new();
    let pipeline = ParallelPipeline::new(loaded, config(), token);
    let mut writer = motion_sentinel::InMemoryWriter::new();
    let mut source = JsonLinesSource::open(&log).unwrap();

    let summary = pipeline.process_file(&mut source, &mut writer).await.unwrap();
    pipeline.shutdown().await;

    // The hardest-braking frame sits beyond the 5th percentile.
    assert!(summary.edge_cases(EdgeCaseKind::HardBrake) >= 1);
    for stored in writer.frames() {
        for edge_case in &stored.edge_cases {
            assert!((0.0..=1.0).contains(&edge_case.severity));
        }
    }
}
