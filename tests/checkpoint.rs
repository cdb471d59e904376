use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use facegate::camera::{CameraManager, Role};
use facegate::checkpoint::{Checkpoint, ScanOutcome, WatchOptions};
use facegate::gate::{GateController, MockGate};
use facegate_vision::pipeline::{DetectionModel, EncodingModel, FaceDetector, FaceEncoder};
use facegate_vision::{
    CameraSource, Detection, DriverSet, FaceEncoding, FaceMatcher, MatcherConfig, SyntheticDriver,
    ENCODING_DIM,
};
use image::{Rgb, RgbImage};

/// Sees a face in anything that is not pure black.
struct AnyLightDetector;

impl FaceDetector for AnyLightDetector {
    fn detect(&mut self, img: &RgbImage, _: DetectionModel) -> Result<Vec<Detection>> {
        if img.pixels().all(|p| p.0 == [0, 0, 0]) {
            return Ok(Vec::new());
        }
        Ok(vec![Detection {
            bbox: [0.0, 0.0, 8.0, 8.0],
            score: 0.9,
            landmarks: None,
        }])
    }
}

/// Encodes the red level of the first pixel as an angle.
struct RedEncoder;

fn red_encoding(red: u8) -> FaceEncoding {
    let angle = red as f32 / 255.0 * std::f32::consts::FRAC_PI_2;
    let mut v = vec![0.0; ENCODING_DIM];
    v[0] = angle.cos();
    v[1] = angle.sin();
    FaceEncoding::normalized(v).unwrap()
}

impl FaceEncoder for RedEncoder {
    fn encode(&mut self, img: &RgbImage, _: &Detection, _: EncodingModel) -> Result<FaceEncoding> {
        Ok(red_encoding(img.get_pixel(0, 0).0[0]))
    }
}

/// Fails the first `failures` encodes, then behaves like `RedEncoder`.
struct FlakyEncoder {
    failures: usize,
}

impl FaceEncoder for FlakyEncoder {
    fn encode(&mut self, img: &RgbImage, face: &Detection, model: EncodingModel) -> Result<FaceEncoding> {
        if self.failures > 0 {
            self.failures -= 1;
            return Err(anyhow!("inference backend hiccup"));
        }
        RedEncoder.encode(img, face, model)
    }
}

struct Bench {
    checkpoint: Checkpoint,
    cameras: Arc<CameraManager>,
    gate: GateController,
}

async fn bench(picture: RgbImage) -> Bench {
    bench_with(picture, Box::new(RedEncoder)).await
}

async fn bench_with(picture: RgbImage, encoder: Box<dyn FaceEncoder>) -> Bench {
    let driver = SyntheticDriver::new(picture).with_indices(&[0]);
    let cameras = Arc::new(CameraManager::new(
        DriverSet::new(vec![Arc::new(driver)], Vec::new()),
        CameraSource::Local(0),
        CameraSource::Local(1),
    ));
    let status = cameras.connect_all().await;
    assert!(status.entry_connected);
    assert!(!status.exit_connected);

    let config = MatcherConfig {
        threshold: 0.3,
        enhancement: false,
        ..MatcherConfig::default()
    };
    let matcher = Arc::new(FaceMatcher::new(
        config,
        Box::new(AnyLightDetector),
        encoder,
    ));
    let gate = GateController::new(Box::new(MockGate::new()), Duration::from_secs(5));
    Bench {
        checkpoint: Checkpoint::new(cameras.clone(), matcher, gate.clone()),
        cameras,
        gate,
    }
}

#[tokio::test]
async fn known_face_opens_the_gate() {
    let b = bench(RgbImage::from_pixel(16, 16, Rgb([200, 120, 90]))).await;
    let references = [red_encoding(20), red_encoding(198)];

    match b.checkpoint.scan(Role::Entry, &references).await.unwrap() {
        ScanOutcome::Admitted {
            reference,
            result,
            gate,
        } => {
            assert_eq!(reference, 1);
            assert!(result.is_match);
            assert_eq!(gate.auto_close_in, Some(5));
        }
        other => panic!("expected admission, got {:?}", other),
    }
    assert!(b.gate.status().await.is_open);
    b.gate.shutdown().await;
    b.cameras.shutdown().await;
}

#[tokio::test]
async fn stranger_is_rejected_and_gate_stays_shut() {
    let b = bench(RgbImage::from_pixel(16, 16, Rgb([250, 120, 90]))).await;
    let references = [red_encoding(0)];

    match b.checkpoint.scan(Role::Entry, &references).await.unwrap() {
        ScanOutcome::Rejected { best } => assert!(!best.unwrap().is_match),
        other => panic!("expected rejection, got {:?}", other),
    }
    assert!(!b.gate.status().await.is_open);
}

#[tokio::test]
async fn absent_frames_and_faces_are_outcomes() {
    let b = bench(RgbImage::new(16, 16)).await;
    let references = [red_encoding(0)];

    assert!(matches!(
        b.checkpoint.scan(Role::Exit, &references).await.unwrap(),
        ScanOutcome::NoFrame
    ));
    assert!(matches!(
        b.checkpoint.scan(Role::Entry, &references).await.unwrap(),
        ScanOutcome::NoFace { night_mode: true }
    ));
    assert!(!b.gate.status().await.is_open);
}

#[tokio::test(start_paused = true)]
async fn watch_keeps_going_after_a_failed_scan() {
    let b = bench_with(
        RgbImage::from_pixel(16, 16, Rgb([200, 120, 90])),
        Box::new(FlakyEncoder { failures: 2 }),
    )
    .await;
    let references = [red_encoding(198)];

    let mut events = Vec::new();
    let options = WatchOptions {
        interval: Duration::from_millis(100),
        once: true,
        ..WatchOptions::default()
    };
    let summary = b
        .checkpoint
        .watch(Role::Entry, &references, options, std::future::pending(), |o| {
            events.push(o.clone())
        })
        .await;

    assert_eq!(summary.failures, 2);
    assert_eq!(summary.admissions, 1);
    assert_eq!(summary.scans, 3);
    assert!(matches!(events[..], [ScanOutcome::Admitted { reference: 0, .. }]));
    // `once` waits out the auto-close before returning.
    assert!(!b.gate.status().await.is_open);
    b.cameras.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn silent_camera_is_reset_and_watch_stops_on_request() {
    let b = bench(RgbImage::from_pixel(16, 16, Rgb([200, 120, 90]))).await;
    let references = [red_encoding(198)];

    let options = WatchOptions {
        interval: Duration::from_millis(100),
        once: false,
        reset_after: Duration::from_secs(1),
    };
    let stop = tokio::time::sleep(Duration::from_millis(2_550));
    let summary = b
        .checkpoint
        .watch(Role::Exit, &references, options, stop, |_| {
            panic!("nothing to admit on a dead camera")
        })
        .await;

    assert_eq!(summary.admissions, 0);
    assert_eq!(summary.failures, 0);
    assert!(summary.resets >= 2, "{:?}", summary);
    assert!(!b.cameras.status().await.exit_connected);
}
