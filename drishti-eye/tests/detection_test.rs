mod common;

use common::{pipeline, spec, wait_until, FailingDetector, FixedDetector, ScriptedConnector};
use drishti_core::CameraId;
use drishti_eye::camera::CameraSource;
use drishti_eye::processing::DetectionStage;
use drishti_eye::settings::CameraSettings;
use std::time::Duration;

fn confidences(detections: &[drishti_core::Detection]) -> Vec<f32> {
    detections.iter().map(|d| d.confidence).collect()
}

#[test]
fn test_threshold_filters_candidates() {
    let stage = DetectionStage::new(FixedDetector::with_confidences(&[0.95, 0.8, 0.91]));
    let settings = CameraSettings {
        detection_enabled: true,
        confidence_threshold: 0.9,
    };
    let out = stage.process(&CameraId::new("c"), common::solid(40), &settings);
    assert_eq!(confidences(&out.detections), vec![0.95, 0.91]);
}

#[test]
fn test_overlay_is_deterministic() {
    let stage = DetectionStage::new(FixedDetector::with_confidences(&[0.95, 0.91]));
    let settings = CameraSettings::default();
    let first = stage.process(&CameraId::new("c"), common::solid(40), &settings);
    let second = stage.process(&CameraId::new("c"), common::solid(40), &settings);
    assert_eq!(first.image, second.image);
    assert_ne!(first.image, common::solid(40));
}

#[test]
fn test_published_frames_carry_filtered_detections() {
    let connector = ScriptedConnector::streaming();
    let pipeline = pipeline(connector, FixedDetector::with_confidences(&[0.95, 0.8, 0.91]));
    let bus = pipeline.bus.clone();
    pipeline
        .settings
        .register(
            CameraId::new("gate"),
            CameraSettings {
                detection_enabled: true,
                confidence_threshold: 0.9,
            },
        )
        .unwrap();

    let source = CameraSource::new(spec("gate"), pipeline);
    source.start().unwrap();
    assert!(wait_until(Duration::from_secs(5), || bus.latest("gate").is_some()));

    let frame = bus.latest("gate").unwrap();
    assert_eq!(confidences(&frame.detections), vec![0.95, 0.91]);
    source.stop(Duration::from_secs(5));
}

#[test]
fn test_detector_failure_keeps_camera_streaming() {
    let connector = ScriptedConnector::streaming();
    let pipeline = pipeline(connector, std::sync::Arc::new(FailingDetector));
    let bus = pipeline.bus.clone();
    let source = CameraSource::new(spec("dock"), pipeline);
    source.start().unwrap();

    assert!(wait_until(Duration::from_secs(5), || bus
        .latest("dock")
        .map_or(false, |f| f.sequence >= 3)));
    assert!(bus.latest("dock").unwrap().detections.is_empty());
    assert!(source.state().is_streaming());
    source.stop(Duration::from_secs(5));
}
