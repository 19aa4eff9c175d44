use bytes::Bytes;
use chrono::Utc;
use drishti_core::CameraId;
use drishti_eye::bus::FrameBus;
use drishti_eye::frame::Frame;
use image::RgbImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn frame(camera: &str, sequence: u64) -> Frame {
    Frame {
        camera_id: CameraId::new(camera),
        image: Arc::new(RgbImage::new(4, 4)),
        encoded: Bytes::from(sequence.to_be_bytes().to_vec()),
        captured_at: Utc::now(),
        detections: Vec::new(),
        sequence,
    }
}

fn publish_many(bus: &FrameBus, camera: &str, count: u64) -> Duration {
    let started = Instant::now();
    for sequence in 1..=count {
        bus.publish(frame(camera, sequence));
    }
    started.elapsed()
}

#[test]
fn test_publish_without_subscribers_is_fast() {
    let bus = FrameBus::new();
    bus.register(&CameraId::new("cam"));
    let elapsed = publish_many(&bus, "cam", 10_000);
    assert!(elapsed < Duration::from_secs(1), "publishing took {:?}", elapsed);
    assert_eq!(bus.latest("cam").unwrap().sequence, 10_000);
}

#[test]
fn test_publish_never_waits_for_absent_consumers() {
    let bus = FrameBus::new();
    bus.register(&CameraId::new("cam"));

    // subscribers that never read
    let idle: Vec<_> = (0..100).map(|_| bus.subscribe("cam").unwrap()).collect();
    assert_eq!(bus.subscriber_count("cam"), 100);

    let elapsed = publish_many(&bus, "cam", 10_000);
    assert!(elapsed < Duration::from_secs(1), "publishing took {:?}", elapsed);
    assert_eq!(idle[0].current().unwrap().sequence, 10_000);
}

#[test]
fn test_publish_with_slow_consumers() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();
    let bus = Arc::new(FrameBus::new());
    bus.register(&CameraId::new("cam"));

    let mut consumers = Vec::new();
    for _ in 0..20 {
        let mut subscription = bus.subscribe("cam").unwrap();
        consumers.push(runtime.spawn(async move {
            let mut received = 0u64;
            let mut last = 0u64;
            while let Some(frame) = subscription.recv().await {
                assert!(frame.sequence > last, "frames went backwards");
                last = frame.sequence;
                received += 1;
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            (received, last)
        }));
    }

    let mut worst = Duration::ZERO;
    for sequence in 1..=2_000 {
        let started = Instant::now();
        bus.publish(frame("cam", sequence));
        worst = worst.max(started.elapsed());
    }
    assert!(worst < Duration::from_millis(50), "slowest publish took {:?}", worst);

    // let consumers observe the final frame, then close the slot
    thread::sleep(Duration::from_millis(50));
    bus.remove("cam");
    for consumer in consumers {
        let (received, last) = runtime.block_on(consumer).unwrap();
        assert!(received >= 1);
        assert!(received < 2_000, "slow consumer saw every frame");
        assert_eq!(last, 2_000);
    }
}

#[test]
fn test_latest_is_most_recent_under_concurrency() {
    let bus = Arc::new(FrameBus::new());
    for camera in ["a", "b", "c"] {
        bus.register(&CameraId::new(camera));
    }
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let bus = bus.clone();
            let done = done.clone();
            thread::spawn(move || {
                let mut last = [0u64; 3];
                while !done.load(Ordering::Acquire) {
                    for (i, camera) in ["a", "b", "c"].iter().enumerate() {
                        if let Some(frame) = bus.latest(camera) {
                            assert_eq!(frame.camera_id.as_str(), *camera);
                            assert!(frame.sequence >= last[i], "latest went backwards");
                            last[i] = frame.sequence;
                        }
                    }
                }
            })
        })
        .collect();

    let writers: Vec<_> = ["a", "b", "c"]
        .into_iter()
        .map(|camera| {
            let bus = bus.clone();
            thread::spawn(move || {
                for sequence in 1..=5_000 {
                    bus.publish(frame(camera, sequence));
                }
            })
        })
        .collect();

    for writer in writers {
        writer.join().unwrap();
    }
    done.store(true, Ordering::Release);
    for reader in readers {
        reader.join().unwrap();
    }

    for camera in ["a", "b", "c"] {
        assert_eq!(bus.latest(camera).unwrap().sequence, 5_000);
    }
}

#[test]
fn test_subscription_stream_ends_on_shutdown() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let bus = Arc::new(FrameBus::new());
    bus.register(&CameraId::new("cam"));
    bus.publish(frame("cam", 1));

    let stream = bus.subscribe("cam").unwrap().into_stream();
    bus.shutdown();

    use futures_util::StreamExt;
    let collected: Vec<u64> = runtime.block_on(stream.map(|f| f.sequence).collect());
    assert_eq!(collected, vec![1]);
}
