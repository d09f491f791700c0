//! Session binding tests against a channel-backed camera

mod common;

use common::{
    counted_frame, preview_frame, wait_for, within, RecordingConsumer, Script, ScriptedDetector,
    TestCamera,
};
use mockall::mock;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use vistag_eye::{
    DetectionPipeline, DetectionStateStore, LensFacing, LifecycleOwner, PreviewFrame, PreviewTarget,
    Resolution, SessionBinder, VisionConfig, VisionError,
};

mock! {
    pub Surface {}

    impl PreviewTarget for Surface {
        fn attach(&self, resolution: Resolution) -> Result<(), VisionError>;
        fn present(&self, frame: PreviewFrame);
        fn detach(&self);
    }
}

/// Preview target recording what happened to it
#[derive(Default)]
struct RecordingSurface {
    attached: Mutex<Option<Resolution>>,
    presented: Mutex<Vec<u64>>,
    detached: AtomicUsize,
}

impl PreviewTarget for RecordingSurface {
    fn attach(&self, resolution: Resolution) -> Result<(), VisionError> {
        *self.attached.lock() = Some(resolution);
        Ok(())
    }

    fn present(&self, frame: PreviewFrame) {
        self.presented.lock().push(frame.sequence);
    }

    fn detach(&self) {
        self.detached.fetch_add(1, Ordering::SeqCst);
    }
}

fn binder_with(camera: Arc<TestCamera>, consumer: Arc<RecordingConsumer>) -> SessionBinder {
    SessionBinder::new(VisionConfig::default(), camera, consumer).unwrap()
}

fn started_lifecycle() -> LifecycleOwner {
    let lifecycle = LifecycleOwner::new("tagging");
    lifecycle.start().unwrap();
    lifecycle
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_bind_streams_frames_and_preview() {
    let camera = Arc::new(TestCamera::new());
    let consumer = Arc::new(RecordingConsumer::new());
    let surface = Arc::new(RecordingSurface::default());
    let binder = binder_with(camera.clone(), consumer.clone());
    let lifecycle = started_lifecycle();

    let handle = assert_ok!(binder.bind(&lifecycle, surface.clone()));
    assert!(handle.is_active());
    assert!(binder.is_streaming());
    assert_eq!(*surface.attached.lock(), Some(Resolution(640, 480)));

    let feed = camera.feed(0).unwrap();
    let releases = Arc::new(AtomicUsize::new(0));
    feed.frames.send(Ok(counted_frame(1, &releases))).await.unwrap();
    feed.previews.send(preview_frame(1)).await.unwrap();

    assert!(wait_for(|| consumer.seen() == vec![1]).await);
    assert!(wait_for(|| surface.presented.lock().clone() == vec![1]).await);
    assert_eq!(binder.frame_stats().unwrap().delivered, 1);

    assert!(handle.unbind());
    assert!(!binder.is_bound());
    assert_eq!(surface.detached.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_end_to_end_detection() {
    let camera = Arc::new(TestCamera::new());
    let detector = Arc::new(ScriptedDetector::new(|_| {
        Script::Detect(Duration::from_millis(5), vec![(3, Some("cup")), (7, None)])
    }));
    let store = Arc::new(DetectionStateStore::from_config(&VisionConfig::default()));
    let pipeline = Arc::new(
        DetectionPipeline::new(detector, Default::default(), store.spawn_updater()).unwrap(),
    );
    let binder =
        SessionBinder::new(VisionConfig::default(), camera.clone(), pipeline.clone()).unwrap();
    let lifecycle = started_lifecycle();

    assert_eq!(&*store.read(), "Detection in progress");
    assert_ok!(binder.bind(&lifecycle, Arc::new(RecordingSurface::default())));

    let releases = Arc::new(AtomicUsize::new(0));
    camera
        .feed(0)
        .unwrap()
        .frames
        .send(Ok(counted_frame(1, &releases)))
        .await
        .unwrap();

    assert!(wait_for(|| store.update_count() == 1).await);
    assert_eq!(
        &*store.read(),
        "Detection Results:\nIndex: 3 Name: cup\nIndex: 7 Name: unknown\n"
    );

    binder.unbind();
    within(pipeline.wait_idle()).await;
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_rebind_supersedes_previous_binding() {
    let camera = Arc::new(TestCamera::new());
    let consumer = Arc::new(RecordingConsumer::new());
    let binder = binder_with(camera.clone(), consumer.clone());
    let lifecycle = started_lifecycle();
    let releases = Arc::new(AtomicUsize::new(0));

    let first_surface = Arc::new(RecordingSurface::default());
    let first = assert_ok!(binder.bind(&lifecycle, first_surface.clone()));
    let old_feed = camera.feed(0).unwrap();
    old_feed.frames.send(Ok(counted_frame(1, &releases))).await.unwrap();
    assert!(wait_for(|| consumer.seen() == vec![1]).await);

    let second = assert_ok!(binder.bind(&lifecycle, Arc::new(RecordingSurface::default())));
    assert!(!first.is_active());
    assert!(second.is_active());
    assert_eq!(first_surface.detached.load(Ordering::SeqCst), 1);
    assert_eq!(camera.open_count(), 2);

    // frames from the superseded camera session never reach the consumer
    let _ = old_feed.frames.send(Ok(counted_frame(2, &releases))).await;

    let new_feed = camera.feed(1).unwrap();
    new_feed.frames.send(Ok(counted_frame(100, &releases))).await.unwrap();
    assert!(wait_for(|| consumer.seen().last() == Some(&100)).await);
    assert_eq!(consumer.seen(), vec![1, 100]);

    // the stale handle cannot tear down the new binding
    assert!(!first.unbind());
    assert!(second.is_active());
}

#[tokio::test]
async fn test_bind_to_destroyed_lifecycle_fails() {
    let camera = Arc::new(TestCamera::new());
    let binder = binder_with(camera.clone(), Arc::new(RecordingConsumer::new()));
    let lifecycle = LifecycleOwner::new("gone");
    lifecycle.destroy();

    let mut surface = MockSurface::new();
    surface.expect_attach().never();
    surface.expect_detach().never();

    let result = binder.bind(&lifecycle, Arc::new(surface));
    assert!(matches!(result, Err(VisionError::Binding(_))));
    assert!(!binder.is_bound());
    assert_eq!(camera.open_count(), 0);
}

#[tokio::test]
async fn test_missing_lens_fails() {
    let camera = Arc::new(TestCamera::with_lens(LensFacing::Front));
    let binder = binder_with(camera.clone(), Arc::new(RecordingConsumer::new()));

    let result = binder.bind(&started_lifecycle(), Arc::new(RecordingSurface::default()));
    assert_err!(result);
    assert!(!binder.is_bound());
}

#[tokio::test]
async fn test_preview_attach_failure_rolls_back() {
    let camera = Arc::new(TestCamera::new());
    let binder = binder_with(camera.clone(), Arc::new(RecordingConsumer::new()));

    let mut surface = MockSurface::new();
    surface
        .expect_attach()
        .times(1)
        .returning(|_| Err(VisionError::Preview("surface not ready".to_string())));
    surface.expect_detach().never();

    let result = binder.bind(&started_lifecycle(), Arc::new(surface));
    assert!(matches!(result, Err(VisionError::Preview(_))));
    assert!(!binder.is_bound());
    assert_eq!(camera.open_count(), 0);
}

#[tokio::test]
async fn test_camera_open_failure_detaches_preview() {
    let camera = Arc::new(TestCamera::new());
    camera.fail_open(true);
    let binder = binder_with(camera.clone(), Arc::new(RecordingConsumer::new()));

    let mut surface = MockSurface::new();
    surface.expect_attach().times(1).returning(|_| Ok(()));
    surface.expect_detach().times(1).return_const(());

    let result = binder.bind(&started_lifecycle(), Arc::new(surface));
    assert!(matches!(result, Err(VisionError::Camera(_))));
    assert!(!binder.is_bound());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_camera_follows_lifecycle() {
    let camera = Arc::new(TestCamera::new());
    let consumer = Arc::new(RecordingConsumer::new());
    let binder = binder_with(camera.clone(), consumer.clone());
    let lifecycle = LifecycleOwner::new("tagging");

    assert_ok!(binder.bind(&lifecycle, Arc::new(RecordingSurface::default())));
    assert!(binder.is_bound());
    assert!(!binder.is_streaming());
    assert_eq!(camera.open_count(), 0);

    lifecycle.start().unwrap();
    assert!(wait_for(|| binder.is_streaming()).await);
    assert_eq!(camera.open_count(), 1);

    lifecycle.stop().unwrap();
    assert!(wait_for(|| !binder.is_streaming()).await);
    assert!(binder.is_bound());

    lifecycle.start().unwrap();
    assert!(wait_for(|| binder.is_streaming()).await);
    assert_eq!(camera.open_count(), 2);

    let releases = Arc::new(AtomicUsize::new(0));
    camera
        .feed(1)
        .unwrap()
        .frames
        .send(Ok(counted_frame(5, &releases)))
        .await
        .unwrap();
    assert!(wait_for(|| consumer.seen() == vec![5]).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_destroying_lifecycle_ends_binding() {
    let camera = Arc::new(TestCamera::new());
    let binder = binder_with(camera.clone(), Arc::new(RecordingConsumer::new()));
    let surface = Arc::new(RecordingSurface::default());
    let lifecycle = started_lifecycle();

    let handle = assert_ok!(binder.bind(&lifecycle, surface.clone()));
    assert!(binder.is_streaming());

    lifecycle.destroy();
    assert!(wait_for(|| !binder.is_bound()).await);
    assert!(!handle.is_active());
    assert_eq!(surface.detached.load(Ordering::SeqCst), 1);

    // rebinding to the destroyed lifecycle is refused
    assert_err!(binder.bind(&lifecycle, surface.clone()));
    assert_eq!(surface.detached.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dropping_binder_unbinds() {
    let camera = Arc::new(TestCamera::new());
    let surface = Arc::new(RecordingSurface::default());
    let binder = binder_with(camera.clone(), Arc::new(RecordingConsumer::new()));
    let lifecycle = started_lifecycle();

    let handle = assert_ok!(binder.bind(&lifecycle, surface.clone()));
    drop(binder);

    assert!(!handle.is_active());
    assert!(!handle.unbind());
    assert_eq!(surface.detached.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_destroy_racing_bind_leaves_nothing_bound() {
    let camera = Arc::new(TestCamera::new());
    let binder = binder_with(camera.clone(), Arc::new(RecordingConsumer::new()));

    for _ in 0..50 {
        let lifecycle = started_lifecycle();
        let surface = Arc::new(RecordingSurface::default());
        let barrier = Arc::new(std::sync::Barrier::new(2));

        let destroyer = {
            let lifecycle = lifecycle.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                lifecycle.destroy();
            })
        };

        barrier.wait();
        let bound = binder.bind(&lifecycle, surface.clone());
        destroyer.join().unwrap();

        // whichever side won, the destroyed lifecycle keeps nothing alive
        assert!(wait_for(|| !binder.is_bound()).await);
        assert!(!binder.is_streaming());
        if let Ok(handle) = bound {
            assert!(!handle.is_active());
            assert!(wait_for(|| surface.detached.load(Ordering::SeqCst) == 1).await);
        }
    }
}
