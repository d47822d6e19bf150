//! End-to-end tests of the live-mode state machine and the insertion path,
//! driven through a scripted frame source and a recording view layer.

use liveframe::hal::mock::MockSource;
use liveframe::{
    FrameDisplay, FrameFormat, FrameObservation, FramePipeline, FrameSource, InsertError,
    LiveConfig, LiveError, LiveManager, LiveModeListener, RawFrame, ViewFactory, WindowLocation,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Scripted response for one `insert_frame` call; anything past the script
/// succeeds.
#[derive(Clone, Copy)]
enum InsertScript {
    Frozen,
    Processing,
}

#[derive(Default)]
struct RecordingPipeline {
    inserted: Mutex<Vec<FrameObservation>>,
    names: Mutex<Vec<String>>,
    halted: AtomicBool,
    clear_errors_calls: AtomicU64,
    script: Mutex<VecDeque<InsertScript>>,
}

impl RecordingPipeline {
    fn inserted_sequences(&self) -> Vec<Option<u64>> {
        self.inserted.lock().iter().map(|f| f.sequence).collect()
    }
}

impl FramePipeline for RecordingPipeline {
    fn insert_frame(&self, frame: &FrameObservation) -> Result<(), InsertError> {
        match self.script.lock().pop_front() {
            Some(InsertScript::Frozen) => Err(InsertError::Frozen),
            Some(InsertScript::Processing) => {
                Err(InsertError::Processing("stage failed".to_string()))
            }
            None => {
                self.inserted.lock().push(frame.clone());
                Ok(())
            }
        }
    }

    fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
    }

    fn clear_errors(&self) {
        self.clear_errors_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn channel_names(&self) -> Vec<String> {
        self.names.lock().clone()
    }

    fn set_channel_names(&self, names: Vec<String>) -> Result<(), InsertError> {
        *self.names.lock() = names;
        Ok(())
    }
}

#[derive(Default)]
struct TestDisplay {
    closed: AtomicBool,
    front_calls: AtomicU64,
    estimate_resets: AtomicU64,
}

impl FrameDisplay for TestDisplay {
    fn recent_draw_interval_quantile(&self, _q: f64) -> f64 {
        0.0
    }

    fn reset_interval_estimate(&self) {
        self.estimate_resets.fetch_add(1, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn bring_to_front(&self) {
        self.front_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn location(&self) -> Option<WindowLocation> {
        Some(WindowLocation { x: 7, y: 11 })
    }
}

/// Hands out recording pipelines/displays and keeps every one it created so
/// tests can assert on them after resets.
#[derive(Default)]
struct TestFactory {
    pipelines: Mutex<Vec<Arc<RecordingPipeline>>>,
    displays: Mutex<Vec<Arc<TestDisplay>>>,
    scripts: Mutex<VecDeque<Vec<InsertScript>>>,
}

impl TestFactory {
    fn pipeline(&self, index: usize) -> Arc<RecordingPipeline> {
        Arc::clone(&self.pipelines.lock()[index])
    }

    fn pipelines_created(&self) -> usize {
        self.pipelines.lock().len()
    }

    fn script_next_pipeline(&self, script: Vec<InsertScript>) {
        self.scripts.lock().push_back(script);
    }
}

impl ViewFactory for TestFactory {
    fn create_pipeline(&self) -> Arc<dyn FramePipeline> {
        let script = self.scripts.lock().pop_front().unwrap_or_default();
        let pipeline = Arc::new(RecordingPipeline {
            script: Mutex::new(script.into()),
            ..Default::default()
        });
        self.pipelines.lock().push(Arc::clone(&pipeline));
        pipeline
    }

    fn create_display(
        &self,
        _pipeline: &Arc<dyn FramePipeline>,
        _location: Option<WindowLocation>,
    ) -> Arc<dyn FrameDisplay> {
        let display = Arc::new(TestDisplay::default());
        self.displays.lock().push(Arc::clone(&display));
        display
    }
}

#[derive(Default)]
struct RecordingListener {
    transitions: Mutex<Vec<bool>>,
}

impl LiveModeListener for RecordingListener {
    fn live_mode_enabled(&self, is_on: bool) {
        self.transitions.lock().push(is_on);
    }
}

struct Harness {
    source: Arc<MockSource>,
    factory: Arc<TestFactory>,
    manager: LiveManager,
}

fn harness(channel_count: usize, exposure_ms: f64) -> Harness {
    let _ = env_logger::builder().is_test(true).try_init();
    let source = Arc::new(MockSource::new(channel_count, exposure_ms));
    let factory = Arc::new(TestFactory::default());
    let manager = LiveManager::new(
        Arc::clone(&source) as Arc<dyn FrameSource>,
        Arc::clone(&factory) as Arc<dyn ViewFactory>,
        LiveConfig::default(),
    );
    Harness {
        source,
        factory,
        manager,
    }
}

fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(2));
    }
}

fn frame(channel: usize, sequence: u64, format: FrameFormat) -> FrameObservation {
    RawFrame::new(format)
        .with_sequence(sequence)
        .into_observation(channel)
}

#[test]
fn hardware_acquires_iff_nominally_on_and_not_suspended() {
    let h = harness(1, 10.0);
    let acquiring = |expected: bool| {
        wait_until("acquiring flag to settle", || {
            h.source.is_acquiring() == expected
        });
    };

    h.manager.set_live_mode(true).unwrap();
    assert!(h.manager.is_live_mode_on());
    acquiring(true);

    h.manager.set_suspended(true);
    assert!(h.manager.is_live_mode_on());
    acquiring(false);

    // Nested suspend: one resume is not enough.
    h.manager.set_suspended(true);
    h.manager.set_suspended(false);
    acquiring(false);

    h.manager.set_suspended(false);
    acquiring(true);

    // Turning off while physically running stops the hardware.
    h.manager.set_live_mode(false).unwrap();
    assert!(!h.manager.is_live_mode_on());
    acquiring(false);

    // Turning on while suspended records the intent only.
    h.manager.set_suspended(true);
    h.manager.set_live_mode(true).unwrap();
    assert!(h.manager.is_live_mode_on());
    acquiring(false);
    h.manager.set_suspended(false);
    acquiring(true);

    h.manager.shutdown();
}

#[test]
fn unbalanced_resume_is_ignored() {
    let h = harness(1, 10.0);
    h.manager.set_suspended(false);
    h.manager.set_live_mode(true).unwrap();
    wait_until("acquisition to start", || h.source.is_acquiring());
    // The stray resume above must not have left the depth at -1.
    h.manager.set_suspended(true);
    wait_until("acquisition to pause", || !h.source.is_acquiring());
    h.manager.shutdown();
}

#[test]
fn turning_on_while_suspended_notifies_the_new_state() {
    let h = harness(1, 10.0);
    let listener = Arc::new(RecordingListener::default());
    h.manager
        .add_listener(Arc::clone(&listener) as Arc<dyn LiveModeListener>);

    h.manager.set_suspended(true);
    h.manager.set_live_mode(true).unwrap();
    assert!(h.manager.is_live_mode_on());
    assert!(!h.source.is_acquiring());
    assert_eq!(*listener.transitions.lock(), vec![true]);

    // Resuming starts the hardware without a second notification.
    h.manager.set_suspended(false);
    wait_until("acquisition to start", || h.source.is_acquiring());
    assert_eq!(*listener.transitions.lock(), vec![true]);
    h.manager.shutdown();
}

#[test]
fn failed_resume_after_suspension_notifies_off() {
    let h = harness(1, 10.0);
    let listener = Arc::new(RecordingListener::default());
    h.manager
        .add_listener(Arc::clone(&listener) as Arc<dyn LiveModeListener>);

    h.manager.set_suspended(true);
    h.manager.set_live_mode(true).unwrap();
    h.source.set_fail_start(true);
    h.manager.set_suspended(false);

    assert!(!h.manager.is_live_mode_on());
    assert!(!h.source.is_acquiring());
    assert_eq!(*listener.transitions.lock(), vec![true, false]);
    h.manager.shutdown();
}

#[test]
fn redundant_requests_notify_exactly_once_per_transition() {
    let h = harness(1, 10.0);
    let listener = Arc::new(RecordingListener::default());
    h.manager
        .add_listener(Arc::clone(&listener) as Arc<dyn LiveModeListener>);

    h.manager.set_live_mode(true).unwrap();
    h.manager.set_live_mode(true).unwrap();
    h.manager.set_live_mode(false).unwrap();
    h.manager.set_live_mode(false).unwrap();
    // Suspension is invisible to listeners.
    h.manager.set_suspended(true);
    h.manager.set_suspended(false);

    assert_eq!(*listener.transitions.lock(), vec![true, false]);
    h.manager.shutdown();
}

#[test]
fn start_failure_forces_off_without_notifying() {
    let h = harness(1, 10.0);
    let listener = Arc::new(RecordingListener::default());
    h.manager
        .add_listener(Arc::clone(&listener) as Arc<dyn LiveModeListener>);
    h.source.set_fail_start(true);

    assert!(h.manager.set_live_mode(true).is_err());
    assert!(!h.manager.is_live_mode_on());
    assert!(!h.source.is_acquiring());
    assert!(listener.transitions.lock().is_empty());

    // The failure left no residue; a later attempt works.
    h.source.set_fail_start(false);
    h.manager.set_live_mode(true).unwrap();
    assert!(h.manager.is_live_mode_on());
    assert_eq!(*listener.transitions.lock(), vec![true]);
    h.manager.shutdown();
}

#[test]
fn stale_and_duplicate_sequence_numbers_are_filtered() {
    let h = harness(1, 10.0);
    let format = FrameFormat::gray8(8, 8);

    h.manager.display_frame(frame(0, 5, format));
    h.manager.display_frame(frame(0, 3, format));
    h.manager.display_frame(frame(0, 5, format));
    h.manager.display_frame(frame(0, 7, format));

    assert_eq!(h.factory.pipelines_created(), 1);
    assert_eq!(
        h.factory.pipeline(0).inserted_sequences(),
        vec![Some(5), Some(7)]
    );
    let health = h.manager.health();
    assert_eq!(health.frames_rejected(), 2);
    // 7 arrived after 5: one hardware frame was never seen.
    assert_eq!(health.frames_dropped(), 1);
    h.manager.shutdown();
}

#[test]
fn format_change_resets_the_store_and_display() {
    let h = harness(1, 10.0);

    h.manager.display_frame(frame(0, 1, FrameFormat::gray8(8, 8)));
    h.manager
        .display_frame(frame(0, 2, FrameFormat::gray8(16, 16)));

    assert_eq!(h.factory.pipelines_created(), 2);
    assert!(h.factory.pipeline(0).halted.load(Ordering::SeqCst));
    assert_eq!(
        h.factory.pipeline(1).inserted_sequences(),
        vec![Some(2)]
    );
    assert_eq!(h.manager.health().resets(), 2);
    h.manager.shutdown();
}

#[test]
fn reset_records_per_channel_display_names() {
    let h = harness(2, 10.0);
    h.source.set_channel_config("DAPI");

    h.manager.display_frame(frame(0, 1, FrameFormat::gray8(8, 8)));

    assert_eq!(
        h.factory.pipeline(0).channel_names(),
        vec!["DAPI 0".to_string(), "DAPI 1".to_string()]
    );
    h.manager.shutdown();
}

#[test]
fn snap_while_live_returns_cached_frames_without_touching_hardware() {
    let h = harness(1, 10.0);
    let format = FrameFormat::gray8(8, 8);
    h.source
        .set_buffer(vec![Some(h.source.tagged_frame(0, 1, format))]);

    h.manager.set_live_mode(true).unwrap();
    wait_until("first frame to route", || {
        h.factory.pipelines_created() > 0 && !h.factory.pipeline(0).inserted.lock().is_empty()
    });

    let frames = h.manager.snap(false).unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].sequence, Some(1));
    assert_eq!(h.source.snap_calls(), 0);

    h.manager.set_live_mode(false).unwrap();
    h.manager.shutdown();
}

#[test]
fn snap_while_off_captures_and_displays() {
    let h = harness(1, 10.0);
    let format = FrameFormat::gray8(8, 8);
    h.source
        .set_snap_frames(vec![RawFrame::new(format).with_sequence(42)]);

    let frames = h.manager.snap(true).unwrap();
    assert_eq!(h.source.snap_calls(), 1);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].channel, 0);
    assert_eq!(
        h.factory.pipeline(0).inserted_sequences(),
        vec![Some(42)]
    );
    h.manager.shutdown();
}

#[test]
fn frozen_store_is_replaced_and_the_frame_retried_once() {
    let h = harness(1, 10.0);
    h.factory.script_next_pipeline(vec![InsertScript::Frozen]);

    h.manager.display_frame(frame(0, 1, FrameFormat::gray8(8, 8)));

    assert_eq!(h.factory.pipelines_created(), 2);
    assert!(h.factory.pipeline(0).halted.load(Ordering::SeqCst));
    assert_eq!(
        h.factory.pipeline(1).inserted_sequences(),
        vec![Some(1)]
    );
    h.manager.shutdown();
}

#[test]
fn frozen_retry_keeps_the_sequence_gate_coherent() {
    let h = harness(1, 10.0);
    h.factory.script_next_pipeline(vec![InsertScript::Frozen]);
    let format = FrameFormat::gray8(8, 8);

    h.manager.display_frame(frame(0, 5, format));
    // The retried frame must survive the reset's table clear, so a
    // replayed sequence number is still filtered.
    h.manager.display_frame(frame(0, 5, format));

    assert_eq!(h.factory.pipelines_created(), 2);
    assert_eq!(
        h.factory.pipeline(1).inserted_sequences(),
        vec![Some(5)]
    );
    assert_eq!(h.manager.health().frames_rejected(), 1);
    h.manager.shutdown();
}

#[test]
fn processing_error_halts_live_mode_and_clears_the_backlog() {
    let h = harness(1, 10.0);
    let listener = Arc::new(RecordingListener::default());
    h.manager
        .add_listener(Arc::clone(&listener) as Arc<dyn LiveModeListener>);
    let format = FrameFormat::gray8(8, 8);
    h.source
        .set_buffer(vec![Some(h.source.tagged_frame(0, 1, format))]);
    h.factory.script_next_pipeline(vec![InsertScript::Processing]);

    h.manager.set_live_mode(true).unwrap();
    wait_until("live mode to halt", || !h.manager.is_live_mode_on());
    wait_until("off notification", || {
        listener.transitions.lock().last() == Some(&false)
    });

    assert!(!h.source.is_acquiring());
    assert_eq!(
        h.factory.pipeline(0).clear_errors_calls.load(Ordering::SeqCst),
        1
    );
    assert_eq!(*listener.transitions.lock(), vec![true, false]);
    h.manager.shutdown();
}

#[test]
fn closed_display_is_recreated_without_resetting_the_store() {
    let h = harness(1, 10.0);
    let format = FrameFormat::gray8(8, 8);

    h.manager.display_frame(frame(0, 1, format));
    assert!(h.manager.current_display().is_some());

    // Simulate the user closing the window out-of-band.
    h.factory.displays.lock()[0].close();
    assert!(h.manager.current_display().is_none());

    h.manager.display_frame(frame(0, 2, format));
    assert_eq!(h.factory.pipelines_created(), 1);
    assert_eq!(h.factory.displays.lock().len(), 2);
    assert_eq!(
        h.factory.pipeline(0).inserted_sequences(),
        vec![Some(1), Some(2)]
    );
    h.manager.shutdown();
}

#[test]
fn invalidate_forces_a_reset_on_the_next_frame() {
    let h = harness(1, 10.0);
    let format = FrameFormat::gray8(8, 8);

    h.manager.display_frame(frame(0, 1, format));
    assert_eq!(h.factory.pipelines_created(), 1);

    h.manager.invalidate();
    h.manager.display_frame(frame(0, 2, format));

    assert_eq!(h.factory.pipelines_created(), 2);
    assert_eq!(
        h.factory.pipeline(1).inserted_sequences(),
        vec![Some(2)]
    );
    h.manager.shutdown();
}

/// Source whose `start_continuous` parks until released, then aborts, so a
/// test can observe calls arriving while a start is in flight.
#[derive(Default)]
struct GatedStartSource {
    entered: AtomicBool,
    release: AtomicBool,
    acquiring: AtomicBool,
}

impl FrameSource for GatedStartSource {
    fn start_continuous(&self) -> anyhow::Result<()> {
        self.entered.store(true, Ordering::SeqCst);
        while !self.release.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(1));
        }
        anyhow::bail!("start aborted")
    }

    fn stop_acquisition(&self) -> anyhow::Result<()> {
        self.acquiring.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_acquiring(&self) -> bool {
        self.acquiring.load(Ordering::SeqCst)
    }

    fn channel_count(&self) -> usize {
        1
    }

    fn exposure_ms(&self) -> f64 {
        10.0
    }

    fn camera_name(&self) -> String {
        "GatedCam".to_string()
    }

    fn current_channel_config(&self) -> String {
        "Default".to_string()
    }

    fn pull_frame_at(&self, _n_before_last: usize) -> Option<RawFrame> {
        None
    }

    fn snap(&self) -> anyhow::Result<Vec<RawFrame>> {
        Ok(Vec::new())
    }
}

#[test]
fn stop_behind_an_inflight_start_reports_busy() {
    let _ = env_logger::builder().is_test(true).try_init();
    let source = Arc::new(GatedStartSource::default());
    let factory = Arc::new(TestFactory::default());
    let manager = Arc::new(LiveManager::new(
        Arc::clone(&source) as Arc<dyn FrameSource>,
        factory as Arc<dyn ViewFactory>,
        LiveConfig::default(),
    ));

    let starter = Arc::clone(&manager);
    let handle = std::thread::spawn(move || starter.set_live_mode(true));
    wait_until("the start to be in flight", || {
        source.entered.load(Ordering::SeqCst)
    });

    // The off request cannot reach the hardware; the nominal transition
    // stands but the caller is told to retry.
    assert!(matches!(manager.set_live_mode(false), Err(LiveError::Busy)));
    assert!(!manager.is_live_mode_on());

    source.release.store(true, Ordering::SeqCst);
    assert!(handle.join().unwrap().is_err());
    assert!(!source.is_acquiring());
    manager.shutdown();
}

#[test]
fn request_display_close_stops_live_and_closes() {
    let h = harness(1, 10.0);
    h.manager.display_frame(frame(0, 1, FrameFormat::gray8(8, 8)));
    h.manager.set_live_mode(true).unwrap();

    h.manager.request_display_close();

    assert!(!h.manager.is_live_mode_on());
    assert!(!h.source.is_acquiring());
    assert!(h.manager.current_display().is_none());
    assert!(h.factory.displays.lock()[0].is_closed());
    h.manager.shutdown();
}
