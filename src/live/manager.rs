//! Live-mode state machine, pipeline/datastore lifecycle and the frame
//! insertion path.

use super::cancel::SessionToken;
use super::delay::compute_grab_delay_ms;
use super::router::{self, Delivery, RouteOutcome};
use super::scheduler::{GrabJob, GrabScheduler};
use super::state::{ActiveSession, GrabState, LiveState};
use crate::config::LiveConfig;
use crate::display::ui_thread::UiThread;
use crate::display::{FrameDisplay, WindowLocation};
use crate::error::{InsertError, LiveError};
use crate::events::{EventHub, LiveModeEvent, LiveModeListener};
use crate::frame::FrameObservation;
use crate::hal::FrameSource;
use crate::pipeline::health::LiveHealth;
use crate::pipeline::{FramePipeline, ViewFactory};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Display name for a camera channel: the current channel configuration,
/// suffixed with the camera index on multi-channel setups.
pub(crate) fn make_channel_name(config: &str, camera_index: usize, channel_count: usize) -> String {
    if channel_count > 1 {
        format!("{config} {camera_index}")
    } else {
        config.to_string()
    }
}

/// Owner of live mode and the snap/live display path.
///
/// At most one acquisition session is current at any time; scheduled work
/// that captured a stale session id no-ops. Call [`LiveManager::shutdown`]
/// before dropping if deterministic thread teardown is needed; otherwise the
/// worker threads exit once the manager is dropped.
pub struct LiveManager {
    core: Arc<LiveCore>,
}

enum SuspendAction {
    None,
    Stop,
    Start,
}

pub(crate) struct LiveCore {
    config: LiveConfig,
    source: Arc<dyn FrameSource>,
    factory: Arc<dyn ViewFactory>,
    health: Arc<LiveHealth>,
    events: EventHub,
    ui: UiThread,
    scheduler: GrabScheduler,
    this: Weak<LiveCore>,

    /// Nominal on/off state and the suspend depth.
    live: Mutex<LiveState>,
    /// Scheduling handle and the per-channel last-frame table.
    grab: Mutex<GrabState>,
    /// Swap-only slots; never held across a blocking call except for the
    /// synchronous pipeline insert, which is the serialization point for
    /// insertions from all sources.
    pipeline: Mutex<Option<Arc<dyn FramePipeline>>>,
    display: Mutex<Option<Arc<dyn FrameDisplay>>>,

    /// Last known camera channel count; 0 until the first start or reset.
    channel_count: AtomicUsize,
    /// Set when the channel count changed, the pipeline was replaced
    /// externally, or a reset was requested explicitly.
    force_reset: AtomicBool,
    /// Non-reentrant gate around hardware start/stop. A request arriving
    /// while an operation is in flight gets [`LiveError::Busy`] instead of
    /// contending for the camera lock.
    hw_gate: Mutex<()>,
}

impl LiveManager {
    pub fn new(
        source: Arc<dyn FrameSource>,
        factory: Arc<dyn ViewFactory>,
        config: LiveConfig,
    ) -> Self {
        let marshal_warn = Duration::from_millis(config.marshal_warn_ms);
        let core = Arc::new_cyclic(|weak: &Weak<LiveCore>| LiveCore {
            scheduler: GrabScheduler::spawn(weak.clone()),
            ui: UiThread::spawn(marshal_warn),
            this: weak.clone(),
            live: Mutex::new(LiveState::new()),
            grab: Mutex::new(GrabState::new()),
            pipeline: Mutex::new(None),
            display: Mutex::new(None),
            channel_count: AtomicUsize::new(0),
            force_reset: AtomicBool::new(true),
            hw_gate: Mutex::new(()),
            health: Arc::new(LiveHealth::new()),
            events: EventHub::new(),
            source,
            factory,
            config,
        });
        Self { core }
    }

    /// Request nominal live mode on or off. Idempotent: asking for the
    /// current state does nothing and notifies nobody.
    ///
    /// Turning on while suspended only records the intent; acquisition
    /// starts when the suspension ends. A hardware start failure abandons
    /// the attempt, forces nominal state back off and is returned (there was
    /// no effective transition, so listeners are not notified).
    pub fn set_live_mode(&self, is_on: bool) -> Result<(), LiveError> {
        let should_start = {
            let mut live = self.core.live.lock();
            if live.is_live_on == is_on {
                return Ok(());
            }
            live.is_live_on = is_on;
            is_on && live.suspend_count == 0
        };

        if should_start {
            match self.core.start_acquisition() {
                Ok(job) => {
                    // Notify before arming the scheduler so listeners see
                    // the "on" transition before any frame (or any failure
                    // inside the grab loop) can follow it.
                    self.core.events.notify(true);
                    self.core.scheduler.submit(job);
                }
                Err(LiveError::Busy) => {
                    // A hardware op on another call path (possibly a
                    // reentrant callback of our own start) is in flight; the
                    // nominal transition stands, the hardware is untouched.
                    debug!("live start short-circuited: hardware operation in flight");
                    self.core.events.notify(true);
                    return Err(LiveError::Busy);
                }
                Err(e) => {
                    error!("couldn't start live mode: {e}");
                    self.core.live.lock().is_live_on = false;
                    self.core.stop_acquisition();
                    return Err(e);
                }
            }
        } else {
            // Turning on while suspended records the intent without touching
            // the hardware; turning off stops it.
            let stopped = is_on || self.core.stop_acquisition();
            self.core.events.notify(is_on);
            if !stopped {
                // The nominal transition stands, but the hardware was left
                // untouched behind an in-flight operation; the caller gets
                // to retry the stop.
                debug!("live stop short-circuited: hardware operation in flight");
                return Err(LiveError::Busy);
            }
        }

        Ok(())
    }

    /// Temporarily pause physical acquisition without changing the nominal
    /// intent. Reentrant: nested suspends stack, and acquisition resumes
    /// only when the depth returns to zero while nominally on. Never
    /// notifies listeners.
    pub fn set_suspended(&self, should_suspend: bool) {
        let action = {
            let mut live = self.core.live.lock();
            if should_suspend {
                let action = if live.suspend_count == 0 && live.is_live_on {
                    SuspendAction::Stop
                } else {
                    SuspendAction::None
                };
                live.suspend_count += 1;
                action
            } else if live.suspend_count == 0 {
                warn!("unbalanced resume ignored; suspend depth is already zero");
                SuspendAction::None
            } else {
                live.suspend_count -= 1;
                if live.suspend_count == 0 && live.is_live_on {
                    SuspendAction::Start
                } else {
                    SuspendAction::None
                }
            }
        };

        match action {
            SuspendAction::Stop => {
                self.core.stop_acquisition();
            }
            SuspendAction::Start => match self.core.start_acquisition() {
                Ok(job) => self.core.scheduler.submit(job),
                Err(LiveError::Busy) => {}
                Err(e) => {
                    error!("couldn't resume live mode after suspension: {e}");
                    self.core.live.lock().is_live_on = false;
                    // The failed restart ends live mode for real; listeners
                    // that saw the transition to on must see it end.
                    self.core.events.notify(false);
                }
            },
            SuspendAction::None => {}
        }
    }

    pub fn is_live_mode_on(&self) -> bool {
        self.core.live.lock().is_live_on
    }

    /// Snap an image set, display it if requested, and return it.
    ///
    /// While live mode is on this returns the most recently routed frame per
    /// channel without touching the hardware; channels that have not
    /// reported yet this session are absent, so callers must tolerate a
    /// partial set.
    pub fn snap(&self, should_display: bool) -> Result<Vec<FrameObservation>, LiveError> {
        if self.is_live_mode_on() {
            let grab = self.core.grab.lock();
            return Ok(grab.last_frames.iter().flatten().cloned().collect());
        }

        let raws = self.core.source.snap().map_err(LiveError::Snap)?;
        let frames: Vec<FrameObservation> = raws
            .into_iter()
            .enumerate()
            .map(|(index, raw)| raw.into_observation(index))
            .collect();

        if should_display {
            if let Some(display) = self.core.display.lock().as_ref() {
                display.reset_interval_estimate();
            }
            for frame in &frames {
                self.display_frame(frame.clone());
            }
            if let Some(display) = self.core.display.lock().as_ref() {
                display.bring_to_front();
            }
        }
        Ok(frames)
    }

    /// Route a frame into the snap/live display path. Marshals onto the UI
    /// thread when called from any other thread.
    pub fn display_frame(&self, frame: FrameObservation) {
        let core = Arc::clone(&self.core);
        self.core
            .ui
            .invoke_and_wait(move || core.display_frame_on_ui(frame));
    }

    /// The current display, or `None` when it has been closed.
    pub fn current_display(&self) -> Option<Arc<dyn FrameDisplay>> {
        let display = self.core.display.lock();
        display.as_ref().filter(|d| !d.is_closed()).cloned()
    }

    pub fn add_listener(&self, listener: Arc<dyn LiveModeListener>) {
        self.core.events.add_listener(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn LiveModeListener>) {
        self.core.events.remove_listener(listener);
    }

    /// Subscribe to the application-wide live-mode-changed broadcast.
    pub fn on_live_mode_changed(&self, f: impl Fn(LiveModeEvent) + Send + Sync + 'static) {
        self.core.events.subscribe(f);
    }

    pub fn health(&self) -> Arc<LiveHealth> {
        Arc::clone(&self.core.health)
    }

    /// Force a datastore/display reset before the next frame, e.g. after the
    /// processing pipeline has been replaced externally.
    pub fn invalidate(&self) {
        self.core.force_reset.store(true, Ordering::SeqCst);
    }

    /// The user asked to close the display. Closing is fine, but live mode
    /// has to stop first; a reset is forced for next time in case of changes
    /// the core did not pick up on.
    pub fn request_display_close(&self) {
        let _ = self.set_live_mode(false);
        if let Some(display) = self.core.display.lock().take() {
            display.close();
        }
        self.core.force_reset.store(true, Ordering::SeqCst);
    }

    /// Stop live mode and join the worker threads. Must not be called from
    /// the display thread.
    pub fn shutdown(&self) {
        let _ = self.set_live_mode(false);
        self.core.scheduler.shutdown();
        self.core.ui.shutdown();
    }
}

impl LiveCore {
    fn upgrade(&self) -> Option<Arc<LiveCore>> {
        self.this.upgrade()
    }

    /// Physically start continuous acquisition. Returns the first grab job;
    /// the caller arms the scheduler with it once any listener notification
    /// has gone out.
    fn start_acquisition(&self) -> Result<GrabJob, LiveError> {
        let Some(_gate) = self.hw_gate.try_lock() else {
            return Err(LiveError::Busy);
        };

        // Make sure any previous run is fully stopped first.
        self.stop_acquisition_gated();

        self.source
            .start_continuous()
            .map_err(LiveError::HardwareStart)?;

        let channel_count = self.source.channel_count().max(1);
        if self.channel_count.swap(channel_count, Ordering::SeqCst) != channel_count {
            // Channel count changed; the display needs a full reset.
            self.force_reset.store(true, Ordering::SeqCst);
        }
        let exposure_ms = self.source.exposure_ms();
        let camera = self.source.camera_name();

        if let Some(display) = self.display.lock().as_ref() {
            // Stale cadence from the previous run must not feed the delay
            // estimator.
            display.reset_interval_estimate();
        }

        let job = {
            let mut grab = self.grab.lock();
            grab.last_frames.clear();
            grab.start_count += 1;
            let token = SessionToken::new();
            grab.scheduled = Some(ActiveSession {
                id: grab.start_count,
                token: token.clone(),
                exposure_ms,
                channel_count,
                camera,
            });
            GrabJob {
                run_at: Instant::now(),
                session: grab.start_count,
                token,
            }
        };
        info!(
            "live acquisition started: session {}, {} channel(s), exposure {:.1}ms",
            job.session, channel_count, exposure_ms
        );

        if let Some(display) = self.display.lock().as_ref() {
            display.bring_to_front();
        }
        Ok(job)
    }

    /// Physically stop continuous acquisition, unless a hardware operation
    /// is already in flight on another call path. Returns whether the stop
    /// actually ran.
    fn stop_acquisition(&self) -> bool {
        let Some(_gate) = self.hw_gate.try_lock() else {
            debug!("skipping acquisition stop: hardware operation in flight");
            return false;
        };
        self.stop_acquisition_gated();
        true
    }

    /// Caller must hold the hardware gate.
    fn stop_acquisition_gated(&self) {
        if let Some(session) = self.grab.lock().scheduled.take() {
            debug!("live acquisition stopping: session {}", session.id);
            session.token.cancel();
        }

        if self.source.is_acquiring() {
            if let Err(e) = self.source.stop_acquisition() {
                error!("{}", LiveError::HardwareStop(e));
            }
        }
        // Wait for the hardware to confirm, bounded.
        let deadline = Instant::now() + Duration::from_millis(self.config.stop_timeout_ms);
        while self.source.is_acquiring() {
            if Instant::now() >= deadline {
                warn!(
                    "hardware did not confirm acquisition stop within {}ms",
                    self.config.stop_timeout_ms
                );
                break;
            }
            self.source.sleep(self.config.stop_poll_ms);
        }
    }

    fn session_valid(&self, session: u64) -> bool {
        self.grab
            .lock()
            .scheduled
            .as_ref()
            .is_some_and(|s| s.id == session)
    }

    /// One scheduler iteration: pull and route, then re-arm with the
    /// computed delay. Runs on the scheduler thread, strictly sequentially.
    pub(crate) fn run_grab_iteration(&self, job: &GrabJob) {
        let params = {
            let grab = self.grab.lock();
            grab.scheduled
                .as_ref()
                .filter(|s| s.id == job.session)
                .map(|s| (s.exposure_ms, s.channel_count, s.camera.clone()))
        };
        let Some((exposure_ms, channel_count, camera)) = params else {
            return;
        };

        self.grab_and_route(job.session, channel_count, &camera);

        let display_quantile_ms = self
            .display
            .lock()
            .as_ref()
            .map(|d| d.recent_draw_interval_quantile(self.config.display_interval_quantile))
            .unwrap_or(0.0);

        let already_elapsed_ms = job.run_at.elapsed().as_secs_f64() * 1000.0;
        let delay_ms = compute_grab_delay_ms(
            exposure_ms,
            display_quantile_ms,
            already_elapsed_ms,
            self.config.min_grab_delay_ms,
            self.config.max_grab_delay_ms,
        );

        let next = {
            let grab = self.grab.lock();
            let Some(session) = grab.scheduled.as_ref().filter(|s| s.id == job.session) else {
                return;
            };
            GrabJob {
                run_at: Instant::now() + Duration::from_millis(delay_ms),
                session: job.session,
                token: session.token.clone(),
            }
        };
        self.scheduler.submit(next);
    }

    fn grab_and_route(&self, session: u64, channel_count: usize, camera: &str) {
        let Some(core) = self.upgrade() else { return };
        let outcome = router::route_cycle(
            self.source.as_ref(),
            camera,
            channel_count,
            self.config.buffer_scan_factor,
            &self.health,
            |frame| {
                let inner = Arc::clone(&core);
                let delivered = core.ui.invoke_and_wait(move || {
                    // Cancellation boundary: re-validate immediately before
                    // the display call.
                    if !inner.session_valid(session) {
                        return Delivery::Cancelled;
                    }
                    inner.display_frame_on_ui(frame);
                    Delivery::Delivered
                });
                delivered.unwrap_or(Delivery::Cancelled)
            },
        );

        match outcome {
            Ok(RouteOutcome::Completed { .. }) => {}
            Ok(RouteOutcome::Cancelled) => self.health.record_cycle_cancelled(),
            Err(e) => {
                self.health.record_metadata_failure();
                error!("grab cycle aborted: {e}");
            }
        }
    }

    /// The insertion path. Always runs on the UI thread.
    fn display_frame_on_ui(&self, frame: FrameObservation) {
        debug_assert!(self.ui.is_current());

        let channel_count = self.channel_count.load(Ordering::SeqCst).max(1);
        let mut should_reset = self.force_reset.load(Ordering::SeqCst);

        {
            let pipeline = self.pipeline.lock();
            match pipeline.as_ref() {
                None => should_reset = true,
                Some(pipeline) if !should_reset => {
                    // Channel display-name drift forces a reset; that is also
                    // what refreshes channel colors downstream.
                    let names = pipeline.channel_names();
                    let config_name = self.source.current_channel_config();
                    for index in 0..channel_count {
                        let expected = make_channel_name(&config_name, index, channel_count);
                        if names.get(index).map(String::as_str) != Some(expected.as_str()) {
                            should_reset = true;
                            break;
                        }
                    }
                }
                Some(_) => {}
            }
        }

        let last = self.grab.lock().last_for(frame.channel).cloned();
        if let Some(last) = &last {
            if last.format != frame.format {
                should_reset = true;
            } else if let (Some(prev), Some(new)) = (last.sequence, frame.sequence) {
                if new <= prev {
                    // Already displayed this frame, or it arrived reordered.
                    self.health.record_frame_rejected();
                    debug!(
                        "rejected frame on channel {}: sequence {new} <= {prev}",
                        frame.channel
                    );
                    return;
                }
                if new > prev + 1 {
                    self.health.record_frames_dropped(new - prev - 1);
                }
            }
        }

        if should_reset {
            self.reset_store_and_display();
        } else if self.display.lock().as_ref().is_none_or(|d| d.is_closed()) {
            // The display was closed out-of-band; recreate just the display,
            // keeping the store and pipeline.
            self.create_display(None);
        }

        self.grab.lock().record_last(frame.channel, frame.clone());

        self.insert_with_recovery(frame);
    }

    fn insert_with_recovery(&self, frame: FrameObservation) {
        let result = {
            let pipeline = self.pipeline.lock();
            match pipeline.as_ref() {
                Some(pipeline) => pipeline.insert_frame(&frame),
                None => return,
            }
        };

        match result {
            Ok(()) => self.health.record_frame_routed(),
            Err(InsertError::Frozen) => {
                // The store was frozen out-of-band (presumably the user
                // saved a snapped image); replace it and retry once.
                debug!("datastore frozen; recreating store and display");
                self.reset_store_and_display();
                let retry = {
                    let pipeline = self.pipeline.lock();
                    pipeline.as_ref().map(|p| p.insert_frame(&frame))
                };
                match retry {
                    Some(Ok(())) => {
                        // The reset cleared the last-frame table; put the
                        // retried frame back so the snap cache and sequence
                        // gating stay coherent.
                        self.grab.lock().record_last(frame.channel, frame.clone());
                        self.health.record_frame_routed();
                    }
                    Some(Err(e)) => error!("frame insert failed after datastore reset: {e}"),
                    None => {}
                }
            }
            Err(e @ InsertError::Rejected) => {
                // The live store is erasable, so a rejected write means a
                // broken invariant upstream; report and keep acquiring.
                self.health.record_invariant_violation();
                error!("{e}; this should never happen for the live datastore");
            }
            Err(e @ InsertError::Halted) => {
                warn!("dropping live frame: {e}");
            }
            Err(InsertError::Processing(message)) => {
                error!("error while processing live frames: {message}");
                self.halt_live();
                if let Some(pipeline) = self.pipeline.lock().as_ref() {
                    pipeline.clear_errors();
                }
            }
        }
    }

    /// Turn live mode off from inside the insertion path (hard pipeline
    /// failure). Notifies listeners iff the nominal state actually changed.
    fn halt_live(&self) {
        let was_on = {
            let mut live = self.live.lock();
            std::mem::replace(&mut live.is_live_on, false)
        };
        // Blocking here is safe: gate holders never wait on the UI thread.
        // A try-lock skip could leave the hardware running with nominal
        // state off.
        {
            let _gate = self.hw_gate.lock();
            self.stop_acquisition_gated();
        }
        if was_on {
            self.events.notify(false);
        }
    }

    /// Halt and discard the old pipeline, build a fresh store/pipeline and a
    /// fresh display at the previous window position, clear the last-frame
    /// table and persist the recomputed channel names.
    fn reset_store_and_display(&self) {
        debug_assert!(self.ui.is_current());

        if self.channel_count.load(Ordering::SeqCst) == 0 {
            self.channel_count
                .store(self.source.channel_count().max(1), Ordering::SeqCst);
        }
        let channel_count = self.channel_count.load(Ordering::SeqCst);

        // Remember where the old window was.
        let location = {
            let mut display = self.display.lock();
            match display.take() {
                Some(old) if !old.is_closed() => {
                    let location = old.location();
                    old.close();
                    location
                }
                _ => None,
            }
        };

        let pipeline = {
            let mut slot = self.pipeline.lock();
            if let Some(old) = slot.take() {
                old.halt();
            }
            let fresh = self.factory.create_pipeline();
            *slot = Some(Arc::clone(&fresh));
            fresh
        };
        self.create_display(location);

        self.grab.lock().last_frames.clear();

        let config_name = self.source.current_channel_config();
        let names = (0..channel_count)
            .map(|index| make_channel_name(&config_name, index, channel_count))
            .collect();
        if let Err(e) = pipeline.set_channel_names(names) {
            warn!("unable to update channel names in store summary metadata: {e}");
        }

        self.force_reset.store(false, Ordering::SeqCst);
        self.health.record_reset();
    }

    fn create_display(&self, location: Option<WindowLocation>) {
        let Some(pipeline) = self.pipeline.lock().clone() else {
            return;
        };
        let display = self.factory.create_display(&pipeline, location);
        *self.display.lock() = Some(display);
    }
}
