//! Navigation session
//!
//! A session wires the two sensor producers and the user actions to a single writer. The [Navigator]
//! is the synchronous processing core: it owns both filters, the engine, and the capture window in
//! progress, and applies one [Event] at a time. It is driven directly by the offline replay and by the
//! [NavigationSession] actor.
//!
//! The actor runs the navigator on a tokio task. Producers hand inputs over through a bounded queue and
//! never block; a full queue drops the sensor reading. Every processed input publishes a new [NavState]
//! snapshot on a `watch` channel, so readers always see a complete, consistent state. Capture deadlines
//! are awaited inside the same task, so a capture never races with the samples it consumes.
//!
//! Exclusivity is by ownership: each session owns its input receiver and its task, and dropping or
//! stopping the session ends both.
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

use crate::anchor::{AnchorEstimator, CaptureStatus, CaptureWindow};
use crate::clock::Clock;
use crate::config::PathfinderConfig;
use crate::earth::DeclinationModel;
use crate::error::NavError;
use crate::heading::HeadingFilter;
use crate::location::LocationFilter;
use crate::messages::Event;
use crate::navigation::{NavPhase, NavState, NavigationEngine};
use crate::RawFix;

/// Single-threaded processing core of a navigation session.
pub struct Navigator {
    clock: Arc<dyn Clock>,
    location: LocationFilter,
    heading: HeadingFilter,
    estimator: AnchorEstimator,
    capture: Option<CaptureWindow>,
    engine: NavigationEngine,
}

impl Navigator {
    pub fn new(
        config: PathfinderConfig,
        clock: Arc<dyn Clock>,
        declination: Arc<dyn DeclinationModel>,
    ) -> Result<Self, NavError> {
        config.validate()?;
        Ok(Navigator {
            location: LocationFilter::new(config.clone(), clock.clone()),
            heading: HeadingFilter::new(config.clone(), declination),
            estimator: AnchorEstimator::new(config.clone()),
            capture: None,
            engine: NavigationEngine::new(config),
            clock,
        })
    }
    pub fn state(&self) -> &NavState {
        self.engine.snapshot()
    }
    pub fn phase(&self) -> NavPhase {
        self.engine.phase()
    }
    /// Apply one input. Failures are reflected in the published state rather than returned.
    pub fn handle(&mut self, event: Event) {
        match event {
            Event::Fix(fix) => self.on_fix(&fix),
            Event::Azimuth {
                azimuth_deg,
                timestamp_ms,
            } => self.on_azimuth(azimuth_deg, timestamp_ms),
            Event::Permission { granted } => self.set_permission(granted),
            Event::ProviderEnabled { enabled } => self.set_provider_enabled(enabled),
            Event::RequestCapture => {
                if let Err(e) = self.request_capture() {
                    debug!("Capture request refused: {}", e);
                }
            }
            Event::Reset => self.reset(),
        }
    }
    pub fn on_fix(&mut self, fix: &RawFix) {
        if self.engine.phase() == NavPhase::NoPermission {
            return;
        }
        if let Some(window) = self.capture.as_mut() {
            window.offer(fix, self.clock.now_ms());
            self.poll_capture();
        }
        if let Some(sample) = self.location.accept(fix) {
            self.engine.on_sample(sample);
            if let Some(heading) = self.heading.on_position_update(&sample) {
                self.engine.on_heading(heading);
            }
        }
    }
    pub fn on_azimuth(&mut self, azimuth_deg: f32, timestamp_ms: i64) {
        if let Some(heading) = self.heading.on_azimuth(azimuth_deg, timestamp_ms) {
            self.engine.on_heading(heading);
        }
    }
    pub fn set_permission(&mut self, granted: bool) {
        if !granted {
            self.capture = None;
            self.location.reset();
            self.heading.reset();
        }
        self.engine.set_permission(granted);
    }
    pub fn set_provider_enabled(&mut self, enabled: bool) {
        self.engine.set_provider_enabled(enabled);
    }
    /// Start capturing an anchor from the fixes that arrive next.
    ///
    /// A request while a capture is already running is ignored.
    pub fn request_capture(&mut self) -> Result<(), NavError> {
        if self.capture.is_some() {
            debug!("Capture already in progress");
            return Ok(());
        }
        self.engine.begin_capture()?;
        let now = self.clock.now_ms();
        info!("Capturing anchor");
        self.capture = Some(self.estimator.open_window(now));
        Ok(())
    }
    pub fn reset(&mut self) {
        if self.capture.take().is_some() {
            info!("Capture abandoned by reset");
        }
        self.engine.reset();
    }
    /// Finish the capture in progress if its window has closed.
    pub fn poll_capture(&mut self) {
        let now = self.clock.now_ms();
        let complete = matches!(
            self.capture.as_ref().map(|w| w.poll(now)),
            Some(CaptureStatus::Complete)
        );
        if !complete {
            return;
        }
        if let Some(window) = self.capture.take() {
            let count = window.sample_count();
            let result = window.finish(now);
            match &result {
                Ok(anchor) => info!("Captured {} from {} samples", anchor, count),
                Err(e) => warn!("Anchor capture failed: {}", e),
            }
            self.engine.complete_capture(result);
        }
    }
    /// When the capture in progress next needs attention, if one is running.
    pub fn capture_deadline_ms(&self) -> Option<i64> {
        let now = self.clock.now_ms();
        self.capture.as_ref().map(|w| match w.poll(now) {
            CaptureStatus::Pending { next_deadline_ms } => next_deadline_ms,
            CaptureStatus::Complete => now,
        })
    }
}

fn dispatch(inputs: &mpsc::Sender<Event>, event: Event) -> Result<(), NavError> {
    inputs.try_send(event).map_err(|e| match e {
        TrySendError::Full(_) => NavError::SessionBusy,
        TrySendError::Closed(_) => NavError::SessionClosed,
    })
}

/// Producer handle for location fixes.
#[derive(Clone, Debug)]
pub struct LocationSink {
    inputs: mpsc::Sender<Event>,
}
impl LocationSink {
    /// Hand a fix to the session without blocking. A full queue drops the fix.
    pub fn push(&self, fix: RawFix) -> Result<(), NavError> {
        match dispatch(&self.inputs, Event::Fix(fix)) {
            Err(NavError::SessionBusy) => {
                warn!("Input queue full, dropping fix");
                Ok(())
            }
            other => other,
        }
    }
}

/// Producer handle for compass azimuth readings.
#[derive(Clone, Debug)]
pub struct OrientationSink {
    inputs: mpsc::Sender<Event>,
}
impl OrientationSink {
    /// Hand an azimuth (degrees from magnetic north) to the session without blocking.
    pub fn push(&self, azimuth_deg: f32, timestamp_ms: i64) -> Result<(), NavError> {
        match dispatch(
            &self.inputs,
            Event::Azimuth {
                azimuth_deg,
                timestamp_ms,
            },
        ) {
            Err(NavError::SessionBusy) => Ok(()),
            other => other,
        }
    }
}

/// A running navigation session.
///
/// Must be started from within a tokio runtime.
pub struct NavigationSession {
    inputs: mpsc::Sender<Event>,
    state: watch::Receiver<NavState>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl NavigationSession {
    pub fn start(
        config: PathfinderConfig,
        clock: Arc<dyn Clock>,
        declination: Arc<dyn DeclinationModel>,
    ) -> Result<Self, NavError> {
        let capacity = config.input_queue_capacity;
        let navigator = Navigator::new(config, clock.clone(), declination)?;
        let (inputs, receiver) = mpsc::channel(capacity);
        let (state_tx, state) = watch::channel(navigator.state().clone());
        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run(navigator, clock, receiver, state_tx, shutdown_rx));
        info!("Navigation session started");
        Ok(NavigationSession {
            inputs,
            state,
            shutdown: Some(shutdown),
            task: Some(task),
        })
    }
    pub fn location_sink(&self) -> LocationSink {
        LocationSink {
            inputs: self.inputs.clone(),
        }
    }
    pub fn orientation_sink(&self) -> OrientationSink {
        OrientationSink {
            inputs: self.inputs.clone(),
        }
    }
    pub fn set_permission(&self, granted: bool) -> Result<(), NavError> {
        dispatch(&self.inputs, Event::Permission { granted })
    }
    pub fn set_provider_enabled(&self, enabled: bool) -> Result<(), NavError> {
        dispatch(&self.inputs, Event::ProviderEnabled { enabled })
    }
    /// Ask the session to save the current location. The outcome shows up in the published state.
    pub fn request_capture(&self) -> Result<(), NavError> {
        dispatch(&self.inputs, Event::RequestCapture)
    }
    pub fn reset(&self) -> Result<(), NavError> {
        dispatch(&self.inputs, Event::Reset)
    }
    /// The latest published state.
    pub fn state(&self) -> NavState {
        self.state.borrow().clone()
    }
    pub fn subscribe(&self) -> watch::Receiver<NavState> {
        self.state.clone()
    }
    /// Stop the session and wait for its task to finish. Inputs already queued are discarded.
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            warn!("Navigation session task failed: {}", e);
        }
    }
}

async fn run(
    mut navigator: Navigator,
    clock: Arc<dyn Clock>,
    mut inputs: mpsc::Receiver<Event>,
    state_tx: watch::Sender<NavState>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        let deadline = navigator.capture_deadline_ms().map(|ms| {
            Instant::now() + Duration::from_millis((ms - clock.now_ms()).max(0) as u64)
        });
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                debug!("Navigation session stopping");
                break;
            }
            _ = async { tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)).await }, if deadline.is_some() => {
                navigator.poll_capture();
            }
            input = inputs.recv() => match input {
                Some(event) => navigator.handle(event),
                None => {
                    debug!("All session inputs dropped");
                    break;
                }
            },
        }
        state_tx.send_replace(navigator.state().clone());
    }
    info!("Navigation session ended");
}
