use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::camera::{CameraManager, DisplaySurface};
use crate::config::SessionTimings;
use crate::error::{Error, Result};
use crate::face::{FaceDetectorAdapter, ModelLoader};
use crate::settings::SettingsWatcher;
use crate::submit::{AttendanceSubmitter, RecordType, SubmitOutcome, Submission};

use super::state::{DetectionEffect, ResetKind, SessionSnapshot, SessionState};

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub record_type: RecordType,
    pub timings: SessionTimings,
    pub models_dir: PathBuf,
}

type TaskSlot = Arc<std::sync::Mutex<Option<JoinHandle<()>>>>;

/// Drives one capture session: camera, periodic detection, submission and
/// the timed return to scanning.
#[derive(Clone)]
pub struct SessionController {
    state: Arc<Mutex<SessionState>>,
    camera: Arc<Mutex<CameraManager>>,
    detector: Arc<Mutex<FaceDetectorAdapter>>,
    submitter: Arc<dyn AttendanceSubmitter>,
    settings: SettingsWatcher,
    options: Arc<SessionOptions>,
    ticker: TaskSlot,
    reset_timer: TaskSlot,
    snapshots: watch::Sender<SessionSnapshot>,
}

impl SessionController {
    pub fn new(
        camera: CameraManager,
        submitter: Arc<dyn AttendanceSubmitter>,
        settings: SettingsWatcher,
        options: SessionOptions,
    ) -> Self {
        let state = SessionState::new();
        let (snapshots, _rx) = watch::channel(state.snapshot());
        let detector = FaceDetectorAdapter::new(camera.surface().clone());

        Self {
            state: Arc::new(Mutex::new(state)),
            camera: Arc::new(Mutex::new(camera)),
            detector: Arc::new(Mutex::new(detector)),
            submitter,
            settings,
            options: Arc::new(options),
            ticker: Arc::new(std::sync::Mutex::new(None)),
            reset_timer: Arc::new(std::sync::Mutex::new(None)),
            snapshots,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.subscribe()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.state.lock().await.snapshot()
    }

    pub async fn surface(&self) -> DisplaySurface {
        self.camera.lock().await.surface().clone()
    }

    pub fn is_ticking(&self) -> bool {
        lock_slot(&self.ticker)
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    /// Loads the face models off the async thread. On failure the session
    /// parks in `Error` for good with the camera released; there is no retry.
    pub async fn initialize(&self, loader: Arc<dyn ModelLoader>) {
        let models_dir = self.options.models_dir.clone();
        info!("Loading face models from {:?}", models_dir);
        let loaded = tokio::task::spawn_blocking(move || loader.load(&models_dir))
            .await
            .unwrap_or_else(|e| Err(Error::Model(format!("model loader panicked: {}", e))));

        match loaded {
            Ok(model) => {
                let surface = self.surface().await;
                *self.detector.lock().await = FaceDetectorAdapter::with_model(model, surface);
                info!("Face models ready");
                let detect = {
                    let mut state = self.state.lock().await;
                    state.on_models_loaded();
                    self.publish(&state);
                    state.ready_to_detect()
                };
                if detect {
                    self.spawn_ticker();
                }
            }
            Err(e) => {
                error!("Failed to load face models: {}", e);
                cancel_slot(&self.ticker);
                cancel_slot(&self.reset_timer);
                {
                    let mut state = self.state.lock().await;
                    state.on_models_failed();
                    self.publish(&state);
                }
                // The camera may have been opened while loading; nothing will use it now.
                self.camera.lock().await.stop();
            }
        }
    }

    /// Opens the camera and begins periodic detection. A failure leaves the
    /// session in `Error` and is also returned to the caller.
    pub async fn start_camera(&self) -> Result<()> {
        {
            let state = self.state.lock().await;
            if state.models_failed() {
                warn!("Ignoring camera start: face models failed to load");
                return Err(Error::Model("face models are not available".into()));
            }
            if !state.can_start_camera() {
                debug!("Camera already running");
                return Ok(());
            }
        }

        let started = self.camera.lock().await.start();
        let mut state = self.state.lock().await;
        match started {
            Ok(()) => {
                state.on_camera_started();
                self.publish(&state);
                let detect = state.ready_to_detect();
                drop(state);
                // Before the models are ready the ticker is left to `initialize`.
                if detect {
                    self.spawn_ticker();
                }
                Ok(())
            }
            Err(e) => {
                state.on_camera_failed();
                self.publish(&state);
                Err(e)
            }
        }
    }

    /// Stops detection, pending resets and the camera. Safe to call repeatedly.
    pub async fn stop_camera(&self) {
        cancel_slot(&self.ticker);
        cancel_slot(&self.reset_timer);

        {
            let mut state = self.state.lock().await;
            state.on_stopped();
            self.publish(&state);
        }
        self.camera.lock().await.stop();
        info!("Camera stopped");
    }

    /// Teardown: nothing of this session may run after it returns.
    pub async fn shutdown(&self) {
        self.stop_camera().await;
    }

    fn spawn_ticker(&self) {
        let this = self.clone();
        let interval = self.options.timings.detection_interval();
        let handle = tokio::spawn(async move {
            let mut ticks = time::interval(interval);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticks.tick().await;
                if !this.detection_tick().await {
                    break;
                }
            }
        });

        if let Some(previous) = lock_slot(&self.ticker).replace(handle) {
            previous.abort();
        }
    }

    /// One detection pass. Returns false once the ticker should end.
    async fn detection_tick(&self) -> bool {
        let generation = {
            let state = self.state.lock().await;
            if !state.ready_to_detect() {
                return true;
            }
            state.generation()
        };

        let detector = self.detector.lock().await.clone();
        let frame = match self.camera.lock().await.read_frame() {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Frame capture failed: {}", e);
                return true;
            }
        };

        // The model is CPU bound; keep it off the runtime thread.
        let (detection, frame) = match tokio::task::spawn_blocking(move || {
            let detection = detector.detect(&frame);
            (detection, frame)
        })
        .await
        {
            Ok((Ok(detection), frame)) => (detection, frame),
            Ok((Err(e), _)) => {
                warn!("Face detection failed: {}", e);
                return true;
            }
            Err(e) => {
                warn!("Face detection task failed: {}", e);
                return true;
            }
        };

        let settings = self.settings.current();
        let effect = {
            let mut state = self.state.lock().await;
            let effect = state.apply_detection(generation, &detection, &settings);
            if effect != DetectionEffect::Stale {
                self.publish(&state);
            }
            effect
        };

        match effect {
            DetectionEffect::Submit { generation, descriptor } => {
                // Our own handle: drop it so the ticker is gone before the request goes out.
                lock_slot(&self.ticker).take();
                let submission = Submission {
                    descriptor,
                    frame,
                    record_type: self.options.record_type,
                    captured_at: Utc::now(),
                    settings,
                };
                self.spawn_submission(generation, submission);
                false
            }
            DetectionEffect::Stale => false,
            DetectionEffect::Continue => true,
        }
    }

    fn spawn_submission(&self, generation: u64, submission: Submission) {
        let this = self.clone();
        let submitter = self.submitter.clone();
        tokio::spawn(async move {
            let outcome = tokio::task::spawn_blocking(move || submitter.submit(&submission))
                .await
                .unwrap_or_else(|e| Err(Error::Transport(format!("submission task failed: {}", e))));
            this.finish_submission(generation, outcome).await;
        });
    }

    async fn finish_submission(&self, generation: u64, outcome: Result<SubmitOutcome>) {
        let reset = {
            let mut state = self.state.lock().await;
            let reset = state.apply_submission(generation, outcome);
            if reset.is_some() {
                self.publish(&state);
            }
            reset
        };

        if let Some(kind) = reset {
            let delay = match kind {
                ResetKind::Success => self.options.timings.success_reset(),
                ResetKind::Failure => self.options.timings.failure_reset(),
            };
            self.schedule_reset(generation, delay);
        }
    }

    fn schedule_reset(&self, generation: u64, delay: Duration) {
        let this = self.clone();
        let handle = tokio::spawn(async move {
            time::sleep(delay).await;
            this.finish_reset(generation).await;
        });

        if let Some(previous) = lock_slot(&self.reset_timer).replace(handle) {
            previous.abort();
        }
    }

    async fn finish_reset(&self, generation: u64) {
        let resumed = {
            let mut state = self.state.lock().await;
            let resumed = state.apply_reset(generation);
            if resumed {
                self.publish(&state);
            }
            resumed
        };

        if resumed {
            lock_slot(&self.reset_timer).take();
            self.spawn_ticker();
        }
    }

    fn publish(&self, state: &SessionState) {
        self.snapshots.send_replace(state.snapshot());
    }
}

fn lock_slot(slot: &TaskSlot) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn cancel_slot(slot: &TaskSlot) {
    if let Some(handle) = lock_slot(slot).take() {
        handle.abort();
    }
}
