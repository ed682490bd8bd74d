#![allow(dead_code)]

use image::RgbImage;
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;

use sicaf_capture::camera::{CameraBackend, CameraManager, DisplaySurface, FaceBox, Frame, StreamSpec, VideoStream};
use sicaf_capture::config::{AppSettings, CameraConfig, SessionTimings};
use sicaf_capture::error::{Error, Result};
use sicaf_capture::face::{FaceDescriptor, FaceModel, FaceObservation, ModelLoader, DESCRIPTOR_LEN};
use sicaf_capture::session::{SessionController, SessionOptions};
use sicaf_capture::settings::SettingsWatcher;
use sicaf_capture::submit::{AttendanceResult, AttendanceSubmitter, PersonalId, RecordType, SubmitOutcome, Submission};

pub struct FakeCamera {
    pub fail: AtomicBool,
    pub opens: AtomicUsize,
    pub stops: Arc<AtomicUsize>,
}

impl FakeCamera {
    pub fn new(fail: bool) -> Arc<Self> {
        Arc::new(Self {
            fail: AtomicBool::new(fail),
            opens: AtomicUsize::new(0),
            stops: Arc::new(AtomicUsize::new(0)),
        })
    }
}

struct FakeStream {
    stops: Arc<AtomicUsize>,
    stopped: bool,
}

impl VideoStream for FakeStream {
    fn read_frame(&mut self) -> Result<Frame> {
        Ok(RgbImage::new(32, 24))
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl CameraBackend for FakeCamera {
    fn open(&self, _spec: &StreamSpec) -> Result<Box<dyn VideoStream>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Camera("permission denied".into()));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeStream {
            stops: self.stops.clone(),
            stopped: false,
        }))
    }
}

pub fn descriptor() -> FaceDescriptor {
    FaceDescriptor::try_from(vec![0.125; DESCRIPTOR_LEN]).unwrap()
}

pub fn face(score: f32) -> Option<FaceObservation> {
    Some(FaceObservation {
        bounds: FaceBox { x: 4, y: 4, width: 12, height: 12 },
        expression_score: Some(score),
        descriptor: Some(descriptor()),
    })
}

/// Replays a script of observations, repeating the last one forever.
pub struct ScriptedModel {
    script: Mutex<VecDeque<Option<FaceObservation>>>,
    last: Mutex<Option<FaceObservation>>,
    gate: Option<Mutex<mpsc::Receiver<()>>>,
    pub calls: Arc<AtomicUsize>,
}

impl ScriptedModel {
    pub fn new(script: Vec<Option<FaceObservation>>) -> Arc<Self> {
        Arc::new(Self::unshared(script, None))
    }

    /// Every call blocks until the sender yields or is dropped.
    pub fn gated(script: Vec<Option<FaceObservation>>) -> (Arc<Self>, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel();
        (Arc::new(Self::unshared(script, Some(Mutex::new(rx)))), tx)
    }

    fn unshared(script: Vec<Option<FaceObservation>>, gate: Option<Mutex<mpsc::Receiver<()>>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            gate,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl FaceModel for ScriptedModel {
    fn detect(&self, _frame: &Frame) -> Result<Option<FaceObservation>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            let _ = gate.lock().unwrap().recv();
        }
        let mut last = self.last.lock().unwrap();
        if let Some(next) = self.script.lock().unwrap().pop_front() {
            *last = next;
        }
        Ok(last.clone())
    }
}

pub struct FakeLoader {
    pub model: Option<Arc<ScriptedModel>>,
}

impl ModelLoader for FakeLoader {
    fn load(&self, _models_dir: &Path) -> Result<Arc<dyn FaceModel>> {
        match &self.model {
            Some(model) => Ok(model.clone()),
            None => Err(Error::Model("weights missing".into())),
        }
    }
}

pub fn matched(score: f64) -> SubmitOutcome {
    SubmitOutcome::Matched(AttendanceResult {
        score: Some(score),
        matched_personal_id: Some(PersonalId::Number(7)),
        usuario: Some(serde_json::json!("Ana Quispe")),
        tipo: Some("ENTRADA_MANANA".into()),
        estado: Some("PUNTUAL".into()),
        fecha: Some("2025-03-04".into()),
        hora: None,
    })
}

/// Records every call; optionally blocks each call until the test releases it.
pub struct RecordingSubmitter {
    outcome: Mutex<Box<dyn FnMut() -> Result<SubmitOutcome> + Send>>,
    gate: Option<Mutex<mpsc::Receiver<()>>>,
    model_calls: Option<Arc<AtomicUsize>>,
    pub submissions: Mutex<Vec<Submission>>,
    pub model_calls_at_submit: Mutex<Vec<usize>>,
}

impl RecordingSubmitter {
    pub fn new(outcome: impl FnMut() -> Result<SubmitOutcome> + Send + 'static) -> Self {
        Self {
            outcome: Mutex::new(Box::new(outcome)),
            gate: None,
            model_calls: None,
            submissions: Mutex::new(Vec::new()),
            model_calls_at_submit: Mutex::new(Vec::new()),
        }
    }

    pub fn gated(mut self) -> (Self, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel();
        self.gate = Some(Mutex::new(rx));
        (self, tx)
    }

    pub fn watching(mut self, model: &ScriptedModel) -> Self {
        self.model_calls = Some(model.calls.clone());
        self
    }

    pub fn count(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }
}

impl AttendanceSubmitter for RecordingSubmitter {
    fn submit(&self, submission: &Submission) -> Result<SubmitOutcome> {
        self.submissions.lock().unwrap().push(submission.clone());
        if let Some(calls) = &self.model_calls {
            self.model_calls_at_submit.lock().unwrap().push(calls.load(Ordering::SeqCst));
        }
        if let Some(gate) = &self.gate {
            let _ = gate.lock().unwrap().recv();
        }
        let mut outcome = self.outcome.lock().unwrap();
        (*outcome)()
    }
}

pub fn settings(require_smile: bool, smile_threshold: f32) -> AppSettings {
    AppSettings {
        require_smile,
        smile_threshold,
        ..AppSettings::default()
    }
}

pub fn options() -> SessionOptions {
    SessionOptions {
        record_type: RecordType::EntradaManana,
        timings: SessionTimings::default(),
        models_dir: PathBuf::from("/nonexistent/models"),
    }
}

pub fn camera_manager(backend: Arc<FakeCamera>) -> CameraManager {
    CameraManager::new(backend, StreamSpec::from(&CameraConfig::default()), DisplaySurface::new())
}

pub fn controller(
    backend: Arc<FakeCamera>,
    submitter: Arc<dyn AttendanceSubmitter>,
    settings: AppSettings,
) -> SessionController {
    SessionController::new(
        camera_manager(backend),
        submitter,
        SettingsWatcher::fixed(settings),
        options(),
    )
}

/// Minimal HTTP/1.1 server answering the given responses in order.
/// Returns the base URL and a handle yielding `(request line, body)` pairs.
pub fn serve(responses: Vec<(u16, String)>) -> (String, JoinHandle<Vec<(String, String)>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());

    let handle = std::thread::spawn(move || {
        let mut seen = Vec::new();
        for (status, body) in responses {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());

            let mut request_line = String::new();
            reader.read_line(&mut request_line).unwrap();
            let mut content_length = 0usize;
            loop {
                let mut header = String::new();
                reader.read_line(&mut header).unwrap();
                if header == "\r\n" || header.is_empty() {
                    break;
                }
                if let Some((name, value)) = header.split_once(':') {
                    if name.eq_ignore_ascii_case("content-length") {
                        content_length = value.trim().parse().unwrap();
                    }
                }
            }
            let mut request_body = vec![0u8; content_length];
            reader.read_exact(&mut request_body).unwrap();
            seen.push((request_line.trim().to_string(), String::from_utf8(request_body).unwrap()));

            let response = format!(
                "HTTP/1.1 {} Status\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).unwrap();
            stream.flush().unwrap();
        }
        seen
    });

    (base, handle)
}

/// A URL nothing listens on.
pub fn dead_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}
