use image::{Rgb, RgbImage};
use log::{debug, info, warn};
use std::sync::{Arc, Mutex};

use crate::config::CameraConfig;
use crate::error::{Error, Result};

pub type Frame = RgbImage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSpec {
    pub device: i32,
    pub width: u32,
    pub height: u32,
    pub facing_mode: String,
}

impl From<&CameraConfig> for StreamSpec {
    fn from(config: &CameraConfig) -> Self {
        Self {
            device: config.device,
            width: config.frame_width,
            height: config.frame_height,
            facing_mode: config.facing_mode.clone(),
        }
    }
}

pub trait CameraBackend: Send + Sync {
    fn open(&self, spec: &StreamSpec) -> Result<Box<dyn VideoStream>>;
}

pub trait VideoStream: Send {
    fn read_frame(&mut self) -> Result<Frame>;
    /// Stops every track of the stream. Must tolerate repeated calls.
    fn stop(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceBox {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Default)]
struct SurfaceInner {
    attached: bool,
    frame: Option<Frame>,
    overlay: Option<FaceBox>,
}

/// Where the live preview goes. Holds the most recent frame and the current
/// detection overlay so a front-end can render both.
#[derive(Debug, Clone, Default)]
pub struct DisplaySurface {
    inner: Arc<Mutex<SurfaceInner>>,
}

impl DisplaySurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_attached(&self) -> bool {
        self.lock().attached
    }

    pub fn present(&self, frame: &Frame) {
        let mut inner = self.lock();
        if inner.attached {
            inner.frame = Some(frame.clone());
        }
    }

    pub fn set_overlay(&self, face: Option<FaceBox>) {
        self.lock().overlay = face;
    }

    pub fn overlay(&self) -> Option<FaceBox> {
        self.lock().overlay
    }

    /// Latest frame with the overlay box burnt in.
    pub fn render(&self) -> Option<Frame> {
        let inner = self.lock();
        let mut frame = inner.frame.clone()?;
        if let Some(face) = inner.overlay {
            draw_box(&mut frame, face, Rgb([0, 200, 83]));
        }
        Some(frame)
    }

    fn attach(&self) {
        self.lock().attached = true;
    }

    fn detach(&self) {
        let mut inner = self.lock();
        inner.attached = false;
        inner.frame = None;
        inner.overlay = None;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SurfaceInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Draws a two pixel rectangle outline clipped to the frame.
pub fn draw_box(frame: &mut Frame, face: FaceBox, color: Rgb<u8>) {
    let (w, h) = frame.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    // Entirely left of or above the frame.
    if face.x as i64 + (face.width as i64) < 0 || face.y as i64 + (face.height as i64) < 0 {
        return;
    }
    let left = face.x.max(0) as u32;
    let top = face.y.max(0) as u32;
    let right = (face.x as i64 + face.width as i64).clamp(0, w as i64 - 1) as u32;
    let bottom = (face.y as i64 + face.height as i64).clamp(0, h as i64 - 1) as u32;
    if left >= w || top >= h || left > right || top > bottom {
        return;
    }

    for t in 0..2u32 {
        for x in left..=right {
            for y in [top.saturating_add(t), bottom.saturating_sub(t)] {
                if y < h {
                    frame.put_pixel(x, y, color);
                }
            }
        }
        for y in top..=bottom {
            for x in [left.saturating_add(t), right.saturating_sub(t)] {
                if x < w {
                    frame.put_pixel(x, y, color);
                }
            }
        }
    }
}

pub struct CameraManager {
    backend: Arc<dyn CameraBackend>,
    spec: StreamSpec,
    stream: Option<Box<dyn VideoStream>>,
    surface: DisplaySurface,
}

impl CameraManager {
    pub fn new(backend: Arc<dyn CameraBackend>, spec: StreamSpec, surface: DisplaySurface) -> Self {
        Self {
            backend,
            spec,
            stream: None,
            surface,
        }
    }

    pub fn is_active(&self) -> bool {
        self.stream.is_some()
    }

    pub fn surface(&self) -> &DisplaySurface {
        &self.surface
    }

    /// Opens the stream and attaches it to the display surface. A running
    /// stream is stopped first so the device is never held twice.
    pub fn start(&mut self) -> Result<()> {
        self.stop();

        info!(
            "Opening camera {} at {}x{} ({})",
            self.spec.device, self.spec.width, self.spec.height, self.spec.facing_mode
        );

        match self.backend.open(&self.spec) {
            Ok(stream) => {
                self.stream = Some(stream);
                self.surface.attach();
                Ok(())
            }
            Err(e) => {
                warn!("Failed to open camera: {}", e);
                Err(match e {
                    Error::Camera(msg) => Error::Camera(msg),
                    other => Error::Camera(other.to_string()),
                })
            }
        }
    }

    pub fn read_frame(&mut self) -> Result<Frame> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| Error::Camera("camera is not running".into()))?;
        let frame = stream.read_frame()?;
        self.surface.present(&frame);
        Ok(frame)
    }

    pub fn stop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            debug!("Camera stream released");
        }
        self.surface.detach();
    }
}

impl Drop for CameraManager {
    fn drop(&mut self) {
        self.stop();
    }
}
