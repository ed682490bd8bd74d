use image::RgbImage;
use log::{debug, info, warn};
use opencv::{
    core::Mat,
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture},
};
use std::path::Path;

use crate::camera::{CameraBackend, Frame, StreamSpec, VideoStream};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct CameraInfo {
    pub device_id: i32,
    pub name: String,
}

/// V4L2 cameras through OpenCV.
#[derive(Debug, Default)]
pub struct OpenCvCamera;

struct OpenCvStream {
    capture: VideoCapture,
    device_id: i32,
    stopped: bool,
}

impl CameraBackend for OpenCvCamera {
    fn open(&self, spec: &StreamSpec) -> Result<Box<dyn VideoStream>> {
        let mut candidates = vec![spec.device];
        for cam in detect_cameras() {
            if !candidates.contains(&cam.device_id) {
                candidates.push(cam.device_id);
            }
        }

        let mut last_error = String::from("no video devices");
        for device_id in candidates {
            match open_device(device_id, spec) {
                Ok(capture) => {
                    info!("Camera video{} streaming at {}x{}", device_id, spec.width, spec.height);
                    return Ok(Box::new(OpenCvStream {
                        capture,
                        device_id,
                        stopped: false,
                    }));
                }
                Err(e) => {
                    warn!("Camera video{} unavailable: {}", device_id, e);
                    last_error = e.to_string();
                }
            }
        }

        Err(Error::Camera(format!("No working camera found. Last error: {}", last_error)))
    }
}

fn open_device(device_id: i32, spec: &StreamSpec) -> Result<VideoCapture> {
    let mut capture = VideoCapture::new(device_id, videoio::CAP_V4L2).map_err(cv_err)?;
    if !capture.is_opened().unwrap_or(false) {
        return Err(Error::Camera(format!("video{} failed to open", device_id)));
    }

    capture.set(videoio::CAP_PROP_FRAME_WIDTH, spec.width as f64).map_err(cv_err)?;
    capture.set(videoio::CAP_PROP_FRAME_HEIGHT, spec.height as f64).map_err(cv_err)?;

    let mut first_frame = Mat::default();
    if capture.read(&mut first_frame).is_err() || first_frame.empty() {
        let _ = capture.release();
        return Err(Error::Camera(format!("video{} cannot read frames", device_id)));
    }

    Ok(capture)
}

impl VideoStream for OpenCvStream {
    fn read_frame(&mut self) -> Result<Frame> {
        if self.stopped {
            return Err(Error::Camera("stream stopped".into()));
        }

        let mut bgr = Mat::default();
        self.capture.read(&mut bgr).map_err(cv_err)?;
        if bgr.empty() {
            return Err(Error::Camera("Empty frame captured".into()));
        }

        let mut rgb = Mat::default();
        imgproc::cvt_color(&bgr, &mut rgb, imgproc::COLOR_BGR2RGB, 0).map_err(cv_err)?;

        let width = rgb.cols() as u32;
        let height = rgb.rows() as u32;
        let data = rgb.data_bytes().map_err(cv_err)?.to_vec();

        RgbImage::from_raw(width, height, data)
            .ok_or_else(|| Error::Camera("frame buffer size mismatch".into()))
    }

    fn stop(&mut self) {
        if !self.stopped {
            let _ = self.capture.release();
            self.stopped = true;
            debug!("Released video{}", self.device_id);
        }
    }
}

impl Drop for OpenCvStream {
    fn drop(&mut self) {
        self.stop();
    }
}

fn cv_err(e: opencv::Error) -> Error {
    Error::Camera(e.to_string())
}

/// Capture devices listed under sysfs, skipping metadata nodes.
pub fn detect_cameras() -> Vec<CameraInfo> {
    let mut cameras = Vec::new();
    let video_dir = Path::new("/sys/class/video4linux");

    if let Ok(entries) = std::fs::read_dir(video_dir) {
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(device_id) = name.strip_prefix("video").and_then(|s| s.parse::<i32>().ok()) else {
                continue;
            };

            let index = std::fs::read_to_string(entry.path().join("index"))
                .ok()
                .and_then(|s| s.trim().parse::<i32>().ok())
                .unwrap_or(0);
            if index != 0 {
                debug!("Skipping video{} (index {}), likely metadata device", device_id, index);
                continue;
            }

            let camera_name = std::fs::read_to_string(entry.path().join("name"))
                .map(|s| s.trim().to_string())
                .unwrap_or_else(|_| format!("Camera {}", device_id));

            cameras.push(CameraInfo {
                device_id,
                name: camera_name,
            });
        }
    }

    cameras.sort_by_key(|c| c.device_id);
    debug!("Detected {} camera(s)", cameras.len());
    cameras
}
