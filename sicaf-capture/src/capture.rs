//! One-shot face capture for personnel enrollment.

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::Serialize;
use tokio::time::{self, MissedTickBehavior};

use crate::camera::CameraManager;
use crate::config::{AppSettings, SessionTimings};
use crate::error::{Error, Result};
use crate::face::{FaceDescriptor, FaceDetectorAdapter};
use crate::liveness::{LivenessChallenge, Verdict};
use crate::submit::{encode_jpeg_data_url, JPEG_QUALITY};

#[derive(Debug, Clone, Serialize)]
pub struct CapturedFace {
    pub embedding: FaceDescriptor,
    pub imagen_base64: String,
    pub captured_at: DateTime<Utc>,
    pub liveness_score: f32,
}

/// Polls the camera until a usable face is seen. The camera is always
/// stopped before returning.
pub async fn capture_face(
    camera: &mut CameraManager,
    detector: &FaceDetectorAdapter,
    settings: &AppSettings,
    timings: &SessionTimings,
) -> Result<CapturedFace> {
    if !detector.is_loaded() {
        return Err(Error::Model("face models are not loaded".into()));
    }

    camera.start()?;
    let deadline = timings.capture_timeout();
    let result = time::timeout(deadline, poll_for_face(camera, detector, settings, timings)).await;
    camera.stop();

    match result {
        Ok(captured) => captured,
        Err(_) => Err(Error::Timeout(deadline)),
    }
}

async fn poll_for_face(
    camera: &mut CameraManager,
    detector: &FaceDetectorAdapter,
    settings: &AppSettings,
    timings: &SessionTimings,
) -> Result<CapturedFace> {
    let challenge = LivenessChallenge::new(settings.smile_threshold);
    let mut ticks = time::interval(timings.detection_interval());
    ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticks.tick().await;

        let frame = match camera.read_frame() {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Frame capture failed: {}", e);
                continue;
            }
        };
        let model = detector.clone();
        let (detection, frame) = tokio::task::spawn_blocking(move || {
            let detection = model.detect(&frame);
            (detection, frame)
        })
        .await
        .map_err(|e| Error::Model(format!("face detection task failed: {}", e)))?;
        let detection = detection?;
        if !detection.face_detected {
            continue;
        }
        if settings.require_smile {
            if let Verdict::Pending(score) = challenge.evaluate(detection.liveness_score) {
                debug!("Waiting for smile ({:.2})", score);
                continue;
            }
        }
        let Some(embedding) = detection.descriptor else {
            continue;
        };

        info!("Face captured for enrollment");
        return Ok(CapturedFace {
            embedding,
            imagen_base64: encode_jpeg_data_url(&frame, JPEG_QUALITY)?,
            captured_at: Utc::now(),
            liveness_score: detection.liveness_score,
        });
    }
}
