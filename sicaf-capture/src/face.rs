use log::debug;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::camera::{DisplaySurface, FaceBox, Frame};
use crate::error::{Error, Result};

pub const DESCRIPTOR_LEN: usize = 128;

/// 128-d face embedding produced by the recognition network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct FaceDescriptor(Box<[f32; DESCRIPTOR_LEN]>);

impl FaceDescriptor {
    pub fn as_slice(&self) -> &[f32] {
        &self.0[..]
    }
}

impl TryFrom<Vec<f32>> for FaceDescriptor {
    type Error = Error;

    fn try_from(values: Vec<f32>) -> Result<Self> {
        let len = values.len();
        let boxed: Box<[f32; DESCRIPTOR_LEN]> = values
            .into_boxed_slice()
            .try_into()
            .map_err(|_| Error::Model(format!("descriptor has {} values, expected {}", len, DESCRIPTOR_LEN)))?;
        Ok(Self(boxed))
    }
}

impl From<FaceDescriptor> for Vec<f32> {
    fn from(descriptor: FaceDescriptor) -> Self {
        descriptor.0.to_vec()
    }
}

/// What a model reports for the single face it selected in a frame.
#[derive(Debug, Clone)]
pub struct FaceObservation {
    pub bounds: FaceBox,
    /// Probability of a smiling ("happy") expression, if the model provides one.
    pub expression_score: Option<f32>,
    pub descriptor: Option<FaceDescriptor>,
}

pub trait FaceModel: Send + Sync {
    /// Returns the best face in the frame, or `None` when there is none.
    fn detect(&self, frame: &Frame) -> Result<Option<FaceObservation>>;
}

pub trait ModelLoader: Send + Sync {
    fn load(&self, models_dir: &Path) -> Result<Arc<dyn FaceModel>>;
}

#[derive(Debug, Clone, Default)]
pub struct Detection {
    pub face_detected: bool,
    pub liveness_score: f32,
    pub descriptor: Option<FaceDescriptor>,
}

impl Detection {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Runs the loaded model over a frame and keeps the preview overlay in sync.
#[derive(Clone)]
pub struct FaceDetectorAdapter {
    model: Option<Arc<dyn FaceModel>>,
    surface: DisplaySurface,
}

impl FaceDetectorAdapter {
    pub fn new(surface: DisplaySurface) -> Self {
        Self { model: None, surface }
    }

    pub fn with_model(model: Arc<dyn FaceModel>, surface: DisplaySurface) -> Self {
        Self {
            model: Some(model),
            surface,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    /// Never fails for "no face"; only hard model failures are errors.
    pub fn detect(&self, frame: &Frame) -> Result<Detection> {
        let Some(model) = self.model.as_ref() else {
            return Ok(Detection::empty());
        };

        match model.detect(frame)? {
            Some(face) => {
                self.surface.set_overlay(Some(face.bounds));
                let score = face.expression_score.unwrap_or(0.0);
                let liveness_score = if score.is_finite() { score.clamp(0.0, 1.0) } else { 0.0 };
                debug!(
                    "Face at ({}, {}) {}x{}, smile {:.2}",
                    face.bounds.x, face.bounds.y, face.bounds.width, face.bounds.height, liveness_score
                );
                Ok(Detection {
                    face_detected: true,
                    liveness_score,
                    descriptor: face.descriptor,
                })
            }
            None => {
                self.surface.set_overlay(None);
                Ok(Detection::empty())
            }
        }
    }
}

/// Picks the largest face; ties keep the earlier one.
pub fn select_primary(faces: &[FaceBox]) -> Option<usize> {
    let mut best: Option<(usize, u64)> = None;
    for (i, face) in faces.iter().enumerate() {
        let area = face.width as u64 * face.height as u64;
        if best.map_or(true, |(_, a)| area > a) {
            best = Some((i, area));
        }
    }
    best.map(|(i, _)| i)
}
