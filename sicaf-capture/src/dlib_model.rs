use dlib_face_recognition::{
    FaceDetector, FaceDetectorTrait, FaceEncoderNetwork, FaceEncoderTrait, ImageMatrix,
    LandmarkPredictor, LandmarkPredictorTrait,
};
use log::{info, warn};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::camera::{FaceBox, Frame};
use crate::error::{Error, Result};
use crate::face::{select_primary, FaceDescriptor, FaceModel, FaceObservation, ModelLoader};
use crate::liveness::smile_score_from_landmarks;

pub const SHAPE_PREDICTOR_FILE: &str = "shape_predictor_68_face_landmarks.dat";
pub const FACE_RECOGNITION_FILE: &str = "dlib_face_recognition_resnet_model_v1.dat";

struct DlibNetworks {
    detector: FaceDetector,
    predictor: LandmarkPredictor,
    encoder: FaceEncoderNetwork,
}

/// HOG detector, 68-point landmarks and the ResNet encoder.
pub struct DlibFaceModel {
    inner: Mutex<DlibNetworks>,
}

// The dlib handles are only touched behind the mutex.
unsafe impl Send for DlibFaceModel {}
unsafe impl Sync for DlibFaceModel {}

impl DlibFaceModel {
    pub fn open(models_dir: &Path) -> Result<Self> {
        let shape_predictor_path = models_dir.join(SHAPE_PREDICTOR_FILE);
        let face_rec_path = models_dir.join(FACE_RECOGNITION_FILE);

        if !shape_predictor_path.exists() {
            warn!("Shape predictor model not found at {:?}", shape_predictor_path);
            return Err(Error::Model(format!("{} not found", SHAPE_PREDICTOR_FILE)));
        }
        if !face_rec_path.exists() {
            warn!("Face recognition model not found at {:?}", face_rec_path);
            return Err(Error::Model(format!("{} not found", FACE_RECOGNITION_FILE)));
        }

        let predictor = LandmarkPredictor::open(&shape_predictor_path).map_err(Error::Model)?;
        let encoder = FaceEncoderNetwork::open(&face_rec_path).map_err(Error::Model)?;
        info!("Loaded dlib models from {:?}", models_dir);

        Ok(Self {
            inner: Mutex::new(DlibNetworks {
                detector: FaceDetector::new(),
                predictor,
                encoder,
            }),
        })
    }
}

impl FaceModel for DlibFaceModel {
    fn detect(&self, frame: &Frame) -> Result<Option<FaceObservation>> {
        let (width, height) = frame.dimensions();
        let data = frame.as_raw();
        if data.len() != (width * height * 3) as usize {
            return Err(Error::Model(format!("invalid frame buffer of {} bytes", data.len())));
        }

        let nets = self
            .inner
            .lock()
            .map_err(|_| Error::Model("face model lock poisoned".into()))?;

        // `data` outlives `image`; dlib copies nothing back into it.
        let image = unsafe { ImageMatrix::new(width as usize, height as usize, data.as_ptr()) };

        let rects = nets.detector.face_locations(&image);
        let boxes: Vec<FaceBox> = rects
            .iter()
            .map(|r| FaceBox {
                x: r.left as i32,
                y: r.top as i32,
                width: (r.right - r.left).max(0) as u32,
                height: (r.bottom - r.top).max(0) as u32,
            })
            .collect();

        let Some(index) = select_primary(&boxes) else {
            return Ok(None);
        };
        let rect = &rects[index];

        let landmarks = nets.predictor.face_landmarks(&image, rect);
        let points: Vec<(f32, f32)> = landmarks.iter().map(|p| (p.x() as f32, p.y() as f32)).collect();
        let expression_score = smile_score_from_landmarks(&points);

        let encodings = nets.encoder.get_face_encodings(&image, &[landmarks], 0);
        let descriptor = match encodings.first() {
            Some(encoding) => {
                let values: Vec<f32> = encoding.as_ref().iter().map(|&x| x as f32).collect();
                Some(FaceDescriptor::try_from(values)?)
            }
            None => None,
        };

        Ok(Some(FaceObservation {
            bounds: boxes[index],
            expression_score,
            descriptor,
        }))
    }
}

#[derive(Debug, Default)]
pub struct DlibModelLoader;

impl ModelLoader for DlibModelLoader {
    fn load(&self, models_dir: &Path) -> Result<Arc<dyn FaceModel>> {
        Ok(Arc::new(DlibFaceModel::open(models_dir)?))
    }
}
