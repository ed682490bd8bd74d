//! Face model files for the dlib backend.
//!
//! Looks for the model files in the configured directory first, then the
//! system share directory. Missing files can be downloaded from dlib.net.

use anyhow::{Context, Result};
use log::info;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

pub struct ModelInfo {
    pub name: &'static str,
    pub url: &'static str,
    pub size_mb: u32,
}

pub const SHAPE_PREDICTOR: ModelInfo = ModelInfo {
    name: "shape_predictor_68_face_landmarks.dat",
    url: "http://dlib.net/files/shape_predictor_68_face_landmarks.dat.bz2",
    size_mb: 100,
};

pub const FACE_RECOGNITION: ModelInfo = ModelInfo {
    name: "dlib_face_recognition_resnet_model_v1.dat",
    url: "http://dlib.net/files/dlib_face_recognition_resnet_model_v1.dat.bz2",
    size_mb: 22,
};

const SYSTEM_MODELS_DIR: &str = "/usr/share/sicaf/models";

pub fn models_exist_in(dir: &Path) -> bool {
    dir.join(SHAPE_PREDICTOR.name).exists() && dir.join(FACE_RECOGNITION.name).exists()
}

/// Directory to load models from. Falls back to the configured one, which is
/// also where downloads land.
pub fn locate_models_dir(configured: &Path) -> PathBuf {
    if models_exist_in(configured) {
        return configured.to_path_buf();
    }
    let system_dir = PathBuf::from(SYSTEM_MODELS_DIR);
    if models_exist_in(&system_dir) {
        return system_dir;
    }
    configured.to_path_buf()
}

/// Downloads whichever model files are missing from `dest_dir`.
pub fn download_models(dest_dir: &Path) -> Result<()> {
    fs::create_dir_all(dest_dir)
        .with_context(|| format!("Failed to create models directory {:?}", dest_dir))?;

    for model in [&SHAPE_PREDICTOR, &FACE_RECOGNITION] {
        if dest_dir.join(model.name).exists() {
            continue;
        }
        info!("Downloading {} ({} MB) from {}", model.name, model.size_mb, model.url);
        let response = ureq::get(model.url)
            .call()
            .with_context(|| format!("Failed to download {}", model.name))?;

        let mut compressed = Vec::with_capacity(model.size_mb as usize * 1024 * 1024 / 2);
        response
            .into_reader()
            .read_to_end(&mut compressed)
            .with_context(|| format!("Download of {} interrupted", model.name))?;
        info!("Downloaded {} bytes, decompressing...", compressed.len());

        extract_model(model, &compressed, dest_dir)?;
    }

    info!("Models installed in {:?}", dest_dir);
    Ok(())
}

/// Decompresses a `.bz2` payload into `dest_dir`. The file only appears
/// under its final name once fully written.
pub fn extract_model(model: &ModelInfo, compressed: &[u8], dest_dir: &Path) -> Result<PathBuf> {
    let mut decoder = bzip2::read::BzDecoder::new(compressed);
    let mut data = Vec::new();
    decoder
        .read_to_end(&mut data)
        .with_context(|| format!("Failed to decompress {}", model.name))?;

    let final_path = dest_dir.join(model.name);
    let partial_path = dest_dir.join(format!("{}.part", model.name));
    fs::write(&partial_path, &data).with_context(|| format!("Failed to write {:?}", partial_path))?;
    fs::rename(&partial_path, &final_path).with_context(|| format!("Failed to install {:?}", final_path))?;

    info!("Saved model to {:?} ({} bytes)", final_path, data.len());
    Ok(final_path)
}
