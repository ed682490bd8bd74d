use anyhow::{Context, Result};
use log::info;
use serde::Serialize;
use std::fs;
use std::path::Path;

use sicaf_capture::capture::CapturedFace;

/// What `enroll` writes: the capture plus the host it was taken on, ready to
/// attach to a personnel record.
#[derive(Debug, Serialize)]
pub struct EnrollmentRecord<'a> {
    #[serde(flatten)]
    pub face: &'a CapturedFace,
    pub capturado_en: String,
}

pub fn save_capture(path: &Path, face: &CapturedFace) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }

    let record = EnrollmentRecord {
        face,
        capturado_en: hostname(),
    };
    let content = serde_json::to_string_pretty(&record).context("Failed to serialize capture")?;
    fs::write(path, content).with_context(|| format!("Failed to write capture to {:?}", path))?;

    info!("Saved face capture to {:?}", path);
    Ok(())
}

fn hostname() -> String {
    fs::read_to_string("/etc/hostname")
        .map(|h| h.trim().to_string())
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "desconocido".to_string())
}
