use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Camera error: {0}")]
    Camera(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// No HTTP response was received (connect, DNS, timeout, broken body).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The server answered with a 5xx status.
    #[error("Server error ({status}): {detail}")]
    Server { status: u16, detail: String },

    #[error("Invalid response body: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),
}

pub type Result<T> = std::result::Result<T, Error>;
