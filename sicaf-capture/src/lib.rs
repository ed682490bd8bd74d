//! Capture side of the SICAF attendance kiosk: camera, face detection,
//! smile liveness, recognition requests and the session that sequences them.

pub mod camera;
pub mod capture;
pub mod config;
pub mod control;
pub mod error;
pub mod face;
pub mod liveness;
pub mod messages;
pub mod session;
pub mod settings;
pub mod submit;

#[cfg(feature = "dlib")]
pub mod dlib_model;
#[cfg(feature = "opencv")]
pub mod opencv_camera;

pub use error::{Error, Result};
