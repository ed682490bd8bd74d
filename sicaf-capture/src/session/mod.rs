//! The capture session: a pure step machine plus the async controller that
//! owns the camera, the detection ticker and the reset timers.

mod controller;
mod state;

pub use controller::{SessionController, SessionOptions};
pub use state::{DetectionEffect, ResetKind, SessionSnapshot, SessionState, ValidationStep};
