//! Terminal rendering of the session state.

use log::debug;
use tokio::sync::watch;

use sicaf_capture::liveness::LivenessChallenge;
use sicaf_capture::session::{SessionSnapshot, ValidationStep};
use sicaf_capture::settings::SettingsWatcher;

const BAR_WIDTH: usize = 20;

pub const CAMERA_TOGGLE_HINT: &str = "Presione Enter para iniciar o detener la cámara";

/// Full at the threshold, so the operator sees how far the smile still has to go.
fn smile_bar(score: f32, threshold: f32) -> String {
    let progress = LivenessChallenge::new(threshold).progress(score);
    let filled = ((progress * BAR_WIDTH as f32).round() as usize).min(BAR_WIDTH);
    format!(
        "[{}{}] {:>3}%",
        "#".repeat(filled),
        "-".repeat(BAR_WIDTH - filled),
        (progress * 100.0).round() as u32
    )
}

pub fn status_line(snapshot: &SessionSnapshot, smile_threshold: f32) -> String {
    match snapshot.step {
        ValidationStep::Challenge => format!(
            "{} {}",
            snapshot.message,
            smile_bar(snapshot.happy_score, smile_threshold)
        ),
        ValidationStep::Success => {
            let mut line = format!("✔ {}", snapshot.message);
            if let Some(person) = &snapshot.detected_person {
                for extra in [&person.tipo, &person.estado, &person.hora].into_iter().flatten() {
                    line.push_str(" · ");
                    line.push_str(extra);
                }
            }
            line
        }
        ValidationStep::NoMatch | ValidationStep::Error => format!("✖ {}", snapshot.message),
        _ => snapshot.message.clone(),
    }
}

/// What the operator's Enter key does: open a stopped or failed camera,
/// otherwise stop it.
pub fn wants_camera_start(snapshot: &SessionSnapshot) -> bool {
    !snapshot.camera_active
}

/// Prints every visible change until the session's sender goes away.
pub async fn render(mut snapshots: watch::Receiver<SessionSnapshot>, settings: SettingsWatcher) {
    let mut last = String::new();
    loop {
        let threshold = settings.current().smile_threshold;
        let line = status_line(&snapshots.borrow_and_update(), threshold);
        if line != last {
            println!("{}", line);
            last = line;
        }
        if snapshots.changed().await.is_err() {
            debug!("Session closed, stopping display");
            break;
        }
    }
}
