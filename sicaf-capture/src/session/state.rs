use log::{debug, info, warn};
use serde::Serialize;

use crate::config::AppSettings;
use crate::error::Error;
use crate::face::{Detection, FaceDescriptor};
use crate::liveness::{LivenessChallenge, Verdict};
use crate::messages;
use crate::submit::{AttendanceResult, SubmitOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStep {
    Loading,
    Waiting,
    Detecting,
    Challenge,
    Validating,
    Success,
    NoMatch,
    Error,
}

impl ValidationStep {
    /// Steps in which the periodic detector runs.
    pub fn is_scanning(&self) -> bool {
        matches!(self, ValidationStep::Detecting | ValidationStep::Challenge)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetKind {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DetectionEffect {
    /// Result belonged to an older generation or a non-scanning step.
    Stale,
    Continue,
    /// Leave scanning and submit; the new generation tags the request.
    Submit { generation: u64, descriptor: FaceDescriptor },
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub step: ValidationStep,
    pub happy_score: f32,
    pub message: String,
    pub error: Option<String>,
    pub detected_person: Option<AttendanceResult>,
    pub camera_active: bool,
    pub models_loaded: bool,
}

impl SessionSnapshot {
    pub fn match_percentage(&self) -> Option<u32> {
        self.detected_person.as_ref()?.match_percentage()
    }
}

#[derive(Debug, Clone)]
pub struct SessionState {
    step: ValidationStep,
    happy_score: f32,
    error: Option<String>,
    detected_person: Option<AttendanceResult>,
    generation: u64,
    models_loaded: bool,
    models_failed: bool,
    camera_active: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            step: ValidationStep::Loading,
            happy_score: 0.0,
            error: None,
            detected_person: None,
            generation: 0,
            models_loaded: false,
            models_failed: false,
            camera_active: false,
        }
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(&self) -> ValidationStep {
        self.step
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn happy_score(&self) -> f32 {
        self.happy_score
    }

    pub fn models_loaded(&self) -> bool {
        self.models_loaded
    }

    pub fn models_failed(&self) -> bool {
        self.models_failed
    }

    pub fn camera_active(&self) -> bool {
        self.camera_active
    }

    /// Whether a detection tick should run right now.
    pub fn ready_to_detect(&self) -> bool {
        self.models_loaded && self.camera_active && self.step.is_scanning()
    }

    pub fn on_models_loaded(&mut self) {
        if self.models_failed {
            return;
        }
        self.models_loaded = true;
        if self.step != ValidationStep::Loading {
            return;
        }
        if self.camera_active {
            self.enter_detecting();
        } else {
            self.transition(ValidationStep::Waiting);
        }
    }

    pub fn on_models_failed(&mut self) {
        self.models_failed = true;
        self.models_loaded = false;
        self.camera_active = false;
        self.happy_score = 0.0;
        self.generation += 1;
        self.error = Some(messages::MODEL_LOAD_FAILED.to_string());
        self.transition(ValidationStep::Error);
    }

    /// Whether a user start request may open the camera.
    pub fn can_start_camera(&self) -> bool {
        !self.models_failed && !self.camera_active
    }

    pub fn on_camera_started(&mut self) {
        self.camera_active = true;
        if self.models_loaded {
            self.enter_detecting();
        }
    }

    pub fn on_camera_failed(&mut self) {
        self.camera_active = false;
        self.generation += 1;
        self.happy_score = 0.0;
        self.error = Some(messages::CAMERA_UNAVAILABLE.to_string());
        self.transition(ValidationStep::Error);
    }

    pub fn apply_detection(
        &mut self,
        generation: u64,
        detection: &Detection,
        settings: &AppSettings,
    ) -> DetectionEffect {
        if generation != self.generation || !self.step.is_scanning() {
            return DetectionEffect::Stale;
        }

        if !detection.face_detected {
            self.happy_score = 0.0;
            if self.step != ValidationStep::Detecting {
                debug!("Face lost, back to searching");
                self.transition(ValidationStep::Detecting);
            }
            return DetectionEffect::Continue;
        }

        self.happy_score = detection.liveness_score;

        if settings.require_smile {
            if self.step == ValidationStep::Detecting {
                self.transition(ValidationStep::Challenge);
                return DetectionEffect::Continue;
            }
            let challenge = LivenessChallenge::new(settings.smile_threshold);
            if let Verdict::Pending(score) = challenge.evaluate(detection.liveness_score) {
                debug!("Smile {:.2} below {:.2}", score, challenge.threshold());
                return DetectionEffect::Continue;
            }
        }

        let Some(descriptor) = detection.descriptor.clone() else {
            debug!("Face without descriptor, waiting for a better frame");
            return DetectionEffect::Continue;
        };

        self.generation += 1;
        self.transition(ValidationStep::Validating);
        DetectionEffect::Submit {
            generation: self.generation,
            descriptor,
        }
    }

    /// Applies a submission result. Returns which reset delay to schedule,
    /// or `None` when the result is stale.
    pub fn apply_submission(
        &mut self,
        generation: u64,
        outcome: Result<SubmitOutcome, Error>,
    ) -> Option<ResetKind> {
        if generation != self.generation || self.step != ValidationStep::Validating {
            debug!("Discarding stale submission result (generation {})", generation);
            return None;
        }

        match outcome {
            Ok(SubmitOutcome::Matched(result)) => {
                self.error = None;
                self.detected_person = Some(result);
                self.transition(ValidationStep::Success);
                Some(ResetKind::Success)
            }
            Ok(SubmitOutcome::NoMatch { detail }) => {
                self.error = Some(detail.unwrap_or_else(|| messages::NO_MATCH.to_string()));
                self.transition(ValidationStep::NoMatch);
                Some(ResetKind::Failure)
            }
            Err(e) => {
                warn!("Submission failed: {}", e);
                self.error = Some(match e {
                    Error::Server { detail, .. } => detail,
                    _ => messages::CONNECTION_ERROR.to_string(),
                });
                self.transition(ValidationStep::Error);
                Some(ResetKind::Failure)
            }
        }
    }

    /// Auto-reset after a submission result. Returns true when scanning resumes.
    pub fn apply_reset(&mut self, generation: u64) -> bool {
        let resettable = matches!(
            self.step,
            ValidationStep::Success | ValidationStep::NoMatch | ValidationStep::Error
        );
        if generation != self.generation || !resettable || !self.camera_active {
            return false;
        }
        self.enter_detecting();
        true
    }

    /// Camera stopped: everything in flight becomes stale.
    pub fn on_stopped(&mut self) {
        self.generation += 1;
        self.camera_active = false;
        self.happy_score = 0.0;
        self.detected_person = None;
        if self.models_failed || self.step == ValidationStep::Loading {
            return;
        }
        self.error = None;
        self.transition(ValidationStep::Waiting);
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            step: self.step,
            happy_score: self.happy_score,
            message: self.status_message(),
            error: self.error.clone(),
            detected_person: self.detected_person.clone(),
            camera_active: self.camera_active,
            models_loaded: self.models_loaded,
        }
    }

    fn status_message(&self) -> String {
        match self.step {
            ValidationStep::Loading => messages::LOADING.to_string(),
            ValidationStep::Waiting => messages::WAITING.to_string(),
            ValidationStep::Detecting => messages::DETECTING.to_string(),
            ValidationStep::Challenge => messages::CHALLENGE.to_string(),
            ValidationStep::Validating => messages::VALIDATING.to_string(),
            ValidationStep::Success => {
                let person = self.detected_person.as_ref();
                let name = person
                    .and_then(|p| p.display_name())
                    .unwrap_or_else(|| "personal".to_string());
                match person.and_then(|p| p.match_percentage()) {
                    Some(pct) => format!("Asistencia registrada: {} ({}%)", name, pct),
                    None => format!("Asistencia registrada: {}", name),
                }
            }
            ValidationStep::NoMatch | ValidationStep::Error => self
                .error
                .clone()
                .unwrap_or_else(|| messages::UNKNOWN_ERROR.to_string()),
        }
    }

    fn enter_detecting(&mut self) {
        self.generation += 1;
        self.happy_score = 0.0;
        self.error = None;
        self.detected_person = None;
        self.transition(ValidationStep::Detecting);
    }

    fn transition(&mut self, next: ValidationStep) {
        if self.step != next {
            info!("Session step {:?} -> {:?}", self.step, next);
            self.step = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face::DESCRIPTOR_LEN;

    fn descriptor() -> FaceDescriptor {
        FaceDescriptor::try_from(vec![0.1; DESCRIPTOR_LEN]).unwrap()
    }

    fn face(score: f32) -> Detection {
        Detection {
            face_detected: true,
            liveness_score: score,
            descriptor: Some(descriptor()),
        }
    }

    fn no_smile() -> AppSettings {
        AppSettings { require_smile: false, ..AppSettings::default() }
    }

    fn scanning() -> SessionState {
        let mut state = SessionState::new();
        state.on_models_loaded();
        state.on_camera_started();
        assert_eq!(state.step(), ValidationStep::Detecting);
        state
    }

    #[test]
    fn test_startup_sequence() {
        let mut state = SessionState::new();
        assert_eq!(state.step(), ValidationStep::Loading);
        state.on_models_loaded();
        assert_eq!(state.step(), ValidationStep::Waiting);
        assert!(!state.ready_to_detect());
        state.on_camera_started();
        assert_eq!(state.step(), ValidationStep::Detecting);
        assert!(state.ready_to_detect());
    }

    #[test]
    fn test_camera_before_models() {
        let mut state = SessionState::new();
        state.on_camera_started();
        assert_eq!(state.step(), ValidationStep::Loading);
        assert!(!state.ready_to_detect());
        state.on_models_loaded();
        assert_eq!(state.step(), ValidationStep::Detecting);
    }

    #[test]
    fn test_model_failure_is_sticky() {
        let mut state = SessionState::new();
        state.on_models_failed();
        assert_eq!(state.step(), ValidationStep::Error);
        assert_eq!(state.snapshot().message, messages::MODEL_LOAD_FAILED);
        assert!(!state.can_start_camera());
        state.on_stopped();
        assert_eq!(state.step(), ValidationStep::Error);
    }

    #[test]
    fn test_model_failure_after_camera_start_releases_camera() {
        let mut state = SessionState::new();
        state.on_camera_started();
        assert!(state.camera_active());
        state.on_models_failed();
        assert_eq!(state.step(), ValidationStep::Error);
        assert!(!state.camera_active());
        assert!(!state.ready_to_detect());
        assert!(!state.can_start_camera());
    }

    #[test]
    fn test_camera_failure() {
        let mut state = SessionState::new();
        state.on_models_loaded();
        state.on_camera_failed();
        assert_eq!(state.step(), ValidationStep::Error);
        assert_eq!(state.snapshot().error.as_deref(), Some(messages::CAMERA_UNAVAILABLE));
        assert!(state.can_start_camera());
        // No auto reset for a camera failure.
        assert!(!state.apply_reset(state.generation()));
    }

    #[test]
    fn test_direct_submission_without_smile() {
        let mut state = scanning();
        let before = state.generation();
        let effect = state.apply_detection(before, &face(0.0), &no_smile());
        match effect {
            DetectionEffect::Submit { generation, .. } => assert_eq!(generation, before + 1),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(state.step(), ValidationStep::Validating);
    }

    #[test]
    fn test_challenge_gates_submission() {
        let mut state = scanning();
        let settings = AppSettings { require_smile: true, smile_threshold: 0.7, ..AppSettings::default() };
        let gen = state.generation();

        assert_eq!(state.apply_detection(gen, &face(0.3), &settings), DetectionEffect::Continue);
        assert_eq!(state.step(), ValidationStep::Challenge);
        assert_eq!(state.apply_detection(gen, &face(0.5), &settings), DetectionEffect::Continue);
        assert_eq!(state.step(), ValidationStep::Challenge);
        assert_eq!(state.happy_score(), 0.5);
        assert!(matches!(
            state.apply_detection(gen, &face(0.75), &settings),
            DetectionEffect::Submit { .. }
        ));
        assert_eq!(state.step(), ValidationStep::Validating);
    }

    #[test]
    fn test_first_challenge_tick_never_submits() {
        let mut state = scanning();
        let gen = state.generation();
        assert_eq!(state.apply_detection(gen, &face(0.99), &AppSettings::default()), DetectionEffect::Continue);
        assert_eq!(state.step(), ValidationStep::Challenge);
    }

    #[test]
    fn test_losing_face_resets_challenge() {
        let mut state = scanning();
        let gen = state.generation();
        state.apply_detection(gen, &face(0.4), &AppSettings::default());
        assert_eq!(state.step(), ValidationStep::Challenge);
        state.apply_detection(gen, &Detection::empty(), &AppSettings::default());
        assert_eq!(state.step(), ValidationStep::Detecting);
        assert_eq!(state.happy_score(), 0.0);
    }

    #[test]
    fn test_detections_ignored_outside_scanning() {
        let mut state = scanning();
        let gen = state.generation();
        let DetectionEffect::Submit { generation, .. } = state.apply_detection(gen, &face(0.0), &no_smile()) else {
            panic!("expected submit");
        };
        assert_eq!(state.apply_detection(generation, &Detection::empty(), &no_smile()), DetectionEffect::Stale);
        assert_eq!(state.apply_detection(gen, &face(0.9), &no_smile()), DetectionEffect::Stale);
        assert_eq!(state.step(), ValidationStep::Validating);
    }

    #[test]
    fn test_success_and_reset() {
        let mut state = scanning();
        let gen = state.generation();
        let DetectionEffect::Submit { generation, .. } = state.apply_detection(gen, &face(0.0), &no_smile()) else {
            panic!("expected submit");
        };
        let result = AttendanceResult {
            score: Some(0.92),
            matched_personal_id: Some(crate::submit::PersonalId::Number(3)),
            usuario: Some(serde_json::json!("Rosa Condori")),
            ..AttendanceResult::default()
        };
        assert_eq!(
            state.apply_submission(generation, Ok(SubmitOutcome::Matched(result))),
            Some(ResetKind::Success)
        );
        let snapshot = state.snapshot();
        assert_eq!(snapshot.step, ValidationStep::Success);
        assert_eq!(snapshot.match_percentage(), Some(92));
        assert_eq!(snapshot.message, "Asistencia registrada: Rosa Condori (92%)");

        assert!(state.apply_reset(generation));
        let snapshot = state.snapshot();
        assert_eq!(snapshot.step, ValidationStep::Detecting);
        assert_eq!(snapshot.happy_score, 0.0);
        assert!(snapshot.detected_person.is_none());
    }

    #[test]
    fn test_no_match_fallback_message() {
        let mut state = scanning();
        let gen = state.generation();
        let DetectionEffect::Submit { generation, .. } = state.apply_detection(gen, &face(0.0), &no_smile()) else {
            panic!("expected submit");
        };
        assert_eq!(
            state.apply_submission(generation, Ok(SubmitOutcome::NoMatch { detail: None })),
            Some(ResetKind::Failure)
        );
        assert_eq!(state.step(), ValidationStep::NoMatch);
        assert_eq!(state.snapshot().message, messages::NO_MATCH);
    }

    #[test]
    fn test_transport_error_message() {
        let mut state = scanning();
        let gen = state.generation();
        let DetectionEffect::Submit { generation, .. } = state.apply_detection(gen, &face(0.0), &no_smile()) else {
            panic!("expected submit");
        };
        state.apply_submission(generation, Err(Error::Transport("connection refused".into())));
        assert_eq!(state.step(), ValidationStep::Error);
        assert_eq!(state.snapshot().error.as_deref(), Some(messages::CONNECTION_ERROR));
    }

    #[test]
    fn test_stop_discards_in_flight_work() {
        let mut state = scanning();
        let gen = state.generation();
        let DetectionEffect::Submit { generation, .. } = state.apply_detection(gen, &face(0.0), &no_smile()) else {
            panic!("expected submit");
        };
        state.on_stopped();
        assert_eq!(state.step(), ValidationStep::Waiting);
        assert_eq!(state.apply_submission(generation, Ok(SubmitOutcome::NoMatch { detail: None })), None);
        assert!(!state.apply_reset(generation));
        assert_eq!(state.step(), ValidationStep::Waiting);

        let once = state.snapshot();
        state.on_stopped();
        let twice = state.snapshot();
        assert_eq!(once.step, twice.step);
        assert_eq!(once.camera_active, twice.camera_active);
    }
}
