//! Smile challenge used as a lightweight anti-spoofing gate.

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    Passed,
    /// Still below threshold; carries the score for the progress indicator.
    Pending(f32),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LivenessChallenge {
    threshold: f32,
}

impl LivenessChallenge {
    pub fn new(threshold: f32) -> Self {
        let threshold = if threshold.is_finite() { threshold.clamp(0.0, 1.0) } else { 1.0 };
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn evaluate(&self, score: f32) -> Verdict {
        if score >= self.threshold {
            Verdict::Passed
        } else {
            Verdict::Pending(score)
        }
    }

    /// Fraction of the way to the threshold, for display.
    pub fn progress(&self, score: f32) -> f32 {
        if self.threshold <= 0.0 {
            return 1.0;
        }
        (score / self.threshold).clamp(0.0, 1.0)
    }
}

// 68-point iBUG indices.
const JAW_LEFT: usize = 0;
const JAW_RIGHT: usize = 16;
const MOUTH_LEFT: usize = 48;
const MOUTH_RIGHT: usize = 54;
const UPPER_LIP_TOP: usize = 51;
const LOWER_LIP_BOTTOM: usize = 57;

const NEUTRAL_WIDTH_RATIO: f32 = 0.40;
const SMILE_WIDTH_SPAN: f32 = 0.12;
const FULL_CORNER_LIFT: f32 = 0.10;

/// Smile score in `[0, 1]` from 68 facial landmarks.
///
/// Mouth width relative to jaw width carries most of the signal; corner lift
/// above the lip centre line adds the rest. Returns `None` for any other
/// landmark layout or a degenerate face.
pub fn smile_score_from_landmarks(points: &[(f32, f32)]) -> Option<f32> {
    if points.len() != 68 {
        return None;
    }

    let dist = |a: usize, b: usize| {
        let (ax, ay) = points[a];
        let (bx, by) = points[b];
        ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
    };

    let jaw_width = dist(JAW_LEFT, JAW_RIGHT);
    let mouth_width = dist(MOUTH_LEFT, MOUTH_RIGHT);
    if jaw_width <= f32::EPSILON || mouth_width <= f32::EPSILON {
        return None;
    }

    let width_score = ((mouth_width / jaw_width - NEUTRAL_WIDTH_RATIO) / SMILE_WIDTH_SPAN).clamp(0.0, 1.0);

    let lip_center_y = (points[UPPER_LIP_TOP].1 + points[LOWER_LIP_BOTTOM].1) / 2.0;
    let corners_y = (points[MOUTH_LEFT].1 + points[MOUTH_RIGHT].1) / 2.0;
    // Image y grows downward, so lifted corners sit above the centre line.
    let lift = (lip_center_y - corners_y) / mouth_width;
    let lift_score = (lift / FULL_CORNER_LIFT).clamp(0.0, 1.0);

    Some(0.7 * width_score + 0.3 * lift_score)
}
