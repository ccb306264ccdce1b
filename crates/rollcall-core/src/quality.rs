//! Image quality assessment — the gate in front of matching.
//!
//! Scores a detected face region for size, pose, brightness, and
//! sharpness before the sample is trusted for matching or enrollment.
//! The composite score is a product of per-metric multipliers; callers
//! reject anything below the acceptance floor before touching the
//! matcher.

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::types::FaceSample;

// Rec.601 luma weights.
const LUMA_R: f32 = 0.299;
const LUMA_G: f32 = 0.587;
const LUMA_B: f32 = 0.114;

/// Vertical mouth-to-eye angle of a frontal face, in degrees, derived
/// from the canonical InsightFace 112x112 reference landmark geometry
/// (eye line at y≈51.6, mouth line at y≈92.3, inter-eye span ≈35.2 px).
const FRONTAL_PITCH_DEG: f32 = 49.1;

/// Head pose angles in degrees. Zero is a frontal face.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PoseAngles {
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
}

impl PoseAngles {
    /// Largest absolute deviation across the three axes.
    pub fn max_abs(&self) -> f32 {
        self.yaw.abs().max(self.pitch.abs()).max(self.roll.abs())
    }
}

/// Face-size ratio breakpoints and their multipliers.
#[derive(Debug, Clone, Copy)]
pub struct SizeBreakpoints {
    /// Below this box/image area ratio the face is too small.
    pub small: f32,
    /// Above this ratio the face fills too much of the frame.
    pub large: f32,
    /// Ideal band (inclusive) scoring a full multiplier.
    pub ideal_min: f32,
    pub ideal_max: f32,
    pub small_multiplier: f32,
    pub large_multiplier: f32,
    pub marginal_multiplier: f32,
}

/// Pose deviation breakpoints and their multipliers.
#[derive(Debug, Clone, Copy)]
pub struct PoseBreakpoints {
    /// Degrees beyond which the pose is severe.
    pub severe_deg: f32,
    /// Degrees beyond which the pose is moderate.
    pub moderate_deg: f32,
    pub severe_multiplier: f32,
    pub moderate_multiplier: f32,
}

/// Acceptable normalized brightness band.
#[derive(Debug, Clone, Copy)]
pub struct BrightnessBand {
    pub min: f32,
    pub max: f32,
    pub outside_multiplier: f32,
}

/// Sharpness normalization and floor.
#[derive(Debug, Clone, Copy)]
pub struct SharpnessBreakpoints {
    /// Empirical divisor normalizing mean gradient magnitude to [0, 1].
    pub divisor: f32,
    /// Below this normalized sharpness the sample is penalized.
    pub floor: f32,
    pub below_floor_multiplier: f32,
}

/// Quality assessment configuration. Validated once at construction;
/// the defaults carry the production breakpoints.
#[derive(Debug, Clone, Copy)]
pub struct QualityConfig {
    pub size: SizeBreakpoints,
    pub pose: PoseBreakpoints,
    pub brightness: BrightnessBand,
    pub sharpness: SharpnessBreakpoints,
    /// Composite score below this floor is rejected outright.
    pub acceptance_floor: f32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            size: SizeBreakpoints {
                small: 0.10,
                large: 0.60,
                ideal_min: 0.15,
                ideal_max: 0.40,
                small_multiplier: 0.6,
                large_multiplier: 0.7,
                marginal_multiplier: 0.8,
            },
            pose: PoseBreakpoints {
                severe_deg: 30.0,
                moderate_deg: 15.0,
                severe_multiplier: 0.5,
                moderate_multiplier: 0.7,
            },
            brightness: BrightnessBand {
                min: 0.3,
                max: 0.8,
                outside_multiplier: 0.6,
            },
            sharpness: SharpnessBreakpoints {
                divisor: 50.0,
                floor: 0.5,
                below_floor_multiplier: 0.7,
            },
            acceptance_floor: 0.7,
        }
    }
}

impl QualityConfig {
    /// Check breakpoint ordering. Call once when loading non-default
    /// configuration.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.size.small <= self.size.ideal_min && self.size.ideal_max <= self.size.large) {
            return Err("size breakpoints out of order".into());
        }
        if self.pose.moderate_deg >= self.pose.severe_deg {
            return Err("pose moderate threshold must be below severe".into());
        }
        if self.brightness.min >= self.brightness.max {
            return Err("brightness band inverted".into());
        }
        if self.sharpness.divisor <= 0.0 {
            return Err("sharpness divisor must be positive".into());
        }
        if !(0.0..=1.0).contains(&self.acceptance_floor) {
            return Err("acceptance floor must be in [0, 1]".into());
        }
        Ok(())
    }
}

/// Which sub-metric dragged a sample below full score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityFlaw {
    FaceSize,
    Pose,
    Brightness,
    Sharpness,
}

/// Per-sample quality assessment. Produced fresh per capture; immutable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QualityScore {
    /// Composite gating score in [0, 1].
    pub score: f32,
    /// Mean face-region luma, normalized to [0, 1].
    pub brightness: f32,
    /// Mean gradient magnitude normalized by the configured divisor,
    /// clamped to [0, 1].
    pub sharpness: f32,
    /// Shorter side of the face box, in pixels.
    pub face_size_px: f32,
    pub pose: PoseAngles,
    size_multiplier: f32,
    pose_multiplier: f32,
    brightness_multiplier: f32,
    sharpness_multiplier: f32,
}

impl QualityScore {
    pub fn passes(&self, floor: f32) -> bool {
        self.score >= floor
    }

    /// Sub-metrics that scored below a full multiplier, for rejection
    /// reasons shown to the user.
    pub fn failing_metrics(&self) -> Vec<QualityFlaw> {
        let mut flaws = Vec::new();
        if self.size_multiplier < 1.0 {
            flaws.push(QualityFlaw::FaceSize);
        }
        if self.pose_multiplier < 1.0 {
            flaws.push(QualityFlaw::Pose);
        }
        if self.brightness_multiplier < 1.0 {
            flaws.push(QualityFlaw::Brightness);
        }
        if self.sharpness_multiplier < 1.0 {
            flaws.push(QualityFlaw::Sharpness);
        }
        flaws
    }
}

/// Assess a detected face against the source image.
pub fn assess(image: &RgbImage, sample: &FaceSample, cfg: &QualityConfig) -> QualityScore {
    let pose = estimate_pose(sample);
    let (brightness, sharpness) = face_region_stats(image, sample, cfg.sharpness.divisor);

    let size_ratio = size_ratio(&sample.bbox, image.width(), image.height());

    let size_multiplier = size_multiplier(size_ratio, &cfg.size);
    let pose_multiplier = pose_multiplier(pose.max_abs(), &cfg.pose);
    let brightness_multiplier = if brightness < cfg.brightness.min || brightness > cfg.brightness.max
    {
        cfg.brightness.outside_multiplier
    } else {
        1.0
    };
    let sharpness_multiplier = if sharpness < cfg.sharpness.floor {
        cfg.sharpness.below_floor_multiplier
    } else {
        1.0
    };

    let score = (size_multiplier * pose_multiplier * brightness_multiplier * sharpness_multiplier)
        .clamp(0.0, 1.0);

    tracing::debug!(
        score,
        size_ratio,
        brightness,
        sharpness,
        yaw = pose.yaw,
        pitch = pose.pitch,
        roll = pose.roll,
        "quality assessed"
    );

    QualityScore {
        score,
        brightness,
        sharpness,
        face_size_px: sample.bbox.width.min(sample.bbox.height),
        pose,
        size_multiplier,
        pose_multiplier,
        brightness_multiplier,
        sharpness_multiplier,
    }
}

/// Box area over image area. The pixel counts are converted before
/// multiplying; `width * height` in u32 overflows past ~4.3 gigapixels.
fn size_ratio(bbox: &crate::types::FaceBox, width: u32, height: u32) -> f32 {
    let image_area = width as f32 * height as f32;
    if image_area > 0.0 {
        bbox.area() / image_area
    } else {
        0.0
    }
}

fn size_multiplier(ratio: f32, bp: &SizeBreakpoints) -> f32 {
    if ratio < bp.small {
        bp.small_multiplier
    } else if ratio > bp.large {
        bp.large_multiplier
    } else if ratio >= bp.ideal_min && ratio <= bp.ideal_max {
        1.0
    } else {
        bp.marginal_multiplier
    }
}

fn pose_multiplier(max_abs_deg: f32, bp: &PoseBreakpoints) -> f32 {
    if max_abs_deg > bp.severe_deg {
        bp.severe_multiplier
    } else if max_abs_deg > bp.moderate_deg {
        bp.moderate_multiplier
    } else {
        1.0
    }
}

/// Derive pose angles from landmark geometry, all via arctangent:
/// yaw from the nose-tip horizontal offset relative to the eye midpoint,
/// roll from the inter-eye angle, pitch from the mouth-center vertical
/// offset relative to the eye midpoint minus the frontal reference.
fn estimate_pose(sample: &FaceSample) -> PoseAngles {
    let lm = &sample.landmarks;
    let (eye_cx, eye_cy) = lm.eye_center();
    let (_, mouth_cy) = lm.mouth_center();
    let eye_span = lm.inter_eye_distance().max(f32::EPSILON);

    let yaw = (lm.nose.0 - eye_cx).atan2(eye_span).to_degrees();
    let roll = (lm.right_eye.1 - lm.left_eye.1)
        .atan2(lm.right_eye.0 - lm.left_eye.0)
        .to_degrees();
    let pitch = (mouth_cy - eye_cy).atan2(eye_span).to_degrees() - FRONTAL_PITCH_DEG;

    PoseAngles { yaw, pitch, roll }
}

/// Mean normalized luma and normalized mean gradient magnitude over
/// the face box, clamped to the image bounds.
fn face_region_stats(image: &RgbImage, sample: &FaceSample, sharpness_divisor: f32) -> (f32, f32) {
    let width = image.width();
    let height = image.height();

    let x1 = sample.bbox.x.max(0.0) as u32;
    let y1 = sample.bbox.y.max(0.0) as u32;
    let x2 = ((sample.bbox.x + sample.bbox.width) as u32).min(width);
    let y2 = ((sample.bbox.y + sample.bbox.height) as u32).min(height);

    if x2 <= x1 || y2 <= y1 {
        return (0.0, 0.0);
    }

    let box_w = (x2 - x1) as usize;
    let box_h = (y2 - y1) as usize;

    // One pass to collect lumas, then finite differences over the region.
    let mut luma = vec![0.0f32; box_w * box_h];
    let mut luma_sum = 0.0f64;
    for y in y1..y2 {
        for x in x1..x2 {
            let p = image.get_pixel(x, y).0;
            let l = LUMA_R * p[0] as f32 + LUMA_G * p[1] as f32 + LUMA_B * p[2] as f32;
            luma[(y - y1) as usize * box_w + (x - x1) as usize] = l;
            luma_sum += l as f64;
        }
    }

    let brightness = (luma_sum / (box_w * box_h) as f64 / 255.0) as f32;

    if box_w < 2 || box_h < 2 {
        return (brightness, 0.0);
    }

    let mut gradient_sum = 0.0f64;
    let mut samples = 0u64;
    for y in 0..box_h - 1 {
        for x in 0..box_w - 1 {
            let here = luma[y * box_w + x];
            let dx = luma[y * box_w + x + 1] - here;
            let dy = luma[(y + 1) * box_w + x] - here;
            gradient_sum += (dx * dx + dy * dy).sqrt() as f64;
            samples += 1;
        }
    }

    let mean_gradient = (gradient_sum / samples as f64) as f32;
    let sharpness = (mean_gradient / sharpness_divisor).clamp(0.0, 1.0);

    (brightness, sharpness)
}
