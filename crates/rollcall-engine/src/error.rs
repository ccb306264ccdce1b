//! Verification outcome and error taxonomy.
//!
//! Every rejection is a closed variant with a human-readable reason;
//! there is no free-text fallback. Fatal integrity failures are logged
//! and escalated separately — end users only see the generic reason.

use chrono::NaiveDate;
use rollcall_core::quality::QualityFlaw;
use rollcall_core::types::{AttendanceRecord, AttendanceStatus};
use rollcall_vault::VaultError;
use serde::Serialize;
use thiserror::Error;

use crate::detector::DetectorError;
use crate::stores::StoreError;

/// Why an attempt was rejected. Recoverable variants invite a fresh
/// capture; window variants are terminal for this attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    NoFaceDetected,
    MultipleFacesDetected {
        count: usize,
    },
    LowQualityImage {
        score: f32,
        failing: Vec<QualityFlaw>,
    },
    NoMatch {
        best_similarity: f32,
    },
    LocationInvalid {
        confidence: f32,
    },
    WindowEarly {
        minutes_until_open: i64,
    },
    WindowClosed,
    /// Tampered or corrupted enrolled template. Not recoverable by
    /// resubmission; the profile needs manual review.
    TemplateIntegrity,
}

impl RejectReason {
    /// Diagnostic confidence: the score of whichever sub-check failed.
    pub fn confidence(&self) -> f32 {
        match self {
            RejectReason::LowQualityImage { score, .. } => *score,
            RejectReason::NoMatch { best_similarity } => *best_similarity,
            RejectReason::LocationInvalid { confidence } => *confidence,
            _ => 0.0,
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::NoFaceDetected => write!(f, "no face detected — please retake the photo"),
            RejectReason::MultipleFacesDetected { count } => {
                write!(f, "{count} faces detected — only one person may be in frame")
            }
            RejectReason::LowQualityImage { score, .. } => {
                write!(f, "image quality too low ({score:.2}) — please retake the photo")
            }
            RejectReason::NoMatch { .. } => {
                write!(f, "face not recognized — please try again")
            }
            RejectReason::LocationInvalid { .. } => {
                write!(f, "you don't appear to be at the class location")
            }
            RejectReason::WindowEarly { minutes_until_open } => {
                write!(f, "check-in opens in {minutes_until_open} minute(s)")
            }
            RejectReason::WindowClosed => write!(f, "the check-in window has closed"),
            RejectReason::TemplateIntegrity => {
                write!(f, "enrollment data needs attention — contact an administrator")
            }
        }
    }
}

/// Terminal outcome of one check-in attempt.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Accepted {
        status: AttendanceStatus,
        /// Index of the enrolled template that matched.
        matched_template: usize,
        record: AttendanceRecord,
    },
    /// A record already exists for this student/class/date. Not an
    /// error — the existing record is returned and nothing is written.
    AlreadyRecorded {
        existing: AttendanceRecord,
    },
    Rejected {
        reason: RejectReason,
        /// Human-readable reason shown to the user.
        message: String,
    },
}

/// One decision per attempt. Produced once, never mutated.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationResult {
    pub outcome: Outcome,
    /// On accept: the match similarity. On reject: the failing
    /// sub-check's score, for diagnostics.
    pub confidence: f32,
}

impl VerificationResult {
    pub fn rejected(reason: RejectReason) -> Self {
        let confidence = reason.confidence();
        let message = reason.to_string();
        Self {
            outcome: Outcome::Rejected { reason, message },
            confidence,
        }
    }

    pub fn accepted(&self) -> bool {
        matches!(self.outcome, Outcome::Accepted { .. })
    }
}

/// Enrollment failures. All recoverable by retaking the offending image.
#[derive(Error, Debug)]
pub enum EnrollmentError {
    #[error("no enrollment images supplied")]
    NoImages,
    #[error("no face detected in enrollment image {image_index}")]
    NoFaceDetected { image_index: usize },
    #[error("{count} faces detected in enrollment image {image_index}")]
    MultipleFacesDetected { image_index: usize, count: usize },
    #[error("enrollment image {image_index} quality too low ({score:.2})")]
    LowQualityImage { image_index: usize, score: f32 },
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Vault(#[from] VaultError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Infrastructure failures — distinct from rejections, which are
/// ordinary outcomes.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("no session for class {class_id} on {date}")]
    SessionNotFound { class_id: String, date: NaiveDate },
    #[error("student {student_id} has no enrolled profile")]
    NotEnrolled { student_id: String },
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Vault(#[from] VaultError),
    #[error("engine thread exited")]
    ChannelClosed,
}
