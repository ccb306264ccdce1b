//! Shared data types for the verification pipeline.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::location::SessionLocation;

/// Descriptor dimensionality. Every enrolled and captured descriptor
/// carries exactly this many values; the [`FaceDescriptor`] constructor
/// is the single place where length is checked.
pub const DESCRIPTOR_DIM: usize = 128;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("descriptor must have exactly {expected} values, got {actual}")]
    WrongLength { expected: usize, actual: usize },
}

/// Fixed-length face embedding.
///
/// Length is enforced at construction so that distance computation is
/// infallible by construction — a descriptor of the wrong length is an
/// error at the boundary, never a silent fallback.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct FaceDescriptor(Vec<f32>);

impl FaceDescriptor {
    pub fn from_vec(values: Vec<f32>) -> Result<Self, DescriptorError> {
        if values.len() != DESCRIPTOR_DIM {
            return Err(DescriptorError::WrongLength {
                expected: DESCRIPTOR_DIM,
                actual: values.len(),
            });
        }
        Ok(Self(values))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Serialize to little-endian bytes (4 bytes per dimension).
    /// This is the canonical plaintext form fed to the template codec.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(DESCRIPTOR_DIM * 4);
        for v in &self.0 {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    /// Parse the canonical little-endian byte form.
    pub fn from_le_bytes(bytes: &[u8]) -> Result<Self, DescriptorError> {
        if bytes.len() != DESCRIPTOR_DIM * 4 {
            return Err(DescriptorError::WrongLength {
                expected: DESCRIPTOR_DIM,
                actual: bytes.len() / 4,
            });
        }
        let values = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(Self(values))
    }
}

impl TryFrom<Vec<f32>> for FaceDescriptor {
    type Error = DescriptorError;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        Self::from_vec(values)
    }
}

impl From<FaceDescriptor> for Vec<f32> {
    fn from(d: FaceDescriptor) -> Self {
        d.0
    }
}

// Biometric data: never print the raw values.
impl std::fmt::Debug for FaceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FaceDescriptor({} dims)", self.0.len())
    }
}

/// Bounding box of a detected face in image coordinates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl FaceBox {
    pub fn area(&self) -> f32 {
        self.width * self.height
    }
}

/// Named facial landmark points, in image coordinates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Landmarks {
    pub left_eye: (f32, f32),
    pub right_eye: (f32, f32),
    pub nose: (f32, f32),
    pub left_mouth: (f32, f32),
    pub right_mouth: (f32, f32),
}

impl Landmarks {
    /// Midpoint between the two eyes.
    pub fn eye_center(&self) -> (f32, f32) {
        (
            (self.left_eye.0 + self.right_eye.0) / 2.0,
            (self.left_eye.1 + self.right_eye.1) / 2.0,
        )
    }

    /// Midpoint between the two mouth corners.
    pub fn mouth_center(&self) -> (f32, f32) {
        (
            (self.left_mouth.0 + self.right_mouth.0) / 2.0,
            (self.left_mouth.1 + self.right_mouth.1) / 2.0,
        )
    }

    /// Distance between the eye points.
    pub fn inter_eye_distance(&self) -> f32 {
        let dx = self.right_eye.0 - self.left_eye.0;
        let dy = self.right_eye.1 - self.left_eye.1;
        (dx * dx + dy * dy).sqrt()
    }
}

/// A detected face in a freshly captured frame. Ephemeral — produced
/// per capture, consumed by quality gating, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceSample {
    pub bbox: FaceBox,
    pub landmarks: Landmarks,
    /// Detector confidence in [0, 1].
    pub confidence: f32,
}

/// Resulting status of a recorded check-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttendanceStatus {
    Present,
    Late,
    Absent,
    Excused,
    Pending,
}

/// How a record was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckInMethod {
    FaceRecognition,
    QrCode,
    Manual,
    AutoMarked,
}

/// One attendance record. The persistence layer enforces at most one
/// live record per `(student_id, class_id, date)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub student_id: String,
    pub class_id: String,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub method: CheckInMethod,
    pub check_in_time: Option<DateTime<Utc>>,
    /// Match confidence in [0, 1], when produced by face recognition.
    pub confidence: Option<f32>,
}

/// Attempt window for a session, as same-day times.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AttendanceWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

/// A scheduled class session. Read-only input to the engine; owned by
/// external scheduling. All times are UTC instants on `date`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassSession {
    pub class_id: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub window: AttendanceWindow,
    pub location: SessionLocation,
}

impl ClassSession {
    pub fn start_at(&self) -> DateTime<Utc> {
        self.date.and_time(self.start_time).and_utc()
    }

    pub fn window_start_at(&self) -> DateTime<Utc> {
        self.date.and_time(self.window.start).and_utc()
    }

    pub fn window_end_at(&self) -> DateTime<Utc> {
        self.date.and_time(self.window.end).and_utc()
    }
}

/// Round to two decimal places. Display/wire rule for confidences and
/// similarity scores; internal comparisons use full precision.
pub fn round2(x: f32) -> f32 {
    (x * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_length_enforced() {
        assert!(FaceDescriptor::from_vec(vec![0.0; 128]).is_ok());
        let err = FaceDescriptor::from_vec(vec![0.0; 64]).unwrap_err();
        assert_eq!(
            err,
            DescriptorError::WrongLength {
                expected: 128,
                actual: 64
            }
        );
    }

    #[test]
    fn test_descriptor_le_bytes_roundtrip() {
        let values: Vec<f32> = (0..128).map(|i| i as f32 * 0.25 - 3.0).collect();
        let d = FaceDescriptor::from_vec(values).unwrap();
        let bytes = d.to_le_bytes();
        assert_eq!(bytes.len(), 512);
        let back = FaceDescriptor::from_le_bytes(&bytes).unwrap();
        assert_eq!(back, d);
    }

    #[test]
    fn test_descriptor_debug_hides_values() {
        let d = FaceDescriptor::from_vec(vec![0.42; 128]).unwrap();
        let repr = format!("{d:?}");
        assert_eq!(repr, "FaceDescriptor(128 dims)");
        assert!(!repr.contains("0.42"));
    }

    #[test]
    fn test_descriptor_serde_rejects_wrong_length() {
        let json = serde_json::to_string(&vec![1.0f32; 96]).unwrap();
        assert!(serde_json::from_str::<FaceDescriptor>(&json).is_err());
    }

    #[test]
    fn test_status_wire_names() {
        let s = serde_json::to_string(&AttendanceStatus::Present).unwrap();
        assert_eq!(s, "\"PRESENT\"");
        let m = serde_json::to_string(&CheckInMethod::FaceRecognition).unwrap();
        assert_eq!(m, "\"FACE_RECOGNITION\"");
    }

    #[test]
    fn test_session_instants() {
        let session = ClassSession {
            class_id: "CS101".into(),
            date: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(10, 30, 0).unwrap(),
            window: AttendanceWindow {
                start: NaiveTime::from_hms_opt(8, 45, 0).unwrap(),
                end: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            },
            location: SessionLocation::default(),
        };
        assert!(session.window_start_at() < session.start_at());
        assert!(session.start_at() < session.window_end_at());
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(0.754_999), 0.75);
        assert_eq!(round2(0.755_1), 0.76);
        assert_eq!(round2(1.0), 1.0);
    }
}
