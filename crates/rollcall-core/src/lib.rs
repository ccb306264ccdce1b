//! rollcall-core — Attendance verification logic.
//!
//! Pure decision components for biometric check-in: image quality
//! gating, descriptor matching, attendance-window evaluation, and
//! WiFi/GPS location validation. No I/O — every function here is
//! driven entirely by its inputs and is unit-testable with synthetic
//! data.

pub mod location;
pub mod matcher;
pub mod quality;
pub mod types;
pub mod window;

pub use matcher::{EuclideanMatcher, Match, Matcher};
pub use quality::{QualityConfig, QualityScore};
pub use types::{AttendanceRecord, AttendanceStatus, ClassSession, FaceDescriptor, FaceSample};
pub use window::{WindowConfig, WindowState};
