//! rollcall-engine — Verification orchestrator.
//!
//! Composes the core decision components and the template vault into
//! one decision per check-in attempt. CPU-bound work (pixel scans,
//! descriptor distances, AEAD) runs on a dedicated engine thread;
//! async callers talk to it through a clone-safe [`EngineHandle`].

pub mod cache;
pub mod config;
pub mod detector;
pub mod engine;
pub mod error;
pub mod sqlite;
pub mod stores;

pub use config::EngineConfig;
pub use detector::{Capture, Detection, DetectorError, FaceDetector, SidecarDetector};
pub use engine::{spawn_engine, CheckInContext, CheckInRequest, EngineHandle};
pub use error::{EngineError, EnrollmentError, Outcome, RejectReason, VerificationResult};
pub use sqlite::SqliteStore;
pub use stores::{AttendanceStore, EnrollmentStore, MemoryStore, SessionStore, StoreError};
