//! D-Bus surface of the attendance daemon.
//!
//! Bus name: org.rollcall.Rollcall1
//! Object path: /org/rollcall/Rollcall1
//!
//! Requests carry file paths to captured images; structured results go
//! back as JSON strings so clients stay decoupled from our types.

use std::path::Path;

use chrono::Utc;
use rollcall_core::location::GpsFix;
use rollcall_engine::{Capture, CheckInRequest, EngineHandle};
use zbus::interface;

use crate::signals::{self, HostSignalSource};

pub struct RollcallService {
    engine: EngineHandle,
    signals: HostSignalSource,
    signal_timeout_secs: u64,
}

impl RollcallService {
    pub fn new(engine: EngineHandle, signals: HostSignalSource, signal_timeout_secs: u64) -> Self {
        Self {
            engine,
            signals,
            signal_timeout_secs,
        }
    }
}

fn failed(e: impl std::fmt::Display) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(e.to_string())
}

#[interface(name = "org.rollcall.Rollcall1")]
impl RollcallService {
    /// Run one check-in attempt for a student against today's session
    /// of a class. `gps_json` is an optional fix from the client
    /// (`{"latitude":..,"longitude":..,"accuracy_m":..}`), empty when
    /// unavailable. Returns the verification result as JSON.
    async fn check_in(
        &self,
        student_id: &str,
        class_id: &str,
        image_path: &str,
        gps_json: &str,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(student_id, class_id, image_path, "check-in requested");

        let capture = Capture::from_path(Path::new(image_path)).map_err(failed)?;
        let client_gps: Option<GpsFix> = if gps_json.is_empty() {
            None
        } else {
            Some(
                serde_json::from_str(gps_json)
                    .map_err(|e| zbus::fdo::Error::InvalidArgs(e.to_string()))?,
            )
        };
        let context =
            signals::gather_context(&self.signals, self.signal_timeout_secs, client_gps).await;

        let result = self
            .engine
            .check_in(CheckInRequest {
                student_id: student_id.to_string(),
                class_id: class_id.to_string(),
                capture,
                context,
                now: Utc::now(),
            })
            .await
            .map_err(failed)?;

        serde_json::to_string(&result).map_err(failed)
    }

    /// Enroll a user from one or more capture images, replacing any
    /// existing profile. Returns a profile summary as JSON; templates
    /// themselves never leave the daemon.
    async fn enroll(&self, user_id: &str, image_paths: Vec<String>) -> zbus::fdo::Result<String> {
        tracing::info!(user_id, images = image_paths.len(), "enroll requested");

        let mut captures = Vec::with_capacity(image_paths.len());
        for path in &image_paths {
            captures.push(Capture::from_path(Path::new(path)).map_err(failed)?);
        }

        let profile = self
            .engine
            .enroll(user_id.to_string(), captures)
            .await
            .map_err(failed)?;

        Ok(serde_json::json!({
            "user_id": profile.user_id,
            "templates": profile.templates.len(),
            "enrollment_quality": profile.enrollment_quality,
            "created_at": profile.created_at.to_rfc3339(),
        })
        .to_string())
    }

    /// Delete a user's enrolled profile.
    async fn remove_profile(&self, user_id: &str) -> zbus::fdo::Result<()> {
        tracing::info!(user_id, "profile removal requested");
        self.engine
            .remove_profile(user_id.to_string())
            .await
            .map_err(failed)
    }

    /// Daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "signal_timeout_secs": self.signal_timeout_secs,
        })
        .to_string())
    }
}
