//! Location signal gathering.
//!
//! WiFi visibility is probed on the daemon host via NetworkManager;
//! a GPS fix comes from the client when it has one, otherwise from the
//! host positioning agent. Each probe runs against its own deadline,
//! and any failure or timeout degrades that signal to absent — the
//! verification still runs, the location check just loses one input.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use rollcall_core::location::{GpsFix, WifiNetwork};
use rollcall_engine::CheckInContext;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SignalError {
    #[error("wifi scan failed: {0}")]
    Scan(String),
    #[error("gps fix unreadable: {0}")]
    Fix(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Source of host-side location signals. Either probe may legitimately
/// have nothing to report.
pub trait SignalSource: Send + Sync {
    fn scan_wifi(
        &self,
    ) -> impl Future<Output = Result<Vec<WifiNetwork>, SignalError>> + Send;
    fn gps_fix(&self) -> impl Future<Output = Result<Option<GpsFix>, SignalError>> + Send;
}

/// Production source: WiFi via `nmcli -t -f SSID,SIGNAL dev wifi`, GPS
/// from the JSON fix file the positioning agent maintains (absent on
/// hosts without positioning hardware).
pub struct HostSignalSource {
    gps_fix_path: Option<PathBuf>,
}

impl HostSignalSource {
    pub fn new(gps_fix_path: Option<PathBuf>) -> Self {
        Self { gps_fix_path }
    }
}

impl SignalSource for HostSignalSource {
    async fn scan_wifi(&self) -> Result<Vec<WifiNetwork>, SignalError> {
        let output = tokio::process::Command::new("nmcli")
            .args(["-t", "-f", "SSID,SIGNAL", "dev", "wifi"])
            .output()
            .await?;
        if !output.status.success() {
            return Err(SignalError::Scan(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(parse_nmcli(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn gps_fix(&self) -> Result<Option<GpsFix>, SignalError> {
        let Some(path) = &self.gps_fix_path else {
            return Ok(None);
        };
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            // No fix published yet is a normal state, not an error.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let fix: GpsFix =
            serde_json::from_str(&raw).map_err(|e| SignalError::Fix(e.to_string()))?;
        Ok(Some(fix))
    }
}

/// Parse terse nmcli output: one `SSID:SIGNAL` line per network, where
/// SIGNAL is a 0–100 quality percentage. Colons inside the SSID are
/// escaped by nmcli, so the signal field is everything after the last
/// unescaped colon.
fn parse_nmcli(stdout: &str) -> Vec<WifiNetwork> {
    let mut networks = Vec::new();
    for line in stdout.lines() {
        let Some((ssid_raw, signal_raw)) = line.rsplit_once(':') else {
            continue;
        };
        if ssid_raw.ends_with('\\') {
            // The "colon" belonged to the SSID; no signal field.
            continue;
        }
        let ssid = ssid_raw.replace("\\:", ":");
        if ssid.is_empty() {
            continue; // hidden network
        }
        let Ok(percent) = signal_raw.trim().parse::<i32>() else {
            continue;
        };
        networks.push(WifiNetwork {
            ssid,
            // Usual NetworkManager mapping back from quality to dBm.
            signal_strength_dbm: percent / 2 - 100,
        });
    }
    networks
}

/// Fixed signals, for tests and single-room kiosks with a known
/// environment.
pub struct StaticSignalSource {
    pub wifi: Vec<WifiNetwork>,
    pub gps: Option<GpsFix>,
}

impl SignalSource for StaticSignalSource {
    async fn scan_wifi(&self) -> Result<Vec<WifiNetwork>, SignalError> {
        Ok(self.wifi.clone())
    }

    async fn gps_fix(&self) -> Result<Option<GpsFix>, SignalError> {
        Ok(self.gps)
    }
}

/// Run one probe against a deadline. `None` means the signal is
/// unavailable; the caller proceeds without it.
async fn bounded<T>(
    deadline: Duration,
    what: &str,
    probe: impl Future<Output = Result<T, SignalError>>,
) -> Option<T> {
    match tokio::time::timeout(deadline, probe).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, what, "signal probe failed; continuing without");
            None
        }
        Err(_) => {
            tracing::warn!(what, "signal probe timed out; continuing without");
            None
        }
    }
}

/// Gather the location context for one attempt. WiFi is always probed
/// on the host; a client-supplied GPS fix takes precedence over the
/// host's, which is only probed when the client sent none. Each probe
/// is bounded by the same deadline.
pub async fn gather_context(
    source: &impl SignalSource,
    timeout_secs: u64,
    client_gps: Option<GpsFix>,
) -> CheckInContext {
    let deadline = Duration::from_secs(timeout_secs);
    let (wifi, host_gps) = tokio::join!(
        bounded(deadline, "wifi scan", source.scan_wifi()),
        async {
            if client_gps.is_some() {
                None
            } else {
                bounded(deadline, "gps fix", source.gps_fix())
                    .await
                    .flatten()
            }
        }
    );
    if let Some(networks) = &wifi {
        tracing::debug!(count = networks.len(), "wifi scan complete");
    }
    CheckInContext {
        wifi,
        gps: client_gps.or(host_gps),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fix(latitude: f64) -> GpsFix {
        GpsFix {
            latitude,
            longitude: 21.0,
            accuracy_m: 5.0,
        }
    }

    #[test]
    fn test_parse_nmcli_output() {
        let out = "Campus-A:82\nCampus-B:47\n:30\nHome\\:Lab:65\n";
        let networks = parse_nmcli(out);
        assert_eq!(networks.len(), 3);
        assert_eq!(networks[0].ssid, "Campus-A");
        assert_eq!(networks[0].signal_strength_dbm, -59);
        assert_eq!(networks[2].ssid, "Home:Lab");
    }

    #[test]
    fn test_parse_skips_garbage_lines() {
        assert!(parse_nmcli("no-colon-here\nX:notanumber\n").is_empty());
    }

    #[tokio::test]
    async fn test_gather_context_uses_host_signals() {
        let source = StaticSignalSource {
            wifi: vec![WifiNetwork {
                ssid: "Campus-A".into(),
                signal_strength_dbm: -55,
            }],
            gps: Some(fix(52.0)),
        };
        let ctx = gather_context(&source, 5, None).await;
        assert_eq!(ctx.wifi.unwrap().len(), 1);
        assert_eq!(ctx.gps.unwrap().latitude, 52.0);
    }

    #[tokio::test]
    async fn test_client_fix_takes_precedence() {
        let source = StaticSignalSource {
            wifi: vec![],
            gps: Some(fix(52.0)),
        };
        let ctx = gather_context(&source, 5, Some(fix(48.0))).await;
        assert_eq!(ctx.gps.unwrap().latitude, 48.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_timeout_degrades_to_absent() {
        struct Hanging;
        impl SignalSource for Hanging {
            async fn scan_wifi(&self) -> Result<Vec<WifiNetwork>, SignalError> {
                std::future::pending().await
            }
            async fn gps_fix(&self) -> Result<Option<GpsFix>, SignalError> {
                std::future::pending().await
            }
        }
        let ctx = gather_context(&Hanging, 1, None).await;
        assert!(ctx.wifi.is_none());
        assert!(ctx.gps.is_none());
    }

    #[tokio::test]
    async fn test_host_gps_fix_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fix.json");

        // Unconfigured and not-yet-published are both "no fix".
        let source = HostSignalSource::new(None);
        assert!(source.gps_fix().await.unwrap().is_none());
        let source = HostSignalSource::new(Some(path.clone()));
        assert!(source.gps_fix().await.unwrap().is_none());

        std::fs::write(
            &path,
            r#"{"latitude":52.2297,"longitude":21.0122,"accuracy_m":8.0}"#,
        )
        .unwrap();
        let published = source.gps_fix().await.unwrap().unwrap();
        assert_eq!(published.latitude, 52.2297);

        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            source.gps_fix().await,
            Err(SignalError::Fix(_))
        ));
    }
}
