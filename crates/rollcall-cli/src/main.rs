use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::{Parser, Subcommand};

use rollcall_core::location::{GeoFence, GeoPoint, GpsFix, SessionLocation, WifiNetwork};
use rollcall_core::types::{AttendanceWindow, ClassSession};
use rollcall_core::window;
use rollcall_engine::{
    spawn_engine, Capture, CheckInContext, CheckInRequest, EngineConfig, EngineHandle,
    SessionStore, SidecarDetector, SqliteStore,
};
use rollcall_vault::{verify_integrity, TemplateCipher};

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance administration CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Schedule a class session for a date
    AddSession {
        class_id: String,
        /// Session date, YYYY-MM-DD
        date: NaiveDate,
        /// Class start, HH:MM
        #[arg(long)]
        start: String,
        /// Class end, HH:MM
        #[arg(long)]
        end: String,
        /// Check-in window open, HH:MM
        #[arg(long)]
        window_start: String,
        /// Check-in window close, HH:MM
        #[arg(long)]
        window_end: String,
        /// Required venue SSID (repeatable)
        #[arg(long = "ssid")]
        ssids: Vec<String>,
        /// Geofence center latitude
        #[arg(long, requires = "lon", requires = "radius")]
        lat: Option<f64>,
        /// Geofence center longitude
        #[arg(long)]
        lon: Option<f64>,
        /// Geofence radius in metres
        #[arg(long)]
        radius: Option<f64>,
    },
    /// Enroll a user from capture images
    Enroll {
        user_id: String,
        /// Capture images, each with a `<image>.faces.json` sidecar
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Run a check-in attempt
    CheckIn {
        student_id: String,
        class_id: String,
        /// Capture image with a `<image>.faces.json` sidecar
        image: PathBuf,
        /// Visible SSID (repeatable)
        #[arg(long = "ssid")]
        ssids: Vec<String>,
        /// GPS latitude
        #[arg(long, requires = "lon")]
        lat: Option<f64>,
        /// GPS longitude
        #[arg(long)]
        lon: Option<f64>,
        /// GPS accuracy in metres
        #[arg(long, default_value_t = 10.0)]
        accuracy: f64,
    },
    /// Show a session's window state
    Window {
        class_id: String,
        /// Instant to evaluate, RFC 3339 (default: now)
        #[arg(long)]
        at: Option<String>,
    },
    /// Verify the integrity of a user's enrolled templates
    Audit { user_id: String },
    /// Delete a user's enrolled profile
    Remove { user_id: String },
}

fn parse_hhmm(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M").with_context(|| format!("invalid time {s:?}, want HH:MM"))
}

fn open_engine(config: EngineConfig) -> Result<(EngineHandle, Arc<SqliteStore>)> {
    let store = Arc::new(SqliteStore::open(&config.db_path)?);
    let cipher = TemplateCipher::new(&config.service_secret)?;
    let engine = spawn_engine(
        Box::new(SidecarDetector),
        cipher,
        store.clone(),
        store.clone(),
        store.clone(),
        config,
    );
    Ok((engine, store))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::from_env();

    match cli.command {
        Commands::AddSession {
            class_id,
            date,
            start,
            end,
            window_start,
            window_end,
            ssids,
            lat,
            lon,
            radius,
        } => {
            let geofence = match (lat, lon, radius) {
                (Some(latitude), Some(longitude), Some(radius_m)) => Some(GeoFence {
                    center: GeoPoint {
                        latitude,
                        longitude,
                    },
                    radius_m,
                }),
                _ => None,
            };
            let session = ClassSession {
                class_id: class_id.clone(),
                date,
                start_time: parse_hhmm(&start)?,
                end_time: parse_hhmm(&end)?,
                window: AttendanceWindow {
                    start: parse_hhmm(&window_start)?,
                    end: parse_hhmm(&window_end)?,
                },
                location: SessionLocation {
                    wifi_ssids: ssids,
                    geofence,
                },
            };
            let store = SqliteStore::open(&config.db_path)?;
            store.put_session(&session)?;
            println!("session {class_id} on {date} saved");
        }

        Commands::Enroll { user_id, images } => {
            let (engine, _store) = open_engine(config)?;
            let mut captures = Vec::with_capacity(images.len());
            for path in &images {
                captures.push(Capture::from_path(path)?);
            }
            let profile = engine.enroll(user_id, captures).await?;
            println!(
                "enrolled {} with {} template(s), quality {:.2}",
                profile.user_id,
                profile.templates.len(),
                profile.enrollment_quality
            );
        }

        Commands::CheckIn {
            student_id,
            class_id,
            image,
            ssids,
            lat,
            lon,
            accuracy,
        } => {
            let (engine, _store) = open_engine(config)?;
            let wifi = if ssids.is_empty() {
                None
            } else {
                Some(
                    ssids
                        .into_iter()
                        .map(|ssid| WifiNetwork {
                            ssid,
                            signal_strength_dbm: -50,
                        })
                        .collect(),
                )
            };
            let gps = match (lat, lon) {
                (Some(latitude), Some(longitude)) => Some(GpsFix {
                    latitude,
                    longitude,
                    accuracy_m: accuracy,
                }),
                _ => None,
            };
            let result = engine
                .check_in(CheckInRequest {
                    student_id,
                    class_id,
                    capture: Capture::from_path(&image)?,
                    context: CheckInContext { wifi, gps },
                    now: Utc::now(),
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }

        Commands::Window { class_id, at } => {
            let now = match at {
                Some(s) => DateTime::parse_from_rfc3339(&s)
                    .with_context(|| format!("invalid instant {s:?}"))?
                    .with_timezone(&Utc),
                None => Utc::now(),
            };
            let store = SqliteStore::open(&config.db_path)?;
            let session = store
                .get_session(&class_id, now.date_naive())?
                .with_context(|| format!("no session for {class_id} on {}", now.date_naive()))?;
            let state = window::evaluate(now, &session, &config.window);
            println!("{state:?}");
        }

        Commands::Audit { user_id } => {
            let store = SqliteStore::open(&config.db_path)?;
            let cipher = TemplateCipher::new(&config.service_secret)?;
            let profile = rollcall_engine::EnrollmentStore::get_profile(&store, &user_id)?
                .with_context(|| format!("no profile for {user_id}"))?;

            let mut failures = 0;
            for (i, template) in profile.templates.iter().enumerate() {
                match cipher.decrypt(template) {
                    Ok(descriptor) if verify_integrity(&descriptor, &template.template_hash) => {
                        println!("template {i}: ok");
                    }
                    Ok(_) => {
                        failures += 1;
                        println!("template {i}: DIGEST MISMATCH");
                    }
                    Err(e) => {
                        failures += 1;
                        println!("template {i}: FAILED ({e})");
                    }
                }
            }
            if failures > 0 {
                anyhow::bail!("{failures} template(s) failed integrity checks");
            }
        }

        Commands::Remove { user_id } => {
            let store = SqliteStore::open(&config.db_path)?;
            rollcall_engine::EnrollmentStore::delete_profile(&store, &user_id)?;
            println!("profile {user_id} removed");
        }
    }

    Ok(())
}
