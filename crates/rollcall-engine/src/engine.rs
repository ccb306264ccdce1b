//! The verification engine.
//!
//! One attempt flows capture → quality gate → identity match →
//! window + location context → duplicate check → record. All of it is
//! CPU-bound, so it runs on a bounded pool of dedicated OS threads
//! draining one request queue; attempts for different students proceed
//! in parallel. Async callers hold a clone-safe [`EngineHandle`] and
//! wait on a oneshot reply.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};

use rollcall_core::location::{self, GpsFix, WifiNetwork};
use rollcall_core::matcher::{ConfidenceTier, EuclideanMatcher, Matcher};
use rollcall_core::types::{AttendanceRecord, CheckInMethod, FaceDescriptor};
use rollcall_core::{quality, window, WindowState};
use rollcall_vault::{
    verify_integrity, EncryptedTemplate, EnrolledProfile, TemplateCipher, VaultError,
};

use crate::cache::{CachedProfile, ProfileCache};
use crate::config::EngineConfig;
use crate::detector::{Capture, FaceDetector};
use crate::error::{
    EngineError, EnrollmentError, Outcome, RejectReason, VerificationResult,
};
use crate::stores::{AttendanceStore, EnrollmentStore, SessionStore, StoreError};

/// Context signals gathered by the caller. A missing signal degrades
/// that check to invalid; it never fails the whole attempt.
#[derive(Debug, Default)]
pub struct CheckInContext {
    pub wifi: Option<Vec<WifiNetwork>>,
    pub gps: Option<GpsFix>,
}

/// One check-in attempt.
pub struct CheckInRequest {
    pub student_id: String,
    pub class_id: String,
    pub capture: Capture,
    pub context: CheckInContext,
    pub now: DateTime<Utc>,
}

enum EngineRequest {
    CheckIn {
        request: CheckInRequest,
        reply: oneshot::Sender<Result<VerificationResult, EngineError>>,
    },
    Enroll {
        user_id: String,
        captures: Vec<Capture>,
        reply: oneshot::Sender<Result<EnrolledProfile, EnrollmentError>>,
    },
    RemoveProfile {
        user_id: String,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    DecryptTemplate {
        template: EncryptedTemplate,
        reply: oneshot::Sender<Result<FaceDescriptor, VaultError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Run one check-in attempt to a terminal decision.
    pub async fn check_in(
        &self,
        request: CheckInRequest,
    ) -> Result<VerificationResult, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::CheckIn {
                request,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Enroll a user from one or more captures, replacing any existing
    /// profile.
    pub async fn enroll(
        &self,
        user_id: String,
        captures: Vec<Capture>,
    ) -> Result<EnrolledProfile, EnrollmentError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Enroll {
                user_id,
                captures,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EnrollmentError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EnrollmentError::ChannelClosed)?
    }

    /// Delete a user's enrolled profile and drop any cached descriptors.
    pub async fn remove_profile(&self, user_id: String) -> Result<(), EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::RemoveProfile {
                user_id,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Admin/audit path: decrypt a stored template.
    pub async fn decrypt_template(
        &self,
        template: EncryptedTemplate,
    ) -> Result<FaceDescriptor, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::DecryptTemplate {
                template,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx
            .await
            .map_err(|_| EngineError::ChannelClosed)?
            .map_err(EngineError::Vault)
    }
}

struct Shared {
    // The detector is the one stateful collaborator; everything else
    // here is read-only or internally synchronized.
    detector: Mutex<Box<dyn FaceDetector>>,
    cipher: TemplateCipher,
    enrollment: Arc<dyn EnrollmentStore>,
    sessions: Arc<dyn SessionStore>,
    attendance: Arc<dyn AttendanceStore>,
    cache: ProfileCache,
    config: EngineConfig,
}

/// Spawn the engine worker pool and return its handle.
///
/// Workers drain a single bounded queue, so attempts for different
/// students run in parallel up to the pool size while the queue bounds
/// memory under load.
pub fn spawn_engine(
    detector: Box<dyn FaceDetector>,
    cipher: TemplateCipher,
    enrollment: Arc<dyn EnrollmentStore>,
    sessions: Arc<dyn SessionStore>,
    attendance: Arc<dyn AttendanceStore>,
    config: EngineConfig,
) -> EngineHandle {
    let (tx, rx) = mpsc::channel::<EngineRequest>(config.queue_depth);
    let workers = config.worker_threads.max(1);

    let shared = Arc::new(Shared {
        detector: Mutex::new(detector),
        cipher,
        enrollment,
        sessions,
        attendance,
        cache: ProfileCache::new(),
        config,
    });
    let rx = Arc::new(Mutex::new(rx));

    for worker in 0..workers {
        let shared = Arc::clone(&shared);
        let rx = Arc::clone(&rx);
        std::thread::Builder::new()
            .name(format!("rollcall-engine-{worker}"))
            .spawn(move || {
                tracing::debug!(worker, "engine worker started");
                loop {
                    // Hold the queue lock only while waiting for the
                    // next request, never while serving one.
                    let req = rx.lock().expect("engine queue lock").blocking_recv();
                    let Some(req) = req else { break };
                    match req {
                        EngineRequest::CheckIn { request, reply } => {
                            let _ = reply.send(run_check_in(&shared, request));
                        }
                        EngineRequest::Enroll {
                            user_id,
                            captures,
                            reply,
                        } => {
                            let _ = reply.send(run_enroll(&shared, user_id, captures));
                        }
                        EngineRequest::RemoveProfile { user_id, reply } => {
                            let _ = reply.send(run_remove_profile(&shared, &user_id));
                        }
                        EngineRequest::DecryptTemplate { template, reply } => {
                            let _ = reply.send(shared.cipher.decrypt(&template));
                        }
                    }
                }
                tracing::debug!(worker, "engine worker exiting");
            })
            .expect("failed to spawn engine worker");
    }

    EngineHandle { tx }
}

enum ProfileLoad {
    Ready(Arc<CachedProfile>),
    /// At least one template failed authentication or integrity.
    Integrity,
}

/// Fetch the user's decrypted descriptors, via the cache when warm.
fn load_profile(shared: &Shared, user_id: &str) -> Result<ProfileLoad, EngineError> {
    if let Some(cached) = shared.cache.get(user_id) {
        return Ok(ProfileLoad::Ready(cached));
    }

    let profile = shared
        .enrollment
        .get_profile(user_id)?
        .ok_or_else(|| EngineError::NotEnrolled {
            student_id: user_id.to_string(),
        })?;

    let mut descriptors = Vec::with_capacity(profile.templates.len());
    let mut hashes = Vec::with_capacity(profile.templates.len());
    for template in &profile.templates {
        let descriptor = match shared.cipher.decrypt(template) {
            Ok(d) => d,
            Err(e) => {
                tracing::error!(
                    user_id,
                    error = %e,
                    "enrolled template failed decryption — flagged for manual review"
                );
                return Ok(ProfileLoad::Integrity);
            }
        };
        // Independent digest check on top of the GCM tag.
        if !verify_integrity(&descriptor, &template.template_hash) {
            tracing::error!(
                user_id,
                "enrolled template digest mismatch — flagged for manual review"
            );
            return Ok(ProfileLoad::Integrity);
        }
        hashes.push(template.template_hash.clone());
        descriptors.push(descriptor);
    }

    Ok(ProfileLoad::Ready(shared.cache.insert(
        user_id,
        CachedProfile {
            descriptors,
            hashes,
        },
    )))
}

fn run_check_in(
    shared: &Shared,
    req: CheckInRequest,
) -> Result<VerificationResult, EngineError> {
    let detections = shared
        .detector
        .lock()
        .expect("detector lock")
        .detect(&req.capture)?;
    let detection = match detections.as_slice() {
        [] => {
            return Ok(VerificationResult::rejected(RejectReason::NoFaceDetected));
        }
        [one] => one,
        many => {
            return Ok(VerificationResult::rejected(
                RejectReason::MultipleFacesDetected { count: many.len() },
            ));
        }
    };

    // Gate: reject unusable samples before any matching work.
    let quality = quality::assess(&req.capture.image, &detection.sample, &shared.config.quality);
    if !quality.passes(shared.config.quality.acceptance_floor) {
        tracing::info!(
            student_id = %req.student_id,
            score = quality.score,
            "check-in rejected: quality below floor"
        );
        return Ok(VerificationResult::rejected(
            RejectReason::LowQualityImage {
                score: quality.score,
                failing: quality.failing_metrics(),
            },
        ));
    }

    let date = req.now.date_naive();
    let session = shared
        .sessions
        .get_session(&req.class_id, date)?
        .ok_or_else(|| EngineError::SessionNotFound {
            class_id: req.class_id.clone(),
            date,
        })?;

    let cached = match load_profile(shared, &req.student_id)? {
        ProfileLoad::Ready(cached) => cached,
        ProfileLoad::Integrity => {
            return Ok(VerificationResult::rejected(
                RejectReason::TemplateIntegrity,
            ));
        }
    };

    // Threshold 0.0 here so the best similarity is always available
    // for diagnostics; the accept decision is made below.
    let best = EuclideanMatcher.best_match(&detection.descriptor, &cached.descriptors, 0.0);
    let Some(m) = best else {
        return Ok(VerificationResult::rejected(RejectReason::NoMatch {
            best_similarity: 0.0,
        }));
    };
    if m.similarity < shared.config.match_threshold {
        tracing::info!(
            student_id = %req.student_id,
            best_similarity = m.similarity,
            "check-in rejected: no match"
        );
        return Ok(VerificationResult::rejected(RejectReason::NoMatch {
            best_similarity: m.similarity,
        }));
    }
    let tier = ConfidenceTier::for_similarity(m.similarity);

    match window::evaluate(req.now, &session, &shared.config.window) {
        WindowState::Early { minutes_until_open } => {
            return Ok(VerificationResult::rejected(RejectReason::WindowEarly {
                minutes_until_open,
            }));
        }
        WindowState::Closed { .. } => {
            return Ok(VerificationResult::rejected(RejectReason::WindowClosed));
        }
        WindowState::Open | WindowState::LateOpen => {}
    }

    // Sessions with no location requirement skip the check entirely.
    let restricted =
        !session.location.wifi_ssids.is_empty() || session.location.geofence.is_some();
    if restricted {
        let lc = location::check(
            &session.location,
            req.context.wifi.as_deref(),
            req.context.gps.as_ref(),
        );
        if !lc.valid {
            tracing::info!(
                student_id = %req.student_id,
                wifi_confidence = lc.wifi.confidence,
                gps_confidence = lc.gps.confidence,
                "check-in rejected: location invalid"
            );
            return Ok(VerificationResult::rejected(
                RejectReason::LocationInvalid {
                    confidence: lc.confidence as f32,
                },
            ));
        }
    }

    if let Some(existing) = shared
        .attendance
        .find_record(&req.student_id, &req.class_id, date)?
    {
        return Ok(VerificationResult {
            outcome: Outcome::AlreadyRecorded { existing },
            confidence: m.similarity,
        });
    }

    let status = window::status_for_check_in(req.now, &session, &shared.config.window);
    let record = AttendanceRecord {
        student_id: req.student_id.clone(),
        class_id: req.class_id.clone(),
        date,
        status,
        method: CheckInMethod::FaceRecognition,
        check_in_time: Some(req.now),
        confidence: Some(m.similarity),
    };

    match shared.attendance.insert_record(&record) {
        Ok(()) => {}
        // Lost a race with a concurrent attempt — same outcome as the
        // pre-insert duplicate check.
        Err(StoreError::DuplicateRecord) => {
            let existing = shared
                .attendance
                .find_record(&req.student_id, &req.class_id, date)?
                .ok_or_else(|| {
                    EngineError::Store(StoreError::Backend(
                        "duplicate reported but no record found".into(),
                    ))
                })?;
            return Ok(VerificationResult {
                outcome: Outcome::AlreadyRecorded { existing },
                confidence: m.similarity,
            });
        }
        Err(e) => return Err(e.into()),
    }

    tracing::info!(
        student_id = %req.student_id,
        class_id = %req.class_id,
        ?status,
        similarity = m.similarity,
        ?tier,
        "check-in accepted"
    );

    Ok(VerificationResult {
        outcome: Outcome::Accepted {
            status,
            matched_template: m.index,
            record,
        },
        confidence: m.similarity,
    })
}

fn run_enroll(
    shared: &Shared,
    user_id: String,
    captures: Vec<Capture>,
) -> Result<EnrolledProfile, EnrollmentError> {
    if captures.is_empty() {
        return Err(EnrollmentError::NoImages);
    }

    let mut templates = Vec::with_capacity(captures.len());
    let mut qualities = Vec::with_capacity(captures.len());

    for (image_index, capture) in captures.iter().enumerate() {
        let detections = shared
            .detector
            .lock()
            .expect("detector lock")
            .detect(capture)?;
        let detection = match detections.as_slice() {
            [] => return Err(EnrollmentError::NoFaceDetected { image_index }),
            [one] => one,
            many => {
                return Err(EnrollmentError::MultipleFacesDetected {
                    image_index,
                    count: many.len(),
                });
            }
        };

        let quality = quality::assess(&capture.image, &detection.sample, &shared.config.quality);
        if !quality.passes(shared.config.quality.acceptance_floor) {
            return Err(EnrollmentError::LowQualityImage {
                image_index,
                score: quality.score,
            });
        }

        let template = shared.cipher.encrypt(&detection.descriptor)?;
        if templates
            .iter()
            .any(|t: &EncryptedTemplate| t.template_hash == template.template_hash)
        {
            tracing::debug!(user_id, image_index, "identical capture skipped");
            continue;
        }
        qualities.push(quality.score);
        templates.push(template);
    }

    let enrollment_quality = qualities.iter().sum::<f32>() / qualities.len() as f32;
    let profile = EnrolledProfile {
        user_id: user_id.clone(),
        templates,
        enrollment_quality,
        created_at: Utc::now(),
    };

    shared.enrollment.put_profile(&profile)?;
    // Invalidate rather than update: the next check-in repopulates.
    shared.cache.invalidate(&user_id);

    tracing::info!(
        user_id,
        templates = profile.templates.len(),
        quality = enrollment_quality,
        "profile enrolled"
    );

    Ok(profile)
}

fn run_remove_profile(shared: &Shared, user_id: &str) -> Result<(), EngineError> {
    shared.enrollment.delete_profile(user_id)?;
    shared.cache.invalidate(user_id);
    tracing::info!(user_id, "profile removed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{Detection, DetectorError};
    use crate::stores::MemoryStore;
    use chrono::{NaiveDate, NaiveTime, TimeZone};
    use image::RgbImage;
    use rollcall_core::location::{GeoFence, GeoPoint, SessionLocation};
    use rollcall_core::types::{
        AttendanceStatus, AttendanceWindow, ClassSession, FaceBox, FaceSample, Landmarks,
    };
    use std::collections::VecDeque;

    /// Detector returning a scripted sequence of detection lists.
    struct ScriptedDetector {
        script: VecDeque<Vec<Detection>>,
    }

    impl ScriptedDetector {
        fn new(script: Vec<Vec<Detection>>) -> Self {
            Self {
                script: script.into(),
            }
        }
    }

    impl FaceDetector for ScriptedDetector {
        fn detect(&mut self, _capture: &Capture) -> Result<Vec<Detection>, DetectorError> {
            Ok(self.script.pop_front().unwrap_or_default())
        }
    }

    fn checkerboard() -> RgbImage {
        RgbImage::from_fn(200, 200, |x, y| {
            let v = if (x + y) % 2 == 0 { 0 } else { 255 };
            image::Rgb([v, v, v])
        })
    }

    fn dark_frame() -> RgbImage {
        RgbImage::from_pixel(200, 200, image::Rgb([20, 20, 20]))
    }

    /// Frontal sample with an ideal size ratio on a 200x200 frame.
    fn good_sample() -> FaceSample {
        FaceSample {
            bbox: FaceBox {
                x: 50.0,
                y: 50.0,
                width: 100.0,
                height: 80.0,
            },
            landmarks: Landmarks {
                left_eye: (80.0, 78.0),
                right_eye: (120.0, 78.0),
                nose: (100.0, 94.0),
                left_mouth: (88.0, 124.15),
                right_mouth: (112.0, 124.15),
            },
            confidence: 0.97,
        }
    }

    /// Descriptor at Euclidean distance `d` from the zero descriptor.
    fn at_distance(d: f32) -> FaceDescriptor {
        let mut values = vec![0.0f32; 128];
        values[0] = d;
        FaceDescriptor::from_vec(values).unwrap()
    }

    fn detection(descriptor: FaceDescriptor) -> Detection {
        Detection {
            sample: good_sample(),
            descriptor,
        }
    }

    fn session(location: SessionLocation) -> ClassSession {
        ClassSession {
            class_id: "CS101".into(),
            date: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(10, 30, 0).unwrap(),
            window: AttendanceWindow {
                start: NaiveTime::from_hms_opt(8, 45, 0).unwrap(),
                end: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            },
            location,
        }
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, h, m, 0).unwrap()
    }

    struct Harness {
        handle: EngineHandle,
        store: Arc<MemoryStore>,
        cipher: TemplateCipher,
    }

    /// Engine over in-memory stores, with student `s1` enrolled on the
    /// zero descriptor and a CS101 session scheduled for 2025-03-10.
    fn harness(script: Vec<Vec<Detection>>, location: SessionLocation) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let cipher = TemplateCipher::new("engine-test-secret").unwrap();

        store.put_session(&session(location)).unwrap();
        let template = cipher.encrypt(&at_distance(0.0)).unwrap();
        store
            .put_profile(&EnrolledProfile {
                user_id: "s1".into(),
                templates: vec![template],
                enrollment_quality: 0.95,
                created_at: Utc::now(),
            })
            .unwrap();

        let handle = spawn_engine(
            Box::new(ScriptedDetector::new(script)),
            TemplateCipher::new("engine-test-secret").unwrap(),
            store.clone(),
            store.clone(),
            store.clone(),
            EngineConfig::default(),
        );

        Harness {
            handle,
            store,
            cipher,
        }
    }

    fn request(now: DateTime<Utc>) -> CheckInRequest {
        CheckInRequest {
            student_id: "s1".into(),
            class_id: "CS101".into(),
            capture: Capture::from_image(checkerboard()),
            context: CheckInContext::default(),
            now,
        }
    }

    #[tokio::test]
    async fn test_accept_present_at_threshold_similarity() {
        // distance 0.25 → similarity 0.75 ≥ 0.7
        let h = harness(
            vec![vec![detection(at_distance(0.25))]],
            SessionLocation::default(),
        );
        let result = h.handle.check_in(request(at(8, 59))).await.unwrap();

        assert_eq!(result.confidence, 0.75);
        let Outcome::Accepted {
            status,
            matched_template,
            record,
        } = &result.outcome
        else {
            panic!("expected acceptance, got {:?}", result.outcome);
        };
        assert_eq!(*status, AttendanceStatus::Present);
        assert_eq!(*matched_template, 0);
        assert_eq!(record.confidence, Some(0.75));
        assert_eq!(h.store.record_count(), 1);
    }

    #[tokio::test]
    async fn test_second_attempt_is_noop_with_existing_record() {
        let h = harness(
            vec![
                vec![detection(at_distance(0.0))],
                vec![detection(at_distance(0.0))],
            ],
            SessionLocation::default(),
        );

        let first = h.handle.check_in(request(at(8, 59))).await.unwrap();
        assert!(first.accepted());

        let second = h.handle.check_in(request(at(9, 2))).await.unwrap();
        let Outcome::AlreadyRecorded { existing } = &second.outcome else {
            panic!("expected AlreadyRecorded, got {:?}", second.outcome);
        };
        assert_eq!(existing.status, AttendanceStatus::Present);
        assert_eq!(h.store.record_count(), 1);
    }

    #[tokio::test]
    async fn test_below_threshold_is_no_match() {
        // distance 0.35 → similarity 0.65 < 0.7
        let h = harness(
            vec![vec![detection(at_distance(0.35))]],
            SessionLocation::default(),
        );
        let result = h.handle.check_in(request(at(8, 59))).await.unwrap();

        assert_eq!(result.confidence, 0.65);
        let Outcome::Rejected { reason, .. } = &result.outcome else {
            panic!("expected rejection");
        };
        assert_eq!(
            *reason,
            RejectReason::NoMatch {
                best_similarity: 0.65
            }
        );
        assert_eq!(h.store.record_count(), 0);
    }

    #[tokio::test]
    async fn test_low_quality_rejected_before_matching() {
        let h = harness(
            vec![vec![detection(at_distance(0.0))]],
            SessionLocation::default(),
        );
        let mut req = request(at(8, 59));
        req.capture = Capture::from_image(dark_frame());
        let result = h.handle.check_in(req).await.unwrap();

        let Outcome::Rejected { reason, .. } = &result.outcome else {
            panic!("expected rejection");
        };
        assert!(matches!(reason, RejectReason::LowQualityImage { .. }));
        assert!(result.confidence < 0.7);
    }

    #[tokio::test]
    async fn test_no_face_and_multiple_faces() {
        let two = vec![
            detection(at_distance(0.0)),
            detection(at_distance(0.1)),
        ];
        let h = harness(vec![vec![], two], SessionLocation::default());

        let result = h.handle.check_in(request(at(8, 59))).await.unwrap();
        let Outcome::Rejected { reason, .. } = &result.outcome else {
            panic!("expected rejection");
        };
        assert_eq!(*reason, RejectReason::NoFaceDetected);

        let result = h.handle.check_in(request(at(8, 59))).await.unwrap();
        let Outcome::Rejected { reason, .. } = &result.outcome else {
            panic!("expected rejection");
        };
        assert_eq!(*reason, RejectReason::MultipleFacesDetected { count: 2 });
    }

    #[tokio::test]
    async fn test_window_early_and_closed() {
        let h = harness(
            vec![
                vec![detection(at_distance(0.0))],
                vec![detection(at_distance(0.0))],
            ],
            SessionLocation::default(),
        );

        let result = h.handle.check_in(request(at(8, 30))).await.unwrap();
        let Outcome::Rejected { reason, .. } = &result.outcome else {
            panic!("expected rejection");
        };
        assert_eq!(
            *reason,
            RejectReason::WindowEarly {
                minutes_until_open: 15
            }
        );

        let result = h.handle.check_in(request(at(9, 31))).await.unwrap();
        let Outcome::Rejected { reason, .. } = &result.outcome else {
            panic!("expected rejection");
        };
        assert_eq!(*reason, RejectReason::WindowClosed);
        assert_eq!(h.store.record_count(), 0);
    }

    #[tokio::test]
    async fn test_late_and_absent_statuses() {
        let h = harness(
            vec![
                vec![detection(at_distance(0.0))],
                vec![detection(at_distance(0.0))],
            ],
            SessionLocation::default(),
        );

        // 09:05 — five minutes late, within the 10-minute threshold.
        let result = h.handle.check_in(request(at(9, 5))).await.unwrap();
        let Outcome::Accepted { status, .. } = &result.outcome else {
            panic!("expected acceptance");
        };
        assert_eq!(*status, AttendanceStatus::Late);

        // 09:15 on a different student would be Absent; same student is
        // a duplicate now, so use a fresh harness.
        let h = harness(
            vec![vec![detection(at_distance(0.0))]],
            SessionLocation::default(),
        );
        let result = h.handle.check_in(request(at(9, 15))).await.unwrap();
        let Outcome::Accepted { status, .. } = &result.outcome else {
            panic!("expected acceptance");
        };
        assert_eq!(*status, AttendanceStatus::Absent);
    }

    #[tokio::test]
    async fn test_location_required_wifi_fusion() {
        let required = SessionLocation {
            wifi_ssids: vec!["Campus-A".into(), "Campus-B".into()],
            geofence: Some(GeoFence {
                center: GeoPoint {
                    latitude: 52.2297,
                    longitude: 21.0122,
                },
                radius_m: 100.0,
            }),
        };
        let h = harness(
            vec![
                vec![detection(at_distance(0.0))],
                vec![detection(at_distance(0.0))],
            ],
            required,
        );

        // No signals at all → invalid.
        let result = h.handle.check_in(request(at(8, 59))).await.unwrap();
        let Outcome::Rejected { reason, .. } = &result.outcome else {
            panic!("expected rejection");
        };
        assert_eq!(
            *reason,
            RejectReason::LocationInvalid { confidence: 0.0 }
        );

        // One of two SSIDs visible, GPS out of range → valid on WiFi.
        let mut req = request(at(8, 59));
        req.context = CheckInContext {
            wifi: Some(vec![WifiNetwork {
                ssid: "campus-a".into(),
                signal_strength_dbm: -60,
            }]),
            gps: Some(GpsFix {
                latitude: 52.2297 + 0.00135, // ~150 m north
                longitude: 21.0122,
                accuracy_m: 5.0,
            }),
        };
        let result = h.handle.check_in(req).await.unwrap();
        assert!(result.accepted(), "got {:?}", result.outcome);
    }

    #[tokio::test]
    async fn test_tampered_template_rejects_with_integrity() {
        let h = harness(
            vec![vec![detection(at_distance(0.0))]],
            SessionLocation::default(),
        );
        // Corrupt the stored template after enrollment.
        let mut profile = h.store.get_profile("s1").unwrap().unwrap();
        let mut bytes = hex::decode(&profile.templates[0].ciphertext).unwrap();
        bytes[10] ^= 0x01;
        profile.templates[0].ciphertext = hex::encode(bytes);
        h.store.put_profile(&profile).unwrap();

        let result = h.handle.check_in(request(at(8, 59))).await.unwrap();
        let Outcome::Rejected { reason, .. } = &result.outcome else {
            panic!("expected rejection");
        };
        assert_eq!(*reason, RejectReason::TemplateIntegrity);
        assert_eq!(h.store.record_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_student_and_missing_session() {
        let h = harness(
            vec![
                vec![detection(at_distance(0.0))],
                vec![detection(at_distance(0.0))],
            ],
            SessionLocation::default(),
        );

        let mut req = request(at(8, 59));
        req.student_id = "s2".into();
        assert!(matches!(
            h.handle.check_in(req).await,
            Err(EngineError::NotEnrolled { .. })
        ));

        let mut req = request(at(8, 59));
        req.class_id = "MATH200".into();
        assert!(matches!(
            h.handle.check_in(req).await,
            Err(EngineError::SessionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_enroll_builds_profile_and_dedups_identical_captures() {
        let h = harness(
            vec![
                vec![detection(at_distance(0.1))],
                vec![detection(at_distance(0.1))], // identical plaintext
                vec![detection(at_distance(0.9))],
            ],
            SessionLocation::default(),
        );

        let captures = vec![
            Capture::from_image(checkerboard()),
            Capture::from_image(checkerboard()),
            Capture::from_image(checkerboard()),
        ];
        let profile = h.handle.enroll("s7".into(), captures).await.unwrap();

        assert_eq!(profile.templates.len(), 2);
        assert_eq!(profile.enrollment_quality, 1.0);
        let stored = h.store.get_profile("s7").unwrap().unwrap();
        assert_eq!(stored.templates.len(), 2);
        // Templates decrypt back to the enrolled descriptors.
        let d = h.cipher.decrypt(&stored.templates[0]).unwrap();
        assert_eq!(d, at_distance(0.1));
    }

    #[tokio::test]
    async fn test_enroll_rejects_empty_and_low_quality() {
        let h = harness(
            vec![vec![detection(at_distance(0.0))]],
            SessionLocation::default(),
        );
        assert!(matches!(
            h.handle.enroll("s8".into(), vec![]).await,
            Err(EnrollmentError::NoImages)
        ));

        let captures = vec![Capture::from_image(dark_frame())];
        assert!(matches!(
            h.handle.enroll("s8".into(), captures).await,
            Err(EnrollmentError::LowQualityImage { image_index: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_reenroll_invalidates_cached_descriptors() {
        // First check-in warms the cache with the zero descriptor.
        let h = harness(
            vec![
                vec![detection(at_distance(0.0))],
                vec![detection(at_distance(1.0))], // enrollment capture
                vec![detection(at_distance(0.0))], // probe after re-enroll
            ],
            SessionLocation::default(),
        );
        let first = h.handle.check_in(request(at(8, 59))).await.unwrap();
        assert!(first.accepted());

        // Re-enroll s1 on a descriptor far from zero.
        h.handle
            .enroll("s1".into(), vec![Capture::from_image(checkerboard())])
            .await
            .unwrap();

        // The zero-descriptor probe must now miss: similarity 0.0
        // against the re-enrolled template, proving the cache was
        // invalidated rather than served stale.
        let result = h.handle.check_in(request(at(9, 2))).await.unwrap();
        let Outcome::Rejected { reason, .. } = &result.outcome else {
            panic!("expected rejection, got {:?}", result.outcome);
        };
        assert_eq!(
            *reason,
            RejectReason::NoMatch {
                best_similarity: 0.0
            }
        );
    }

    #[tokio::test]
    async fn test_concurrent_attempts_for_different_students() {
        let h = harness(
            vec![
                vec![detection(at_distance(0.0))],
                vec![detection(at_distance(0.0))],
            ],
            SessionLocation::default(),
        );
        let template = h.cipher.encrypt(&at_distance(0.0)).unwrap();
        h.store
            .put_profile(&EnrolledProfile {
                user_id: "s2".into(),
                templates: vec![template],
                enrollment_quality: 0.95,
                created_at: Utc::now(),
            })
            .unwrap();

        // Both attempts run to completion regardless of which worker
        // picks up which request.
        let mut second = request(at(8, 59));
        second.student_id = "s2".into();
        let (a, b) = tokio::join!(
            h.handle.check_in(request(at(8, 59))),
            h.handle.check_in(second)
        );
        assert!(a.unwrap().accepted());
        assert!(b.unwrap().accepted());
        assert_eq!(h.store.record_count(), 2);
    }

    #[tokio::test]
    async fn test_remove_profile_drops_cache_and_store() {
        // Warm the cache with a successful check-in first.
        let h = harness(
            vec![
                vec![detection(at_distance(0.0))],
                vec![detection(at_distance(0.0))],
            ],
            SessionLocation::default(),
        );
        assert!(h.handle.check_in(request(at(8, 59))).await.unwrap().accepted());

        h.handle.remove_profile("s1".into()).await.unwrap();
        assert!(h.store.get_profile("s1").unwrap().is_none());

        // A further attempt must see the removal, not cached descriptors.
        assert!(matches!(
            h.handle.check_in(request(at(9, 2))).await,
            Err(EngineError::NotEnrolled { .. })
        ));
    }

    #[tokio::test]
    async fn test_decrypt_template_audit_path() {
        let h = harness(vec![], SessionLocation::default());
        let template = h.cipher.encrypt(&at_distance(0.5)).unwrap();
        let descriptor = h.handle.decrypt_template(template).await.unwrap();
        assert_eq!(descriptor, at_distance(0.5));

        let mut bad = h.cipher.encrypt(&at_distance(0.5)).unwrap();
        bad.auth_tag = "00".repeat(16);
        assert!(matches!(
            h.handle.decrypt_template(bad).await,
            Err(EngineError::Vault(VaultError::IntegrityFailure))
        ));
    }
}
