//! Attendance window evaluation — pure time-state logic.
//!
//! Two distinct decisions, both required: whether an attempt is
//! allowed right now ([`evaluate`]) and what status a specific
//! check-in timestamp earns ([`status_for_check_in`]). A student may
//! be allowed to attempt while already being too late to count as
//! present.

use chrono::{DateTime, Utc};

use crate::types::{AttendanceStatus, ClassSession};

/// Window evaluation configuration.
#[derive(Debug, Clone, Copy)]
pub struct WindowConfig {
    /// Minutes after class start during which a check-in still counts
    /// as late rather than absent.
    pub late_threshold_min: i64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            late_threshold_min: 10,
        }
    }
}

/// Why a window is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosedReason {
    /// The attempt happened on a different calendar date than the session.
    WrongDate,
    /// The attempt happened after the window end.
    AfterWindow,
}

/// Whether an attempt is currently allowed, and with what hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    /// Window not yet open; attempts are blocked.
    Early { minutes_until_open: i64 },
    /// Open and the student would still be on time or within the late
    /// threshold of the class start.
    Open,
    /// Open, but the class started more than the late threshold ago.
    LateOpen,
    /// Terminal for this attempt.
    Closed { reason: ClosedReason },
}

impl WindowState {
    pub fn allows_attempt(&self) -> bool {
        matches!(self, WindowState::Open | WindowState::LateOpen)
    }
}

/// Map the current instant onto the session's attempt window.
pub fn evaluate(now: DateTime<Utc>, session: &ClassSession, cfg: &WindowConfig) -> WindowState {
    if now.date_naive() != session.date {
        return WindowState::Closed {
            reason: ClosedReason::WrongDate,
        };
    }

    let window_start = session.window_start_at();
    let window_end = session.window_end_at();

    if now < window_start {
        // num_minutes truncates; count a partial minute as a whole one.
        let remaining = window_start - now;
        let minutes = (remaining.num_seconds() + 59) / 60;
        return WindowState::Early {
            minutes_until_open: minutes,
        };
    }

    if now > window_end {
        return WindowState::Closed {
            reason: ClosedReason::AfterWindow,
        };
    }

    let late_cutoff = session.start_at() + chrono::Duration::minutes(cfg.late_threshold_min);
    if now > late_cutoff {
        WindowState::LateOpen
    } else {
        WindowState::Open
    }
}

/// Determine the status a check-in at instant `t` earns.
///
/// On or before class start → present; within the late threshold →
/// late; beyond it → absent (the attempt may still be recorded, it
/// just no longer counts as attendance).
pub fn status_for_check_in(
    t: DateTime<Utc>,
    session: &ClassSession,
    cfg: &WindowConfig,
) -> AttendanceStatus {
    let start = session.start_at();
    if t <= start {
        return AttendanceStatus::Present;
    }
    let late_by = t - start;
    if late_by <= chrono::Duration::minutes(cfg.late_threshold_min) {
        AttendanceStatus::Late
    } else {
        AttendanceStatus::Absent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::SessionLocation;
    use crate::types::AttendanceWindow;
    use chrono::{NaiveDate, NaiveTime, TimeZone};

    /// Session on 2025-03-10: class 09:00–10:30, window 08:45–09:30.
    fn session() -> ClassSession {
        ClassSession {
            class_id: "CS101".into(),
            date: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(10, 30, 0).unwrap(),
            window: AttendanceWindow {
                start: NaiveTime::from_hms_opt(8, 45, 0).unwrap(),
                end: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            },
            location: SessionLocation::default(),
        }
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, h, m, 0).unwrap()
    }

    #[test]
    fn test_wrong_date_is_closed() {
        let wrong_day = Utc.with_ymd_and_hms(2025, 3, 11, 9, 0, 0).unwrap();
        assert_eq!(
            evaluate(wrong_day, &session(), &WindowConfig::default()),
            WindowState::Closed {
                reason: ClosedReason::WrongDate
            }
        );
    }

    #[test]
    fn test_one_minute_before_window_is_early() {
        let state = evaluate(at(8, 44), &session(), &WindowConfig::default());
        assert_eq!(
            state,
            WindowState::Early {
                minutes_until_open: 1
            }
        );
        assert!(!state.allows_attempt());
    }

    #[test]
    fn test_window_start_is_open() {
        assert_eq!(
            evaluate(at(8, 45), &session(), &WindowConfig::default()),
            WindowState::Open
        );
    }

    #[test]
    fn test_one_minute_after_window_is_closed() {
        let state = evaluate(at(9, 31), &session(), &WindowConfig::default());
        assert_eq!(
            state,
            WindowState::Closed {
                reason: ClosedReason::AfterWindow
            }
        );
        assert!(!state.allows_attempt());
    }

    #[test]
    fn test_window_end_still_open() {
        // now == window end is inside the window; late hint applies
        // because class started 30 minutes ago.
        let state = evaluate(at(9, 30), &session(), &WindowConfig::default());
        assert_eq!(state, WindowState::LateOpen);
        assert!(state.allows_attempt());
    }

    #[test]
    fn test_late_hint_boundary() {
        // Exactly start + threshold is still Open; one minute past is LateOpen.
        assert_eq!(
            evaluate(at(9, 10), &session(), &WindowConfig::default()),
            WindowState::Open
        );
        assert_eq!(
            evaluate(at(9, 11), &session(), &WindowConfig::default()),
            WindowState::LateOpen
        );
    }

    #[test]
    fn test_status_before_start_is_present() {
        assert_eq!(
            status_for_check_in(at(8, 59), &session(), &WindowConfig::default()),
            AttendanceStatus::Present
        );
    }

    #[test]
    fn test_status_at_start_is_present() {
        assert_eq!(
            status_for_check_in(at(9, 0), &session(), &WindowConfig::default()),
            AttendanceStatus::Present
        );
    }

    #[test]
    fn test_status_within_threshold_is_late() {
        assert_eq!(
            status_for_check_in(at(9, 5), &session(), &WindowConfig::default()),
            AttendanceStatus::Late
        );
        // Boundary: exactly ten minutes late still counts as late.
        assert_eq!(
            status_for_check_in(at(9, 10), &session(), &WindowConfig::default()),
            AttendanceStatus::Late
        );
    }

    #[test]
    fn test_status_past_threshold_is_absent() {
        assert_eq!(
            status_for_check_in(at(9, 15), &session(), &WindowConfig::default()),
            AttendanceStatus::Absent
        );
    }

    #[test]
    fn test_early_minutes_round_up() {
        let half_past_early = Utc
            .with_ymd_and_hms(2025, 3, 10, 8, 43, 30)
            .unwrap();
        assert_eq!(
            evaluate(half_past_early, &session(), &WindowConfig::default()),
            WindowState::Early {
                minutes_until_open: 2
            }
        );
    }
}
