// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Session health payloads.
//!
//! Individual sessions are tracked in-process; only aggregated counts per
//! started-minute bucket go over the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of one session.
///
/// Transitions are one-directional: `Init -> Ok | Errored`,
/// `Ok | Errored -> Exited | Crashed`. There is no way back from
/// `Errored` to `Ok`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Init,
    Ok,
    Errored,
    Exited,
    Crashed,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Exited | SessionStatus::Crashed)
    }
}

/// One tracked session, kept per isolation context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distinct_id: Option<String>,
    pub started: DateTime<Utc>,
    pub status: SessionStatus,
    pub errors: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

impl Session {
    pub fn new(started: DateTime<Utc>, distinct_id: Option<String>) -> Self {
        Session {
            session_id: Uuid::new_v4(),
            distinct_id,
            started,
            status: SessionStatus::Init,
            errors: 0,
            duration: None,
        }
    }

    /// Records one errored event against the session. Saturates and never
    /// leaves a terminal state.
    pub fn record_error(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.errors = self.errors.saturating_add(1);
        self.status = SessionStatus::Errored;
    }

    /// Marks the session healthy. A session that already errored stays
    /// errored.
    pub fn record_ok(&mut self) {
        if self.status == SessionStatus::Init {
            self.status = SessionStatus::Ok;
        }
    }

    /// Closes the session. Only `Exited` and `Crashed` are accepted;
    /// closing an already-terminal session is a no-op.
    pub fn close(&mut self, status: SessionStatus, now: DateTime<Utc>) {
        if self.status.is_terminal() || !status.is_terminal() {
            return;
        }
        self.status = status;
        let elapsed = (now - self.started).num_milliseconds();
        if elapsed >= 0 {
            self.duration = Some(elapsed as f64 / 1000.0);
        }
    }
}

/// Counts for one started-minute bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionBucket {
    pub started: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub exited: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub errored: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub crashed: u32,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

/// The `sessions` envelope item payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionAggregates {
    pub aggregates: Vec<SessionBucket>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn session() -> Session {
        Session::new(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 30).unwrap(), None)
    }

    #[test]
    fn test_error_transition_is_one_directional() {
        let mut s = session();
        s.record_error();
        assert_eq!(s.status, SessionStatus::Errored);
        assert_eq!(s.errors, 1);
        s.record_ok();
        assert_eq!(s.status, SessionStatus::Errored);
    }

    #[test]
    fn test_close_is_terminal() {
        let mut s = session();
        let now = s.started + chrono::Duration::seconds(90);
        s.close(SessionStatus::Exited, now);
        assert_eq!(s.status, SessionStatus::Exited);
        assert_eq!(s.duration, Some(90.0));

        s.close(SessionStatus::Crashed, now);
        assert_eq!(s.status, SessionStatus::Exited);

        s.record_error();
        assert_eq!(s.status, SessionStatus::Exited);
        assert_eq!(s.errors, 0);
    }

    #[test]
    fn test_close_rejects_non_terminal_status() {
        let mut s = session();
        s.close(SessionStatus::Ok, s.started);
        assert_eq!(s.status, SessionStatus::Init);
    }

    #[test]
    fn test_aggregates_omit_zero_counts() {
        let bucket = SessionBucket {
            started: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
            exited: 3,
            errored: 0,
            crashed: 0,
        };
        let json = serde_json::to_value(&bucket).unwrap();
        assert_eq!(json["exited"], 3);
        assert!(json.get("errored").is_none());
        assert!(json.get("crashed").is_none());
    }
}
