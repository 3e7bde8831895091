// src/session.rs
//! Trading-window membership and session-end edge detection.

use crate::error::ConfigError;
use chrono::{DateTime, FixedOffset, NaiveTime, Utc};

/// Daily trading window expressed in a fixed reference offset (IST by default).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradingSession {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub offset: FixedOffset,
}

impl TradingSession {
    pub fn new(start: NaiveTime, end: NaiveTime, offset: FixedOffset) -> Self {
        Self { start, end, offset }
    }

    /// Parses `HH:MM` boundaries and an offset from UTC in minutes.
    pub fn parse(start: &str, end: &str, utc_offset_minutes: i32) -> Result<Self, ConfigError> {
        let offset = utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or(ConfigError::UtcOffset(utc_offset_minutes))?;
        Ok(Self::new(parse_hhmm(start)?, parse_hhmm(end)?, offset))
    }

    pub fn crosses_midnight(&self) -> bool {
        self.end < self.start
    }

    pub fn is_in_session(&self, now: DateTime<Utc>) -> bool {
        self.contains(now.with_timezone(&self.offset).time())
    }

    /// Membership test for a wall-clock time already in the session's offset.
    pub fn contains(&self, t: NaiveTime) -> bool {
        if self.crosses_midnight() {
            t >= self.start || t < self.end
        } else {
            self.start <= t && t < self.end
        }
    }
}

fn parse_hhmm(raw: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|_| ConfigError::SessionTime(raw.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTick {
    pub in_session: bool,
    pub just_ended: bool,
}

/// Tracks membership across ticks so the in→out transition is reported once.
#[derive(Debug, Default)]
pub struct SessionGate {
    previous_in_session: Option<bool>,
}

impl SessionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call exactly once per tick.
    pub fn observe(&mut self, now: DateTime<Utc>, session: &TradingSession) -> SessionTick {
        let in_session = session.is_in_session(now);
        let just_ended = self.previous_in_session == Some(true) && !in_session;
        self.previous_in_session = Some(in_session);
        SessionTick {
            in_session,
            just_ended,
        }
    }
}
