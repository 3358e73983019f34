use crate::config::{EngineConfig, CIVIL_FORMAT};
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
#[cfg(test)]
use parking_lot::Mutex;
use std::sync::Arc;

/// Source of "now". Session stamping and the expiry sweep both read civil
/// time through this, in the single zone configured for the daemon.
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Settable clock, shared between a test and the code under test.
#[cfg(test)]
#[derive(Clone)]
pub struct ManualClock(Arc<Mutex<DateTime<Utc>>>);

#[cfg(test)]
impl ManualClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self(Arc::new(Mutex::new(at)))
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.0.lock() = at;
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.0.lock()
    }
}

pub fn clock_from_config(cfg: &EngineConfig) -> Arc<dyn Clock> {
    match cfg.fixed_now {
        Some(civil) => Arc::new(FixedClock(civil_to_utc(cfg.utc_offset, civil))),
        None => Arc::new(SystemClock),
    }
}

pub fn civil_now(clock: &dyn Clock, offset: FixedOffset) -> NaiveDateTime {
    clock.now_utc().with_timezone(&offset).naive_local()
}

pub fn civil_to_utc(offset: FixedOffset, civil: NaiveDateTime) -> DateTime<Utc> {
    let shift = chrono::Duration::seconds(i64::from(offset.local_minus_utc()));
    Utc.from_utc_datetime(&(civil - shift))
}

pub fn format_civil(t: NaiveDateTime) -> String {
    t.format(CIVIL_FORMAT).to_string()
}

pub fn parse_civil(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, CIVIL_FORMAT).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_utc_offset;

    #[test]
    fn civil_now_applies_the_configured_offset() {
        let utc = Utc.with_ymd_and_hms(2026, 3, 2, 7, 0, 0).unwrap();
        let offset = parse_utc_offset("+03:00").unwrap();
        let civil = civil_now(&FixedClock(utc), offset);
        assert_eq!(format_civil(civil), "2026-03-02T10:00:00");
        assert_eq!(civil_to_utc(offset, civil), utc);
    }

    #[test]
    fn manual_clock_moves() {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        let shared = clock.clone();
        shared.set(start + chrono::Duration::minutes(61));
        assert_eq!(clock.now_utc(), start + chrono::Duration::minutes(61));
    }

    #[test]
    fn parse_civil_rejects_offsets() {
        assert!(parse_civil("2026-03-02T10:00:00").is_some());
        assert!(parse_civil("2026-03-02T10:00:00+03:00").is_none());
    }
}
