//! Source of "now" for initial and reset watermarks.

use chrono::Utc;

use crate::models::Watermark;

/// Supplies the current time as a [`Watermark`].
///
/// Injected into the sync clients so tests can pin the starting watermark.
pub trait Clock: Send + Sync {
    fn now(&self) -> Watermark;
}

/// Wall-clock time in UTC.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Watermark {
        Watermark::from_datetime(Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_produces_parseable_watermarks() {
        let first = SystemClock.now();
        let second = SystemClock.now();
        assert!(first.instant().is_some());
        assert!(second >= first);
    }
}
