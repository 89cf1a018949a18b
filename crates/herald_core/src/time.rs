use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

pub const MICROS_PER_DAY: i64 = 86_400_000_000;

/// Wall-clock instant in microseconds since the unix epoch.
#[derive(
    Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as i64;
        Self(micros)
    }

    pub fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    pub fn as_micros(self) -> i64 {
        self.0
    }

    pub fn minus_days(self, days: u32) -> Self {
        Self(self.0.saturating_sub(days as i64 * MICROS_PER_DAY))
    }
}

#[cfg(test)]
mod tests {
    use super::{MICROS_PER_DAY, Timestamp};

    #[test]
    fn cutoff_is_days_before_now() {
        let now = Timestamp::now();
        let cutoff = now.minus_days(3);
        assert_eq!(now.as_micros() - cutoff.as_micros(), 3 * MICROS_PER_DAY);
        assert_eq!(Timestamp(5).minus_days(1), Timestamp(5 - MICROS_PER_DAY));
    }
}
