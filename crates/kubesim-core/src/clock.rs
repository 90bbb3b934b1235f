use chrono::{DateTime, Duration, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};

/// Simulated wall-clock time
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Clock(DateTime<Utc>);

impl Clock {
    pub fn new(time: DateTime<Utc>) -> Self {
        Self(time)
    }

    /// Current host time, used when a config gives no start clock
    pub fn now() -> Self {
        Self(Utc::now())
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Kubernetes `Time` view of this clock
    pub fn to_k8s_time(&self) -> Time {
        Time(self.0)
    }

    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }

    /// `self + rhs`, or `None` past the representable range
    pub fn checked_add(self, rhs: Duration) -> Option<Clock> {
        self.0.checked_add_signed(rhs).map(Clock)
    }
}

impl From<DateTime<Utc>> for Clock {
    fn from(time: DateTime<Utc>) -> Self {
        Self(time)
    }
}

impl From<&Time> for Clock {
    fn from(time: &Time) -> Self {
        Self(time.0)
    }
}

impl Add<Duration> for Clock {
    type Output = Clock;

    fn add(self, rhs: Duration) -> Clock {
        Clock(self.0 + rhs)
    }
}

impl Sub for Clock {
    type Output = Duration;

    fn sub(self, rhs: Clock) -> Duration {
        self.0 - rhs.0
    }
}

impl fmt::Display for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}
