//! Typed configuration for the subscription core.

use std::time::Duration;

/// Tunables for the subscription core, following the workspace's pattern of
/// a typed config struct with a [`Default`] impl rather than free-floating
/// constants.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SubscriptionConfig {
    /// Base SIP retransmission interval. Timer N's duration is derived as
    /// `64 * t1` (RFC 6665 §4.1.2).
    #[serde(with = "duration_millis")]
    pub t1: Duration,

    /// Inclusive upper bound, in seconds, of the `Retry-After` value sent
    /// with a `500` when an admission is refused due to overlap. The lower
    /// bound is always zero.
    pub retry_after_max_secs: u32,
}

impl SubscriptionConfig {
    /// Duration of RFC 6665 Timer N: `64 * t1`.
    pub fn timer_n_duration(&self) -> Duration {
        self.t1 * 64
    }
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            t1: Duration::from_millis(500),
            retry_after_max_secs: 9,
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}
