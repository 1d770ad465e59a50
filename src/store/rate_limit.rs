//! Per-user rate-limit bucket store (§4.C, §9).
//!
//! The source keys buckets by a formatted `strftime` string; this
//! generalizes that into a typed `(user, unit, window_start)` key to avoid
//! the locale/timezone drift the design note flags.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Timelike, Utc};
use tokio::sync::Mutex;

use crate::ids::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitUnit {
    Hour,
    Day,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BucketKey {
    user_id: UserId,
    unit: RateLimitUnitKey,
    window_start: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RateLimitUnitKey {
    Hour,
    Day,
}

impl From<RateLimitUnit> for RateLimitUnitKey {
    fn from(u: RateLimitUnit) -> Self {
        match u {
            RateLimitUnit::Hour => RateLimitUnitKey::Hour,
            RateLimitUnit::Day => RateLimitUnitKey::Day,
        }
    }
}

pub struct RateLimitStore {
    buckets: Mutex<HashMap<BucketKey, u32>>,
}

impl RateLimitStore {
    pub fn new() -> Self {
        RateLimitStore {
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn window_start(unit: RateLimitUnit, now: DateTime<Utc>) -> DateTime<Utc> {
        match unit {
            RateLimitUnit::Hour => now
                .date_naive()
                .and_hms_opt(now.hour(), 0, 0)
                .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
                .unwrap_or(now),
            RateLimitUnit::Day => now
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
                .unwrap_or(now),
        }
    }

    pub async fn count(&self, user_id: &UserId, unit: RateLimitUnit, now: DateTime<Utc>) -> u32 {
        let buckets = self.buckets.lock().await;
        let key = BucketKey {
            user_id: user_id.clone(),
            unit: unit.into(),
            window_start: Self::window_start(unit, now),
        };
        buckets.get(&key).copied().unwrap_or(0)
    }

    /// Increments both the hour and day buckets for `user_id` and
    /// garbage-collects buckets older than two days (§4.C).
    pub async fn increment(&self, user_id: &UserId, now: DateTime<Utc>) {
        let mut buckets = self.buckets.lock().await;
        for unit in [RateLimitUnit::Hour, RateLimitUnit::Day] {
            let key = BucketKey {
                user_id: user_id.clone(),
                unit: unit.into(),
                window_start: Self::window_start(unit, now),
            };
            *buckets.entry(key).or_insert(0) += 1;
        }

        let cutoff = now - Duration::days(2);
        buckets.retain(|key, _| key.window_start >= cutoff);
    }
}

impl Default for RateLimitStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn counts_accumulate_within_window() {
        let store = RateLimitStore::new();
        let user = UserId("u1".to_string());
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 10, 30, 0).unwrap();
        for _ in 0..5 {
            store.increment(&user, now).await;
        }
        assert_eq!(store.count(&user, RateLimitUnit::Hour, now).await, 5);
        assert_eq!(store.count(&user, RateLimitUnit::Day, now).await, 5);
    }

    #[tokio::test]
    async fn advancing_to_next_hour_resets_hour_bucket() {
        let store = RateLimitStore::new();
        let user = UserId("u1".to_string());
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 10, 30, 0).unwrap();
        store.increment(&user, now).await;
        let next_hour = now + Duration::hours(1);
        assert_eq!(store.count(&user, RateLimitUnit::Hour, next_hour).await, 0);
        assert_eq!(store.count(&user, RateLimitUnit::Day, next_hour).await, 1);
    }

    #[tokio::test]
    async fn old_buckets_are_garbage_collected() {
        let store = RateLimitStore::new();
        let user = UserId("u1".to_string());
        let old = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        store.increment(&user, old).await;
        let much_later = old + Duration::days(5);
        store.increment(&user, much_later).await;
        assert_eq!(store.count(&user, RateLimitUnit::Day, old).await, 0);
    }
}
