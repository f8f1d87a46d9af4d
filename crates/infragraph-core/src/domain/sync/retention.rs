//! What happens to nodes after they disappear

use chrono::{DateTime, Duration, Utc};

/// Decides how long disappeared nodes stay in the graph
pub trait RetentionPolicy: Send + Sync {
    /// Disappeared nodes last seen before the returned instant are purged;
    /// `None` keeps them all
    fn purge_cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>>;

    fn describe(&self) -> String;
}

/// Never purge
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepForever;

impl RetentionPolicy for KeepForever {
    fn purge_cutoff(&self, _now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        None
    }

    fn describe(&self) -> String {
        "keep forever".to_string()
    }
}

const MAX_RETENTION_DAYS: i64 = 1_000_000;

/// Purge once a node has been gone for longer than the window
#[derive(Debug, Clone, Copy)]
pub struct RetainFor(pub Duration);

impl RetainFor {
    pub fn days(days: u64) -> Self {
        let days = i64::try_from(days).unwrap_or(MAX_RETENTION_DAYS).min(MAX_RETENTION_DAYS);
        Self(Duration::days(days))
    }
}

impl RetentionPolicy for RetainFor {
    fn purge_cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        now.checked_sub_signed(self.0)
    }

    fn describe(&self) -> String {
        format!("retain for {} days", self.0.num_days())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keep_forever() {
        assert!(KeepForever.purge_cutoff(Utc::now()).is_none());
    }

    #[test]
    fn test_retain_for() {
        let now = Utc::now();
        let cutoff = RetainFor::days(7).purge_cutoff(now).unwrap();
        assert_eq!(now - cutoff, Duration::days(7));
        assert_eq!(RetainFor::days(7).describe(), "retain for 7 days");
    }
}
