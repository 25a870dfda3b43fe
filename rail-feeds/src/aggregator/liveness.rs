//! Per-feed message rate sampling.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::transport::networkrail::FeedKind;

/// Length of one sampling window.
pub const SAMPLE_WINDOW_SECS: i64 = 300;

#[derive(Debug, Clone, Default)]
struct Activity {
    window_start: Option<DateTime<Utc>>,
    current: u64,
    previous: u64,
    total: u64,
    last_at: Option<DateTime<Utc>>,
}

impl Activity {
    fn roll(&mut self, now: DateTime<Utc>, window: Duration) {
        let Some(start) = self.window_start else {
            self.window_start = Some(now);
            return;
        };
        let elapsed = now - start;
        if elapsed < window {
            return;
        }
        // More than one whole window without traffic empties both samples.
        self.previous = if elapsed < window * 2 { self.current } else { 0 };
        self.current = 0;
        self.window_start = Some(now);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedActivity {
    pub feed: FeedKind,
    pub live: bool,
    /// Messages in the last complete window, or the current one if busier
    pub recent_messages: u64,
    pub total_messages: u64,
    pub last_message_at: Option<DateTime<Utc>>,
}

/// Tracks whether each feed has delivered anything recently.
#[derive(Debug)]
pub struct Liveness {
    window: Duration,
    feeds: HashMap<FeedKind, Activity>,
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new(Duration::seconds(SAMPLE_WINDOW_SECS))
    }
}

impl Liveness {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            feeds: HashMap::new(),
        }
    }

    pub fn record(&mut self, feed: FeedKind, now: DateTime<Utc>) {
        let activity = self.feeds.entry(feed).or_default();
        activity.roll(now, self.window);
        activity.current += 1;
        activity.total += 1;
        activity.last_at = Some(now);
    }

    /// A feed is live if a message arrived within the last window.
    pub fn is_live(&self, feed: FeedKind, now: DateTime<Utc>) -> bool {
        self.feeds
            .get(&feed)
            .and_then(|a| a.last_at)
            .is_some_and(|at| now - at < self.window)
    }

    pub fn activity(&self, feed: FeedKind, now: DateTime<Utc>) -> FeedActivity {
        let mut activity = self.feeds.get(&feed).cloned().unwrap_or_default();
        activity.roll(now, self.window);
        FeedActivity {
            feed,
            live: self.is_live(feed, now),
            recent_messages: activity.previous.max(activity.current),
            total_messages: activity.total,
            last_message_at: activity.last_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn feed_goes_quiet_after_a_window() {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 15, 10, 0, 0).unwrap();
        let mut liveness = Liveness::default();
        assert!(!liveness.is_live(FeedKind::Movements, t0));

        liveness.record(FeedKind::Movements, t0);
        liveness.record(FeedKind::Movements, t0 + Duration::seconds(10));
        assert!(liveness.is_live(FeedKind::Movements, t0 + Duration::seconds(60)));
        assert_eq!(
            liveness.activity(FeedKind::Movements, t0 + Duration::seconds(60)).recent_messages,
            2
        );

        let quiet = t0 + Duration::minutes(6);
        assert!(!liveness.is_live(FeedKind::Movements, quiet));
        // The completed window is still reported.
        assert_eq!(liveness.activity(FeedKind::Movements, quiet).recent_messages, 2);

        let silent = t0 + Duration::minutes(20);
        let activity = liveness.activity(FeedKind::Movements, silent);
        assert_eq!(activity.recent_messages, 0);
        assert_eq!(activity.total_messages, 2);
        assert!(!liveness.is_live(FeedKind::Punctuality, silent));
    }
}
