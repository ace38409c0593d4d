//! In-memory append-only event log, the default sink.

use crate::external::EventSink;
use biogate_core::{AccessEvent, AccessEventKind, Result, UserId};
use chrono::{DateTime, Utc};
use std::sync::RwLock;

/// Filter for [`EventLog::list`].
#[derive(Debug, Clone, Copy, Default)]
pub struct EventFilter {
    pub user_id: Option<UserId>,
    pub since: Option<DateTime<Utc>>,
    /// Maximum entries returned; 0 means unlimited.
    pub limit: usize,
}

impl EventFilter {
    fn matches(&self, event: &AccessEvent) -> bool {
        if let Some(user_id) = self.user_id
            && event.user_id != Some(user_id)
        {
            return false;
        }
        if let Some(since) = self.since
            && event.timestamp < since
        {
            return false;
        }
        true
    }
}

/// Append-only store of access events, ordered by sequence.
///
/// Events are immutable once appended; there is no update or delete. When
/// a durable external sink is configured this log still serves the query
/// surface, holding the session's recent history.
#[derive(Debug, Default)]
pub struct EventLog {
    events: RwLock<Vec<AccessEvent>>,
}

impl EventLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Events matching `filter`, ascending by sequence.
    ///
    /// With a limit, the most recent matching entries are returned, still
    /// in ascending order.
    #[must_use]
    pub fn list(&self, filter: EventFilter) -> Vec<AccessEvent> {
        let events = self.events.read().expect("event log lock poisoned");
        let matching: Vec<AccessEvent> = events
            .iter()
            .filter(|event| filter.matches(event))
            .cloned()
            .collect();
        if filter.limit > 0 && matching.len() > filter.limit {
            matching[matching.len() - filter.limit..].to_vec()
        } else {
            matching
        }
    }

    /// Total number of events held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().expect("event log lock poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether an imported panel match for this user at this instant is
    /// already recorded. Keeps attendance imports idempotent.
    #[must_use]
    pub fn has_match(&self, user_id: UserId, timestamp: DateTime<Utc>) -> bool {
        let events = self.events.read().expect("event log lock poisoned");
        events.iter().any(|event| {
            event.kind == AccessEventKind::Match
                && event.user_id == Some(user_id)
                && event.timestamp == timestamp
        })
    }
}

impl EventSink for EventLog {
    async fn append(&self, event: &AccessEvent) -> Result<()> {
        self.events
            .write()
            .expect("event log lock poisoned")
            .push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use biogate_core::DeviceAddr;

    fn event(sequence: u64, user: Option<u64>, kind: AccessEventKind) -> AccessEvent {
        AccessEvent {
            sequence,
            user_id: user.map(UserId::new),
            device: "192.168.0.50:4370".parse::<DeviceAddr>().unwrap(),
            kind,
            denial_reason: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_append_and_list_in_order() {
        let log = EventLog::new();
        log.append(&event(0, Some(1), AccessEventKind::Grant))
            .await
            .unwrap();
        log.append(&event(1, Some(2), AccessEventKind::Deny))
            .await
            .unwrap();

        let all = log.list(EventFilter::default());
        assert_eq!(all.len(), 2);
        assert!(all[0].sequence < all[1].sequence);
    }

    #[tokio::test]
    async fn test_filter_by_user() {
        let log = EventLog::new();
        for i in 0..4 {
            log.append(&event(i, Some(i % 2), AccessEventKind::Grant))
                .await
                .unwrap();
        }

        let filtered = log.list(EventFilter {
            user_id: Some(UserId::new(0)),
            ..EventFilter::default()
        });
        assert_eq!(filtered.len(), 2);
        assert!(filtered.iter().all(|e| e.user_id == Some(UserId::new(0))));
    }

    #[tokio::test]
    async fn test_limit_returns_most_recent() {
        let log = EventLog::new();
        for i in 0..5 {
            log.append(&event(i, Some(1), AccessEventKind::Grant))
                .await
                .unwrap();
        }

        let limited = log.list(EventFilter {
            limit: 2,
            ..EventFilter::default()
        });
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].sequence, 3);
        assert_eq!(limited[1].sequence, 4);
    }

    #[tokio::test]
    async fn test_has_match_dedupes_imports() {
        let log = EventLog::new();
        let mut imported = event(0, Some(7), AccessEventKind::Match);
        let when = imported.timestamp;
        log.append(&imported).await.unwrap();

        assert!(log.has_match(UserId::new(7), when));
        assert!(!log.has_match(UserId::new(8), when));

        // A grant at the same instant is not an imported match
        imported.kind = AccessEventKind::Grant;
        assert!(log.has_match(UserId::new(7), when));
    }
}
