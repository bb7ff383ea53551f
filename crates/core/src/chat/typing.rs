//! Ephemeral typing indicators.

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Tracks which remote participants are typing.
///
/// Each user's signal lives for `ttl` after the most recent typing event
/// from them; a new event extends the window rather than delaying it.
/// The conversation-level signal is on while any user is tracked.
#[derive(Debug)]
pub struct TypingTracker {
    local_user_id: String,
    ttl: Duration,
    expires: HashMap<String, Instant>,
}

impl TypingTracker {
    pub fn new(local_user_id: impl Into<String>, ttl: Duration) -> Self {
        Self {
            local_user_id: local_user_id.into(),
            ttl,
            expires: HashMap::new(),
        }
    }

    /// Record a typing event received at `now`.
    ///
    /// Events from the local user are ignored. Returns true if the overall
    /// signal turned on.
    pub fn observe(&mut self, user_id: &str, now: Instant) -> bool {
        if user_id == self.local_user_id {
            return false;
        }
        let was_typing = self.is_typing(now);
        self.expires.insert(user_id.to_string(), now + self.ttl);
        !was_typing
    }

    /// Drop every signal that has elapsed by `now`.
    ///
    /// Returns true if the overall signal turned off.
    pub fn expire(&mut self, now: Instant) -> bool {
        if self.expires.is_empty() {
            return false;
        }
        self.expires.retain(|_, deadline| *deadline > now);
        self.expires.is_empty()
    }

    /// Whether any remote participant is typing at `now`.
    pub fn is_typing(&self, now: Instant) -> bool {
        self.expires.values().any(|deadline| *deadline > now)
    }

    /// Remote participants typing at `now`, sorted for stable display.
    pub fn typing_users(&self, now: Instant) -> Vec<String> {
        let mut users: Vec<String> = self
            .expires
            .iter()
            .filter(|(_, deadline)| **deadline > now)
            .map(|(user, _)| user.clone())
            .collect();
        users.sort();
        users
    }

    /// Earliest pending expiry, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.expires.values().min().copied()
    }

    pub fn clear(&mut self) {
        self.expires.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_millis(3000);

    #[test]
    fn test_local_user_ignored() {
        let now = Instant::now();
        let mut tracker = TypingTracker::new("me", TTL);
        assert!(!tracker.observe("me", now));
        assert!(!tracker.is_typing(now));
        assert!(tracker.next_deadline().is_none());
    }

    #[test]
    fn test_expires_without_renewal() {
        let start = Instant::now();
        let mut tracker = TypingTracker::new("me", TTL);

        assert!(tracker.observe("admin", start));
        assert!(tracker.is_typing(start + Duration::from_millis(2999)));
        assert!(!tracker.is_typing(start + TTL));

        assert!(!tracker.expire(start + Duration::from_millis(1000)));
        assert!(tracker.expire(start + TTL));
        assert!(tracker.next_deadline().is_none());
    }

    #[test]
    fn test_renewal_extends_window() {
        let start = Instant::now();
        let mut tracker = TypingTracker::new("me", TTL);

        tracker.observe("admin", start);
        let renewed = start + Duration::from_millis(2000);
        assert!(!tracker.observe("admin", renewed));

        assert!(tracker.is_typing(start + Duration::from_millis(4000)));
        assert_eq!(tracker.next_deadline(), Some(renewed + TTL));
        assert!(!tracker.is_typing(renewed + TTL));
    }

    #[test]
    fn test_independent_users() {
        let start = Instant::now();
        let mut tracker = TypingTracker::new("me", TTL);

        tracker.observe("admin", start);
        tracker.observe("agent", start + Duration::from_millis(1000));
        assert_eq!(tracker.typing_users(start), vec!["admin", "agent"]);

        // First user lapses, second keeps the signal on.
        assert!(!tracker.expire(start + TTL));
        assert_eq!(tracker.typing_users(start + TTL), vec!["agent"]);
        assert!(tracker.is_typing(start + TTL));

        assert!(tracker.expire(start + Duration::from_millis(4000)));
        assert!(!tracker.is_typing(start + Duration::from_millis(4000)));
    }

    #[test]
    fn test_clear() {
        let now = Instant::now();
        let mut tracker = TypingTracker::new("me", TTL);
        tracker.observe("admin", now);
        tracker.clear();
        assert!(!tracker.is_typing(now));
    }
}
