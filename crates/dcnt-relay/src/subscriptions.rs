//! Protocol-name subscriptions for one locality.
//!
//! A session subscribing to the same name twice is recorded once. Names
//! whose subscriber list becomes empty are removed.

use std::collections::HashMap;

use dcnt_core::SessionId;

/// Protocol name → subscribed session ids, with a per-session index.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    by_protocol: HashMap<String, Vec<SessionId>>,
    by_session: HashMap<SessionId, Vec<String>>,
}

impl SubscriptionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `session` to each name. Returns how many names were new
    /// for this session.
    pub fn register(&mut self, session: &SessionId, names: &[String]) -> usize {
        let mut added = 0;
        for name in names {
            let own = self.by_session.entry(session.clone()).or_default();
            if own.contains(name) {
                continue;
            }
            own.push(name.clone());
            self.by_protocol
                .entry(name.clone())
                .or_default()
                .push(session.clone());
            added += 1;
        }
        added
    }

    /// Remove `session` from every name. Returns the names it was subscribed to.
    pub fn unregister(&mut self, session: &SessionId) -> Vec<String> {
        let Some(names) = self.by_session.remove(session) else {
            return Vec::new();
        };
        for name in &names {
            if let Some(ids) = self.by_protocol.get_mut(name) {
                ids.retain(|id| id != session);
                if ids.is_empty() {
                    let _ = self.by_protocol.remove(name);
                }
            }
        }
        names
    }

    /// Names `session` is subscribed to, in registration order.
    pub fn protocols_of(&self, session: &SessionId) -> &[String] {
        self.by_session.get(session).map_or(&[], Vec::as_slice)
    }

    /// Sessions subscribed to `name`, in registration order.
    pub fn subscribers(&self, name: &str) -> &[SessionId] {
        self.by_protocol.get(name).map_or(&[], Vec::as_slice)
    }

    /// Whether any name currently includes `session`.
    pub fn is_subscribed(&self, session: &SessionId) -> bool {
        self.by_session
            .get(session)
            .is_some_and(|names| !names.is_empty())
    }

    /// Whether `name` has at least one subscriber.
    pub fn has_protocol(&self, name: &str) -> bool {
        self.by_protocol.contains_key(name)
    }

    /// Number of names with at least one subscriber.
    pub fn protocol_count(&self) -> usize {
        self.by_protocol.len()
    }

    /// Number of sessions with at least one subscription.
    pub fn session_count(&self) -> usize {
        self.by_session.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(s: &str) -> SessionId {
        SessionId::from_raw(s)
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn register_creates_protocols() {
        let mut reg = SubscriptionRegistry::new();
        let added = reg.register(&sid("a"), &names(&["demo", "chat"]));
        assert_eq!(added, 2);
        assert_eq!(reg.subscribers("demo"), [sid("a")]);
        assert_eq!(reg.protocols_of(&sid("a")), names(&["demo", "chat"]));
        assert!(reg.is_subscribed(&sid("a")));
        assert_eq!(reg.protocol_count(), 2);
    }

    #[test]
    fn duplicate_registration_is_recorded_once() {
        let mut reg = SubscriptionRegistry::new();
        assert_eq!(reg.register(&sid("a"), &names(&["demo"])), 1);
        assert_eq!(reg.register(&sid("a"), &names(&["demo"])), 0);
        assert_eq!(reg.register(&sid("a"), &names(&["demo", "demo"])), 0);
        assert_eq!(reg.subscribers("demo"), [sid("a")]);
        assert_eq!(reg.protocols_of(&sid("a")), names(&["demo"]));
    }

    #[test]
    fn same_name_from_two_sessions() {
        let mut reg = SubscriptionRegistry::new();
        let _ = reg.register(&sid("a"), &names(&["demo"]));
        let _ = reg.register(&sid("b"), &names(&["demo"]));
        assert_eq!(reg.subscribers("demo"), [sid("a"), sid("b")]);
    }

    #[test]
    fn names_are_case_sensitive() {
        let mut reg = SubscriptionRegistry::new();
        let _ = reg.register(&sid("a"), &names(&["Demo"]));
        assert!(reg.subscribers("demo").is_empty());
        assert!(reg.has_protocol("Demo"));
    }

    #[test]
    fn empty_name_list_does_not_subscribe() {
        let mut reg = SubscriptionRegistry::new();
        assert_eq!(reg.register(&sid("a"), &[]), 0);
        assert!(!reg.is_subscribed(&sid("a")));
    }

    #[test]
    fn unregister_prunes_emptied_names() {
        let mut reg = SubscriptionRegistry::new();
        let _ = reg.register(&sid("a"), &names(&["demo", "solo"]));
        let _ = reg.register(&sid("b"), &names(&["demo"]));

        let removed = reg.unregister(&sid("a"));
        assert_eq!(removed, names(&["demo", "solo"]));
        assert!(!reg.has_protocol("solo"));
        assert_eq!(reg.subscribers("demo"), [sid("b")]);
        assert!(!reg.is_subscribed(&sid("a")));
        assert_eq!(reg.session_count(), 1);
    }

    #[test]
    fn unregister_unknown_session_is_noop() {
        let mut reg = SubscriptionRegistry::new();
        assert!(reg.unregister(&sid("ghost")).is_empty());
    }
}
