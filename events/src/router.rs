use crate::message::{InboundMessage, Presence, PRESENCE};
use crate::EventHandler;
use dashmap::DashMap;
use log::*;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;

/// A handler registered for one event type.
struct Registration {
    id: u64,
    handler: Arc<dyn EventHandler>,
    active: AtomicBool,
}

impl Registration {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

struct Inner {
    /// Lookup by event type for dispatch - O(1)
    handlers: DashMap<String, Vec<Arc<Registration>>>,
    next_id: AtomicU64,
    presence: watch::Sender<u64>,
}

impl Inner {
    fn remove(&self, event_type: &str, id: u64) {
        if let Some(mut entries) = self.handlers.get_mut(event_type) {
            entries.retain(|registration| registration.id != id);

            // Clean up empty event type entries
            if entries.is_empty() {
                drop(entries); // Release lock before removal
                self.handlers.remove_if(event_type, |_, entries| entries.is_empty());
            }
        }
    }
}

/// Per-event-type registry of subscriber callbacks plus the shared presence count.
///
/// Cloning an `EventRouter` yields another handle to the same registry.
#[derive(Clone)]
pub struct EventRouter {
    inner: Arc<Inner>,
}

impl EventRouter {
    pub fn new() -> Self {
        let (presence, _) = watch::channel(0);

        Self {
            inner: Arc::new(Inner {
                handlers: DashMap::new(),
                next_id: AtomicU64::new(0),
                presence,
            }),
        }
    }

    /// Register `handler` for `event_type`.
    ///
    /// Registering the same handler (same `Arc`) twice for the same event type
    /// returns a handle to the existing registration, so the handler is still
    /// invoked once per dispatch.
    pub fn subscribe(
        &self,
        event_type: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> Subscription {
        let event_type = event_type.into();
        let mut entries = self.inner.handlers.entry(event_type.clone()).or_default();

        let existing = entries
            .iter()
            .find(|registration| {
                registration.is_active() && same_handler(&registration.handler, &handler)
            })
            .cloned();

        let registration = match existing {
            Some(existing) => {
                debug!("Handler already subscribed to {event_type}, reusing registration");
                existing
            }
            None => {
                let registration = Arc::new(Registration {
                    id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
                    handler,
                    active: AtomicBool::new(true),
                });
                entries.push(Arc::clone(&registration));
                registration
            }
        };
        drop(entries);

        trace!(
            "Subscribed handler {} to {}",
            registration.id,
            event_type
        );

        Subscription {
            router: Arc::downgrade(&self.inner),
            event_type,
            registration,
        }
    }

    /// Register a closure receiving the decoded JSON payload.
    pub fn subscribe_fn<F>(&self, event_type: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.subscribe(event_type, Arc::new(handler))
    }

    /// Register a closure receiving the payload decoded into `T`.
    ///
    /// Payloads that do not match `T` are dropped for this subscriber only.
    pub fn subscribe_typed<T, F>(&self, event_type: impl Into<String>, handler: F) -> Subscription
    where
        T: DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        let event_type = event_type.into();
        let label = event_type.clone();

        self.subscribe_fn(event_type, move |payload: &Value| {
            match T::deserialize(payload) {
                Ok(value) => handler(value),
                Err(e) => debug!("Dropping {label} payload with unexpected shape: {e}"),
            }
        })
    }

    /// Decode `raw_payload` and invoke every handler registered for `event_type`.
    ///
    /// Undecodable payloads are dropped without invoking anything.
    pub fn dispatch(&self, event_type: &str, raw_payload: &str) {
        let payload: Value = match serde_json::from_str(raw_payload) {
            Ok(payload) => payload,
            Err(e) => {
                debug!("Dropping malformed {event_type} payload: {e}");
                return;
            }
        };

        if event_type == PRESENCE {
            self.apply_presence(&payload);
            return;
        }

        // Snapshot so handlers can (un)subscribe while we iterate
        let Some(snapshot) = self
            .inner
            .handlers
            .get(event_type)
            .map(|entries| entries.value().clone())
        else {
            trace!("No subscribers for {event_type}");
            return;
        };

        for registration in snapshot.iter() {
            // Skip handlers removed earlier in this same pass
            if registration.is_active() {
                registration.handler.handle(&payload);
            }
        }
    }

    pub fn dispatch_message(&self, message: &InboundMessage) {
        self.dispatch(&message.event_type, &message.data);
    }

    /// Most recently received participant count.
    pub fn presence_count(&self) -> u64 {
        *self.inner.presence.borrow()
    }

    /// Reactive view of the participant count.
    pub fn watch_presence(&self) -> watch::Receiver<u64> {
        self.inner.presence.subscribe()
    }

    pub fn reset_presence(&self) {
        self.set_presence(0);
    }

    /// Number of live registrations for `event_type`.
    pub fn subscriber_count(&self, event_type: &str) -> usize {
        self.inner
            .handlers
            .get(event_type)
            .map(|entries| entries.len())
            .unwrap_or(0)
    }

    fn apply_presence(&self, payload: &Value) {
        match Presence::deserialize(payload) {
            Ok(presence) => self.set_presence(presence.count),
            Err(e) => debug!("Dropping malformed presence payload: {e}"),
        }
    }

    fn set_presence(&self, count: u64) {
        let previous = self.inner.presence.send_replace(count);
        if previous != count {
            debug!("Presence count changed from {previous} to {count}");
        }
    }
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRouter")
            .field("event_types", &self.inner.handlers.len())
            .field("presence_count", &self.presence_count())
            .finish()
    }
}

fn same_handler(a: &Arc<dyn EventHandler>, b: &Arc<dyn EventHandler>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// Handle returned by [`EventRouter::subscribe`].
///
/// Dropping the handle does not unsubscribe; call [`Subscription::unsubscribe`].
#[must_use = "the subscription can only be removed through its handle"]
pub struct Subscription {
    router: Weak<Inner>,
    event_type: String,
    registration: Arc<Registration>,
}

impl Subscription {
    /// Remove exactly this registration. Calling it again is a no-op.
    pub fn unsubscribe(&self) {
        if !self.registration.active.swap(false, Ordering::AcqRel) {
            return;
        }

        if let Some(inner) = self.router.upgrade() {
            inner.remove(&self.event_type, self.registration.id);
            trace!(
                "Unsubscribed handler {} from {}",
                self.registration.id,
                self.event_type
            );
        }
    }

    pub fn is_active(&self) -> bool {
        self.registration.is_active()
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("event_type", &self.event_type)
            .field("id", &self.registration.id)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{COMMENT, DICE_ROLL};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&Value) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = Arc::clone(&count);
        (count, move |_: &Value| {
            handle.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_subscriber_receives_decoded_payload() {
        let router = EventRouter::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);

        let _subscription = router.subscribe_fn(DICE_ROLL, move |payload: &Value| {
            sink.lock().unwrap().push(payload.clone());
        });

        router.dispatch(DICE_ROLL, r#"{"die":20,"result":17}"#);

        assert_eq!(
            *received.lock().unwrap(),
            vec![json!({"die": 20, "result": 17})]
        );
    }

    #[test]
    fn test_unsubscribe_before_dispatch_never_invokes_handler() {
        let router = EventRouter::new();
        let (count, handler) = counter();

        let subscription = router.subscribe_fn(COMMENT, handler);
        subscription.unsubscribe();
        router.dispatch(COMMENT, r#"{"text":"hi"}"#);

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(router.subscriber_count(COMMENT), 0);
    }

    #[test]
    fn test_independent_subscribers_each_fire_once() {
        let router = EventRouter::new();
        let (first, h1) = counter();
        let (second, h2) = counter();

        let _s1 = router.subscribe_fn(COMMENT, h1);
        let _s2 = router.subscribe_fn(COMMENT, h2);
        router.dispatch(COMMENT, r#"{"text":"hello"}"#);

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dispatch_only_reaches_matching_event_type() {
        let router = EventRouter::new();
        let (comments, handler) = counter();

        let _subscription = router.subscribe_fn(COMMENT, handler);
        router.dispatch(DICE_ROLL, r#"{"die":6,"result":3}"#);

        assert_eq!(comments.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_malformed_payload_invokes_no_handler() {
        let router = EventRouter::new();
        let (count, handler) = counter();

        let _subscription = router.subscribe_fn(COMMENT, handler);
        router.dispatch(COMMENT, "{not json");
        router.dispatch(COMMENT, "");

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_presence_updates_count_and_skips_subscribers() {
        let router = EventRouter::new();
        let (count, handler) = counter();

        let _subscription = router.subscribe_fn(PRESENCE, handler);
        router.dispatch(PRESENCE, r#"{"count": 4}"#);

        assert_eq!(router.presence_count(), 4);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_malformed_presence_keeps_previous_count() {
        let router = EventRouter::new();

        router.dispatch(PRESENCE, r#"{"count": 2}"#);
        router.dispatch(PRESENCE, r#"{"count": -3}"#);
        router.dispatch(PRESENCE, r#"{"participants": 9}"#);
        router.dispatch(PRESENCE, "garbage");

        assert_eq!(router.presence_count(), 2);
    }

    #[test]
    fn test_presence_defaults_to_zero_and_resets() {
        let router = EventRouter::new();
        assert_eq!(router.presence_count(), 0);

        router.dispatch(PRESENCE, r#"{"count": 7}"#);
        router.reset_presence();

        assert_eq!(router.presence_count(), 0);
    }

    #[tokio::test]
    async fn test_watch_presence_observes_updates() {
        let router = EventRouter::new();
        let mut presence = router.watch_presence();

        router.dispatch(PRESENCE, r#"{"count": 3}"#);

        presence.changed().await.unwrap();
        assert_eq!(*presence.borrow_and_update(), 3);
    }

    #[test]
    fn test_duplicate_subscription_invoked_once() {
        let router = EventRouter::new();
        let (count, handler) = counter();
        let handler: Arc<dyn EventHandler> = Arc::new(handler);

        let first = router.subscribe(COMMENT, Arc::clone(&handler));
        let second = router.subscribe(COMMENT, Arc::clone(&handler));
        router.dispatch(COMMENT, "{}");

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(router.subscriber_count(COMMENT), 1);

        // Set semantics: either handle removes the single registration
        second.unsubscribe();
        assert!(!first.is_active());
        first.unsubscribe();
        router.dispatch(COMMENT, "{}");

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_same_handler_on_different_types_is_independent() {
        let router = EventRouter::new();
        let (count, handler) = counter();
        let handler: Arc<dyn EventHandler> = Arc::new(handler);

        let comments = router.subscribe(COMMENT, Arc::clone(&handler));
        let _rolls = router.subscribe(DICE_ROLL, Arc::clone(&handler));

        comments.unsubscribe();
        router.dispatch(COMMENT, "{}");
        router.dispatch(DICE_ROLL, "{}");

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_double_unsubscribe_is_noop() {
        let router = EventRouter::new();
        let (kept, kept_handler) = counter();
        let (_, removed_handler) = counter();

        let _kept = router.subscribe_fn(COMMENT, kept_handler);
        let removed = router.subscribe_fn(COMMENT, removed_handler);

        removed.unsubscribe();
        removed.unsubscribe();
        router.dispatch(COMMENT, "{}");

        assert_eq!(kept.load(Ordering::SeqCst), 1);
        assert_eq!(router.subscriber_count(COMMENT), 1);
    }

    #[test]
    fn test_handler_can_unsubscribe_itself_during_dispatch() {
        let router = EventRouter::new();
        let count = Arc::new(AtomicUsize::new(0));
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let handler_count = Arc::clone(&count);
        let handler_slot = Arc::clone(&slot);
        let subscription = router.subscribe_fn(COMMENT, move |_: &Value| {
            handler_count.fetch_add(1, Ordering::SeqCst);
            if let Some(subscription) = handler_slot.lock().unwrap().as_ref() {
                subscription.unsubscribe();
            }
        });
        *slot.lock().unwrap() = Some(subscription);

        router.dispatch(COMMENT, "{}");
        router.dispatch(COMMENT, "{}");

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(router.subscriber_count(COMMENT), 0);
    }

    #[test]
    fn test_handler_removed_mid_dispatch_is_not_invoked_afterwards() {
        let router = EventRouter::new();
        let (victim_count, victim_handler) = counter();
        let victim = Arc::new(router.subscribe_fn(COMMENT, victim_handler));

        let remover_victim = Arc::clone(&victim);
        let _remover = router.subscribe_fn(COMMENT, move |_: &Value| {
            remover_victim.unsubscribe();
        });

        // The victim may or may not run in this pass depending on order
        router.dispatch(COMMENT, "{}");
        let after_first = victim_count.load(Ordering::SeqCst);
        assert!(after_first <= 1);

        router.dispatch(COMMENT, "{}");
        assert_eq!(victim_count.load(Ordering::SeqCst), after_first);
    }

    #[test]
    fn test_subscribe_during_dispatch_takes_effect_next_pass() {
        let router = EventRouter::new();
        let (late_count, late_handler) = counter();
        let late_handler: Arc<dyn EventHandler> = Arc::new(late_handler);
        let added = Arc::new(Mutex::new(Vec::new()));

        let inner_router = router.clone();
        let inner_added = Arc::clone(&added);
        let _outer = router.subscribe_fn(COMMENT, move |_: &Value| {
            let subscription = inner_router.subscribe(COMMENT, Arc::clone(&late_handler));
            inner_added.lock().unwrap().push(subscription);
        });

        router.dispatch(COMMENT, "{}");
        assert_eq!(late_count.load(Ordering::SeqCst), 0);

        router.dispatch(COMMENT, "{}");
        assert_eq!(late_count.load(Ordering::SeqCst), 1);
        assert_eq!(router.subscriber_count(COMMENT), 2);
    }

    #[test]
    fn test_subscribe_typed_drops_mismatched_payloads() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct DiceRoll {
            die: u32,
            result: u32,
        }

        let router = EventRouter::new();
        let rolls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&rolls);

        let _subscription = router.subscribe_typed(DICE_ROLL, move |roll: DiceRoll| {
            sink.lock().unwrap().push(roll);
        });

        router.dispatch(DICE_ROLL, r#"{"die":"twenty"}"#);
        router.dispatch(DICE_ROLL, r#"{"die":20,"result":17}"#);

        assert_eq!(
            *rolls.lock().unwrap(),
            vec![DiceRoll {
                die: 20,
                result: 17
            }]
        );
    }

    #[test]
    fn test_unsubscribe_after_router_dropped_is_safe() {
        let router = EventRouter::new();
        let (_, handler) = counter();
        let subscription = router.subscribe_fn(COMMENT, handler);

        drop(router);
        subscription.unsubscribe();

        assert!(!subscription.is_active());
    }

    #[test]
    fn test_dispatch_message_routes_by_event_type() {
        let router = EventRouter::new();
        let (count, handler) = counter();

        let _subscription = router.subscribe_fn(COMMENT, handler);
        router.dispatch_message(&InboundMessage::new(COMMENT, r#"{"text":"x"}"#));

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
