//! Fire-once lifecycle callbacks registered by the host page.

use std::collections::HashMap;
use std::fmt;

use serde_json::{Map, Value};

pub const COLLECT_BEGIN: &str = "collect-begin";
pub const COLLECT_END: &str = "collect-end";

/// Key under which the session id is delivered to callbacks.
pub const PARAM_SESSION_ID: &str = "SessionID";
/// Key under which the client id is delivered to callbacks.
pub const PARAM_CLIENT_ID: &str = "KountClientID";

pub type CallbackParams = Map<String, Value>;
pub type Callback = Box<dyn FnOnce(CallbackParams)>;

/// Event name to at-most-one handler. Taking a handler empties its slot, so an
/// event is delivered at most once per registration.
#[derive(Default)]
pub struct CallbackRegistry {
    slots: HashMap<String, Option<Callback>>,
}

impl CallbackRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`register`](Self::register).
    #[must_use]
    pub fn on(mut self, event: impl Into<String>, callback: impl FnOnce(CallbackParams) + 'static) -> Self {
        self.register(event, callback);
        self
    }

    pub fn register(&mut self, event: impl Into<String>, callback: impl FnOnce(CallbackParams) + 'static) {
        self.slots.insert(event.into(), Some(Box::new(callback)));
    }

    /// Removes the handler for `event`. The caller invokes it after releasing
    /// any borrow on the registry, since handlers may call back into the SDK.
    pub fn take(&mut self, event: &str) -> Option<Callback> {
        self.slots.get_mut(event).and_then(Option::take)
    }

    #[must_use]
    pub fn is_armed(&self, event: &str) -> bool {
        self.slots.get(event).is_some_and(Option::is_some)
    }

    #[must_use]
    pub fn armed_events(&self) -> Vec<String> {
        let mut events = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.is_some())
            .map(|(event, _)| event.clone())
            .collect::<Vec<_>>();
        events.sort();
        events
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("armed", &self.armed_events())
            .finish()
    }
}

/// Parameters carried by SDK-synthesized lifecycle events.
#[must_use]
pub fn session_params(session_id: &str, client_id: &str) -> CallbackParams {
    let mut params = Map::new();
    params.insert(PARAM_SESSION_ID.to_string(), Value::String(session_id.to_string()));
    params.insert(PARAM_CLIENT_ID.to_string(), Value::String(client_id.to_string()));
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn handler_is_consumed_by_first_take() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let mut registry = CallbackRegistry::new().on(COLLECT_END, move |params| {
            sink.borrow_mut().push(params);
        });

        assert!(registry.is_armed(COLLECT_END));
        let first = registry.take(COLLECT_END);
        assert!(first.is_some());
        if let Some(callback) = first {
            callback(session_params("sess-1", "c1"));
        }

        assert!(registry.take(COLLECT_END).is_none());
        assert!(!registry.is_armed(COLLECT_END));
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(
            seen.borrow()[0].get(PARAM_SESSION_ID),
            Some(&Value::String("sess-1".to_string()))
        );
    }

    #[test]
    fn unknown_event_yields_nothing() {
        let mut registry = CallbackRegistry::new().on(COLLECT_BEGIN, |_| {});
        assert!(registry.take("collect-progress").is_none());
        assert_eq!(registry.armed_events(), vec![COLLECT_BEGIN.to_string()]);
    }

    #[test]
    fn re_registering_rearms_the_slot() {
        let mut registry = CallbackRegistry::new().on(COLLECT_BEGIN, |_| {});
        let _ = registry.take(COLLECT_BEGIN);
        registry.register(COLLECT_BEGIN, |_| {});
        assert!(registry.is_armed(COLLECT_BEGIN));
    }
}
