//! The host page: collection surface, message channel, unload events, forms
//! and script injection.

use std::fmt;

use crate::error::PageError;

/// A cross-origin message as delivered by the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub origin: String,
    pub data: String,
}

impl InboundMessage {
    #[must_use]
    pub fn new(origin: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            data: data.into(),
        }
    }
}

pub type MessageHandler = Box<dyn FnMut(InboundMessage)>;
pub type UnloadHandler = Box<dyn FnMut()>;

/// Listener registration that is removed on [`unsubscribe`](Self::unsubscribe) or drop.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    #[must_use]
    pub fn new(cancel: impl FnOnce() + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormFieldOutcome {
    Created,
    Updated,
}

pub trait PageHost {
    /// Mounts a 1x1 frame at `src`, removing any existing element with `surface_id` first.
    fn mount_surface(&self, surface_id: &str, src: &str) -> Result<(), PageError>;

    /// `None` when the page offers no cross-origin message channel.
    fn subscribe_messages(&self, handler: MessageHandler) -> Option<Subscription>;

    fn subscribe_unload(&self, handler: UnloadHandler) -> Option<Subscription>;

    /// Sets `field_name` on form `form_id` to `value`, adding a hidden input if missing.
    fn set_form_field(
        &self,
        form_id: &str,
        field_name: &str,
        value: &str,
    ) -> Result<FormFieldOutcome, PageError>;

    fn load_script(&self, src: &str) -> Result<(), PageError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn cancel_runs_once_on_explicit_unsubscribe() {
        let cancelled = Rc::new(Cell::new(0));
        let counter = Rc::clone(&cancelled);
        let subscription = Subscription::new(move || counter.set(counter.get() + 1));

        subscription.unsubscribe();
        assert_eq!(cancelled.get(), 1);
    }

    #[test]
    fn cancel_runs_on_drop() {
        let cancelled = Rc::new(Cell::new(false));
        let flag = Rc::clone(&cancelled);
        {
            let _subscription = Subscription::new(move || flag.set(true));
        }
        assert!(cancelled.get());
    }
}
