use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tracing::warn;

/// Host-inspectable list of non-fatal errors accumulated since start.
#[derive(Clone, Default)]
pub struct ErrorLog {
    entries: Rc<RefCell<Vec<String>>>,
}

impl ErrorLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, message: impl Into<String>) {
        let message = message.into();
        warn!(error = %message, "collector error recorded");
        self.entries.borrow_mut().push(message);
    }

    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.entries.borrow().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    #[must_use]
    pub fn contains(&self, fragment: &str) -> bool {
        self.entries
            .borrow()
            .iter()
            .any(|entry| entry.contains(fragment))
    }
}

impl fmt::Debug for ErrorLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorLog")
            .field("entries", &self.entries.borrow())
            .finish()
    }
}
