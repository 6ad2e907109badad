//! Session continuity: tells the collector about new and rotated sessions.

use std::rc::Rc;

use tracing::debug;

use crate::context::SdkContext;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescriptor {
    pub session_id: String,
    pub previous_session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionTransition {
    /// Nothing stored for this tab yet.
    New,
    Unchanged,
    Changed { previous: String },
}

impl SessionTransition {
    #[must_use]
    pub fn classify(stored: Option<&str>, current: &str) -> Self {
        match stored {
            None => Self::New,
            Some(stored) if stored == current => Self::Unchanged,
            Some(stored) => Self::Changed {
                previous: stored.to_string(),
            },
        }
    }

    /// What to announce to the collector, if anything.
    #[must_use]
    pub fn descriptor(&self, current: &str) -> Option<SessionDescriptor> {
        match self {
            Self::New => Some(SessionDescriptor {
                session_id: current.to_string(),
                previous_session_id: None,
            }),
            Self::Unchanged => None,
            Self::Changed { previous } => Some(SessionDescriptor {
                session_id: current.to_string(),
                previous_session_id: Some(previous.clone()),
            }),
        }
    }
}

/// Compares `stored` with the current session, announces the difference in
/// the background and records the current session for this tab.
pub(crate) fn communicate_latest_session(
    ctx: &Rc<SdkContext>,
    stored: Option<String>,
) -> SessionTransition {
    let current = ctx.session_id();
    let transition = SessionTransition::classify(stored.as_deref(), &current);
    debug!(session_id = %current, ?transition, "session continuity checked");

    if let Some(descriptor) = transition.descriptor(&current) {
        let client = Rc::clone(&ctx.client);
        let errors = ctx.errors.clone();
        ctx.spawn(async move {
            let result = client
                .post_session(
                    &descriptor.session_id,
                    descriptor.previous_session_id.as_deref(),
                )
                .await;
            match result {
                Ok(()) => debug!(session_id = %descriptor.session_id, "session announced"),
                Err(error) => errors.record(format!("post session: {error}")),
            }
        });
    }

    ctx.stores.write_session_id(&current);
    transition
}
