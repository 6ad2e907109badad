//! First-party identifier reconciliation across the cookie, local and session stores.

use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::{CollectorClient, IdentifierVerdict};
use crate::diagnostics::ErrorLog;
use crate::stores::IdentityStores;

/// Opaque, non-empty device identifier token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// `None` for the empty string, which every store uses to mean "absent".
    #[must_use]
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        (!value.is_empty()).then_some(Self(value))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Neither durable store holds a value; the collector must issue one.
    EstablishNew,
    PropagateToLocal,
    PropagateToCookie,
    AlreadyConsistent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub canonical: Option<Identifier>,
    pub action: ReconcileAction,
}

/// Picks the canonical identifier. On disagreement local storage wins and the
/// cookie is repaired.
#[must_use]
pub fn reconcile(cookie: Option<&Identifier>, local: Option<&Identifier>) -> Reconciliation {
    let (canonical, action) = match (cookie, local) {
        (None, None) => (None, ReconcileAction::EstablishNew),
        (Some(cookie), None) => (Some(cookie.clone()), ReconcileAction::PropagateToLocal),
        (None, Some(local)) => (Some(local.clone()), ReconcileAction::PropagateToCookie),
        (Some(cookie), Some(local)) if cookie == local => {
            (Some(local.clone()), ReconcileAction::AlreadyConsistent)
        }
        (Some(_), Some(local)) => (Some(local.clone()), ReconcileAction::PropagateToCookie),
    };
    Reconciliation { canonical, action }
}

/// Runs one reconciliation pass against the real stores and the collector.
#[derive(Clone)]
pub struct IdentityReconciler {
    stores: IdentityStores,
    client: Rc<CollectorClient>,
    errors: ErrorLog,
}

impl IdentityReconciler {
    #[must_use]
    pub fn new(stores: IdentityStores, client: Rc<CollectorClient>, errors: ErrorLog) -> Self {
        Self {
            stores,
            client,
            errors,
        }
    }

    #[must_use]
    pub fn stores(&self) -> &IdentityStores {
        &self.stores
    }

    /// Reads both durable stores, resets the session marker and repairs
    /// whichever durable store disagrees with the canonical value.
    pub fn settle_stores(&self) -> Reconciliation {
        let cookie = self.stores.read_cookie_identifier();
        let local = self.stores.read_local_identifier();
        self.stores.write_session_marker("");

        let reconciliation = reconcile(cookie.as_ref(), local.as_ref());
        match (&reconciliation.canonical, reconciliation.action) {
            (Some(identifier), ReconcileAction::PropagateToLocal) => {
                self.stores.write_local_identifier(identifier);
            }
            (Some(identifier), ReconcileAction::PropagateToCookie) => {
                self.stores.write_cookie_identifier(identifier);
            }
            _ => {}
        }
        debug!(action = ?reconciliation.action, "identity stores settled");
        reconciliation
    }

    /// Full pass. Resolves to the identifier written to the session marker, if any.
    pub async fn run(&self, session_id: &str) -> Option<Identifier> {
        let reconciliation = self.settle_stores();
        self.complete(session_id, reconciliation).await
    }

    /// Remote half of a pass: validates the canonical identifier, or has the
    /// collector issue one when there is none.
    pub async fn complete(
        &self,
        session_id: &str,
        reconciliation: Reconciliation,
    ) -> Option<Identifier> {
        match reconciliation.canonical {
            Some(identifier) => self.confirm_existing(session_id, identifier).await,
            None => self.establish_new(session_id).await,
        }
    }

    async fn establish_new(&self, session_id: &str) -> Option<Identifier> {
        match self.client.generate_identifier(session_id).await {
            Ok(Some(identifier)) => {
                debug!(identifier = %identifier, "collector issued identifier");
                self.stores.write_cookie_identifier(&identifier);
                self.stores.write_local_identifier(&identifier);
                self.stores.write_session_marker(identifier.as_str());
                Some(identifier)
            }
            Ok(None) => {
                debug!("collector issued an empty identifier");
                None
            }
            Err(error) => {
                self.errors.record(format!("establish identifier: {error}"));
                None
            }
        }
    }

    async fn confirm_existing(&self, session_id: &str, identifier: Identifier) -> Option<Identifier> {
        match self.client.validate_identifier(session_id, &identifier).await {
            Ok(IdentifierVerdict::Accepted) => {
                self.stores.write_session_marker(identifier.as_str());
                Some(identifier)
            }
            Ok(IdentifierVerdict::Rejected) => {
                debug!(identifier = %identifier, "collector rejected identifier");
                self.establish_new(session_id).await
            }
            Ok(IdentifierVerdict::Inconclusive(status)) => {
                self.errors
                    .record(format!("validate identifier unknown response: {status}"));
                None
            }
            Err(error) => {
                self.errors.record(format!("validate identifier: {error}"));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(value: &str) -> Identifier {
        Identifier::new(value).expect("non-empty identifier")
    }

    #[test]
    fn empty_string_is_not_an_identifier() {
        assert_eq!(Identifier::new(""), None);
        assert_eq!(id("fp-1").to_string(), "fp-1");
    }

    #[test]
    fn reconciliation_table() {
        let a = id("A");
        let b = id("B");
        let cases = [
            (None, None, None, ReconcileAction::EstablishNew),
            (Some(&a), None, Some(&a), ReconcileAction::PropagateToLocal),
            (None, Some(&a), Some(&a), ReconcileAction::PropagateToCookie),
            (Some(&a), Some(&a), Some(&a), ReconcileAction::AlreadyConsistent),
            (Some(&a), Some(&b), Some(&b), ReconcileAction::PropagateToCookie),
            (Some(&b), Some(&a), Some(&a), ReconcileAction::PropagateToCookie),
        ];

        for (cookie, local, canonical, action) in cases {
            let result = reconcile(cookie, local);
            assert_eq!(result.canonical.as_ref(), canonical, "cookie={cookie:?} local={local:?}");
            assert_eq!(result.action, action, "cookie={cookie:?} local={local:?}");
        }
    }
}
