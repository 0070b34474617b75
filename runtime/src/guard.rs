//! At most one resubscription attempt in flight per subscription id.
//!
//! Runners consuming the same subscription id share a [`ResubscriptionGuard`]. Before
//! reloading the checkpoint and reopening the log subscription, a runner takes a
//! [`ResubscriptionPermit`]; a concurrent attempt for the same id is refused until the
//! permit is dropped.
//!
//! Runners built without an explicit guard use [`ResubscriptionGuard::shared`], one
//! registry for the whole process.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

static SHARED: OnceLock<ResubscriptionGuard> = OnceLock::new();

/// Shared registry of subscription ids with a resubscription in progress.
///
/// Cloning shares the registry.
#[derive(Clone, Debug, Default)]
pub struct ResubscriptionGuard {
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl ResubscriptionGuard {
    /// Create an empty guard, independent of every other guard.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide guard.
    #[must_use]
    pub fn shared() -> Self {
        SHARED.get_or_init(Self::new).clone()
    }

    /// Claim the resubscription slot of `subscription_id`.
    ///
    /// Returns `None` if another attempt holds it.
    #[must_use]
    pub fn try_acquire(&self, subscription_id: &str) -> Option<ResubscriptionPermit> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !in_flight.insert(subscription_id.to_string()) {
            return None;
        }
        Some(ResubscriptionPermit {
            guard: self.clone(),
            subscription_id: subscription_id.to_string(),
        })
    }

    /// Whether an attempt for `subscription_id` is in progress.
    #[must_use]
    pub fn is_in_flight(&self, subscription_id: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(subscription_id)
    }

    fn release(&self, subscription_id: &str) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(subscription_id);
    }
}

/// Exclusive right to resubscribe; released on drop.
#[derive(Debug)]
pub struct ResubscriptionPermit {
    guard: ResubscriptionGuard,
    subscription_id: String,
}

impl ResubscriptionPermit {
    /// Subscription id this permit was issued for.
    #[must_use]
    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }
}

impl Drop for ResubscriptionPermit {
    fn drop(&mut self) {
        self.guard.release(&self.subscription_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_attempt_is_refused_while_permit_lives() {
        let guard = ResubscriptionGuard::new();

        let permit = guard.try_acquire("carts");
        assert!(permit.is_some());
        assert!(guard.is_in_flight("carts"));
        assert!(guard.try_acquire("carts").is_none());

        drop(permit);
        assert!(!guard.is_in_flight("carts"));
        assert!(guard.try_acquire("carts").is_some());
    }

    #[test]
    fn ids_are_independent() {
        let guard = ResubscriptionGuard::new();
        let _carts = guard.try_acquire("carts");
        assert!(guard.try_acquire("orders").is_some());
    }

    #[test]
    fn clones_share_the_registry() {
        let guard = ResubscriptionGuard::new();
        let other = guard.clone();

        let permit = guard.try_acquire("carts");
        assert!(other.try_acquire("carts").is_none());
        assert_eq!(permit.map(|p| p.subscription_id().to_string()).as_deref(), Some("carts"));
    }

    #[test]
    fn shared_guards_are_one_registry() {
        let permit = ResubscriptionGuard::shared().try_acquire("shared_guard_invoices");
        assert!(permit.is_some());
        assert!(ResubscriptionGuard::shared().is_in_flight("shared_guard_invoices"));
        assert!(!ResubscriptionGuard::new().is_in_flight("shared_guard_invoices"));

        drop(permit);
        assert!(!ResubscriptionGuard::shared().is_in_flight("shared_guard_invoices"));
    }
}
