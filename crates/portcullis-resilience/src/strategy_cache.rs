//! Per-node memo of an expensive strategy keyed by a signature.
//!
//! A routing step rebuilds its failover strategy only when the expanded
//! backend list changes. Equality is element-wise and order-sensitive:
//! `[a, b]` and `[b, a]` are different signatures.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use portcullis_contracts::error::{GatewayError, GatewayResult};

struct Entry<S: ?Sized> {
    signature: Vec<String>,
    strategy: Arc<S>,
}

/// Holds at most one `(signature, strategy)` pair.
///
/// Readers whose signature matches only take the shared read guard.
/// Rebuilds are serialized by a separate mutex and re-check the stored
/// signature once they hold it, so concurrent callers with the same new
/// signature build once.
pub struct StrategyCache<S: ?Sized> {
    owner: String,
    current: RwLock<Option<Entry<S>>>,
    rebuild: Mutex<()>,
}

impl<S: ?Sized> StrategyCache<S> {
    /// `owner` names the step that owns the cache in logs and errors.
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            current: RwLock::new(None),
            rebuild: Mutex::new(()),
        }
    }

    /// Return the strategy for `signature`, building it if the signature
    /// differs from the stored one.
    ///
    /// # Errors
    ///
    /// `EmptySignature` when `signature` is empty; the builder is not
    /// called. Builder errors are returned as-is and leave the previous
    /// entry in place.
    pub fn get_or_build<F>(&self, signature: Vec<String>, build: F) -> GatewayResult<Arc<S>>
    where
        F: FnOnce(&[String]) -> GatewayResult<Arc<S>>,
    {
        if signature.is_empty() {
            return Err(GatewayError::EmptySignature { owner: self.owner.clone() });
        }

        if let Some(strategy) = self.lookup(&signature) {
            return Ok(strategy);
        }

        let _rebuilding = self.rebuild.lock();
        // Another caller may have built the same signature while we waited.
        if let Some(strategy) = self.lookup(&signature) {
            return Ok(strategy);
        }

        let strategy = build(&signature)?;
        debug!(owner = %self.owner, entries = signature.len(), "strategy rebuilt");
        *self.current.write() = Some(Entry { signature, strategy: strategy.clone() });
        Ok(strategy)
    }

    /// The stored strategy, if any.
    pub fn current(&self) -> Option<Arc<S>> {
        self.current.read().as_ref().map(|entry| entry.strategy.clone())
    }

    fn lookup(&self, signature: &[String]) -> Option<Arc<S>> {
        let guard = self.current.read();
        match guard.as_ref() {
            Some(entry) if entry.signature == signature => Some(entry.strategy.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use portcullis_contracts::error::GatewayError;

    use super::StrategyCache;

    fn sig(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn build_counting(builds: &AtomicUsize) -> impl FnOnce(&[String]) -> Result<Arc<Vec<String>>, GatewayError> + '_ {
        move |signature| {
            builds.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(signature.to_vec()))
        }
    }

    #[test]
    fn unchanged_signature_returns_same_instance() {
        let cache = StrategyCache::<Vec<String>>::new("route");
        let builds = AtomicUsize::new(0);

        let first = cache.get_or_build(sig(&["a", "b"]), build_counting(&builds)).unwrap();
        let second = cache.get_or_build(sig(&["a", "b"]), build_counting(&builds)).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn changed_signature_builds_new_instance() {
        let cache = StrategyCache::<Vec<String>>::new("route");
        let builds = AtomicUsize::new(0);

        let first = cache.get_or_build(sig(&["a", "b"]), build_counting(&builds)).unwrap();
        let second = cache.get_or_build(sig(&["a", "c"]), build_counting(&builds)).unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(*second, sig(&["a", "c"]));
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn reordered_signature_is_a_different_signature() {
        let cache = StrategyCache::<Vec<String>>::new("route");
        let builds = AtomicUsize::new(0);

        let first = cache.get_or_build(sig(&["a", "b"]), build_counting(&builds)).unwrap();
        let second = cache.get_or_build(sig(&["b", "a"]), build_counting(&builds)).unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn empty_signature_is_rejected_without_building() {
        let cache = StrategyCache::<Vec<String>>::new("route");
        let builds = AtomicUsize::new(0);

        match cache.get_or_build(Vec::new(), build_counting(&builds)) {
            Err(GatewayError::EmptySignature { owner }) => assert_eq!(owner, "route"),
            other => panic!("expected EmptySignature, got {:?}", other),
        }
        assert_eq!(builds.load(Ordering::SeqCst), 0);
        assert!(cache.current().is_none());
    }

    #[test]
    fn failed_build_keeps_previous_entry() {
        let cache = StrategyCache::<Vec<String>>::new("route");
        let builds = AtomicUsize::new(0);
        let first = cache.get_or_build(sig(&["a"]), build_counting(&builds)).unwrap();

        let result = cache.get_or_build(sig(&["b"]), |_| {
            Err(GatewayError::ConfigError { reason: "nope".to_string() })
        });
        assert!(result.is_err());
        assert!(Arc::ptr_eq(&first, &cache.current().unwrap()));
    }

    #[test]
    fn concurrent_callers_share_one_build() {
        let cache = Arc::new(StrategyCache::<Vec<String>>::new("route"));
        let builds = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let builds = builds.clone();
                std::thread::spawn(move || {
                    cache
                        .get_or_build(sig(&["x", "y"]), |s| {
                            builds.fetch_add(1, Ordering::SeqCst);
                            Ok(Arc::new(s.to_vec()))
                        })
                        .unwrap()
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(results.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }
}
