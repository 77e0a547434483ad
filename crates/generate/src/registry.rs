//! Cross-task port discovery. Services generate in parallel with no
//! ordering, yet a dependent's init container needs the port of the service
//! it waits for. The registry is the rendezvous: the first declared port of
//! each service is announced once, and tasks subscribe for ports they do
//! not know yet.

use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Mutex;
use tokio::sync::oneshot;

/// `Some(port)` once discovered, `None` when the service is known to expose
/// no port at all.
pub type PortAnswer = Option<u16>;

#[derive(Default)]
struct Inner {
    discovered: FxHashMap<String, u16>,
    unavailable: FxHashSet<String>,
    waiters: FxHashMap<String, Vec<oneshot::Sender<PortAnswer>>>,
}

/// Shared table of service name → discovery port, scoped to one generation
/// run. All state sits behind a single mutex; nothing blocks or does I/O
/// while holding it, and a resolved waiter is removed for good.
#[derive(Default)]
pub struct PortRegistry {
    inner: Mutex<Inner>,
}

impl PortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a discovered port. Write-once: the first announcement for a
    /// name wins and later calls are no-ops. Current waiters are resolved
    /// on the spot; later subscribers resolve immediately on entry.
    pub fn announce(&self, name: &str, port: u16) {
        let mut inner = self.inner.lock().unwrap();
        if inner.discovered.contains_key(name) || inner.unavailable.contains(name) {
            return;
        }
        inner.discovered.insert(name.to_string(), port);
        for tx in inner.waiters.remove(name).unwrap_or_default() {
            let _ = tx.send(Some(port));
        }
    }

    /// Broadcast that a service exposes no port. One-shot, same delivery
    /// path as a real announcement: each waiter, current or future, gets
    /// the sentinel exactly once and is never left hanging.
    pub fn mark_unavailable(&self, name: &str) {
        let mut inner = self.inner.lock().unwrap();
        if inner.discovered.contains_key(name) || !inner.unavailable.insert(name.to_string()) {
            return;
        }
        for tx in inner.waiters.remove(name).unwrap_or_default() {
            let _ = tx.send(None);
        }
    }

    /// Non-blocking probe for call sites that can tolerate "not yet known".
    pub fn lookup(&self, name: &str) -> Option<u16> {
        self.inner.lock().unwrap().discovered.get(name).copied()
    }

    /// Register interest in a service's port. Resolves immediately when the
    /// answer is already known, otherwise at announcement time.
    pub fn subscribe(&self, name: &str) -> oneshot::Receiver<PortAnswer> {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock().unwrap();
        if let Some(port) = inner.discovered.get(name).copied() {
            let _ = tx.send(Some(port));
        } else if inner.unavailable.contains(name) {
            let _ = tx.send(None);
        } else {
            inner.waiters.entry(name.to_string()).or_default().push(tx);
        }
        rx
    }

    #[cfg(test)]
    fn waiter_count(&self, name: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .waiters
            .get(name)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_after_announce_resolves_immediately() {
        let reg = PortRegistry::new();
        reg.announce("db", 3306);
        assert_eq!(reg.subscribe("db").await.unwrap(), Some(3306));
    }

    #[tokio::test]
    async fn subscribe_before_announce_resolves_exactly_once() {
        let reg = PortRegistry::new();
        let rx = reg.subscribe("db");
        assert_eq!(reg.waiter_count("db"), 1);
        reg.announce("db", 3306);
        assert_eq!(rx.await.unwrap(), Some(3306));
        // resolved waiters are drained, not re-notified
        assert_eq!(reg.waiter_count("db"), 0);
    }

    #[test]
    fn announce_is_idempotent_first_writer_wins() {
        let reg = PortRegistry::new();
        reg.announce("db", 3306);
        reg.announce("db", 5432);
        assert_eq!(reg.lookup("db"), Some(3306));
    }

    #[tokio::test]
    async fn no_port_sentinel_reaches_current_and_future_waiters() {
        let reg = PortRegistry::new();
        let before = reg.subscribe("batch");
        reg.mark_unavailable("batch");
        assert_eq!(before.await.unwrap(), None);
        assert_eq!(reg.subscribe("batch").await.unwrap(), None);
        assert_eq!(reg.lookup("batch"), None);
    }

    #[test]
    fn lookup_is_non_blocking_and_optional() {
        let reg = PortRegistry::new();
        assert_eq!(reg.lookup("missing"), None);
        reg.announce("web", 80);
        assert_eq!(reg.lookup("web"), Some(80));
    }
}
