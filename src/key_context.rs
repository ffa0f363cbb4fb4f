use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use crate::offset::Offset;

/// A boxed, owned async closure — the shape the teacher reaches for
/// whenever a callback needs to suspend (see `HealthHandle`'s `mpsc`
/// sender in `hook-common/src/health.rs`, used the same way: a cheap
/// `Clone`-able handle closing over shared state).
pub type RemoveSelf = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Per-key handle given to a `KeyFlow`/`Timers` implementation.
///
/// Exposes the key's *hold* offset, which the partition flow reads during
/// commit arbitration (spec §4.2), and a self-removal hook that drops the
/// key's `PartitionKey` from the owning cache. Cheap to `Clone`: both
/// fields are `Arc`-backed, so every clone observes the same hold and can
/// trigger the same removal.
#[derive(Clone)]
pub struct KeyContext {
    hold: Arc<Mutex<Option<Offset>>>,
    remove_self: RemoveSelf,
}

impl KeyContext {
    pub(crate) fn new(remove_self: RemoveSelf) -> Self {
        Self {
            hold: Arc::new(Mutex::new(None)),
            remove_self,
        }
    }

    /// Sets the smallest offset whose processing is still outstanding for
    /// this key. The partition flow will not let the committed offset pass
    /// this value while it is set.
    pub fn hold(&self, offset: Offset) {
        *self.hold.lock().unwrap() = Some(offset);
    }

    /// Clears the hold: this key no longer blocks commits.
    pub fn release(&self) {
        *self.hold.lock().unwrap() = None;
    }

    /// The current hold, if any. Read by commit arbitration.
    pub fn current_hold(&self) -> Option<Offset> {
        *self.hold.lock().unwrap()
    }

    /// Removes this key's entry from the owning cache, releasing its
    /// state. Idempotent at the cache level.
    pub async fn remove_self(&self) {
        (self.remove_self)().await;
    }
}

impl fmt::Debug for KeyContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyContext")
            .field("hold", &self.current_hold())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn noop_remove() -> RemoveSelf {
        Arc::new(|| Box::pin(async {}))
    }

    #[test]
    fn hold_and_release_round_trip() {
        let ctx = KeyContext::new(noop_remove());
        assert_eq!(ctx.current_hold(), None);

        ctx.hold(Offset::new(42));
        assert_eq!(ctx.current_hold(), Some(Offset::new(42)));

        ctx.release();
        assert_eq!(ctx.current_hold(), None);
    }

    #[tokio::test]
    async fn remove_self_invokes_hook() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let hook: RemoveSelf = Arc::new(move || {
            let calls = calls_clone.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        });

        let ctx = KeyContext::new(hook);
        ctx.remove_self().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clone_shares_hold_state() {
        let ctx = KeyContext::new(noop_remove());
        let clone = ctx.clone();

        ctx.hold(Offset::new(7));
        assert_eq!(clone.current_hold(), Some(Offset::new(7)));
    }
}
