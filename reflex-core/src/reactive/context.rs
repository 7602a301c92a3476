//! Execution Context Stack
//!
//! The context stack records which computation is currently running, so that
//! a read can register that computation as a dependent.
//!
//! # Implementation
//!
//! Each runtime owns one stack. Running a computation pushes a frame and the
//! returned guard pops it, restoring the previous computation as "current".
//! This supports nested computations: reads made by an inner computation are
//! attributed to it alone, and tracking resumes on the outer one once it
//! finishes.
//!
//! A frame may also be empty, which pauses tracking for everything that runs
//! inside it (see [`Runtime::untracked`](super::Runtime::untracked)).

use std::sync::Arc;

use parking_lot::Mutex;

use super::subscriber::{Subscriber, SubscriberId};

type Frame = Option<Arc<dyn Subscriber>>;

#[derive(Default)]
pub(crate) struct ContextStack {
    frames: Mutex<Vec<Frame>>,
}

/// Guard that pops its frame when dropped.
///
/// This keeps the stack balanced even if the computation panics.
pub(crate) struct ContextGuard<'a> {
    stack: &'a ContextStack,
    subscriber_id: Option<SubscriberId>,
}

impl ContextStack {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Push a frame for `subscriber` (or an untracked frame for `None`).
    pub(crate) fn enter(&self, subscriber: Frame) -> ContextGuard<'_> {
        let subscriber_id = subscriber.as_ref().map(|s| s.core().id());
        self.frames.lock().push(subscriber);
        ContextGuard {
            stack: self,
            subscriber_id,
        }
    }

    /// The computation on top of the stack, if any and if tracking.
    pub(crate) fn current(&self) -> Option<Arc<dyn Subscriber>> {
        self.frames.lock().last().cloned().flatten()
    }

    pub(crate) fn depth(&self) -> usize {
        self.frames.lock().len()
    }
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        let popped = self.stack.frames.lock().pop();

        // Verify we're popping the right frame.
        if let Some(frame) = popped {
            let popped_id = frame.as_ref().map(|s| s.core().id());
            debug_assert_eq!(
                popped_id, self.subscriber_id,
                "context stack mismatch: expected {:?}, got {:?}",
                self.subscriber_id, popped_id
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{ComputationCore, WeakRuntime};

    struct Probe {
        core: ComputationCore,
    }

    impl Subscriber for Probe {
        fn core(&self) -> &ComputationCore {
            &self.core
        }

        fn rerun(self: Arc<Self>) {}
    }

    fn subscriber() -> Arc<dyn Subscriber> {
        Arc::new(Probe {
            core: ComputationCore::new(WeakRuntime::default(), None, true),
        })
    }

    fn current_id(stack: &ContextStack) -> Option<SubscriberId> {
        stack.current().map(|s| s.core().id())
    }

    #[test]
    fn context_tracks_subscriber() {
        let stack = ContextStack::new();
        let sub = subscriber();
        let id = sub.core().id();

        assert!(stack.current().is_none());

        {
            let _ctx = stack.enter(Some(sub));
            assert_eq!(current_id(&stack), Some(id));
            assert_eq!(stack.depth(), 1);
        }

        // Context should be cleaned up after drop
        assert!(stack.current().is_none());
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn nested_contexts() {
        let stack = ContextStack::new();
        let outer = subscriber();
        let inner = subscriber();
        let outer_id = outer.core().id();
        let inner_id = inner.core().id();

        {
            let _ctx1 = stack.enter(Some(outer));
            assert_eq!(current_id(&stack), Some(outer_id));

            {
                let _ctx2 = stack.enter(Some(inner));
                assert_eq!(current_id(&stack), Some(inner_id));
            }

            // After inner context drops, outer should be current
            assert_eq!(current_id(&stack), Some(outer_id));
        }

        assert!(stack.current().is_none());
    }

    #[test]
    fn untracked_frame_hides_outer_subscriber() {
        let stack = ContextStack::new();
        let outer = subscriber();
        let outer_id = outer.core().id();

        let _ctx = stack.enter(Some(outer));
        {
            let _paused = stack.enter(None);
            assert!(stack.current().is_none());
            assert_eq!(stack.depth(), 2);
        }
        assert_eq!(current_id(&stack), Some(outer_id));
    }

    #[test]
    fn guard_pops_on_panic() {
        let stack = ContextStack::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ctx = stack.enter(Some(subscriber()));
            panic!("computation failed");
        }));

        assert!(result.is_err());
        assert_eq!(stack.depth(), 0);
    }
}
