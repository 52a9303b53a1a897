//! Hierarchical progress and cooperative cancellation.
//!
//! Grounded in `hlapi/Helper.py`'s `ProgressManager` class (target/progress
//! counters, run/abort/error states, child-progress tree); cancellation is
//! redesigned onto `tokio_util::sync::CancellationToken`'s native
//! parent/child relationship instead of a polled flag on a mutable object.

use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Pending,
    Running,
    Done,
    Aborted,
    Error,
}

struct Inner {
    state: State,
    progress: i64,
    target: i64,
    explicit_finish: bool,
}

/// A snapshot of a node's (or subtree's) progress, for callers to poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub state: State,
    pub progress: i64,
    pub target: i64,
}

/// One node in the progress tree. Children share this node's
/// cancellation token as their parent, so aborting a node aborts its
/// entire subtree.
pub struct ProgressNode {
    token: CancellationToken,
    inner: Mutex<Inner>,
    children: Mutex<Vec<Arc<ProgressNode>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ProgressNode {
    pub fn root(explicit_finish: bool) -> Arc<Self> {
        Arc::new(ProgressNode {
            token: CancellationToken::new(),
            inner: Mutex::new(Inner {
                state: State::Pending,
                progress: 0,
                target: 0,
                explicit_finish,
            }),
            children: Mutex::new(Vec::new()),
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Spawn a child node whose cancellation is derived from this one's,
    /// tracked so `close()`/`status()` reach it too.
    pub fn child(self: &Arc<Self>, explicit_finish: bool) -> Arc<ProgressNode> {
        let child = Arc::new(ProgressNode {
            token: self.token.child_token(),
            inner: Mutex::new(Inner {
                state: State::Pending,
                progress: 0,
                target: 0,
                explicit_finish,
            }),
            children: Mutex::new(Vec::new()),
            workers: Mutex::new(Vec::new()),
        });
        self.children.lock().unwrap().push(child.clone());
        child
    }

    pub fn start(&self) {
        self.inner.lock().unwrap().state = State::Running;
    }

    /// Cooperative cancellation check: worker loops poll this at loop
    /// head and before each network operation.
    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled() && self.inner.lock().unwrap().state == State::Running
    }

    /// Cancel this node and every descendant sharing its token tree.
    pub fn abort(&self) {
        self.token.cancel();
        self.inner.lock().unwrap().state = State::Aborted;
    }

    /// `n == 0` finishes immediately; `n < 0` is an error transition.
    pub fn set_target(&self, n: i64) {
        let mut inner = self.inner.lock().unwrap();
        inner.target = n.max(0);
        if n == 0 {
            inner.state = State::Done;
        } else if n < 0 {
            inner.state = State::Error;
        }
    }

    /// Advancing beyond `target` is an error transition.
    pub fn add_progress(&self, n: i64) {
        let mut inner = self.inner.lock().unwrap();
        inner.progress += n;
        if inner.progress > inner.target {
            inner.state = State::Error;
        } else if inner.progress == inner.target && inner.target > 0 && !inner.explicit_finish {
            inner.state = State::Done;
        }
    }

    /// Explicitly finish a node whose `explicit_finish` flag caps its
    /// reported progress at 99% until this is called.
    pub fn finish(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.explicit_finish = false;
        inner.progress = inner.target;
        if inner.state != State::Aborted && inner.state != State::Error {
            inner.state = State::Done;
        }
    }

    /// Track a spawned worker task so `close()` can join it.
    pub fn track_worker(&self, handle: JoinHandle<()>) {
        self.workers.lock().unwrap().push(handle);
    }

    /// Join every tracked worker and every child's workers. Idempotent:
    /// the worker list is drained, so repeated calls are no-ops.
    pub async fn close(&self) {
        let handles: Vec<_> = self.workers.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        let children: Vec<_> = self.children.lock().unwrap().clone();
        for child in children {
            Box::pin(child.close()).await;
        }
    }

    pub fn status(&self) -> Status {
        let inner = self.inner.lock().unwrap();
        let (mut progress, mut target) = (inner.progress, inner.target);
        let state = inner.state;
        let explicit_finish = inner.explicit_finish;
        drop(inner);

        for child in self.children.lock().unwrap().iter() {
            let child_status = child.status();
            progress += child_status.progress;
            target += child_status.target;
        }

        if explicit_finish && state != State::Done && target > 0 {
            let capped = (target * 99) / 100;
            progress = progress.min(capped);
        }

        Status {
            state,
            progress,
            target,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_target_zero_finishes_immediately() {
        let node = ProgressNode::root(false);
        node.start();
        node.set_target(0);
        assert_eq!(node.status().state, State::Done);
    }

    #[test]
    fn set_target_negative_errors() {
        let node = ProgressNode::root(false);
        node.start();
        node.set_target(-1);
        assert_eq!(node.status().state, State::Error);
    }

    #[test]
    fn add_progress_beyond_target_errors() {
        let node = ProgressNode::root(false);
        node.start();
        node.set_target(10);
        node.add_progress(11);
        assert_eq!(node.status().state, State::Error);
    }

    #[test]
    fn explicit_finish_caps_at_99_percent() {
        let node = ProgressNode::root(true);
        node.start();
        node.set_target(100);
        node.add_progress(100);
        let status = node.status();
        assert_eq!(status.state, State::Running);
        assert_eq!(status.progress, 99);
    }

    #[test]
    fn finish_releases_the_explicit_cap() {
        let node = ProgressNode::root(true);
        node.start();
        node.set_target(100);
        node.add_progress(100);
        node.finish();
        let status = node.status();
        assert_eq!(status.state, State::Done);
        assert_eq!(status.progress, 100);
    }

    #[test]
    fn abort_cancels_child_token() {
        let parent = ProgressNode::root(false);
        let child = parent.child(false);
        parent.abort();
        assert!(!child.is_running());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let node = ProgressNode::root(false);
        node.track_worker(tokio::spawn(async {}));
        node.close().await;
        node.close().await;
    }

    #[tokio::test]
    async fn close_joins_child_workers_too() {
        let parent = ProgressNode::root(false);
        let child = parent.child(false);
        child.track_worker(tokio::spawn(async {}));
        parent.close().await;
    }
}
