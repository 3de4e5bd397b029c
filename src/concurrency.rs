//! Cooperative cancellation
//!
//! The dynamic controller owns long-lived event sources and worker tasks; all
//! of them shut down through a shared token. Tokens form a hierarchy: the
//! token passed to `run` is the root, each registered kind gets a child, and
//! cancelling the root ripples down.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Notify;

/// A token for cooperative task cancellation.
///
/// Clones share state; when cancelled, every clone and every child token
/// observes the cancellation.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<CancelTokenInner>,
}

struct CancelTokenInner {
    cancelled: RwLock<bool>,
    notify: Notify,
    parent: Option<CancelToken>,
    children: RwLock<Vec<CancelToken>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancelTokenInner {
                cancelled: RwLock::new(false),
                notify: Notify::new(),
                parent: None,
                children: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Create a child token, cancelled automatically with its parent.
    pub fn child_token(&self) -> Self {
        let child = Self {
            inner: Arc::new(CancelTokenInner {
                cancelled: RwLock::new(false),
                notify: Notify::new(),
                parent: Some(self.clone()),
                children: RwLock::new(Vec::new()),
            }),
        };
        self.inner.children.write().push(child.clone());
        child
    }

    /// Cancel this token and all children.
    pub fn cancel(&self) {
        *self.inner.cancelled.write() = true;
        self.inner.notify.notify_waiters();

        let children = self.inner.children.read().clone();
        for child in children {
            child.cancel();
        }
    }

    /// Check whether this token or any ancestor has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        if *self.inner.cancelled.read() {
            return true;
        }
        match &self.inner.parent {
            Some(parent) => parent.is_cancelled(),
            None => false,
        }
    }

    /// Wait until the token is cancelled. Returns immediately if it already
    /// was. Parent cancellations arrive here too: cancelling a parent
    /// cancels every child, which notifies that child's waiters.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.inner.notify.notified();
            // Re-check between registering the waiter and awaiting it, a
            // cancel may have landed in the gap.
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_cancel_token_basic() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_token_child_follows_parent() {
        let parent = CancelToken::new();
        let child = parent.child_token();

        parent.cancel();

        assert!(parent.is_cancelled());
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_token_wait() {
        let token = CancelToken::new();
        let signaller = token.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            signaller.cancel();
        });

        timeout(Duration::from_millis(500), token.cancelled())
            .await
            .expect("token should be cancelled");
    }

    #[tokio::test]
    async fn test_child_wait_observes_parent_cancel() {
        let parent = CancelToken::new();
        let child = parent.child_token();

        tokio::spawn({
            let parent = parent.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                parent.cancel();
            }
        });

        timeout(Duration::from_millis(500), child.cancelled())
            .await
            .expect("child should observe parent cancellation");
    }
}
