//! Tasks that live and die together.
//!
//! A [`TaskGroup`] is a structured-concurrency scope: members are spawned
//! into it, the first member to fail cancels the others, and [`TaskGroup::join`]
//! only returns once every member has stopped. Dropping a group aborts
//! whatever is still running.

use std::future::Future;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub struct TaskGroup<E> {
    tasks: JoinSet<(&'static str, Result<(), E>)>,
    cancel: CancellationToken,
}

/// A group cancelled only by its own members.
impl<E: Send + 'static> Default for TaskGroup<E> {
    fn default() -> Self {
        Self::with_token(CancellationToken::new())
    }
}

impl<E: Send + 'static> TaskGroup<E> {
    /// A group that is also cancelled when `parent` is.
    pub fn with_parent(parent: &CancellationToken) -> Self {
        Self::with_token(parent.child_token())
    }

    fn with_token(cancel: CancellationToken) -> Self {
        Self {
            tasks: JoinSet::new(),
            cancel,
        }
    }

    /// Token that fires when the group is being torn down.
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Start a member. Once the group is cancelled the member's future is
    /// dropped at its next suspension point and it counts as finished.
    pub fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
    {
        let cancel = self.cancel.clone();
        self.tasks.spawn(async move {
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => Ok(()),
                result = task => result,
            };
            (name, result)
        });
    }

    /// Wait for all members. The first failure cancels the rest; it is
    /// returned after the last member has stopped. A member panic is
    /// re-raised, also after the others have stopped.
    pub async fn join(mut self) -> Result<(), E> {
        let mut first_error = None;
        let mut panic = None;
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok((name, Ok(()))) => {
                    tracing::trace!(task = name, "task finished");
                }
                Ok((name, Err(e))) => {
                    if first_error.is_none() && panic.is_none() {
                        tracing::debug!(task = name, "task failed, cancelling group");
                        self.cancel.cancel();
                        first_error = Some(e);
                    } else {
                        tracing::trace!(task = name, "task failed during teardown");
                    }
                }
                Err(e) if e.is_panic() => {
                    self.cancel.cancel();
                    panic.get_or_insert(e.into_panic());
                }
                Err(_) => {}
            }
        }
        if let Some(payload) = panic {
            std::panic::resume_unwind(payload);
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
