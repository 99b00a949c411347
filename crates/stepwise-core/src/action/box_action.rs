//! BoxAction -- object-safe dynamic dispatch wrapper for Action.
//!
//! 1. `ActionDyn` is an object-safe mirror of `Action` with boxed futures
//! 2. A blanket impl covers every `T: Action`
//! 3. `BoxAction` wraps `Arc<dyn ActionDyn>` and delegates

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use stepwise_types::retry::RetryPolicy;
use stepwise_types::workflow::ExecutionMode;

use super::{Action, ActionContext, ActionError, ActionOutput};

/// Object-safe version of [`Action`] with boxed futures.
pub trait ActionDyn: Send + Sync {
    fn execute_boxed(
        &self,
        ctx: ActionContext,
    ) -> Pin<Box<dyn Future<Output = Result<ActionOutput, ActionError>> + Send + '_>>;

    fn retry_policy(&self) -> Option<RetryPolicy>;

    fn mode(&self) -> ExecutionMode;
}

impl<T: Action> ActionDyn for T {
    fn execute_boxed(
        &self,
        ctx: ActionContext,
    ) -> Pin<Box<dyn Future<Output = Result<ActionOutput, ActionError>> + Send + '_>> {
        Box::pin(self.execute(ctx))
    }

    fn retry_policy(&self) -> Option<RetryPolicy> {
        Action::retry_policy(self)
    }

    fn mode(&self) -> ExecutionMode {
        Action::mode(self)
    }
}

/// Type-erased action resolved from the registry.
///
/// Cloning is cheap; a clone can be moved into a spawned task.
#[derive(Clone)]
pub struct BoxAction {
    inner: Arc<dyn ActionDyn>,
}

impl BoxAction {
    pub fn new<T: Action + 'static>(action: T) -> Self {
        Self {
            inner: Arc::new(action),
        }
    }

    pub async fn execute(&self, ctx: ActionContext) -> Result<ActionOutput, ActionError> {
        self.inner.execute_boxed(ctx).await
    }

    pub fn retry_policy(&self) -> Option<RetryPolicy> {
        self.inner.retry_policy()
    }

    pub fn mode(&self) -> ExecutionMode {
        self.inner.mode()
    }
}

impl std::fmt::Debug for BoxAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxAction")
            .field("mode", &self.mode())
            .finish()
    }
}
