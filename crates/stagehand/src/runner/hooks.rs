//! Lifecycle hook execution.

use crate::context::{ExecutionContext, LogLevel};
use crate::error::RunError;
use crate::plan::{Action, ActionType, HookEvent};
use crate::value::Value;
use async_trait::async_trait;
use tracing::debug;

/// Runs the actions attached to one lifecycle event.
///
/// `scope` is `"plan"` for plan-level hooks or the stage name.
#[async_trait]
pub trait HooksRunner: Send + Sync {
    async fn run_hooks(
        &self,
        ctx: &ExecutionContext,
        scope: &str,
        event: HookEvent,
        actions: &[Action],
    ) -> Result<(), RunError>;
}

/// Handles `log`, `save`, `skip` and `fail`. `exec` and `notify` are
/// rejected so that plans relying on them fail loudly.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHooksRunner;

impl DefaultHooksRunner {
    async fn run_action(
        &self,
        ctx: &ExecutionContext,
        scope: &str,
        event: HookEvent,
        action: &Action,
    ) -> Result<(), RunError> {
        match action.action_type {
            ActionType::Log => {
                let level = match action.param_str("level") {
                    Some(level) => level
                        .parse::<LogLevel>()
                        .map_err(|e| RunError::hook(scope, event, e))?,
                    None => LogLevel::Info,
                };
                ctx.log(level, action.param_str("message").unwrap_or_default())
                    .await;
            }
            ActionType::Save => {
                let key = action
                    .param_str("key")
                    .ok_or_else(|| RunError::hook(scope, event, "save action requires 'key'"))?;
                let value = action
                    .params
                    .get("value")
                    .cloned()
                    .map(Value::from)
                    .unwrap_or_default();
                ctx.data().set(key, value).await;
            }
            ActionType::Skip => {
                let reason = action.param_str("message").unwrap_or("skip action");
                ctx.log(LogLevel::Info, &format!("{scope}: {reason}")).await;
            }
            ActionType::Fail => {
                let message = action
                    .param_str("message")
                    .unwrap_or("fail action triggered");
                return Err(RunError::hook(scope, event, message));
            }
            ActionType::Exec | ActionType::Notify => {
                return Err(RunError::hook(
                    scope,
                    event,
                    format!("action '{}' is not supported", action.action_type),
                ));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl HooksRunner for DefaultHooksRunner {
    async fn run_hooks(
        &self,
        ctx: &ExecutionContext,
        scope: &str,
        event: HookEvent,
        actions: &[Action],
    ) -> Result<(), RunError> {
        for action in actions {
            if ctx.is_cancelled() {
                return Err(RunError::Cancelled);
            }
            debug!(scope, event = %event, action = %action.action_type, "Running hook action");
            self.run_action(ctx, scope, event, action).await?;
        }
        Ok(())
    }
}
