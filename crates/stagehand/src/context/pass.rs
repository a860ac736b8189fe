//! One-shot value hand-off between concurrently running executors.

use crate::error::ContextError;
use crate::value::Value;
use std::collections::HashMap;
use tokio::sync::{RwLock, watch};
use tokio_util::sync::CancellationToken;

/// Single-resolution slots keyed by name.
///
/// A producer resolves a key exactly once. Every consumer awaiting that key,
/// whether it started waiting before or after the resolution, receives the
/// value.
#[derive(Debug, Default)]
pub struct PassChannels {
    slots: RwLock<HashMap<String, watch::Sender<Option<Value>>>>,
}

impl PassChannels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves `key`. Fails if it was already resolved.
    pub async fn resolve(&self, key: &str, value: impl Into<Value>) -> Result<(), ContextError> {
        let mut slots = self.slots.write().await;
        let slot = slots
            .entry(key.to_string())
            .or_insert_with(|| watch::channel(None).0);
        if slot.borrow().is_some() {
            return Err(ContextError::AlreadyResolved {
                key: key.to_string(),
            });
        }
        slot.send_replace(Some(value.into()));
        Ok(())
    }

    /// Waits until `key` is resolved, or fails with `Cancelled` once `cancel` fires.
    pub async fn await_value(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<Value, ContextError> {
        let mut receiver = self.subscribe(key).await;

        loop {
            let current = receiver.borrow_and_update().clone();
            if let Some(value) = current {
                return Ok(value);
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(ContextError::Cancelled),
                changed = receiver.changed() => {
                    if changed.is_err() {
                        return Err(ContextError::NotFound {
                            key: key.to_string(),
                        });
                    }
                }
            }
        }
    }

    /// Returns the value if `key` is already resolved.
    pub async fn try_get(&self, key: &str) -> Option<Value> {
        self.slots
            .read()
            .await
            .get(key)
            .and_then(|slot| slot.borrow().clone())
    }

    pub async fn is_resolved(&self, key: &str) -> bool {
        self.try_get(key).await.is_some()
    }

    async fn subscribe(&self, key: &str) -> watch::Receiver<Option<Value>> {
        if let Some(slot) = self.slots.read().await.get(key) {
            return slot.subscribe();
        }
        self.slots
            .write()
            .await
            .entry(key.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_late_consumer_receives_value() {
        let channels = PassChannels::new();
        channels.resolve("token", "abc").await.unwrap();

        let value = channels
            .await_value("token", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(value, Value::from("abc"));
    }

    #[tokio::test]
    async fn test_early_consumer_is_woken() {
        let channels = Arc::new(PassChannels::new());
        let cancel = CancellationToken::new();

        let waiter = {
            let channels = Arc::clone(&channels);
            let cancel = cancel.clone();
            tokio::spawn(async move { channels.await_value("id", &cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        channels.resolve("id", 42).await.unwrap();

        assert_eq!(waiter.await.unwrap().unwrap(), Value::Int(42));
    }

    #[tokio::test]
    async fn test_second_resolution_fails() {
        let channels = PassChannels::new();
        channels.resolve("k", 1).await.unwrap();
        assert_eq!(
            channels.resolve("k", 2).await,
            Err(ContextError::AlreadyResolved {
                key: "k".to_string()
            })
        );
        assert_eq!(channels.try_get("k").await, Some(Value::Int(1)));
    }

    #[tokio::test]
    async fn test_wait_observes_cancellation() {
        let channels = PassChannels::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(
            channels.await_value("never", &cancel).await,
            Err(ContextError::Cancelled)
        );
        assert!(!channels.is_resolved("never").await);
    }
}
