use crate::classifier::Intent;
use anyhow::Result;
use async_trait::async_trait;
use std::{collections::HashMap, sync::Mutex};

/// Per-call, per-intent routing attempt bookkeeping.
///
/// Entries live from the first routing decision of a call until the call
/// reaches its final status, when `clear_call` drops them. A deployment that
/// runs several processes needs an implementation backed by the same store
/// as the call records.
#[async_trait]
pub trait AttemptTracker: Send + Sync {
    /// Atomically count one more attempt for `(call_id, intent)` unless the
    /// ceiling has been reached. Returns false when the ceiling blocks it.
    async fn check_and_increment(&self, call_id: &str, intent: &Intent, limit: u32)
        -> Result<bool>;

    async fn attempts(&self, call_id: &str, intent: &Intent) -> Result<u32>;

    async fn clear_call(&self, call_id: &str) -> Result<()>;
}

#[derive(Default)]
pub struct InMemoryAttemptTracker {
    counts: Mutex<HashMap<(String, Intent), u32>>,
}

impl InMemoryAttemptTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.counts.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AttemptTracker for InMemoryAttemptTracker {
    async fn check_and_increment(
        &self,
        call_id: &str,
        intent: &Intent,
        limit: u32,
    ) -> Result<bool> {
        let mut counts = self
            .counts
            .lock()
            .map_err(|e| anyhow::anyhow!("attempt tracker poisoned: {}", e))?;
        let count = counts
            .entry((call_id.to_string(), intent.clone()))
            .or_insert(0);
        if *count >= limit {
            return Ok(false);
        }
        *count += 1;
        Ok(true)
    }

    async fn attempts(&self, call_id: &str, intent: &Intent) -> Result<u32> {
        let counts = self
            .counts
            .lock()
            .map_err(|e| anyhow::anyhow!("attempt tracker poisoned: {}", e))?;
        Ok(counts
            .get(&(call_id.to_string(), intent.clone()))
            .copied()
            .unwrap_or(0))
    }

    async fn clear_call(&self, call_id: &str) -> Result<()> {
        let mut counts = self
            .counts
            .lock()
            .map_err(|e| anyhow::anyhow!("attempt tracker poisoned: {}", e))?;
        counts.retain(|(id, _), _| id != call_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_ceiling_blocks_third_attempt() {
        let tracker = InMemoryAttemptTracker::new();
        let intent = Intent::EmmaRequest;
        assert!(tracker.check_and_increment("CA1", &intent, 2).await.unwrap());
        assert!(tracker.check_and_increment("CA1", &intent, 2).await.unwrap());
        assert!(!tracker.check_and_increment("CA1", &intent, 2).await.unwrap());
        assert_eq!(tracker.attempts("CA1", &intent).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_keys_are_per_call_and_intent() {
        let tracker = InMemoryAttemptTracker::new();
        tracker
            .check_and_increment("CA1", &Intent::Unclear, 2)
            .await
            .unwrap();
        tracker
            .check_and_increment("CA1", &Intent::Other("billing".into()), 2)
            .await
            .unwrap();
        tracker
            .check_and_increment("CA2", &Intent::Unclear, 2)
            .await
            .unwrap();

        assert_eq!(tracker.attempts("CA1", &Intent::Unclear).await.unwrap(), 1);
        assert_eq!(
            tracker
                .attempts("CA1", &Intent::Other("billing".into()))
                .await
                .unwrap(),
            1
        );
        assert_eq!(tracker.len(), 3);

        tracker.clear_call("CA1").await.unwrap();
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.attempts("CA1", &Intent::Unclear).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_increments_respect_ceiling() {
        let tracker = Arc::new(InMemoryAttemptTracker::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let tracker = tracker.clone();
            handles.push(tokio::spawn(async move {
                tracker
                    .check_and_increment("CA1", &Intent::BusinessGeneral, 2)
                    .await
                    .unwrap()
            }));
        }
        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                granted += 1;
            }
        }
        assert_eq!(granted, 2);
        assert_eq!(
            tracker
                .attempts("CA1", &Intent::BusinessGeneral)
                .await
                .unwrap(),
            2
        );
    }
}
