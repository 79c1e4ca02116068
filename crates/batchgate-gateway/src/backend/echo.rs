use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use batchgate_core::error::Result;

use crate::batching::BatchForward;

/// Demo backend: echoes each payload with its batch position after an
/// optional simulated forward latency.
#[derive(Debug, Clone, Default)]
pub struct EchoForward {
    latency: Duration,
}

impl EchoForward {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl BatchForward<Value, Value> for EchoForward {
    async fn forward(&self, batch: Vec<Value>) -> Result<Vec<Value>> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let size = batch.len();
        Ok(batch
            .into_iter()
            .enumerate()
            .map(|(i, payload)| {
                json!({
                    "echo": payload,
                    "batch_index": i,
                    "batch_size": size,
                })
            })
            .collect())
    }
}
