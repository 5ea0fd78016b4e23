//! Model fabric interface.
//!
//! The LLM fabric is an external collaborator: the kernel sees it as a
//! slot-named async RPC with a per-slot timeout, and owes a receipt for
//! every call it makes.

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Duration;

use crate::error::{Error, Result};
use crate::receipt::{ModelCallReceipt, ModelTimeoutReceipt, ReceiptBody};

/// A single chat message sent to a slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotMessage {
    pub role: String,
    pub content: String,
}

impl SlotMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }
}

/// Request to a named slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotRequest {
    pub slot: String,
    pub messages: Vec<SlotMessage>,
    pub temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl SlotRequest {
    pub fn new(slot: impl Into<String>, messages: Vec<SlotMessage>) -> Self {
        Self {
            slot: slot.into(),
            messages,
            temperature: 0.7,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Response from a slot call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotResponse {
    pub content: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Slot-named async RPC into the model fabric.
#[async_trait]
pub trait ModelFabric: Send + Sync {
    async fn call(&self, request: SlotRequest) -> Result<SlotResponse>;

    /// Per-slot timeout; the default applies when a slot has no override.
    fn slot_timeout_ms(&self, _slot: &str) -> u64 {
        120_000
    }
}

/// Wrapper that enforces per-slot timeouts and mints a receipt per call.
///
/// Receipts are returned alongside the response; the caller owns getting
/// them into the store.
pub struct FabricClient {
    fabric: Box<dyn ModelFabric>,
    timeouts: HashMap<String, u64>,
}

impl FabricClient {
    pub fn new(fabric: impl ModelFabric + 'static) -> Self {
        Self {
            fabric: Box::new(fabric),
            timeouts: HashMap::new(),
        }
    }

    pub fn with_slot_timeout(mut self, slot: impl Into<String>, timeout_ms: u64) -> Self {
        self.timeouts.insert(slot.into(), timeout_ms);
        self
    }

    fn timeout_for(&self, slot: &str) -> u64 {
        self.timeouts
            .get(slot)
            .copied()
            .unwrap_or_else(|| self.fabric.slot_timeout_ms(slot))
    }

    /// Call a slot. On success returns the response plus a call receipt;
    /// on timeout returns `Error::Timeout` plus a timeout receipt.
    pub async fn call(
        &self,
        request: SlotRequest,
    ) -> (Result<SlotResponse>, ReceiptBody) {
        let slot = request.slot.clone();
        let timeout_ms = self.timeout_for(&slot);
        let start = Instant::now();

        let outcome =
            tokio::time::timeout(Duration::from_millis(timeout_ms), self.fabric.call(request))
                .await;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            Ok(Ok(response)) => {
                let receipt = ReceiptBody::ModelCall(ModelCallReceipt {
                    slot,
                    model: response.model.clone(),
                    duration_ms: elapsed_ms,
                    input_tokens: response.input_tokens,
                    output_tokens: response.output_tokens,
                    success: true,
                    error: None,
                });
                (Ok(response), receipt)
            }
            Ok(Err(e)) => {
                let receipt = ReceiptBody::ModelCall(ModelCallReceipt {
                    slot: slot.clone(),
                    model: String::new(),
                    duration_ms: elapsed_ms,
                    input_tokens: 0,
                    output_tokens: 0,
                    success: false,
                    error: Some(e.to_string()),
                });
                (Err(e), receipt)
            }
            Err(_) => {
                let receipt = ReceiptBody::ModelTimeout(ModelTimeoutReceipt {
                    slot,
                    timeout_ms,
                    elapsed_ms,
                });
                (Err(Error::timeout(timeout_ms)), receipt)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoFabric;

    #[async_trait]
    impl ModelFabric for EchoFabric {
        async fn call(&self, request: SlotRequest) -> Result<SlotResponse> {
            Ok(SlotResponse {
                content: request
                    .messages
                    .last()
                    .map(|m| m.content.clone())
                    .unwrap_or_default(),
                model: "echo-1".to_string(),
                input_tokens: 10,
                output_tokens: 5,
            })
        }
    }

    struct SlowFabric;

    #[async_trait]
    impl ModelFabric for SlowFabric {
        async fn call(&self, _request: SlotRequest) -> Result<SlotResponse> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            unreachable!("call should have timed out")
        }
    }

    #[tokio::test]
    async fn test_call_mints_receipt() {
        let client = FabricClient::new(EchoFabric);
        let request = SlotRequest::new("judge", vec![SlotMessage::user("hello")]);
        let (response, receipt) = client.call(request).await;

        assert_eq!(response.unwrap().content, "hello");
        match receipt {
            ReceiptBody::ModelCall(call) => {
                assert!(call.success);
                assert_eq!(call.slot, "judge");
                assert_eq!(call.model, "echo-1");
            }
            other => panic!("expected call receipt, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_mints_timeout_receipt() {
        let client = FabricClient::new(SlowFabric).with_slot_timeout("judge", 50);
        let request = SlotRequest::new("judge", vec![SlotMessage::user("hello")]);
        let (response, receipt) = client.call(request).await;

        assert!(matches!(response, Err(Error::Timeout { .. })));
        match receipt {
            ReceiptBody::ModelTimeout(timeout) => {
                assert_eq!(timeout.slot, "judge");
                assert_eq!(timeout.timeout_ms, 50);
            }
            other => panic!("expected timeout receipt, got {:?}", other),
        }
    }
}
