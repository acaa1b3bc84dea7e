//! Chain access: the oracle trait the engine reads through, and its JSON-RPC
//! implementation for an archive node.
//!
//! Every read is pinned to an explicit block height. Transport failures are
//! retried with exponential backoff; reverts and decode errors are not.

use async_trait::async_trait;
use ethabi::Address;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::abi;
use crate::error::{Result, YieldError};

/// Height/time/state reads against the canonical chain
#[async_trait]
pub trait ChainOracle: Send + Sync {
    /// Latest block height
    async fn current_height(&self) -> Result<u64>;

    /// Unix timestamp of the block at `height`
    async fn timestamp_at(&self, height: u64) -> Result<i64>;

    /// `eth_call` of `data` against `to`, evaluated at `block`
    async fn call(&self, to: Address, data: Vec<u8>, block: u64) -> Result<Vec<u8>>;
}

/// Bounded retry with exponential backoff
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.pow(attempt.saturating_sub(1))
    }
}

/// Run `op` until it succeeds, fails permanently, or attempts run out.
///
/// The operation is re-issued verbatim, so a successful retry returns exactly
/// what a first-try success would have.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 0..max_attempts {
        if attempt > 0 {
            let delay = policy.delay_for(attempt);
            tracing::warn!(
                operation,
                attempt,
                ?delay,
                "retrying after transient failure"
            );
            sleep(delay).await;
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() => last_error = Some(e),
            Err(e) => return Err(e),
        }
    }

    Err(YieldError::TransientReadFailure {
        operation: operation.to_string(),
        attempts: max_attempts,
        message: last_error.map(|e| e.to_string()).unwrap_or_default(),
    })
}

// =============================================================================
// JSON-RPC
// =============================================================================

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u32,
    method: &'a str,
    params: serde_json::Value,
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct BlockHeader {
    timestamp: String,
}

/// Wraps every read of an inner oracle in [`retry`]
pub struct Retrying<O> {
    inner: O,
    policy: RetryPolicy,
}

impl<O: ChainOracle> Retrying<O> {
    pub fn new(inner: O, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &O {
        &self.inner
    }
}

#[async_trait]
impl<O: ChainOracle> ChainOracle for Retrying<O> {
    async fn current_height(&self) -> Result<u64> {
        retry(&self.policy, "current_height", move || self.inner.current_height()).await
    }

    async fn timestamp_at(&self, height: u64) -> Result<i64> {
        retry(&self.policy, "timestamp_at", move || self.inner.timestamp_at(height)).await
    }

    async fn call(&self, to: Address, data: Vec<u8>, block: u64) -> Result<Vec<u8>> {
        let data = &data;
        retry(&self.policy, "call", move || {
            self.inner.call(to, data.clone(), block)
        })
        .await
    }
}

/// Archive-node client speaking Ethereum JSON-RPC over HTTP
pub struct JsonRpcChain {
    client: reqwest::Client,
    url: String,
}

impl JsonRpcChain {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    async fn request<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T> {
        let body = RpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        };

        let response = self.client.post(&self.url).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            // 429 and 5xx are the usual suspects; all are worth another attempt
            return Err(YieldError::Rpc(format!("{method} returned status {status}")));
        }

        let envelope: RpcResponse<T> = response.json().await?;
        if let Some(err) = envelope.error {
            return Err(classify_rpc_error(method, err));
        }
        envelope
            .result
            .ok_or_else(|| YieldError::decode(method, "missing result"))
    }
}

/// Reverts are deterministic for a fixed block; everything else is retried
fn classify_rpc_error(method: &str, err: RpcErrorBody) -> YieldError {
    let lowered = err.message.to_lowercase();
    if err.code == 3 || lowered.contains("revert") || lowered.contains("invalid opcode") {
        YieldError::Reverted {
            method: method.to_string(),
            message: err.message,
        }
    } else {
        YieldError::Rpc(format!("{method}: {} ({})", err.message, err.code))
    }
}

fn to_quantity(value: u64) -> String {
    format!("0x{value:x}")
}

fn parse_quantity(what: &str, value: &str) -> Result<u64> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    u64::from_str_radix(digits, 16).map_err(|e| YieldError::decode(what, e))
}

fn parse_data(what: &str, value: &str) -> Result<Vec<u8>> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    hex::decode(digits).map_err(|e| YieldError::decode(what, e))
}

#[async_trait]
impl ChainOracle for JsonRpcChain {
    async fn current_height(&self) -> Result<u64> {
        let height: String = self
            .request("eth_blockNumber", serde_json::json!([]))
            .await?;
        parse_quantity("eth_blockNumber", &height)
    }

    async fn timestamp_at(&self, height: u64) -> Result<i64> {
        let header: BlockHeader = self
            .request(
                "eth_getBlockByNumber",
                serde_json::json!([to_quantity(height), false]),
            )
            .await?;
        let ts = parse_quantity("block timestamp", &header.timestamp)?;
        Ok(ts as i64)
    }

    async fn call(&self, to: Address, data: Vec<u8>, block: u64) -> Result<Vec<u8>> {
        let params = serde_json::json!([
            {
                "to": abi::format_address(&to),
                "data": format!("0x{}", hex::encode(&data)),
            },
            to_quantity(block),
        ]);
        let raw: String = self.request("eth_call", params).await?;
        parse_data("eth_call", &raw)
    }
}
