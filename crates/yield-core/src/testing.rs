//! In-memory chain for unit tests

use async_trait::async_trait;
use ethabi::{Address, ParamType, Token, Uint};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::abi;
use crate::chain::ChainOracle;
use crate::error::{Result, YieldError};

type Responder = Box<dyn Fn(u64, &[u8]) -> Result<Vec<u8>> + Send + Sync>;

pub struct MockChain {
    timestamps: Vec<i64>,
    responders: HashMap<(Address, [u8; 4]), Responder>,
    timestamp_reads: AtomicUsize,
    calls: AtomicUsize,
    attempts: AtomicUsize,
    failures_to_inject: usize,
    failures_injected: AtomicUsize,
}

impl MockChain {
    pub fn from_timestamps(timestamps: Vec<i64>) -> Self {
        assert!(!timestamps.is_empty(), "mock chain needs a genesis block");
        Self {
            timestamps,
            responders: HashMap::new(),
            timestamp_reads: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
            failures_to_inject: 0,
            failures_injected: AtomicUsize::new(0),
        }
    }

    /// Heights `0..=head`, `spacing` seconds apart, starting at `genesis`
    pub fn linear(head: u64, genesis: i64, spacing: i64) -> Self {
        Self::from_timestamps((0..=head as i64).map(|h| genesis + h * spacing).collect())
    }

    /// Every other read fails with a transient error until `n` have failed
    pub fn with_transient_failures(mut self, n: usize) -> Self {
        self.failures_to_inject = n;
        self
    }

    /// Answer `name(params)` calls to `address` with `f(block, calldata)`
    pub fn respond<F>(mut self, address: Address, name: &str, params: &[ParamType], f: F) -> Self
    where
        F: Fn(u64, &[u8]) -> Result<Vec<u8>> + Send + Sync + 'static,
    {
        let selector = ethabi::short_signature(name, params);
        self.responders.insert((address, selector), Box::new(f));
        self
    }

    /// Answer a no-argument view returning uint256
    pub fn respond_uint<F>(self, address: Address, name: &str, f: F) -> Self
    where
        F: Fn(u64) -> Uint + Send + Sync + 'static,
    {
        self.respond(address, name, &[], move |block, _| {
            Ok(ethabi::encode(&[Token::Uint(f(block))]))
        })
    }

    pub fn timestamp_reads(&self) -> usize {
        self.timestamp_reads.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn failures_injected(&self) -> usize {
        self.failures_injected.load(Ordering::SeqCst)
    }

    fn maybe_fail(&self) -> Result<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt % 2 == 0 && self.failures_injected() < self.failures_to_inject {
            self.failures_injected.fetch_add(1, Ordering::SeqCst);
            return Err(YieldError::Rpc("injected failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainOracle for MockChain {
    async fn current_height(&self) -> Result<u64> {
        self.maybe_fail()?;
        Ok(self.timestamps.len() as u64 - 1)
    }

    async fn timestamp_at(&self, height: u64) -> Result<i64> {
        self.maybe_fail()?;
        self.timestamp_reads.fetch_add(1, Ordering::SeqCst);
        self.timestamps
            .get(height as usize)
            .copied()
            .ok_or_else(|| YieldError::Rpc(format!("no block at height {height}")))
    }

    async fn call(&self, to: Address, data: Vec<u8>, block: u64) -> Result<Vec<u8>> {
        self.maybe_fail()?;
        self.calls.fetch_add(1, Ordering::SeqCst);
        let selector = abi::selector_of(&data).unwrap_or_default();
        match self.responders.get(&(to, selector)) {
            Some(responder) => responder(block, &data[4..]),
            None => Err(YieldError::Reverted {
                method: format!("0x{}", hex::encode(selector)),
                message: "no responder".to_string(),
            }),
        }
    }
}

/// Fixed-point 1e18 value, for building mock responses
pub fn wad(value: f64) -> Uint {
    Uint::from((value * 1e18).round() as u128)
}

/// Deterministic test address
pub fn address(n: u8) -> Address {
    Address::repeat_byte(n)
}

/// Relative float comparison for values that went through fixed point
#[track_caller]
pub fn assert_close(actual: f64, expected: f64) {
    let tolerance = 1e-12 * expected.abs().max(1.0);
    assert!(
        (actual - expected).abs() <= tolerance,
        "expected {expected}, got {actual}"
    );
}
