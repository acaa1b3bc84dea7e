//! Yield aggregation for Curve liquid locker compounders
//!
//! Resolves wall-clock windows to block heights, reads each vault's
//! price-per-share and peg at those blocks, and turns pairs of samples into
//! linear APRs. The results are kept in a single JSON cache document.

pub mod abi;
pub mod apr;
pub mod chain;
pub mod document;
pub mod error;
pub mod readers;
pub mod resolver;
pub mod sampler;
pub mod vaults;

#[cfg(test)]
mod testing;

pub use chain::{ChainOracle, JsonRpcChain, RetryPolicy, Retrying};
pub use document::{CacheDocument, ChartData, RunLock};
pub use error::{Result, YieldError};
pub use ethabi::Address;
pub use resolver::{Mode, Resolver};
pub use sampler::{AprObservation, Sampler, SamplerSettings, VaultSnapshot, WindowKind};
pub use vaults::{PpsStrategy, VaultRegistry, VaultSpec};
