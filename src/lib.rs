#![deny(missing_docs)]
//! sealing-batcher accumulates per-sector pre-commit & prove-commit
//! payloads and lands them on chain in batched messages before any
//! sector's deadline expires

pub mod batching;
pub mod chain;
pub mod config;
pub mod logging;
pub mod miner;
pub mod types;
