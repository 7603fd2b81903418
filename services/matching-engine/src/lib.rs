//! Matching Engine Service
//!
//! Price-time priority matching core for a multi-asset venue: per-pair
//! limit and stop order books, the order admission/cancellation lifecycle,
//! two documented matching algorithms (all-or-nothing for market orders,
//! partial-fill tolerant for limit submissions), fee application, and the
//! transactional hand-off into the balance ledger.
//!
//! **Key invariants:**
//! - Price-time priority strictly enforced; ties break by creation time
//! - Base and quote legs of every committed match net to zero per pair
//! - Nothing commits before the persistence batch succeeds
//! - A cancel racing a match is resolved by sequencer order; the loser
//!   finds the order gone and no-ops

pub mod book;
pub mod config;
pub mod context;
pub mod engine;
pub mod events;
pub mod fees;
pub mod lifecycle;
pub mod matching;
pub mod registry;

pub use config::EngineConfig;
pub use context::ExecutionContext;
pub use engine::TradingEngine;
