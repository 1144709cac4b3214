//! Instrument registry
//!
//! Loads per-symbol contract metadata (lot rules, costs, trading hours)
//! from the durable store, merged over a built-in default table, and
//! exposes it behind an RCU-style snapshot so the hot tick path never
//! takes a lock of any consequence.

pub mod defaults;
pub mod models;
pub mod registry;

pub use models::{Contract, TradingHours};
pub use registry::{InstrumentRegistry, normalize_symbol};
