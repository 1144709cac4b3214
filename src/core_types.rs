//! Core types used throughout the system
//!
//! These are fundamental aliases used by all modules. They provide semantic
//! meaning and enable future type evolution.

/// Account ID - opaque identifier assigned by the platform backend.
///
/// Accounts are created outside this process; the execution core never
/// invents ids, it only carries them through.
pub type AccountId = String;

/// User ID - owner of one or more accounts.
pub type UserId = String;

/// Order ID - UUID string, unique within the system.
pub type OrderId = String;

/// Trade ID - UUID string, unique within the system.
pub type TradeId = String;

/// Canonical symbol key (uppercase, no separators), e.g. `BTCUSD`.
///
/// Produced by [`crate::instruments::normalize_symbol`]; every map keyed by
/// symbol uses the canonical form, never the raw upstream spelling.
pub type SymbolKey = String;

/// Epoch milliseconds. All wire timestamps and trade lifecycle times use
/// this unit; `chrono` types appear only at the store boundary.
pub type EpochMs = i64;
