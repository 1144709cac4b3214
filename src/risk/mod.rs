//! Risk engine
//!
//! Enforces the prop-firm rule set: pre-trade gating, post-fill checks
//! against the hypothetical balance, per-tick account evaluation, breach
//! liquidation, and the consistency / profit-target state machine.
//!
//! The engine never imports the matching engine; trade closing arrives as
//! an injected [`TradeCloser`] at boot, which keeps the call graph acyclic.

pub mod daily_reset;
pub mod engine;
pub mod rules;

pub use engine::{RiskEngine, TradeCloser};
