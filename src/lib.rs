//! Event-driven launch sniper for EVM chains.
//!
//! Watches factories and launch contracts for new tokens, buys them through a
//! V2-style router, and exits through emulated take-profit / stop-loss orders.

pub mod chain;
pub mod config;
pub mod error;
pub mod models;
pub mod trading;
pub mod utils;
pub mod web;

pub use config::{Config, SniperConfig};
pub use error::{SniperError, SniperResult};
