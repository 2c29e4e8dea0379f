//! Synchronous facade over the stock ledger and batch crates.
//!
//! `StockEngine` owns the one discipline the underlying crates cannot enforce
//! alone: validate-then-append runs under an exclusive per-scope lock, so two
//! individually-safe concurrent decrements can never jointly drive a balance
//! negative. Everything else is composition: the workflow layer builds
//! candidate entries and calls in; violations come back as typed errors.

pub mod engine;
pub mod error;

pub use engine::StockEngine;
pub use error::EngineError;
