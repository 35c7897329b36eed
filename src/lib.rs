//! Cross-chain payment gateway backend.
//!
//! Merchants create pay orders that are settled by a payer sending crypto on
//! one of several chains; the gateway quotes, reserves a bridge deposit and
//! verifies the on-chain transfer before advancing the order.

pub mod cache;
pub mod chains;
pub mod config;
pub mod currency;
pub mod database;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod services;
pub mod workers;
