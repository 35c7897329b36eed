//! Pay orders: the merchant-facing payment request and its lifecycle.
//!
//! A pay order is created PENDING, quoted against the payer's balances,
//! reserved against one source currency (AWAITING_PAYMENT), and finally
//! verified against the payer's on-chain transfer.

pub mod error;
pub mod model;
pub mod service;

pub use error::{PayOrderError, PayOrderResult};
pub use model::{NewPayOrder, PayOrder, PayOrderMode, PayOrderStatus, Reservation};
pub use service::{
    CreatePayOrderRequest, PayOrderService, PayOrderServiceConfig, PaymentDetails, QuotedCurrency,
};
