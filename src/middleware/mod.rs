//! HTTP plumbing shared by the routers: request ids and error rendering

pub mod error;
pub mod request_id;

pub use error::ErrorResponse;
pub use request_id::UuidRequestId;
