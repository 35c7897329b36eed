//! Persistence for pay orders and organizations
//!
//! The store traits and in-memory stores are always available; the Postgres
//! repositories and pool helpers need the `database` feature.

pub mod error;
pub mod memory;
#[cfg(feature = "database")]
pub mod organization_repository;
#[cfg(feature = "database")]
pub mod payorder_repository;
#[cfg(feature = "database")]
mod pool;
pub mod repository;

pub use error::{DatabaseError, DatabaseErrorKind, DatabaseResult};
pub use memory::{InMemoryOrganizationStore, InMemoryPayOrderStore};
#[cfg(feature = "database")]
pub use organization_repository::PgOrganizationRepository;
#[cfg(feature = "database")]
pub use payorder_repository::PgPayOrderRepository;
pub use repository::{Organization, OrganizationStore, PayOrderStore, SettlementCurrency};

#[cfg(feature = "database")]
pub use pool::{health_check, init_pool, init_pool_from_config, PoolConfig};
