use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::database::error::{DatabaseError, DatabaseResult};
use crate::database::repository::{Organization, OrganizationStore, SettlementCurrency};

#[derive(Debug, Clone, FromRow)]
struct OrganizationRow {
    id: Uuid,
    name: String,
    settlement_currencies: Json<Vec<SettlementCurrency>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<OrganizationRow> for Organization {
    fn from(row: OrganizationRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            settlement_currencies: row.settlement_currencies.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Read-only access to organizations; settlement currencies live in a JSONB column
pub struct PgOrganizationRepository {
    pool: PgPool,
}

impl PgOrganizationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrganizationStore for PgOrganizationRepository {
    async fn find_by_id(&self, id: Uuid) -> DatabaseResult<Option<Organization>> {
        let row = sqlx::query_as::<_, OrganizationRow>(
            "SELECT id, name, settlement_currencies, created_at, updated_at \
             FROM organizations WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(row.map(Organization::from))
    }
}
