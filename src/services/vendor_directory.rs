use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashSet;

use crate::services::kv_store::StoreError;

pub const VENDOR_ROLE: &str = "vendor";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct VendorRecord {
    pub id: i64,
    pub role: String,
    pub is_active: bool,
}

impl VendorRecord {
    pub fn is_vendor(&self) -> bool {
        self.is_active && self.role == VENDOR_ROLE
    }
}

/// Lookup of marketplace accounts by id
#[async_trait]
pub trait VendorDirectory: Send + Sync {
    async fn find(&self, id: i64) -> Result<Option<VendorRecord>, StoreError>;

    /// Exists, is active and has the vendor role
    async fn is_vendor(&self, id: i64) -> Result<bool, StoreError> {
        Ok(self.find(id).await?.is_some_and(|record| record.is_vendor()))
    }
}

/// Fixed set of vendor ids from configuration
#[derive(Debug, Clone, Default)]
pub struct StaticVendorDirectory {
    vendor_ids: HashSet<i64>,
}

impl StaticVendorDirectory {
    pub fn new(vendor_ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            vendor_ids: vendor_ids.into_iter().collect(),
        }
    }
}

#[async_trait]
impl VendorDirectory for StaticVendorDirectory {
    async fn find(&self, id: i64) -> Result<Option<VendorRecord>, StoreError> {
        Ok(self.vendor_ids.contains(&id).then(|| VendorRecord {
            id,
            role: VENDOR_ROLE.to_string(),
            is_active: true,
        }))
    }
}

/// `users` table lookup
#[derive(Clone)]
pub struct PgVendorDirectory {
    pool: PgPool,
}

impl PgVendorDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VendorDirectory for PgVendorDirectory {
    async fn find(&self, id: i64) -> Result<Option<VendorRecord>, StoreError> {
        let record = sqlx::query_as::<_, VendorRecord>(
            "SELECT id, role, is_active FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }
}
