//! src/services/credential_store.rs
//!
//! CredentialStore: persisted connection profiles with sealed secrets and
//! a single active profile, enforced both transactionally and by a partial
//! unique index on `is_active`.

use crate::{
    models::connection::{ConnectionConfig, ConnectionInput, ConnectionProfile},
    services::{StorageError, StorageResult, crypto::SecretCipher},
};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Raw `connections` row. Secrets stay sealed until `active_config`.
#[derive(sqlx::FromRow)]
struct ConnectionRow {
    id: Uuid,
    name: String,
    endpoint: String,
    region: String,
    access_key_enc: String,
    secret_key_enc: String,
    force_path_style: bool,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ConnectionRow> for ConnectionProfile {
    fn from(row: ConnectionRow) -> Self {
        ConnectionProfile {
            id: row.id,
            name: row.name,
            endpoint: row.endpoint,
            region: row.region,
            force_path_style: row.force_path_style,
            is_active: row.is_active,
            has_credentials: !row.access_key_enc.is_empty() && !row.secret_key_enc.is_empty(),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const SELECT_COLUMNS: &str = "SELECT id, name, endpoint, region, access_key_enc, secret_key_enc, \
     force_path_style, is_active, created_at, updated_at FROM connections";

#[derive(Clone)]
pub struct CredentialStore {
    db: Arc<SqlitePool>,
    cipher: Arc<SecretCipher>,
}

impl CredentialStore {
    pub fn new(db: Arc<SqlitePool>, cipher: Arc<SecretCipher>) -> Self {
        Self { db, cipher }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// All profiles, oldest first. Secrets are never part of the result.
    pub async fn list(&self) -> StorageResult<Vec<ConnectionProfile>> {
        let rows = sqlx::query_as::<_, ConnectionRow>(&format!(
            "{} ORDER BY created_at, name",
            SELECT_COLUMNS
        ))
        .fetch_all(&*self.db)
        .await?;
        Ok(rows.into_iter().map(ConnectionProfile::from).collect())
    }

    pub async fn get(&self, id: Uuid) -> StorageResult<ConnectionProfile> {
        self.fetch_row(id).await.map(ConnectionProfile::from)
    }

    /// Store a new profile. The first profile ever stored becomes active.
    pub async fn create(&self, input: ConnectionInput) -> StorageResult<ConnectionProfile> {
        validate_input(&input)?;
        if input.access_key.is_empty() || input.secret_key.is_empty() {
            return Err(StorageError::invalid(
                "access key and secret key are required",
            ));
        }

        let access_key_enc = self.cipher.seal(&input.access_key)?;
        let secret_key_enc = self.cipher.seal(&input.secret_key)?;
        let id = Uuid::new_v4();
        let now = Utc::now();

        let mut tx = self.db.begin().await?;
        let existing = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM connections")
            .fetch_one(&mut *tx)
            .await?;
        let is_active = existing == 0;

        let inserted = sqlx::query(
            "INSERT INTO connections (id, name, endpoint, region, access_key_enc, secret_key_enc, \
             force_path_style, is_active, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(input.name.trim())
        .bind(input.endpoint.trim())
        .bind(input.region.trim())
        .bind(&access_key_enc)
        .bind(&secret_key_enc)
        .bind(input.force_path_style)
        .bind(is_active)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(err) if is_name_conflict(&err) => {
                return Err(StorageError::DuplicateConnectionName(
                    input.name.trim().to_string(),
                ));
            }
            Err(err) => return Err(StorageError::Sqlx(err)),
        }
        tx.commit().await?;

        info!(connection = %id, name = %input.name.trim(), is_active, "connection created");
        self.get(id).await
    }

    /// Update a profile. Blank secrets keep the stored ones.
    pub async fn update(
        &self,
        id: Uuid,
        input: ConnectionInput,
    ) -> StorageResult<ConnectionProfile> {
        validate_input(&input)?;
        let current = self.fetch_row(id).await?;

        let access_key_enc = if input.access_key.is_empty() {
            current.access_key_enc
        } else {
            self.cipher.seal(&input.access_key)?
        };
        let secret_key_enc = if input.secret_key.is_empty() {
            current.secret_key_enc
        } else {
            self.cipher.seal(&input.secret_key)?
        };

        let updated = sqlx::query(
            "UPDATE connections SET name = ?, endpoint = ?, region = ?, access_key_enc = ?, \
             secret_key_enc = ?, force_path_style = ?, updated_at = ? WHERE id = ?",
        )
        .bind(input.name.trim())
        .bind(input.endpoint.trim())
        .bind(input.region.trim())
        .bind(&access_key_enc)
        .bind(&secret_key_enc)
        .bind(input.force_path_style)
        .bind(Utc::now())
        .bind(id)
        .execute(&*self.db)
        .await;

        match updated {
            Ok(_) => {}
            Err(err) if is_name_conflict(&err) => {
                return Err(StorageError::DuplicateConnectionName(
                    input.name.trim().to_string(),
                ));
            }
            Err(err) => return Err(StorageError::Sqlx(err)),
        }

        info!(connection = %id, "connection updated");
        self.get(id).await
    }

    /// Delete a profile. Deleting the active one leaves no profile active.
    pub async fn delete(&self, id: Uuid) -> StorageResult<()> {
        let result = sqlx::query("DELETE FROM connections WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::ConnectionNotFound(id.to_string()));
        }
        info!(connection = %id, "connection deleted");
        Ok(())
    }

    /// Make `id` the only active profile (clear all, then set one, in one
    /// transaction). An unknown id rolls back and leaves the previous
    /// active profile in place.
    pub async fn activate(&self, id: Uuid) -> StorageResult<ConnectionProfile> {
        let mut tx = self.db.begin().await?;

        sqlx::query("UPDATE connections SET is_active = 0 WHERE is_active = 1")
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("UPDATE connections SET is_active = 1, updated_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StorageError::ConnectionNotFound(id.to_string()));
        }
        tx.commit().await?;

        info!(connection = %id, "connection activated");
        self.get(id).await
    }

    /// Decrypted snapshot of the active profile, if there is one.
    pub async fn active_config(&self) -> StorageResult<Option<ConnectionConfig>> {
        let row = sqlx::query_as::<_, ConnectionRow>(&format!(
            "{} WHERE is_active = 1 LIMIT 1",
            SELECT_COLUMNS
        ))
        .fetch_optional(&*self.db)
        .await?;

        row.map(|row| self.decrypt(row)).transpose()
    }

    /// Decrypted settings of a stored profile, active or not.
    pub async fn config(&self, id: Uuid) -> StorageResult<ConnectionConfig> {
        let row = self.fetch_row(id).await?;
        self.decrypt(row)
    }

    async fn fetch_row(&self, id: Uuid) -> StorageResult<ConnectionRow> {
        sqlx::query_as::<_, ConnectionRow>(&format!("{} WHERE id = ?", SELECT_COLUMNS))
            .bind(id)
            .fetch_optional(&*self.db)
            .await?
            .ok_or_else(|| StorageError::ConnectionNotFound(id.to_string()))
    }

    fn decrypt(&self, row: ConnectionRow) -> StorageResult<ConnectionConfig> {
        Ok(ConnectionConfig {
            endpoint: row.endpoint,
            region: row.region,
            access_key: self.cipher.open(&row.access_key_enc)?,
            secret_key: self.cipher.open(&row.secret_key_enc)?,
            force_path_style: row.force_path_style,
        })
    }
}

fn validate_input(input: &ConnectionInput) -> StorageResult<()> {
    if input.name.trim().is_empty() {
        return Err(StorageError::invalid("connection name cannot be empty"));
    }
    if input.region.trim().is_empty() {
        return Err(StorageError::invalid("region cannot be empty"));
    }
    let endpoint = input.endpoint.trim();
    if !endpoint.is_empty() && !(endpoint.starts_with("http://") || endpoint.starts_with("https://"))
    {
        return Err(StorageError::invalid(
            "endpoint must start with http:// or https://",
        ));
    }
    Ok(())
}

fn is_name_conflict(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err)
            if db_err.message().to_ascii_lowercase().contains("unique")
                && db_err.message().contains("connections.name")
    )
}
