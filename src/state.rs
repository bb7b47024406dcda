//! Shared handler state and per-request gateway resolution.

use crate::{
    models::{bucket::BucketInfo, connection::ConnectionConfig},
    services::{
        StorageError, StorageResult, StorageService, backend::BackendFactory,
        credential_store::CredentialStore, storage_service::DEFAULT_PRESIGN_EXPIRY,
        upload::UploadSettings,
    },
};
use std::{sync::Arc, time::Duration};
use tracing::debug;

#[derive(Clone)]
pub struct AppState {
    pub store: CredentialStore,
    pub factory: Arc<dyn BackendFactory>,
    pub settings: UploadSettings,
    pub presign_expiry: Duration,
}

impl AppState {
    pub fn new(
        store: CredentialStore,
        factory: Arc<dyn BackendFactory>,
        settings: UploadSettings,
    ) -> Self {
        Self {
            store,
            factory,
            settings,
            presign_expiry: DEFAULT_PRESIGN_EXPIRY,
        }
    }

    pub fn with_presign_expiry(mut self, expiry: Duration) -> Self {
        self.presign_expiry = expiry;
        self
    }

    /// Gateway for the active profile.
    pub async fn gateway(&self) -> StorageResult<StorageService> {
        self.gateway_with(None).await
    }

    /// Gateway for `override_config` if given, otherwise for a snapshot of the
    /// active profile. Fails with `NoActiveConnection` when neither exists.
    pub async fn gateway_with(
        &self,
        override_config: Option<&ConnectionConfig>,
    ) -> StorageResult<StorageService> {
        let config = match override_config {
            Some(config) => {
                debug!("using explicit connection override");
                config.clone()
            }
            None => self
                .store
                .active_config()
                .await?
                .ok_or(StorageError::NoActiveConnection)?,
        };

        Ok(
            StorageService::connect(self.factory.as_ref(), &config, self.settings)?
                .with_presign_expiry(self.presign_expiry),
        )
    }

    /// List buckets with an explicit, unsaved connection.
    pub async fn test_connection(&self, config: &ConnectionConfig) -> StorageResult<Vec<BucketInfo>> {
        self.gateway_with(Some(config)).await?.list_buckets().await
    }
}
