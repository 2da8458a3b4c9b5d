//! Backend facade owning the shared state behind every operation.

use crate::Response;
use crate::cell::ResettableCell;
use crate::role::{ROLE_PREFIX, RoleField, RoleView, RoleWriteRequest, normalize_name};
use crate::store::RoleStore;
use config::{ApiConfig, CONFIG_KEY, ConfigView, ConfigWriteRequest, DirectorySettings, Settings};
use errors::{AuthError, DirectoryError};
use exo_core::{ComputeDirectory, StaticSystemView, Storage, SystemView};
use exoscale::ExoscaleClient;
use std::sync::Arc;
use storage::salt::SALT_KEY;
use storage::{get_json, put_json};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Builds a directory client from the persisted API config.
pub trait DirectoryFactory: Send + Sync {
    fn build(&self, config: &ApiConfig) -> Result<Arc<dyn ComputeDirectory>, DirectoryError>;
}

/// Builds [`ExoscaleClient`]s.
pub struct ExoscaleDirectoryFactory {
    settings: DirectorySettings,
}

impl ExoscaleDirectoryFactory {
    pub fn new(settings: DirectorySettings) -> Self {
        Self { settings }
    }
}

impl DirectoryFactory for ExoscaleDirectoryFactory {
    fn build(&self, config: &ApiConfig) -> Result<Arc<dyn ComputeDirectory>, DirectoryError> {
        Ok(Arc::new(ExoscaleClient::from_config(config, &self.settings)?))
    }
}

pub struct Backend {
    storage: Arc<dyn Storage>,
    system: Arc<dyn SystemView>,
    roles: RoleStore,
    factory: Arc<dyn DirectoryFactory>,
    directory: ResettableCell<dyn ComputeDirectory>,
    config_lock: Mutex<()>,
}

impl Backend {
    pub fn new(
        storage: Arc<dyn Storage>,
        system: Arc<dyn SystemView>,
        factory: Arc<dyn DirectoryFactory>,
        lock_pool_size: usize,
    ) -> Self {
        Self {
            roles: RoleStore::new(storage.clone(), lock_pool_size),
            storage,
            system,
            factory,
            directory: ResettableCell::new(),
            config_lock: Mutex::new(()),
        }
    }

    /// Backend wired from process settings: storage backend, lease limits
    /// and an Exoscale directory client.
    pub async fn from_settings(settings: &Settings) -> Result<Self, AuthError> {
        let storage = storage::connect(&settings.storage).await?;
        let system = Arc::new(StaticSystemView {
            default_lease_ttl: settings.lease.default_lease_ttl(),
            max_lease_ttl: settings.lease.max_lease_ttl(),
        });
        let factory = Arc::new(ExoscaleDirectoryFactory::new(settings.directory.clone()));
        info!(
            storage = %settings.storage.backend,
            lock_pool_size = settings.locks.pool_size,
            "Authentication backend initialized"
        );
        Ok(Self::new(storage, system, factory, settings.locks.pool_size))
    }

    pub(crate) fn roles(&self) -> &RoleStore {
        &self.roles
    }

    pub(crate) async fn api_config(&self) -> Result<Option<ApiConfig>, AuthError> {
        Ok(get_json(self.storage.as_ref(), CONFIG_KEY).await?)
    }

    pub(crate) async fn directory(
        &self,
        config: &ApiConfig,
    ) -> Result<Arc<dyn ComputeDirectory>, AuthError> {
        self.directory
            .get_or_try_init(|| async move {
                debug!(zone = %config.zone, "Building directory client");
                self.factory.build(config)
            })
            .await
            .map_err(AuthError::from)
    }

    pub async fn write_config(&self, req: ConfigWriteRequest) -> Result<ConfigView, AuthError> {
        let _guard = self.config_lock.lock().await;
        let config = ApiConfig::apply(self.api_config().await?, req)?;
        put_json(self.storage.as_ref(), CONFIG_KEY, &config).await?;
        self.directory.reset().await;
        info!(zone = %config.zone, approle_mode = config.approle_mode, "API config written");
        Ok(config.view())
    }

    pub async fn read_config(&self) -> Result<Option<ConfigView>, AuthError> {
        Ok(self.api_config().await?.map(|c| c.view()))
    }

    pub async fn delete_config(&self) -> Result<(), AuthError> {
        let _guard = self.config_lock.lock().await;
        self.storage.delete(CONFIG_KEY).await?;
        self.directory.reset().await;
        info!("API config deleted");
        Ok(())
    }

    pub async fn create_role(&self, req: RoleWriteRequest) -> Result<Response<RoleView>, AuthError> {
        self.roles
            .put(req, true, self.system.max_lease_ttl())
            .await
    }

    pub async fn update_role(&self, req: RoleWriteRequest) -> Result<Response<RoleView>, AuthError> {
        self.roles
            .put(req, false, self.system.max_lease_ttl())
            .await
    }

    pub async fn read_role(&self, name: &str) -> Result<Option<Response<RoleView>>, AuthError> {
        let name = normalize_name(name)?;
        Ok(self.roles.get(&name).await?.map(|entry| Response {
            data: RoleView::new(&name, &entry.data),
            warnings: entry.warnings,
        }))
    }

    pub async fn delete_role(&self, name: &str) -> Result<(), AuthError> {
        self.roles.delete(name).await
    }

    pub async fn list_roles(&self) -> Result<Vec<String>, AuthError> {
        self.roles.list().await
    }

    pub async fn read_role_field(
        &self,
        name: &str,
        field: RoleField,
    ) -> Result<Option<serde_json::Value>, AuthError> {
        Ok(self
            .read_role(name)
            .await?
            .map(|view| view.data.field(field)))
    }

    /// Updates one field of an existing role.
    pub async fn update_role_field(
        &self,
        name: &str,
        field: RoleField,
        value: serde_json::Value,
    ) -> Result<Response<RoleView>, AuthError> {
        if value.is_null() {
            return Err(AuthError::missing(field.as_ref()));
        }
        let mut body = serde_json::Map::new();
        body.insert("name".to_string(), name.into());
        body.insert(field.to_string(), value);
        let req: RoleWriteRequest = serde_json::from_value(body.into())
            .map_err(|e| AuthError::invalid(field.as_ref(), e.to_string()))?;
        self.update_role(req).await
    }

    /// Resets one token field to its zero value.
    pub async fn delete_role_field(
        &self,
        name: &str,
        field: RoleField,
    ) -> Result<Response<RoleView>, AuthError> {
        let mut req = RoleWriteRequest::new(name);
        match field {
            RoleField::Validator | RoleField::RoleId => {
                return Err(AuthError::invalid(field.as_ref(), "field cannot be deleted"));
            }
            RoleField::TokenTtl => req.token_ttl = Some(0),
            RoleField::TokenMaxTtl => req.token_max_ttl = Some(0),
            RoleField::TokenPeriod => req.token_period = Some(0),
            RoleField::TokenNumUses => req.token_num_uses = Some(0),
            RoleField::TokenBoundCidrs => req.token_bound_cidrs = Some(Vec::new()),
            RoleField::TokenPolicies => req.token_policies = Some(Vec::new()),
        }
        self.update_role(req).await
    }

    pub async fn read_role_id(&self, name: &str) -> Result<Option<String>, AuthError> {
        Ok(self.read_role(name).await?.map(|view| view.data.role_id))
    }

    /// Rotates the public identifier of an existing role.
    pub async fn update_role_id(
        &self,
        name: &str,
        role_id: &str,
    ) -> Result<Response<RoleView>, AuthError> {
        let mut req = RoleWriteRequest::new(name);
        req.role_id = Some(role_id.to_string());
        self.update_role(req).await
    }

    /// Configuration-change notification from the host.
    pub async fn invalidate(&self, key: &str) {
        match key {
            CONFIG_KEY => self.directory.reset().await,
            SALT_KEY => self.roles.index().reset_salt().await,
            _ => match key.strip_prefix(ROLE_PREFIX) {
                Some("") => self.roles.evict(None),
                Some(name) => self.roles.evict(Some(name)),
                None => return,
            },
        }
        debug!(key = %key, "Invalidated cached state");
    }
}
