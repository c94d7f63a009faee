use feedcron_core::config::{FeedcronConfig, TenantEntry};
use feedcron_core::{Frequency, TenantKey, TimeOfDay};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};

/// The feed settings the scheduler needs for one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantConfig {
    /// Whether the tenant still takes part in scheduling at all.
    pub active: bool,
    pub enabled: bool,
    pub start_time: TimeOfDay,
    pub frequency: Frequency,
    pub step_delay_minutes: u32,
}

impl From<&TenantEntry> for TenantConfig {
    fn from(entry: &TenantEntry) -> Self {
        Self {
            active: entry.active,
            enabled: entry.enabled,
            start_time: entry.start_time,
            frequency: entry.frequency.clone(),
            step_delay_minutes: entry.step_delay_minutes,
        }
    }
}

/// Source of tenant configuration, injected into the reconciler and engine.
pub trait TenantConfigProvider: Send + Sync {
    /// Tenants a sweep should visit.
    fn active_tenants(&self) -> Vec<TenantKey>;

    fn tenant_config(&self, tenant: &TenantKey) -> Result<TenantConfig>;
}

/// Tenant configuration taken from the `[[tenants]]` section of the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfiguredTenants {
    entries: Vec<TenantEntry>,
    pinned: Option<TenantKey>,
}

impl ConfiguredTenants {
    pub fn new(entries: Vec<TenantEntry>) -> Self {
        Self {
            entries,
            pinned: None,
        }
    }

    pub fn from_config(config: &FeedcronConfig) -> Self {
        Self {
            entries: config.tenants.clone(),
            pinned: config
                .scheduler
                .pinned_tenant
                .as_deref()
                .map(TenantKey::from),
        }
    }

    /// Restrict sweeps to a single tenant, whatever its `active` flag.
    pub fn pinned(mut self, tenant: Option<TenantKey>) -> Self {
        if tenant.is_some() {
            self.pinned = tenant;
        }
        self
    }
}

impl TenantConfigProvider for ConfiguredTenants {
    fn active_tenants(&self) -> Vec<TenantKey> {
        if let Some(pinned) = &self.pinned {
            return vec![pinned.clone()];
        }
        self.entries
            .iter()
            .filter(|e| e.active)
            .map(|e| e.key.clone())
            .collect()
    }

    /// A pinned tenant counts as active even when its entry says otherwise.
    fn tenant_config(&self, tenant: &TenantKey) -> Result<TenantConfig> {
        let mut config = self
            .entries
            .iter()
            .find(|e| &e.key == tenant)
            .map(TenantConfig::from)
            .ok_or_else(|| SchedulerError::UnknownTenant {
                tenant: tenant.clone(),
            })?;
        if self.pinned.as_ref() == Some(tenant) {
            config.active = true;
        }
        Ok(config)
    }
}
