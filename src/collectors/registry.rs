use crate::collectors::config::CollectorConfig;
use crate::collectors::{Collector, register_builtin};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, warn};

pub type Factory =
    Arc<dyn Fn(&CollectorConfig) -> anyhow::Result<Arc<dyn Collector>> + Send + Sync>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("collector {0} is already registered")]
    Duplicate(String),

    #[error("missing collector: {0}")]
    Missing(String),

    #[error("disabled collector: {0}")]
    Disabled(String),

    #[error("failed to create collector {name}: {source}")]
    Factory {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

/// One registered collector type.
#[derive(Clone)]
pub struct CollectorRegistration {
    name: String,
    default_enabled: bool,
    explicit: Option<bool>,
    factory: Factory,
}

impl CollectorRegistration {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn default_enabled(&self) -> bool {
        self.default_enabled
    }

    /// Operator override, if one was given.
    #[must_use]
    pub const fn explicit(&self) -> Option<bool> {
        self.explicit
    }
}

impl fmt::Debug for CollectorRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectorRegistration")
            .field("name", &self.name)
            .field("default_enabled", &self.default_enabled)
            .field("explicit", &self.explicit)
            .finish_non_exhaustive()
    }
}

/// Table of collector factories, filled once at startup and read by every
/// scrape. Materialized collectors are cached and reused across scrapes.
#[derive(Default)]
pub struct CollectorRegistry {
    registrations: Vec<CollectorRegistration>,
    defaults_disabled: bool,
    built: Mutex<HashMap<String, Arc<dyn Collector>>>,
}

impl fmt::Debug for CollectorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectorRegistry")
            .field("registrations", &self.registrations)
            .field("defaults_disabled", &self.defaults_disabled)
            .finish_non_exhaustive()
    }
}

impl CollectorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in collector.
    ///
    /// # Errors
    ///
    /// Fails if two built-ins share a name.
    pub fn with_builtin() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        register_builtin(&mut registry)?;
        Ok(registry)
    }

    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] if `name` is already registered.
    pub fn register<F>(
        &mut self,
        name: &str,
        default_enabled: bool,
        factory: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(&CollectorConfig) -> anyhow::Result<Arc<dyn Collector>> + Send + Sync + 'static,
    {
        if self.registrations.iter().any(|r| r.name == name) {
            return Err(RegistryError::Duplicate(name.to_owned()));
        }

        self.registrations.push(CollectorRegistration {
            name: name.to_owned(),
            default_enabled,
            explicit: None,
            factory: Arc::new(factory),
        });

        Ok(())
    }

    /// Operator override for one collector. Survives [`Self::disable_defaults`].
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Missing`] for an unknown name.
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> Result<(), RegistryError> {
        let registration = self
            .registrations
            .iter_mut()
            .find(|r| r.name == name)
            .ok_or_else(|| RegistryError::Missing(name.to_owned()))?;
        registration.explicit = Some(enabled);
        Ok(())
    }

    /// Disables every collector that was not explicitly enabled.
    pub fn disable_defaults(&mut self) {
        self.defaults_disabled = true;
    }

    #[must_use]
    pub fn is_enabled(&self, name: &str) -> bool {
        self.registrations
            .iter()
            .find(|r| r.name == name)
            .is_some_and(|r| self.enabled(r))
    }

    fn enabled(&self, registration: &CollectorRegistration) -> bool {
        registration
            .explicit
            .unwrap_or(!self.defaults_disabled && registration.default_enabled)
    }

    /// Registrations in registration order.
    pub fn registrations(&self) -> impl Iterator<Item = &CollectorRegistration> {
        self.registrations.iter()
    }

    #[must_use]
    pub fn enabled_names(&self) -> Vec<String> {
        self.registrations
            .iter()
            .filter(|r| self.enabled(r))
            .map(|r| r.name.clone())
            .collect()
    }

    /// Materializes the enabled collectors, narrowed to `filters` when it is
    /// not empty. Every filter name must be registered and enabled.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Missing`] or [`RegistryError::Disabled`] for a
    /// bad filter, or [`RegistryError::Factory`] if a collector cannot be built.
    pub fn build_enabled(
        &self,
        filters: &[String],
        config: &CollectorConfig,
    ) -> Result<BTreeMap<String, Arc<dyn Collector>>, RegistryError> {
        for filter in filters {
            match self.registrations.iter().find(|r| &r.name == filter) {
                None => return Err(RegistryError::Missing(filter.clone())),
                Some(r) if !self.enabled(r) => {
                    return Err(RegistryError::Disabled(filter.clone()));
                }
                Some(_) => {}
            }
        }

        let mut built = match self.built.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Collector cache lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };

        let mut collectors = BTreeMap::new();

        for registration in &self.registrations {
            if !self.enabled(registration) {
                continue;
            }
            if !filters.is_empty() && !filters.contains(&registration.name) {
                continue;
            }

            let collector = if let Some(existing) = built.get(&registration.name) {
                Arc::clone(existing)
            } else {
                let collector =
                    (registration.factory)(config).map_err(|source| RegistryError::Factory {
                        name: registration.name.clone(),
                        source,
                    })?;
                debug!(collector = %registration.name, "created collector");
                built.insert(registration.name.clone(), Arc::clone(&collector));
                collector
            };

            collectors.insert(registration.name.clone(), collector);
        }

        Ok(collectors)
    }
}
