//! Registry of live instances and risk-parameter broadcast.

use std::sync::Arc;

use futures::future::join_all;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::info;

use crate::models::{InstanceSpec, Mode, RiskParameter};

use super::{EngineSettings, Services, TradingError, TradingInstance};

/// Which instances a parameter change applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastTarget {
    All,
    Only(Vec<String>),
}

impl BroadcastTarget {
    fn includes(&self, name: &str) -> bool {
        match self {
            BroadcastTarget::All => true,
            BroadcastTarget::Only(names) => names.iter().any(|n| n == name),
        }
    }
}

/// Live instances plus names reserved by creations still starting.
#[derive(Default)]
struct Slots {
    live: Vec<Arc<TradingInstance>>,
    starting: Vec<String>,
}

impl Slots {
    fn is_taken(&self, name: &str) -> bool {
        self.live.iter().any(|i| i.name() == name) || self.starting.iter().any(|n| n == name)
    }
}

/// Insertion-ordered set of live instances with unique names.
pub struct Registry {
    slots: RwLock<Slots>,
    services: Services,
    settings: EngineSettings,
}

impl Registry {
    pub fn new(services: Services, settings: EngineSettings) -> Self {
        Self {
            slots: RwLock::new(Slots::default()),
            services,
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Validate `spec`, start the instance and register it.
    pub async fn create(&self, spec: &InstanceSpec) -> Result<Arc<TradingInstance>, TradingError> {
        let config = spec.validate()?;

        if config.mode == Mode::Real && !self.services.gateway.can_trade() {
            return Err(TradingError::ConfigurationError(
                "Real mode requires exchange credentials".into(),
            ));
        }

        {
            let mut slots = self.slots.write().await;
            if slots.is_taken(&config.name) {
                return Err(TradingError::ConfigurationError(format!(
                    "an instance named '{}' already exists",
                    config.name
                )));
            }
            slots.starting.push(config.name.clone());
        }

        // Not under the lock: start awaits the notifier and the journal.
        let instance =
            TradingInstance::start(config, self.services.clone(), self.settings.clone()).await;

        let mut slots = self.slots.write().await;
        slots.starting.retain(|n| n != instance.name());
        slots.live.push(instance.clone());

        Ok(instance)
    }

    /// Stop and remove an instance. Its loops finish in the background.
    pub async fn stop(&self, name: &str) -> Option<Arc<TradingInstance>> {
        let instance = {
            let mut slots = self.slots.write().await;
            let idx = slots.live.iter().position(|i| i.name() == name)?;
            slots.live.remove(idx)
        };

        instance.stop().await;
        Some(instance)
    }

    /// Stop every instance and wait for all loops to exit.
    pub async fn stop_all(&self) {
        let instances: Vec<_> = self.slots.write().await.live.drain(..).collect();
        if instances.is_empty() {
            return;
        }

        info!(count = instances.len(), "Stopping all instances");
        join_all(instances.iter().map(|i| async move {
            i.stop().await;
            i.wait_stopped().await;
        }))
        .await;
    }

    pub async fn get(&self, name: &str) -> Option<Arc<TradingInstance>> {
        self.slots
            .read()
            .await
            .live
            .iter()
            .find(|i| i.name() == name)
            .cloned()
    }

    pub async fn names(&self) -> Vec<String> {
        self.slots
            .read()
            .await
            .live
            .iter()
            .map(|i| i.name().to_string())
            .collect()
    }

    pub async fn instances(&self) -> Vec<Arc<TradingInstance>> {
        self.slots.read().await.live.clone()
    }

    pub async fn len(&self) -> usize {
        self.slots.read().await.live.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.read().await.live.is_empty()
    }

    /// Apply a risk threshold to the targeted instances, returning the
    /// names that were updated.
    pub async fn broadcast(
        &self,
        parameter: RiskParameter,
        value: Decimal,
        target: &BroadcastTarget,
    ) -> Result<Vec<String>, TradingError> {
        if value < Decimal::ZERO {
            return Err(TradingError::ConfigurationError(format!(
                "{} must not be negative",
                parameter.as_str()
            )));
        }

        let slots = self.slots.read().await;
        let updated: Vec<String> = slots
            .live
            .iter()
            .filter(|i| target.includes(i.name()))
            .map(|i| {
                i.set_limit(parameter, value);
                i.name().to_string()
            })
            .collect();

        info!(
            parameter = parameter.as_str(),
            value = %value,
            instances = updated.len(),
            "Risk parameter broadcast"
        );

        Ok(updated)
    }
}
