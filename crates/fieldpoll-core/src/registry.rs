// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Typed engine registry.
//!
//! Protocol crates contribute one [`EngineFactory`] per [`ProtocolModel`].
//! The binary registers them at startup; device configurations are then
//! turned into running engines without any string dispatch.
//!
//! ```rust,ignore
//! let mut registry = EngineRegistry::new();
//! registry.register(Arc::new(ModbusFactory::tcp()));
//! let (engine, results) = registry.new_engine(device)?;
//! engine.start();
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::engine::{EngineState, PollEngine, ProtocolDriver, ResultStream, WriteRequest};
use crate::error::{ActionError, ConfigError};
use crate::stats::EngineStatsSnapshot;
use crate::types::{DeviceConfig, DeviceId, ProtocolModel, Value};

// =============================================================================
// DeviceEngine
// =============================================================================

/// Object-safe view of a [`PollEngine`], whatever its driver.
#[async_trait]
pub trait DeviceEngine: Send + Sync {
    /// Device identifier.
    fn id(&self) -> &DeviceId;

    /// Protocol model the engine speaks.
    fn model(&self) -> ProtocolModel;

    /// Current lifecycle state.
    fn state(&self) -> EngineState;

    /// Returns true if the device has frames to poll.
    fn can_collect(&self) -> bool;

    /// Starts polling. See [`PollEngine::start`].
    fn start(&self) -> bool;

    /// Stops polling and releases sessions. See [`PollEngine::destroy`].
    async fn destroy(&self);

    /// Applies named writes. See [`PollEngine::apply_action`].
    async fn apply_action(&self, request: WriteRequest) -> Result<usize, ActionError>;

    /// Counter snapshot.
    fn stats(&self) -> EngineStatsSnapshot;

    /// Last decoded value of a variable.
    fn last_value(&self, name: &str) -> Option<Value>;
}

#[async_trait]
impl<D: ProtocolDriver> DeviceEngine for PollEngine<D> {
    fn id(&self) -> &DeviceId {
        PollEngine::id(self)
    }

    fn model(&self) -> ProtocolModel {
        self.device().model
    }

    fn state(&self) -> EngineState {
        PollEngine::state(self)
    }

    fn can_collect(&self) -> bool {
        PollEngine::can_collect(self)
    }

    fn start(&self) -> bool {
        PollEngine::start(self)
    }

    async fn destroy(&self) {
        PollEngine::destroy(self).await
    }

    async fn apply_action(&self, request: WriteRequest) -> Result<usize, ActionError> {
        PollEngine::apply_action(self, request).await
    }

    fn stats(&self) -> EngineStatsSnapshot {
        PollEngine::stats(self)
    }

    fn last_value(&self, name: &str) -> Option<Value> {
        PollEngine::last_value(self, name)
    }
}

// =============================================================================
// EngineFactory
// =============================================================================

/// Builds engines for one protocol model.
pub trait EngineFactory: Send + Sync {
    /// The model this factory serves.
    fn model(&self) -> ProtocolModel;

    /// Builds an engine for `device`.
    fn create(
        &self,
        device: DeviceConfig,
    ) -> Result<(Box<dyn DeviceEngine>, ResultStream), ConfigError>;
}

/// Boxes a freshly built engine.
pub fn boxed_engine<D: ProtocolDriver>(
    device: DeviceConfig,
    driver: D,
) -> Result<(Box<dyn DeviceEngine>, ResultStream), ConfigError> {
    let (engine, results) = PollEngine::new(device, driver)?;
    Ok((Box::new(engine), results))
}

// =============================================================================
// EngineRegistry
// =============================================================================

/// Factories keyed by protocol model.
#[derive(Clone, Default)]
pub struct EngineRegistry {
    factories: HashMap<ProtocolModel, Arc<dyn EngineFactory>>,
}

impl EngineRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory, replacing any previous one for the same model.
    pub fn register(&mut self, factory: Arc<dyn EngineFactory>) {
        let model = factory.model();
        self.factories.insert(model, factory);
        tracing::debug!(%model, "Registered engine factory");
    }

    /// Builds an engine for `device`.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::UnknownModel`] if no factory serves the model
    /// - any configuration error raised while planning the device
    pub fn new_engine(
        &self,
        device: DeviceConfig,
    ) -> Result<(Box<dyn DeviceEngine>, ResultStream), ConfigError> {
        let factory = self
            .factories
            .get(&device.model)
            .ok_or_else(|| ConfigError::UnknownModel(device.model.to_string()))?;
        factory.create(device)
    }

    /// Returns the registered models.
    pub fn supported_models(&self) -> Vec<ProtocolModel> {
        let mut models: Vec<_> = self.factories.keys().copied().collect();
        models.sort_by_key(|m| m.as_str());
        models
    }

    /// Returns true if `model` has a factory.
    pub fn supports(&self, model: ProtocolModel) -> bool {
        self.factories.contains_key(&model)
    }

    /// Returns the number of registered factories.
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Returns true if no factory is registered.
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineRegistry")
            .field("models", &self.supported_models())
            .finish()
    }
}
