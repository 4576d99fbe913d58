// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Engine factory for S7 PLCs.

use fieldpoll_core::{
    boxed_engine, ConfigError, DeviceConfig, DeviceEngine, EngineFactory, ProtocolModel,
    ResultStream,
};

use crate::driver::S7Driver;

/// Builds S7 engines.
#[derive(Debug, Clone, Copy, Default)]
pub struct S7Factory;

impl S7Factory {
    /// Creates the factory.
    pub const fn new() -> Self {
        Self
    }
}

impl EngineFactory for S7Factory {
    fn model(&self) -> ProtocolModel {
        ProtocolModel::S7
    }

    fn create(&self, device: DeviceConfig) -> Result<(Box<dyn DeviceEngine>, ResultStream), ConfigError> {
        if device.model != ProtocolModel::S7 {
            return Err(ConfigError::UnknownModel(device.model.to_string()));
        }
        let driver = S7Driver::new(&device)?;
        boxed_engine(device, driver)
    }
}
