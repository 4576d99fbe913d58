// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Engine factories for the three Modbus models.

use std::sync::Arc;

use fieldpoll_core::{
    boxed_engine, ConfigError, DeviceConfig, DeviceEngine, EngineFactory, ProtocolModel,
    ResultStream,
};

use crate::driver::ModbusDriver;

/// Builds Modbus engines for one model.
#[derive(Debug, Clone, Copy)]
pub struct ModbusFactory {
    model: ProtocolModel,
}

impl ModbusFactory {
    /// Modbus TCP.
    pub const fn tcp() -> Self {
        Self {
            model: ProtocolModel::ModbusTcp,
        }
    }

    /// Modbus RTU on a serial line.
    pub const fn rtu() -> Self {
        Self {
            model: ProtocolModel::ModbusRtu,
        }
    }

    /// RTU frames over a TCP gateway.
    pub const fn rtu_over_tcp() -> Self {
        Self {
            model: ProtocolModel::ModbusRtuOverTcp,
        }
    }

    /// One factory per Modbus model.
    pub fn all() -> Vec<Arc<dyn EngineFactory>> {
        vec![
            Arc::new(Self::tcp()),
            Arc::new(Self::rtu()),
            Arc::new(Self::rtu_over_tcp()),
        ]
    }
}

impl EngineFactory for ModbusFactory {
    fn model(&self) -> ProtocolModel {
        self.model
    }

    fn create(
        &self,
        mut device: DeviceConfig,
    ) -> Result<(Box<dyn DeviceEngine>, ResultStream), ConfigError> {
        if device.model != self.model {
            return Err(ConfigError::UnknownModel(device.model.to_string()));
        }
        // a serial line carries one conversation at a time
        if self.model == ProtocolModel::ModbusRtu && device.max_sessions != 1 {
            tracing::debug!(device = %device.id, requested = device.max_sessions, "Serial device limited to one session");
            device.max_sessions = 1;
        }
        let driver = ModbusDriver::new(&device)?;
        boxed_engine(device, driver)
    }
}
