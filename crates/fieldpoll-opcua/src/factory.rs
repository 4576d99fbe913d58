// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Engine factory for OPC-UA servers.

use fieldpoll_core::{
    boxed_engine, ConfigError, DeviceConfig, DeviceEngine, EngineFactory, ProtocolModel,
    ResultStream,
};

use crate::driver::OpcUaDriver;

/// Builds OPC-UA engines.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpcUaFactory;

impl OpcUaFactory {
    /// Creates the factory.
    pub const fn new() -> Self {
        Self
    }
}

impl EngineFactory for OpcUaFactory {
    fn model(&self) -> ProtocolModel {
        ProtocolModel::OpcUa
    }

    fn create(&self, device: DeviceConfig) -> Result<(Box<dyn DeviceEngine>, ResultStream), ConfigError> {
        if device.model != ProtocolModel::OpcUa {
            return Err(ConfigError::UnknownModel(device.model.to_string()));
        }
        let driver = OpcUaDriver::new(&device)?;
        boxed_engine(device, driver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldpoll_core::{DataType, EngineState, TransportAddress, Variable};

    #[tokio::test]
    async fn test_creates_idle_engine() {
        let device = DeviceConfig::new("server", ProtocolModel::OpcUa, TransportAddress::url("opc.tcp://127.0.0.1:4840"))
            .with_variable(Variable::new("temp", DataType::Float64, "ns=2;s=Temp"));
        let (engine, _results) = OpcUaFactory::new().create(device).unwrap();
        assert_eq!(engine.model(), ProtocolModel::OpcUa);
        assert_eq!(engine.state(), EngineState::Idle);
        engine.destroy().await;
    }

    #[tokio::test]
    async fn test_string_node_needs_no_length() {
        let device = DeviceConfig::new("server", ProtocolModel::OpcUa, TransportAddress::url("opc.tcp://127.0.0.1:4840"))
            .with_variable(Variable::new("state", DataType::String, "ns=2;s=Line1.State"));
        let (engine, _results) = OpcUaFactory::new().create(device).unwrap();
        assert!(engine.can_collect());
        engine.destroy().await;
    }
}
