// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Device supervision.
//!
//! The supervisor owns one engine per configured device and one forwarder
//! task per result stream. Forwarders tag each cycle result with the device
//! id and a UTC timestamp and push it into a shared line channel.
//!
//! ```text
//!   engine(press-1) ──► forwarder ──┐
//!   engine(plc-2)   ──► forwarder ──┼──► mpsc<ResultLine> ──► stdout
//!   engine(ua-3)    ──► forwarder ──┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use fieldpoll_core::{
    CycleResult, DeviceConfig, DeviceEngine, DeviceId, EngineRegistry, ResultStream, VariableValue,
};
use fieldpoll_modbus::ModbusFactory;
use fieldpoll_opcua::OpcUaFactory;
use fieldpoll_s7::S7Factory;

use crate::error::{BinError, BinResult};

/// How long shutdown waits for forwarders to drain.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Builds a registry with every built-in protocol factory.
pub fn default_registry() -> EngineRegistry {
    let mut registry = EngineRegistry::new();
    for factory in ModbusFactory::all() {
        registry.register(factory);
    }
    registry.register(Arc::new(S7Factory::new()));
    registry.register(Arc::new(OpcUaFactory::new()));
    registry
}

// =============================================================================
// ResultLine
// =============================================================================

/// One cycle result as written to the output stream.
#[derive(Debug, Clone, Serialize)]
pub struct ResultLine {
    /// RFC 3339 UTC timestamp at which the result was forwarded.
    pub timestamp: String,
    /// Device id.
    pub device: DeviceId,
    /// Cycle sequence number.
    pub cycle: u64,
    /// Cycle duration in milliseconds.
    pub duration_ms: u64,
    /// Decoded variables.
    pub values: Vec<VariableValue>,
    /// Frame and variable errors, rendered.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl ResultLine {
    /// Tags `result` with its device and time.
    pub fn new(device: &DeviceId, result: &CycleResult, at: DateTime<Utc>) -> Self {
        Self {
            timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, true),
            device: device.clone(),
            cycle: result.cycle,
            duration_ms: result.duration.as_millis() as u64,
            values: result.variables.clone(),
            errors: result.errors.iter().map(ToString::to_string).collect(),
        }
    }

    /// Renders the line as compact JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// Supervisor
// =============================================================================

/// Owns the running engines.
pub struct Supervisor {
    registry: EngineRegistry,
    engines: DashMap<DeviceId, Arc<dyn DeviceEngine>>,
    forwarders: Vec<JoinHandle<()>>,
}

impl Supervisor {
    /// Creates a supervisor over `registry`.
    pub fn new(registry: EngineRegistry) -> Self {
        Self {
            registry,
            engines: DashMap::new(),
            forwarders: Vec::new(),
        }
    }

    /// Builds and starts an engine for every device.
    ///
    /// Stops at the first device that cannot be built. Engines started
    /// before it keep running until [`Supervisor::shutdown`].
    pub fn spawn_all(
        &mut self,
        devices: &[DeviceConfig],
        sink: mpsc::Sender<ResultLine>,
    ) -> BinResult<usize> {
        for device in devices {
            self.spawn(device.clone(), sink.clone())?;
        }
        Ok(self.engines.len())
    }

    /// Builds and starts one engine.
    pub fn spawn(&mut self, device: DeviceConfig, sink: mpsc::Sender<ResultLine>) -> BinResult<()> {
        let id = device.id.clone();
        let (engine, results) = self
            .registry
            .new_engine(device)
            .map_err(|source| BinError::device(id.as_str(), source))?;
        let engine: Arc<dyn DeviceEngine> = Arc::from(engine);

        if engine.start() {
            info!(device = %id, model = %engine.model(), "Engine started");
        } else {
            warn!(device = %id, state = %engine.state(), "Engine did not start");
        }

        self.forwarders.push(tokio::spawn(forward(id.clone(), results, sink)));
        self.engines.insert(id, engine);
        Ok(())
    }

    /// Returns the engine for `id`.
    pub fn engine(&self, id: &str) -> Option<Arc<dyn DeviceEngine>> {
        self.engines.get(&DeviceId::from(id)).map(|e| Arc::clone(e.value()))
    }

    /// Number of supervised engines.
    pub fn len(&self) -> usize {
        self.engines.len()
    }

    /// Returns true if no engine is supervised.
    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// Destroys every engine and waits for the forwarders to drain.
    pub async fn shutdown(&mut self) {
        let engines: Vec<_> = self.engines.iter().map(|e| Arc::clone(e.value())).collect();
        for engine in engines {
            engine.destroy().await;
            debug!(device = %engine.id(), "Engine destroyed");
        }
        self.engines.clear();

        for handle in self.forwarders.drain(..) {
            if tokio::time::timeout(DRAIN_TIMEOUT, handle).await.is_err() {
                warn!("Result forwarder did not finish in time");
            }
        }
        info!("All engines stopped");
    }
}

async fn forward(device: DeviceId, mut results: ResultStream, sink: mpsc::Sender<ResultLine>) {
    while let Some(result) = results.recv().await {
        if !result.is_complete() {
            debug!(device = %device, cycle = result.cycle, errors = result.errors.len(), "Cycle had errors");
        }
        let line = ResultLine::new(&device, &result, Utc::now());
        if sink.send(line).await.is_err() {
            break;
        }
    }
    debug!(device = %device, "Result stream closed");
}
