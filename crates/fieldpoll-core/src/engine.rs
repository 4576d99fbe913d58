// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The per-device poll engine.
//!
//! A [`PollEngine`] owns one device's frame plan and session pool. Once
//! started it runs a single long-lived loop:
//!
//! ```text
//!   Idle ──start()──▶ Running ──▶ Fetching ──▶ Aggregating ──▶ Running ...
//!                        │  one task per frame   exact-count join
//!                        │  (pool shared)        one CycleResult sent
//!                        ▼
//!                    Destroyed  (destroy(): loop stops, pool closed, stream ends)
//! ```
//!
//! Frame tasks report into a bounded channel sized to the frame count. The
//! aggregator stops reading after exactly that many messages, so a cycle is
//! complete when its result is built, never on a timer. The next cycle starts
//! after the remainder of the poll interval, or at once if the cycle overran.
//!
//! Protocol crates plug in through [`ProtocolDriver`]; the engine itself
//! knows nothing about wire formats.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{
    ActionError, ActionFailure, ConfigError, DecodeError, FetchError, ValidationError,
};
use crate::pool::{Pool, PoolStatus, Pooled};
use crate::retry::RetryAction;
use crate::session::Connector;
use crate::stats::{EngineStats, EngineStatsSnapshot};
use crate::types::{DeviceConfig, DeviceId, Value, Variable, VariableValue};

// =============================================================================
// ProtocolDriver
// =============================================================================

/// The session type a driver works on.
pub type SessionOf<D> = <<D as ProtocolDriver>::Connector as Connector>::Session;

/// What one successful frame exchange produced.
#[derive(Debug, Default)]
pub struct FrameReading {
    /// Variables that decoded.
    pub values: Vec<VariableValue>,
    /// Variables that did not.
    pub errors: Vec<DecodeError>,
}

/// Protocol binding used by [`PollEngine`].
///
/// A driver is built for one device. It plans that device's frames once,
/// then exchanges them over sessions the engine checks out of its pool.
#[async_trait]
pub trait ProtocolDriver: Send + Sync + 'static {
    /// Opens sessions for the pool.
    type Connector: Connector;
    /// A planned read request and its decode map.
    type Frame: Send + 'static;
    /// An encoded write.
    type Write: Send + Sync + 'static;

    /// Builds the connector for `device`.
    fn connector(&self, device: &DeviceConfig) -> Self::Connector;

    /// Plans read frames for every variable of `device`.
    fn plan(&self, device: &DeviceConfig) -> Result<Vec<Self::Frame>, ConfigError>;

    /// Sends one frame and decodes the response.
    async fn fetch(
        &self,
        session: &mut SessionOf<Self>,
        frame: &mut Self::Frame,
    ) -> Result<FrameReading, FetchError>;

    /// Encodes a checked value for `variable`.
    fn encode_write(&self, variable: &Variable, value: &Value) -> Result<Self::Write, ValidationError>;

    /// Executes one encoded write.
    async fn execute_write(
        &self,
        session: &mut SessionOf<Self>,
        write: &Self::Write,
    ) -> Result<(), FetchError>;
}

// =============================================================================
// Engine state
// =============================================================================

/// Lifecycle state of a [`PollEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// Constructed, loop not started.
    Idle,
    /// Loop started, between cycles.
    Running,
    /// Frame tasks in flight.
    Fetching,
    /// Building the cycle result.
    Aggregating,
    /// Stopped for good.
    Destroyed,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Fetching => "fetching",
            Self::Aggregating => "aggregating",
            Self::Destroyed => "destroyed",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Cycle results
// =============================================================================

/// An error attributed to one frame in one cycle.
#[derive(Debug)]
pub struct FrameFailure {
    /// Index of the frame in the plan.
    pub frame: usize,
    /// Attempts made before giving up.
    pub attempts: u32,
    /// The last error.
    pub error: FetchError,
}

impl fmt::Display for FrameFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frame {} failed after {} attempt(s): {}",
            self.frame, self.attempts, self.error
        )
    }
}

/// One aggregated message per completed cycle.
#[derive(Debug)]
pub struct CycleResult {
    /// Cycle sequence number, starting at 1.
    pub cycle: u64,
    /// Successfully decoded variables.
    pub variables: Vec<VariableValue>,
    /// Frame and variable level errors.
    pub errors: Vec<FrameFailure>,
    /// Wall-clock time spent fetching and aggregating.
    pub duration: Duration,
}

impl CycleResult {
    /// Returns true when every frame succeeded and every variable decoded.
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }

    /// Looks up a decoded variable.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.variables
            .iter()
            .find(|v| v.name == name)
            .map(|v| &v.value)
    }
}

/// Receiving end of an engine's one-slot result channel.
#[derive(Debug)]
pub struct ResultStream {
    rx: mpsc::Receiver<CycleResult>,
}

impl ResultStream {
    /// Waits for the next cycle result. Returns `None` once the engine is
    /// destroyed and the stream is drained.
    pub async fn recv(&mut self) -> Option<CycleResult> {
        self.rx.recv().await
    }

    /// Returns a result if one is ready.
    pub fn try_recv(&mut self) -> Option<CycleResult> {
        self.rx.try_recv().ok()
    }
}

// =============================================================================
// Write requests
// =============================================================================

/// A set of named writes applied together.
///
/// Entries keep their order; a name appearing twice is rejected.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteRequest {
    entries: Vec<(String, serde_json::Value)>,
}

impl WriteRequest {
    /// Creates an empty request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry.
    pub fn set(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.entries.push((name.into(), value.into()));
        self
    }

    /// Returns the entries.
    pub fn entries(&self) -> &[(String, serde_json::Value)] {
        &self.entries
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<Vec<(String, serde_json::Value)>> for WriteRequest {
    fn from(entries: Vec<(String, serde_json::Value)>) -> Self {
        Self { entries }
    }
}

impl From<serde_json::Map<String, serde_json::Value>> for WriteRequest {
    fn from(map: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            entries: map.into_iter().collect(),
        }
    }
}

// =============================================================================
// PollEngine
// =============================================================================

struct EngineInner<D: ProtocolDriver> {
    device: DeviceConfig,
    driver: D,
    pool: Pool<D::Connector>,
    frames: Vec<tokio::sync::Mutex<D::Frame>>,
    state: Mutex<EngineState>,
    shutdown: watch::Sender<bool>,
    results: Mutex<Option<mpsc::Sender<CycleResult>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    stats: EngineStats,
    last_values: DashMap<String, Value>,
}

/// Polls one device on a fixed cycle.
pub struct PollEngine<D: ProtocolDriver> {
    inner: Arc<EngineInner<D>>,
}

type FrameOutcome = Result<(FrameReading, u32), FrameFailure>;

impl<D: ProtocolDriver> PollEngine<D> {
    /// Validates `device`, plans its frames and builds the engine.
    ///
    /// Fails if the configuration is invalid or no frame could be planned.
    /// The returned stream carries one [`CycleResult`] per cycle once the
    /// engine is started.
    pub fn new(device: DeviceConfig, driver: D) -> Result<(Self, ResultStream), ConfigError> {
        device.validate()?;

        let frames = driver.plan(&device)?;
        if frames.is_empty() {
            return Err(ConfigError::NotPollable {
                device: device.id.to_string(),
                reason: "no request frames could be planned".to_string(),
            });
        }

        let pool = Pool::new(driver.connector(&device), device.max_sessions);
        let last_values = DashMap::new();
        for variable in &device.variables {
            if let Some(value) = variable.default_typed() {
                last_values.insert(variable.name.clone(), value);
            }
        }

        tracing::debug!(
            device = %device.id,
            model = %device.model,
            frames = frames.len(),
            variables = device.variables.len(),
            "Planned device frames"
        );

        let (tx, rx) = mpsc::channel(1);
        let (shutdown, _) = watch::channel(false);
        let inner = EngineInner {
            frames: frames.into_iter().map(tokio::sync::Mutex::new).collect(),
            device,
            driver,
            pool,
            state: Mutex::new(EngineState::Idle),
            shutdown,
            results: Mutex::new(Some(tx)),
            task: Mutex::new(None),
            stats: EngineStats::new(),
            last_values,
        };

        Ok((
            Self {
                inner: Arc::new(inner),
            },
            ResultStream { rx },
        ))
    }

    /// Returns the device identifier.
    pub fn id(&self) -> &DeviceId {
        &self.inner.device.id
    }

    /// Returns the device configuration.
    pub fn device(&self) -> &DeviceConfig {
        &self.inner.device
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> EngineState {
        *self.inner.state.lock()
    }

    /// Returns true if the device has at least one frame to poll.
    pub fn can_collect(&self) -> bool {
        !self.inner.frames.is_empty()
    }

    /// Returns the number of planned frames.
    pub fn frame_count(&self) -> usize {
        self.inner.frames.len()
    }

    /// Returns a counter snapshot.
    pub fn stats(&self) -> EngineStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Returns the session pool counters.
    pub fn pool_status(&self) -> PoolStatus {
        self.inner.pool.status()
    }

    /// Returns the last decoded value of a variable, or its default.
    pub fn last_value(&self, name: &str) -> Option<Value> {
        self.inner.last_values.get(name).map(|v| v.value().clone())
    }

    /// Starts the poll loop.
    ///
    /// Returns false, doing nothing, if the loop already ran or the engine
    /// cannot collect. Must be called within a tokio runtime.
    pub fn start(&self) -> bool {
        let mut state = self.inner.state.lock();
        if *state != EngineState::Idle || !self.can_collect() {
            return false;
        }
        let Some(tx) = self.inner.results.lock().take() else {
            return false;
        };
        *state = EngineState::Running;

        let shutdown = self.inner.shutdown.subscribe();
        let handle = tokio::spawn(run_loop(Arc::clone(&self.inner), tx, shutdown));
        *self.inner.task.lock() = Some(handle);

        tracing::info!(
            device = %self.inner.device.id,
            interval = ?self.inner.device.poll_interval,
            frames = self.inner.frames.len(),
            "Poll engine started"
        );
        true
    }

    /// Stops the loop, closes the pool and ends the result stream.
    ///
    /// Later calls return immediately. Frame exchanges already on the wire
    /// are left to finish on their own; their results are dropped.
    pub async fn destroy(&self) {
        {
            let mut state = self.inner.state.lock();
            if *state == EngineState::Destroyed {
                return;
            }
            *state = EngineState::Destroyed;
        }

        self.inner.shutdown.send_replace(true);
        self.inner.pool.destroy();
        self.inner.results.lock().take();

        let task = self.inner.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(device = %self.inner.device.id, error = %e, "Poll loop ended abnormally");
            }
        }

        tracing::info!(device = %self.inner.device.id, "Poll engine destroyed");
    }

    /// Applies a set of named writes.
    ///
    /// Unknown names, repeated names and values that do not convert to the
    /// variable's type are rejected before any traffic. The remaining
    /// entries are written in order on one pooled session. Returns the
    /// number of writes that succeeded when nothing failed.
    pub async fn apply_action(&self, request: WriteRequest) -> Result<usize, ActionError> {
        self.inner.apply_action(request).await
    }
}

impl<D: ProtocolDriver> Drop for PollEngine<D> {
    fn drop(&mut self) {
        // the loop holds its own reference, so stop it explicitly
        self.inner.shutdown.send_replace(true);
        self.inner.pool.destroy();
    }
}

impl<D: ProtocolDriver> fmt::Debug for PollEngine<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollEngine")
            .field("device", &self.inner.device.id)
            .field("state", &self.state())
            .field("frames", &self.inner.frames.len())
            .finish()
    }
}

// =============================================================================
// Poll loop
// =============================================================================

async fn run_loop<D: ProtocolDriver>(
    inner: Arc<EngineInner<D>>,
    tx: mpsc::Sender<CycleResult>,
    mut shutdown: watch::Receiver<bool>,
) {
    let interval = inner.device.poll_interval;
    let mut cycle = 0u64;

    loop {
        if *shutdown.borrow() {
            break;
        }
        cycle += 1;
        let started = Instant::now();

        let result = tokio::select! {
            result = inner.run_cycle(cycle) => result,
            _ = shutdown.changed() => break,
        };

        tokio::select! {
            sent = tx.send(result) => {
                if sent.is_err() {
                    tracing::debug!(device = %inner.device.id, "Result stream dropped, stopping poll loop");
                    break;
                }
            }
            _ = shutdown.changed() => break,
        }
        inner.transition(EngineState::Running);

        let pause = interval.saturating_sub(started.elapsed());
        if !pause.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = shutdown.changed() => break,
            }
        }
    }

    tracing::debug!(device = %inner.device.id, cycles = cycle, "Poll loop stopped");
}

impl<D: ProtocolDriver> EngineInner<D> {
    /// Moves to `next` unless the engine was destroyed.
    fn transition(&self, next: EngineState) {
        let mut state = self.state.lock();
        if *state != EngineState::Destroyed {
            *state = next;
        }
    }

    fn is_destroyed(&self) -> bool {
        *self.state.lock() == EngineState::Destroyed
    }

    async fn run_cycle(self: &Arc<Self>, cycle: u64) -> CycleResult {
        let started = Instant::now();
        let count = self.frames.len();
        self.transition(EngineState::Fetching);

        let (tx, mut rx) = mpsc::channel::<(usize, FrameOutcome)>(count.max(1));
        for index in 0..count {
            let inner = Arc::clone(self);
            let tx = tx.clone();
            tokio::spawn(async move {
                let outcome = inner.fetch_frame(index).await;
                // receiver gone means the cycle was abandoned
                let _ = tx.send((index, outcome)).await;
            });
        }
        drop(tx);

        let mut reported = vec![false; count];
        let mut received = 0;
        let mut variables = Vec::new();
        let mut errors = Vec::new();
        let mut frames_ok = 0;

        while received < count {
            let Some((index, outcome)) = rx.recv().await else {
                break;
            };
            received += 1;
            reported[index] = true;
            match outcome {
                Ok((reading, attempts)) => {
                    frames_ok += 1;
                    variables.extend(reading.values);
                    errors.extend(reading.errors.into_iter().map(|e| FrameFailure {
                        frame: index,
                        attempts,
                        error: FetchError::Decode(e),
                    }));
                }
                Err(failure) => errors.push(failure),
            }
        }

        self.transition(EngineState::Aggregating);
        for (index, _) in reported.iter().enumerate().filter(|(_, seen)| !**seen) {
            errors.push(FrameFailure {
                frame: index,
                attempts: 0,
                error: FetchError::Aborted("frame task ended without a result".to_string()),
            });
        }

        for value in &variables {
            self.last_values
                .insert(value.name.clone(), value.value.clone());
        }
        if let Some(last) = errors.last() {
            self.stats.record_error(&last.to_string());
        }

        let duration = started.elapsed();
        self.stats
            .record_cycle(duration, frames_ok, count.saturating_sub(frames_ok));
        tracing::debug!(
            device = %self.device.id,
            cycle,
            variables = variables.len(),
            errors = errors.len(),
            duration = ?duration,
            "Cycle complete"
        );

        CycleResult {
            cycle,
            variables,
            errors,
            duration,
        }
    }

    /// Runs one frame with the retry policy.
    ///
    /// Transport failures discard the session and the next attempt opens a
    /// fresh one. Other retryable failures keep the session.
    async fn fetch_frame(&self, index: usize) -> FrameOutcome {
        let mut frame = self.frames[index].lock().await;
        let retry = &self.device.retry;
        let wait = self.device.acquire_timeout();
        let mut held: Option<Pooled<SessionOf<D>>> = None;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let session = match held.take() {
                Some(session) => Ok(session),
                None => self.pool.acquire(wait).await.map_err(FetchError::from),
            };

            let error = match session {
                Ok(mut session) => match self.driver.fetch(&mut session, &mut frame).await {
                    Ok(reading) => {
                        self.pool.release(session);
                        return Ok((reading, attempt));
                    }
                    Err(e) => {
                        if e.retry_action() == RetryAction::Reconnect {
                            self.pool.discard(session);
                            self.stats.record_reconnect();
                        } else {
                            held = Some(session);
                        }
                        e
                    }
                },
                Err(e) => e,
            };

            let action = error.retry_action();
            if action == RetryAction::Stop || !retry.allows_another(attempt) || self.is_destroyed() {
                if let Some(session) = held.take() {
                    self.pool.release(session);
                }
                tracing::warn!(
                    device = %self.device.id,
                    frame = index,
                    attempt,
                    category = error.category(),
                    error = %error,
                    "Frame failed"
                );
                return Err(FrameFailure {
                    frame: index,
                    attempts: attempt,
                    error,
                });
            }

            let delay = retry.delay_for(attempt);
            tracing::debug!(
                device = %self.device.id,
                frame = index,
                attempt,
                action = ?action,
                delay = ?delay,
                error = %error,
                "Retrying frame"
            );
            self.stats.record_retry();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }

    async fn apply_action(&self, request: WriteRequest) -> Result<usize, ActionError> {
        let mut failures = Vec::new();

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for (name, _) in request.entries() {
            *counts.entry(name.as_str()).or_default() += 1;
        }

        let mut reported = HashSet::new();
        let mut accepted = Vec::new();
        for (name, raw) in request.entries() {
            if counts.get(name.as_str()).copied().unwrap_or(0) > 1 {
                if reported.insert(name.as_str()) {
                    failures.push(ValidationError::DuplicateVariable { name: name.clone() }.into());
                }
                continue;
            }
            match self.prepare_write(name, raw) {
                Ok(write) => accepted.push((name.as_str(), write)),
                Err(e) => failures.push(e.into()),
            }
        }

        if accepted.is_empty() {
            failures.push(ValidationError::NoValidEntries.into());
            return Err(ActionError::new(failures));
        }

        let wait = self.device.acquire_timeout();
        let mut session: Option<Pooled<SessionOf<D>>> = None;
        let mut written = 0;

        for (name, write) in &accepted {
            let current = match session.take() {
                Some(s) => Ok(s),
                None => self.pool.acquire(wait).await.map_err(FetchError::from),
            };
            let result = match current {
                Ok(mut s) => {
                    let result = self.driver.execute_write(&mut s, write).await;
                    match &result {
                        Err(e) if e.is_transport() => {
                            self.pool.discard(s);
                            self.stats.record_reconnect();
                        }
                        _ => session = Some(s),
                    }
                    result
                }
                Err(e) => Err(e),
            };

            self.stats.record_write(result.is_ok());
            match result {
                Ok(()) => {
                    written += 1;
                    tracing::debug!(device = %self.device.id, variable = name, "Write applied");
                }
                Err(source) => {
                    tracing::warn!(
                        device = %self.device.id,
                        variable = name,
                        error = %source,
                        "Write failed"
                    );
                    self.stats.record_error(&source.to_string());
                    failures.push(ActionFailure::Write {
                        variable: name.to_string(),
                        source,
                    });
                }
            }
        }

        if let Some(s) = session {
            self.pool.release(s);
        }

        if failures.is_empty() {
            Ok(written)
        } else {
            Err(ActionError::new(failures))
        }
    }

    fn prepare_write(&self, name: &str, raw: &serde_json::Value) -> Result<D::Write, ValidationError> {
        let variable = self
            .device
            .variable(name)
            .ok_or_else(|| ValidationError::UnknownVariable {
                name: name.to_string(),
            })?;
        let value_type = variable.value_type();
        let value = Value::from_json(value_type, raw)
            .map_err(|reason| ValidationError::invalid_value(name, value_type, raw, reason))?;
        self.driver.encode_write(variable, &value)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ProtocolError, TransportError};
    use crate::retry::RetryConfig;
    use crate::types::{DataType, ProtocolModel, TransportAddress};
    use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

    /// How a mock frame behaves on each call.
    #[derive(Clone, Copy)]
    enum Script {
        Ok,
        TransportFailures(u32),
        ProtocolFailures(u32),
        Rejected,
        AlwaysTransport,
        Slow(Duration),
    }

    struct MockFrame {
        variable: String,
        script: Script,
        calls: u32,
    }

    struct MockConnector {
        opened: Arc<AtomicU64>,
    }

    #[async_trait]
    impl Connector for MockConnector {
        type Session = u64;

        async fn connect(&self) -> Result<u64, TransportError> {
            Ok(self.opened.fetch_add(1, Ordering::SeqCst))
        }

        fn target(&self) -> String {
            "mock".into()
        }
    }

    #[derive(Default, Clone)]
    struct Journal {
        opened: Arc<AtomicU64>,
        sessions: Arc<Mutex<Vec<(String, u64)>>>,
        starts: Arc<Mutex<Vec<Instant>>>,
        writes: Arc<Mutex<Vec<(String, Value)>>>,
        write_failures: Arc<AtomicU32>,
    }

    struct MockDriver {
        scripts: Vec<Script>,
        journal: Journal,
    }

    impl MockDriver {
        fn new(scripts: Vec<Script>) -> (Self, Journal) {
            let journal = Journal::default();
            (
                Self {
                    scripts,
                    journal: journal.clone(),
                },
                journal,
            )
        }
    }

    #[async_trait]
    impl ProtocolDriver for MockDriver {
        type Connector = MockConnector;
        type Frame = MockFrame;
        type Write = (String, Value);

        fn connector(&self, _device: &DeviceConfig) -> MockConnector {
            MockConnector {
                opened: self.journal.opened.clone(),
            }
        }

        fn plan(&self, device: &DeviceConfig) -> Result<Vec<MockFrame>, ConfigError> {
            Ok(device
                .variables
                .iter()
                .zip(self.scripts.iter())
                .map(|(v, script)| MockFrame {
                    variable: v.name.clone(),
                    script: *script,
                    calls: 0,
                })
                .collect())
        }

        async fn fetch(&self, session: &mut u64, frame: &mut MockFrame) -> Result<FrameReading, FetchError> {
            frame.calls += 1;
            self.journal
                .sessions
                .lock()
                .push((frame.variable.clone(), *session));
            if frame.variable == "a" {
                self.journal.starts.lock().push(Instant::now());
            }

            let fail = match frame.script {
                Script::Ok => None,
                Script::TransportFailures(n) if frame.calls <= n => {
                    Some(FetchError::from(TransportError::Closed))
                }
                Script::ProtocolFailures(n) if frame.calls <= n => Some(FetchError::from(
                    ProtocolError::TransactionMismatch {
                        expected: 1,
                        actual: 2,
                    },
                )),
                Script::Rejected => Some(FetchError::from(ProtocolError::Exception {
                    code: 2,
                    description: "Illegal data address",
                })),
                Script::AlwaysTransport => Some(FetchError::from(TransportError::ReadTimeout {
                    timeout: Duration::from_millis(10),
                })),
                Script::Slow(d) => {
                    tokio::time::sleep(d).await;
                    None
                }
                _ => None,
            };
            if let Some(e) = fail {
                return Err(e);
            }

            Ok(FrameReading {
                values: vec![VariableValue::new(&frame.variable, Value::Int16(frame.calls as i16))],
                errors: Vec::new(),
            })
        }

        fn encode_write(&self, variable: &Variable, value: &Value) -> Result<(String, Value), ValidationError> {
            if variable.name == "ro" {
                return Err(ValidationError::ReadOnly {
                    name: variable.name.clone(),
                });
            }
            Ok((variable.name.clone(), value.clone()))
        }

        async fn execute_write(&self, _session: &mut u64, write: &(String, Value)) -> Result<(), FetchError> {
            if write.0 == "broken" {
                self.journal.write_failures.fetch_add(1, Ordering::SeqCst);
                return Err(TransportError::Closed.into());
            }
            self.journal.writes.lock().push(write.clone());
            Ok(())
        }
    }

    fn device(names: &[&str]) -> DeviceConfig {
        let mut device = DeviceConfig::new("dev-1", ProtocolModel::ModbusTcp, TransportAddress::tcp("127.0.0.1", 502))
            .with_poll_interval(Duration::from_secs(1));
        device.retry = RetryConfig::default().with_initial_delay(Duration::from_millis(1));
        for name in names {
            device = device.with_variable(Variable::new(*name, DataType::Int16, "0"));
        }
        device
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_failure_isolation() {
        let (driver, journal) = MockDriver::new(vec![Script::Ok, Script::AlwaysTransport]);
        let (engine, mut results) = PollEngine::new(device(&["a", "b"]), driver).unwrap();
        assert!(engine.start());

        let result = results.recv().await.unwrap();
        assert_eq!(result.cycle, 1);
        assert_eq!(result.value("a"), Some(&Value::Int16(1)));
        assert!(result.value("b").is_none());
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].frame, 1);
        assert_eq!(result.errors[0].attempts, 3);
        assert!(result.errors[0].error.is_transport());

        // every transport failure threw its session away
        let b_sessions: Vec<u64> = journal
            .sessions
            .lock()
            .iter()
            .filter(|(v, _)| v == "b")
            .map(|(_, s)| *s)
            .collect();
        assert_eq!(b_sessions.len(), 3);
        let unique: HashSet<u64> = b_sessions.iter().copied().collect();
        assert_eq!(unique.len(), 3);

        let stats = engine.stats();
        assert_eq!(stats.frames_ok, 1);
        assert_eq!(stats.frames_failed, 1);
        assert_eq!(stats.retries, 2);
        assert_eq!(stats.reconnects, 3);
        engine.destroy().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_retry_recovers() {
        let (driver, _journal) = MockDriver::new(vec![Script::TransportFailures(2)]);
        let (engine, mut results) = PollEngine::new(device(&["a"]), driver).unwrap();
        engine.start();

        let result = results.recv().await.unwrap();
        assert!(result.is_complete());
        assert_eq!(result.value("a"), Some(&Value::Int16(3)));
        engine.destroy().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_protocol_error_reuses_session() {
        let (driver, journal) = MockDriver::new(vec![Script::ProtocolFailures(1)]);
        let (engine, mut results) = PollEngine::new(device(&["a"]), driver).unwrap();
        engine.start();

        let result = results.recv().await.unwrap();
        assert!(result.is_complete());
        let sessions: Vec<u64> = journal.sessions.lock().iter().map(|(_, s)| *s).collect();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0], sessions[1]);
        assert_eq!(engine.stats().reconnects, 0);
        engine.destroy().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_rejection_is_not_retried() {
        let (driver, journal) = MockDriver::new(vec![Script::Rejected]);
        let (engine, mut results) = PollEngine::new(device(&["a"]), driver).unwrap();
        engine.start();

        let result = results.recv().await.unwrap();
        assert!(result.variables.is_empty());
        assert_eq!(result.errors[0].attempts, 1);
        assert_eq!(journal.sessions.lock().len(), 1);
        engine.destroy().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_pacing_sleeps_remainder() {
        let (driver, journal) = MockDriver::new(vec![Script::Slow(Duration::from_millis(200))]);
        let (engine, mut results) = PollEngine::new(device(&["a"]), driver).unwrap();
        engine.start();

        for _ in 0..3 {
            results.recv().await.unwrap();
        }
        let starts = journal.starts.lock().clone();
        assert!(starts.len() >= 3);
        for pair in starts.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= Duration::from_secs(1), "gap {:?}", gap);
            assert!(gap < Duration::from_millis(1100), "gap {:?}", gap);
        }
        engine.destroy().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_overrun_starts_immediately() {
        let (driver, journal) = MockDriver::new(vec![Script::Slow(Duration::from_millis(1500))]);
        let (engine, mut results) = PollEngine::new(device(&["a"]), driver).unwrap();
        engine.start();

        for _ in 0..3 {
            results.recv().await.unwrap();
        }
        let starts = journal.starts.lock().clone();
        for pair in starts.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= Duration::from_millis(1500));
            assert!(gap < Duration::from_millis(1600), "gap {:?}", gap);
        }
        engine.destroy().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_is_idempotent_and_ends_stream() {
        let (driver, _journal) = MockDriver::new(vec![Script::Ok]);
        let (engine, mut results) = PollEngine::new(device(&["a"]), driver).unwrap();
        assert_eq!(engine.state(), EngineState::Idle);
        assert!(engine.start());
        assert!(!engine.start());
        results.recv().await.unwrap();

        engine.destroy().await;
        engine.destroy().await;
        assert_eq!(engine.state(), EngineState::Destroyed);
        assert!(engine.pool_status().closed);
        while results.recv().await.is_some() {}
        assert!(!engine.start());
    }

    #[tokio::test]
    async fn test_destroy_before_start_closes_stream() {
        let (driver, _journal) = MockDriver::new(vec![Script::Ok]);
        let (engine, mut results) = PollEngine::new(device(&["a"]), driver).unwrap();
        engine.destroy().await;
        assert!(results.recv().await.is_none());
    }

    #[test]
    fn test_unplannable_device_is_rejected() {
        let (driver, _journal) = MockDriver::new(Vec::new());
        let err = PollEngine::new(device(&["a"]), driver).unwrap_err();
        assert!(matches!(err, ConfigError::NotPollable { .. }));
    }

    #[test]
    fn test_empty_device_is_rejected() {
        let (driver, _journal) = MockDriver::new(Vec::new());
        let err = PollEngine::new(device(&[]), driver).unwrap_err();
        assert!(matches!(err, ConfigError::NoVariables { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_value_seeded_then_updated() {
        let (driver, _journal) = MockDriver::new(vec![Script::Ok]);
        let mut config = device(&[]);
        config = config.with_variable(
            Variable::new("a", DataType::Int16, "0").with_default(serde_json::json!(7)),
        );
        let (engine, mut results) = PollEngine::new(config, driver).unwrap();
        assert_eq!(engine.last_value("a"), Some(Value::Int16(7)));

        engine.start();
        results.recv().await.unwrap();
        assert_eq!(engine.last_value("a"), Some(Value::Int16(1)));
        engine.destroy().await;
    }

    #[tokio::test]
    async fn test_write_unknown_variable_issues_no_traffic() {
        let (driver, journal) = MockDriver::new(vec![Script::Ok]);
        let (engine, _results) = PollEngine::new(device(&["a"]), driver).unwrap();

        let err = engine
            .apply_action(WriteRequest::new().set("coil1", true))
            .await
            .unwrap_err();
        assert!(err.is_validation_only());
        assert!(err
            .failures()
            .iter()
            .any(|f| matches!(f, ActionFailure::Validation(ValidationError::UnknownVariable { .. }))));
        assert!(err
            .failures()
            .iter()
            .any(|f| matches!(f, ActionFailure::Validation(ValidationError::NoValidEntries))));
        assert!(journal.writes.lock().is_empty());
        assert_eq!(journal.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_write_valid_entries_still_applied() {
        let (driver, journal) = MockDriver::new(vec![Script::Ok, Script::Ok]);
        let (engine, _results) = PollEngine::new(device(&["a", "b"]), driver).unwrap();

        let request = WriteRequest::new()
            .set("a", 12)
            .set("b", "not a number")
            .set("missing", 1);
        let err = engine.apply_action(request).await.unwrap_err();
        assert_eq!(err.len(), 2);
        assert_eq!(
            journal.writes.lock().clone(),
            vec![("a".to_string(), Value::Int16(12))]
        );
        assert_eq!(engine.stats().writes_ok, 1);
    }

    #[tokio::test]
    async fn test_write_duplicate_names_rejected() {
        let (driver, journal) = MockDriver::new(vec![Script::Ok, Script::Ok]);
        let (engine, _results) = PollEngine::new(device(&["a", "b"]), driver).unwrap();

        let request = WriteRequest::new().set("a", 1).set("a", 2).set("b", 3);
        let err = engine.apply_action(request).await.unwrap_err();
        assert_eq!(err.len(), 1);
        assert!(matches!(
            &err.failures()[0],
            ActionFailure::Validation(ValidationError::DuplicateVariable { name }) if name == "a"
        ));
        assert_eq!(
            journal.writes.lock().clone(),
            vec![("b".to_string(), Value::Int16(3))]
        );
    }

    #[tokio::test]
    async fn test_write_success_and_transport_failure() {
        let (driver, journal) = MockDriver::new(vec![Script::Ok, Script::Ok, Script::Ok]);
        let (engine, _results) = PollEngine::new(device(&["broken", "a", "b"]), driver).unwrap();

        assert_eq!(
            engine
                .apply_action(WriteRequest::new().set("a", 1).set("b", 2))
                .await
                .unwrap(),
            2
        );

        let err = engine
            .apply_action(WriteRequest::new().set("broken", 1).set("a", 5))
            .await
            .unwrap_err();
        assert_eq!(err.len(), 1);
        assert!(!err.is_validation_only());
        assert_eq!(journal.write_failures.load(Ordering::SeqCst), 1);
        // the write after the broken one ran on a fresh session
        assert_eq!(journal.opened.load(Ordering::SeqCst), 2);
        assert_eq!(journal.writes.lock().len(), 3);
    }
}
