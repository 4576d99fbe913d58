// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Mock Field Devices
//!
//! Small TCP servers that speak just enough of each protocol to exercise
//! the real drivers end to end.
//!
//! | Mock | Protocol | Supported requests |
//! |------|----------|--------------------|
//! | [`MockModbusServer`] | Modbus TCP (MBAP) | FC 1, 2, 3, 4, 5, 6, 16 |
//! | [`MockS7Server`] | ISO-on-TCP / S7 | COTP connect, setup, read var, write var |
//!
//! Both record interactions for verification and support error injection.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use fieldpoll_s7::Area;

// =============================================================================
// Interaction Counters
// =============================================================================

/// Interaction counters shared by a mock and its connections.
#[derive(Debug, Default)]
pub struct MockStats {
    connections: AtomicU64,
    requests: AtomicU64,
    writes: AtomicU64,
}

impl MockStats {
    /// Accepted connections.
    pub fn connections(&self) -> u64 {
        self.connections.load(Ordering::SeqCst)
    }

    /// Requests received, handshakes excluded.
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }

    /// Write requests received.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }
}

/// Behaviour switches shared by a mock and its connections.
#[derive(Debug, Default)]
struct Faults {
    /// Answer requests with nothing at all.
    silent: AtomicBool,
    /// Close the connection instead of answering the next request.
    drop_next: AtomicBool,
    /// Protocol-level error for the next request.
    next_error: Mutex<Option<u8>>,
}

async fn accept_loop<F, Fut>(listener: TcpListener, stats: Arc<MockStats>, serve: F)
where
    F: Fn(TcpStream) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    loop {
        let Ok((stream, peer)) = listener.accept().await else {
            return;
        };
        stats.connections.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(%peer, "Mock accepted connection");
        tokio::spawn(serve(stream));
    }
}

// =============================================================================
// Mock Modbus TCP Server
// =============================================================================

/// Modbus data model of the mock.
#[derive(Debug, Clone)]
pub struct ModbusMemory {
    /// Coils (FC 1, 5).
    pub coils: Vec<bool>,
    /// Discrete inputs (FC 2).
    pub discrete_inputs: Vec<bool>,
    /// Holding registers (FC 3, 6, 16).
    pub holding_registers: Vec<u16>,
    /// Input registers (FC 4).
    pub input_registers: Vec<u16>,
}

impl ModbusMemory {
    /// Creates zeroed tables of `size` entries each.
    pub fn new(size: usize) -> Self {
        Self {
            coils: vec![false; size],
            discrete_inputs: vec![false; size],
            holding_registers: vec![0; size],
            input_registers: vec![0; size],
        }
    }
}

/// A Modbus TCP slave answering for any unit id.
pub struct MockModbusServer {
    addr: SocketAddr,
    memory: Arc<Mutex<ModbusMemory>>,
    stats: Arc<MockStats>,
    faults: Arc<Faults>,
    task: JoinHandle<()>,
}

impl MockModbusServer {
    /// Starts a server with 1024 entries per table on an ephemeral port.
    pub async fn start() -> Self {
        Self::with_memory(ModbusMemory::new(1024)).await
    }

    /// Starts a server over `memory`.
    pub async fn with_memory(memory: ModbusMemory) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock modbus server");
        let addr = listener.local_addr().expect("mock modbus address");
        let memory = Arc::new(Mutex::new(memory));
        let stats = Arc::new(MockStats::default());
        let faults = Arc::new(Faults::default());

        let task = {
            let (memory, stats, faults) = (memory.clone(), stats.clone(), faults.clone());
            tokio::spawn(accept_loop(listener, stats.clone(), move |stream| {
                serve_modbus(stream, memory.clone(), stats.clone(), faults.clone())
            }))
        };

        Self {
            addr,
            memory,
            stats,
            faults,
            task,
        }
    }

    /// Listening address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Listening port.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Interaction counters.
    pub fn stats(&self) -> &MockStats {
        &self.stats
    }

    /// Sets holding registers from `start`.
    pub fn set_holding(&self, start: usize, values: &[u16]) {
        self.memory.lock().holding_registers[start..start + values.len()].copy_from_slice(values);
    }

    /// Sets input registers from `start`.
    pub fn set_input(&self, start: usize, values: &[u16]) {
        self.memory.lock().input_registers[start..start + values.len()].copy_from_slice(values);
    }

    /// Sets one coil.
    pub fn set_coil(&self, address: usize, on: bool) {
        self.memory.lock().coils[address] = on;
    }

    /// Sets one discrete input.
    pub fn set_discrete(&self, address: usize, on: bool) {
        self.memory.lock().discrete_inputs[address] = on;
    }

    /// Reads a holding register.
    pub fn holding(&self, address: usize) -> u16 {
        self.memory.lock().holding_registers[address]
    }

    /// Reads a coil.
    pub fn coil(&self, address: usize) -> bool {
        self.memory.lock().coils[address]
    }

    /// Answers the next request with exception `code`.
    pub fn fail_next(&self, code: u8) {
        *self.faults.next_error.lock() = Some(code);
    }

    /// Closes the connection instead of answering the next request.
    pub fn drop_next(&self) {
        self.faults.drop_next.store(true, Ordering::SeqCst);
    }

    /// Stops answering (requests are read and ignored) while `silent`.
    pub fn set_silent(&self, silent: bool) {
        self.faults.silent.store(silent, Ordering::SeqCst);
    }
}

impl Drop for MockModbusServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_modbus(
    mut stream: TcpStream,
    memory: Arc<Mutex<ModbusMemory>>,
    stats: Arc<MockStats>,
    faults: Arc<Faults>,
) {
    loop {
        let mut header = [0u8; 7];
        if stream.read_exact(&mut header).await.is_err() {
            return;
        }
        let len = u16::from_be_bytes([header[4], header[5]]) as usize;
        let mut pdu = vec![0u8; len.saturating_sub(1)];
        if stream.read_exact(&mut pdu).await.is_err() {
            return;
        }
        stats.requests.fetch_add(1, Ordering::SeqCst);

        if faults.drop_next.swap(false, Ordering::SeqCst) {
            return;
        }
        if faults.silent.load(Ordering::SeqCst) {
            continue;
        }

        let function = pdu.first().copied().unwrap_or(0);
        if matches!(function, 5 | 6 | 16) {
            stats.writes.fetch_add(1, Ordering::SeqCst);
        }
        let reply = match faults.next_error.lock().take() {
            Some(code) => vec![function | 0x80, code],
            None => modbus_reply(&pdu, &mut memory.lock()),
        };

        let mut adu = Vec::with_capacity(7 + reply.len());
        adu.extend_from_slice(&header[0..4]);
        adu.extend_from_slice(&((reply.len() + 1) as u16).to_be_bytes());
        adu.push(header[6]);
        adu.extend_from_slice(&reply);
        if stream.write_all(&adu).await.is_err() {
            return;
        }
    }
}

fn word(pdu: &[u8], at: usize) -> usize {
    u16::from_be_bytes([pdu[at], pdu[at + 1]]) as usize
}

fn modbus_reply(pdu: &[u8], memory: &mut ModbusMemory) -> Vec<u8> {
    const ILLEGAL_FUNCTION: u8 = 0x01;
    const ILLEGAL_ADDRESS: u8 = 0x02;

    let function = pdu[0];
    let exception = |code: u8| vec![function | 0x80, code];

    match function {
        1 | 2 => {
            let (start, count) = (word(pdu, 1), word(pdu, 3));
            let table = if function == 1 {
                &memory.coils
            } else {
                &memory.discrete_inputs
            };
            let Some(bits) = table.get(start..start + count) else {
                return exception(ILLEGAL_ADDRESS);
            };
            let mut bytes = vec![0u8; count.div_ceil(8)];
            for (i, on) in bits.iter().enumerate() {
                if *on {
                    bytes[i / 8] |= 1 << (i % 8);
                }
            }
            let mut reply = vec![function, bytes.len() as u8];
            reply.extend_from_slice(&bytes);
            reply
        }
        3 | 4 => {
            let (start, count) = (word(pdu, 1), word(pdu, 3));
            let table = if function == 3 {
                &memory.holding_registers
            } else {
                &memory.input_registers
            };
            let Some(words) = table.get(start..start + count) else {
                return exception(ILLEGAL_ADDRESS);
            };
            let mut reply = vec![function, (count * 2) as u8];
            for w in words {
                reply.extend_from_slice(&w.to_be_bytes());
            }
            reply
        }
        5 => {
            let address = word(pdu, 1);
            match memory.coils.get_mut(address) {
                Some(coil) => {
                    *coil = word(pdu, 3) == 0xFF00;
                    pdu[..5].to_vec()
                }
                None => exception(ILLEGAL_ADDRESS),
            }
        }
        6 => {
            let address = word(pdu, 1);
            match memory.holding_registers.get_mut(address) {
                Some(register) => {
                    *register = word(pdu, 3) as u16;
                    pdu[..5].to_vec()
                }
                None => exception(ILLEGAL_ADDRESS),
            }
        }
        16 => {
            let (start, count) = (word(pdu, 1), word(pdu, 3));
            let Some(target) = memory.holding_registers.get_mut(start..start + count) else {
                return exception(ILLEGAL_ADDRESS);
            };
            for (i, register) in target.iter_mut().enumerate() {
                *register = word(pdu, 6 + i * 2) as u16;
            }
            pdu[..5].to_vec()
        }
        _ => exception(ILLEGAL_FUNCTION),
    }
}

// =============================================================================
// Mock S7 Server
// =============================================================================

const S7_RETURN_SUCCESS: u8 = 0xFF;
const S7_RETURN_INVALID_ADDRESS: u8 = 0x05;
const S7_RETURN_NOT_FOUND: u8 = 0x0A;

/// An S7 PLC serving data blocks and the I/Q/M areas.
pub struct MockS7Server {
    addr: SocketAddr,
    memory: Arc<Mutex<HashMap<(u8, u16), Vec<u8>>>>,
    stats: Arc<MockStats>,
    faults: Arc<Faults>,
    task: JoinHandle<()>,
}

impl MockS7Server {
    /// Starts a PLC negotiating a 240-byte PDU.
    pub async fn start() -> Self {
        Self::with_pdu(240).await
    }

    /// Starts a PLC negotiating `pdu` bytes.
    pub async fn with_pdu(pdu: u16) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock s7 server");
        let addr = listener.local_addr().expect("mock s7 address");
        let memory = Arc::new(Mutex::new(HashMap::new()));
        let stats = Arc::new(MockStats::default());
        let faults = Arc::new(Faults::default());

        let task = {
            let (memory, stats, faults) = (memory.clone(), stats.clone(), faults.clone());
            tokio::spawn(accept_loop(listener, stats.clone(), move |stream| {
                serve_s7(stream, pdu, memory.clone(), stats.clone(), faults.clone())
            }))
        };

        Self {
            addr,
            memory,
            stats,
            faults,
            task,
        }
    }

    /// Listening port.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Interaction counters.
    pub fn stats(&self) -> &MockStats {
        &self.stats
    }

    /// Replaces the contents of `area`.
    pub fn set_area(&self, area: Area, bytes: Vec<u8>) {
        self.memory.lock().insert((area.code(), area.db()), bytes);
    }

    /// Returns the contents of `area`, empty if it does not exist.
    pub fn area(&self, area: Area) -> Vec<u8> {
        self.memory
            .lock()
            .get(&(area.code(), area.db()))
            .cloned()
            .unwrap_or_default()
    }

    /// Answers the next read or write with item return code `code`.
    pub fn fail_next(&self, code: u8) {
        *self.faults.next_error.lock() = Some(code);
    }

    /// Closes the connection instead of answering the next job.
    pub fn drop_next(&self) {
        self.faults.drop_next.store(true, Ordering::SeqCst);
    }
}

impl Drop for MockS7Server {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn s7_ack(job: &[u8], params: &[u8], data: &[u8]) -> Vec<u8> {
    let total = 19 + params.len() + data.len();
    let mut reply = vec![0x03, 0x00];
    reply.extend_from_slice(&(total as u16).to_be_bytes());
    reply.extend_from_slice(&[0x02, 0xF0, 0x80, 0x32, 0x03, 0x00, 0x00, job[11], job[12]]);
    reply.extend_from_slice(&(params.len() as u16).to_be_bytes());
    reply.extend_from_slice(&(data.len() as u16).to_be_bytes());
    reply.extend_from_slice(&[0x00, 0x00]);
    reply.extend_from_slice(params);
    reply.extend_from_slice(data);
    reply
}

async fn serve_s7(
    mut stream: TcpStream,
    pdu: u16,
    memory: Arc<Mutex<HashMap<(u8, u16), Vec<u8>>>>,
    stats: Arc<MockStats>,
    faults: Arc<Faults>,
) {
    loop {
        let mut header = [0u8; 4];
        if stream.read_exact(&mut header).await.is_err() {
            return;
        }
        let len = u16::from_be_bytes([header[2], header[3]]) as usize;
        let mut telegram = header.to_vec();
        telegram.resize(len.max(4), 0);
        if stream.read_exact(&mut telegram[4..]).await.is_err() {
            return;
        }

        let reply = if telegram.get(5) == Some(&0xE0) {
            let mut confirm = telegram.clone();
            confirm[5] = 0xD0;
            confirm
        } else if telegram.get(17) == Some(&0xF0) {
            let mut params = vec![0xF0, 0x00, 0x00, 0x01, 0x00, 0x01];
            params.extend_from_slice(&pdu.to_be_bytes());
            s7_ack(&telegram, &params, &[])
        } else {
            stats.requests.fetch_add(1, Ordering::SeqCst);
            if faults.drop_next.swap(false, Ordering::SeqCst) {
                return;
            }
            let injected = faults.next_error.lock().take();
            s7_job_reply(&telegram, injected, &mut memory.lock(), &stats)
        };

        if stream.write_all(&reply).await.is_err() {
            return;
        }
    }
}

fn s7_job_reply(
    job: &[u8],
    injected: Option<u8>,
    memory: &mut HashMap<(u8, u16), Vec<u8>>,
    stats: &MockStats,
) -> Vec<u8> {
    let function = job[17];
    let count = u16::from_be_bytes([job[23], job[24]]) as usize;
    let db = u16::from_be_bytes([job[25], job[26]]);
    let area = job[27];
    let address = u32::from_be_bytes([0, job[28], job[29], job[30]]) as usize;
    let params = [function, 0x01];

    if function == 0x05 {
        stats.writes.fetch_add(1, Ordering::SeqCst);
    }
    if let Some(code) = injected {
        return match function {
            0x04 => s7_ack(job, &params, &[code, 0x00, 0x00, 0x00]),
            _ => s7_ack(job, &params, &[code]),
        };
    }

    let Some(block) = memory.get_mut(&(area, db)) else {
        return match function {
            0x04 => s7_ack(job, &params, &[S7_RETURN_NOT_FOUND, 0x00, 0x00, 0x00]),
            _ => s7_ack(job, &params, &[S7_RETURN_NOT_FOUND]),
        };
    };

    match function {
        0x04 => {
            let start = address >> 3;
            match block.get(start..start + count) {
                Some(bytes) => {
                    let mut data = vec![S7_RETURN_SUCCESS, 0x04];
                    data.extend_from_slice(&((count * 8) as u16).to_be_bytes());
                    data.extend_from_slice(bytes);
                    s7_ack(job, &params, &data)
                }
                None => s7_ack(job, &params, &[S7_RETURN_INVALID_ADDRESS, 0x00, 0x00, 0x00]),
            }
        }
        _ => {
            let payload = &job[35..];
            let code = if job[22] == 0x01 {
                let (byte, bit) = (address / 8, address % 8);
                match block.get_mut(byte) {
                    Some(b) if payload.first().copied().unwrap_or(0) != 0 => {
                        *b |= 1 << bit;
                        S7_RETURN_SUCCESS
                    }
                    Some(b) => {
                        *b &= !(1 << bit);
                        S7_RETURN_SUCCESS
                    }
                    None => S7_RETURN_INVALID_ADDRESS,
                }
            } else {
                let start = address >> 3;
                match block.get_mut(start..start + payload.len()) {
                    Some(target) => {
                        target.copy_from_slice(payload);
                        S7_RETURN_SUCCESS
                    }
                    None => S7_RETURN_INVALID_ADDRESS,
                }
            };
            s7_ack(job, &params, &[code])
        }
    }
}
