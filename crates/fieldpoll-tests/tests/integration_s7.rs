// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # S7 Integration Tests
//!
//! A real engine polling the mock S7 PLC over ISO-on-TCP.
//!
//! ## Test Categories
//!
//! - `test_poll_*`: handshake, area reads and decoding
//! - `test_write_*`: bit, word and string writes
//! - `test_failure_*`: item return codes and dropped connections

use std::time::Duration;

use fieldpoll_core::{
    ActionFailure, DataType, DeviceConfig, FetchError, ValidationError, Value, Variable, WriteRequest,
};
use fieldpoll_s7::Area;
use fieldpoll_tests::prelude::*;

const WAIT: Duration = Duration::from_secs(5);

fn db1() -> Vec<u8> {
    let mut db = vec![0u8; 16];
    db[0..4].copy_from_slice(&(-5i32).to_be_bytes());
    db[4..8].copy_from_slice(&1.5f32.to_be_bytes());
    db[8] = 0b0000_0100;
    db
}

async fn plc() -> MockS7Server {
    let server = MockS7Server::start().await;
    server.set_area(Area::DataBlock(1), db1());
    server.set_area(Area::DataBlock(2), b"PUMP-7\0\0".to_vec());
    let mut merkers = vec![0u8; 16];
    merkers[10..12].copy_from_slice(&0x1234u16.to_be_bytes());
    server.set_area(Area::Merkers, merkers);
    server
}

// =============================================================================
// Polling
// =============================================================================

#[tokio::test]
async fn test_poll_decodes_every_area() {
    init_test_logging();
    let server = plc().await;
    let (engine, mut results) = registry().new_engine(DeviceFixtures::s7_plc(server.port())).unwrap();
    assert!(engine.start());

    let cycle = next_cycle(&mut results, WAIT).await;
    assert!(cycle.is_complete(), "errors: {:?}", cycle.errors);
    assert_eq!(cycle.value("counter"), Some(&Value::Int32(-5)));
    assert_eq!(cycle.value("level"), Some(&Value::Float32(1.5)));
    assert_eq!(cycle.value("valve"), Some(&Value::Bool(true)));
    assert_eq!(cycle.value("recipe"), Some(&Value::String("PUMP-7".to_string())));
    assert_eq!(cycle.value("marker"), Some(&Value::UInt16(0x1234)));

    // merkers, DB1 and DB2 are separate frames
    assert!(server.stats().requests() >= 3);
    assert_eq!(server.stats().connections(), 1);

    engine.destroy().await;
}

#[tokio::test]
async fn test_poll_large_block_split_by_pdu() {
    let server = MockS7Server::with_pdu(240).await;
    let block: Vec<u8> = (0..400u32).map(|i| (i % 200) as u8).collect();
    server.set_area(Area::DataBlock(5), block);

    let device = DeviceConfig::new(
        "plc-big",
        fieldpoll_core::ProtocolModel::S7,
        fieldpoll_core::TransportAddress::tcp("127.0.0.1", server.port()),
    )
    .with_poll_interval(FAST_POLL)
    .with_timeout(SHORT_TIMEOUT)
    .with_variable(Variable::new("head", DataType::UInt16, "DB5.DBW0"))
    .with_variable(Variable::new("tail", DataType::UInt16, "DB5.DBW398"));
    let (engine, mut results) = registry().new_engine(device).unwrap();
    engine.start();

    let cycle = next_cycle(&mut results, WAIT).await;
    assert!(cycle.is_complete(), "errors: {:?}", cycle.errors);
    assert_eq!(cycle.value("head"), Some(&Value::UInt16(0x0001)));
    // bytes 398 and 399 are 198 and 199
    assert_eq!(cycle.value("tail"), Some(&Value::UInt16(u16::from_be_bytes([198, 199]))));

    engine.destroy().await;
}

// =============================================================================
// Writes
// =============================================================================

#[tokio::test]
async fn test_write_reaches_plc() {
    let server = plc().await;
    let (engine, mut results) = registry().new_engine(DeviceFixtures::s7_plc(server.port())).unwrap();
    engine.start();

    let request = WriteRequest::new()
        .set("counter", 42)
        .set("valve", false)
        .set("recipe", "AB")
        .set("marker", 7);
    assert_eq!(engine.apply_action(request).await.unwrap(), 4);
    assert_eq!(server.stats().writes(), 4);

    let db1 = server.area(Area::DataBlock(1));
    assert_eq!(&db1[0..4], &42i32.to_be_bytes());
    assert_eq!(db1[8], 0);
    assert_eq!(&server.area(Area::DataBlock(2))[..], b"AB\0\0\0\0\0\0");
    assert_eq!(&server.area(Area::Merkers)[10..12], &[0x00, 0x07]);

    let cycle = wait_for_cycle(&mut results, WAIT, |c| c.value("counter") == Some(&Value::Int32(42))).await;
    assert_eq!(cycle.value("recipe"), Some(&Value::String("AB".to_string())));
    assert_eq!(cycle.value("valve"), Some(&Value::Bool(false)));

    engine.destroy().await;
}

#[tokio::test]
async fn test_write_bit_keeps_neighbours() {
    let server = plc().await;
    let (engine, _results) = registry().new_engine(DeviceFixtures::s7_plc(server.port())).unwrap();

    engine.apply_action(WriteRequest::new().set("valve", false)).await.unwrap();
    assert_eq!(server.area(Area::DataBlock(1))[8], 0);

    let mut db = db1();
    db[8] = 0b1000_0001;
    server.set_area(Area::DataBlock(1), db);
    engine.apply_action(WriteRequest::new().set("valve", true)).await.unwrap();
    assert_eq!(server.area(Area::DataBlock(1))[8], 0b1000_0101);

    engine.destroy().await;
}

#[tokio::test]
async fn test_write_inputs_are_read_only() {
    let server = plc().await;
    let device = DeviceFixtures::s7_plc(server.port())
        .with_variable(Variable::new("sensor", DataType::Int16, "IW0"));
    let (engine, _results) = registry().new_engine(device).unwrap();

    let err = engine
        .apply_action(WriteRequest::new().set("sensor", 1).set("recipe", "TOO-LONG-NAME"))
        .await
        .unwrap_err();
    assert!(err.is_validation_only());
    assert!(err
        .failures()
        .iter()
        .any(|f| matches!(f, ActionFailure::Validation(ValidationError::ReadOnly { name }) if name == "sensor")));
    assert!(err
        .failures()
        .iter()
        .any(|f| matches!(f, ActionFailure::Validation(ValidationError::Encode { name, .. }) if name == "recipe")));
    assert_eq!(server.stats().writes(), 0);

    engine.destroy().await;
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_failure_missing_block_is_per_frame() {
    let server = MockS7Server::start().await;
    server.set_area(Area::DataBlock(1), db1());
    let mut merkers = vec![0u8; 16];
    merkers[10..12].copy_from_slice(&0x0042u16.to_be_bytes());
    server.set_area(Area::Merkers, merkers);

    let (engine, mut results) = registry().new_engine(DeviceFixtures::s7_plc(server.port())).unwrap();
    engine.start();

    let cycle = next_cycle(&mut results, WAIT).await;
    assert_eq!(cycle.errors.len(), 1);
    assert_eq!(cycle.errors[0].attempts, 1);
    assert!(matches!(&cycle.errors[0].error, FetchError::Protocol(e) if e.is_device_rejection()));
    assert_eq!(cycle.value("recipe"), None);
    assert_eq!(cycle.value("counter"), Some(&Value::Int32(-5)));
    assert_eq!(cycle.value("marker"), Some(&Value::UInt16(0x42)));

    engine.destroy().await;
}

#[tokio::test]
async fn test_failure_injected_return_code() {
    let server = plc().await;
    server.fail_next(0x05);
    let (engine, mut results) = registry().new_engine(DeviceFixtures::s7_plc(server.port())).unwrap();
    engine.start();

    let cycle = next_cycle(&mut results, WAIT).await;
    assert_eq!(cycle.errors.len(), 1);
    assert!(matches!(&cycle.errors[0].error, FetchError::Protocol(e) if e.is_device_rejection()));

    let cycle = next_cycle(&mut results, WAIT).await;
    assert!(cycle.is_complete());

    engine.destroy().await;
}

#[tokio::test]
async fn test_failure_dropped_connection_reconnects() {
    let server = plc().await;
    server.drop_next();
    let (engine, mut results) = registry().new_engine(DeviceFixtures::s7_plc(server.port())).unwrap();
    engine.start();

    let cycle = next_cycle(&mut results, WAIT).await;
    assert!(cycle.is_complete(), "errors: {:?}", cycle.errors);
    assert_eq!(server.stats().connections(), 2);
    assert_eq!(engine.stats().reconnects, 1);

    engine.destroy().await;
}
