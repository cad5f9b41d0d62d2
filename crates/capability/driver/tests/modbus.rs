mod common;

use async_trait::async_trait;
use domain::{DataOrder, DataPoint, DataType, Origin, PointAddress, ResourceState};
use edge_cache::{last_fault, point_value};
use edge_driver::{ModbusConnector, ModbusMaster, ModbusSlaver};
use edge_protocol::{ModbusClientConfig, ModbusTransport, ProtocolError};
use edge_resource::Resource;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

type Writes = Arc<Mutex<Vec<(u8, u16, Vec<u16>)>>>;

/// 固定应答的 Modbus 传输
struct StubTransport {
    reply: Option<Vec<u8>>,
    writes: Writes,
}

#[async_trait]
impl ModbusTransport for StubTransport {
    async fn read(&mut self, _slave: u8, _function: u8, _address: u16, _quantity: u16) -> Result<Vec<u8>, ProtocolError> {
        self.reply
            .clone()
            .ok_or_else(|| ProtocolError::Connection("stub offline".to_string()))
    }

    async fn write_registers(&mut self, slave: u8, address: u16, values: &[u16]) -> Result<(), ProtocolError> {
        self.writes.lock().unwrap().push((slave, address, values.to_vec()));
        Ok(())
    }

    async fn write_coil(&mut self, slave: u8, address: u16, value: bool) -> Result<(), ProtocolError> {
        self.writes.lock().unwrap().push((slave, address, vec![value as u16]));
        Ok(())
    }

    async fn close(&mut self) {}
}

struct StubConnector {
    reply: Option<Vec<u8>>,
    writes: Writes,
}

#[async_trait]
impl ModbusConnector for StubConnector {
    async fn connect(&self, _config: &ModbusClientConfig) -> Result<Box<dyn ModbusTransport>, ProtocolError> {
        Ok(Box::new(StubTransport {
            reply: self.reply.clone(),
            writes: self.writes.clone(),
        }))
    }
}

struct RefusingConnector;

#[async_trait]
impl ModbusConnector for RefusingConnector {
    async fn connect(&self, _config: &ModbusClientConfig) -> Result<Box<dyn ModbusTransport>, ProtocolError> {
        Err(ProtocolError::Connection("connection refused".to_string()))
    }
}

fn temperature_point(device: &str, frequency_ms: u64) -> DataPoint {
    DataPoint {
        uuid: "P1".to_string(),
        device_uuid: device.to_string(),
        tag: "temp".to_string(),
        alias: "温度".to_string(),
        address: PointAddress::Modbus {
            function: 3,
            slave_id: 1,
            register: 0,
            quantity: 1,
        },
        data_type: DataType::Int16,
        data_order: DataOrder::Ab,
        weight: 0.1,
        frequency_ms,
    }
}

fn master(h: &common::Harness, reply: Option<Vec<u8>>) -> (ModbusMaster, Writes) {
    let writes: Writes = Arc::default();
    let connector = Arc::new(StubConnector {
        reply,
        writes: writes.clone(),
    });
    (ModbusMaster::with_connector(h.ctx.clone(), connector), writes)
}

#[tokio::test]
async fn master_polls_points_into_cache_and_queue() {
    let h = common::harness();
    h.ctx.points.upsert_point(temperature_point("D1", 100)).await.unwrap();
    let (device, _) = master(&h, Some(vec![0x00, 0x7B]));
    device.init("D1", &json!({ "mode": "TCP", "host": "127.0.0.1" })).await.unwrap();
    device.start(CancellationToken::new()).await.unwrap();
    assert_eq!(device.status(), ResourceState::Up);

    tokio::time::sleep(Duration::from_millis(300)).await;
    let cached = point_value(&h.ctx.cache, "D1", "P1").unwrap();
    assert!(cached.is_ok());
    let value: f64 = cached.value.parse().unwrap();
    assert!((value - 12.3).abs() < 1e-5);

    assert!(h.wait_records(2, Duration::from_millis(200)).await);
    let record = h.records.lock().unwrap()[0].clone();
    assert_eq!(record.origin, Origin::Device("D1".to_string()));
    let payload: serde_json::Value = serde_json::from_str(&record.payload).unwrap();
    assert_eq!(payload["tag"], "temp");
    assert_eq!(payload["alias"], "温度");
    assert!(payload["ts"].as_i64().unwrap() > 0);

    device.stop().await;
    assert_eq!(device.status(), ResourceState::Stop);
}

#[tokio::test]
async fn master_goes_down_after_consecutive_failures() {
    let h = common::harness();
    h.ctx.points.upsert_point(temperature_point("D2", 50)).await.unwrap();
    let (device, _) = master(&h, None);
    device.init("D2", &json!({ "host": "127.0.0.1", "maxFailures": 2 })).await.unwrap();
    device.start(CancellationToken::new()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(device.status(), ResourceState::Down);
    assert!(last_fault(&h.ctx.cache, "D2").unwrap().contains("stub offline"));

    let cached = point_value(&h.ctx.cache, "D2", "P1").unwrap();
    assert_eq!(cached.status, 1);
    assert!(!cached.err_msg.is_empty());
    device.stop().await;
}

#[tokio::test]
async fn master_connect_failure_marks_down() {
    let h = common::harness();
    let device = ModbusMaster::with_connector(h.ctx.clone(), Arc::new(RefusingConnector));
    device.init("D3", &json!({ "host": "127.0.0.1" })).await.unwrap();
    assert!(device.start(CancellationToken::new()).await.is_err());
    assert_eq!(device.status(), ResourceState::Down);
    assert!(last_fault(&h.ctx.cache, "D3").is_some());
}

#[tokio::test]
async fn master_writes_point_by_tag() {
    let h = common::harness();
    h.ctx.points.upsert_point(temperature_point("D4", 1000)).await.unwrap();
    let (device, writes) = master(&h, Some(vec![0x00, 0x01]));
    device.init("D4", &json!({ "host": "127.0.0.1" })).await.unwrap();
    device.start(CancellationToken::new()).await.unwrap();

    device
        .on_ctrl("write", &json!({ "tag": "temp", "value": 100 }))
        .await
        .unwrap();
    assert_eq!(writes.lock().unwrap().as_slice(), &[(1, 0, vec![100])]);

    assert!(device.on_ctrl("write", &json!({ "tag": "missing", "value": 1 })).await.is_err());
    assert!(device.on_ctrl("reset", &json!({})).await.is_err());
    device.stop().await;
}

#[tokio::test]
async fn master_rejects_bad_config() {
    let h = common::harness();
    let (device, _) = master(&h, None);
    assert!(device.init("D5", &json!({ "mode": "UDP" })).await.is_err());
    assert!(device.init("D5", &json!({ "maxFailures": 0 })).await.is_err());
}

#[tokio::test]
async fn slaver_mirrors_master_writes_into_cache() {
    let h = common::harness();
    let slaver = ModbusSlaver::new(h.ctx.clone());
    slaver
        .init("S1", &json!({ "host": "127.0.0.1", "port": 0, "capacity": 64 }))
        .await
        .unwrap();
    slaver.start(CancellationToken::new()).await.unwrap();
    let port = slaver.details()["port"].as_u64().unwrap() as u16;

    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    // FC6：寄存器 5 写 0x0064
    let request = [0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x06, 0x00, 0x05, 0x00, 0x64];
    stream.write_all(&request).await.unwrap();
    let mut response = [0u8; 12];
    stream.read_exact(&mut response).await.unwrap();
    assert_eq!(response, request);

    assert!(h.wait_records(1, Duration::from_millis(500)).await);
    let cached = point_value(&h.ctx.cache, "S1", "S1_HoldingRegisters:5").unwrap();
    assert_eq!(cached.value, "0064");
    let payload = &h.payloads()[0];
    assert_eq!(payload["register"], 5);
    assert_eq!(payload["slaverId"], 1);
    assert_eq!(payload["value"], "0064");

    let clients = slaver.on_ctrl("listClients", &json!({})).await.unwrap();
    assert_eq!(clients.as_array().unwrap().len(), 1);

    slaver.stop().await;
    assert_eq!(slaver.status(), ResourceState::Stop);
}

#[tokio::test]
async fn slaver_local_write_is_readable_by_master() {
    let h = common::harness();
    let slaver = ModbusSlaver::new(h.ctx.clone());
    slaver.init("S2", &json!({ "host": "127.0.0.1", "port": 0 })).await.unwrap();
    slaver.start(CancellationToken::new()).await.unwrap();
    slaver
        .on_ctrl("write", &json!({ "area": "InputRegisters", "address": 2, "values": [513] }))
        .await
        .unwrap();
    assert_eq!(
        point_value(&h.ctx.cache, "S2", "S2_InputRegisters:2").unwrap().value,
        "0201"
    );

    let port = slaver.details()["port"].as_u64().unwrap() as u16;
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    // FC4：从 2 开始读 1 个输入寄存器
    stream
        .write_all(&[0x00, 0x02, 0x00, 0x00, 0x00, 0x06, 0x01, 0x04, 0x00, 0x02, 0x00, 0x01])
        .await
        .unwrap();
    let mut response = [0u8; 11];
    stream.read_exact(&mut response).await.unwrap();
    assert_eq!(&response[7..], &[0x04, 0x02, 0x02, 0x01]);

    assert!(slaver.on_ctrl("write", &json!({ "address": 200, "values": [1] })).await.is_err());
    slaver.stop().await;
}
