//! # 驱动运行时
//!
//! 所有驱动实现 [`edge_resource::Resource`]，通过 [`register_all`] 以类型标签注册到对应管理器：
//!
//! | 类别 | 类型标签 | 驱动 |
//! |------|----------|------|
//! | 设备 | `GENERIC_MODBUS_MASTER` | [`ModbusMaster`]：按点位频率轮询 |
//! | 设备 | `GENERIC_MODBUS_SLAVER` | [`ModbusSlaver`]：TCP 从站寄存器区 |
//! | 设备 | `GENERIC_BACNET_ROUTER` | [`BacnetRouter`]：BACnet/IP AI 对象 |
//! | 源 | `CUSTOM_PROTOCOL` | [`CustomProtocolSource`]：分帧 + 字段表达式 |
//! | 源 | `AIS_RECEIVER` | [`AisReceiver`]：NMEA/AIS |
//! | 源 | `MQTT` | [`MqttSource`] |
//! | 源 | `INTERNAL_EVENT` | [`InternalEventSource`]：事件总线 → 规则引擎 |
//! | 目标 | `MQTT` / `HTTP` / `TDENGINE` / `UART` | 带有界发布队列的北向目标 |
//! | 插件 | `SYSTEM_MONITOR` | [`SystemMonitor`]：系统负载采样 |
//!
//! 设备与源把记录写入规则引擎入口队列（[`DriverContext::emit`]），目标只从脚本侧接收数据。

mod context;
mod device;
mod mqtt;
mod plugin;
mod source;
mod target;
mod worker;

pub use context::{DriverContext, DriverSettings};
pub use device::{
    BacnetRouter, ModbusConnector, ModbusMaster, ModbusSlaver, TokioModbusConnector,
};
pub use plugin::SystemMonitor;
pub use source::{AisReceiver, CustomProtocolSource, InternalEventSource, MqttSource};
pub use target::{HttpTarget, MqttTarget, TdengineTarget, UartTarget};

use edge_resource::{Resource, ResourceManager};
use std::sync::Arc;

pub const GENERIC_MODBUS_MASTER: &str = "GENERIC_MODBUS_MASTER";
pub const GENERIC_MODBUS_SLAVER: &str = "GENERIC_MODBUS_SLAVER";
pub const GENERIC_BACNET_ROUTER: &str = "GENERIC_BACNET_ROUTER";
pub const CUSTOM_PROTOCOL: &str = "CUSTOM_PROTOCOL";
pub const AIS_RECEIVER: &str = "AIS_RECEIVER";
pub const MQTT: &str = "MQTT";
pub const INTERNAL_EVENT: &str = "INTERNAL_EVENT";
pub const HTTP: &str = "HTTP";
pub const TDENGINE: &str = "TDENGINE";
pub const UART: &str = "UART";
pub const SYSTEM_MONITOR: &str = "SYSTEM_MONITOR";

/// 注册全部内置驱动到各类资源管理器。
pub fn register_all(
    ctx: &DriverContext,
    sources: &ResourceManager,
    targets: &ResourceManager,
    devices: &ResourceManager,
    plugins: &ResourceManager,
) {
    let c = ctx.clone();
    devices.register_factory(GENERIC_MODBUS_MASTER, move |_, _| {
        Ok(Arc::new(ModbusMaster::new(c.clone())) as Arc<dyn Resource>)
    });
    let c = ctx.clone();
    devices.register_factory(GENERIC_MODBUS_SLAVER, move |_, _| {
        Ok(Arc::new(ModbusSlaver::new(c.clone())) as Arc<dyn Resource>)
    });
    let c = ctx.clone();
    devices.register_factory(GENERIC_BACNET_ROUTER, move |_, _| {
        Ok(Arc::new(BacnetRouter::new(c.clone())) as Arc<dyn Resource>)
    });
    let c = ctx.clone();
    sources.register_factory(CUSTOM_PROTOCOL, move |_, _| {
        Ok(Arc::new(CustomProtocolSource::new(c.clone())) as Arc<dyn Resource>)
    });
    let c = ctx.clone();
    sources.register_factory(AIS_RECEIVER, move |_, _| {
        Ok(Arc::new(AisReceiver::new(c.clone())) as Arc<dyn Resource>)
    });
    let c = ctx.clone();
    sources.register_factory(MQTT, move |_, _| {
        Ok(Arc::new(MqttSource::new(c.clone())) as Arc<dyn Resource>)
    });
    let c = ctx.clone();
    sources.register_factory(INTERNAL_EVENT, move |_, _| {
        Ok(Arc::new(InternalEventSource::new(c.clone())) as Arc<dyn Resource>)
    });

    targets.register_factory(MQTT, |_, _| Ok(Arc::new(MqttTarget::new()) as Arc<dyn Resource>));
    targets.register_factory(HTTP, |_, _| Ok(Arc::new(HttpTarget::new()) as Arc<dyn Resource>));
    let c = ctx.clone();
    targets.register_factory(TDENGINE, move |_, _| {
        Ok(Arc::new(TdengineTarget::new(c.clone())) as Arc<dyn Resource>)
    });
    let c = ctx.clone();
    targets.register_factory(UART, move |_, _| {
        Ok(Arc::new(UartTarget::new(c.clone())) as Arc<dyn Resource>)
    });

    let c = ctx.clone();
    plugins.register_factory(SYSTEM_MONITOR, move |_, _| {
        Ok(Arc::new(SystemMonitor::new(c.clone())) as Arc<dyn Resource>)
    });
}
