mod ais_receiver;
mod custom_protocol;
mod internal_event;
mod mqtt_source;

pub use ais_receiver::AisReceiver;
pub use custom_protocol::CustomProtocolSource;
pub use internal_event::InternalEventSource;
pub use mqtt_source::MqttSource;
