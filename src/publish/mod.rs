pub mod messages;
pub mod mqtt;
pub mod publisher;
pub mod sink;

pub use mqtt::MqttConnector;
pub use publisher::ChangePublisher;
