//! Message-bus seam.
//!
//! The pipeline consumes and acknowledges inbound messages through
//! [`MessageSource`] and publishes monitor emissions through
//! [`MessageSink`]; the Pulsar implementations live in [`pulsar_bus`].

pub mod pulsar_bus;
pub mod source;

pub use pulsar_bus::{
    ConsumerConfig, EndpointConfig, ProducerConfig, PulsarSink, PulsarSource,
};
pub use source::{AckHandle, BusError, InboundMessage, MessageSink, MessageSource, SendCallback};
