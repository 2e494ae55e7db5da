/// Outbound messaging seam between the publisher and its transport
use std::future::Future;

use crate::error::SinkError;

/// A connected publish channel with at-least-once delivery
pub trait MessageSink: Send {
    fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
    ) -> impl Future<Output = Result<(), SinkError>> + Send;
}

/// Opens new sink sessions; called again after every failure
pub trait SinkConnector: Send + Sync + 'static {
    type Sink: MessageSink;

    fn connect(&self) -> impl Future<Output = Result<Self::Sink, SinkError>> + Send;
}
