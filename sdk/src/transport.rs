//! Delivery seam between the queue and a live socket.

use async_trait::async_trait;
use serde_json::Value;

use crate::ws::error::WsError;

/// Something that can put one `{type, data}` frame on the wire.
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Sends a frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame could not be written.
    async fn send_frame(&self, kind: &str, payload: &Value) -> Result<(), WsError>;
}
