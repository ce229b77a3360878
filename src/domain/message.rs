//! Inbound job message shape

use serde::{Deserialize, Serialize};

/// One unit of work as delivered by the queue.
///
/// `payload` substitutes `all` segments during channel decoding and may be
/// empty when the channel uses none. `number`/`server_number` are opaque
/// sequencing values recorded onto the command attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMessage {
    pub channel: String,
    #[serde(default)]
    pub payload: String,
    /// Rendered command string to execute
    pub command: String,
    pub number: i64,
    pub server_number: i64,
}
