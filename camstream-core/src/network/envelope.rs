//! The JSON envelope exchanged in both directions.
//!
//! ```text
//! { "from": <role id>, "receiver": <role id>, "data": <string> }
//! ```

use serde::{Deserialize, Serialize};

use crate::error::StreamError;
use crate::stream::encoder::EncodedImage;

/// Role id of the streaming client.
pub const CLIENT_ROLE: &str = "user-client";
/// Role id of the remote analyzer.
pub const ANALYZER_ROLE: &str = "app-analyzer";

/// Correlation wrapper around one payload.
///
/// Peers may omit the role ids on replies; only `data` is required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    from: String,
    #[serde(default)]
    receiver: String,
    data: String,
}

impl Envelope {
    pub fn new(
        from: impl Into<String>,
        receiver: impl Into<String>,
        data: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            receiver: receiver.into(),
            data: data.into(),
        }
    }

    /// Wrap an encoded frame as base64.
    pub fn image(from: &str, receiver: &str, image: &EncodedImage) -> Self {
        Self::new(from, receiver, image.to_base64())
    }

    pub fn from(&self) -> &str {
        &self.from
    }

    pub fn receiver(&self) -> &str {
        &self.receiver
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn into_data(self) -> String {
        self.data
    }

    /// Serialize to the wire form.
    pub fn to_json(&self) -> Result<String, StreamError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse the wire form.
    pub fn from_json(text: &str) -> Result<Self, StreamError> {
        Ok(serde_json::from_str(text)?)
    }
}
