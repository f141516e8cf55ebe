use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outgoing request envelope, serialized to JSON before encryption
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Correlation id echoed back by the device
    pub id: u32,
    /// Method name, e.g. `get_prop` or `miIO.info`
    pub method: String,
    /// Method parameters, always an array on the wire
    pub params: Value,
}

impl Request {
    /// Creates a new request envelope
    pub fn new(id: u32, method: impl Into<String>, params: Value) -> Self {
        Request {
            id,
            method: method.into(),
            params,
        }
    }
}

/// Inbound response envelope, parsed from a decrypted payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Correlation id matching the originating request
    pub id: u32,
    /// Result value, absent on device-side errors
    #[serde(default)]
    pub result: Value,
    /// Device-side error report
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl Response {
    /// Returns true when the device accepted the request
    ///
    /// Devices acknowledge writes with `["ok"]`; reads return plain
    /// values, which also count as success.
    pub fn is_ok(&self) -> bool {
        if self.error.is_some() {
            return false;
        }
        match self.result.get(0).and_then(Value::as_str) {
            Some(first) => first == "ok",
            None => true,
        }
    }
}
