use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Subscription request sent once the socket is ready.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionDescriptor {
    pub agent: String,
    #[serde(default)]
    pub args: Map<String, Value>,
    /// Additional top-level fields, sent as-is.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SubscriptionDescriptor {
    pub fn new(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            args: Map::new(),
            extra: Map::new(),
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    pub fn with_args(mut self, args: Map<String, Value>) -> Self {
        self.args = args;
        self
    }

    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Reply to the raw API key frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AuthAck {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl AuthAck {
    pub fn accepted() -> Self {
        Self {
            error: Some(false),
            code: None,
        }
    }

    pub fn rejected(code: impl Into<String>) -> Self {
        Self {
            error: Some(true),
            code: Some(code.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.unwrap_or(false)
    }

    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// First frame received after the descriptor.
///
/// Its shape is server-defined. Only an object carrying `"error": true` is
/// treated as a rejection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct SubscriptionAck(Value);

impl SubscriptionAck {
    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text).map(Self)
    }

    /// Rejection code if the server refused the subscription.
    pub fn rejection(&self) -> Option<String> {
        let object = self.0.as_object()?;
        if object.get("error").and_then(Value::as_bool) != Some(true) {
            return None;
        }
        let code = object
            .get("code")
            .or_else(|| object.get("reason"))
            .or_else(|| object.get("message"))
            .map(|value| match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            });
        Some(code.unwrap_or_else(|| "unknown".to_string()))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

/// Decoded application message. The schema belongs to the agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct InboundMessage(Value);

impl InboundMessage {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text).map(Self)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes).map(Self)
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.0)
    }

    pub fn metadata(&self) -> Option<&Value> {
        self.0.get("metadata")
    }

    pub fn payload(&self) -> Option<&Value> {
        self.0.get("payload")
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<Value> for InboundMessage {
    fn from(value: Value) -> Self {
        Self(value)
    }
}
