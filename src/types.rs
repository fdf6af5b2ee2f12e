//! Core value types for subscription synchronization.

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Stable key identifying one saga within its store.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CorrelationId(pub Uuid);

impl CorrelationId {
    /// Generate a fresh random identifier.
    pub fn new() -> Self {
        CorrelationId(Uuid::new_v4())
    }

    pub const fn from_u128(value: u128) -> Self {
        CorrelationId(Uuid::from_u128(value))
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CorrelationId({})", self.0)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A subscriber client is correlated by its client identifier.
pub type ClientId = CorrelationId;

/// Validated `scheme://authority[/path]` endpoint address.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EndpointAddress(String);

impl EndpointAddress {
    /// Parse and validate an address.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |reason: &str| SyncError::InvalidAddress {
            address: input.to_string(),
            reason: reason.to_string(),
        };

        if input.is_empty() {
            return Err(invalid("address is empty"));
        }
        if input.chars().any(char::is_whitespace) {
            return Err(invalid("address contains whitespace"));
        }

        let (scheme, rest) = input
            .split_once("://")
            .ok_or_else(|| invalid("missing '://' separator"))?;

        let mut chars = scheme.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() => {}
            _ => return Err(invalid("scheme must start with a letter")),
        }
        if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) {
            return Err(invalid("scheme contains invalid characters"));
        }

        let authority = rest.split('/').next().unwrap_or_default();
        if authority.is_empty() {
            return Err(invalid("authority is empty"));
        }

        Ok(EndpointAddress(input.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The scheme portion (before `://`).
    pub fn scheme(&self) -> &str {
        self.0.split_once("://").map(|(s, _)| s).unwrap_or_default()
    }
}

impl FromStr for EndpointAddress {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for EndpointAddress {
    type Error = SyncError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<EndpointAddress> for String {
    fn from(address: EndpointAddress) -> Self {
        address.0
    }
}

impl fmt::Debug for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EndpointAddress({})", self.0)
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time. Clocks before the epoch read as zero.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0);
        Timestamp(micros)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// One message-type-to-endpoint binding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Correlation id of the subscription saga.
    pub subscription_id: CorrelationId,

    /// Message type name, e.g. `"OrderPlaced"`.
    pub message_name: String,

    /// Endpoint that receives messages of this type.
    pub endpoint: EndpointAddress,
}

impl Subscription {
    pub fn new(
        subscription_id: CorrelationId,
        message_name: impl Into<String>,
        endpoint: EndpointAddress,
    ) -> Self {
        Self {
            subscription_id,
            message_name: message_name.into(),
            endpoint,
        }
    }

    /// Reject payloads that could never be routed.
    pub fn validate(&self) -> Result<()> {
        if self.message_name.trim().is_empty() {
            return Err(SyncError::InvalidEvent(format!(
                "subscription {} has an empty message name",
                self.subscription_id
            )));
        }
        Ok(())
    }
}

/// One remote subscriber endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionClient {
    pub client_id: ClientId,

    /// Where subscription change notifications are delivered.
    pub control_address: EndpointAddress,
}

impl SubscriptionClient {
    pub fn new(client_id: ClientId, control_address: EndpointAddress) -> Self {
        Self {
            client_id,
            control_address,
        }
    }
}

/// Entry of a full cache snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionInformation {
    pub subscription_id: CorrelationId,
    pub message_name: String,
    pub endpoint: EndpointAddress,
}

impl SubscriptionInformation {
    pub fn from_subscription(subscription: &Subscription) -> Self {
        Self {
            subscription_id: subscription.subscription_id,
            message_name: subscription.message_name.clone(),
            endpoint: subscription.endpoint.clone(),
        }
    }
}
