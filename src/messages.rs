//! Events consumed from the bus and notifications sent to clients.

use crate::types::{ClientId, CorrelationId, EndpointAddress, Subscription, SubscriptionInformation};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The four event types the subscription service consumes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SubscriptionAdded,
    SubscriptionRemoved,
    SubscriptionClientAdded,
    SubscriptionClientRemoved,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::SubscriptionAdded,
        EventKind::SubscriptionRemoved,
        EventKind::SubscriptionClientAdded,
        EventKind::SubscriptionClientRemoved,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EventKind::SubscriptionAdded => "SubscriptionAdded",
            EventKind::SubscriptionRemoved => "SubscriptionRemoved",
            EventKind::SubscriptionClientAdded => "SubscriptionClientAdded",
            EventKind::SubscriptionClientRemoved => "SubscriptionClientRemoved",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Bus-delivered subscription management events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubscriptionEvent {
    SubscriptionAdded {
        subscription: Subscription,
    },

    SubscriptionRemoved {
        subscription: Subscription,
    },

    /// A client joined and wants the full subscription cache.
    SubscriptionClientAdded {
        control_address: EndpointAddress,
        client_id: ClientId,
    },

    SubscriptionClientRemoved {
        control_address: EndpointAddress,
        client_id: ClientId,
        correlation_id: CorrelationId,
    },
}

impl SubscriptionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SubscriptionEvent::SubscriptionAdded { .. } => EventKind::SubscriptionAdded,
            SubscriptionEvent::SubscriptionRemoved { .. } => EventKind::SubscriptionRemoved,
            SubscriptionEvent::SubscriptionClientAdded { .. } => EventKind::SubscriptionClientAdded,
            SubscriptionEvent::SubscriptionClientRemoved { .. } => {
                EventKind::SubscriptionClientRemoved
            }
        }
    }
}

/// Notifications pushed to a client's control address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    AddSubscription {
        subscription: Subscription,
    },

    RemoveSubscription {
        subscription: Subscription,
    },

    /// Full snapshot of every active subscription, sent on client join.
    SubscriptionRefresh {
        subscriptions: Vec<SubscriptionInformation>,
    },
}

impl Notification {
    pub fn name(&self) -> &'static str {
        match self {
            Notification::AddSubscription { .. } => "AddSubscription",
            Notification::RemoveSubscription { .. } => "RemoveSubscription",
            Notification::SubscriptionRefresh { .. } => "SubscriptionRefresh",
        }
    }
}

/// Per-send options. Every notification is tagged with its source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendContext {
    /// Address replies and follow-ups should go to.
    pub source: EndpointAddress,
}

/// A delivered notification as seen by the receiving endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub source: EndpointAddress,
    pub destination: EndpointAddress,
    pub message: Notification,
}
