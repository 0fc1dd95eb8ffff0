//! Notification sink for dispatch events.
//!
//! The engine reports every state transition through a [`Notifier`] so that
//! UI and email delivery can react. Notification is fire-and-forget: a
//! failing sink is logged and swallowed, never rolling back the transition
//! that produced the event.

#![warn(missing_docs)]

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;
use tutti_core::{MusicianId, NeedId, ProjectId, RequestId};

/// A state transition worth telling the outside world about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DispatchEvent {
    /// A request went out to a musician.
    RequestSent {
        /// The new request
        request_id: RequestId,
        /// Its need
        need_id: NeedId,
        /// Contacted musician
        musician_id: MusicianId,
        /// Response token string for the outbound message
        token: String,
    },
    /// A musician accepted.
    RequestAccepted {
        /// The accepted request
        request_id: RequestId,
        /// Its need
        need_id: NeedId,
        /// Responding musician
        musician_id: MusicianId,
    },
    /// A musician declined.
    RequestDeclined {
        /// The declined request
        request_id: RequestId,
        /// Its need
        need_id: NeedId,
        /// Responding musician
        musician_id: MusicianId,
    },
    /// A request's response window elapsed.
    RequestTimedOut {
        /// The expired request
        request_id: RequestId,
        /// Its need
        need_id: NeedId,
        /// Unresponsive musician
        musician_id: MusicianId,
    },
    /// A pending request was withdrawn because its need filled.
    RequestCancelled {
        /// The cancelled request
        request_id: RequestId,
        /// Its need
        need_id: NeedId,
        /// Released musician
        musician_id: MusicianId,
    },
    /// A need reached its quantity.
    NeedCompleted {
        /// The completed need
        need_id: NeedId,
        /// Its project
        project_id: ProjectId,
    },
}

/// Fire-and-forget event sink.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver an event. Implementations must not fail the caller; delivery
    /// problems are theirs to log and absorb.
    async fn notify(&self, event: DispatchEvent);
}

/// Notifier that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, _event: DispatchEvent) {}
}

/// Notifier that POSTs each event as JSON to a webhook URL.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    /// Create a notifier targeting `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: DispatchEvent) {
        let result = self.client.post(&self.url).json(&event).send().await;
        match result {
            Ok(response) if !response.status().is_success() => {
                warn!(status = %response.status(), "webhook rejected dispatch event");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "webhook delivery failed");
            }
        }
    }
}

/// Notifier that records events in memory, for tests.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: std::sync::Mutex<Vec<DispatchEvent>>,
}

impl RecordingNotifier {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything notified so far, in order.
    pub fn events(&self) -> Vec<DispatchEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: DispatchEvent) {
        self.events.lock().unwrap().push(event);
    }
}
