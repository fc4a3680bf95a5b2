// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0

// Event Bus
//
// Services publish domain events on a tokio broadcast channel. The server
// attaches the security log below; events published while nobody listens
// are dropped.

use crate::domain::events::{AuthorizationEvent, ComponentEvent, TokenEvent, TravelEvent};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SpiderEvent {
    Authorization(AuthorizationEvent),
    Token(TokenEvent),
    Travel(TravelEvent),
    Component(ComponentEvent),
}

impl From<AuthorizationEvent> for SpiderEvent {
    fn from(event: AuthorizationEvent) -> Self {
        Self::Authorization(event)
    }
}

impl From<TokenEvent> for SpiderEvent {
    fn from(event: TokenEvent) -> Self {
        Self::Token(event)
    }
}

impl From<TravelEvent> for SpiderEvent {
    fn from(event: TravelEvent) -> Self {
        Self::Travel(event)
    }
}

impl From<ComponentEvent> for SpiderEvent {
    fn from(event: ComponentEvent) -> Self {
        Self::Component(event)
    }
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SpiderEvent>,
}

impl EventBus {
    /// `capacity` events are buffered per subscriber before it lags.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: impl Into<SpiderEvent>) {
        let event = event.into();
        if self.sender.send(event).is_err() {
            debug!("Event dropped, no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SpiderEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Log the security relevant events of `bus` until every publisher is gone.
///
/// Subscribes before returning, so nothing published afterwards is missed.
/// The task yields the number of events it logged.
pub fn spawn_security_log(bus: &EventBus) -> JoinHandle<u64> {
    let mut receiver = bus.subscribe();
    tokio::spawn(async move {
        let mut logged = 0;
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    if log_security_event(&event) {
                        logged += 1;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Security log lagged behind the event bus");
                }
                Err(RecvError::Closed) => break,
            }
        }
        logged
    })
}

fn log_security_event(event: &SpiderEvent) -> bool {
    match event {
        SpiderEvent::Travel(TravelEvent::Triggered {
            overlay_id,
            owner,
            policy,
            ..
        }) => {
            warn!(overlay_id = %overlay_id, owner = %owner, policy = %policy, "Travel protection triggered");
        }
        SpiderEvent::Travel(TravelEvent::Deactivated { overlay_id, .. }) => {
            info!(overlay_id = %overlay_id, "Travel protection deactivated");
        }
        SpiderEvent::Token(TokenEvent::HandshakeFailed {
            component_id, reason, ..
        }) => {
            warn!(component_id = %component_id, reason = %reason, "Referrer handshake failed");
        }
        SpiderEvent::Authorization(AuthorizationEvent::LoginSucceeded { user_id, is_fake: true, .. }) => {
            warn!(user_id = %user_id, "Decoy login served");
        }
        SpiderEvent::Component(ComponentEvent::Deleted { component_id, .. }) => {
            info!(component_id = %component_id, "Component deleted");
        }
        _ => return false,
    }
    true
}
