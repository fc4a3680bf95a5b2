// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::component::ComponentId;
use crate::domain::content::ContentId;
use crate::domain::token::TokenId;
use crate::domain::travel::LoginProtection;
use crate::domain::user::UserId;

/// Authorization decisions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AuthorizationEvent {
    Decided {
        component_id: ComponentId,
        decision: String,
        strength: Option<u8>,
        decided_at: DateTime<Utc>,
    },
    LoginSucceeded {
        user_id: UserId,
        is_fake: bool,
        logged_in_at: DateTime<Utc>,
    },
}

/// Capability token lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TokenEvent {
    Issued {
        token_id: TokenId,
        component_id: ComponentId,
        persistent: bool,
        issued_at: DateTime<Utc>,
    },
    Renewed {
        token_id: TokenId,
        referrer_notified: bool,
        renewed_at: DateTime<Utc>,
    },
    Revoked {
        count: u64,
        revoked_at: DateTime<Utc>,
    },
    HandshakeFailed {
        component_id: ComponentId,
        reason: String,
        failed_at: DateTime<Utc>,
    },
}

/// Travel protection triggers and deletions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TravelEvent {
    Triggered {
        overlay_id: ContentId,
        owner: UserId,
        policy: LoginProtection,
        triggered_at: DateTime<Utc>,
    },
    Deactivated {
        overlay_id: ContentId,
        deactivated_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ComponentEvent {
    ProtectionsChanged {
        component_id: ComponentId,
        strength: u8,
        changed_at: DateTime<Utc>,
    },
    DeletionRequested {
        component_id: ComponentId,
        requested_at: DateTime<Utc>,
    },
    Deleted {
        component_id: ComponentId,
        deleted_at: DateTime<Utc>,
    },
    ContentDeleted {
        content_id: ContentId,
        deleted_at: DateTime<Utc>,
    },
}
