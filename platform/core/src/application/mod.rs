// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0

pub mod access_service;
pub mod bootstrap;
pub mod component_service;
pub mod content_service;
pub mod repository_factory;
pub mod token_manager;
pub mod travel_service;

// Re-export services for convenience
pub use access_service::{AccessError, AccessGrant, AccessService, LoginOutcome};
pub use bootstrap::{reconcile_catalog, MaintenanceReport, SpiderServices};
pub use component_service::{ComponentService, ComponentServiceError, DeletionOutcome, PurgeReport};
pub use content_service::{ContentService, ContentServiceError};
pub use token_manager::{CapabilityTokenManager, HandshakeOutcome, IssueRequest, RenewOutcome, TokenSettings};
pub use travel_service::{LoginDirective, TravelService};
