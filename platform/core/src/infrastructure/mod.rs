// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0

pub mod crypto;
pub mod db;
pub mod event_bus;
pub mod protections;
pub mod referrer_client;
pub mod repositories;
pub mod session_store;

pub use event_bus::{spawn_security_log, EventBus, SpiderEvent};
pub use referrer_client::HttpReferrerClient;
pub use repositories::Repositories;
pub use session_store::SessionStore;
