// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Spider core
//!
//! Protection chain evaluation, capability tokens and travel overlays of the
//! spider content platform.
//!
//! # Architecture
//!
//! - **domain:** aggregates, the authorization engine, repository traits
//! - **application:** use-case services wiring repositories and the engine
//! - **infrastructure:** storage backends, protection kinds, HTTP client
//! - **presentation:** axum router

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
