// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Domain layer: aggregates, invariants and repository contracts.

pub mod auth;
pub mod authorization;
pub mod catalog;
pub mod component;
pub mod content;
pub mod events;
pub mod info;
pub mod platform_config;
pub mod protection;
pub mod referrer;
pub mod repository;
pub mod strength;
pub mod token;
pub mod travel;
pub mod user;
