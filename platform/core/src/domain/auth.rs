// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Request context handed to protection kinds.
//!
//! [`AuthRequest`] is a transport-neutral snapshot of an incoming request:
//! submitted fields, caller identity, client address and the session. The
//! presentation layer builds it from the HTTP request; tests build it directly.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::domain::protection::ProtectionCode;
use crate::domain::user::UserId;

/// Which protections of a component the caller wants evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectionSelection {
    /// Every enabled protection.
    #[default]
    All,
    /// Only the listed codes (side-effect kinds always run).
    Only(BTreeSet<ProtectionCode>),
    /// `protection=false`: never grant, only run side effects.
    Preview,
}

impl ProtectionSelection {
    /// Build from the repeatable `protection` query parameter.
    pub fn from_query_values<'a>(values: impl IntoIterator<Item = &'a str>) -> Self {
        let mut codes = BTreeSet::new();
        for value in values {
            if value == "false" {
                return Self::Preview;
            }
            if !value.is_empty() {
                codes.insert(ProtectionCode::new(value));
            }
        }
        if codes.is_empty() {
            Self::All
        } else {
            Self::Only(codes)
        }
    }

    pub fn is_preview(&self) -> bool {
        matches!(self, Self::Preview)
    }
}

/// Per-session state that survives between requests. Kept on the server;
/// clients only hold the session id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    /// Server-issued session id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Expected answer of the last issued captcha.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captcha_solution: Option<String>,
    /// Salted hashes of passwords entered during this session.
    #[serde(default)]
    pub password_hashes: BTreeSet<String>,
    /// Set when a fake login replaced the real root component.
    #[serde(default)]
    pub is_fake: bool,
    /// Set while a travel overlay applies to this session.
    #[serde(default)]
    pub is_travel_protected: bool,
}

/// One incoming authorization attempt.
#[derive(Debug, Clone, Default)]
pub struct AuthRequest {
    /// Authenticated platform user, if any.
    pub identity: Option<UserId>,
    pub client_ip: Option<IpAddr>,
    /// Submitted form and query fields; fields may repeat.
    pub fields: BTreeMap<String, Vec<String>>,
    pub session: SessionState,
}

impl AuthRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identity(mut self, identity: UserId) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn with_client_ip(mut self, ip: IpAddr) -> Self {
        self.client_ip = Some(ip);
        self
    }

    pub fn with_field(mut self, name: &str, value: &str) -> Self {
        self.fields
            .entry(name.to_string())
            .or_default()
            .push(value.to_string());
        self
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn field_values(&self, name: &str) -> &[String] {
        self.fields.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Stable key identifying the caller for rate limiting.
    ///
    /// The session never counts: a caller can always open a new one.
    /// Callers without identity and address share one bucket.
    pub fn caller_key(&self) -> String {
        match (&self.identity, &self.client_ip) {
            (Some(user), _) => format!("user:{user}"),
            (None, Some(ip)) => format!("ip:{ip}"),
            (None, None) => "anonymous".to_string(),
        }
    }
}
