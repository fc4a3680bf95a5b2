// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Referrer handshake port.
//!
//! The token manager pushes tokens to external origins through
//! [`ReferrerClient`]; `crate::infrastructure::referrer_client` provides the
//! HTTP implementation.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use url::{Host, Url};

use crate::domain::token::TokenError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReferrerError {
    #[error("referrer unreachable: {0}")]
    Network(String),

    #[error("referrer timed out")]
    Timeout,

    #[error("referrer answered with status {0}")]
    Status(u16),

    #[error("too many failed handshakes with {0}")]
    RateLimited(String),
}

impl ReferrerError {
    pub fn reason(&self) -> &'static str {
        match self {
            ReferrerError::Network(_) => "network",
            ReferrerError::Timeout => "timeout",
            ReferrerError::Status(_) => "status",
            ReferrerError::RateLimited(_) => "rate_limited",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HandshakeAction {
    Create,
    Renew,
}

/// Form body of the server-to-server POST.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandshakeForm {
    pub token: String,
    pub hash_algorithm: String,
    pub action: HandshakeAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

#[async_trait]
pub trait ReferrerClient: Send + Sync {
    /// POST the form to `url`; only a 2xx answer is a success.
    async fn post(&self, url: &Url, form: &HandshakeForm) -> Result<(), ReferrerError>;
}

/// Parse and check a referrer URL: absolute `https`, or `http` towards a
/// loopback host (any host when `allow_insecure_http`), without fragment.
pub fn validate_referrer_url(raw: &str, allow_insecure_http: bool) -> Result<Url, TokenError> {
    let url = Url::parse(raw).map_err(|e| TokenError::InvalidReferrer(format!("{raw}: {e}")))?;
    if url.fragment().is_some() {
        return Err(TokenError::InvalidReferrer(format!("{raw}: fragments are not allowed")));
    }
    if url.cannot_be_a_base() || url.host().is_none() {
        return Err(TokenError::InvalidReferrer(format!("{raw}: not an absolute url")));
    }
    match url.scheme() {
        "https" => Ok(url),
        "http" if allow_insecure_http || is_loopback(&url) => Ok(url),
        scheme => Err(TokenError::InvalidReferrer(format!("{raw}: scheme '{scheme}' not allowed"))),
    }
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}
