// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Capability Token Manager
//!
//! Issues, validates, renews and revokes capability tokens, and runs the
//! referrer handshake that hands a fresh token to an external origin.
//!
//! # Issuance
//!
//! Token strings are random and inserted against the unique index; a
//! collision retries with a new string up to `token_retry_limit` times.
//! Check-then-insert is never used, so concurrent issuance cannot produce
//! duplicates.
//!
//! # Referrer handshake
//!
//! 1. Validate the referrer URL (https, or http towards loopback)
//! 2. Insert the token (a persistent token for the same referrer is reused
//!    with a new string)
//! 3. POST `token`, `hash_algorithm`, `action=create` to the referrer
//! 4. On any failure delete the token again and report
//!    `ReferrerHandshakeFailed`; on success return the redirect carrying the
//!    success hash
//!
//! Serverless (`sl`) tokens skip the POST and travel in the redirect itself.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::domain::component::{Component, ComponentId};
use crate::domain::content::ContentId;
use crate::domain::events::TokenEvent;
use crate::domain::platform_config::PlatformConfigSpec;
use crate::domain::referrer::{validate_referrer_url, HandshakeAction, HandshakeForm, ReferrerClient, ReferrerError};
use crate::domain::repository::{ComponentRepository, RepositoryError, TokenQuery, TokenRepository};
use crate::domain::token::{
    is_valid_token_string, AnchorFilter, CapabilityToken, HashAlgorithm, Intention, IntentionSet, Persist,
    TokenError, TokenExtra,
};
use crate::infrastructure::crypto::{digest_hex, random_token};
use crate::infrastructure::event_bus::EventBus;

#[derive(Debug, Clone)]
pub struct TokenSettings {
    pub token_size: usize,
    pub retry_limit: u32,
    pub hash_algorithm: HashAlgorithm,
    pub allow_insecure_http: bool,
    pub referrer_timeout: Duration,
}

impl TokenSettings {
    pub fn from_config(spec: &PlatformConfigSpec) -> Self {
        Self {
            token_size: spec.security.token_size,
            retry_limit: spec.security.token_retry_limit.max(1),
            hash_algorithm: HashAlgorithm::parse(&spec.security.hash_algorithm).unwrap_or_default(),
            allow_insecure_http: spec.referrer.allow_insecure_http,
            referrer_timeout: spec.referrer.timeout,
        }
    }
}

/// Parameters of a new token.
#[derive(Debug, Clone, Default)]
pub struct IssueRequest {
    pub content: Option<ContentId>,
    pub referrer: Option<String>,
    pub intentions: IntentionSet,
    /// Authorization strength reached by the requester.
    pub strength: u8,
    pub ids: Vec<ContentId>,
    pub payload: Option<String>,
    pub session_key: Option<String>,
}

/// Result of a successful referrer handshake.
#[derive(Debug, Clone)]
pub struct HandshakeOutcome {
    pub token: CapabilityToken,
    /// Success hash of the token; absent for serverless tokens.
    pub hash: Option<String>,
    /// Where to send the user agent.
    pub redirect: Url,
}

#[derive(Debug, Clone)]
pub struct RenewOutcome {
    pub token: CapabilityToken,
    pub referrer_notified: bool,
}

pub struct CapabilityTokenManager {
    tokens: Arc<dyn TokenRepository>,
    components: Arc<dyn ComponentRepository>,
    referrer: Arc<dyn ReferrerClient>,
    event_bus: Arc<EventBus>,
    settings: TokenSettings,
}

impl CapabilityTokenManager {
    pub fn new(
        tokens: Arc<dyn TokenRepository>,
        components: Arc<dyn ComponentRepository>,
        referrer: Arc<dyn ReferrerClient>,
        event_bus: Arc<EventBus>,
        settings: TokenSettings,
    ) -> Self {
        Self {
            tokens,
            components,
            referrer,
            event_bus,
            settings,
        }
    }

    pub fn settings(&self) -> &TokenSettings {
        &self.settings
    }

    /// Issue a token for `component`.
    pub async fn issue(&self, component: &Component, request: IssueRequest) -> Result<CapabilityToken, TokenError> {
        request.intentions.validate_for(component)?;
        let referrer = request
            .referrer
            .as_deref()
            .map(|raw| validate_referrer_url(raw, self.settings.allow_insecure_http))
            .transpose()?
            .map(String::from);

        let persist = if request.intentions.contains(Intention::Persist) {
            component.primary_anchor.map_or(Persist::Component, Persist::Anchored)
        } else {
            Persist::Ephemeral
        };
        let extra = TokenExtra {
            intentions: request.intentions,
            strength: request.strength,
            taint: false,
            ids: request.ids,
            payload: request.payload,
        };

        if let (true, Some(referrer)) = (persist.is_persistent(), referrer.as_deref()) {
            if let Some(mut existing) = self.tokens.find_persistent(component.id, referrer).await? {
                existing.extra = extra;
                existing.session_key = request.session_key;
                self.regenerate(&mut existing).await?;
                debug!(token = %existing.redacted(), "Reused persistent token");
                self.record_issued(&existing);
                return Ok(existing);
            }
        }

        let mut token = CapabilityToken::new(component.id, String::new(), persist, extra);
        token.content_id = request.content;
        token.referrer = referrer;
        token.session_key = request.session_key;
        self.insert_unique(&mut token).await?;
        self.record_issued(&token);
        Ok(token)
    }

    /// Look up a token and check it is usable for `intention`.
    pub async fn validate(
        &self,
        token: &str,
        intention: Option<Intention>,
    ) -> Result<(CapabilityToken, Component), TokenError> {
        if !is_valid_token_string(token) {
            return Err(TokenError::NotFound);
        }
        let record = self.tokens.find_by_token(token).await?.ok_or(TokenError::NotFound)?;
        let component = self
            .components
            .find_by_id(record.component_id)
            .await?
            .ok_or(TokenError::NotFound)?;

        if record.is_expired(&component, Utc::now()) {
            if let Err(e) = self.tokens.delete(record.id).await {
                warn!(token = %record.redacted(), error = %e, "Failed to drop expired token");
            }
            return Err(TokenError::Expired);
        }
        if let Some(intention) = intention {
            if !record.has_intention(intention) {
                return Err(TokenError::MissingIntention(intention));
            }
        }
        Ok((record, component))
    }

    /// Validate a token for a specific component.
    pub async fn validate_for(
        &self,
        component: ComponentId,
        token: &str,
        intention: Option<Intention>,
    ) -> Result<CapabilityToken, TokenError> {
        let (record, owner) = self.validate(token, intention).await?;
        if owner.id != component {
            return Err(TokenError::WrongComponent);
        }
        Ok(record)
    }

    /// Replace the token string. Non-serverless tokens bound to a referrer
    /// are pushed to it; a failed push taints the token but keeps the
    /// renewal.
    pub async fn renew(&self, token: &str) -> Result<RenewOutcome, TokenError> {
        let (mut record, _) = self.validate(token, None).await?;
        self.regenerate(&mut record).await?;

        let mut referrer_notified = false;
        if let (false, Some(referrer)) = (record.has_intention(Intention::Sl), record.referrer.clone()) {
            let form = self.form(&record, HandshakeAction::Renew);
            let pushed = match Url::parse(&referrer) {
                Ok(url) => self.push(&url, &form).await,
                Err(e) => Err(ReferrerError::Network(e.to_string())),
            };
            match pushed {
                Ok(()) => referrer_notified = true,
                Err(e) => {
                    warn!(token = %record.redacted(), error = %e, "Referrer rejected renewed token, tainting");
                    metrics::counter!("spider_referrer_handshake_failures_total", "reason" => e.reason()).increment(1);
                    record.extra.taint = true;
                    self.tokens.update(&record).await?;
                }
            }
        }

        self.event_bus.publish(TokenEvent::Renewed {
            token_id: record.id,
            referrer_notified,
            renewed_at: Utc::now(),
        });
        Ok(RenewOutcome {
            token: record,
            referrer_notified,
        })
    }

    /// Issue a token and hand it to the referrer.
    pub async fn handshake(&self, component: &Component, request: IssueRequest) -> Result<HandshakeOutcome, TokenError> {
        let raw = request
            .referrer
            .clone()
            .ok_or_else(|| TokenError::InvalidReferrer("missing referrer".to_string()))?;
        let mut url = validate_referrer_url(&raw, self.settings.allow_insecure_http)?;
        let serverless = request.intentions.is_serverless();
        let token = self.issue(component, request).await?;

        if serverless {
            url.query_pairs_mut().append_pair("token", &token.token);
            return Ok(HandshakeOutcome {
                token,
                hash: None,
                redirect: url,
            });
        }

        let form = self.form(&token, HandshakeAction::Create);
        if let Err(e) = self.push(&url, &form).await {
            if let Err(del) = self.tokens.delete(token.id).await {
                error!(token = %token.redacted(), error = %del, "Failed to roll back token after handshake failure");
            }
            metrics::counter!("spider_referrer_handshake_failures_total", "reason" => e.reason()).increment(1);
            self.event_bus.publish(TokenEvent::HandshakeFailed {
                component_id: component.id,
                reason: e.reason().to_string(),
                failed_at: Utc::now(),
            });
            info!(component_id = %component.id, referrer = %url, error = %e, "Referrer handshake failed");
            return Err(TokenError::ReferrerHandshakeFailed { reason: e.to_string() });
        }

        let hash = digest_hex(self.settings.hash_algorithm, token.token.as_bytes());
        url.query_pairs_mut()
            .append_pair("status", "success")
            .append_pair("hash", &hash);
        Ok(HandshakeOutcome {
            token,
            hash: Some(hash),
            redirect: url,
        })
    }

    /// Revoke a single token by its string.
    pub async fn revoke_token(&self, token: &str) -> Result<(), TokenError> {
        if !is_valid_token_string(token) {
            return Err(TokenError::NotFound);
        }
        let record = self.tokens.find_by_token(token).await?.ok_or(TokenError::NotFound)?;
        self.tokens.delete(record.id).await?;
        self.publish_revoked(1);
        Ok(())
    }

    /// Delete every token matching `query`.
    pub async fn revoke(&self, query: &TokenQuery) -> Result<u64, TokenError> {
        let count = self.tokens.delete_matching(query).await?;
        info!(count, "Revoked tokens");
        self.publish_revoked(count);
        Ok(count)
    }

    pub async fn revoke_for_referrer(&self, referrer: &str, anchor: AnchorFilter) -> Result<u64, TokenError> {
        let referrer = Url::parse(referrer).map_or_else(|_| referrer.to_string(), String::from);
        self.revoke(&TokenQuery {
            referrer: Some(referrer),
            anchor,
            ..TokenQuery::default()
        })
        .await
    }

    pub async fn revoke_oldest(
        &self,
        component: Option<ComponentId>,
        count: usize,
        anchor: AnchorFilter,
    ) -> Result<u64, TokenError> {
        self.revoke(&TokenQuery {
            component,
            anchor,
            oldest: Some(count),
            ..TokenQuery::default()
        })
        .await
    }

    /// Delete tokens created more than `days` days ago.
    pub async fn revoke_by_age(
        &self,
        component: Option<ComponentId>,
        days: u32,
        anchor: AnchorFilter,
    ) -> Result<u64, TokenError> {
        self.revoke(&TokenQuery {
            component,
            anchor,
            created_before: Utc::now().checked_sub_signed(chrono::Duration::days(i64::from(days))),
            ..TokenQuery::default()
        })
        .await
    }

    /// Delete expired ephemeral tokens (and tokens whose component is gone),
    /// of one component or of all.
    pub async fn purge_expired(&self, component: Option<ComponentId>) -> Result<u64, TokenError> {
        let now = Utc::now();
        let candidates = self
            .tokens
            .list(&TokenQuery {
                component,
                ..TokenQuery::default()
            })
            .await?;
        let mut components: HashMap<ComponentId, Option<Component>> = HashMap::new();
        let mut purged = 0;

        for token in candidates {
            if !components.contains_key(&token.component_id) {
                let component = self.components.find_by_id(token.component_id).await?;
                components.insert(token.component_id, component);
            }
            let expired = match components.get(&token.component_id) {
                Some(Some(component)) => token.is_expired(component, now),
                _ => true,
            };
            if expired {
                self.tokens.delete(token.id).await?;
                purged += 1;
            }
        }
        if purged > 0 {
            info!(purged, "Purged expired tokens");
            self.publish_revoked(purged);
        }
        Ok(purged)
    }

    async fn insert_unique(&self, token: &mut CapabilityToken) -> Result<(), TokenError> {
        for attempt in 1..=self.settings.retry_limit {
            token.token = random_token(self.settings.token_size);
            match self.tokens.insert(token).await {
                Ok(()) => return Ok(()),
                Err(RepositoryError::Conflict(_)) => {
                    debug!(attempt, "Token string collision, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        error!(
            component_id = %token.component_id,
            attempts = self.settings.retry_limit,
            "Could not create a unique token"
        );
        Err(TokenError::Creation {
            attempts: self.settings.retry_limit,
        })
    }

    async fn regenerate(&self, token: &mut CapabilityToken) -> Result<(), TokenError> {
        for attempt in 1..=self.settings.retry_limit {
            token.token = random_token(self.settings.token_size);
            token.created = Utc::now();
            match self.tokens.update(token).await {
                Ok(()) => return Ok(()),
                Err(RepositoryError::Conflict(_)) => {
                    debug!(attempt, "Token string collision on renewal, retrying");
                }
                Err(RepositoryError::NotFound(_)) => return Err(TokenError::NotFound),
                Err(e) => return Err(e.into()),
            }
        }
        error!(token_id = %token.id, attempts = self.settings.retry_limit, "Could not regenerate token");
        Err(TokenError::Creation {
            attempts: self.settings.retry_limit,
        })
    }

    fn form(&self, token: &CapabilityToken, action: HandshakeAction) -> HandshakeForm {
        HandshakeForm {
            token: token.token.clone(),
            hash_algorithm: self.settings.hash_algorithm.as_str().to_string(),
            action,
            payload: token.extra.payload.clone(),
        }
    }

    async fn push(&self, url: &Url, form: &HandshakeForm) -> Result<(), ReferrerError> {
        tokio::time::timeout(self.settings.referrer_timeout, self.referrer.post(url, form))
            .await
            .unwrap_or(Err(ReferrerError::Timeout))
    }

    fn record_issued(&self, token: &CapabilityToken) {
        let persistent = token.persist.is_persistent();
        metrics::counter!("spider_tokens_issued_total", "persistent" => persistent.to_string()).increment(1);
        self.event_bus.publish(TokenEvent::Issued {
            token_id: token.id,
            component_id: token.component_id,
            persistent,
            issued_at: Utc::now(),
        });
    }

    fn publish_revoked(&self, count: u64) {
        self.event_bus.publish(TokenEvent::Revoked {
            count,
            revoked_at: Utc::now(),
        });
    }
}
