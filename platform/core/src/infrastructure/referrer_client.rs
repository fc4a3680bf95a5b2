// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0

//! HTTP referrer client
//!
//! Server-to-server POST used by the referrer handshake.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Push capability tokens to external origins
//! - **Integration:** Token manager → `ReferrerClient` → referrer endpoint
//!
//! Every request carries an explicit timeout. Network errors, timeouts and
//! 5xx answers are counted per host; once a host exceeds the configured
//! error rate it is skipped until the quota refills.

use std::num::NonZeroU32;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use governor::clock::{Clock, DefaultClock};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use reqwest::Client;
use tracing::{debug, info};
use url::Url;

use crate::domain::platform_config::ReferrerConfig;
use crate::domain::referrer::{HandshakeForm, ReferrerClient, ReferrerError};

pub struct HttpReferrerClient {
    client: Client,
    errors: DefaultKeyedRateLimiter<String>,
    clock: DefaultClock,
    blocked_until: DashMap<String, Instant>,
}

impl HttpReferrerClient {
    pub fn new(config: &ReferrerConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        let per_hour = NonZeroU32::new(config.error_rate_per_hour).unwrap_or(NonZeroU32::MIN);
        Ok(Self {
            client,
            errors: RateLimiter::keyed(Quota::per_hour(per_hour)),
            clock: DefaultClock::default(),
            blocked_until: DashMap::new(),
        })
    }

    fn check_blocked(&self, host: &str) -> Result<(), ReferrerError> {
        let blocked = match self.blocked_until.get(host) {
            Some(until) => *until > Instant::now(),
            None => return Ok(()),
        };
        if blocked {
            return Err(ReferrerError::RateLimited(host.to_string()));
        }
        self.blocked_until.remove(host);
        Ok(())
    }

    fn record_failure(&self, host: &str) {
        if let Err(not_until) = self.errors.check_key(&host.to_string()) {
            let wait = not_until.wait_time_from(self.clock.now());
            info!(host, wait_secs = wait.as_secs(), "Referrer host exceeded its error rate");
            self.blocked_until.insert(host.to_string(), Instant::now() + wait);
        }
    }
}

#[async_trait]
impl ReferrerClient for HttpReferrerClient {
    async fn post(&self, url: &Url, form: &HandshakeForm) -> Result<(), ReferrerError> {
        let host = url.host_str().unwrap_or_default().to_string();
        self.check_blocked(&host)?;

        debug!(%host, action = ?form.action, "Posting token to referrer");
        let result = self.client.post(url.clone()).form(form).send().await;
        let error = match result {
            Ok(response) if response.status().is_success() => return Ok(()),
            Ok(response) => {
                let status = response.status();
                if !status.is_server_error() {
                    return Err(ReferrerError::Status(status.as_u16()));
                }
                ReferrerError::Status(status.as_u16())
            }
            Err(e) if e.is_timeout() => ReferrerError::Timeout,
            Err(e) => ReferrerError::Network(e.to_string()),
        };
        self.record_failure(&host);
        Err(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::referrer::HandshakeAction;
    use mockito::Matcher;
    use std::time::Duration;

    fn config(error_rate_per_hour: u32) -> ReferrerConfig {
        ReferrerConfig {
            timeout: Duration::from_secs(5),
            allow_insecure_http: false,
            error_rate_per_hour,
        }
    }

    fn form() -> HandshakeForm {
        HandshakeForm {
            token: "abc".to_string(),
            hash_algorithm: "sha256".to_string(),
            action: HandshakeAction::Create,
            payload: None,
        }
    }

    #[tokio::test]
    async fn test_posts_form_encoded_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("token".into(), "abc".into()),
                Matcher::UrlEncoded("hash_algorithm".into(), "sha256".into()),
                Matcher::UrlEncoded("action".into(), "create".into()),
            ]))
            .with_status(200)
            .create_async()
            .await;

        let client = HttpReferrerClient::new(&config(20)).unwrap();
        let url = Url::parse(&format!("{}/hook", server.url())).unwrap();
        client.post(&url, &form()).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_success_status() {
        let mut server = mockito::Server::new_async().await;
        server.mock("POST", "/hook").with_status(404).create_async().await;

        let client = HttpReferrerClient::new(&config(20)).unwrap();
        let url = Url::parse(&format!("{}/hook", server.url())).unwrap();
        assert_eq!(client.post(&url, &form()).await, Err(ReferrerError::Status(404)));
    }

    #[tokio::test]
    async fn test_error_rate_blocks_host() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .with_status(500)
            .expect(2)
            .create_async()
            .await;

        let client = HttpReferrerClient::new(&config(1)).unwrap();
        let url = Url::parse(&format!("{}/hook", server.url())).unwrap();
        assert_eq!(client.post(&url, &form()).await, Err(ReferrerError::Status(500)));
        assert_eq!(client.post(&url, &form()).await, Err(ReferrerError::Status(500)));
        assert!(matches!(
            client.post(&url, &form()).await,
            Err(ReferrerError::RateLimited(_))
        ));
        mock.assert_async().await;
    }
}
