// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Travel Service
//!
//! Manages travel protection overlays and dispatches their login policy.
//!
//! # Login dispatch
//!
//! | Policy | Effect | Login continues |
//! |--------|--------|-----------------|
//! | `none` | nothing | yes |
//! | `fake_login` | session switches to the decoy login gate; shielded set hidden from it | yes |
//! | `hide` / `trigger_hide` | overlay content flagged hidden; shielded set unlisted | yes |
//! | `disable` / `trigger_disable` | every non-reserved component of the owner locked down | no |
//! | `wipe` | shielded contents, then shielded components deleted | no |
//! | `wipe_user` | account deleted | no |
//!
//! Storage failures while looking up or applying overlays are logged and
//! never surface to the login caller.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::application::component_service::ComponentService;
use crate::application::content_service::{ContentService, ContentServiceError};
use crate::domain::auth::SessionState;
use crate::domain::component::ComponentId;
use crate::domain::content::{ContentId, HIDDEN_FLAG};
use crate::domain::events::TravelEvent;
use crate::domain::info::InfoUpdate;
use crate::domain::repository::{ComponentRepository, ContentRepository, TravelRepository, UserRepository};
use crate::domain::travel::{LoginProtection, ShieldTarget, TravelError, TravelProtection};
use crate::domain::user::UserId;
use crate::infrastructure::crypto::salted_hash;
use crate::infrastructure::event_bus::EventBus;

const TRIGGER_PURPOSE: &str = "travel-trigger";
const SELF_PROTECTION_PURPOSE: &str = "travel-self";

/// Content variant backing an overlay.
pub const TRAVEL_VARIANT: &str = "travel";

/// What the login flow must do after the travel dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginDirective {
    pub continue_login: bool,
    pub fake_login: bool,
    pub triggered: Vec<LoginProtection>,
}

pub struct TravelService {
    travel: Arc<dyn TravelRepository>,
    components: Arc<dyn ComponentRepository>,
    contents: Arc<dyn ContentRepository>,
    users: Arc<dyn UserRepository>,
    component_service: Arc<ComponentService>,
    content_service: Arc<ContentService>,
    event_bus: Arc<EventBus>,
    secret_key: String,
    max_trigger_passwords: usize,
}

impl TravelService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        travel: Arc<dyn TravelRepository>,
        components: Arc<dyn ComponentRepository>,
        contents: Arc<dyn ContentRepository>,
        users: Arc<dyn UserRepository>,
        component_service: Arc<ComponentService>,
        content_service: Arc<ContentService>,
        event_bus: Arc<EventBus>,
        secret_key: String,
        max_trigger_passwords: usize,
    ) -> Self {
        Self {
            travel,
            components,
            contents,
            users,
            component_service,
            content_service,
            event_bus,
            secret_key,
            max_trigger_passwords,
        }
    }

    /// Salted hash a trigger password is stored as. Passwords entered during
    /// a session are hashed the same way into `SessionState::password_hashes`.
    pub fn trigger_hash(&self, password: &str) -> String {
        salted_hash(&self.secret_key, TRIGGER_PURPOSE, password)
    }

    pub fn self_protection_hash(&self, secret: &str) -> String {
        salted_hash(&self.secret_key, SELF_PROTECTION_PURPOSE, secret)
    }

    /// Create an inactive overlay backed by a new content item in `component`.
    pub async fn create_overlay(
        &self,
        owner: UserId,
        component: ComponentId,
        name: &str,
        policy: LoginProtection,
    ) -> Result<TravelProtection, ContentServiceError> {
        let content = self.content_service.create(component, TRAVEL_VARIANT, name).await?;
        let overlay = TravelProtection::new(content.id, owner, component, policy);
        self.travel.save(&overlay).await?;
        info!(overlay_id = %overlay.id, policy = %policy, "Created travel overlay");
        Ok(overlay)
    }

    pub async fn get(&self, id: ContentId) -> Result<TravelProtection, TravelError> {
        self.travel.find_by_id(id).await?.ok_or(TravelError::NotFound)
    }

    /// Validate and persist an edited overlay.
    pub async fn save(&self, overlay: &TravelProtection) -> Result<(), TravelError> {
        overlay.validate(self.max_trigger_passwords)?;
        self.travel.save(overlay).await?;
        Ok(())
    }

    /// Replace the trigger passwords of an overlay (stored hashed).
    pub async fn set_trigger_passwords(&self, id: ContentId, passwords: &[&str]) -> Result<TravelProtection, TravelError> {
        let mut overlay = self.get(id).await?;
        overlay.trigger_hashes = passwords.iter().map(|p| self.trigger_hash(p)).collect();
        self.save(&overlay).await?;
        Ok(overlay)
    }

    pub async fn set_self_protection(&self, id: ContentId, secret: Option<&str>) -> Result<TravelProtection, TravelError> {
        let mut overlay = self.get(id).await?;
        overlay.self_protection_hash = secret.map(|s| self.self_protection_hash(s));
        self.save(&overlay).await?;
        Ok(overlay)
    }

    pub async fn activate(&self, id: ContentId) -> Result<TravelProtection, TravelError> {
        let mut overlay = self.get(id).await?;
        overlay.activate(self.max_trigger_passwords)?;
        self.travel.save(&overlay).await?;
        info!(overlay_id = %id, policy = %overlay.login_protection, "Travel overlay activated");
        Ok(overlay)
    }

    /// Deactivate with the clear-text self-protection secret, if any.
    pub async fn deactivate(&self, id: ContentId, secret: Option<&str>) -> Result<TravelProtection, TravelError> {
        let mut overlay = self.get(id).await?;
        let secret_hash = secret.map(|s| self.self_protection_hash(s));
        overlay.deactivate(secret_hash.as_deref())?;
        self.travel.save(&overlay).await?;
        self.set_hidden(overlay.id, false).await;
        self.event_bus.publish(TravelEvent::Deactivated {
            overlay_id: id,
            deactivated_at: Utc::now(),
        });
        info!(overlay_id = %id, "Travel overlay deactivated");
        Ok(overlay)
    }

    /// Overlays of `owner` that apply to this session right now.
    ///
    /// Lookup failures are logged and yield no overlay.
    pub async fn get_active_for_session(
        &self,
        owner: UserId,
        session: &SessionState,
        now: DateTime<Utc>,
    ) -> Vec<TravelProtection> {
        match self.travel.list_by_owner(owner).await {
            Ok(overlays) => overlays
                .into_iter()
                .filter(|o| o.applies_to_session(&session.password_hashes, now))
                .collect(),
            Err(e) => {
                warn!(owner = %owner, error = %e, "Failed to load travel overlays");
                Vec::new()
            }
        }
    }

    /// True if an applying hide overlay shields `target`; in a decoy session
    /// fake-login overlays shield too. The overlay's own backing content
    /// counts as shielded.
    pub async fn is_hidden(&self, owner: UserId, session: &SessionState, target: ShieldTarget) -> bool {
        self.get_active_for_session(owner, session, Utc::now())
            .await
            .iter()
            .any(|o| {
                let hiding = o.login_protection.hides()
                    || (session.is_fake && o.login_protection == LoginProtection::FakeLogin);
                hiding && (o.shields.contains(&target) || target == ShieldTarget::Content(o.id))
            })
    }

    /// Run the login policy of every overlay applying to the session.
    pub async fn on_login(&self, owner: UserId, session: &SessionState) -> LoginDirective {
        let mut directive = LoginDirective {
            continue_login: true,
            ..LoginDirective::default()
        };

        for overlay in self.get_active_for_session(owner, session, Utc::now()).await {
            let policy = overlay.login_protection;
            if policy == LoginProtection::None {
                continue;
            }
            metrics::counter!("spider_travel_triggers_total", "policy" => policy.as_str()).increment(1);
            self.event_bus.publish(TravelEvent::Triggered {
                overlay_id: overlay.id,
                owner,
                policy,
                triggered_at: Utc::now(),
            });
            directive.triggered.push(policy);
            warn!(overlay_id = %overlay.id, owner = %owner, policy = %policy, "Travel overlay triggered on login");

            match policy {
                LoginProtection::None => {}
                LoginProtection::FakeLogin => directive.fake_login = true,
                LoginProtection::Hide | LoginProtection::TriggerHide => {
                    self.set_hidden(overlay.id, true).await;
                }
                LoginProtection::Disable | LoginProtection::TriggerDisable => {
                    self.lockdown(owner, &overlay).await;
                    directive.continue_login = false;
                }
                LoginProtection::Wipe => {
                    self.wipe(&overlay).await;
                    directive.continue_login = false;
                }
                LoginProtection::WipeUser => {
                    if let Err(e) = self.users.delete(owner).await {
                        error!(owner = %owner, error = %e, "Failed to wipe user");
                    }
                    directive.continue_login = false;
                    break;
                }
            }
        }
        directive
    }

    async fn set_hidden(&self, content: ContentId, hidden: bool) {
        let update = if hidden { InfoUpdate::Flag } else { InfoUpdate::Remove };
        if let Err(e) = self
            .content_service
            .update_info(content, vec![(HIDDEN_FLAG.to_string(), update)])
            .await
        {
            warn!(content_id = %content, error = %e, "Failed to update overlay visibility");
        }
    }

    /// Lock down every non-reserved component of `owner` and hide the
    /// shielded contents.
    async fn lockdown(&self, owner: UserId, overlay: &TravelProtection) {
        match self.components.list_by_owner(owner).await {
            Ok(components) => {
                for component in components.iter().filter(|c| !c.is_reserved()) {
                    if let Err(e) = self.component_service.lockdown(component.id).await {
                        error!(component_id = %component.id, error = %e, "Failed to lock down component");
                    }
                }
            }
            Err(e) => error!(owner = %owner, error = %e, "Failed to list components for lockdown"),
        }
        for target in &overlay.shields {
            if let ShieldTarget::Content(id) = *target {
                self.set_hidden(id, true).await;
            }
        }
    }

    /// Delete shielded contents first, then shielded components. Each
    /// deletion is attempted even if an earlier one failed.
    async fn wipe(&self, overlay: &TravelProtection) {
        let (contents, components): (BTreeSet<_>, BTreeSet<_>) = overlay
            .shields
            .iter()
            .partition(|target| matches!(target, ShieldTarget::Content(_)));

        for target in contents {
            if let ShieldTarget::Content(id) = target {
                if let Err(e) = self.contents.delete(id).await {
                    error!(content_id = %id, error = %e, "Failed to wipe content");
                }
            }
        }
        for target in components {
            if let ShieldTarget::Component(id) = target {
                if let Err(e) = self.components.delete(id).await {
                    error!(component_id = %id, error = %e, "Failed to wipe component");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::content::ContentVariantRegistry;
    use crate::domain::platform_config::PlatformConfigSpec;
    use crate::infrastructure::protections::builtin_catalog;
    use crate::infrastructure::repositories::InMemoryStore;

    fn services(store: &InMemoryStore) -> (Arc<ComponentService>, TravelService) {
        let spec = PlatformConfigSpec::default();
        let event_bus = Arc::new(EventBus::default());
        let components = Arc::new(ComponentService::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(builtin_catalog(&spec, "secret").unwrap()),
            event_bus.clone(),
            spec.security.min_login_strength,
            spec.security.default_token_ttl,
            spec.deletion.clone(),
        ));
        let contents = Arc::new(ContentService::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(ContentVariantRegistry::with_builtin()),
        ));
        let travel = TravelService::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            components.clone(),
            contents,
            event_bus,
            "secret".to_string(),
            spec.travel.max_trigger_passwords,
        );
        (components, travel)
    }

    #[tokio::test]
    async fn test_trigger_hide_applies_only_to_triggering_session() {
        let store = InMemoryStore::new();
        let (components, travel) = services(&store);
        let user = components.signup("tess").await.unwrap();
        let secret = components.create_component(user.id, "secret").await.unwrap();
        let holder = components.create_component(user.id, "trips").await.unwrap();

        let mut overlay = travel
            .create_overlay(user.id, holder.id, "border", LoginProtection::TriggerHide)
            .await
            .unwrap();
        overlay.shields.insert(ShieldTarget::Component(secret.id));
        overlay.trigger_hashes.insert(travel.trigger_hash("duress"));
        travel.save(&overlay).await.unwrap();
        travel.activate(overlay.id).await.unwrap();

        let plain = SessionState::default();
        let mut triggered = SessionState::default();
        triggered.password_hashes.insert(travel.trigger_hash("duress"));

        let target = ShieldTarget::Component(secret.id);
        assert!(!travel.is_hidden(user.id, &plain, target).await);
        assert!(travel.is_hidden(user.id, &triggered, target).await);

        let directive = travel.on_login(user.id, &triggered).await;
        assert!(directive.continue_login);
        assert_eq!(directive.triggered, vec![LoginProtection::TriggerHide]);
    }

    #[tokio::test]
    async fn test_trigger_policy_cannot_activate_without_secret() {
        let store = InMemoryStore::new();
        let (components, travel) = services(&store);
        let user = components.signup("uma").await.unwrap();
        let holder = components.create_component(user.id, "trips").await.unwrap();
        let overlay = travel
            .create_overlay(user.id, holder.id, "border", LoginProtection::TriggerDisable)
            .await
            .unwrap();

        let err = travel.activate(overlay.id).await.unwrap_err();
        assert!(matches!(err, TravelError::MissingSecret(_)));
        assert!(!travel.get(overlay.id).await.unwrap().active);
    }

    #[tokio::test]
    async fn test_disable_locks_down_and_stops_login() {
        let store = InMemoryStore::new();
        let (components, travel) = services(&store);
        let user = components.signup("vic").await.unwrap();
        let shielded = components.create_component(user.id, "photos").await.unwrap();
        components.set_public(shielded.id, true).await.unwrap();
        let sibling = components.create_component(user.id, "notes").await.unwrap();
        components.set_public(sibling.id, true).await.unwrap();
        let holder = components.create_component(user.id, "trips").await.unwrap();

        let mut overlay = travel
            .create_overlay(user.id, holder.id, "border", LoginProtection::Disable)
            .await
            .unwrap();
        overlay.shields.insert(ShieldTarget::Component(shielded.id));
        travel.save(&overlay).await.unwrap();
        travel.activate(overlay.id).await.unwrap();

        let directive = travel.on_login(user.id, &SessionState::default()).await;
        assert!(!directive.continue_login);
        for id in [shielded.id, sibling.id] {
            let locked = components.get(id).await.unwrap();
            assert!(!locked.public, "{} still public", locked.name);
            assert!(locked.required_passes >= 1);
        }
    }

    #[tokio::test]
    async fn test_deactivate_requires_secret() {
        let store = InMemoryStore::new();
        let (components, travel) = services(&store);
        let user = components.signup("walt").await.unwrap();
        let holder = components.create_component(user.id, "trips").await.unwrap();
        let overlay = travel
            .create_overlay(user.id, holder.id, "border", LoginProtection::FakeLogin)
            .await
            .unwrap();
        travel.set_self_protection(overlay.id, Some("home-again")).await.unwrap();
        travel.activate(overlay.id).await.unwrap();

        assert!(matches!(
            travel.deactivate(overlay.id, Some("wrong")).await,
            Err(TravelError::SecretMismatch)
        ));
        let overlay = travel.deactivate(overlay.id, Some("home-again")).await.unwrap();
        assert!(!overlay.active);
    }
}
