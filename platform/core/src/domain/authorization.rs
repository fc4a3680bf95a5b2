// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Authorization Engine
//!
//! Evaluates the assigned protections of a component against one request and
//! reduces the individual outcomes to an [`AuthDecision`].
//!
//! ## Algorithm
//!
//! 1. Select the assignments whose kind matches `ptype` and whose state is
//!    not `disabled`. An explicit allowlist narrows the selection; kinds with
//!    the `side_effects` flag are always kept.
//! 2. Clamp the required passes: a positive request becomes
//!    `max(min(requested, countable), 1)` where `countable` excludes
//!    instant-fail and `no_count` assignments. Otherwise authentication
//!    needs one pass and access control none.
//! 3. Evaluate every selected assignment in ascending code order.
//!    * instant-fail: a non-pass blocks the decision, a pass only raises
//!      the maximum strength.
//!    * `no_count`: a pass only raises the maximum strength.
//!    * others: a pass decrements the remaining count.
//!    * a disguise request aborts the evaluation immediately.
//! 4. Decide: granted once the remaining count reaches zero and nothing
//!    blocked; otherwise pending forms if any were produced (or a password
//!    kind ran), else denied.
//!
//! All selected assignments are evaluated before deciding, so the response
//! time does not reveal how far an attempt got.
//!
//! A kind that errors or panics is logged and counted as a failure.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::auth::{AuthRequest, ProtectionSelection};
use crate::domain::catalog::ProtectionCatalog;
use crate::domain::component::Component;
use crate::domain::protection::{
    AssignedProtection, AssignmentId, AuditEntry, ChallengeForm, ProtectionCode, ProtectionKind,
    ProtectionOutcome, ProtectionType,
};

/// Overall result of one evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum AuthDecision {
    Granted { strength: u8 },
    Denied,
    /// Retryable: the caller must resubmit with the listed challenges answered.
    PendingForms { forms: Vec<ChallengeForm> },
    /// Respond as if the target did not exist.
    Disguised,
}

impl AuthDecision {
    pub fn is_granted(&self) -> bool {
        matches!(self, AuthDecision::Granted { .. })
    }

    pub fn strength(&self) -> Option<u8> {
        match self {
            AuthDecision::Granted { strength } => Some(*strength),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AuthDecision::Granted { .. } => "granted",
            AuthDecision::Denied => "denied",
            AuthDecision::PendingForms { .. } => "pending_forms",
            AuthDecision::Disguised => "disguised",
        }
    }
}

/// Decision plus the side effects the caller must persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationReport {
    pub decision: AuthDecision,
    /// Audit entries to append, per assignment.
    pub audit: Vec<(AssignmentId, AuditEntry)>,
    /// Codes that were evaluated, in order.
    pub evaluated: Vec<ProtectionCode>,
    /// Effective required passes after clamping.
    pub required_passes: u32,
}

/// Input of one evaluation.
#[derive(Debug, Clone, Copy)]
pub struct Evaluation<'a> {
    pub component: &'a Component,
    pub assignments: &'a [AssignedProtection],
    pub ptype: ProtectionType,
    pub selection: &'a ProtectionSelection,
}

impl<'a> Evaluation<'a> {
    pub fn new(component: &'a Component, assignments: &'a [AssignedProtection], ptype: ProtectionType) -> Self {
        static ALL: ProtectionSelection = ProtectionSelection::All;
        Self {
            component,
            assignments,
            ptype,
            selection: &ALL,
        }
    }

    pub fn with_selection(mut self, selection: &'a ProtectionSelection) -> Self {
        self.selection = selection;
        self
    }
}

struct Selected<'a> {
    assignment: &'a AssignedProtection,
    kind: Arc<dyn ProtectionKind>,
}

impl Selected<'_> {
    fn counts(&self) -> bool {
        !self.assignment.is_instant_fail() && !self.kind.ptype().contains(ProtectionType::NO_COUNT)
    }
}

#[derive(Debug, Clone)]
pub struct AuthorizationEngine {
    catalog: Arc<ProtectionCatalog>,
}

impl AuthorizationEngine {
    pub fn new(catalog: Arc<ProtectionCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &Arc<ProtectionCatalog> {
        &self.catalog
    }

    pub fn evaluate(&self, request: &AuthRequest, input: Evaluation<'_>) -> EvaluationReport {
        let mut selected = self.select(input);
        selected.sort_by(|a, b| a.assignment.code.cmp(&b.assignment.code));

        let countable = selected.iter().filter(|s| s.counts()).count() as u32;
        let requested = input.component.required_passes;
        let required_passes = if requested > 0 {
            requested.min(countable).max(1)
        } else if input.ptype.contains(ProtectionType::AUTHENTICATION) {
            1
        } else {
            0
        };

        if let ProtectionSelection::Only(codes) = input.selection {
            selected.retain(|s| {
                codes.contains(&s.assignment.code) || s.kind.ptype().contains(ProtectionType::SIDE_EFFECTS)
            });
        } else if input.selection.is_preview() {
            selected.retain(|s| s.kind.ptype().contains(ProtectionType::SIDE_EFFECTS));
        }

        let mut remaining = i64::from(required_passes);
        let mut blocked = false;
        let mut max_strength = 0u8;
        let mut forms = Vec::new();
        let mut uses_password = false;
        let mut audit = Vec::new();
        let mut evaluated = Vec::with_capacity(selected.len());

        for entry in &selected {
            let code = &entry.assignment.code;
            let ptype = entry.kind.ptype();
            uses_password |= ptype.contains(ProtectionType::PASSWORD);

            let outcome = run_kind(entry.kind.as_ref(), request, entry.assignment);
            evaluated.push(code.clone());
            if let Some(record) = entry.kind.audit(request, entry.assignment, &outcome) {
                audit.push((entry.assignment.id, record));
            }
            debug!(protection = %code, outcome = ?outcome, "Protection evaluated");

            match outcome {
                ProtectionOutcome::Disguise => {
                    return EvaluationReport {
                        decision: AuthDecision::Disguised,
                        audit,
                        evaluated,
                        required_passes,
                    };
                }
                ProtectionOutcome::Pass(strength) => {
                    let strength = entry.kind.strength_range().clamp(strength);
                    max_strength = max_strength.max(strength);
                    if entry.counts() {
                        remaining -= 1;
                    }
                }
                ProtectionOutcome::Pending(form) => {
                    if entry.assignment.is_instant_fail() {
                        blocked = true;
                    }
                    forms.push(form);
                }
                ProtectionOutcome::Fail => {
                    if entry.assignment.is_instant_fail() {
                        blocked = true;
                    }
                }
            }
        }

        let decision = if input.selection.is_preview() && required_passes > 0 {
            AuthDecision::Denied
        } else if !blocked && remaining <= 0 {
            AuthDecision::Granted {
                strength: max_strength,
            }
        } else if uses_password || !forms.is_empty() {
            if uses_password {
                forms.insert(0, ChallengeForm::password_prompt());
            }
            AuthDecision::PendingForms { forms }
        } else {
            AuthDecision::Denied
        };

        EvaluationReport {
            decision,
            audit,
            evaluated,
            required_passes,
        }
    }

    fn select<'a>(&self, input: Evaluation<'a>) -> Vec<Selected<'a>> {
        input
            .assignments
            .iter()
            .filter(|a| a.component_id == input.component.id && a.is_active())
            .filter_map(|assignment| match self.catalog.get(&assignment.code) {
                Ok(kind) => Some(Selected { assignment, kind }),
                Err(err) => {
                    warn!(protection = %assignment.code, error = %err, "Skipping assignment of unregistered kind");
                    None
                }
            })
            .filter(|s| s.kind.ptype().contains(input.ptype))
            .collect()
    }
}

fn run_kind(kind: &dyn ProtectionKind, request: &AuthRequest, assignment: &AssignedProtection) -> ProtectionOutcome {
    match catch_unwind(AssertUnwindSafe(|| kind.evaluate(request, assignment))) {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(err)) => {
            warn!(protection = %assignment.code, error = %err, "Protection failed, treating as non-grant");
            ProtectionOutcome::Fail
        }
        Err(_) => {
            warn!(protection = %assignment.code, "Protection panicked, treating as non-grant");
            ProtectionOutcome::Fail
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::component::INDEX_NAME;
    use crate::domain::protection::{ProtectionError, ProtectionState, StrengthRange};
    use crate::domain::user::UserId;
    use std::collections::BTreeSet;
    use std::time::Duration;

    /// Kind returning a fixed outcome.
    struct Scripted {
        code: &'static str,
        ptype: ProtectionType,
        outcome: Result<ProtectionOutcome, ()>,
    }

    impl ProtectionKind for Scripted {
        fn code(&self) -> ProtectionCode {
            ProtectionCode::new(self.code)
        }
        fn name(&self) -> &str {
            self.code
        }
        fn ptype(&self) -> ProtectionType {
            self.ptype
        }
        fn strength_range(&self) -> StrengthRange {
            StrengthRange::new(0, 4)
        }
        fn evaluate(
            &self,
            _request: &AuthRequest,
            _assignment: &AssignedProtection,
        ) -> Result<ProtectionOutcome, ProtectionError> {
            self.outcome.clone().map_err(|_| ProtectionError::Internal {
                code: self.code(),
                reason: "scripted".into(),
            })
        }
    }

    struct Panicking;

    impl ProtectionKind for Panicking {
        fn code(&self) -> ProtectionCode {
            ProtectionCode::new("panics")
        }
        fn name(&self) -> &str {
            "panics"
        }
        fn ptype(&self) -> ProtectionType {
            ProtectionType::ACCESS_CONTROL
        }
        fn strength_range(&self) -> StrengthRange {
            StrengthRange::new(0, 4)
        }
        fn evaluate(
            &self,
            _request: &AuthRequest,
            _assignment: &AssignedProtection,
        ) -> Result<ProtectionOutcome, ProtectionError> {
            panic!("broken plugin")
        }
    }

    const ACCESS: ProtectionType = ProtectionType::ACCESS_CONTROL;
    const BOTH: ProtectionType = ProtectionType::ACCESS_CONTROL.union(ProtectionType::AUTHENTICATION);

    fn scripted(code: &'static str, ptype: ProtectionType, outcome: ProtectionOutcome) -> Arc<dyn ProtectionKind> {
        Arc::new(Scripted {
            code,
            ptype,
            outcome: Ok(outcome),
        })
    }

    fn engine(kinds: Vec<Arc<dyn ProtectionKind>>) -> AuthorizationEngine {
        let mut catalog = ProtectionCatalog::new();
        for kind in kinds {
            catalog.register(kind).unwrap();
        }
        AuthorizationEngine::new(Arc::new(catalog))
    }

    fn component(required_passes: u32) -> Component {
        let mut component = Component::new(UserId::new(), "home", Duration::from_secs(60)).unwrap();
        component.required_passes = required_passes;
        component
    }

    fn assign(component: &Component, code: &str, state: ProtectionState) -> AssignedProtection {
        AssignedProtection::new(component.id, ProtectionCode::new(code), state)
    }

    #[test]
    fn test_all_required_passes_granted() {
        let engine = engine(vec![
            scripted("a", ACCESS, ProtectionOutcome::Pass(2)),
            scripted("b", ACCESS, ProtectionOutcome::Pass(3)),
        ]);
        let c = component(2);
        let assignments = vec![
            assign(&c, "b", ProtectionState::Enabled),
            assign(&c, "a", ProtectionState::Enabled),
        ];
        let report = engine.evaluate(&AuthRequest::new(), Evaluation::new(&c, &assignments, ACCESS));
        assert_eq!(report.decision, AuthDecision::Granted { strength: 3 });
        assert_eq!(report.evaluated, vec![ProtectionCode::new("a"), ProtectionCode::new("b")]);
    }

    #[test]
    fn test_failing_instant_fail_denies() {
        let engine = engine(vec![
            scripted("a", ACCESS, ProtectionOutcome::Pass(2)),
            scripted("b", ACCESS, ProtectionOutcome::Pass(2)),
            scripted("gate", ACCESS, ProtectionOutcome::Fail),
        ]);
        let c = component(1);
        let assignments = vec![
            assign(&c, "a", ProtectionState::Enabled),
            assign(&c, "b", ProtectionState::Enabled),
            assign(&c, "gate", ProtectionState::InstantFail),
        ];
        let report = engine.evaluate(&AuthRequest::new(), Evaluation::new(&c, &assignments, ACCESS));
        assert_eq!(report.decision, AuthDecision::Denied);
        // everything still ran
        assert_eq!(report.evaluated.len(), 3);
    }

    #[test]
    fn test_instant_fail_enforced_without_required_passes() {
        let engine = engine(vec![scripted("gate", ACCESS, ProtectionOutcome::Fail)]);
        let c = component(0);
        let assignments = vec![assign(&c, "gate", ProtectionState::InstantFail)];
        let report = engine.evaluate(&AuthRequest::new(), Evaluation::new(&c, &assignments, ACCESS));
        assert_eq!(report.decision, AuthDecision::Denied);
    }

    #[test]
    fn test_passing_instant_fail_does_not_count() {
        let engine = engine(vec![
            scripted("gate", ACCESS, ProtectionOutcome::Pass(4)),
            scripted("z", ACCESS, ProtectionOutcome::Fail),
        ]);
        let c = component(1);
        let assignments = vec![
            assign(&c, "gate", ProtectionState::InstantFail),
            assign(&c, "z", ProtectionState::Enabled),
        ];
        let report = engine.evaluate(&AuthRequest::new(), Evaluation::new(&c, &assignments, ACCESS));
        assert_eq!(report.decision, AuthDecision::Denied);
    }

    #[test]
    fn test_required_passes_clamped_to_available() {
        let engine = engine(vec![scripted("a", ACCESS, ProtectionOutcome::Pass(1))]);
        let c = component(5);
        let assignments = vec![assign(&c, "a", ProtectionState::Enabled)];
        let report = engine.evaluate(&AuthRequest::new(), Evaluation::new(&c, &assignments, ACCESS));
        assert_eq!(report.required_passes, 1);
        assert!(report.decision.is_granted());
    }

    #[test]
    fn test_no_count_kinds_never_satisfy_threshold() {
        let engine = engine(vec![
            scripted("counter", ACCESS | ProtectionType::NO_COUNT, ProtectionOutcome::Pass(0)),
            scripted("real", ACCESS, ProtectionOutcome::Fail),
        ]);
        let c = component(1);
        let assignments = vec![
            assign(&c, "counter", ProtectionState::Enabled),
            assign(&c, "real", ProtectionState::Enabled),
        ];
        let report = engine.evaluate(&AuthRequest::new(), Evaluation::new(&c, &assignments, ACCESS));
        assert_eq!(report.required_passes, 1);
        assert_eq!(report.decision, AuthDecision::Denied);
    }

    #[test]
    fn test_pending_forms_when_retry_possible() {
        let form = ChallengeForm::new(ProtectionCode::new("cap"), "Captcha");
        let engine = engine(vec![scripted("cap", ACCESS, ProtectionOutcome::Pending(form.clone()))]);
        let c = component(1);
        let assignments = vec![assign(&c, "cap", ProtectionState::Enabled)];
        let report = engine.evaluate(&AuthRequest::new(), Evaluation::new(&c, &assignments, ACCESS));
        assert_eq!(report.decision, AuthDecision::PendingForms { forms: vec![form] });
    }

    #[test]
    fn test_password_kind_prepends_prompt() {
        let engine = engine(vec![scripted("pw", ACCESS | ProtectionType::PASSWORD, ProtectionOutcome::Fail)]);
        let c = component(1);
        let assignments = vec![assign(&c, "pw", ProtectionState::Enabled)];
        let report = engine.evaluate(&AuthRequest::new(), Evaluation::new(&c, &assignments, ACCESS));
        match report.decision {
            AuthDecision::PendingForms { forms } => {
                assert_eq!(forms.len(), 1);
                assert_eq!(forms[0], ChallengeForm::password_prompt());
            }
            other => panic!("expected forms, got {other:?}"),
        }
    }

    #[test]
    fn test_disguise_aborts() {
        let engine = engine(vec![
            scripted("a", ACCESS, ProtectionOutcome::Disguise),
            scripted("b", ACCESS, ProtectionOutcome::Pass(4)),
        ]);
        let c = component(1);
        let assignments = vec![
            assign(&c, "a", ProtectionState::Enabled),
            assign(&c, "b", ProtectionState::Enabled),
        ];
        let report = engine.evaluate(&AuthRequest::new(), Evaluation::new(&c, &assignments, ACCESS));
        assert_eq!(report.decision, AuthDecision::Disguised);
        assert_eq!(report.evaluated, vec![ProtectionCode::new("a")]);
    }

    #[test]
    fn test_allowlist_keeps_side_effects() {
        let engine = engine(vec![
            scripted("a", ACCESS, ProtectionOutcome::Pass(1)),
            scripted("b", ACCESS, ProtectionOutcome::Pass(2)),
            scripted("limit", ACCESS | ProtectionType::SIDE_EFFECTS | ProtectionType::NO_COUNT, ProtectionOutcome::Pass(0)),
        ]);
        let c = component(1);
        let assignments = vec![
            assign(&c, "a", ProtectionState::Enabled),
            assign(&c, "b", ProtectionState::Enabled),
            assign(&c, "limit", ProtectionState::Enabled),
        ];
        let selection = ProtectionSelection::Only(BTreeSet::from([ProtectionCode::new("b")]));
        let report = engine.evaluate(
            &AuthRequest::new(),
            Evaluation::new(&c, &assignments, ACCESS).with_selection(&selection),
        );
        assert_eq!(report.evaluated, vec![ProtectionCode::new("b"), ProtectionCode::new("limit")]);
        assert_eq!(report.decision, AuthDecision::Granted { strength: 2 });
    }

    #[test]
    fn test_preview_never_grants() {
        let engine = engine(vec![scripted("a", ACCESS, ProtectionOutcome::Pass(1))]);
        let c = component(1);
        let assignments = vec![assign(&c, "a", ProtectionState::Enabled)];
        let preview = ProtectionSelection::Preview;
        let report = engine.evaluate(
            &AuthRequest::new(),
            Evaluation::new(&c, &assignments, ACCESS).with_selection(&preview),
        );
        assert_eq!(report.decision, AuthDecision::Denied);
        assert!(report.evaluated.is_empty());
    }

    #[test]
    fn test_broken_kinds_are_non_grants() {
        let erroring: Arc<dyn ProtectionKind> = Arc::new(Scripted {
            code: "err",
            ptype: ACCESS,
            outcome: Err(()),
        });
        let engine = engine(vec![erroring, Arc::new(Panicking), scripted("ok", ACCESS, ProtectionOutcome::Pass(1))]);
        let c = component(1);
        let assignments = vec![
            assign(&c, "err", ProtectionState::Enabled),
            assign(&c, "panics", ProtectionState::Enabled),
            assign(&c, "ok", ProtectionState::Enabled),
        ];
        let report = engine.evaluate(&AuthRequest::new(), Evaluation::new(&c, &assignments, ACCESS));
        assert_eq!(report.decision, AuthDecision::Granted { strength: 1 });
    }

    #[test]
    fn test_disabled_and_foreign_assignments_ignored() {
        let engine = engine(vec![scripted("a", ACCESS, ProtectionOutcome::Pass(1))]);
        let c = component(1);
        let other = component(1);
        let assignments = vec![
            assign(&c, "a", ProtectionState::Disabled),
            assign(&other, "a", ProtectionState::Enabled),
        ];
        let report = engine.evaluate(&AuthRequest::new(), Evaluation::new(&c, &assignments, ACCESS));
        assert!(report.evaluated.is_empty());
        assert_eq!(report.decision, AuthDecision::Denied);
    }

    #[test]
    fn test_strength_is_monotonic() {
        let c = component(1);
        let base = engine(vec![scripted("a", ACCESS, ProtectionOutcome::Pass(2))]);
        let with_extra = engine(vec![
            scripted("a", ACCESS, ProtectionOutcome::Pass(2)),
            scripted("b", ACCESS, ProtectionOutcome::Pass(3)),
        ]);
        let one = vec![assign(&c, "a", ProtectionState::Enabled)];
        let two = vec![
            assign(&c, "a", ProtectionState::Enabled),
            assign(&c, "b", ProtectionState::Enabled),
        ];
        let before = base
            .evaluate(&AuthRequest::new(), Evaluation::new(&c, &one, ACCESS))
            .decision
            .strength()
            .unwrap();
        let after = with_extra
            .evaluate(&AuthRequest::new(), Evaluation::new(&c, &two, ACCESS))
            .decision
            .strength()
            .unwrap();
        assert!(after >= before);
    }

    #[test]
    fn test_index_without_protections_denied() {
        let engine = engine(vec![scripted("a", BOTH, ProtectionOutcome::Pass(4))]);
        let index = Component::new_reserved(UserId::new(), INDEX_NAME, Duration::from_secs(60)).unwrap();
        let report = engine.evaluate(
            &AuthRequest::new(),
            Evaluation::new(&index, &[], ProtectionType::AUTHENTICATION),
        );
        assert_eq!(report.required_passes, 1);
        assert_eq!(report.decision, AuthDecision::Denied);
    }
}
