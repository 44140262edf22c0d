//! Guardrail policy data and evaluation results.
//!
//! The policy is plain configuration. Stateful evaluation (the rate-limit
//! windows) lives in `mindloop-guardrails`.

use serde::{Deserialize, Serialize};

use crate::agent::InvocationSource;

/// Whether `capability` matches `pattern`.
///
/// Patterns: `*` (everything), an exact name, `prefix.*` or `*.suffix`.
pub fn capability_matches(pattern: &str, capability: &str) -> bool {
    let pattern = pattern.trim();
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix(".*") {
        return capability
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('.'));
    }
    if let Some(suffix) = pattern.strip_prefix("*.") {
        return capability
            .strip_suffix(suffix)
            .is_some_and(|rest| rest.ends_with('.'));
    }
    pattern == capability
}

fn any_matches(patterns: &[String], capability: &str) -> bool {
    patterns.iter().any(|p| capability_matches(p, capability))
}

/// A capability that may never execute. Not approvable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardLimit {
    pub name: String,
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub reason: String,
}

impl HardLimit {
    pub fn matches(&self, capability: &str) -> bool {
        any_matches(&self.capabilities, capability)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateScope {
    #[default]
    PerUser,
    Global,
}

/// At most `max_calls` executions of matching capabilities per `window_secs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub name: String,
    pub capabilities: Vec<String>,
    pub max_calls: u32,
    pub window_secs: u64,
    #[serde(default)]
    pub scope: RateScope,
}

impl RateLimit {
    pub fn matches(&self, capability: &str) -> bool {
        any_matches(&self.capabilities, capability)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionEffect {
    /// Permitted without confirmation
    Allow,
    /// Permitted, but the loop pauses for a human first
    #[default]
    RequireApproval,
}

/// A permission rule. The first matching rule decides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionPolicy {
    pub name: String,
    pub capabilities: Vec<String>,
    /// Restrict the rule to these invocation sources; empty means all.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<InvocationSource>,
    #[serde(default)]
    pub effect: PermissionEffect,
}

impl PermissionPolicy {
    pub fn applies(&self, capability: &str, source: InvocationSource) -> bool {
        (self.sources.is_empty() || self.sources.contains(&source))
            && any_matches(&self.capabilities, capability)
    }
}

/// The full guardrail set for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardrailPolicy {
    #[serde(default)]
    pub hard_limits: Vec<HardLimit>,
    #[serde(default)]
    pub rate_limits: Vec<RateLimit>,
    #[serde(default)]
    pub permissions: Vec<PermissionPolicy>,
}

impl GuardrailPolicy {
    pub fn hard_limit_for(&self, capability: &str) -> Option<&HardLimit> {
        self.hard_limits.iter().find(|l| l.matches(capability))
    }

    pub fn permission_for(
        &self,
        capability: &str,
        source: InvocationSource,
    ) -> Option<&PermissionPolicy> {
        self.permissions.iter().find(|p| p.applies(capability, source))
    }

    /// Whether Decision should gate a plan using `capability` on approval.
    pub fn restricts(&self, capability: &str, source: InvocationSource) -> bool {
        self.hard_limit_for(capability).is_some()
            || self
                .permission_for(capability, source)
                .is_some_and(|p| p.effect == PermissionEffect::RequireApproval)
    }
}

/// Outcome of evaluating guardrails for one step.
///
/// `can_execute && needs_approval` means "allowed, but pause for
/// confirmation first"; it is not a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardrailResult {
    pub can_execute: bool,
    pub needs_approval: bool,
    #[serde(default)]
    pub blocked_reasons: Vec<String>,
    #[serde(default)]
    pub approval_reasons: Vec<String>,
    /// Names of the rules that were evaluated, in order.
    #[serde(default)]
    pub evaluated: Vec<String>,
}

impl GuardrailResult {
    pub fn allow() -> Self {
        Self {
            can_execute: true,
            needs_approval: false,
            blocked_reasons: Vec::new(),
            approval_reasons: Vec::new(),
            evaluated: Vec::new(),
        }
    }

    pub fn block(&mut self, reason: impl Into<String>) {
        self.can_execute = false;
        self.blocked_reasons.push(reason.into());
    }

    pub fn require_approval(&mut self, reason: impl Into<String>) {
        self.needs_approval = true;
        self.approval_reasons.push(reason.into());
    }

    pub fn is_blocked(&self) -> bool {
        !self.can_execute
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_forms() {
        assert!(capability_matches("*", "email.send"));
        assert!(capability_matches("email.send", "email.send"));
        assert!(capability_matches("email.*", "email.send"));
        assert!(!capability_matches("email.*", "emails.send"));
        assert!(!capability_matches("email.*", "email"));
        assert!(capability_matches("*.delete", "notes.delete"));
        assert!(!capability_matches("*.delete", "notes.undelete"));
        assert!(!capability_matches("email.send", "email.sender"));
    }

    #[test]
    fn permission_rules_respect_sources() {
        let policy = GuardrailPolicy {
            permissions: vec![PermissionPolicy {
                name: "autonomous-writes".into(),
                capabilities: vec!["notes.*".into()],
                sources: vec![InvocationSource::Heartbeat],
                effect: PermissionEffect::RequireApproval,
            }],
            ..Default::default()
        };
        assert!(policy.restricts("notes.create", InvocationSource::Heartbeat));
        assert!(!policy.restricts("notes.create", InvocationSource::Chat));
    }

    #[test]
    fn first_permission_rule_wins() {
        let policy = GuardrailPolicy {
            permissions: vec![
                PermissionPolicy {
                    name: "reads".into(),
                    capabilities: vec!["notes.list".into()],
                    sources: vec![],
                    effect: PermissionEffect::Allow,
                },
                PermissionPolicy {
                    name: "all-notes".into(),
                    capabilities: vec!["notes.*".into()],
                    sources: vec![],
                    effect: PermissionEffect::RequireApproval,
                },
            ],
            ..Default::default()
        };
        assert!(!policy.restricts("notes.list", InvocationSource::Chat));
        assert!(policy.restricts("notes.delete", InvocationSource::Chat));
    }

    #[test]
    fn result_encodings_are_distinct() {
        let mut pause = GuardrailResult::allow();
        pause.require_approval("sensitive");
        assert!(pause.can_execute && pause.needs_approval);

        let mut blocked = GuardrailResult::allow();
        blocked.block("disallowed");
        assert!(blocked.is_blocked());
        assert_eq!(blocked.blocked_reasons, vec!["disallowed".to_string()]);
    }
}
