//! Guardrails for mindloop: evaluated before any plan step executes.
//!
//! Evaluation order:
//! 1. **Hard limits**: always block, never approvable; the first match
//!    short-circuits everything else
//! 2. **Rate limits**: block when a sliding window is full
//! 3. **Permission policy**: may mark an otherwise-permitted step as
//!    needing approval
//!
//! Blocks are data ([`GuardrailResult::blocked_reasons`]), not errors.

pub mod rate_limit;

use mindloop_core::agent::EngineConfig;
use mindloop_core::guardrail::{GuardrailResult, PermissionEffect, RateLimit};
use mindloop_core::plan::PlanStep;
use tracing::{debug, warn};

pub use rate_limit::{RateLimiter, RateStatus, Reservation};

/// Stateful guardrail evaluator.
///
/// The policy itself travels in each run's `EngineConfig`; this holds only
/// the rate-limit windows, which are shared across concurrent runs.
#[derive(Debug, Default)]
pub struct Guardrails {
    limiter: RateLimiter,
}

impl Guardrails {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate `step` and, when it may run now, hold its rate-limit slots.
    ///
    /// Blocked and approval-gated steps hold nothing. The caller releases
    /// the reservation if the step then makes no attempt.
    pub fn admit(&self, step: &PlanStep, config: &EngineConfig) -> (GuardrailResult, Reservation) {
        evaluate(step, config, self, true)
    }

    pub fn release(&self, reservation: Reservation) {
        self.limiter.release(reservation);
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }
}

/// Evaluate every guardrail for one step without consuming any budget.
pub fn check_step_guardrails(
    step: &PlanStep,
    config: &EngineConfig,
    guardrails: &Guardrails,
) -> GuardrailResult {
    evaluate(step, config, guardrails, false).0
}

fn evaluate(
    step: &PlanStep,
    config: &EngineConfig,
    guardrails: &Guardrails,
    reserve: bool,
) -> (GuardrailResult, Reservation) {
    let capability = step.action.capability();
    let policy = &config.guardrails;
    let mut result = GuardrailResult::allow();

    // (a) hard limits
    for limit in &policy.hard_limits {
        result.evaluated.push(limit.name.clone());
        if limit.matches(capability) {
            let reason = if limit.reason.is_empty() {
                format!("capability '{capability}' is disallowed by '{}'", limit.name)
            } else {
                format!("{} ({})", limit.reason, limit.name)
            };
            warn!(step_id = %step.id, capability, rule = %limit.name, "Hard limit blocked step");
            result.block(reason);
            return (result, Reservation::default());
        }
    }

    // (b) rate limits
    let rules: Vec<&RateLimit> = policy
        .rate_limits
        .iter()
        .filter(|r| r.matches(capability))
        .collect();
    result.evaluated.extend(rules.iter().map(|r| r.name.clone()));
    let mut reservation = Reservation::default();
    let exceeded = if reserve {
        match guardrails.limiter.try_acquire(&rules, &config.user_id) {
            Ok(held) => {
                reservation = held;
                Vec::new()
            }
            Err(exceeded) => exceeded,
        }
    } else {
        rules
            .iter()
            .map(|r| (r.name.clone(), guardrails.limiter.status(r, &config.user_id)))
            .filter(|(_, status)| status.exceeded())
            .collect()
    };
    for (name, status) in exceeded {
        let window_secs = rules
            .iter()
            .find(|r| r.name == name)
            .map_or(0, |r| r.window_secs);
        warn!(
            step_id = %step.id,
            capability,
            rule = %name,
            used = status.used,
            limit = status.limit,
            "Rate limit blocked step"
        );
        result.block(format!(
            "rate limit '{name}' exceeded: {} of {} calls per {window_secs}s",
            status.used, status.limit
        ));
    }
    if result.is_blocked() {
        return (result, Reservation::default());
    }

    // (c) permission policy
    if let Some(rule) = policy.permission_for(capability, config.source) {
        result.evaluated.push(rule.name.clone());
        if rule.effect == PermissionEffect::RequireApproval {
            result.require_approval(format!(
                "'{capability}' requires approval under '{}' for {} invocations",
                rule.name, config.source
            ));
        }
    }
    if result.needs_approval {
        guardrails.limiter.release(reservation);
        reservation = Reservation::default();
    }

    debug!(
        step_id = %step.id,
        capability,
        can_execute = result.can_execute,
        needs_approval = result.needs_approval,
        "Guardrails evaluated"
    );
    (result, reservation)
}
