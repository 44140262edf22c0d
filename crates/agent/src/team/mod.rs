//! Multi-agent teams: roster, mailboxes, handoffs and escalations.
//!
//! Every agent runs on the same [`CimEngine`]; an agent is an identity and
//! a model-tier ceiling, not a separate engine. Handoffs reassign a goal to
//! another agent's run. Escalations arrive as goals with an escalation
//! origin, which Decision always gates on approval, so escalated work never
//! executes unattended. Escalations to a human land in the reserved
//! [`HUMAN_INBOX`] and are never processed by an agent.

pub mod bundle;
pub mod mailbox;
pub mod registry;

use chrono::Utc;
use mindloop_core::agent::{EngineConfig, InvocationSource};
use mindloop_core::audit::{AuditAction, AuditData, ExternalMemoryEntry};
use mindloop_core::event::LoopEvent;
use mindloop_core::goal::GoalOrigin;
use mindloop_core::state::{CimResult, Phase};
use mindloop_core::team::{AgentMessage, ContextBundle, EscalationTarget, HUMAN_INBOX, MessageKind};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::CimEngine;
use crate::error::TeamError;
pub use bundle::{bundle_from_result, bundle_to_prompt};
pub use mailbox::Mailbox;
pub use registry::TeamRegistry;

/// What processing one inbox message produced.
#[derive(Debug, Clone)]
pub struct InboxOutcome {
    pub message_id: String,
    pub from: String,
    pub kind: &'static str,
    /// The run started for a handoff or escalation; `None` for plain messages.
    pub result: Option<CimResult>,
}

pub struct TeamRuntime {
    registry: Arc<TeamRegistry>,
    mailbox: Arc<Mailbox>,
    engine: Arc<CimEngine>,
}

impl TeamRuntime {
    pub fn new(registry: Arc<TeamRegistry>, engine: Arc<CimEngine>) -> Self {
        Self {
            registry,
            mailbox: Arc::new(Mailbox::new()),
            engine,
        }
    }

    pub fn registry(&self) -> &TeamRegistry {
        &self.registry
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    /// Deliver a message after recording it in external memory.
    pub async fn send_message(&self, message: AgentMessage) -> Result<AgentMessage, TeamError> {
        if !self.registry.is_addressable(&message.from) {
            return Err(TeamError::UnknownAgent(message.from));
        }
        if !self.registry.is_addressable(&message.to) {
            return Err(TeamError::UnknownAgent(message.to));
        }

        let entry = ExternalMemoryEntry::new(
            message.from.clone(),
            AuditAction::MessageSent,
            AuditData::Message {
                message_id: message.id.clone(),
                from: message.from.clone(),
                to: message.to.clone(),
                message_kind: message.kind.label().to_string(),
                preview: message.preview(),
            },
        )
        .in_phase(Phase::Team);
        self.engine.memory().write(entry).await?;

        info!(
            message_id = %message.id,
            from = %message.from,
            to = %message.to,
            kind = message.kind.label(),
            "Message delivered"
        );
        self.engine.events().publish(LoopEvent::MessageDelivered {
            from: message.from.clone(),
            to: message.to.clone(),
            kind: message.kind.label().to_string(),
            timestamp: Utc::now(),
        });
        self.mailbox.deliver(message.clone());
        Ok(message)
    }

    /// Drain an inbox without processing it.
    pub fn get_messages(&self, recipient: &str) -> Vec<AgentMessage> {
        self.mailbox.get_messages(recipient)
    }

    /// Reassign a goal, with its context, to another agent.
    pub async fn create_handoff(
        &self,
        from: &str,
        to: &str,
        bundle: ContextBundle,
    ) -> Result<AgentMessage, TeamError> {
        if self.registry.get_agent(to).is_none() {
            return Err(TeamError::UnknownAgent(to.to_string()));
        }
        self.send_message(AgentMessage::new(from, to, MessageKind::Handoff { bundle }))
            .await
    }

    /// Elevate a goal. Without an explicit target this goes to the sender's
    /// configured `escalates_to`, or to a human.
    pub async fn create_escalation(
        &self,
        from: &str,
        bundle: ContextBundle,
        reason: impl Into<String>,
        target: Option<EscalationTarget>,
    ) -> Result<AgentMessage, TeamError> {
        let target = target.unwrap_or_else(|| {
            match self.registry.get_agent(from).and_then(|a| a.escalates_to) {
                Some(id) if id != HUMAN_INBOX => EscalationTarget::Agent(id),
                _ => EscalationTarget::Human,
            }
        });
        let to = target.inbox().to_string();
        let kind = MessageKind::Escalation {
            bundle,
            reason: reason.into(),
            target,
        };
        self.send_message(AgentMessage::new(from, to, kind)).await
    }

    /// Drain `agent_id`'s inbox and run every handed-off or escalated goal
    /// as that agent.
    pub async fn process_inbox(
        &self,
        agent_id: &str,
        base: &EngineConfig,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<InboxOutcome>, TeamError> {
        if agent_id == HUMAN_INBOX {
            return Err(TeamError::HumanInbox);
        }
        let agent = self
            .registry
            .get_agent(agent_id)
            .ok_or_else(|| TeamError::UnknownAgent(agent_id.to_string()))?;
        let config = base
            .clone()
            .with_agent(agent.id.clone())
            .with_model_tier(agent.model_tier.min(base.model_tier))
            .with_source(InvocationSource::Team);

        let mut outcomes = Vec::new();
        for message in self.mailbox.get_messages(agent_id) {
            let kind = message.kind.label();
            let goal = match &message.kind {
                MessageKind::Handoff { bundle } => Some(
                    bundle
                        .goal
                        .child(GoalOrigin::Handoff {
                            from_agent: message.from.clone(),
                        })
                        .with_context(bundle_to_prompt(bundle)),
                ),
                MessageKind::Escalation { bundle, reason, .. } => Some(
                    bundle
                        .goal
                        .child(GoalOrigin::Escalation {
                            from_agent: message.from.clone(),
                            reason: reason.clone(),
                        })
                        .with_context(bundle_to_prompt(bundle)),
                ),
                MessageKind::Text { .. } | MessageKind::Opaque { .. } => None,
            };

            let result = match goal {
                Some(goal) => {
                    debug!(agent_id, message_id = %message.id, kind, "Running delegated goal");
                    Some(self.engine.run_goal(goal, &config, cancel).await)
                }
                None => None,
            };
            outcomes.push(InboxOutcome {
                message_id: message.id,
                from: message.from,
                kind,
                result,
            });
        }
        Ok(outcomes)
    }
}
