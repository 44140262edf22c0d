//! Agent roster and team definitions.

use chrono::Utc;
use mindloop_core::team::{AgentDefinition, AgentTeam, HUMAN_INBOX};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::info;

use crate::error::TeamError;

/// Read-mostly registry of agents and teams.
#[derive(Debug, Default)]
pub struct TeamRegistry {
    agents: RwLock<HashMap<String, AgentDefinition>>,
    teams: RwLock<HashMap<String, AgentTeam>>,
}

impl TeamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an agent. Returns the replaced definition.
    pub fn register_agent(&self, agent: AgentDefinition) -> Option<AgentDefinition> {
        info!(agent_id = %agent.id, role = %agent.role, "Registering agent");
        self.agents
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(agent.id.clone(), agent)
    }

    pub fn get_agent(&self, id: &str) -> Option<AgentDefinition> {
        self.agents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    /// All agents, sorted by id.
    pub fn list_agents(&self) -> Vec<AgentDefinition> {
        let mut agents: Vec<AgentDefinition> = self
            .agents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        agents
    }

    /// Remove an agent and drop it from every team it belonged to.
    pub fn remove_agent(&self, id: &str) -> Option<AgentDefinition> {
        let removed = self
            .agents
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
        if removed.is_some() {
            let mut teams = self.teams.write().unwrap_or_else(|e| e.into_inner());
            for team in teams.values_mut() {
                team.members.retain(|m| m != id);
                if team.lead.as_deref() == Some(id) {
                    team.lead = None;
                }
            }
        }
        removed
    }

    pub fn create_team(
        &self,
        id: impl Into<String>,
        name: impl Into<String>,
        members: Vec<String>,
        lead: Option<String>,
    ) -> Result<AgentTeam, TeamError> {
        let id = id.into();
        {
            let agents = self.agents.read().unwrap_or_else(|e| e.into_inner());
            if let Some(unknown) = members
                .iter()
                .chain(lead.iter())
                .find(|m| !agents.contains_key(m.as_str()))
            {
                return Err(TeamError::UnknownAgent(unknown.clone()));
            }
        }
        if let Some(lead) = &lead
            && !members.contains(lead)
        {
            return Err(TeamError::UnknownAgent(format!("{lead} (lead is not a member)")));
        }

        let mut teams = self.teams.write().unwrap_or_else(|e| e.into_inner());
        if teams.contains_key(&id) {
            return Err(TeamError::DuplicateTeam(id));
        }
        let team = AgentTeam {
            id: id.clone(),
            name: name.into(),
            members,
            lead,
            created_at: Utc::now(),
        };
        info!(team_id = %team.id, members = team.members.len(), "Team created");
        teams.insert(id, team.clone());
        Ok(team)
    }

    pub fn get_team(&self, id: &str) -> Result<AgentTeam, TeamError> {
        self.teams
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
            .ok_or_else(|| TeamError::UnknownTeam(id.to_string()))
    }

    pub fn list_teams(&self) -> Vec<AgentTeam> {
        let mut teams: Vec<AgentTeam> = self
            .teams
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        teams.sort_by(|a, b| a.id.cmp(&b.id));
        teams
    }

    /// Whether `id` names a registered agent or the human inbox.
    pub fn is_addressable(&self, id: &str) -> bool {
        id == HUMAN_INBOX || self.get_agent(id).is_some()
    }
}
