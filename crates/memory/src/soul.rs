//! Soul config: the non-negotiable anchor rules.
//!
//! Anchors are configuration loaded from TOML, never code. Decision renders
//! them into every reasoning prompt via [`get_soul_prompt`]; the Engine
//! enforces `forbid` anchors before guardrails and Decision gates plans that
//! touch `require_approval` anchors.

use mindloop_core::guardrail::capability_matches;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnchorEnforcement {
    /// Shapes prompts only
    Advisory,
    /// Plans touching these capabilities always go to a human first
    RequireApproval { capabilities: Vec<String> },
    /// These capabilities never execute
    Forbid { capabilities: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorRule {
    pub id: String,
    pub directive: String,
    #[serde(default = "advisory")]
    pub enforcement: AnchorEnforcement,
}

fn advisory() -> AnchorEnforcement {
    AnchorEnforcement::Advisory
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoulConfig {
    pub name: String,
    #[serde(default)]
    pub persona: String,
    #[serde(default)]
    pub anchors: Vec<AnchorRule>,
}

#[derive(Debug, thiserror::Error)]
pub enum SoulError {
    #[error("Failed to read soul config at {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Failed to parse soul config: {0}")]
    Parse(String),
}

/// The built-in soul used when no file is configured.
pub fn create_default_soul_config() -> SoulConfig {
    SoulConfig {
        name: "mindloop".into(),
        persona: "A careful personal assistant that acts on the user's behalf and keeps \
                  them informed."
            .into(),
        anchors: vec![
            AnchorRule {
                id: "honesty".into(),
                directive: "Never fabricate facts. Say plainly when information is missing."
                    .into(),
                enforcement: AnchorEnforcement::Advisory,
            },
            AnchorRule {
                id: "confirm-irreversible".into(),
                directive: "Ask before deleting, sending or paying for anything.".into(),
                enforcement: AnchorEnforcement::RequireApproval {
                    capabilities: vec!["*.delete".into(), "*.send".into(), "*.pay".into()],
                },
            },
            AnchorRule {
                id: "protect-secrets".into(),
                directive: "Never reveal or transmit stored credentials.".into(),
                enforcement: AnchorEnforcement::Forbid {
                    capabilities: vec!["secrets.*".into()],
                },
            },
        ],
    }
}

/// Render the anchor set as a directive block for a system prompt.
pub fn get_soul_prompt(soul: &SoulConfig) -> String {
    let mut out = format!("You are {}.", soul.name);
    if !soul.persona.is_empty() {
        out.push(' ');
        out.push_str(&soul.persona);
    }
    if !soul.anchors.is_empty() {
        out.push_str("\n\nNon-negotiable rules:");
        for (i, anchor) in soul.anchors.iter().enumerate() {
            out.push_str(&format!("\n{}. {}", i + 1, anchor.directive));
        }
    }
    out
}

impl Default for SoulConfig {
    fn default() -> Self {
        create_default_soul_config()
    }
}

impl SoulConfig {
    pub fn load(path: &Path) -> Result<Self, SoulError> {
        let content = std::fs::read_to_string(path).map_err(|e| SoulError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, SoulError> {
        toml::from_str(content).map_err(|e| SoulError::Parse(e.to_string()))
    }

    /// The first anchor forbidding `capability`.
    pub fn forbidding(&self, capability: &str) -> Option<&AnchorRule> {
        self.anchors.iter().find(|a| match &a.enforcement {
            AnchorEnforcement::Forbid { capabilities } => {
                capabilities.iter().any(|p| capability_matches(p, capability))
            }
            _ => false,
        })
    }

    /// The first anchor requiring approval for `capability`.
    pub fn requiring_approval(&self, capability: &str) -> Option<&AnchorRule> {
        self.anchors.iter().find(|a| match &a.enforcement {
            AnchorEnforcement::RequireApproval { capabilities } => {
                capabilities.iter().any(|p| capability_matches(p, capability))
            }
            _ => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_soul_renders_all_anchors() {
        let soul = create_default_soul_config();
        let prompt = get_soul_prompt(&soul);
        assert!(prompt.starts_with("You are mindloop."));
        for anchor in &soul.anchors {
            assert!(prompt.contains(&anchor.directive));
        }
    }

    #[test]
    fn enforcement_lookups() {
        let soul = create_default_soul_config();
        assert_eq!(
            soul.requiring_approval("notes.delete").map(|a| a.id.as_str()),
            Some("confirm-irreversible")
        );
        assert!(soul.requiring_approval("notes.list").is_none());
        assert!(soul.forbidding("secrets.read").is_some());
        assert!(soul.forbidding("notes.create").is_none());
    }

    #[test]
    fn parses_toml() {
        let soul = SoulConfig::from_toml_str(
            r#"
name = "Ada"
persona = "Terse."

[[anchors]]
id = "no-mail"
directive = "Never send email."
enforcement = { kind = "forbid", capabilities = ["email.*"] }

[[anchors]]
id = "kind"
directive = "Be kind."
"#,
        )
        .unwrap();
        assert_eq!(soul.anchors.len(), 2);
        assert_eq!(soul.anchors[1].enforcement, AnchorEnforcement::Advisory);
        assert!(soul.forbidding("email.send").is_some());
        assert!(get_soul_prompt(&soul).contains("2. Be kind."));
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = SoulConfig::load(Path::new("/nonexistent/soul.toml")).unwrap_err();
        assert!(matches!(err, SoulError::Read { .. }));
    }
}
