//! Tenant-level agent configuration.
//!
//! A snapshot of these settings is taken when a conversation starts, so
//! edits made through the dashboard only apply to the next call.

use serde::{Deserialize, Serialize};

/// Per-workspace voice agent configuration, stored as JSON on the
/// workspace record.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AgentSettings {
    /// Conversational tone, e.g. "warm and professional".
    pub tone: String,
    /// Short personality description folded into the system prompt.
    pub personality: String,
    /// Rules the agent must always follow.
    pub mandatory_rules: Vec<String>,
    /// Topics the agent must refuse to discuss.
    pub forbidden_topics: Vec<String>,
    /// Phrasing to fall back on when the agent cannot help.
    pub fallback_phrase: Option<String>,
    /// "female", "male", or anything else for the neutral default voice.
    pub agent_gender: Option<String>,
    /// Speaking-rate multiplier, clamped to [0.8, 1.2] at prompt build.
    pub speech_rate: f32,
    /// Business identity lines, included verbatim when present.
    pub business_name: Option<String>,
    pub business_description: Option<String>,
    pub business_hours: Option<String>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            tone: "friendly and professional".to_string(),
            personality: "helpful, concise, and attentive".to_string(),
            mandatory_rules: Vec::new(),
            forbidden_topics: Vec::new(),
            fallback_phrase: None,
            agent_gender: None,
            speech_rate: 1.0,
            business_name: None,
            business_description: None,
            business_hours: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = AgentSettings::default();
        assert_eq!(settings.speech_rate, 1.0);
        assert!(settings.mandatory_rules.is_empty());
        assert!(settings.agent_gender.is_none());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings: AgentSettings =
            serde_json::from_str(r#"{"tone": "brisk", "speech_rate": 1.1}"#).unwrap();
        assert_eq!(settings.tone, "brisk");
        assert_eq!(settings.speech_rate, 1.1);
        assert_eq!(settings.personality, "helpful, concise, and attentive");
    }

    #[test]
    fn test_round_trip() {
        let mut settings = AgentSettings::default();
        settings.forbidden_topics = vec!["pricing of competitors".to_string()];
        settings.agent_gender = Some("female".to_string());

        let json = serde_json::to_string(&settings).unwrap();
        let back: AgentSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back.forbidden_topics, settings.forbidden_topics);
        assert_eq!(back.agent_gender.as_deref(), Some("female"));
    }
}
