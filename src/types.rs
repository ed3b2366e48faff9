//! Gemini v1beta wire types.
//!
//! Only the slice of the API surface the orchestrator touches: conversation
//! contents, generation config, and the response shape (candidates with
//! optional per-candidate token counts, plus usage metadata). Field names
//! follow the REST API's camelCase.

use serde::{Deserialize, Serialize};

/// Conversation role. Gemini knows only `user` and `model`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// One part of a content entry. Text-only here; other part kinds are not
/// used by this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
        }
    }
}

/// A single conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub role: Role,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![Part::text(text)],
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            parts: vec![Part::text(text)],
        }
    }

    /// Concatenated text of all parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect()
    }
}

/// Safety filter setting, sent alongside the generation config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafetySetting {
    pub category: String,
    pub threshold: String,
}

/// Harm categories switched off by the default config.
const SAFETY_CATEGORIES: [&str; 6] = [
    "HARM_CATEGORY_UNSPECIFIED",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_CIVIC_INTEGRITY",
];

/// Sampling and output knobs for `generateContent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_mime_type: Option<String>,
    /// Serialized by the transport as the sibling `safetySettings` field,
    /// not inside `generationConfig`.
    #[serde(skip)]
    pub safety_settings: Vec<SafetySetting>,
}

impl Default for GenerationConfig {
    /// Conservative defaults: temperature 0.7, top-p 0.5, top-k 40, one
    /// candidate, plain-text output, all safety categories off.
    fn default() -> Self {
        Self {
            temperature: Some(0.7),
            top_p: Some(0.5),
            top_k: Some(40),
            candidate_count: Some(1),
            max_output_tokens: None,
            response_mime_type: Some("text/plain".to_string()),
            safety_settings: SAFETY_CATEGORIES
                .iter()
                .map(|category| SafetySetting {
                    category: (*category).to_string(),
                    threshold: "OFF".to_string(),
                })
                .collect(),
        }
    }
}

/// One alternative model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    /// Output token count for this candidate. Absent counts are treated as
    /// zero everywhere.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_count: Option<u64>,
}

/// Aggregate token accounting reported by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_token_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidates_token_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_token_count: Option<u64>,
}

/// Response of `generateContent`, and the chunk shape of
/// `streamGenerateContent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_metadata: Option<UsageMetadata>,
}

impl GenerateResponse {
    /// Text of the first candidate, empty when there is none.
    pub fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(Content::text)
            .unwrap_or_default()
    }

    /// Sum of per-candidate output token counts, absent counts as zero.
    pub fn output_token_sum(&self) -> u64 {
        self.candidates
            .iter()
            .map(|c| c.token_count.unwrap_or(0))
            .sum()
    }
}

/// Response of `countTokens`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountTokensResponse {
    pub total_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_roundtrips_rest_shape() {
        let content = Content::user("Hello");
        let json = serde_json::to_value(&content).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["parts"][0]["text"], "Hello");
    }

    #[test]
    fn test_model_role_serializes_as_model() {
        let json = serde_json::to_value(Content::model("hi")).unwrap();
        assert_eq!(json["role"], "model");
    }

    #[test]
    fn test_generation_config_defaults_match_conservative_profile() {
        let config = GenerationConfig::default();
        assert_eq!(config.temperature, Some(0.7));
        assert_eq!(config.top_p, Some(0.5));
        assert_eq!(config.top_k, Some(40));
        assert_eq!(config.candidate_count, Some(1));
        assert_eq!(config.response_mime_type.as_deref(), Some("text/plain"));
        assert_eq!(config.safety_settings.len(), 6);
        assert!(config.safety_settings.iter().all(|s| s.threshold == "OFF"));
    }

    #[test]
    fn test_generation_config_serializes_camel_case() {
        let json = serde_json::to_value(GenerationConfig::default()).unwrap();
        assert_eq!(json["topP"], 0.5);
        assert_eq!(json["topK"], 40);
        assert_eq!(json["candidateCount"], 1);
        assert_eq!(json["responseMimeType"], "text/plain");
        // safety settings go next to, not inside, generationConfig
        assert!(json.get("safetySettings").is_none());
    }

    #[test]
    fn test_response_parses_candidates_and_usage() {
        let raw = r#"{
            "candidates": [
                { "content": { "role": "model", "parts": [{ "text": "Hi there" }] },
                  "finishReason": "STOP",
                  "tokenCount": 7 }
            ],
            "usageMetadata": { "promptTokenCount": 5, "candidatesTokenCount": 7, "totalTokenCount": 12 }
        }"#;
        let response: GenerateResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.text(), "Hi there");
        assert_eq!(response.output_token_sum(), 7);
        assert_eq!(
            response.usage_metadata.unwrap().total_token_count,
            Some(12)
        );
    }

    #[test]
    fn test_absent_token_counts_sum_to_zero() {
        let response = GenerateResponse {
            candidates: vec![Candidate::default(), Candidate::default()],
            usage_metadata: None,
        };
        assert_eq!(response.output_token_sum(), 0);
    }

    #[test]
    fn test_mixed_token_counts_sum_treats_absent_as_zero() {
        let response = GenerateResponse {
            candidates: vec![
                Candidate {
                    token_count: Some(3),
                    ..Default::default()
                },
                Candidate::default(),
                Candidate {
                    token_count: Some(4),
                    ..Default::default()
                },
            ],
            usage_metadata: None,
        };
        assert_eq!(response.output_token_sum(), 7);
    }

    #[test]
    fn test_empty_response_text_is_empty() {
        assert_eq!(GenerateResponse::default().text(), "");
    }

    #[test]
    fn test_count_tokens_response_parses() {
        let parsed: CountTokensResponse =
            serde_json::from_str(r#"{ "totalTokens": 42 }"#).unwrap();
        assert_eq!(parsed.total_tokens, 42);
    }
}
