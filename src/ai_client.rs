use crate::circuit_breaker::{create_ai_circuit_breaker, AiCircuitBreaker};
use crate::config::Config;
use crate::errors::AppError;
use async_trait::async_trait;
use failsafe::futures::CircuitBreaker;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;

/// Nation answers below this confidence are discarded.
pub const MIN_AI_NATION_CONFIDENCE: f64 = 40.0;

const AI_TIMEOUT: Duration = Duration::from_secs(60);

const EVALUATION_SYSTEM_PROMPT: &str = "You are an expert technical talent assessor. \
Evaluate the developer from the facts provided and answer with a single JSON object.";

const NATION_SYSTEM_PROMPT: &str = "You infer which country a software developer most likely \
lives in from public profile facts. Answer with a single JSON object.";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// A chat-completion endpoint returning free-form text.
#[async_trait]
pub trait AiService: Send + Sync {
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String, AppError>;
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: String,
}

/// Client for an OpenAI-compatible chat-completions endpoint.
///
/// Non-200 answers are errors; retrying is the caller's business. Calls go
/// through a circuit breaker, and a rejected call surfaces as a transient
/// `ExternalApiError`.
#[derive(Clone)]
pub struct AiClient {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    breaker: AiCircuitBreaker,
}

impl AiClient {
    pub fn new(api_url: String, api_key: String, model: String) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(AI_TIMEOUT)
            .build()
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to create AI client: {}", e))
            })?;

        Ok(Self {
            client,
            api_url,
            api_key,
            model,
            breaker: create_ai_circuit_breaker(),
        })
    }

    /// Builds a client when an API key is configured.
    pub fn from_config(config: &Config) -> Result<Option<Self>, AppError> {
        match &config.ai_api_key {
            Some(key) => Ok(Some(Self::new(
                config.ai_api_url.clone(),
                key.clone(),
                config.ai_model.clone(),
            )?)),
            None => Ok(None),
        }
    }

    async fn send(&self, messages: Vec<ChatMessage>) -> Result<String, AppError> {
        let body = json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
        });

        tracing::debug!("Sending completion request to {}", self.api_url);

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "AI endpoint returned {}: {}",
                status, error_text
            )));
        }

        let data: ChatResponse = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse AI response: {}", e))
        })?;

        data.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| AppError::ExternalApiError("AI response had no choices".to_string()))
    }
}

#[async_trait]
impl AiService for AiClient {
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String, AppError> {
        match self.breaker.call(self.send(messages)).await {
            Ok(content) => Ok(content),
            Err(failsafe::Error::Inner(e)) => Err(e),
            Err(failsafe::Error::Rejected) => Err(AppError::ExternalApiError(
                "AI circuit breaker is open".to_string(),
            )),
        }
    }
}

// ============ Prompts ============

/// Profile facts handed to the AI service.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeveloperFacts {
    pub username: String,
    pub name: String,
    pub bio: String,
    pub location: String,
    pub email: String,
    pub company: String,
    pub profile_url: String,
    pub blog_url: String,
    pub skills: Vec<String>,
    pub repositories: Vec<String>,
    pub star_count: i64,
    pub fork_count: i64,
    pub commit_count: i64,
    pub followers: i64,
    pub last_active: Option<String>,
}

impl DeveloperFacts {
    fn render(&self) -> String {
        let or_unknown = |s: &str| {
            if s.trim().is_empty() {
                "unknown".to_string()
            } else {
                s.to_string()
            }
        };

        format!(
            "Profile:\n\
             - username: {}\n\
             - name: {}\n\
             - bio: {}\n\
             - location: {}\n\
             - email: {}\n\
             - company: {}\n\
             \n\
             Online presence:\n\
             - profile: {}\n\
             - blog: {}\n\
             \n\
             Technology:\n\
             - skills: {}\n\
             - repositories: {}\n\
             \n\
             Statistics:\n\
             - stars: {}\n\
             - forks: {}\n\
             - commit volume: {}\n\
             - followers: {}\n\
             - last active: {}\n",
            self.username,
            or_unknown(&self.name),
            or_unknown(&self.bio),
            or_unknown(&self.location),
            or_unknown(&self.email),
            or_unknown(&self.company),
            or_unknown(&self.profile_url),
            or_unknown(&self.blog_url),
            self.skills.join(", "),
            self.repositories.join(", "),
            self.star_count,
            self.fork_count,
            self.commit_count,
            self.followers,
            self.last_active.as_deref().unwrap_or("unknown"),
        )
    }
}

/// Messages asking for specialties, per-technology experience and an overall evaluation.
pub fn evaluation_messages(facts: &DeveloperFacts) -> Vec<ChatMessage> {
    let prompt = format!(
        "Assess this developer's technical ability.\n\n{}\n\
         Reply with JSON in this shape:\n\
         {{\n  \"specialties\": [\"area 1\", \"area 2\"],\n  \
         \"experience\": {{\"technology\": \"assessment\"}},\n  \
         \"evaluation\": \"overall assessment covering depth, breadth and project quality\"\n}}\n",
        facts.render()
    );
    vec![
        ChatMessage::system(EVALUATION_SYSTEM_PROMPT),
        ChatMessage::user(prompt),
    ]
}

/// Messages asking for a two-letter country code and a confidence.
pub fn nation_messages(facts: &DeveloperFacts) -> Vec<ChatMessage> {
    let prompt = format!(
        "Which country does this developer most likely live in?\n\n{}\n\
         Reply with JSON in this shape:\n\
         {{\"nation\": \"two-letter ISO 3166 code, empty if unsure\", \"confidence\": 0-100}}\n",
        facts.render()
    );
    vec![
        ChatMessage::system(NATION_SYSTEM_PROMPT),
        ChatMessage::user(prompt),
    ]
}

// ============ Response parsing ============

/// Fields recovered from an AI answer. Missing fields are empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AiEvaluation {
    pub nation: String,
    /// In [0, 100]; answers given as a fraction are scaled up.
    pub confidence: f64,
    pub specialties: Vec<String>,
    pub experience: BTreeMap<String, String>,
    pub evaluation: String,
}

impl AiEvaluation {
    /// The nation answer when it is a two-letter code with enough confidence.
    pub fn accepted_nation(&self) -> Option<(String, f64)> {
        let code = self.nation.trim().to_uppercase();
        let valid = code.len() == 2 && code.chars().all(|c| c.is_ascii_uppercase());
        if valid && self.confidence >= MIN_AI_NATION_CONFIDENCE {
            Some((code, self.confidence.min(100.0)))
        } else {
            None
        }
    }
}

static FENCED_JSON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*\n?(.*?)```").unwrap());
static SPECIALTIES_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)(?:专长|(?i:specialties))\s*[：:]\s*(.*?)\s*$").unwrap());
static EVALUATION_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)(?:评[价估]|(?i:evaluation))\s*[：:]\s*(.*?)\s*$").unwrap()
});
static NATION_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?mi)"?(?:nation|country)"?\s*[：:]\s*"?([a-z]{2})\b"#).unwrap()
});
static CONFIDENCE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?mi)"?confidence"?\s*[：:]\s*"?([0-9]+(?:\.[0-9]+)?)"#).unwrap()
});
static KEY_VALUE_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[\s\-*•]*([\w.+#]+)\s*[：:]\s*(.+?)\s*$").unwrap());
static LIST_SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"[,，、;；]").unwrap());

const LABEL_KEYS: &[&str] = &[
    "专长",
    "评价",
    "评估",
    "specialties",
    "evaluation",
    "nation",
    "country",
    "confidence",
    "experience",
];

/// Parses a completion into structured fields. Never fails.
///
/// A fenced JSON block (or the raw text) is parsed as a JSON object first.
/// When that fails, individual fields are pulled out of the text line by
/// line, and the evaluation falls back to the whole trimmed text.
pub fn parse_response(text: &str) -> AiEvaluation {
    if let Some(parsed) = parse_structured(text) {
        return parsed;
    }

    tracing::debug!("AI response is not JSON, extracting fields from text");

    AiEvaluation {
        nation: NATION_LINE
            .captures(text)
            .map(|c| c[1].to_uppercase())
            .unwrap_or_default(),
        confidence: CONFIDENCE_LINE
            .captures(text)
            .and_then(|c| c[1].parse::<f64>().ok())
            .map(normalize_confidence)
            .unwrap_or(0.0),
        specialties: SPECIALTIES_LINE
            .captures(text)
            .map(|c| split_list(&c[1]))
            .unwrap_or_default(),
        experience: extract_experience(text),
        evaluation: EVALUATION_LINE
            .captures(text)
            .map(|c| c[1].trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| text.trim().to_string()),
    }
}

fn parse_structured(text: &str) -> Option<AiEvaluation> {
    let candidate = FENCED_JSON
        .captures(text)
        .map(|c| c[1].trim().to_string())
        .unwrap_or_else(|| text.trim().to_string());

    let value: Value = serde_json::from_str(&candidate).ok()?;
    let obj = value.as_object()?;

    let nation = obj
        .get("nation")
        .or_else(|| obj.get("country"))
        .and_then(Value::as_str)
        .map(|s| s.trim().to_uppercase())
        .unwrap_or_default();

    let confidence = obj
        .get("confidence")
        .and_then(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().trim_end_matches('%').parse().ok(),
            _ => None,
        })
        .map(normalize_confidence)
        .unwrap_or(0.0);

    let specialties = match obj.get("specialties") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) => split_list(s),
        _ => Vec::new(),
    };

    let experience = match obj.get("experience") {
        Some(Value::Object(map)) => map
            .iter()
            .map(|(k, v)| {
                let v = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), v)
            })
            .collect(),
        _ => BTreeMap::new(),
    };

    let evaluation = obj
        .get("evaluation")
        .or_else(|| obj.get("ai_evaluation"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| text.trim())
        .to_string();

    Some(AiEvaluation {
        nation,
        confidence,
        specialties,
        experience,
        evaluation,
    })
}

/// Confidences are percentages. Values strictly below 1 are read as a
/// fraction and scaled, so a literal `1` stays 1%.
fn normalize_confidence(value: f64) -> f64 {
    if !value.is_finite() || value < 0.0 {
        return 0.0;
    }
    let pct = if value < 1.0 { value * 100.0 } else { value };
    pct.min(100.0)
}

fn split_list(s: &str) -> Vec<String> {
    LIST_SEPARATOR
        .split(s)
        .map(|item| item.trim().trim_matches('"').to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

fn extract_experience(text: &str) -> BTreeMap<String, String> {
    KEY_VALUE_LINE
        .captures_iter(text)
        .filter_map(|c| {
            let key = c[1].trim().to_string();
            let value = c[2].trim().to_string();
            let is_label = LABEL_KEYS.iter().any(|l| key.eq_ignore_ascii_case(l));
            if key.is_empty() || value.is_empty() || is_label {
                None
            } else {
                Some((key, value))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fenced_json() {
        let text = "Here is my assessment:\n```json\n{\n  \"specialties\": [\"Backend\", \"Distributed systems\"],\n  \"experience\": {\"Go\": \"8 years of production services\"},\n  \"evaluation\": \"Strong systems engineer.\"\n}\n```\nLet me know.";
        let parsed = parse_response(text);

        assert_eq!(parsed.specialties, vec!["Backend", "Distributed systems"]);
        assert_eq!(
            parsed.experience.get("Go").map(String::as_str),
            Some("8 years of production services")
        );
        assert_eq!(parsed.experience.len(), 1);
        assert_eq!(parsed.evaluation, "Strong systems engineer.");
    }

    #[test]
    fn test_parse_plain_text_keeps_raw_evaluation() {
        let text = "  This developer writes a lot of small tools and seems competent.  ";
        let parsed = parse_response(text);

        assert!(parsed.specialties.is_empty());
        assert!(parsed.experience.is_empty());
        assert_eq!(
            parsed.evaluation,
            "This developer writes a lot of small tools and seems competent."
        );
        assert!(parsed.nation.is_empty());
    }

    #[test]
    fn test_parse_labelled_text_fallback() {
        let text = "专长：后端开发, 分布式系统\nRust: five years\n评价：经验丰富";
        let parsed = parse_response(text);

        assert_eq!(parsed.specialties, vec!["后端开发", "分布式系统"]);
        assert_eq!(
            parsed.experience.get("Rust").map(String::as_str),
            Some("five years")
        );
        assert!(!parsed.experience.contains_key("专长"));
        assert_eq!(parsed.evaluation, "经验丰富");
    }

    #[test]
    fn test_parse_nation_answer() {
        let parsed = parse_response("```json\n{\"nation\": \"de\", \"confidence\": 0.72}\n```");
        assert_eq!(parsed.nation, "DE");
        assert!((parsed.confidence - 72.0).abs() < 1e-9);

        let (code, confidence) = parsed.accepted_nation().unwrap();
        assert_eq!(code, "DE");
        assert!((confidence - 72.0).abs() < 1e-9);
    }

    #[test]
    fn test_json_without_evaluation_keeps_raw_text() {
        let text = "  {\"summary\": \"writes parsers\"}  ";
        let parsed = parse_response(text);

        assert_eq!(parsed.evaluation, "{\"summary\": \"writes parsers\"}");
        assert!(parsed.specialties.is_empty());
    }

    #[test]
    fn test_confidence_of_one_is_a_percentage() {
        let parsed = parse_response("{\"nation\": \"JP\", \"confidence\": 1}");
        assert!((parsed.confidence - 1.0).abs() < 1e-9);
        assert_eq!(parsed.accepted_nation(), None);

        let parsed = parse_response("{\"nation\": \"JP\", \"confidence\": 0.99}");
        assert!((parsed.confidence - 99.0).abs() < 1e-9);
    }

    #[test]
    fn test_low_confidence_nation_is_rejected() {
        let parsed = parse_response("{\"nation\": \"FR\", \"confidence\": 20}");
        assert_eq!(parsed.accepted_nation(), None);

        let parsed = parse_response("{\"nation\": \"France\", \"confidence\": 95}");
        assert_eq!(parsed.accepted_nation(), None);
    }

    #[test]
    fn test_evaluation_messages_carry_facts() {
        let facts = DeveloperFacts {
            username: "octocat".to_string(),
            skills: vec!["Rust".to_string(), "Go".to_string()],
            ..Default::default()
        };
        let messages = evaluation_messages(&facts);

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert!(messages[1].content.contains("octocat"));
        assert!(messages[1].content.contains("Rust, Go"));
    }
}
