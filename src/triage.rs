use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use ring::digest::{digest, SHA256};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const SUMMARY_MAX_CHARS: usize = 200;

const TRIAGE_SYSTEM_PROMPT: &str = "You triage property-management emails. \
Reply with strict JSON only: {\"category\": one of MAINTENANCE, RENT_ARREARS, \
LEASING, COMPLIANCE, SALES, GENERAL; \"urgency\": integer 1-5; \"confidence\": \
integer 0-100; \"reasons\": array of short strings; \"summary\": one sentence}.";

/// Inputs the classifier scores. Hashing these is what gates re-scoring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriageInput {
    pub subject: String,
    pub snippet: String,
    pub body_excerpt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriageScore {
    pub category: String,
    pub urgency: i64,
    pub confidence: i64,
    pub reasons: Vec<String>,
    pub summary: String,
}

/// Content hash over the scored inputs; a ticket is only re-scored when this
/// changes.
pub fn source_hash(input: &TriageInput) -> String {
    let mut material = String::new();
    material.push_str(&input.subject);
    material.push('\n');
    material.push_str(&input.snippet);
    material.push('\n');
    material.push_str(&input.body_excerpt);
    hex_encode(digest(&SHA256, material.as_bytes()).as_ref())
}

fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}

/// Scoring is best-effort from the reconciler's point of view: an `Err` here
/// must never fail a sync.
#[async_trait(?Send)]
pub trait TriageClassifier {
    async fn score(&self, input: &TriageInput) -> Result<TriageScore>;
}

/// Pick the remote classifier when an API key is configured, the
/// deterministic rule classifier otherwise.
pub fn classifier_from_config(config: &Config) -> Box<dyn TriageClassifier> {
    match &config.openai_api_key {
        Some(api_key) => Box::new(RemoteClassifier::new(
            api_key.clone(),
            config.openai_model.clone(),
        )),
        None => Box::new(RuleClassifier),
    }
}

// --- Rule-based fallback ---

struct CategoryRule {
    category: &'static str,
    keywords: &'static [&'static str],
}

const CATEGORY_RULES: &[CategoryRule] = &[
    CategoryRule {
        category: "MAINTENANCE",
        keywords: &[
            "leak", "repair", "broken", "plumb", "heating", "hot water", "electrical", "mould",
            "pest", "damage",
        ],
    },
    CategoryRule {
        category: "RENT_ARREARS",
        keywords: &["arrears", "overdue", "missed payment", "rent payment", "outstanding balance"],
    },
    CategoryRule {
        category: "LEASING",
        keywords: &["lease", "application", "viewing", "vacate", "notice to leave", "renewal"],
    },
    CategoryRule {
        category: "COMPLIANCE",
        keywords: &["smoke alarm", "compliance", "certificate", "inspection", "regulation"],
    },
    CategoryRule {
        category: "SALES",
        keywords: &["appraisal", "selling", "listing", "market value", "open home"],
    },
];

const URGENCY_KEYWORDS: &[&str] = &["urgent", "emergency", "asap", "immediately", "flood", "no heat"];

/// Deterministic keyword classifier, used when no remote service is
/// configured and always available as a fallback.
pub struct RuleClassifier;

#[async_trait(?Send)]
impl TriageClassifier for RuleClassifier {
    async fn score(&self, input: &TriageInput) -> Result<TriageScore> {
        let haystack = format!(
            "{}\n{}\n{}",
            input.subject, input.snippet, input.body_excerpt
        )
        .to_ascii_lowercase();

        let mut category = "GENERAL";
        let mut reasons = Vec::new();
        let mut best_hits = 0usize;

        for rule in CATEGORY_RULES {
            let hits: Vec<&str> = rule
                .keywords
                .iter()
                .copied()
                .filter(|kw| haystack.contains(kw))
                .collect();
            if hits.len() > best_hits {
                best_hits = hits.len();
                category = rule.category;
                reasons = hits
                    .iter()
                    .map(|kw| format!("matched keyword '{kw}'"))
                    .collect();
            }
        }

        let mut urgency: i64 = if best_hits > 0 { 3 } else { 2 };
        for kw in URGENCY_KEYWORDS {
            if haystack.contains(kw) {
                urgency = 5;
                reasons.push(format!("urgency keyword '{kw}'"));
                break;
            }
        }

        let confidence: i64 = match best_hits {
            0 => 30,
            1 => 55,
            2 => 70,
            _ => 85,
        };

        let source = if !input.snippet.trim().is_empty() {
            input.snippet.trim()
        } else {
            input.body_excerpt.trim()
        };
        let summary = source
            .lines()
            .next()
            .unwrap_or_default()
            .chars()
            .take(SUMMARY_MAX_CHARS)
            .collect::<String>();

        Ok(TriageScore {
            category: category.to_string(),
            urgency,
            confidence,
            reasons,
            summary,
        })
    }
}

// --- Remote classifier ---

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

pub struct RemoteClassifier {
    client: reqwest::Client,
    api_key: String,
    model: String,
    api_url: String,
}

impl RemoteClassifier {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            api_url: OPENAI_API_URL.to_string(),
        }
    }
}

#[async_trait(?Send)]
impl TriageClassifier for RemoteClassifier {
    async fn score(&self, input: &TriageInput) -> Result<TriageScore> {
        let user_content = format!(
            "Subject: {}\nSnippet: {}\nBody:\n{}",
            input.subject, input.snippet, input.body_excerpt
        );

        let messages = vec![
            ChatMessage {
                role: "system",
                content: TRIAGE_SYSTEM_PROMPT.to_string(),
            },
            ChatMessage {
                role: "user",
                content: user_content,
            },
        ];
        let payload = serde_json::json!({
            "model": self.model,
            "temperature": 0.2,
            "messages": messages,
        });

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .context("request triage completion")?;

        let status = response.status();
        let body = response.text().await.context("read triage response")?;
        if !status.is_success() {
            return Err(anyhow!("triage request failed: status={status}"));
        }

        let completion: ChatCompletionResponse =
            serde_json::from_str(&body).context("decode triage completion")?;
        let content = completion
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .ok_or_else(|| anyhow!("triage completion had no content"))?;

        let score = parse_score_json(content)?;
        debug!(category = %score.category, urgency = score.urgency, "remote triage scored");
        Ok(score)
    }
}

/// Parse the model's JSON reply, tolerating markdown code fences, and clamp
/// the numeric fields to their documented ranges.
fn parse_score_json(content: &str) -> Result<TriageScore> {
    let trimmed = content.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix("```").unwrap_or(trimmed).trim();

    let mut score: TriageScore =
        serde_json::from_str(trimmed).context("parse triage score JSON")?;
    score.urgency = score.urgency.clamp(1, 5);
    score.confidence = score.confidence.clamp(0, 100);
    Ok(score)
}

#[cfg(test)]
mod tests {
    use super::{parse_score_json, source_hash, RuleClassifier, TriageClassifier, TriageInput};

    fn input(subject: &str, snippet: &str, body: &str) -> TriageInput {
        TriageInput {
            subject: subject.to_string(),
            snippet: snippet.to_string(),
            body_excerpt: body.to_string(),
        }
    }

    #[tokio::test]
    async fn rule_classifier_is_deterministic() {
        let classifier = RuleClassifier;
        let sample = input(
            "Urgent: leak in bathroom",
            "Water is leaking through the ceiling",
            "Please send a plumber, this is an emergency.",
        );

        let first = classifier.score(&sample).await.expect("first score");
        let second = classifier.score(&sample).await.expect("second score");
        assert_eq!(first, second);
        assert_eq!(first.category, "MAINTENANCE");
        assert_eq!(first.urgency, 5);
        assert!(first.confidence >= 55);
        assert!(!first.reasons.is_empty());
    }

    #[tokio::test]
    async fn rule_classifier_falls_back_to_general() {
        let classifier = RuleClassifier;
        let score = classifier
            .score(&input("Hello", "Just checking in", "How are things?"))
            .await
            .expect("score");
        assert_eq!(score.category, "GENERAL");
        assert_eq!(score.urgency, 2);
    }

    #[test]
    fn source_hash_changes_with_content() {
        let a = source_hash(&input("Subject", "Snippet", "Body"));
        let b = source_hash(&input("Subject", "Snippet", "Body changed"));
        let a2 = source_hash(&input("Subject", "Snippet", "Body"));
        assert_ne!(a, b);
        assert_eq!(a, a2);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn score_json_parses_with_code_fences_and_clamps() {
        let content = r#"```json
        {"category": "MAINTENANCE", "urgency": 9, "confidence": 150,
         "reasons": ["leak mentioned"], "summary": "Tenant reports a leak."}
        ```"#;
        let score = parse_score_json(content).expect("parse fenced score");
        assert_eq!(score.category, "MAINTENANCE");
        assert_eq!(score.urgency, 5);
        assert_eq!(score.confidence, 100);
        assert!(parse_score_json("not json").is_err());
    }
}
