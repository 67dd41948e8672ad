//! OpenAI chat-completions provider.
//!
//! Every prompt asks for a JSON object. Replies are parsed tolerantly because models
//! wrap JSON in code fences or prose often enough to matter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::time::Duration;
use url::Url;

use super::{
    ActionableInsight, AiError, AiProvider, EmailAnalysis, EmailCategory, EmailContent,
    ExecutiveMetrics, ExecutiveNarrative, InsightStats, Priority, Sentiment, TrendNarrative,
    TrendSummary, clamp_or,
};

const ANALYSIS_BODY_CHARS: usize = 2000;
const CLASSIFY_BODY_CHARS: usize = 500;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct OpenAiProvider {
    client: reqwest::Client,
    endpoint: Url,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

/// Analysis as the model returns it, before validation.
#[derive(Debug, Deserialize)]
struct RawAnalysis {
    #[serde(default)]
    category: String,
    priority: Option<String>,
    sentiment: Option<String>,
    #[serde(default)]
    sentiment_score: f64,
    #[serde(default = "default_importance")]
    importance_score: f64,
    #[serde(default)]
    key_topics: Vec<String>,
    #[serde(default)]
    requires_action: bool,
    action_type: Option<String>,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    confidence: f64,
}

fn default_importance() -> f64 {
    0.5
}

#[derive(Deserialize)]
struct RawClassification {
    category: String,
}

#[derive(Deserialize)]
struct RawInsights {
    #[serde(default)]
    insights: Vec<ActionableInsight>,
}

impl OpenAiProvider {
    pub fn new(api_key: &str, base_url: &str, model: &str) -> Result<Self, AiError> {
        let base = Url::parse(&format!("{}/", base_url.trim_end_matches('/')))
            .map_err(|e| AiError::Config(format!("invalid OPENAI_BASE_URL: {e}")))?;
        let endpoint = base
            .join("chat/completions")
            .map_err(|e| AiError::Config(format!("invalid OPENAI_BASE_URL: {e}")))?;

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            endpoint,
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    async fn complete(
        &self,
        system: &str,
        prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, AiError> {
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature,
            max_tokens,
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::Status {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        let chat: ChatResponse = response.json().await?;
        chat.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| AiError::Parse("response contained no message".into()))
    }

    async fn complete_json<T: DeserializeOwned>(
        &self,
        system: &str,
        prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<T, AiError> {
        let reply = self.complete(system, prompt, temperature, max_tokens).await?;
        parse_json_reply(&reply)
    }
}

#[async_trait]
impl AiProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn analyze_email(&self, content: &EmailContent) -> Result<EmailAnalysis, AiError> {
        let categories: Vec<&str> = EmailCategory::KNOWN.iter().map(|c| c.as_str()).collect();
        let prompt = format!(
            "Analyze this email and return a JSON object with these keys:\n\
             category (one of: {categories}), priority (low|medium|high|urgent), \
             sentiment (positive|neutral|negative), sentiment_score (-1.0 to 1.0), \
             importance_score (0.0 to 1.0), key_topics (up to 5 short strings), \
             requires_action (boolean), action_type (reply|review|schedule|follow_up or null), \
             summary (one or two sentences), confidence (0.0 to 1.0).\n\n\
             From: {sender}\nSubject: {subject}\nHas attachments: {attachments}\n\
             Body:\n{body}",
            categories = categories.join(", "),
            sender = content.sender,
            subject = content.subject,
            attachments = content.has_attachments,
            body = truncate_chars(&content.body, ANALYSIS_BODY_CHARS),
        );

        let raw: RawAnalysis = self
            .complete_json("You are an email analysis expert. Reply with JSON only.", &prompt, 0.1, 500)
            .await?;
        Ok(raw.into_analysis())
    }

    async fn classify(
        &self,
        content: &EmailContent,
        categories: &[String],
    ) -> Result<String, AiError> {
        let prompt = format!(
            "Classify this email into exactly one of these categories: {}.\n\
             Return JSON: {{\"category\": \"<name>\"}}\n\n\
             Subject: {}\nContent: {}",
            categories.join(", "),
            content.subject,
            truncate_chars(&content.body, CLASSIFY_BODY_CHARS),
        );

        let reply = self
            .complete("You are an email classification expert.", &prompt, 0.1, 50)
            .await?;

        match parse_json_reply::<RawClassification>(&reply) {
            Ok(parsed) => Ok(parsed.category.trim().to_string()),
            Err(_) => Ok(reply.trim().trim_matches(['"', '\'', '.']).to_string()),
        }
    }

    async fn actionable_insights(
        &self,
        stats: &InsightStats,
    ) -> Result<Vec<ActionableInsight>, AiError> {
        let stats_json =
            serde_json::to_string(stats).map_err(|e| AiError::Parse(e.to_string()))?;
        let prompt = format!(
            "Analyze these email statistics and provide 3-5 actionable insights.\n\
             Statistics: {stats_json}\n\n\
             Return JSON: {{\"insights\": [{{\"type\": \"productivity|priority|time_management|communication\", \
             \"title\": \"...\", \"description\": \"...\", \"impact_level\": \"high|medium|low\", \
             \"action_items\": [\"...\"], \"estimated_time_saved\": <minutes>}}]}}"
        );

        let raw: RawInsights = self
            .complete_json("You are an email productivity expert.", &prompt, 0.3, 800)
            .await?;
        Ok(raw.insights)
    }

    async fn trend_narrative(&self, summary: &TrendSummary) -> Result<TrendNarrative, AiError> {
        let summary_json =
            serde_json::to_string(summary).map_err(|e| AiError::Parse(e.to_string()))?;
        let prompt = format!(
            "Analyze these email trends over {} days.\nData: {summary_json}\n\n\
             Return JSON with keys: key_trends (list), sentiment_trend, volume_trend, \
             notable_patterns (list), recommendations (list), risk_areas (list), \
             confidence_level (high|medium|low).",
            summary.period_days
        );

        self.complete_json("You are an email analytics expert.", &prompt, 0.3, 800)
            .await
    }

    async fn executive_summary(
        &self,
        metrics: &ExecutiveMetrics,
    ) -> Result<ExecutiveNarrative, AiError> {
        let metrics_json =
            serde_json::to_string(metrics).map_err(|e| AiError::Parse(e.to_string()))?;
        let prompt = format!(
            "Create an executive summary of email activity over the past {}.\n\
             Key metrics: {metrics_json}\n\n\
             Return JSON with keys: highlights (list), concerns (list), recommendations (list).",
            metrics.period
        );

        self.complete_json(
            "You are an executive email productivity advisor.",
            &prompt,
            0.2,
            600,
        )
        .await
    }
}

impl RawAnalysis {
    fn into_analysis(self) -> EmailAnalysis {
        let sentiment_score = clamp_or(self.sentiment_score, -1.0, 1.0, 0.0);
        let importance_score = clamp_or(self.importance_score, 0.0, 1.0, 0.5);

        let sentiment = match self.sentiment.as_deref().map(str::trim) {
            Some(label) if label.eq_ignore_ascii_case("positive") => Sentiment::Positive,
            Some(label) if label.eq_ignore_ascii_case("negative") => Sentiment::Negative,
            Some(label) if label.eq_ignore_ascii_case("neutral") => Sentiment::Neutral,
            _ => Sentiment::from_score(sentiment_score),
        };

        let priority = self
            .priority
            .as_deref()
            .and_then(Priority::parse_lenient)
            .unwrap_or_else(|| Priority::from_importance(importance_score));

        EmailAnalysis {
            category: EmailCategory::parse_lenient(&self.category),
            priority,
            sentiment,
            sentiment_score,
            importance_score,
            key_topics: self.key_topics.into_iter().take(5).collect(),
            requires_action: self.requires_action,
            action_type: self.action_type.filter(|a| !a.trim().is_empty()),
            summary: self.summary,
            confidence: clamp_or(self.confidence, 0.0, 1.0, 0.0),
        }
    }
}

/// Deserialize the first JSON object found in a model reply.
fn parse_json_reply<T: DeserializeOwned>(reply: &str) -> Result<T, AiError> {
    let object = extract_json_object(reply)
        .ok_or_else(|| AiError::Parse("no JSON object in reply".into()))?;
    serde_json::from_str(object).map_err(|e| AiError::Parse(e.to_string()))
}

/// Locate the first balanced `{...}` in `text`, ignoring braces inside strings.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_object_from_fenced_reply() {
        let reply = "Here you go:\n```json\n{\"category\": \"work\", \"note\": \"a } brace\"}\n```";
        assert_eq!(
            extract_json_object(reply),
            Some("{\"category\": \"work\", \"note\": \"a } brace\"}")
        );
    }

    #[test]
    fn nested_objects_are_kept_whole() {
        let reply = "{\"a\": {\"b\": 1}} trailing {\"c\": 2}";
        assert_eq!(extract_json_object(reply), Some("{\"a\": {\"b\": 1}}"));
        assert_eq!(extract_json_object("no json here"), None);
        assert_eq!(extract_json_object("{\"open\": true"), None);
    }

    #[test]
    fn raw_analysis_is_validated() {
        let raw: RawAnalysis = parse_json_reply(
            r#"```{"category": "Finance", "sentiment_score": -4.2, "importance_score": 1.7,
                "confidence": 0.9, "priority": "nope", "summary": "Pay the bill",
                "key_topics": ["a","b","c","d","e","f"]}```"#,
        )
        .unwrap();
        let analysis = raw.into_analysis();

        assert_eq!(analysis.category, EmailCategory::Uncategorized);
        assert_eq!(analysis.sentiment_score, -1.0);
        assert_eq!(analysis.sentiment, Sentiment::Negative);
        assert_eq!(analysis.importance_score, 1.0);
        assert_eq!(analysis.priority, Priority::Urgent);
        assert_eq!(analysis.key_topics.len(), 5);
        assert_eq!(analysis.confidence, 0.9);
    }

    #[test]
    fn explicit_labels_win_over_scores() {
        let raw: RawAnalysis = parse_json_reply(
            r#"{"category": "work", "sentiment": "Positive", "sentiment_score": 0.0, "priority": "LOW", "importance_score": 0.9}"#,
        )
        .unwrap();
        let analysis = raw.into_analysis();
        assert_eq!(analysis.sentiment, Sentiment::Positive);
        assert_eq!(analysis.priority, Priority::Low);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }

    #[test]
    fn base_url_must_parse() {
        assert!(OpenAiProvider::new("sk-test", "not a url", "gpt-4").is_err());

        let provider =
            OpenAiProvider::new("sk-test", "https://api.openai.com/v1/", "gpt-4").unwrap();
        assert_eq!(
            provider.endpoint.as_str(),
            "https://api.openai.com/v1/chat/completions"
        );
    }
}
