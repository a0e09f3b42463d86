use crate::config::ClassifierConfig;
use anyhow::Result;
use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, sync::OnceLock, time::Duration};
use tracing::{info, warn};


#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Intent {
    EmmaRequest,
    BusinessGeneral,
    SalesGeneral,
    Nonsense,
    Unclear,
    /// Any label the classifier produced that is not a known category.
    Other(String),
}

impl Intent {
    pub fn as_str(&self) -> &str {
        match self {
            Intent::EmmaRequest => "emma_request",
            Intent::BusinessGeneral => "business_general",
            Intent::SalesGeneral => "sales_general",
            Intent::Nonsense => "nonsense",
            Intent::Unclear => "unclear",
            Intent::Other(label) => label.as_str(),
        }
    }
}

impl FromStr for Intent {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let label = s.trim().to_ascii_lowercase();
        Ok(match label.as_str() {
            "emma_request" => Intent::EmmaRequest,
            "business_general" => Intent::BusinessGeneral,
            "sales_general" => Intent::SalesGeneral,
            "nonsense" => Intent::Nonsense,
            "unclear" | "" => Intent::Unclear,
            _ => Intent::Other(label),
        })
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Intent {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Intent {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        Ok(label.parse().unwrap_or(Intent::Unclear))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentAnalysis {
    pub intent: Intent,
    pub confidence: f32,
    pub caller_name: Option<String>,
    pub reasoning: Option<String>,
}

impl IntentAnalysis {
    pub fn unclear() -> Self {
        Self {
            intent: Intent::Unclear,
            confidence: 0.3,
            caller_name: None,
            reasoning: None,
        }
    }
}

#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, transcript: &str) -> Result<IntentAnalysis>;
}

/// Keyword heuristic used when the language model is unavailable.
#[derive(Debug, Default, Clone)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn analyze(transcript: &str) -> IntentAnalysis {
        if transcript.to_lowercase().contains("emma") {
            return IntentAnalysis {
                intent: Intent::EmmaRequest,
                confidence: 0.7,
                caller_name: extract_name(transcript),
                reasoning: Some("keyword match".to_string()),
            };
        }
        IntentAnalysis::unclear()
    }
}

#[async_trait]
impl IntentClassifier for KeywordClassifier {
    async fn classify(&self, transcript: &str) -> Result<IntentAnalysis> {
        Ok(Self::analyze(transcript))
    }
}

fn name_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [r"(?i)my name is ([a-z]+)", r"(?i)this is ([a-z]+)", r"(?i)i'm ([a-z]+)"]
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect()
    })
}

pub fn extract_name(transcript: &str) -> Option<String> {
    name_patterns().iter().find_map(|pattern| {
        pattern
            .captures(transcript)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    })
}

const CLASSIFY_PROMPT: &str = r#"You are an intelligent call routing assistant for {company}.

Analyze the caller's request and determine their intent.

Routing options:
- emma_request: Caller specifically wants to speak with Emma (by name)
- business_general: Any business inquiry, official calls, government matters, tax issues, support needs - route to Michael
- sales_general: Sales inquiries, pricing, purchasing
- nonsense: Obviously fake or prank calls
- unclear: Genuinely unclear what they want

Only route to Emma if they specifically ask for her.

Respond with ONLY this JSON format:
{"intent": "category", "confidence": 0.8, "reasoning": "why you chose this", "callerName": "name if mentioned"}"#;

#[derive(Debug, Deserialize)]
struct RawAnalysis {
    intent: String,
    confidence: Option<f32>,
    reasoning: Option<String>,
    #[serde(alias = "callerName")]
    caller_name: Option<String>,
}

/// Extract and parse the first JSON object in a model reply.
pub fn parse_model_reply(text: &str) -> Option<IntentAnalysis> {
    static OBJECT: OnceLock<Option<Regex>> = OnceLock::new();
    let object = OBJECT
        .get_or_init(|| Regex::new(r"\{[^}]+\}").ok())
        .as_ref()?;
    let json = object.find(text).map(|m| m.as_str()).unwrap_or(text.trim());
    let raw: RawAnalysis = serde_json::from_str(json).ok()?;
    Some(IntentAnalysis {
        intent: raw.intent.parse().unwrap_or(Intent::Unclear),
        confidence: raw.confidence.unwrap_or(0.8),
        caller_name: raw.caller_name.filter(|n| !n.trim().is_empty()),
        reasoning: raw.reasoning,
    })
}

pub struct LlmIntentClassifierBuilder {
    api_key: Option<String>,
    base_url: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    company: String,
}

impl LlmIntentClassifierBuilder {
    pub fn new() -> Self {
        Self {
            api_key: None,
            base_url: None,
            model: ClassifierConfig::default().model,
            temperature: 0.0,
            max_tokens: 200,
            company: "our company".to_string(),
        }
    }

    pub fn with_config(mut self, config: &ClassifierConfig) -> Self {
        self.api_key = config.api_key.clone();
        self.base_url = config.base_url.clone();
        self.model = config.model.clone();
        if let Some(temperature) = config.temperature {
            self.temperature = temperature;
        }
        if let Some(max_tokens) = config.max_tokens {
            self.max_tokens = max_tokens;
        }
        self
    }

    pub fn with_company(mut self, company: impl Into<String>) -> Self {
        self.company = company.into();
        self
    }

    pub fn build(self) -> Result<LlmIntentClassifier> {
        let api_key = self
            .api_key
            .ok_or_else(|| anyhow::anyhow!("API key is required"))?;

        let mut config = OpenAIConfig::new().with_api_key(api_key);
        if let Some(base_url) = self.base_url {
            config = config.with_api_base(base_url);
        }

        Ok(LlmIntentClassifier {
            client: Client::with_config(config),
            model: self.model,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            prompt: CLASSIFY_PROMPT.replace("{company}", &self.company),
        })
    }
}

impl Default for LlmIntentClassifierBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Classifies transcripts with an OpenAI-compatible chat model.
pub struct LlmIntentClassifier {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    prompt: String,
}

#[async_trait]
impl IntentClassifier for LlmIntentClassifier {
    async fn classify(&self, transcript: &str) -> Result<IntentAnalysis> {
        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(self.prompt.as_str())
                .build()?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(format!("Caller said: \"{}\"", transcript))
                .build()?
                .into(),
        ];
        let request = CreateChatCompletionRequestArgs::default()
            .max_tokens(self.max_tokens)
            .model(&self.model)
            .temperature(self.temperature)
            .messages(messages)
            .build()?;

        let response = self.client.chat().create(request).await?;
        let text = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        match parse_model_reply(&text) {
            Some(analysis) => Ok(analysis),
            None => {
                warn!(reply = text.as_str(), "unparseable classifier reply, using keywords");
                Ok(KeywordClassifier::analyze(transcript))
            }
        }
    }
}

/// Classify within the webhook answer window.
///
/// A classifier that misses the deadline yields `unclear`; one that fails
/// outright falls back to the keyword heuristic.
pub async fn classify_with_deadline(
    classifier: &dyn IntentClassifier,
    transcript: &str,
    deadline: Duration,
) -> IntentAnalysis {
    match tokio::time::timeout(deadline, classifier.classify(transcript)).await {
        Ok(Ok(analysis)) => analysis,
        Ok(Err(e)) => {
            warn!("intent classifier failed: {}", e);
            KeywordClassifier::analyze(transcript)
        }
        Err(_) => {
            info!(
                elapsed_ms = deadline.as_millis() as u64,
                "intent classifier timed out"
            );
            IntentAnalysis::unclear()
        }
    }
}
