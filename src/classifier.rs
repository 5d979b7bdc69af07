use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::ClassifierConfig;
use crate::error::ClassifierError;
use crate::models::Category;

/// Text returned by the summarize endpoint when the model call fails.
pub const SUMMARY_FALLBACK: &str = "Failed to generate summary";

const API_TIMEOUT_SECONDS: u64 = 60;

/// Black-box AI annotation of commits.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<Category, ClassifierError>;

    async fn summarize(&self, commit_message: &str, repository: &str)
        -> Result<String, ClassifierError>;
}

/// Stand-in used when no API key is configured; every call fails closed.
pub struct DisabledClassifier;

#[async_trait]
impl Classifier for DisabledClassifier {
    async fn classify(&self, _text: &str) -> Result<Category, ClassifierError> {
        Err(ClassifierError::Unavailable)
    }

    async fn summarize(&self, _: &str, _: &str) -> Result<String, ClassifierError> {
        Err(ClassifierError::Unavailable)
    }
}

/// OpenAI chat-completions backed classifier.
pub struct OpenAiClassifier {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
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

#[derive(Deserialize)]
struct CategoryReply {
    #[serde(rename = "type", alias = "category")]
    kind: String,
}

impl OpenAiClassifier {
    pub fn new(config: &ClassifierConfig) -> Result<Self, ClassifierError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(API_TIMEOUT_SECONDS))
            .build()?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            api_base: config.api_base.clone(),
            model: config.model.clone(),
        })
    }

    async fn complete(&self, request: &ChatRequest<'_>) -> Result<String, ClassifierError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifierError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let reply: ChatResponse = response.json().await?;
        reply
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or(ClassifierError::EmptyResponse)
    }
}

#[async_trait]
impl Classifier for OpenAiClassifier {
    async fn classify(&self, text: &str) -> Result<Category, ClassifierError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: "You are a code commit classifier. Reply with a JSON object \
                              of the form {\"type\": \"<CATEGORY>\"}."
                        .to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: classification_prompt(text),
                },
            ],
            max_tokens: 50,
            temperature: 0.3,
            response_format: Some(ResponseFormat {
                kind: "json_object",
            }),
        };

        let content = self.complete(&request).await?;
        parse_category(&content)
    }

    async fn summarize(
        &self,
        commit_message: &str,
        repository: &str,
    ) -> Result<String, ClassifierError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: "You are a technical mentor who helps developers track their \
                              learning progress. Format your responses as concise technical \
                              learning points. Focus on skills gained, technologies used, \
                              and problems solved."
                        .to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: summary_prompt(commit_message, repository),
                },
            ],
            max_tokens: 150,
            temperature: 0.5,
            response_format: None,
        };

        self.complete(&request).await
    }
}

fn classification_prompt(text: &str) -> String {
    let mut prompt = format!("Classify this commit:\n{}\n\nCategories:\n", text);
    for category in Category::ALL {
        prompt.push_str(&format!("- {}: {}\n", category.as_str(), category.description()));
    }
    prompt
}

fn summary_prompt(commit_message: &str, repository: &str) -> String {
    format!(
        "Repository: {}\nCommit Message: {}\n\n\
         Generate a concise technical learning summary that:\n\
         1. Focuses on the technical skills or concepts demonstrated\n\
         2. Highlights any new technologies or patterns used\n\
         3. Describes the problem solved or feature implemented\n\n\
         Keep it brief and focused on the learning aspect.",
        repository,
        commit_message.trim()
    )
}

/// Read a category from a model reply: a `{"type": ...}` object, or failing
/// that the first category name mentioned in the text.
pub fn parse_category(content: &str) -> Result<Category, ClassifierError> {
    if let Ok(reply) = serde_json::from_str::<CategoryReply>(content) {
        return match reply.kind.parse() {
            Ok(category) => Ok(category),
            Err(_) => Err(ClassifierError::UnknownCategory(reply.kind)),
        };
    }

    find_category_token(content)
        .ok_or_else(|| ClassifierError::UnknownCategory(content.chars().take(80).collect()))
}

fn find_category_token(content: &str) -> Option<Category> {
    let re = Regex::new(r"(?i)\b(FEATURE|BUGFIX|REFACTOR|TEST|DOCS|INTEGRATION|STYLE|PERF|DEPS)\b").ok()?;
    re.find(content).and_then(|m| m.as_str().parse().ok())
}
