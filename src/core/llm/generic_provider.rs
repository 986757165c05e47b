use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::catalog::{ApiFormat, ProviderDef};
use super::{ChatMessage, LlmProvider};
use crate::core::errors::InvokeError;

// ── OpenAI-compatible request/response ──

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage<'a>>,
}

#[derive(Serialize)]
struct OpenAiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessageOwned,
}

#[derive(Deserialize)]
struct OpenAiMessageOwned {
    #[serde(default)]
    content: Option<String>,
}

// ── Gemini request/response ──

#[derive(Serialize)]
struct GeminiRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    contents: Vec<GeminiContent>,
}

#[derive(Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiResContent,
}

#[derive(Deserialize)]
struct GeminiResContent {
    #[serde(default)]
    parts: Vec<GeminiResPart>,
}

#[derive(Deserialize)]
struct GeminiResPart {
    text: String,
}

// ── Generic Provider ──

pub struct GenericProvider {
    provider_def: ProviderDef,
    api_key: String,
    client: Client,
}

impl GenericProvider {
    pub fn new(provider_def: ProviderDef, api_key: String) -> Self {
        Self {
            provider_def,
            api_key,
            client: Client::new(),
        }
    }

    async fn generate_openai(
        &self,
        model_id: &str,
        messages: &[ChatMessage],
    ) -> Result<String, InvokeError> {
        let req = OpenAiRequest {
            model: model_id,
            messages: messages
                .iter()
                .map(|m| OpenAiMessage {
                    role: &m.role,
                    content: &m.content,
                })
                .collect(),
        };

        let mut request = self
            .client
            .post(&self.provider_def.base_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&req);
        for (name, value) in &self.provider_def.extra_headers {
            request = request.header(name, value);
        }

        let res = check_status(request.send().await.map_err(transport_error)?).await?;
        let parsed: OpenAiResponse = read_envelope(res, "completion").await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| InvokeError::MalformedResponse("completion had no content".into()))
    }

    async fn generate_gemini(
        &self,
        model_id: &str,
        messages: &[ChatMessage],
    ) -> Result<String, InvokeError> {
        let mut system_instruction: Option<GeminiContent> = None;
        let mut contents: Vec<GeminiContent> = Vec::new();

        for m in messages {
            if m.role == "system" {
                match system_instruction.as_mut().and_then(|si| si.parts.first_mut()) {
                    Some(part) => {
                        part.text.push('\n');
                        part.text.push_str(&m.content);
                    }
                    None => {
                        system_instruction = Some(GeminiContent {
                            role: "user".to_string(),
                            parts: vec![GeminiPart {
                                text: m.content.clone(),
                            }],
                        });
                    }
                }
                continue;
            }

            let role = if m.role == "assistant" { "model" } else { "user" };
            // Gemini requires strictly alternating roles.
            match contents.last_mut() {
                Some(last) if last.role == role => {
                    if let Some(part) = last.parts.first_mut() {
                        part.text.push('\n');
                        part.text.push_str(&m.content);
                    }
                }
                _ => contents.push(GeminiContent {
                    role: role.to_string(),
                    parts: vec![GeminiPart {
                        text: m.content.clone(),
                    }],
                }),
            }
        }

        let req = GeminiRequest {
            system_instruction,
            contents,
        };
        let url = format!(
            "{}/{}:generateContent",
            self.provider_def.base_url.trim_end_matches('/'),
            model_id
        );

        let mut request = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&req);
        for (name, value) in &self.provider_def.extra_headers {
            request = request.header(name, value);
        }

        let res = check_status(request.send().await.map_err(transport_error)?).await?;
        let parsed: GeminiResponse = read_envelope(res, "gemini").await?;
        parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| InvokeError::MalformedResponse("candidate had no text".into()))
    }
}

fn transport_error(e: reqwest::Error) -> InvokeError {
    InvokeError::ConnectionFailure(e.to_string())
}

/// A body cut off in transit is a connection failure; only a complete body
/// that fails to parse counts as malformed.
async fn read_envelope<T: DeserializeOwned>(
    res: Response,
    label: &str,
) -> Result<T, InvokeError> {
    let bytes = res.bytes().await.map_err(transport_error)?;
    serde_json::from_slice(&bytes).map_err(|e| {
        InvokeError::MalformedResponse(format!("unreadable {} envelope: {}", label, e))
    })
}

async fn check_status(res: Response) -> Result<Response, InvokeError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return Err(InvokeError::Unavailable {
            status: status.as_u16(),
        });
    }
    let body: String = res
        .text()
        .await
        .unwrap_or_default()
        .chars()
        .take(512)
        .collect();
    Err(InvokeError::Rejected {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl LlmProvider for GenericProvider {
    fn name(&self) -> &str {
        &self.provider_def.id
    }

    async fn generate(
        &self,
        model_id: &str,
        messages: &[ChatMessage],
    ) -> Result<String, InvokeError> {
        match self.provider_def.api_format {
            ApiFormat::Openai => self.generate_openai(model_id, messages).await,
            ApiFormat::Gemini => self.generate_gemini(model_id, messages).await,
        }
    }
}
