//! LLM seam: the adjudicator that extracts tool arguments under a fixed tool
//! identity, and the completion call the analysis composer uses.
//!
//! The runbook owns control flow; the model only ever sees a single function
//! definition and a forced tool choice, so the worst it can do is return bad
//! arguments — which the engine replaces with label-derived defaults.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use remedy_common::args::OpenAiArgs;

use crate::error::AgentError;
use crate::models::{Alert, ResultRecord};
use crate::tools::ToolName;

pub const LLM_TIMEOUT: Duration = Duration::from_secs(60);

/// A single tool call as returned by the adjudicator.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub name: String,
    pub arguments: Value,
}

#[async_trait]
pub trait Llm: Send + Sync {
    /// Produce one call to `expected`, with arguments extracted from the
    /// alert and the tool results gathered so far.
    async fn adjudicate(
        &self,
        alert: &Alert,
        tool_results: &HashMap<String, ResultRecord>,
        expected: ToolName,
    ) -> Result<ToolCall, AgentError>;

    /// Plain completion used by the analysis composer.
    async fn complete(&self, system: &str, user: &str) -> Result<String, AgentError>;
}

// =============================================================================
// OpenAI chat-completions client
// =============================================================================

pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(args: &OpenAiArgs) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(LLM_TIMEOUT)
            .build()
            .context("failed to build LLM HTTP client")?;
        Ok(OpenAiClient {
            http,
            base_url: args.openai_base_url.trim_end_matches('/').to_string(),
            api_key: args.openai_api_key.clone(),
            model: args.openai_model.clone(),
        })
    }

    async fn chat(&self, body: Value) -> Result<ChatResponse, AgentError> {
        let url = format!("{}/chat/completions", self.base_url);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::Llm(e.to_string()))?
            .error_for_status()
            .map_err(|e| AgentError::Llm(e.to_string()))?;
        resp.json::<ChatResponse>()
            .await
            .map_err(|e| AgentError::Llm(format!("malformed completion response: {}", e)))
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

const ADJUDICATOR_SYSTEM: &str = "You are the tool adjudicator of a Kubernetes \
remediation agent. You are given a fired alert, the structured results of \
earlier diagnostic steps, and exactly one tool. Call that tool, filling its \
arguments from the alert labels and prior results. Do not invent values.";

#[async_trait]
impl Llm for OpenAiClient {
    async fn adjudicate(
        &self,
        alert: &Alert,
        tool_results: &HashMap<String, ResultRecord>,
        expected: ToolName,
    ) -> Result<ToolCall, AgentError> {
        let user = format!(
            "Alert:\n{}\n\nTool results so far:\n{}\n\nCall `{}` now.",
            serde_json::to_string_pretty(alert).unwrap_or_default(),
            serde_json::to_string_pretty(tool_results).unwrap_or_default(),
            expected.wire_name(),
        );
        let body = json!({
            "model": self.model,
            "temperature": 0,
            "messages": [
                { "role": "system", "content": ADJUDICATOR_SYSTEM },
                { "role": "user", "content": user },
            ],
            "tools": [{
                "type": "function",
                "function": {
                    "name": expected.wire_name(),
                    "description": expected.description(),
                    "parameters": expected.parameters_schema(),
                }
            }],
            "tool_choice": {
                "type": "function",
                "function": { "name": expected.wire_name() }
            },
        });
        let resp = self.chat(body).await?;
        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::Llm("completion had no choices".into()))?;
        let call = choice
            .message
            .tool_calls
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::Llm("completion had no tool call".into()))?;
        let arguments: Value = serde_json::from_str(&call.function.arguments)
            .map_err(|e| AgentError::Llm(format!("unparsable tool arguments: {}", e)))?;
        Ok(ToolCall {
            name: call.function.name,
            arguments,
        })
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, AgentError> {
        let body = json!({
            "model": self.model,
            "temperature": 0.2,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
        });
        let resp = self.chat(body).await?;
        resp.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AgentError::Llm("completion had no content".into()))
    }
}
