//! Analysis and aggregation ports backed by an [`LLMClient`]
//!
//! Both ports ask for a JSON reply and parse it with `serde_json`. Replies
//! wrapped in a markdown fence are accepted.

use super::{
    AggregationPort, AggregationRequest, AnalysisPort, BatchPayload, StructuredData, UnitAnalysis,
};
use crate::error::{AggregationError, AnalysisCallError};
use crate::llm::{BackendError, ChatMessage, LLMClient, LLMRequest};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

const ANALYSIS_PROMPT: &str = "You analyze PL/SQL code units. Each unit is introduced by a \
`-- unit <id> (<kind>, lines <start~end>)` header followed by line-numbered code. Lines of the \
form `start~end: text` stand for a nested block that was already analyzed; `text` is its summary. \
Describe what each unit does in one or two sentences, mentioning tables, variables and calls. \
Reply with JSON only: {\"units\": [{\"unitId\": <id>, \"summary\": \"...\"}]}";

const EXTRACTION_PROMPT: &str = "You extract data access from SQL statements. For every unit, \
list the tables it touches. Reply with JSON only: {\"entities\": [{\"unitId\": <id>, \
\"name\": \"TABLE\", \"access\": \"read\" | \"write\", \"columns\": [\"COL\"]}]}";

const AGGREGATION_PROMPT: &str = "You write a holistic summary of a PL/SQL program from \
summaries of its parts, ordered by unit id with line ranges. Explain the purpose, the main \
flow and the data it reads and writes in one paragraph. Reply with JSON only: \
{\"summary\": \"...\"}";

const DEFAULT_MAX_TOKENS: u32 = 2048;

fn extract_json_from_markdown(content: &str) -> &str {
    let trimmed = content.trim();

    for fence in ["```json", "```"] {
        if let Some(start_idx) = trimmed.find(fence) {
            let after_fence = &trimmed[start_idx + fence.len()..];
            if let Some(end_idx) = after_fence.find("```") {
                return after_fence[..end_idx].trim();
            }
        }
    }

    trimmed
}

fn parse_reply<T: DeserializeOwned>(content: &str) -> Result<T, String> {
    let json = extract_json_from_markdown(content);
    serde_json::from_str(json).map_err(|e| {
        format!(
            "{}: {}",
            e,
            json.chars().take(100).collect::<String>()
        )
    })
}

async fn query(
    client: &dyn LLMClient,
    system: &str,
    user: String,
    max_tokens: u32,
) -> Result<String, BackendError> {
    let start = Instant::now();
    let request = LLMRequest::new(vec![ChatMessage::system(system), ChatMessage::user(user)])
        .with_temperature(0.1)
        .with_max_tokens(max_tokens);
    let response = client.chat(request).await?;
    debug!(
        client = client.name(),
        latency_ms = start.elapsed().as_millis() as u64,
        chars = response.content.len(),
        "LLM reply received"
    );
    Ok(response.content)
}

#[derive(Debug, Deserialize)]
struct UnitsReply {
    units: Vec<UnitAnalysis>,
}

#[derive(Debug, Deserialize)]
struct SummaryReply {
    summary: String,
}

pub struct LlmAnalysisPort {
    client: Arc<dyn LLMClient>,
    max_tokens: u32,
}

impl LlmAnalysisPort {
    pub fn new(client: Arc<dyn LLMClient>) -> Self {
        Self {
            client,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
impl AnalysisPort for LlmAnalysisPort {
    async fn analyze_units(
        &self,
        payload: &BatchPayload,
    ) -> Result<Vec<UnitAnalysis>, AnalysisCallError> {
        let content = query(
            self.client.as_ref(),
            ANALYSIS_PROMPT,
            payload.code(),
            self.max_tokens,
        )
        .await?;
        let reply: UnitsReply = parse_reply(&content)
            .map_err(|message| AnalysisCallError::InvalidResponse { message })?;

        let expected: HashSet<_> = payload.units.iter().map(|u| u.unit_id).collect();
        let (units, unknown): (Vec<_>, Vec<_>) = reply
            .units
            .into_iter()
            .partition(|analysis| expected.contains(&analysis.unit_id));
        if !unknown.is_empty() {
            warn!(
                batch_id = %payload.batch_id,
                ignored = unknown.len(),
                "Reply mentions units outside the batch"
            );
        }
        if units.is_empty() && !expected.is_empty() {
            return Err(AnalysisCallError::InvalidResponse {
                message: format!("no summaries for batch {}", payload.batch_id),
            });
        }
        Ok(units)
    }

    async fn extract_data(
        &self,
        payload: &BatchPayload,
    ) -> Result<Option<StructuredData>, AnalysisCallError> {
        if !payload.has_leaf_data() {
            return Ok(None);
        }
        let content = query(
            self.client.as_ref(),
            EXTRACTION_PROMPT,
            payload.leaf_data_code(),
            self.max_tokens,
        )
        .await?;
        let mut data: StructuredData = parse_reply(&content)
            .map_err(|message| AnalysisCallError::InvalidResponse { message })?;

        let leaves: HashSet<_> = payload.leaf_data_units().map(|u| u.unit_id).collect();
        data.entities.retain(|entity| leaves.contains(&entity.unit_id));
        Ok(Some(data))
    }

    fn name(&self) -> &str {
        self.client.name()
    }
}

pub struct LlmAggregationPort {
    client: Arc<dyn LLMClient>,
    max_tokens: u32,
}

impl LlmAggregationPort {
    pub fn new(client: Arc<dyn LLMClient>) -> Self {
        Self {
            client,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    fn render(request: &AggregationRequest) -> String {
        let mut out = format!(
            "{} {} (lines {})\n",
            request.kind, request.name, request.range
        );
        for entry in request.units.values() {
            out.push_str(&format!(
                "- unit {} {} {}: {}\n",
                entry.unit_id.0, entry.kind, entry.range, entry.summary
            ));
        }
        out
    }
}

#[async_trait]
impl AggregationPort for LlmAggregationPort {
    async fn summarize(&self, request: &AggregationRequest) -> Result<String, AggregationError> {
        let content = query(
            self.client.as_ref(),
            AGGREGATION_PROMPT,
            Self::render(request),
            self.max_tokens,
        )
        .await?;
        let reply: SummaryReply = parse_reply(&content)
            .map_err(|message| AggregationError::InvalidResponse { message })?;
        Ok(reply.summary)
    }

    fn name(&self) -> &str {
        self.client.name()
    }
}
