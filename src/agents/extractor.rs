use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::clients::ModelClient;
use crate::models::PainLevel;

use super::parse::extract_json_block;

const EXTRACTION_PROMPT: &str = r#"You are a business-process improvement specialist. Read the conversation log below and pull out concrete operational problems, complaints and improvement requests.

Rules:
1. Extract only clear problems or frustrations.
2. Ignore small talk.
3. Suggest a technical approach that would solve each problem.
4. Judge severity as high, medium or low.

Answer with a JSON array. Every element must have these keys:
- title: short title of the problem
- category: one of efficiency, error-prevention, cost-reduction, communication, other
- pain_level: high, medium or low
- context: summary of the original conversation
- tech_approach: technical approach that would solve it
- expected_outcome: what improves once it is solved

Conversation log:
{content}
"#;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedIssue {
    pub title: String,
    pub category: String,
    pub pain_level: PainLevel,
    pub context: String,
    pub tech_approach: String,
    pub expected_outcome: String,
}

#[derive(Deserialize)]
struct RawIssue {
    title: Option<String>,
    category: Option<String>,
    pain_level: Option<String>,
    context: Option<String>,
    tech_approach: Option<String>,
    expected_outcome: Option<String>,
}

impl RawIssue {
    fn into_issue(self) -> Option<ExtractedIssue> {
        let pain_level = PainLevel::parse(&self.pain_level?.trim().to_ascii_lowercase())?;
        let title = self.title.filter(|title| !title.trim().is_empty())?;
        Some(ExtractedIssue {
            title,
            category: self.category.unwrap_or_else(|| "other".to_string()),
            pain_level,
            context: self.context?,
            tech_approach: self.tech_approach?,
            expected_outcome: self.expected_outcome.unwrap_or_default(),
        })
    }
}

/// Turns a conversation log into structured issues.
pub struct ExtractorAgent {
    model: Arc<dyn ModelClient>,
}

impl ExtractorAgent {
    pub fn new(model: Arc<dyn ModelClient>) -> Self {
        Self { model }
    }

    /// Never fails: model or parse errors yield an empty list.
    pub async fn extract(&self, content: &str) -> Vec<ExtractedIssue> {
        let prompt = EXTRACTION_PROMPT.replace("{content}", content);
        let response = match self.model.generate(&prompt).await {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "issue extraction failed");
                return Vec::new();
            }
        };

        match parse_issues(&response) {
            Ok(issues) => {
                info!(count = issues.len(), "extracted issues");
                issues
            }
            Err(err) => {
                warn!(error = %err, "could not parse extraction response");
                Vec::new()
            }
        }
    }
}

/// Parses the model answer. Elements missing required fields or carrying
/// an unknown pain level are skipped.
pub fn parse_issues(response: &str) -> Result<Vec<ExtractedIssue>, serde_json::Error> {
    let json = extract_json_block(response, '[', ']').unwrap_or_else(|| "[]".to_string());
    let items: Vec<Value> = serde_json::from_str(&json)?;

    let total = items.len();
    let issues: Vec<ExtractedIssue> = items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<RawIssue>(item).ok())
        .filter_map(RawIssue::into_issue)
        .collect();
    if issues.len() < total {
        warn!(skipped = total - issues.len(), "dropped malformed extracted issues");
    }
    Ok(issues)
}
