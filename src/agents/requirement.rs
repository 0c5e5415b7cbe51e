use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::clients::ModelClient;
use crate::models::Issue;

use super::parse::extract_markdown_block;

const REQUIREMENT_PROMPT: &str = r#"You are a product manager. Write a draft requirements document for the problem below.

Problem:
- Title: {title}
- Description: {description}
- Background: {context}
- Suggested technical approach: {tech_approach}

Answer in markdown using this outline:

# Requirements: <title>

## Background
<current situation and problem in two or three sentences>

## Functional requirements
1. <feature>
2. <feature>
3. <feature>

## Non-functional requirements
- Performance: <target>
- Environment: <target platforms>
- Security: <requirements>

## Technical approach
<recommended stack and implementation plan>

## Success metrics
<quantitative KPIs>
"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequirementInput {
    pub title: String,
    pub description: String,
    pub context: String,
    pub tech_approach: String,
}

impl RequirementInput {
    /// One issue is used as-is; several are folded into a combined problem.
    pub fn from_issues(issues: &[Issue]) -> Self {
        if let [issue] = issues {
            return Self {
                title: issue.title.clone(),
                description: issue.description.clone(),
                context: issue.context.clone(),
                tech_approach: issue.tech_approach.clone(),
            };
        }

        let description = issues
            .iter()
            .map(|issue| format!("- {}", issue.title))
            .collect::<Vec<_>>()
            .join("\n");
        let context = issues
            .iter()
            .map(|issue| issue.context.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let tech_approach = issues
            .iter()
            .map(|issue| issue.tech_approach.as_str())
            .filter(|approach| !approach.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        Self {
            title: format!("{} issues: combined solution", issues.len()),
            description,
            context,
            tech_approach,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequirementDraft {
    pub title: String,
    pub background: String,
    pub problem_statement: String,
    pub tech_approach: String,
    pub markdown_content: String,
}

pub struct RequirementAgent {
    model: Arc<dyn ModelClient>,
}

impl RequirementAgent {
    pub fn new(model: Arc<dyn ModelClient>) -> Self {
        Self { model }
    }

    pub async fn generate(&self, input: &RequirementInput) -> RequirementDraft {
        let prompt = REQUIREMENT_PROMPT
            .replace("{title}", &input.title)
            .replace("{description}", &input.description)
            .replace("{context}", &input.context)
            .replace("{tech_approach}", &input.tech_approach);

        let (title, markdown_content) = match self.model.generate(&prompt).await {
            Ok(response) => (
                format!("Requirements: {}", input.title),
                extract_markdown_block(&response),
            ),
            Err(err) => {
                warn!(error = %err, title = %input.title, "requirement generation failed");
                (
                    input.title.clone(),
                    format!("# {}\n\nGeneration failed: {err}", input.title),
                )
            }
        };

        RequirementDraft {
            title,
            background: input.context.clone(),
            problem_statement: input.description.clone(),
            tech_approach: input.tech_approach.clone(),
            markdown_content,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::{sample_issue, ScriptedModel};

    #[test]
    fn merges_several_issues() {
        let mut first = sample_issue("Slow export");
        first.context = "exports are manual".into();
        let mut second = sample_issue("Typos in invoices");
        second.context = "invoices typed by hand".into();

        let input = RequirementInput::from_issues(&[first, second]);
        assert_eq!(input.title, "2 issues: combined solution");
        assert_eq!(input.description, "- Slow export\n- Typos in invoices");
        assert_eq!(input.context, "exports are manual\n\ninvoices typed by hand");
    }

    #[tokio::test]
    async fn takes_markdown_from_fence() {
        let model = Arc::new(ScriptedModel::new(vec![Ok(
            "Sure:\n```markdown\n# Requirements: Slow export\n\n## Background\n...\n```".to_string(),
        )]));
        let agent = RequirementAgent::new(model);
        let input = RequirementInput::from_issues(&[sample_issue("Slow export")]);

        let draft = agent.generate(&input).await;
        assert_eq!(draft.title, "Requirements: Slow export");
        assert!(draft.markdown_content.starts_with("# Requirements: Slow export"));
        assert!(!draft.markdown_content.contains("```"));
    }

    #[tokio::test]
    async fn failure_produces_placeholder_document() {
        let agent = RequirementAgent::new(Arc::new(ScriptedModel::failing()));
        let input = RequirementInput::from_issues(&[sample_issue("Slow export")]);

        let draft = agent.generate(&input).await;
        assert_eq!(draft.title, "Slow export");
        assert!(draft.markdown_content.starts_with("# Slow export\n\nGeneration failed:"));
    }
}
