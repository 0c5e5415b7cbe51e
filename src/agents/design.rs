use std::{fmt::Display, path::Path, sync::Arc};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::clients::ModelClient;

use super::parse::extract_json_block;

const DESIGN_PROMPT: &str = r#"You are a tech lead. Design the file layout and implementation plan for the requirements document below.

Requirements:
{requirement}

Answer with JSON only:

```json
{
  "project_name": "name",
  "tech_stack": {
    "language": "python",
    "framework": "framework",
    "dependencies": ["package"]
  },
  "file_structure": [
    {"path": "src/main.py", "description": "what the file does", "type": "entrypoint|component|utility|config|test"}
  ],
  "implementation_order": ["src/main.py"],
  "notes": "anything worth knowing"
}
```
"#;

const DEFAULT_LANGUAGE: &str = "python";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TechStack {
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub framework: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileSpec {
    pub path: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Design {
    #[serde(default)]
    pub project_name: String,
    #[serde(default)]
    pub tech_stack: TechStack,
    #[serde(default)]
    pub file_structure: Vec<FileSpec>,
    #[serde(default)]
    pub implementation_order: Vec<String>,
    #[serde(default, deserialize_with = "text_or_json")]
    pub notes: String,
}

impl Design {
    pub fn fallback(error: impl Display) -> Self {
        Self {
            project_name: "unknown".to_string(),
            notes: format!("Error: {error}"),
            ..Self::default()
        }
    }

    pub fn language(&self) -> String {
        let language = self.tech_stack.language.trim().to_ascii_lowercase();
        if language.is_empty() {
            DEFAULT_LANGUAGE.to_string()
        } else {
            language
        }
    }

    /// Language for one manifest entry: known extensions win over the stack language.
    pub fn language_for(&self, path: &str) -> String {
        let by_extension = Path::new(path)
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| match ext.to_ascii_lowercase().as_str() {
                "py" => Some("python"),
                "js" | "mjs" | "cjs" => Some("javascript"),
                "ts" => Some("typescript"),
                "html" | "htm" => Some("html"),
                "css" => Some("css"),
                _ => None,
            });
        by_extension
            .map(str::to_string)
            .unwrap_or_else(|| self.language())
    }
}

fn text_or_json<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => String::new(),
        Value::String(text) => text,
        other => other.to_string(),
    })
}

pub fn parse_design(response: &str) -> Result<Design, String> {
    let json = extract_json_block(response, '{', '}')
        .ok_or_else(|| "no JSON object in design response".to_string())?;
    serde_json::from_str(&json).map_err(|err| err.to_string())
}

pub struct DesignAgent {
    model: Arc<dyn ModelClient>,
}

impl DesignAgent {
    pub fn new(model: Arc<dyn ModelClient>) -> Self {
        Self { model }
    }

    pub async fn design(&self, requirement_markdown: &str) -> Design {
        let prompt = DESIGN_PROMPT.replace("{requirement}", requirement_markdown);
        let response = match self.model.generate(&prompt).await {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "design generation failed");
                return Design::fallback(err);
            }
        };

        match parse_design(&response) {
            Ok(design) => {
                info!(
                    project = %design.project_name,
                    files = design.file_structure.len(),
                    "design ready"
                );
                design
            }
            Err(err) => {
                warn!(error = %err, "could not parse design response");
                Design::fallback(err)
            }
        }
    }
}
