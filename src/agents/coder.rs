use std::sync::Arc;

use tracing::{info, warn};

use crate::clients::ModelClient;
use crate::models::GeneratedFile;

use super::design::Design;
use super::parse::extract_code_block;

const CODE_PROMPT: &str = r#"You are a senior software engineer. Implement the file below according to the design.

Design:
{design}

File to implement:
{path}

Instructions:
- Write production-quality code.
- Handle errors.
- Keep comments to a minimum.
- Use type annotations where the language has them.

Output only the code:

```{language}
<code>
```
"#;

/// Wraps `message` in the comment syntax of `language`.
pub fn error_marker(language: &str, message: &str) -> String {
    let message = message.replace('\n', " ");
    match language.to_ascii_lowercase().as_str() {
        "python" | "ruby" | "shell" | "bash" | "yaml" | "toml" => format!("# Error: {message}"),
        "html" | "xml" | "markdown" => format!("<!-- Error: {message} -->"),
        "css" => format!("/* Error: {message} */"),
        _ => format!("// Error: {message}"),
    }
}

pub struct CoderAgent {
    model: Arc<dyn ModelClient>,
}

impl CoderAgent {
    pub fn new(model: Arc<dyn ModelClient>) -> Self {
        Self { model }
    }

    /// A failed model call still yields a file, whose content is an error marker.
    pub async fn generate_code(&self, design: &Design, path: &str, language: &str) -> GeneratedFile {
        let design_json = serde_json::to_string_pretty(design).unwrap_or_default();
        let prompt = CODE_PROMPT
            .replace("{design}", &design_json)
            .replace("{path}", path)
            .replace("{language}", language);

        let content = match self.model.generate(&prompt).await {
            Ok(response) => extract_code_block(&response, language),
            Err(err) => {
                warn!(path, error = %err, "code generation failed");
                error_marker(language, &err.to_string())
            }
        };
        GeneratedFile::new(path, content, language)
    }

    /// Generates every file in the manifest, in manifest order.
    pub async fn generate_all(&self, design: &Design) -> Vec<GeneratedFile> {
        let mut files = Vec::with_capacity(design.file_structure.len());
        for spec in &design.file_structure {
            let language = design.language_for(&spec.path);
            files.push(self.generate_code(design, &spec.path, &language).await);
        }
        info!(files = files.len(), "code generation finished");
        files
    }
}
