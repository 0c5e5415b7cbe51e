use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::clients::ModelClient;
use crate::models::GeneratedFile;

use super::checker::SyntaxChecker;
use super::parse::extract_code_block;

/// Syntax checks per file, including the first one.
pub const MAX_CHECK_ATTEMPTS: u32 = 3;

const FIX_PROMPT: &str = r#"You are a senior software engineer. The code below has an error. Fix it.

Original code:
```{language}
{code}
```

Error:
```
{error}
```

Instructions:
- Output only the corrected code.
- No explanations.

Output format:
```{language}
<fixed code>
```
"#;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestOutcome {
    pub file: GeneratedFile,
    pub success: bool,
    pub message: String,
    /// Syntax checks that ran.
    pub attempts: u32,
}

impl TestOutcome {
    /// Failed checks; the count named in `message`.
    pub fn retries(&self) -> u32 {
        if self.success {
            self.attempts.saturating_sub(1)
        } else {
            self.attempts
        }
    }
}

/// Generate, check, repair. Stops at the first passing check or after
/// `MAX_CHECK_ATTEMPTS` failed checks.
pub struct TesterAgent {
    model: Arc<dyn ModelClient>,
    checker: Arc<dyn SyntaxChecker>,
    max_attempts: u32,
}

impl TesterAgent {
    pub fn new(model: Arc<dyn ModelClient>, checker: Arc<dyn SyntaxChecker>) -> Self {
        Self {
            model,
            checker,
            max_attempts: MAX_CHECK_ATTEMPTS,
        }
    }

    pub async fn test_and_fix(&self, file: GeneratedFile) -> TestOutcome {
        let mut file = file;
        let mut retries = 0;

        for attempt in 1..=self.max_attempts {
            let check = self.checker.check(&file).await;
            if check.passed {
                let message = if retries == 0 {
                    "syntax check passed".to_string()
                } else {
                    format!("syntax check passed after {retries} retries")
                };
                info!(path = %file.path, attempt, "syntax check passed");
                return TestOutcome {
                    file,
                    success: true,
                    message,
                    attempts: attempt,
                };
            }

            retries += 1;
            warn!(path = %file.path, attempt, output = %check.output, "syntax check failed");
            if attempt == self.max_attempts {
                return TestOutcome {
                    file,
                    success: false,
                    message: format!(
                        "syntax check failed after {retries} retries: {}",
                        check.output
                    ),
                    attempts: attempt,
                };
            }

            if let Some(content) = self.repair(&file, &check.output).await {
                file.content = content;
            }
        }

        // Only reachable when max_attempts is zero.
        TestOutcome {
            file,
            success: false,
            message: "syntax check not run".to_string(),
            attempts: 0,
        }
    }

    /// `None` keeps the current content.
    async fn repair(&self, file: &GeneratedFile, error_output: &str) -> Option<String> {
        let prompt = FIX_PROMPT
            .replace("{language}", &file.language)
            .replace("{code}", &file.content)
            .replace("{error}", error_output);
        match self.model.generate(&prompt).await {
            Ok(response) => Some(extract_code_block(&response, &file.language)),
            Err(err) => {
                warn!(path = %file.path, error = %err, "repair request failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::{ScriptedChecker, ScriptedModel};

    fn broken() -> GeneratedFile {
        GeneratedFile::new("main.py", "def f(:", "python")
    }

    fn fixes(n: usize) -> Vec<Result<String, crate::clients::ClientError>> {
        (1..=n)
            .map(|i| Ok(format!("```python\ncandidate_{i} = True\n```")))
            .collect()
    }

    #[tokio::test]
    async fn always_failing_checker_stops_after_three_checks() {
        let checker = Arc::new(ScriptedChecker::always(false));
        let model = Arc::new(ScriptedModel::new(fixes(5)));
        let agent = TesterAgent::new(model.clone(), checker.clone());

        let outcome = agent.test_and_fix(broken()).await;
        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(checker.calls(), 3);
        assert_eq!(model.prompts().len(), 2);
        assert!(outcome.message.contains("3 retries"));
        assert_eq!(outcome.retries(), 3);
    }

    #[tokio::test]
    async fn passing_on_nth_check_keeps_nth_candidate() {
        for n in 1..=3u32 {
            let mut script = vec![false; (n - 1) as usize];
            script.push(true);
            let checker = Arc::new(ScriptedChecker::new(script));
            let agent = TesterAgent::new(Arc::new(ScriptedModel::new(fixes(3))), checker.clone());

            let outcome = agent.test_and_fix(broken()).await;
            assert!(outcome.success);
            assert_eq!(outcome.attempts, n);
            assert_eq!(checker.calls(), n as usize);
            let expected = if n == 1 {
                "def f(:".to_string()
            } else {
                format!("candidate_{} = True", n - 1)
            };
            assert_eq!(outcome.file.content, expected);
        }
    }

    #[tokio::test]
    async fn repair_failure_keeps_current_content() {
        let checker = Arc::new(ScriptedChecker::new(vec![false, true]));
        let agent = TesterAgent::new(Arc::new(ScriptedModel::failing()), checker);

        let outcome = agent.test_and_fix(broken()).await;
        assert!(outcome.success);
        assert_eq!(outcome.file.content, "def f(:");
        assert_eq!(outcome.attempts, 2);
    }

    #[tokio::test]
    async fn repair_prompt_carries_checker_output() {
        let checker = Arc::new(ScriptedChecker::new(vec![false, true]).with_output("SyntaxError: line 1"));
        let model = Arc::new(ScriptedModel::new(fixes(1)));
        let agent = TesterAgent::new(model.clone(), checker);

        agent.test_and_fix(broken()).await;
        let prompts = model.prompts();
        assert!(prompts[0].contains("SyntaxError: line 1"));
        assert!(prompts[0].contains("def f(:"));
    }
}
