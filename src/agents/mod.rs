//! Model-backed agents for each pipeline stage, plus the syntax checker the
//! tester drives.

pub mod checker;
pub mod coder;
pub mod design;
pub mod extractor;
pub mod parse;
pub mod requirement;
pub mod tester;

pub use checker::{CheckOutcome, CommandSyntaxChecker, SyntaxChecker};
pub use coder::CoderAgent;
pub use design::{Design, DesignAgent, FileSpec, TechStack};
pub use extractor::{ExtractedIssue, ExtractorAgent};
pub use requirement::{RequirementAgent, RequirementDraft, RequirementInput};
pub use tester::{TestOutcome, TesterAgent, MAX_CHECK_ATTEMPTS};
