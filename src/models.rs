use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::clients::{RawAccount, RawMessage};
use crate::store::Record;

pub const DEFAULT_PROJECT_ID: &str = "default";
pub const DEFAULT_SOURCE_COLOR: &str = "#3B82F6";

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            pub fn parse(value: &str) -> Option<Self> {
                match value {
                    $($text => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum!(SourceType {
    ChatworkRoom => "chatwork_room",
    UploadedFile => "uploaded_file",
    ManualInput => "manual_input",
});

string_enum!(PainLevel {
    High => "high",
    Medium => "medium",
    Low => "low",
});

string_enum!(IssueStatus {
    New => "new",
    Selected => "selected",
    InProgress => "in_progress",
    Done => "done",
    Archived => "archived",
});

string_enum!(RequirementStatus {
    Draft => "draft",
    Review => "review",
    Approved => "approved",
    Implemented => "implemented",
    Rejected => "rejected",
});

string_enum!(DevelopmentStatus {
    Designing => "designing",
    Coding => "coding",
    Testing => "testing",
    Review => "review",
    Merged => "merged",
    Failed => "failed",
});

string_enum!(LogLevel {
    Info => "info",
    Warning => "warning",
    Error => "error",
});

string_enum!(JobStatus {
    Queued => "queued",
    Processing => "processing",
    Succeeded => "succeeded",
    Failed => "failed",
});

impl IssueStatus {
    fn rank(self) -> u8 {
        match self {
            IssueStatus::New => 0,
            IssueStatus::Selected => 1,
            IssueStatus::InProgress => 2,
            IssueStatus::Done => 3,
            IssueStatus::Archived => 4,
        }
    }

    /// Issues only ever move forward; staying put is allowed.
    pub fn can_transition_to(self, next: IssueStatus) -> bool {
        next.rank() >= self.rank()
    }
}

impl RequirementStatus {
    pub fn can_transition_to(self, next: RequirementStatus) -> bool {
        use RequirementStatus::*;
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (Draft, Review | Approved | Rejected)
                | (Review, Approved | Rejected | Draft)
                | (Approved, Implemented | Rejected)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(id: impl Into<String>, name: impl Into<String>, description: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            description,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn default_project() -> Self {
        Self::new(
            DEFAULT_PROJECT_ID,
            "Default project",
            Some("Created automatically".to_string()),
        )
    }
}

impl Record for Project {
    const COLLECTION: &'static str = "projects";

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatworkInfo {
    pub room_id: String,
    pub room_name: String,
    #[serde(default)]
    pub room_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileInfo {
    pub file_name: String,
    pub file_type: String,
    pub file_size: u64,
    pub storage_key: String,
    pub checksum: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Source {
    pub id: String,
    pub project_id: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    pub label: String,
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chatwork: Option<ChatworkInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileInfo>,
    #[serde(default)]
    pub last_sync_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message_count: u64,
    #[serde(default)]
    pub issue_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Source {
    fn base(project_id: &str, source_type: SourceType, label: String) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            project_id: project_id.to_string(),
            source_type,
            label,
            color: DEFAULT_SOURCE_COLOR.to_string(),
            chatwork: None,
            file: None,
            last_sync_at: None,
            message_count: 0,
            issue_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn chatwork_room(project_id: &str, info: ChatworkInfo) -> Self {
        let mut source = Self::base(project_id, SourceType::ChatworkRoom, info.room_name.clone());
        source.chatwork = Some(info);
        source
    }

    /// The caller stores the bytes under `file.storage_key`; the id is fixed
    /// up front so the key can include it.
    pub fn uploaded_file(id: String, project_id: &str, label: String, file: FileInfo) -> Self {
        let mut source = Self::base(project_id, SourceType::UploadedFile, label);
        source.id = id;
        source.file = Some(file);
        source
    }

    pub fn manual(project_id: &str, label: String) -> Self {
        Self::base(project_id, SourceType::ManualInput, label)
    }

    pub fn room_id(&self) -> Option<&str> {
        self.chatwork.as_ref().map(|info| info.room_id.as_str())
    }

    /// Object storage key holding this source's text, if it has one.
    pub fn content_key(&self) -> Option<String> {
        match self.source_type {
            SourceType::UploadedFile => self.file.as_ref().map(|file| file.storage_key.clone()),
            SourceType::ManualInput => Some(format!("sources/{}/content.txt", self.id)),
            SourceType::ChatworkRoom => None,
        }
    }
}

impl Record for Source {
    const COLLECTION: &'static str = "sources";

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub source_id: String,
    pub room_id: String,
    pub body: String,
    pub account_id: String,
    pub account_name: String,
    pub send_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn from_raw(raw: &RawMessage, source_id: &str, room_id: &str) -> Self {
        Self {
            id: raw.message_id.clone(),
            source_id: source_id.to_string(),
            room_id: room_id.to_string(),
            body: raw.body.clone(),
            account_id: raw.account.account_id.to_string(),
            account_name: raw.account.name.clone(),
            send_time: raw.sent_at(),
            created_at: Utc::now(),
        }
    }

    pub fn to_raw(&self) -> RawMessage {
        RawMessage {
            message_id: self.id.clone(),
            account: RawAccount {
                account_id: self.account_id.parse().unwrap_or_default(),
                name: self.account_name.clone(),
                avatar_image_url: None,
            },
            body: self.body.clone(),
            send_time: self.send_time.timestamp(),
            update_time: 0,
        }
    }
}

impl Record for Message {
    const COLLECTION: &'static str = "messages";

    fn id(&self) -> &str {
        &self.id
    }
}

/// One per source, keyed by the source id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncStatus {
    pub source_id: String,
    pub room_id: String,
    #[serde(default)]
    pub last_message_id: Option<String>,
    #[serde(default)]
    pub last_sync_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_messages: u64,
    #[serde(default)]
    pub is_syncing: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl Record for SyncStatus {
    const COLLECTION: &'static str = "sync_status";

    fn id(&self) -> &str {
        &self.source_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Issue {
    pub id: String,
    pub project_id: String,
    pub source_id: String,
    pub source_type: SourceType,
    pub source_label: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub pain_level: PainLevel,
    pub context: String,
    pub tech_approach: String,
    pub expected_outcome: String,
    pub status: IssueStatus,
    #[serde(default)]
    pub requirement_id: Option<String>,
    pub extraction_batch_id: String,
    pub extracted_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record for Issue {
    const COLLECTION: &'static str = "issues";

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Requirement {
    pub id: String,
    pub project_id: String,
    pub issue_id: String,
    #[serde(default)]
    pub issue_ids: Vec<String>,
    pub title: String,
    pub background: String,
    pub problem_statement: String,
    pub tech_approach: String,
    pub markdown_content: String,
    pub status: RequirementStatus,
    #[serde(default)]
    pub github_issue_number: Option<i64>,
    #[serde(default)]
    pub github_issue_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record for Requirement {
    const COLLECTION: &'static str = "requirements";

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GeneratedFile {
    pub path: String,
    pub content: String,
    pub language: String,
}

impl GeneratedFile {
    pub fn new(
        path: impl Into<String>,
        content: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            language: language.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentLogEntry {
    pub timestamp: DateTime<Utc>,
    pub agent: String,
    pub message: String,
    pub level: LogLevel,
}

impl AgentLogEntry {
    pub fn new(agent: &str, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            agent: agent.to_string(),
            message: message.into(),
            level,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileTestResult {
    pub path: String,
    pub success: bool,
    pub message: String,
    pub attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Development {
    pub id: String,
    pub project_id: String,
    pub requirement_id: String,
    pub status: DevelopmentStatus,
    #[serde(default)]
    pub design: Option<Value>,
    #[serde(default)]
    pub generated_files: Vec<GeneratedFile>,
    #[serde(default)]
    pub test_results: Vec<FileTestResult>,
    #[serde(default)]
    pub error_count: u32,
    #[serde(default)]
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(default)]
    pub github_branch: Option<String>,
    #[serde(default)]
    pub github_pr_number: Option<i64>,
    #[serde(default)]
    pub github_pr_url: Option<String>,
    #[serde(default)]
    pub agent_logs: Vec<AgentLogEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Development {
    pub fn new(project_id: &str, requirement_id: &str, max_retries: u32) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            project_id: project_id.to_string(),
            requirement_id: requirement_id.to_string(),
            status: DevelopmentStatus::Designing,
            design: None,
            generated_files: Vec::new(),
            test_results: Vec::new(),
            error_count: 0,
            retry_count: 0,
            max_retries,
            github_branch: None,
            github_pr_number: None,
            github_pr_url: None,
            agent_logs: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn log(&mut self, agent: &str, level: LogLevel, message: impl Into<String>) {
        self.agent_logs.push(AgentLogEntry::new(agent, level, message));
        self.updated_at = Utc::now();
    }
}

impl Record for Development {
    const COLLECTION: &'static str = "developments";

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: String,
    pub job_type: String,
    pub payload: Value,
    pub status: JobStatus,
    pub attempts: u32,
    pub run_after: DateTime<Utc>,
    #[serde(default)]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record for Job {
    const COLLECTION: &'static str = "jobs";

    fn id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_status_only_moves_forward() {
        assert!(IssueStatus::New.can_transition_to(IssueStatus::Selected));
        assert!(IssueStatus::Selected.can_transition_to(IssueStatus::Done));
        assert!(IssueStatus::Done.can_transition_to(IssueStatus::Done));
        assert!(!IssueStatus::InProgress.can_transition_to(IssueStatus::New));
        assert!(!IssueStatus::Archived.can_transition_to(IssueStatus::Done));
    }

    #[test]
    fn requirement_terminal_states_are_final() {
        use RequirementStatus::*;
        assert!(Draft.can_transition_to(Approved));
        assert!(Review.can_transition_to(Draft));
        assert!(Approved.can_transition_to(Implemented));
        assert!(!Approved.can_transition_to(Draft));
        assert!(!Implemented.can_transition_to(Approved));
        assert!(!Rejected.can_transition_to(Review));
    }

    #[test]
    fn enums_round_trip_through_their_wire_names() {
        for status in IssueStatus::ALL {
            assert_eq!(IssueStatus::parse(status.as_str()), Some(*status));
            assert_eq!(
                serde_json::to_value(status).unwrap(),
                serde_json::Value::String(status.to_string())
            );
        }
        assert_eq!(PainLevel::parse("urgent"), None);
    }

    #[test]
    fn source_payload_matches_its_type() {
        let room = Source::chatwork_room(
            DEFAULT_PROJECT_ID,
            ChatworkInfo {
                room_id: "123".into(),
                room_name: "Ops".into(),
                room_type: "group".into(),
            },
        );
        assert_eq!(room.source_type, SourceType::ChatworkRoom);
        assert!(room.file.is_none());
        assert_eq!(room.room_id(), Some("123"));
        assert_eq!(room.content_key(), None);

        let json = serde_json::to_value(&room).unwrap();
        assert_eq!(json["type"], "chatwork_room");
        assert!(json.get("file").is_none());
    }
}
