use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One line of a session transcript.
///
/// The host writes JSONL with a `type` tag; formats drift between host
/// versions, so every record type tolerates unknown fields and the enum
/// itself tolerates unknown tags. Raw logs stay the source of truth; this
/// schema is read-side only.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum TranscriptRecord {
    User(UserRecord),
    Assistant(AssistantRecord),
    System(SystemRecord),
    Progress(ProgressRecord),
    Snapshot(SnapshotRecord),
    Summary(SummaryRecord),
    #[serde(other)]
    Unknown,
}

impl TranscriptRecord {
    pub fn session_id(&self) -> Option<&str> {
        match self {
            TranscriptRecord::User(r) => Some(&r.session_id),
            TranscriptRecord::Assistant(r) => Some(&r.session_id),
            TranscriptRecord::System(r) => Some(&r.session_id),
            TranscriptRecord::Progress(r) => Some(&r.session_id),
            TranscriptRecord::Snapshot(_) | TranscriptRecord::Summary(_) => None,
            TranscriptRecord::Unknown => None,
        }
    }

    pub fn timestamp(&self) -> Option<&str> {
        match self {
            TranscriptRecord::User(r) => Some(&r.timestamp),
            TranscriptRecord::Assistant(r) => Some(&r.timestamp),
            TranscriptRecord::System(r) => Some(&r.timestamp),
            TranscriptRecord::Progress(r) => Some(&r.timestamp),
            TranscriptRecord::Snapshot(_) | TranscriptRecord::Summary(_) => None,
            TranscriptRecord::Unknown => None,
        }
    }

    pub fn is_sidechain(&self) -> bool {
        match self {
            TranscriptRecord::User(r) => r.is_sidechain,
            TranscriptRecord::Assistant(r) => r.is_sidechain,
            TranscriptRecord::Progress(r) => r.is_sidechain,
            _ => false,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub uuid: String,
    #[serde(default)]
    pub parent_uuid: Option<String>,
    pub session_id: String,
    pub timestamp: String,
    pub message: UserMessage,
    #[serde(default)]
    pub is_sidechain: bool,
    #[serde(default)]
    pub is_meta: bool,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    /// Sub-agent execution result (carries the agent id for spawn linking)
    #[serde(default)]
    pub tool_use_result: Option<ToolUseResult>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ToolUseResult {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub agent_name: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct UserMessage {
    pub role: String,
    #[serde(deserialize_with = "deserialize_user_content")]
    pub content: Vec<UserContent>,
}

// Hosts emit user content both as a bare string and as a block array.
fn deserialize_user_content<'de, D>(deserializer: D) -> Result<Vec<UserContent>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrArray {
        String(String),
        Array(Vec<UserContent>),
    }

    match StringOrArray::deserialize(deserializer)? {
        StringOrArray::String(s) => Ok(vec![UserContent::Text { text: s }]),
        StringOrArray::Array(arr) => Ok(arr),
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum UserContent {
    Text {
        text: String,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Option<Value>,
        #[serde(default)]
        is_error: bool,
        #[serde(default, rename = "agentId")]
        agent_id: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AssistantRecord {
    pub uuid: String,
    #[serde(default)]
    pub parent_uuid: Option<String>,
    pub session_id: String,
    pub timestamp: String,
    pub message: AssistantMessage,
    #[serde(default)]
    pub is_sidechain: bool,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AssistantMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    pub content: Vec<AssistantContent>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum AssistantContent {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SystemRecord {
    #[serde(default)]
    pub uuid: Option<String>,
    pub session_id: String,
    pub timestamp: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

/// Progress records are noise for turn assembly but carry the tool-use-id to
/// agent-id mapping that spawn detection needs.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    #[serde(default)]
    pub uuid: Option<String>,
    pub session_id: String,
    pub timestamp: String,
    #[serde(default)]
    pub is_sidechain: bool,
    #[serde(default)]
    pub tool_use_id: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub agent_name: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRecord {
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub snapshot: Option<Value>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SummaryRecord {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub leaf_uuid: Option<String>,
}
