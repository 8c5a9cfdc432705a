//! Typed records for the GroupMe REST API.
//!
//! Responses are validated at the boundary: unknown fields are ignored and a
//! missing required field fails deserialization, which the client reports as
//! an API error.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Every successful response is wrapped as `{"meta": ..., "response": ...}`.
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub response: Option<T>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ErrorEnvelope {
    #[serde(default)]
    pub meta: Option<Meta>,
    /// The image service reports failures at the top level.
    #[serde(default)]
    pub errors: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Meta {
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "GroupRecord")]
pub struct Group {
    pub id: String,
    pub name: String,
    pub member_count: usize,
}

#[derive(Deserialize)]
struct GroupRecord {
    #[serde(deserialize_with = "string_id")]
    id: String,
    name: String,
    #[serde(default)]
    members: Vec<Value>,
}

impl From<GroupRecord> for Group {
    fn from(record: GroupRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            member_count: record.members.len(),
        }
    }
}

/// Full record of one group, as returned by `GET /groups/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupDetails {
    #[serde(deserialize_with = "string_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub share_url: Option<String>,
    #[serde(default)]
    pub office_mode: Option<bool>,
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub members: Vec<Member>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    #[serde(default, deserialize_with = "optional_string_id")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub nickname: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(deserialize_with = "string_id")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "optional_string_id")]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    pub created_at: i64,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub favorited_by: Vec<String>,
}

impl Message {
    pub fn sender_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .or(self.sender_id.as_deref())
            .unwrap_or("-")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Attachment {
    pub fn image(url: impl Into<String>) -> Self {
        Self {
            kind: "image".to_string(),
            url: Some(url.into()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct GroupMessagePage {
    #[serde(default)]
    pub messages: Vec<Message>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DirectMessagePage {
    #[serde(default)]
    pub direct_messages: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DmChat {
    pub other_user: ChatUser,
    #[serde(default)]
    pub last_message: Option<LastMessage>,
    #[serde(default)]
    pub updated_at: Option<i64>,
}

impl DmChat {
    /// Single-line preview of the last message.
    pub fn snippet(&self) -> String {
        self.last_message
            .as_ref()
            .and_then(|message| message.text.as_deref())
            .map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatUser {
    #[serde(deserialize_with = "string_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastMessage {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub created_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(deserialize_with = "string_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// Body of an outgoing send. Serializes as `{"message": {...}}` for groups and
/// `{"direct_message": {...}}` for direct chats.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SendPayload {
    #[serde(rename = "message")]
    Group(OutgoingMessage),
    #[serde(rename = "direct_message")]
    Direct(OutgoingMessage),
}

impl SendPayload {
    pub fn message(&self) -> &OutgoingMessage {
        match self {
            SendPayload::Group(message) | SendPayload::Direct(message) => message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutgoingMessage {
    pub source_guid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<String>,
    pub text: String,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Deserialize)]
pub struct SentGroupMessage {
    pub message: Message,
}

#[derive(Debug, Deserialize)]
pub struct SentDirectMessage {
    pub direct_message: Message,
}

/// The image service does not use the API envelope.
#[derive(Debug, Deserialize)]
pub struct ImageUploadResponse {
    pub payload: ImagePayload,
}

#[derive(Debug, Deserialize)]
pub struct ImagePayload {
    pub url: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(i64),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(value) => value,
            RawId::Number(value) => value.to_string(),
        }
    }
}

fn string_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    RawId::deserialize(deserializer).map(String::from)
}

fn optional_string_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Option::<RawId>::deserialize(deserializer).map(|raw| raw.map(String::from))
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<Vec<T>>::deserialize(deserializer).map(Option::unwrap_or_default)
}
