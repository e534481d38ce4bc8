use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Structured fields carried by a record besides its bookkeeping columns.
pub type Fields = serde_json::Map<String, Value>;

/// One entity extracted from a fetched page, keyed by a stable `gift_id`.
///
/// Bookkeeping columns missing from a file load as empty values so that
/// [`crate::Collection::integrity`] can report them and
/// [`crate::Collection::repair`] can fill them in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionRecord {
    #[serde(rename = "gift_id", default)]
    pub id: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub parsed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_status: Option<String>,
    #[serde(flatten)]
    pub fields: Fields,
}

impl CollectionRecord {
    pub fn new(
        id: impl Into<String>,
        url: impl Into<String>,
        status: impl Into<String>,
        parsed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            status: status.into(),
            parsed_at,
            updated_at: None,
            previous_status: None,
            fields: Fields::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// False when the file this record came from carried no `parsed_at`.
    pub fn has_parse_time(&self) -> bool {
        self.parsed_at != DateTime::<Utc>::default()
    }

    /// True when one of `gift_id`, `url` or `status` is blank.
    pub fn missing_required(&self) -> bool {
        [&self.id, &self.url, &self.status]
            .iter()
            .any(|value| value.trim().is_empty())
    }

    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Compares what the source says about the entity, ignoring the
    /// timestamps and history columns the store maintains itself.
    pub fn same_content(&self, other: &CollectionRecord) -> bool {
        self.id == other.id
            && self.url == other.url
            && self.status == other.status
            && self.fields == other.fields
    }
}
