use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Terminal outcome recorded for a URL. Once a URL holds one of these it is
/// not retried automatically in resume mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlStatus {
    /// Fetched and extracted into a valid record.
    Active,
    /// The source answered "not found".
    Deleted,
    /// Transport or HTTP failure after retries were exhausted.
    Error,
    /// A body was fetched but the extractor produced nothing valid.
    ParseFailed,
}

impl UrlStatus {
    pub const ALL: [UrlStatus; 4] = [
        UrlStatus::Active,
        UrlStatus::Deleted,
        UrlStatus::Error,
        UrlStatus::ParseFailed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            UrlStatus::Active => "active",
            UrlStatus::Deleted => "deleted",
            UrlStatus::Error => "error",
            UrlStatus::ParseFailed => "parse_failed",
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, UrlStatus::Active)
    }

    /// Maps a stored record's free-form status onto a URL outcome.
    ///
    /// Records only exist for URLs whose page was extracted, so anything that
    /// is not one of the four terminal names counts as `Active`.
    pub fn from_record_status(status: &str) -> UrlStatus {
        status.parse().unwrap_or(UrlStatus::Active)
    }
}

impl fmt::Display for UrlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown url status {0:?}")]
pub struct UnknownStatus(pub String);

impl FromStr for UrlStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UrlStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_names() {
        for status in UrlStatus::ALL {
            assert_eq!(status.as_str().parse::<UrlStatus>(), Ok(status));
        }
        assert_eq!(
            "processed".parse::<UrlStatus>().unwrap_err().to_string(),
            "unknown url status \"processed\""
        );
    }

    #[test]
    fn serializes_as_snake_case() {
        let json = serde_json::to_string(&UrlStatus::ParseFailed).unwrap();
        assert_eq!(json, "\"parse_failed\"");
    }

    #[test]
    fn record_statuses_map_to_url_outcomes() {
        assert_eq!(UrlStatus::from_record_status("deleted"), UrlStatus::Deleted);
        assert_eq!(UrlStatus::from_record_status("private"), UrlStatus::Active);
        assert_eq!(UrlStatus::from_record_status("unknown"), UrlStatus::Active);
    }
}
