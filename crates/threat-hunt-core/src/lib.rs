//! Hunt record model and dashboard aggregation.
//!
//! The store and service crates share these types:
//! - [`NewHunt`] describes a record before the store assigns an id and timestamps.
//! - [`HuntRecord`] is a persisted row.
//! - [`Dashboard`] is the per-request aggregate rendered by the service.

use std::fmt::{Display, Formatter};

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

pub const DEFAULT_DATASOURCE: &str = "SIEM";
pub const DEFAULT_SEVERITY: Severity = Severity::Medium;
pub const DEFAULT_STATUS: HuntStatus = HuntStatus::Open;

/// Reserved separator for the single-column tag encoding.
pub const TAG_DELIMITER: char = ',';

const TIMESTAMP_FORMAT: &str =
    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z";

/// Offset-less datetime text, read as UTC.
const NAIVE_TIMESTAMP_FORMATS: [&str; 4] = [
    "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond]",
    "[year]-[month]-[day] [hour]:[minute]:[second]",
    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]",
    "[year]-[month]-[day]T[hour]:[minute]:[second]",
];

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum HuntError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("encoding error: {0}")]
    Encoding(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    /// Histogram order; every dashboard starts with these buckets at zero.
    pub const ALL: [Self; 4] = [Self::Critical, Self::High, Self::Medium, Self::Low];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "critical" => Some(Self::Critical),
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum HuntStatus {
    Open,
    Investigating,
    Closed,
}

impl HuntStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Investigating => "investigating",
            Self::Closed => "closed",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "open" => Some(Self::Open),
            "investigating" => Some(Self::Investigating),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

impl Display for HuntStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted hunt row.
///
/// `severity` and `status` stay free-form strings: rows written by other tools
/// may carry values outside [`Severity`] / [`HuntStatus`], and the dashboard
/// still has to count them.
#[derive(Debug, Clone, PartialEq)]
pub struct HuntRecord {
    pub id: i64,
    pub name: String,
    pub query_str: String,
    pub datasource: String,
    pub severity: String,
    pub status: String,
    pub tags: Vec<String>,
    pub ai_score: Option<f64>,
    pub created_at: Option<OffsetDateTime>,
    pub updated_at: Option<OffsetDateTime>,
}

/// Insert payload. Unset categorical fields resolve to the documented defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewHunt {
    pub name: String,
    pub query_str: String,
    pub datasource: Option<String>,
    pub severity: Option<String>,
    pub status: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub ai_score: Option<f64>,
}

impl NewHunt {
    #[must_use]
    pub fn new(name: impl Into<String>, query_str: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            query_str: query_str.into(),
            datasource: None,
            severity: None,
            status: None,
            tags: Vec::new(),
            ai_score: None,
        }
    }

    #[must_use]
    pub fn with_datasource(mut self, datasource: impl Into<String>) -> Self {
        self.datasource = Some(datasource.into());
        self
    }

    #[must_use]
    pub fn with_severity(mut self, severity: impl Into<String>) -> Self {
        self.severity = Some(severity.into());
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_ai_score(mut self, ai_score: f64) -> Self {
        self.ai_score = Some(ai_score);
        self
    }

    #[must_use]
    pub fn datasource_or_default(&self) -> &str {
        self.datasource.as_deref().unwrap_or(DEFAULT_DATASOURCE)
    }

    #[must_use]
    pub fn severity_or_default(&self) -> &str {
        self.severity.as_deref().unwrap_or(DEFAULT_SEVERITY.as_str())
    }

    #[must_use]
    pub fn status_or_default(&self) -> &str {
        self.status.as_deref().unwrap_or(DEFAULT_STATUS.as_str())
    }

    /// Validates an insert payload before it reaches storage.
    ///
    /// # Errors
    /// Returns [`HuntError::Validation`] when a required field is blank or a tag
    /// cannot survive the delimited-string encoding.
    pub fn validate(&self) -> Result<(), HuntError> {
        if self.name.trim().is_empty() {
            return Err(HuntError::Validation("name cannot be empty".to_string()));
        }

        if self.query_str.trim().is_empty() {
            return Err(HuntError::Validation(
                "query_str cannot be empty".to_string(),
            ));
        }

        for tag in &self.tags {
            if tag.trim().is_empty() {
                return Err(HuntError::Validation("tags cannot be empty".to_string()));
            }
            if tag.contains(TAG_DELIMITER) {
                return Err(HuntError::Validation(format!(
                    "tag {tag:?} contains reserved delimiter {TAG_DELIMITER:?}"
                )));
            }
        }

        Ok(())
    }
}

/// Joins tags into the stored column value; an empty list is stored as NULL.
#[must_use]
pub fn encode_tags(tags: &[String]) -> Option<String> {
    if tags.is_empty() {
        return None;
    }
    Some(tags.join(TAG_DELIMITER.to_string().as_str()))
}

#[must_use]
pub fn decode_tags(raw: Option<&str>) -> Vec<String> {
    match raw {
        None | Some("") => Vec::new(),
        Some(value) => value.split(TAG_DELIMITER).map(str::to_string).collect(),
    }
}

/// Formats a timestamp in UTC with millisecond precision.
///
/// The fixed width keeps stored values lexically ordered.
///
/// # Errors
/// Returns [`HuntError::Encoding`] when formatting fails.
pub fn format_timestamp(value: OffsetDateTime) -> Result<String, HuntError> {
    let description = time::format_description::parse(TIMESTAMP_FORMAT)
        .map_err(|err| HuntError::Encoding(format!("invalid timestamp format: {err}")))?;
    value
        .to_offset(UtcOffset::UTC)
        .format(&description)
        .map_err(|err| HuntError::Encoding(format!("failed to format timestamp: {err}")))
}

/// Parses a stored timestamp and normalizes it to UTC.
///
/// Accepts RFC3339 and the offset-less `YYYY-MM-DD HH:MM:SS[.ffffff]` text
/// SQLite and SQLAlchemy write for datetime columns; the latter is read as UTC.
///
/// # Errors
/// Returns [`HuntError::Encoding`] when the value matches neither layout.
pub fn parse_timestamp(value: &str) -> Result<OffsetDateTime, HuntError> {
    let rfc3339_err =
        match OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339) {
            Ok(parsed) => return Ok(parsed.to_offset(UtcOffset::UTC)),
            Err(err) => err,
        };

    for layout in NAIVE_TIMESTAMP_FORMATS {
        let description = time::format_description::parse(layout)
            .map_err(|err| HuntError::Encoding(format!("invalid timestamp format: {err}")))?;
        if let Ok(parsed) = PrimitiveDateTime::parse(value, &description) {
            return Ok(parsed.assume_utc());
        }
    }

    Err(HuntError::Encoding(format!(
        "invalid timestamp {value:?}: {rfc3339_err}"
    )))
}

#[must_use]
pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(UtcOffset::UTC)
}

/// Example hunts written on first start.
#[must_use]
pub fn sample_hunts() -> Vec<NewHunt> {
    vec![
        NewHunt::new(
            "Suspicious PowerShell Execution",
            "process_name: powershell.exe AND commandline:*EncodedCommand*",
        )
        .with_datasource("EDR")
        .with_severity(Severity::High.as_str())
        .with_status(HuntStatus::Open.as_str())
        .with_tags(["windows", "powershell", "lateral-movement"])
        .with_ai_score(0.92),
        NewHunt::new(
            "Rare External Destination Country",
            "dst_country NOT IN ('IN','US','GB','DE') AND bytes_out > 100000",
        )
        .with_datasource("NetFlow")
        .with_severity(Severity::Medium.as_str())
        .with_status(HuntStatus::Open.as_str())
        .with_tags(["exfiltration", "network"])
        .with_ai_score(0.78),
        NewHunt::new(
            "Impossible Travel Login",
            "geo_impossible_travel:true AND login_success:true",
        )
        .with_datasource("Identity")
        .with_severity(Severity::Critical.as_str())
        .with_status(HuntStatus::Investigating.as_str())
        .with_tags(["identity", "cloud", "account-takeover"])
        .with_ai_score(0.96),
        NewHunt::new(
            "Anonymous VPN + Admin Access",
            "vpn_vendor:anonymous AND role:admin AND action:login",
        )
        .with_datasource("VPN")
        .with_severity(Severity::High.as_str())
        .with_status(HuntStatus::Closed.as_str())
        .with_tags(["vpn", "admin", "privilege"])
        .with_ai_score(0.88),
    ]
}

/// Display form of a record: tags as a list, timestamps as text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HuntView {
    pub id: i64,
    pub name: String,
    pub query_str: String,
    pub datasource: String,
    pub severity: String,
    pub status: String,
    pub tags: Vec<String>,
    pub ai_score: Option<f64>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl HuntView {
    /// # Errors
    /// Returns [`HuntError::Encoding`] when a timestamp cannot be formatted.
    pub fn from_record(record: &HuntRecord) -> Result<Self, HuntError> {
        Ok(Self {
            id: record.id,
            name: record.name.clone(),
            query_str: record.query_str.clone(),
            datasource: record.datasource.clone(),
            severity: record.severity.clone(),
            status: record.status.clone(),
            tags: record.tags.clone(),
            ai_score: record.ai_score,
            created_at: record.created_at.map(format_timestamp).transpose()?,
            updated_at: record.updated_at.map(format_timestamp).transpose()?,
        })
    }
}

/// Severity counts in display order.
///
/// Starts from the four known severities at zero and appends a bucket the
/// first time an unknown value is seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeverityHistogram {
    buckets: Vec<(String, usize)>,
}

impl Default for SeverityHistogram {
    fn default() -> Self {
        Self {
            buckets: Severity::ALL
                .iter()
                .map(|severity| (severity.as_str().to_string(), 0))
                .collect(),
        }
    }
}

impl SeverityHistogram {
    pub fn record(&mut self, severity: &str) {
        if let Some((_, count)) = self.buckets.iter_mut().find(|(key, _)| key == severity) {
            *count += 1;
            return;
        }
        self.buckets.push((severity.to_string(), 1));
    }

    #[must_use]
    pub fn get(&self, severity: &str) -> usize {
        self.buckets
            .iter()
            .find(|(key, _)| key == severity)
            .map_or(0, |(_, count)| *count)
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.buckets.iter().map(|(_, count)| count).sum()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.buckets.iter().map(|(key, count)| (key.as_str(), *count))
    }
}

impl Serialize for SeverityHistogram {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.buckets.len()))?;
        for (key, count) in &self.buckets {
            map.serialize_entry(key, count)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DashboardSummary {
    pub total_hunts: usize,
    pub open_hunts: usize,
    pub investigating_hunts: usize,
    pub closed_hunts: usize,
    pub severity_counts: SeverityHistogram,
}

impl DashboardSummary {
    fn observe(&mut self, record: &HuntRecord) {
        self.total_hunts += 1;
        // Unknown statuses count toward the total only.
        match HuntStatus::parse(&record.status) {
            Some(HuntStatus::Open) => self.open_hunts += 1,
            Some(HuntStatus::Investigating) => self.investigating_hunts += 1,
            Some(HuntStatus::Closed) => self.closed_hunts += 1,
            None => {}
        }
        self.severity_counts.record(&record.severity);
    }
}

#[must_use]
pub fn summarize(records: &[HuntRecord]) -> DashboardSummary {
    let mut summary = DashboardSummary::default();
    for record in records {
        summary.observe(record);
    }
    summary
}

/// Everything the dashboard page needs, built from one pass over the records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dashboard {
    pub summary: DashboardSummary,
    pub hunts: Vec<HuntView>,
}

impl Dashboard {
    /// Aggregates records already ordered most recent first.
    ///
    /// # Errors
    /// Returns [`HuntError::Encoding`] when a record cannot be serialized.
    pub fn from_records(records: &[HuntRecord]) -> Result<Self, HuntError> {
        let mut summary = DashboardSummary::default();
        let mut hunts = Vec::with_capacity(records.len());
        for record in records {
            summary.observe(record);
            hunts.push(HuntView::from_record(record)?);
        }
        Ok(Self { summary, hunts })
    }

    /// Structured payload embedded in the page for client-side charts.
    ///
    /// # Errors
    /// Returns [`HuntError::Encoding`] when JSON serialization fails.
    pub fn hunts_json(&self) -> Result<String, HuntError> {
        serde_json::to_string(&self.hunts)
            .map_err(|err| HuntError::Encoding(format!("failed to serialize hunts: {err}")))
    }
}
