//! Core types for graph search filters, tasks, and request payloads.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Comparison operator used by property and date filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonOperator {
    #[serde(rename = "=")]
    Equals,
    #[serde(rename = "<>")]
    NotEquals,
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = ">=")]
    GreaterThanEqual,
    #[serde(rename = "<=")]
    LessThanEqual,
    #[serde(rename = "IS NULL")]
    IsNull,
    #[serde(rename = "IS NOT NULL")]
    IsNotNull,
}

impl ComparisonOperator {
    /// Canonical wire token.
    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonOperator::Equals => "=",
            ComparisonOperator::NotEquals => "<>",
            ComparisonOperator::GreaterThan => ">",
            ComparisonOperator::LessThan => "<",
            ComparisonOperator::GreaterThanEqual => ">=",
            ComparisonOperator::LessThanEqual => "<=",
            ComparisonOperator::IsNull => "IS NULL",
            ComparisonOperator::IsNotNull => "IS NOT NULL",
        }
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A filter literal after type inference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Null,
}

/// Filter on a node or edge attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyFilter {
    pub property_name: String,
    pub comparison_operator: ComparisonOperator,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property_value: Option<PropertyValue>,
}

/// Date fields that accept date filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateField {
    CreatedAt,
    ValidAt,
    InvalidAt,
    ExpiredAt,
}

impl DateField {
    pub const ALL: [DateField; 4] = [
        DateField::CreatedAt,
        DateField::ValidAt,
        DateField::InvalidAt,
        DateField::ExpiredAt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DateField::CreatedAt => "created_at",
            DateField::ValidAt => "valid_at",
            DateField::InvalidAt => "invalid_at",
            DateField::ExpiredAt => "expired_at",
        }
    }

    /// Exact, case-sensitive lookup by field name.
    pub fn from_name(name: &str) -> Option<DateField> {
        DateField::ALL.into_iter().find(|f| f.as_str() == name)
    }
}

impl fmt::Display for DateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single comparison against a date field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateFilter {
    pub comparison_operator: ComparisonOperator,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

/// Outer vector is OR'd groups, inner vector is AND'd filters.
pub type DateFilterGroups = Vec<Vec<DateFilter>>;

/// Filters attached to a graph search request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub created_at: DateFilterGroups,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub valid_at: DateFilterGroups,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub invalid_at: DateFilterGroups,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expired_at: DateFilterGroups,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub property_filters: Vec<PropertyFilter>,
    /// Node labels to exclude from results.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub node_labels: Vec<String>,
    /// Edge types to exclude from results.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edge_types: Vec<String>,
}

impl SearchFilters {
    pub fn date_groups(&self, field: DateField) -> &DateFilterGroups {
        match field {
            DateField::CreatedAt => &self.created_at,
            DateField::ValidAt => &self.valid_at,
            DateField::InvalidAt => &self.invalid_at,
            DateField::ExpiredAt => &self.expired_at,
        }
    }

    pub fn date_groups_mut(&mut self, field: DateField) -> &mut DateFilterGroups {
        match field {
            DateField::CreatedAt => &mut self.created_at,
            DateField::ValidAt => &mut self.valid_at,
            DateField::InvalidAt => &mut self.invalid_at,
            DateField::ExpiredAt => &mut self.expired_at,
        }
    }
}

/// Scope of a graph search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SearchScope {
    Edges,
    Nodes,
    Episodes,
}

/// Result reranking strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum Reranker {
    Rrf,
    Mmr,
    CrossEncoder,
}

/// Body of a graph search request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphSearchQuery {
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_id: Option<String>,
    pub scope: SearchScope,
    pub limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reranker: Option<Reranker>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mmr_lambda: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_filters: Option<SearchFilters>,
}

/// Kind of data sent to the graph for ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Text,
    Json,
    Message,
}

/// Closed value union for metadata payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Sequence(Vec<MetadataValue>),
    Mapping(BTreeMap<String, MetadataValue>),
}

pub type Metadata = BTreeMap<String, MetadataValue>;

/// Single episode ingestion request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AddDataRequest {
    pub data: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

/// One entry of a batch ingestion file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeData {
    pub data: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
}

/// Input file shape for batch ingestion: `{"episodes": [...]}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EpisodeInput {
    pub episodes: Vec<EpisodeData>,
}

/// Batch ingestion request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AddBatchRequest {
    pub episodes: Vec<EpisodeData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_id: Option<String>,
}

/// Episode as returned by ingestion endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub uuid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(flatten)]
    pub extra: Metadata,
}

/// Graph clone request. Either the user pair or the graph pair is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CloneGraphRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_graph_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_graph_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloneGraphResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

/// Server-side task status. Unrecognized values are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Other(String),
}

impl TaskStatus {
    pub fn as_str(&self) -> &str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Other(s) => s,
        }
    }
}

impl From<String> for TaskStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "pending" => TaskStatus::Pending,
            "processing" => TaskStatus::Processing,
            "completed" => TaskStatus::Completed,
            "failed" => TaskStatus::Failed,
            _ => TaskStatus::Other(s),
        }
    }
}

impl From<TaskStatus> for String {
    fn from(status: TaskStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskErrorInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Snapshot of a server-side task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    /// Missing status is read as an empty, non-terminal status.
    #[serde(default = "empty_status")]
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskErrorInfo>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

fn empty_status() -> TaskStatus {
    TaskStatus::Other(String::new())
}

impl TaskRecord {
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().and_then(|e| e.message.as_deref())
    }
}
