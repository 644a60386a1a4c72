//! graphctl - administrative client for a hosted knowledge-graph service.
//!
//! The library holds the pieces with real behavior: the search filter
//! expression parser, the task waiter used by long-running operations, the
//! profile configuration, and a thin HTTP client.

pub mod client;
pub mod config;
pub mod filter;
pub mod task;
pub mod types;

pub use client::{ApiClient, ClientError, DEFAULT_API_URL};
pub use config::{Config, ConfigError, Defaults, OutputFormat, Profile};
pub use filter::{
    FilterArgs, FilterError, build_search_filters, infer_value, parse_comparison_operator,
    parse_date_filter, parse_property_filter,
};
pub use task::{StatusSink, StderrSink, TaskSource, TaskWaiter, WaitError};
pub use types::{
    AddBatchRequest, AddDataRequest, CloneGraphRequest, CloneGraphResponse, ComparisonOperator,
    DataType, DateField, DateFilter, Episode, EpisodeData, EpisodeInput, GraphSearchQuery,
    Metadata, MetadataValue, PropertyFilter, PropertyValue, Reranker, SearchFilters, SearchScope,
    TaskRecord, TaskStatus,
};
