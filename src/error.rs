//! Error taxonomy for the digest pipeline.
//!
//! Every collaborator boundary has its own error type so the orchestrator can
//! decide, per kind, whether a failure is skipped and logged or ends the run.
//! Only [`FatalError`] ever escapes a pipeline run.

use thiserror::Error;

/// A malformed source, patch or input record, rejected before use.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("invalid url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("a source named `{0}` already exists")]
    DuplicateName(String),

    #[error("weight must be a finite number >= 0, got {0}")]
    InvalidWeight(f64),

    #[error("keyword `{keyword}` appears in both the {first} and {second} tiers")]
    OverlappingKeyword {
        keyword: String,
        first: &'static str,
        second: &'static str,
    },
}

/// Lookup of a source that is not in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no source named `{0}`")]
pub struct NotFoundError(pub String);

/// Failure of a registry update: either the name is unknown or the patched
/// source would be invalid.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum UpdateError {
    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// Per-source transient scraping failure. Logged, the source is skipped.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("invalid selector `{selector}` for field `{field}`")]
    Selector { field: String, selector: String },

    #[error("timed out after {0}s")]
    Timeout(u64),

    #[error("extraction yielded no articles")]
    Empty,
}

/// LLM call failed or returned output that could not be used.
#[derive(Debug, Error)]
pub enum SummarizationError {
    #[error("summarizer is not configured: {0}")]
    NotConfigured(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {0} from the completion endpoint")]
    Status(u16),

    #[error("unusable completion: {0}")]
    Unparseable(String),

    #[error("timed out after {0}s")]
    Timeout(u64),
}

/// Delivery or persistence failure of one sink. Never aborts sibling sinks.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("rejected by backend: {0}")]
    Rejected(String),

    #[error("timed out after {0}s")]
    Timeout(u64),
}

/// Configuration could not be loaded, or loaded but is unusable.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid configuration:\n  - {}", .0.join("\n  - "))]
    Invalid(Vec<String>),
}

/// Run-level failure: nothing is assembled or delivered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FatalError {
    #[error("none of the {attempted} scraped sources produced an article")]
    NoArticles { attempted: usize },

    #[error("no sources selected for this run")]
    NoSources,

    #[error("run cancelled before the digest was assembled")]
    Cancelled,

    #[error("a run is already in progress")]
    AlreadyRunning,
}
