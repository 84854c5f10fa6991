//! Error taxonomy shared by every Switchyard crate.
//!
//! None of these errors is fatal to the process: each one degrades a single
//! request, a single pool member or a single config delta.

use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// No selector or rule matched the request.
    #[error("no route matched plugin `{plugin}` for path `{path}`")]
    NoRouteMatch { plugin: String, path: String },

    /// The pool for a matched route is empty or every member is unreachable.
    #[error("no upstream available for `{key}`")]
    NoUpstreamAvailable { key: String },

    /// A single health probe failed or timed out.
    #[error("probe of `{target}` failed: {reason}")]
    ProbeFailure { target: String, reason: String },

    /// Building a remote reference failed. Never cached.
    #[error("failed to build reference for `{path}`: {reason}")]
    ReferenceBuildFailure { path: String, reason: String },

    /// A delta arrived for an entity whose recorded version is newer.
    #[error("stale {entity} `{id}`: incoming version {incoming} < current {current}")]
    ConfigApplyConflict {
        entity: String,
        id: String,
        current: i64,
        incoming: i64,
    },

    #[error("invalid handle for plugin `{plugin}`: {reason}")]
    InvalidHandle { plugin: String, reason: String },

    #[error("invalid change event: {0}")]
    InvalidEvent(String),

    #[error("control plane error: {0}")]
    ControlPlane(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl GatewayError {
    pub fn no_route(plugin: impl Into<String>, path: impl Into<String>) -> Self {
        Self::NoRouteMatch {
            plugin: plugin.into(),
            path: path.into(),
        }
    }

    pub fn no_upstream(key: impl Into<String>) -> Self {
        Self::NoUpstreamAvailable { key: key.into() }
    }

    pub fn probe(target: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::ProbeFailure {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    pub fn build(path: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::ReferenceBuildFailure {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn control_plane(reason: impl std::fmt::Display) -> Self {
        Self::ControlPlane(reason.to_string())
    }

    /// Whether retrying the same operation later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NoUpstreamAvailable { .. }
                | Self::ProbeFailure { .. }
                | Self::ReferenceBuildFailure { .. }
                | Self::ControlPlane(_)
        )
    }

    /// HTTP status a front end should answer with for this outcome.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NoRouteMatch { .. } => 404,
            Self::NoUpstreamAvailable { .. } => 503,
            Self::ProbeFailure { .. } | Self::ReferenceBuildFailure { .. } => 502,
            Self::ConfigApplyConflict { .. } => 409,
            Self::InvalidHandle { .. } | Self::InvalidEvent(_) => 400,
            Self::ControlPlane(_) | Self::Config(_) => 500,
        }
    }
}
