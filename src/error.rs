//! The gateway's error taxonomy.
//!
//! Errors are classified by *kind*, not by originating type, mirroring the
//! way [`crate::mcp::manifest::ToolError`] separates tool failure modes.
//! [`GatewayError::is_retryable_by_quarantine`] drives the only automatic
//! recovery the router performs: pulling a provider out of rotation.

use std::error::Error as StdError;
use std::fmt;

/// Substrings that identify a transport-level failure against an upstream.
///
/// Matched case-insensitively against the `Display` of whatever error reqwest
/// (or the body scanner) produced. This mirrors the taxonomy-by-substring
/// approach the source system uses rather than matching on concrete error
/// types, since reqwest/hyper bury the interesting detail in the message.
const TRANSPORT_MARKERS: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection timeout",
    "no such host",
    "network is unreachable",
    "temporary failure",
    "timeout",
    "dial",
    "eof",
    "connection closed",
];

/// Upstream API markers that imply a broken model runtime rather than a bad request.
///
/// These come from self-hosted OpenAI-compatible runtimes (llama.cpp, vLLM,
/// Ollama) that report a crashed worker via the response body rather than a
/// transport error.
const FATAL_UPSTREAM_MARKERS: &[&str] = &[
    "missing tensor",
    "runner process terminated",
    "model runner has terminated",
    "cuda error",
    "out of memory",
];

/// The gateway's error taxonomy, classified by kind per the design's error handling section.
#[derive(Debug)]
pub enum GatewayError {
    /// The requested model id is not present in the model index.
    UnknownModel(String),
    /// A low-level connectivity failure talking to an upstream.
    Transport(String),
    /// An upstream API marker implying a broken model runtime.
    FatalUpstream(String),
    /// A reachable upstream returned a non-2xx status.
    UpstreamStatus { status: u16, body: String },
    /// The requested tool name isn't in the current tool provider scan.
    ToolNotFound(String),
    /// A tool script raised during evaluation.
    ToolEvaluation(String),
    /// The tool-calling driver exhausted its iteration bound.
    MaxToolIterations(usize),
    /// The streaming endpoint's underlying server abstraction can't flush.
    StreamingUnsupported,
    /// Malformed request JSON.
    InvalidRequest(String),
    /// Any other error, carried through without reclassification.
    Other(Box<dyn StdError + Send + Sync>),
}

impl GatewayError {
    /// Classify a transport-layer error message produced while talking to an upstream.
    ///
    /// Returns `Transport` if the message matches one of the known connectivity
    /// markers, otherwise wraps it as `Other`.
    pub fn classify_transport(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if TRANSPORT_MARKERS.iter().any(|m| lower.contains(m)) {
            GatewayError::Transport(message)
        } else {
            GatewayError::Other(message.into())
        }
    }

    /// Check a successfully-parsed upstream response body for a fatal-runtime marker.
    pub fn fatal_marker_in(body: &str) -> Option<Self> {
        let lower = body.to_lowercase();
        FATAL_UPSTREAM_MARKERS
            .iter()
            .find(|m| lower.contains(*m))
            .map(|m| GatewayError::FatalUpstream((*m).to_string()))
    }

    /// Whether this error should cause the router to quarantine the provider that produced it.
    ///
    /// Only `Transport` and `FatalUpstream` recover via quarantine; everything
    /// else is surfaced to the caller untouched (§7, propagation policy).
    pub fn quarantines_provider(&self) -> bool {
        matches!(self, GatewayError::Transport(_) | GatewayError::FatalUpstream(_))
    }

    /// Map this error onto the HTTP status the public surface should return.
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::UnknownModel(_) => 404,
            GatewayError::InvalidRequest(_) => 400,
            GatewayError::StreamingUnsupported => 500,
            GatewayError::UpstreamStatus { .. } => 500,
            GatewayError::Transport(_) | GatewayError::FatalUpstream(_) => 500,
            GatewayError::ToolNotFound(_) => 404,
            GatewayError::ToolEvaluation(_) => 200,
            GatewayError::MaxToolIterations(_) => 500,
            GatewayError::Other(_) => 500,
        }
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::UnknownModel(model) => write!(f, "unknown model: {}", model),
            GatewayError::Transport(msg) => write!(f, "transport error: {}", msg),
            GatewayError::FatalUpstream(msg) => write!(f, "fatal upstream error: {}", msg),
            GatewayError::UpstreamStatus { status, body } => {
                write!(f, "upstream returned {}: {}", status, body)
            }
            GatewayError::ToolNotFound(name) => write!(f, "tool not found: {}", name),
            GatewayError::ToolEvaluation(msg) => write!(f, "Error: {}", msg),
            GatewayError::MaxToolIterations(cap) => {
                write!(f, "tool-calling driver exceeded {} iterations", cap)
            }
            GatewayError::StreamingUnsupported => {
                write!(f, "streaming not supported by this server abstraction")
            }
            GatewayError::InvalidRequest(msg) => write!(f, "invalid request: {}", msg),
            GatewayError::Other(err) => write!(f, "{}", err),
        }
    }
}

impl StdError for GatewayError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            GatewayError::Other(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<String> for GatewayError {
    fn from(value: String) -> Self {
        GatewayError::Other(value.into())
    }
}

impl From<&str> for GatewayError {
    fn from(value: &str) -> Self {
        GatewayError::Other(value.to_string().into())
    }
}
