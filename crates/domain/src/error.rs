/// Shared error type used across all Archon crates.
///
/// The engine distinguishes a handful of kinds that drive recovery and HTTP
/// mapping: `Invalid` (400), `NotFound` (404), `Unavailable` (503),
/// `TurnInProgress` (409), `Transport` (upstream 4xx/5xx), and the two
/// internally-recovered kinds `ClosedPipe` and `MissingThread`.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid: {0}")]
    Invalid(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("closed pipe: {0}")]
    ClosedPipe(String),

    #[error("missing thread: {0}")]
    MissingThread(String),

    #[error("turn already in progress: {0}")]
    TurnInProgress(String),

    #[error("transport {method} {path}: status {status}")]
    Transport {
        method: String,
        path: String,
        status: u16,
    },

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Substrings that identify a dead transport pipe, regardless of which layer
/// produced the underlying I/O error.
const CLOSED_PIPE_MARKERS: [&str; 3] = ["file already closed", "broken pipe", "closed pipe"];

/// Substrings the upstream providers use to report an unknown thread.
const MISSING_THREAD_MARKERS: [&str; 3] = [
    "thread not found",
    "thread not loaded",
    "no rollout found for thread id",
];

impl Error {
    /// A transport I/O failure that warrants a manager-level retry with a
    /// fresh transport.
    pub fn is_closed_pipe(&self) -> bool {
        match self {
            Error::ClosedPipe(_) => true,
            Error::Io(e) => {
                let msg = e.to_string().to_lowercase();
                CLOSED_PIPE_MARKERS.iter().any(|m| msg.contains(m))
            }
            Error::Other(msg) | Error::Provider { message: msg, .. } => {
                let msg = msg.to_lowercase();
                CLOSED_PIPE_MARKERS.iter().any(|m| msg.contains(m))
            }
            _ => false,
        }
    }

    /// The upstream has no such thread; triggers bootstrap recovery when the
    /// session qualifies.
    pub fn is_missing_thread(&self) -> bool {
        match self {
            Error::MissingThread(_) => true,
            Error::Provider { message, .. } | Error::Other(message) => {
                let msg = message.to_lowercase();
                MISSING_THREAD_MARKERS.iter().any(|m| msg.contains(m))
            }
            _ => false,
        }
    }

    /// Classify a raw upstream error message into `MissingThread` /
    /// `ClosedPipe` when its text matches, otherwise keep it opaque.
    pub fn from_upstream_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if MISSING_THREAD_MARKERS.iter().any(|m| lower.contains(m)) {
            return Error::MissingThread(message);
        }
        if CLOSED_PIPE_MARKERS.iter().any(|m| lower.contains(m)) {
            return Error::ClosedPipe(message);
        }
        Error::Other(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_pipe_markers_detected() {
        for msg in ["file already closed", "write: broken pipe", "use of closed pipe"] {
            assert!(Error::Other(msg.into()).is_closed_pipe(), "{msg}");
        }
        assert!(!Error::Other("connection refused".into()).is_closed_pipe());
    }

    #[test]
    fn closed_pipe_from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "broken pipe");
        assert!(Error::Io(io).is_closed_pipe());
    }

    #[test]
    fn missing_thread_markers_detected() {
        for msg in [
            "thread not found",
            "Thread Not Loaded",
            "no rollout found for thread id abc",
        ] {
            assert!(Error::Other(msg.into()).is_missing_thread(), "{msg}");
        }
        assert!(!Error::Other("thread park".into()).is_missing_thread());
    }

    #[test]
    fn upstream_message_classification() {
        assert!(matches!(
            Error::from_upstream_message("thread not loaded: t-1"),
            Error::MissingThread(_)
        ));
        assert!(matches!(
            Error::from_upstream_message("stdin: file already closed"),
            Error::ClosedPipe(_)
        ));
        assert!(matches!(
            Error::from_upstream_message("something else"),
            Error::Other(_)
        ));
    }

    #[test]
    fn transport_error_display() {
        let e = Error::Transport {
            method: "POST".into(),
            path: "/session/s1/message".into(),
            status: 502,
        };
        assert_eq!(e.to_string(), "transport POST /session/s1/message: status 502");
    }
}
