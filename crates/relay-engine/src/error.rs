use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("upstream returned HTTP {status} for {url}")]
    Upstream { status: StatusCode, url: String },

    #[error("upstream blocked the request for {url}: {reason}")]
    Blocked { url: String, reason: String },

    #[error("playlist error: {reason}")]
    Playlist { reason: String },

    #[error("resolver error: {reason}")]
    Resolver { reason: String },

    #[error("no usable server among {attempts} candidate(s); last: {last_reason}")]
    AllServersUnavailable { attempts: usize, last_reason: String },

    #[error("stream appears blocked: {blocked} of {total} segments rejected")]
    StreamBlocked { blocked: usize, total: usize },

    #[error("incomplete download: {downloaded} of {total} segments succeeded")]
    IncompleteDownload { downloaded: usize, total: usize },

    #[error("assembly failed: {reason}")]
    Assembly { reason: String },

    #[error("operation timed out: {reason}")]
    Timeout { reason: String },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl RelayError {
    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn upstream(status: StatusCode, url: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            url: url.into(),
        }
    }

    pub fn blocked(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Blocked {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn playlist(reason: impl Into<String>) -> Self {
        Self::Playlist {
            reason: reason.into(),
        }
    }

    pub fn resolver(reason: impl Into<String>) -> Self {
        Self::Resolver {
            reason: reason.into(),
        }
    }

    pub fn assembly(reason: impl Into<String>) -> Self {
        Self::Assembly {
            reason: reason.into(),
        }
    }

    /// Whether retrying the same request may succeed.
    ///
    /// Blocks are terminal: the origin made a decision about our identity,
    /// and a repeat of the identical request will meet the same decision.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Io { .. } | Self::Timeout { .. } => true,
            Self::Upstream { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::Blocked { .. }
            | Self::InvalidUrl { .. }
            | Self::Playlist { .. }
            | Self::Resolver { .. }
            | Self::AllServersUnavailable { .. }
            | Self::StreamBlocked { .. }
            | Self::IncompleteDownload { .. }
            | Self::Assembly { .. } => false,
        }
    }

    /// Whether the failure indicates active origin-side protection rather
    /// than a broken link, so a caller should try a different server.
    pub fn is_block(&self) -> bool {
        matches!(
            self,
            Self::Blocked { .. } | Self::StreamBlocked { .. }
        ) || matches!(self, Self::Upstream { status, .. } if *status == StatusCode::FORBIDDEN)
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
