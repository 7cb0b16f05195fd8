use thiserror::Error;

/// Why a `host:port` destination was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TargetError {
    #[error("Target is empty")]
    Empty,

    #[error("Missing port in target: {0}")]
    MissingPort(String),

    #[error("Empty host in target: {0}")]
    EmptyHost(String),

    #[error("Host must not contain ':' unless bracketed: {0}")]
    UnbracketedColon(String),

    #[error("Invalid port: {0}")]
    InvalidPort(String),

    #[error("Port out of range: {0}")]
    PortOutOfRange(String),
}

/// Coarse classification used to pick the HTTP response for an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotUpgrade,
    Unauthorized,
    InvalidTarget,
    RelayFailure,
    SetupFailure,
}

impl ErrorKind {
    /// HTTP status reported to the caller for this kind
    ///
    /// `RelayFailure` never reaches the caller (the 101 has already been
    /// sent), it only maps to 500 for completeness.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotUpgrade => 426,
            Self::Unauthorized => 403,
            Self::InvalidTarget => 400,
            Self::RelayFailure | Self::SetupFailure => 500,
        }
    }
}

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Not WebSocket")]
    NotUpgrade,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Invalid Target")]
    InvalidTarget(#[source] TargetError),

    #[error("Connect to {addr} failed: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Connect to {0} timed out")]
    ConnectTimeout(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Setup(String),
}

impl RelayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotUpgrade => ErrorKind::NotUpgrade,
            Self::Unauthorized => ErrorKind::Unauthorized,
            Self::InvalidTarget(_) => ErrorKind::InvalidTarget,
            Self::ConnectFailed { .. }
            | Self::ConnectTimeout(_)
            | Self::WebSocket(_)
            | Self::Io(_) => ErrorKind::RelayFailure,
            Self::Setup(_) => ErrorKind::SetupFailure,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.kind().status_code()
    }
}

impl From<TargetError> for RelayError {
    fn from(err: TargetError) -> Self {
        Self::InvalidTarget(err)
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
