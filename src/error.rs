use thiserror::Error;

/// What a record or ranking source can report back.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("source answered {code}: {message}")]
    Status { code: u16, message: String },
    #[error("{0}")]
    Other(String),
}

impl From<sqlx::Error> for SourceError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => SourceError::Timeout,
            sqlx::Error::Io(io) if io.kind() == std::io::ErrorKind::TimedOut => {
                SourceError::Timeout
            }
            sqlx::Error::Io(io) => SourceError::Connection(io.to_string()),
            sqlx::Error::Tls(tls) => SourceError::Connection(tls.to_string()),
            sqlx::Error::PoolClosed => SourceError::Connection("pool closed".to_string()),
            sqlx::Error::RowNotFound => SourceError::Status {
                code: 404,
                message: "no rows returned".to_string(),
            },
            sqlx::Error::Database(db) => {
                let message = db.message().to_string();
                match db.code().as_deref() {
                    // 57014 is query_canceled, raised by statement_timeout
                    Some("57014") => SourceError::Timeout,
                    Some("28P01") | Some("28000") | Some("42501") => {
                        SourceError::Status { code: 401, message }
                    }
                    Some(code) if code.starts_with("22") || code.starts_with("23") => {
                        SourceError::Status { code: 400, message }
                    }
                    _ => SourceError::Other(message),
                }
            }
            other => SourceError::Other(other.to_string()),
        }
    }
}

/// Failure taxonomy for a ranking refresh. `Display` is the message shown
/// to the user.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("The ranking service took too long to respond. Please try again.")]
    Timeout,
    #[error("Unable to reach the ranking service. Check your connection.")]
    NetworkError,
    #[error("Your session has expired. Please sign in again.")]
    Unauthorized,
    #[error("No rankings are available for the selected filters.")]
    NoRecords,
    #[error("The selected filters are not valid.")]
    ValidationError,
    #[error("Something went wrong while loading rankings.")]
    Unknown,
}

impl FetchError {
    pub fn classify(err: &SourceError) -> Self {
        match err {
            SourceError::Timeout => FetchError::Timeout,
            SourceError::Connection(_) => FetchError::NetworkError,
            SourceError::Status { code, .. } => match code {
                401 | 403 => FetchError::Unauthorized,
                404 => FetchError::NoRecords,
                400 | 422 => FetchError::ValidationError,
                408 | 504 => FetchError::Timeout,
                _ => FetchError::Unknown,
            },
            SourceError::Other(_) => FetchError::Unknown,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("chart surface is not available")]
    SurfaceMissing,
    #[error("chart rasterized to an empty {width}x{height} image")]
    EmptyImage { width: u32, height: u32 },
    #[error("chart image conversion produced no data")]
    EmptyPayload,
    #[error("chart rendering failed: {0}")]
    Render(String),
}

/// Non-fatal findings collected while exporting.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReportWarning {
    #[error("chart could not be included: {0}")]
    ChartCaptureFailed(CaptureError),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReportError {
    #[error("report export is not available on this device")]
    ExportUnavailable,
    #[error("could not build the score table: {0}")]
    TableRender(String),
    #[error("could not save the report: {message}. {hint}")]
    ExportPersistenceFailed { message: String, hint: String },
}

/// Remediation hint picked from keywords in the underlying error.
pub fn remediation_hint(message: &str) -> &'static str {
    let lowered = message.to_lowercase();
    if ["disk", "space", "quota"].iter().any(|k| lowered.contains(k)) {
        "Free up some disk space and try again."
    } else if ["chart", "canvas", "image"].iter().any(|k| lowered.contains(k)) {
        "Try again once the chart has finished loading."
    } else {
        "Please try again. If the problem persists, contact support."
    }
}
