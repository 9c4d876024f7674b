use std::fmt;

/// Error types for the confession bot.
///
/// Each stage of a run has its own error enum so the orchestrator can decide
/// how far a failure reaches: a fetch failure ends the run before any state
/// changes, a render or publish failure stops the queue at the failing post,
/// and a persistence failure ends the run immediately.

/// Top-level error for bot operations.
#[derive(Debug)]
pub enum BotError {
    /// Reading posts from the upstream page failed.
    Fetch(FetchError),

    /// Turning post text into an image failed.
    Render(RenderError),

    /// The destination platform rejected or never received a request.
    Publish(PublishError),

    /// The state, lock or expiry file could not be read or written.
    Persistence(PersistenceError),

    /// Configuration values are missing or invalid.
    Config(ConfigError),
}

/// Errors raised while fetching posts from the source page.
#[derive(Debug)]
pub enum FetchError {
    /// The HTTP request could not be completed.
    RequestFailed { url: String, reason: String },

    /// The page answered with a non-success status.
    HttpStatus { url: String, status: u16 },

    /// The page body could not be understood.
    ParseFailed { url: String, reason: String },
}

/// Errors raised while rendering a post into an image.
#[derive(Debug)]
pub enum RenderError {
    /// The markup template could not be read.
    TemplateReadFailed { path: String, reason: String },

    /// The markup template has no substitution marker.
    MissingMarker { path: String, marker: String },

    /// A font file could not be read or parsed.
    FontLoadFailed { path: String, reason: String },

    /// The substituted markup produced nothing to draw.
    EmptyLayout,

    /// The raster could not be encoded.
    EncodeFailed { reason: String },
}

/// Errors raised by the destination platform API.
#[derive(Debug)]
pub enum PublishError {
    /// The HTTP request could not be completed.
    RequestFailed { endpoint: String, reason: String },

    /// The API rejected the credentials.
    AuthenticationFailed { endpoint: String, status: u16 },

    /// The API is throttling requests.
    RateLimited { endpoint: String },

    /// The API returned some other error response.
    ApiError {
        endpoint: String,
        status: u16,
        message: String,
    },

    /// The API answered successfully but the body was not what we expected.
    MalformedResponse { endpoint: String, reason: String },

    /// The request could not be signed.
    SigningFailed { reason: String },
}

/// Errors raised while reading or writing durable files.
#[derive(Debug)]
pub enum PersistenceError {
    /// The file exists but could not be read.
    ReadFailed { path: String, reason: String },

    /// The file could not be written.
    WriteFailed { path: String, reason: String },

    /// The file exists but does not hold valid data.
    Corrupt { path: String, reason: String },

    /// The run lock could not be taken for a reason other than contention.
    LockFailed { path: String, reason: String },
}

/// Errors related to configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Required environment variable is missing or empty.
    MissingEnvVar { var_name: String },

    /// Invalid configuration value provided.
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

impl fmt::Display for BotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BotError::Fetch(e) => write!(f, "Fetch error: {}", e),
            BotError::Render(e) => write!(f, "Render error: {}", e),
            BotError::Publish(e) => write!(f, "Publish error: {}", e),
            BotError::Persistence(e) => write!(f, "Persistence error: {}", e),
            BotError::Config(e) => write!(f, "Configuration error: {}", e),
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::RequestFailed { url, reason } => {
                write!(f, "Request to '{}' failed: {}", url, reason)
            }
            FetchError::HttpStatus { url, status } => {
                write!(f, "'{}' answered with HTTP {}", url, status)
            }
            FetchError::ParseFailed { url, reason } => {
                write!(f, "Failed to parse page '{}': {}", url, reason)
            }
        }
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::TemplateReadFailed { path, reason } => {
                write!(f, "Failed to read template '{}': {}", path, reason)
            }
            RenderError::MissingMarker { path, marker } => {
                write!(f, "Template '{}' has no '{}' marker", path, marker)
            }
            RenderError::FontLoadFailed { path, reason } => {
                write!(f, "Failed to load font '{}': {}", path, reason)
            }
            RenderError::EmptyLayout => write!(f, "Markup produced no drawable content"),
            RenderError::EncodeFailed { reason } => {
                write!(f, "Failed to encode image: {}", reason)
            }
        }
    }
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishError::RequestFailed { endpoint, reason } => {
                write!(f, "Request to '{}' failed: {}", endpoint, reason)
            }
            PublishError::AuthenticationFailed { endpoint, status } => {
                write!(
                    f,
                    "Authentication failed at '{}' (HTTP {})",
                    endpoint, status
                )
            }
            PublishError::RateLimited { endpoint } => {
                write!(f, "Rate limited at '{}'", endpoint)
            }
            PublishError::ApiError {
                endpoint,
                status,
                message,
            } => {
                write!(f, "API error at '{}' (HTTP {}): {}", endpoint, status, message)
            }
            PublishError::MalformedResponse { endpoint, reason } => {
                write!(f, "Unexpected response from '{}': {}", endpoint, reason)
            }
            PublishError::SigningFailed { reason } => {
                write!(f, "Failed to sign request: {}", reason)
            }
        }
    }
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistenceError::ReadFailed { path, reason } => {
                write!(f, "Failed to read '{}': {}", path, reason)
            }
            PersistenceError::WriteFailed { path, reason } => {
                write!(f, "Failed to write '{}': {}", path, reason)
            }
            PersistenceError::Corrupt { path, reason } => {
                write!(f, "File '{}' is corrupt: {}", path, reason)
            }
            PersistenceError::LockFailed { path, reason } => {
                write!(f, "Failed to lock '{}': {}", path, reason)
            }
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingEnvVar { var_name } => {
                write!(f, "Required environment variable '{}' is not set", var_name)
            }
            ConfigError::InvalidValue {
                field,
                value,
                reason,
            } => {
                write!(
                    f,
                    "Invalid value '{}' for field '{}': {}",
                    value, field, reason
                )
            }
        }
    }
}

impl std::error::Error for BotError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BotError::Fetch(e) => Some(e),
            BotError::Render(e) => Some(e),
            BotError::Publish(e) => Some(e),
            BotError::Persistence(e) => Some(e),
            BotError::Config(e) => Some(e),
        }
    }
}

impl std::error::Error for FetchError {}
impl std::error::Error for RenderError {}
impl std::error::Error for PublishError {}
impl std::error::Error for PersistenceError {}
impl std::error::Error for ConfigError {}

impl From<FetchError> for BotError {
    fn from(err: FetchError) -> Self {
        BotError::Fetch(err)
    }
}

impl From<RenderError> for BotError {
    fn from(err: RenderError) -> Self {
        BotError::Render(err)
    }
}

impl From<PublishError> for BotError {
    fn from(err: PublishError) -> Self {
        BotError::Publish(err)
    }
}

impl From<PersistenceError> for BotError {
    fn from(err: PersistenceError) -> Self {
        BotError::Persistence(err)
    }
}

impl From<ConfigError> for BotError {
    fn from(err: ConfigError) -> Self {
        BotError::Config(err)
    }
}
