use thiserror::Error;

use market::adapter::VenueError;

/// Process-level error taxonomy. Fatal kinds shut the supervisor down;
/// everything else is handled at the component that raised it.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("network failure: {0}")]
    Network(String),

    #[error("venue api failure: {0}")]
    VenueApi(String),

    #[error("credentials rejected: {0}")]
    Auth(String),

    #[error("trading error: {0}")]
    Trading(String),

    #[error("risk rejection: {0}")]
    Risk(String),

    #[error("invalid market data: {0}")]
    DataValidation(String),

    #[error("internal invariant violated: {0}")]
    System(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl AppError {
    /// Fatal errors log, notify, and stop the process.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::Auth(_) | AppError::Configuration(_) | AppError::System(_)
        )
    }
}

impl From<VenueError> for AppError {
    fn from(e: VenueError) -> Self {
        match e {
            VenueError::Transient(m) => AppError::Network(m),
            VenueError::RateLimited { retry_after_ms } => {
                AppError::VenueApi(format!("rate limited; retry after {retry_after_ms} ms"))
            }
            VenueError::Auth(m) => AppError::Auth(m),
            VenueError::Permanent(m) => AppError::VenueApi(m),
            VenueError::NotFound(m) => AppError::VenueApi(format!("not found: {m}")),
        }
    }
}
