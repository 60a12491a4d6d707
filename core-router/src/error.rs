use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    /// The location names another origin.
    #[error("Route '{0}' points outside the application")]
    External(String),

    #[error("Route '{0}' must start with '/'")]
    NotAbsolute(String),
}

pub type Result<T> = std::result::Result<T, RouteError>;
