use bridge_traits::error::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or incomplete configuration, detected at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A host bridge was neither injected nor available as a default.
    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    /// A default bridge could not be constructed.
    #[error("Bridge setup failed: {0}")]
    Bridge(#[from] BridgeError),
}

pub type Result<T> = std::result::Result<T, Error>;
