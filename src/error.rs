//! Error types for the relay.

use thiserror::Error;

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can surface outside the packet hot path.
///
/// Hot-path problems (unrecognized frames, transient socket errors) are
/// handled in place as drops or reconnects and never become an `Error`;
/// only startup can fail.
#[derive(Error, Debug)]
pub enum Error {
    /// One or more invalid or missing configuration values, reported together
    #[error("configuration errors:\n{0}")]
    Config(String),

    /// CPS template syntax error
    #[error("invalid CPS template: {0}")]
    Template(String),

    /// Socket setup failure (resolve, bind, or dial) at startup
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),
}

impl Error {
    /// Create a new template error
    pub fn template(msg: impl Into<String>) -> Self {
        Error::Template(msg.into())
    }

    /// Build the aggregated configuration report from individual findings.
    pub fn config_report(issues: &[String]) -> Self {
        let mut msg = String::new();
        for issue in issues {
            msg.push_str("  - ");
            msg.push_str(issue);
            msg.push('\n');
        }
        msg.push_str("\nAll AWG_* parameters can be found in your AmneziaWG .conf file.");
        Error::Config(msg)
    }
}
