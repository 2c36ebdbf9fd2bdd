//! Error taxonomy shared across the agent.
//!
//! Probe and publish failures are per-tick events the scheduler logs and
//! moves past; startup failures abort the process before the loop begins.

use thiserror::Error;

/// A metric source call failed or returned unusable output.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("command `{command}` failed: {reason}")]
    CommandFailed { command: String, reason: String },

    #[error("failed to parse {what} output: {source}")]
    Parse {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("unexpected {what} output: {detail}")]
    Malformed { what: &'static str, detail: String },

    /// The shared measurement does not carry the field a sensor expects,
    /// e.g. a disk that disappeared between discovery and sampling.
    #[error("measurement is missing {0}")]
    MissingField(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The broker rejected or could not accept a message.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("mqtt publish to `{topic}` failed: {source}")]
    Mqtt {
        topic: String,
        #[source]
        source: rumqttc::ClientError,
    },
}

/// Unrecoverable failure before the scheduler loop starts.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("missing required tools: {tools}; install them with: sudo apt-get install {packages}")]
    MissingDependencies { tools: String, packages: String },

    #[error("could not resolve device identity: {0}")]
    DeviceIdentity(String),

    #[error("no sensors discovered on this host")]
    EmptyCatalog,
}
