//! Shared pieces for Webcast: the JSON control protocol, the signaling error
//! taxonomy and logging setup.
//!
//! Both the gateway and its tests speak the protocol through these types.

#![forbid(unsafe_code)]

pub mod error;
pub mod protocol;

pub use error::{Operation, Result, SignalError};
pub use protocol::{ClientMessage, IceCandidate, ServerMessage};

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins when set. Otherwise `default_level` applies everywhere
/// except the WebSocket codec crates, which are capped at `info`. Calling
/// this twice is harmless.
pub fn init_tracing_with_default(default_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{default_level},tungstenite=info,tokio_tungstenite=info"
        ))
    });

    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_err()
    {
        tracing::debug!("tracing subscriber already installed");
    }
}
