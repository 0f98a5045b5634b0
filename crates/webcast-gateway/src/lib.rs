//! Webcast signaling gateway.
//!
//! Brokers SDP offer/answer and ICE candidate exchange between one publishing
//! browser and any number of viewers. All media work is delegated to an
//! external engine behind [`media::MediaEngine`].

pub mod channel;
pub mod config;
pub mod media;
pub mod peers;
pub mod signal;
pub mod web;

pub use channel::{Channel, ChannelSnapshot};
pub use config::Config;
pub use peers::{ConnectionId, Peers};
pub use web::{router, AppState};
