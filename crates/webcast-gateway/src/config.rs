//! Startup parameters, from flags or the environment (`.env` included).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::media::KurentoOptions;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_KEEPALIVE_SECS: u64 = 240;

#[derive(Parser, Debug, Clone)]
#[command(name = "webcast-gateway")]
#[command(about = "WebRTC signaling gateway - one publisher, many viewers, media via Kurento")]
pub struct Config {
    /// HTTP listen address for static assets and `/ws`
    #[arg(long, env = "WEBCAST_LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Kurento Media Server JSON-RPC endpoint
    #[arg(long, env = "KMS_URL", default_value = "ws://localhost:8888/kurento")]
    pub media_engine_url: String,

    /// Directory served for everything that is not `/ws` or `/health`
    #[arg(long, env = "WEBCAST_WEBROOT", default_value = "webapp")]
    pub webroot: PathBuf,

    /// Seconds to wait for any single media engine request
    #[arg(long, env = "WEBCAST_KMS_TIMEOUT_SECS", default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS)]
    pub request_timeout_secs: u64,

    /// Seconds between keepalive pings to the media engine
    #[arg(long, env = "WEBCAST_KMS_KEEPALIVE_SECS", default_value_t = DEFAULT_KEEPALIVE_SECS)]
    pub keepalive_secs: u64,

    /// Origins allowed to call `/health` cross-origin (`*` for any)
    #[arg(long, env = "WEBCAST_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Vec<String>,

    /// Log level used when RUST_LOG is unset
    #[arg(long, env = "WEBCAST_LOG", default_value = "info")]
    pub log_level: String,
}

impl Config {
    pub fn kurento_options(&self) -> KurentoOptions {
        KurentoOptions {
            request_timeout: Duration::from_secs(self.request_timeout_secs.max(1)),
            keepalive_interval: Duration::from_secs(self.keepalive_secs.max(1)),
        }
    }

    /// URL a browser on this host would use for signaling.
    pub fn ws_url(&self) -> String {
        let host = if self.listen.ip().is_unspecified() {
            "localhost".to_string()
        } else {
            self.listen.ip().to_string()
        };
        format!("ws://{}:{}/ws", host, self.listen.port())
    }
}
