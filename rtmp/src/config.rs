//! Server configuration, deserializable from the `[rtmp]` and `[auth]`
//! sections of a TOML config file.  Every field has a default so an empty
//! config yields a working server.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default)]
    pub rtmp: RtmpConfig,

    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RtmpConfig {
    /// TCP port the listener binds
    #[serde(default = "default_port")]
    pub port: u16,

    /// Outbound chunk size, advertised via SetChunkSize on connect
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,

    /// Whether recent group-of-pictures data is kept for late joiners
    #[serde(default = "default_gop_cache")]
    pub gop_cache: bool,

    /// Seconds between PingRequest messages to each client
    #[serde(default = "default_ping")]
    pub ping: u64,

    /// Seconds a socket may stay silent before the session is stopped
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// Require a valid signature to publish
    #[serde(default)]
    pub publish: bool,

    /// Require a valid signature to play
    #[serde(default)]
    pub play: bool,

    /// Opaque secret handed to the signature verifier
    #[serde(default)]
    pub secret: String,
}

impl Default for RtmpConfig {
    fn default() -> Self {
        RtmpConfig {
            port: default_port(),
            chunk_size: default_chunk_size(),
            gop_cache: default_gop_cache(),
            ping: default_ping(),
            ping_timeout: default_ping_timeout(),
        }
    }
}

fn default_port() -> u16 {
    1935
}

fn default_chunk_size() -> u32 {
    128
}

fn default_gop_cache() -> bool {
    true
}

fn default_ping() -> u64 {
    60
}

fn default_ping_timeout() -> u64 {
    30
}
