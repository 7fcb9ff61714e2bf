//! A live-streaming ingest and fan-out engine speaking the RTMP wire protocol.
//!
//! One set of clients publishes live audio/video; another set subscribes to
//! those streams by path.  The crate covers the handshake (plain and
//! digest-verified), the chunk stream codec, AMF0/AMF3 command handling, the
//! publisher/subscriber registries, and the GOP cache that lets late joiners
//! render immediately.
//!
//! The layers compose bottom-up:
//!
//! * [`handshake`], [`chunk_io`], and [`messages`] are sans-IO codecs.
//! * [`sessions`] turns decoded messages into per-connection protocol state
//!   and raised events, without touching sockets.
//! * [`hub`] owns everything shared between sessions and performs fan-out.
//! * [`server`] binds the TCP listener and wires a session task per
//!   connection.
//!
//! ```no_run
//! use cinder_rtmp::config::ServerConfig;
//! use cinder_rtmp::server::RtmpServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let server = RtmpServer::with_defaults(ServerConfig::default());
//! server.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod chunk_io;
pub mod config;
pub mod handshake;
pub mod hub;
pub mod media;
pub mod messages;
pub mod server;
pub mod sessions;
pub mod time;
