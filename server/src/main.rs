//! Standalone RTMP server binary: loads a TOML config, initializes tracing,
//! runs the server until ctrl-c.

use cinder_rtmp::config::ServerConfig;
use cinder_rtmp::hub::RtmpEvent;
use cinder_rtmp::server::RtmpServer;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

fn load_config(path: Option<&str>) -> Result<ServerConfig, ConfigError> {
    match path {
        Some(path) => {
            let contents = std::fs::read_to_string(Path::new(path))?;
            Ok(toml::from_str(&contents)?)
        }

        None => Ok(ServerConfig::default()),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let config_path = std::env::args().nth(1);
    let config = match load_config(config_path.as_deref()) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("{}", error);
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.rtmp.port,
        gop_cache = config.rtmp.gop_cache,
        "cinder-server starting"
    );

    let server = Arc::new(RtmpServer::with_defaults(config));

    // Log stream lifecycle events as they happen
    let mut events = server.events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                RtmpEvent::PostPublish {
                    session_id,
                    stream_path,
                } => info!(session_id, %stream_path, "Stream went live"),

                RtmpEvent::DonePublish {
                    session_id,
                    stream_path,
                } => info!(session_id, %stream_path, "Stream ended"),

                _ => (),
            }
        }
    });

    let signal_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            signal_server.stop();
        }
    });

    match server.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "Server terminated");
            ExitCode::FAILURE
        }
    }
}
