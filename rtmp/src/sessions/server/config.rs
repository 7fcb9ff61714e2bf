/// The configuration options that govern how a RTMP server session should operate
#[derive(Clone, Debug)]
pub struct ServerSessionConfig {
    /// Version string advertised in the `connect` result
    pub fms_version: String,

    /// Outbound chunk size, advertised to the peer via SetChunkSize on connect
    pub chunk_size: u32,

    /// Value sent in the SetPeerBandwidth message on connect
    pub peer_bandwidth: u32,

    /// Value sent in the WindowAcknowledgementSize message on connect
    pub window_ack_size: u32,

    /// When true, publish attempts must carry a signature the verifier accepts
    pub auth_publish: bool,

    /// When true, play attempts must carry a signature the verifier accepts
    pub auth_play: bool,

    /// Opaque secret handed to the signature verifier
    pub auth_secret: String,
}

impl ServerSessionConfig {
    pub fn new() -> ServerSessionConfig {
        ServerSessionConfig {
            fms_version: "FMS/3,0,1,123".to_string(),
            chunk_size: 128,
            peer_bandwidth: 5_000_000,
            window_ack_size: 5_000_000,
            auth_publish: false,
            auth_play: false,
            auth_secret: String::new(),
        }
    }
}

impl Default for ServerSessionConfig {
    fn default() -> Self {
        ServerSessionConfig::new()
    }
}
