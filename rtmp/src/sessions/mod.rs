//! This module contains the server side session abstraction.
//!
//! A session reacts to incoming RTMP messages (encoded as RTMP chunks)
//! with packets to be sent as a response, as well as raising events that the
//! hosting connection and hub perform custom logic on.

mod server;

pub use self::server::OutstandingRequestPurpose;
pub use self::server::ServerSession;
pub use self::server::ServerSessionConfig;
pub use self::server::ServerSessionError;
pub use self::server::ServerSessionEvent;
pub use self::server::ServerSessionResult;

use cinder_amf::Amf0Value;

/// Contains the metadata information a stream may advertise on publishing
#[derive(PartialEq, Debug, Clone, Default)]
pub struct StreamMetadata {
    pub video_width: Option<u32>,
    pub video_height: Option<u32>,
    pub video_codec: Option<String>,
    pub video_frame_rate: Option<f32>,
    pub video_bitrate_kbps: Option<u32>,
    pub audio_codec: Option<String>,
    pub audio_bitrate_kbps: Option<u32>,
    pub audio_sample_rate: Option<u32>,
    pub audio_channels: Option<u32>,
    pub audio_is_stereo: Option<bool>,
    pub encoder: Option<String>,
}

impl StreamMetadata {
    pub fn new() -> StreamMetadata {
        StreamMetadata::default()
    }

    /// Applies the properties of an `onMetaData` object to the metadata
    pub(crate) fn apply_metadata_values(&mut self, properties: Vec<(String, Amf0Value)>) {
        for (key, value) in properties {
            match key.as_ref() {
                "width" => {
                    if let Some(x) = value.get_number() {
                        self.video_width = Some(x as u32)
                    }
                }

                "height" => {
                    if let Some(x) = value.get_number() {
                        self.video_height = Some(x as u32)
                    }
                }

                "videocodecid" => {
                    if let Some(x) = value.get_string() {
                        self.video_codec = Some(x)
                    }
                }

                "videodatarate" => {
                    if let Some(x) = value.get_number() {
                        self.video_bitrate_kbps = Some(x as u32)
                    }
                }

                "framerate" => {
                    if let Some(x) = value.get_number() {
                        self.video_frame_rate = Some(x as f32)
                    }
                }

                "audiocodecid" => {
                    if let Some(x) = value.get_string() {
                        self.audio_codec = Some(x)
                    }
                }

                "audiodatarate" => {
                    if let Some(x) = value.get_number() {
                        self.audio_bitrate_kbps = Some(x as u32)
                    }
                }

                "audiosamplerate" => {
                    if let Some(x) = value.get_number() {
                        self.audio_sample_rate = Some(x as u32)
                    }
                }

                "audiochannels" => {
                    if let Some(x) = value.get_number() {
                        self.audio_channels = Some(x as u32)
                    }
                }

                "stereo" => {
                    if let Some(x) = value.get_boolean() {
                        self.audio_is_stereo = Some(x)
                    }
                }

                "encoder" => {
                    if let Some(x) = value.get_string() {
                        self.encoder = Some(x)
                    }
                }

                _ => (),
            }
        }
    }
}
