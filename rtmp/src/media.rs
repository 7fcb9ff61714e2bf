//! Inspection of the first bytes of FLV-framed audio and video payloads.
//!
//! The server never decodes media, but it needs just enough of the headers to
//! know which codec a publisher is sending, to recognize sequence headers and
//! keyframes for the GOP cache, and to report sample rates and dimensions to
//! event listeners.

use bytes::Bytes;

const AUDIO_CODEC_NAMES: [&str; 17] = [
    "",
    "ADPCM",
    "MP3",
    "LinearLE",
    "Nellymoser16",
    "Nellymoser8",
    "Nellymoser",
    "G711A",
    "G711U",
    "",
    "AAC",
    "Speex",
    "",
    "",
    "MP3-8K",
    "DeviceSpecific",
    "Uncompressed",
];

const VIDEO_CODEC_NAMES: [&str; 13] = [
    "",
    "Jpeg",
    "Sorenson-H263",
    "ScreenVideo",
    "On2-VP6",
    "On2-VP6-Alpha",
    "ScreenVideo2",
    "H264",
    "",
    "",
    "",
    "",
    "H265",
];

const AUDIO_SOUND_RATES: [u32; 4] = [5512, 11025, 22050, 44100];

const AAC_SAMPLE_RATES: [u32; 16] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350, 0, 0,
    0,
];

pub const AUDIO_CODEC_AAC: u8 = 10;
pub const VIDEO_CODEC_H264: u8 = 7;
pub const VIDEO_CODEC_H265: u8 = 12;

/// What the first bytes of an audio payload reveal about the publisher's
/// audio track.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AudioDescriptor {
    pub codec_id: u8,
    pub codec_name: String,
    pub sample_rate: u32,
    pub channels: u8,
    /// AAC object type from the AudioSpecificConfig, when the codec is AAC
    pub profile: Option<u8>,
}

/// What the sequence header of a video payload reveals about the publisher's
/// video track.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VideoDescriptor {
    pub codec_id: u8,
    pub codec_name: String,
    pub width: u32,
    pub height: u32,
    pub profile: u8,
    pub level: f32,
}

/// Parses the one byte FLV audio tag header.  Returns `None` on an empty
/// payload.
pub fn parse_audio_descriptor(data: &Bytes) -> Option<AudioDescriptor> {
    let first = *data.first()?;

    let codec_id = first >> 4;
    let rate_index = (first >> 2) & 0x03;
    let channels = if first & 0x01 == 0 { 1 } else { 2 };

    let mut descriptor = AudioDescriptor {
        codec_id,
        codec_name: audio_codec_name(codec_id),
        sample_rate: AUDIO_SOUND_RATES[rate_index as usize],
        channels,
        profile: None,
    };

    // A handful of codecs ignore the rate bits and imply their own rate
    match codec_id {
        4 | 11 => descriptor.sample_rate = 16000,
        5 | 14 => descriptor.sample_rate = 8000,
        _ => (),
    }

    if codec_id == AUDIO_CODEC_AAC && is_aac_sequence_header(data) {
        if let Some(config) = parse_aac_config(&data[2..]) {
            descriptor.sample_rate = config.sample_rate;
            descriptor.channels = config.channels;
            descriptor.profile = Some(config.object_type);
        }
    }

    Some(descriptor)
}

/// An AAC AudioSpecificConfig, as carried in the AAC sequence header
#[derive(Debug, Clone, PartialEq)]
pub struct AacConfig {
    pub object_type: u8,
    pub sample_rate: u32,
    pub channels: u8,
}

pub fn is_aac_sequence_header(data: &Bytes) -> bool {
    data.len() >= 2 && data[0] >> 4 == AUDIO_CODEC_AAC && data[1] == 0
}

/// Reads the AudioSpecificConfig bytes that follow the two byte FLV header of
/// an AAC sequence header packet.
pub fn parse_aac_config(config: &[u8]) -> Option<AacConfig> {
    if config.len() < 2 {
        return None;
    }

    let mut object_type = config[0] >> 3;
    let mut rate_index = ((config[0] & 0x07) << 1) | (config[1] >> 7);
    let mut channels = (config[1] >> 3) & 0x0f;

    // Object type 31 escapes into the extended range, shifting every later
    // field down by six bits
    if object_type == 31 {
        if config.len() < 3 {
            return None;
        }

        object_type = 32 + (((config[0] & 0x07) << 3) | (config[1] >> 5));
        rate_index = (config[1] >> 1) & 0x0f;
        channels = ((config[1] & 0x01) << 3) | (config[2] >> 5);
    }

    let sample_rate = *AAC_SAMPLE_RATES.get(rate_index as usize)?;
    if sample_rate == 0 {
        return None;
    }

    Some(AacConfig {
        object_type,
        sample_rate,
        channels,
    })
}

pub fn is_video_sequence_header(data: &Bytes) -> bool {
    if data.len() < 2 {
        return false;
    }

    let codec_id = data[0] & 0x0f;
    let frame_type = data[0] >> 4;

    (codec_id == VIDEO_CODEC_H264 || codec_id == VIDEO_CODEC_H265)
        && frame_type == 1
        && data[1] == 0
}

pub fn is_video_keyframe(data: &Bytes) -> bool {
    if data.len() < 2 {
        return false;
    }

    let codec_id = data[0] & 0x0f;
    let frame_type = data[0] >> 4;

    (codec_id == VIDEO_CODEC_H264 || codec_id == VIDEO_CODEC_H265)
        && frame_type == 1
        && data[1] == 1
}

pub fn video_codec_id(data: &Bytes) -> Option<u8> {
    data.first().map(|byte| byte & 0x0f)
}

/// Parses a video sequence header payload into a descriptor.  For H264 the
/// embedded AVCDecoderConfigurationRecord is walked down to the first SPS to
/// pull out the coded dimensions; for H265 only the codec identity is
/// reported (dimensions arrive via stream metadata).
pub fn parse_video_descriptor(data: &Bytes) -> Option<VideoDescriptor> {
    let codec_id = video_codec_id(data)?;

    let mut descriptor = VideoDescriptor {
        codec_id,
        codec_name: video_codec_name(codec_id),
        ..VideoDescriptor::default()
    };

    if codec_id == VIDEO_CODEC_H264 && data.len() > 5 {
        if let Some(avc) = parse_avc_config(&data[5..]) {
            descriptor.width = avc.width;
            descriptor.height = avc.height;
            descriptor.profile = avc.profile;
            descriptor.level = avc.level;
        }
    }

    Some(descriptor)
}

#[derive(Debug, Clone, PartialEq)]
pub struct AvcConfig {
    pub profile: u8,
    pub level: f32,
    pub width: u32,
    pub height: u32,
}

/// Walks an AVCDecoderConfigurationRecord (the bytes following the five byte
/// FLV video tag header of a sequence header packet) down to its first SPS.
pub fn parse_avc_config(record: &[u8]) -> Option<AvcConfig> {
    if record.len() < 8 || record[0] != 1 {
        return None;
    }

    let profile = record[1];
    let level = record[3] as f32 / 10.0;

    let sps_count = record[5] & 0x1f;
    if sps_count == 0 {
        return None;
    }

    let sps_length = ((record[6] as usize) << 8) | record[7] as usize;
    if record.len() < 8 + sps_length {
        return None;
    }

    let sps = &record[8..8 + sps_length];
    let (width, height) = parse_sps_dimensions(sps)?;

    Some(AvcConfig {
        profile,
        level,
        width,
        height,
    })
}

/// Decodes the parts of an H264 sequence parameter set needed to recover the
/// coded picture dimensions.
fn parse_sps_dimensions(sps: &[u8]) -> Option<(u32, u32)> {
    // NAL header byte, then profile/constraint/level
    if sps.len() < 4 || sps[0] & 0x1f != 7 {
        return None;
    }

    let profile_idc = sps[1];
    let mut reader = BitReader::new(&sps[4..]);

    let _seq_parameter_set_id = reader.read_exp_golomb()?;

    if matches!(
        profile_idc,
        100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128 | 138 | 139 | 134
    ) {
        let chroma_format_idc = reader.read_exp_golomb()?;
        if chroma_format_idc == 3 {
            let _separate_colour_plane_flag = reader.read_bit()?;
        }

        let _bit_depth_luma_minus8 = reader.read_exp_golomb()?;
        let _bit_depth_chroma_minus8 = reader.read_exp_golomb()?;
        let _qpprime_y_zero_transform_bypass_flag = reader.read_bit()?;

        let seq_scaling_matrix_present_flag = reader.read_bit()?;
        if seq_scaling_matrix_present_flag == 1 {
            let list_count = if chroma_format_idc == 3 { 12 } else { 8 };
            for index in 0..list_count {
                let seq_scaling_list_present_flag = reader.read_bit()?;
                if seq_scaling_list_present_flag == 1 {
                    let size = if index < 6 { 16 } else { 64 };
                    reader.skip_scaling_list(size)?;
                }
            }
        }
    }

    let _log2_max_frame_num_minus4 = reader.read_exp_golomb()?;

    let pic_order_cnt_type = reader.read_exp_golomb()?;
    if pic_order_cnt_type == 0 {
        let _log2_max_pic_order_cnt_lsb_minus4 = reader.read_exp_golomb()?;
    } else if pic_order_cnt_type == 1 {
        let _delta_pic_order_always_zero_flag = reader.read_bit()?;
        let _offset_for_non_ref_pic = reader.read_signed_exp_golomb()?;
        let _offset_for_top_to_bottom_field = reader.read_signed_exp_golomb()?;
        let num_ref_frames_in_pic_order_cnt_cycle = reader.read_exp_golomb()?;
        for _ in 0..num_ref_frames_in_pic_order_cnt_cycle {
            let _offset_for_ref_frame = reader.read_signed_exp_golomb()?;
        }
    }

    let _max_num_ref_frames = reader.read_exp_golomb()?;
    let _gaps_in_frame_num_value_allowed_flag = reader.read_bit()?;

    let pic_width_in_mbs_minus1 = reader.read_exp_golomb()?;
    let pic_height_in_map_units_minus1 = reader.read_exp_golomb()?;

    let frame_mbs_only_flag = reader.read_bit()?;
    if frame_mbs_only_flag == 0 {
        let _mb_adaptive_frame_field_flag = reader.read_bit()?;
    }

    let _direct_8x8_inference_flag = reader.read_bit()?;

    let mut crop_left = 0;
    let mut crop_right = 0;
    let mut crop_top = 0;
    let mut crop_bottom = 0;

    let frame_cropping_flag = reader.read_bit()?;
    if frame_cropping_flag == 1 {
        crop_left = reader.read_exp_golomb()?;
        crop_right = reader.read_exp_golomb()?;
        crop_top = reader.read_exp_golomb()?;
        crop_bottom = reader.read_exp_golomb()?;
    }

    let width = (pic_width_in_mbs_minus1 + 1) * 16 - crop_left * 2 - crop_right * 2;
    let height =
        (2 - frame_mbs_only_flag) * (pic_height_in_map_units_minus1 + 1) * 16
            - crop_top * 2
            - crop_bottom * 2;

    Some((width, height))
}

fn audio_codec_name(codec_id: u8) -> String {
    AUDIO_CODEC_NAMES
        .get(codec_id as usize)
        .copied()
        .unwrap_or("")
        .to_string()
}

fn video_codec_name(codec_id: u8) -> String {
    VIDEO_CODEC_NAMES
        .get(codec_id as usize)
        .copied()
        .unwrap_or("")
        .to_string()
}

/// Big-endian bit reader used for the exp-Golomb coded fields of an SPS
struct BitReader<'a> {
    data: &'a [u8],
    bit_position: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        BitReader {
            data,
            bit_position: 0,
        }
    }

    fn read_bit(&mut self) -> Option<u32> {
        let byte = *self.data.get(self.bit_position / 8)?;
        let bit = (byte >> (7 - (self.bit_position % 8))) & 1;
        self.bit_position += 1;
        Some(bit as u32)
    }

    fn read_bits(&mut self, count: u32) -> Option<u32> {
        let mut value = 0;
        for _ in 0..count {
            value = (value << 1) | self.read_bit()?;
        }

        Some(value)
    }

    fn read_exp_golomb(&mut self) -> Option<u32> {
        let mut leading_zeroes = 0;
        while self.read_bit()? == 0 {
            leading_zeroes += 1;
            if leading_zeroes > 31 {
                return None;
            }
        }

        if leading_zeroes == 0 {
            return Some(0);
        }

        let suffix = self.read_bits(leading_zeroes)?;
        Some((1 << leading_zeroes) - 1 + suffix)
    }

    fn read_signed_exp_golomb(&mut self) -> Option<i32> {
        let value = self.read_exp_golomb()?;
        let signed = if value % 2 == 0 {
            -((value / 2) as i32)
        } else {
            ((value + 1) / 2) as i32
        };

        Some(signed)
    }

    fn skip_scaling_list(&mut self, size: u32) -> Option<()> {
        let mut last_scale: i32 = 8;
        let mut next_scale: i32 = 8;

        for _ in 0..size {
            if next_scale != 0 {
                let delta_scale = self.read_signed_exp_golomb()?;
                next_scale = (last_scale + delta_scale + 256) % 256;
            }

            if next_scale != 0 {
                last_scale = next_scale;
            }
        }

        Some(())
    }
}
