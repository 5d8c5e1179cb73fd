//! FLV tag body classification
//!
//! RTMP audio and video messages carry FLV tag bodies without the tag
//! header. The distributor only needs to know whether a body is a codec
//! sequence header, a key frame, or an ordinary frame; nothing past the
//! first two bytes is inspected.
//!
//! Legacy video:
//! ```text
//! +-----------+---------+-----------------+
//! | FrameType | CodecID | AVCPacketType   | ...
//! | (4 bits)  | (4 bits)| (8, AVC/HEVC)   |
//! +-----------+---------+-----------------+
//! ```
//!
//! Enhanced video (top bit set):
//! ```text
//! +---+-----------+------------+--------+
//! | 1 | FrameType | PacketType | FourCC | ...
//! |   | (3 bits)  | (4 bits)   | (32)   |
//! +---+-----------+------------+--------+
//! ```
//!
//! Audio: SoundFormat in the high nibble. AAC (10) carries an
//! AACPacketType byte; format 9 marks an enhanced header whose low nibble
//! is the packet type.

/// Message type for a cached or forwarded media payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

/// Video frame type (upper nibble of the first byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFrameType {
    /// Keyframe (for AVC, a seekable frame)
    Keyframe = 1,
    /// Inter frame (for AVC, a non-seekable frame)
    InterFrame = 2,
    /// Disposable inter frame (H.263 only)
    DisposableInterFrame = 3,
    /// Generated keyframe (reserved for server use)
    GeneratedKeyframe = 4,
    /// Video info/command frame
    VideoInfoFrame = 5,
}

impl VideoFrameType {
    fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            1 => Some(VideoFrameType::Keyframe),
            2 => Some(VideoFrameType::InterFrame),
            3 => Some(VideoFrameType::DisposableInterFrame),
            4 => Some(VideoFrameType::GeneratedKeyframe),
            5 => Some(VideoFrameType::VideoInfoFrame),
            _ => None,
        }
    }

    pub fn is_keyframe(&self) -> bool {
        matches!(self, VideoFrameType::Keyframe | VideoFrameType::GeneratedKeyframe)
    }
}

// Legacy codec ids with a packet type byte after the first byte
const CODEC_AVC: u8 = 7;
const CODEC_HEVC: u8 = 12;
const CODEC_AV1: u8 = 13;

const SOUND_FORMAT_EX_HEADER: u8 = 9;
const SOUND_FORMAT_AAC: u8 = 10;

const ENHANCED_FLAG: u8 = 0x80;
const PACKET_TYPE_SEQUENCE_START: u8 = 0;

/// What the distributor needs to know about one payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaFrame {
    pub kind: MediaKind,
    /// Codec configuration (AVC/HEVC decoder record, AudioSpecificConfig, ...)
    pub sequence_header: bool,
    /// Random access point; always false for audio
    pub key_frame: bool,
}

impl MediaFrame {
    /// Ordinary frames may be dropped for a congested subscriber
    pub fn is_skippable(&self) -> bool {
        !self.sequence_header && !self.key_frame
    }

    pub fn classify(kind: MediaKind, data: &[u8]) -> Self {
        match kind {
            MediaKind::Audio => classify_audio(data),
            MediaKind::Video => classify_video(data),
        }
    }
}

pub fn classify_video(data: &[u8]) -> MediaFrame {
    let mut frame = MediaFrame {
        kind: MediaKind::Video,
        sequence_header: false,
        key_frame: false,
    };
    let Some(&first) = data.first() else {
        return frame;
    };

    if first & ENHANCED_FLAG != 0 {
        let frame_type = VideoFrameType::from_bits((first >> 4) & 0x07);
        frame.sequence_header = first & 0x0F == PACKET_TYPE_SEQUENCE_START;
        frame.key_frame = frame_type.map(|t| t.is_keyframe()).unwrap_or(false);
        return frame;
    }

    let frame_type = VideoFrameType::from_bits(first >> 4);
    let codec = first & 0x0F;
    frame.key_frame = frame_type.map(|t| t.is_keyframe()).unwrap_or(false);
    frame.sequence_header = matches!(codec, CODEC_AVC | CODEC_HEVC | CODEC_AV1)
        && data.get(1) == Some(&PACKET_TYPE_SEQUENCE_START);
    frame
}

pub fn classify_audio(data: &[u8]) -> MediaFrame {
    let sequence_header = match data.first() {
        Some(&first) => match first >> 4 {
            SOUND_FORMAT_AAC => data.get(1) == Some(&PACKET_TYPE_SEQUENCE_START),
            SOUND_FORMAT_EX_HEADER => first & 0x0F == PACKET_TYPE_SEQUENCE_START,
            _ => false,
        },
        None => false,
    };
    MediaFrame {
        kind: MediaKind::Audio,
        sequence_header,
        key_frame: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_avc() {
        let header = classify_video(&[0x17, 0x00, 0x00, 0x00, 0x00]);
        assert!(header.sequence_header);
        assert!(header.key_frame);
        assert!(!header.is_skippable());

        let key = classify_video(&[0x17, 0x01, 0x00, 0x00, 0x00]);
        assert!(!key.sequence_header);
        assert!(key.key_frame);

        let inter = classify_video(&[0x27, 0x01, 0x00, 0x00, 0x00]);
        assert!(inter.is_skippable());
    }

    #[test]
    fn test_hevc_legacy() {
        assert!(classify_video(&[0x1C, 0x00]).sequence_header);
        assert!(!classify_video(&[0x2C, 0x01]).key_frame);
    }

    #[test]
    fn test_enhanced_video() {
        // ex header, key frame, SequenceStart, 'hvc1'
        let header = classify_video(&[0x90, b'h', b'v', b'c', b'1']);
        assert!(header.sequence_header);
        assert!(header.key_frame);

        // ex header, inter frame, CodedFramesX
        let inter = classify_video(&[0xA3, b'a', b'v', b'0', b'1']);
        assert!(!inter.sequence_header);
        assert!(!inter.key_frame);
    }

    #[test]
    fn test_audio() {
        assert!(classify_audio(&[0xAF, 0x00, 0x12, 0x10]).sequence_header);
        assert!(classify_audio(&[0xAF, 0x01, 0x21]).is_skippable());
        // MP3 has no configuration record
        assert!(!classify_audio(&[0x2F, 0x00]).sequence_header);
        // Enhanced audio SequenceStart for 'Opus'
        assert!(classify_audio(&[0x90, b'O', b'p', b'u', b's']).sequence_header);
        assert!(!classify_audio(&[0x91, b'O', b'p', b'u', b's']).sequence_header);
    }

    #[test]
    fn test_empty_payloads() {
        assert!(classify_video(&[]).is_skippable());
        assert!(MediaFrame::classify(MediaKind::Audio, &[]).is_skippable());
    }
}
