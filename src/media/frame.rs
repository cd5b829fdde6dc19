//! Media frame types
//!
//! A [`MediaData`] is one encoded (or raw) audio or video frame as produced
//! by the capture/encode pipeline. The payload is a `bytes::Bytes`, so
//! handing the same frame to several receivers only bumps a reference count.

use bytes::{Bytes, BytesMut};

use super::h264::{AnnexBNalus, NaluType};

/// Media type of a frame, or the set of types a reader accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MediaType {
    /// Audio and video (readers) or a muxed payload (frames)
    #[default]
    Av,
    /// Video only
    Video,
    /// Audio only
    Audio,
}

impl MediaType {
    /// Whether a reader of `self` accepts a frame of type `frame`
    pub fn accepts(&self, frame: MediaType) -> bool {
        match self {
            MediaType::Av => true,
            other => *other == frame,
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, MediaType::Video)
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, MediaType::Audio)
    }
}

/// Codec carried by a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CodecId {
    #[default]
    Unknown,
    H264,
    H265,
    Aac,
    G711A,
    G711U,
    Pcm,
}

impl CodecId {
    pub fn is_video(&self) -> bool {
        matches!(self, CodecId::H264 | CodecId::H265)
    }
}

/// One media frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaData {
    /// Frame type
    pub media_type: MediaType,
    /// Codec of the payload
    pub codec_id: CodecId,
    /// Presentation timestamp (microseconds)
    pub pts: u64,
    /// Whether this is a keyframe (video only)
    pub key_frame: bool,
    /// Whether the payload is raw (not encoded)
    pub is_raw: bool,
    /// Frame payload
    pub data: Bytes,
}

impl MediaData {
    /// Create an encoded video frame
    pub fn video(pts: u64, data: Bytes, key_frame: bool) -> Self {
        Self {
            media_type: MediaType::Video,
            codec_id: CodecId::H264,
            pts,
            key_frame,
            is_raw: false,
            data,
        }
    }

    /// Create an encoded audio frame
    pub fn audio(pts: u64, data: Bytes) -> Self {
        Self {
            media_type: MediaType::Audio,
            codec_id: CodecId::Aac,
            pts,
            key_frame: false,
            is_raw: false,
            data,
        }
    }

    /// Create an H.264 frame from an Annex-B access unit
    ///
    /// The keyframe flag is derived from the NAL units: an access unit that
    /// contains an IDR slice is a keyframe.
    pub fn h264(pts: u64, data: Bytes) -> Self {
        let key_frame = AnnexBNalus::new(&data).any(|nalu| nalu.nalu_type() == Some(NaluType::Idr));
        Self::video(pts, data, key_frame)
    }

    /// Create a frame from a buffer obtained with `request_data_buffer`
    pub fn from_buffer(media_type: MediaType, codec_id: CodecId, pts: u64, buffer: BytesMut) -> Self {
        Self {
            media_type,
            codec_id,
            pts,
            key_frame: false,
            is_raw: false,
            data: buffer.freeze(),
        }
    }

    /// Mark the frame as a keyframe
    pub fn with_key_frame(mut self, key_frame: bool) -> Self {
        self.key_frame = key_frame;
        self
    }

    /// Mark the frame as raw
    pub fn with_raw(mut self, is_raw: bool) -> Self {
        self.is_raw = is_raw;
        self
    }

    /// Override the codec
    pub fn with_codec(mut self, codec_id: CodecId) -> Self {
        self.codec_id = codec_id;
        self
    }

    /// Whether this is a video keyframe
    pub fn is_video_key(&self) -> bool {
        self.media_type.is_video() && self.key_frame
    }

    /// Payload size in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_type_accepts() {
        assert!(MediaType::Av.accepts(MediaType::Video));
        assert!(MediaType::Av.accepts(MediaType::Audio));
        assert!(MediaType::Video.accepts(MediaType::Video));
        assert!(!MediaType::Video.accepts(MediaType::Audio));
        assert!(!MediaType::Audio.accepts(MediaType::Av));
    }

    #[test]
    fn test_h264_keyframe_detection() {
        let idr = Bytes::from_static(&[0, 0, 0, 1, 0x67, 0x42, 0, 0, 1, 0x68, 0xCE, 0, 0, 1, 0x65, 0x88]);
        let frame = MediaData::h264(0, idr);
        assert!(frame.is_video_key());

        let inter = Bytes::from_static(&[0, 0, 0, 1, 0x41, 0x9A]);
        let frame = MediaData::h264(33, inter);
        assert!(!frame.key_frame);
        assert_eq!(frame.codec_id, CodecId::H264);
    }

    #[test]
    fn test_from_buffer() {
        let mut buf = BytesMut::with_capacity(16);
        buf.extend_from_slice(b"payload");
        let frame = MediaData::from_buffer(MediaType::Audio, CodecId::Aac, 1000, buf);

        assert_eq!(frame.data.as_ref(), b"payload");
        assert_eq!(frame.size(), 7);
        assert!(!frame.is_video_key());
    }

    #[test]
    fn test_audio_is_never_key() {
        let frame = MediaData::audio(0, Bytes::from_static(&[0xFF, 0xF1])).with_key_frame(true);
        assert!(!frame.is_video_key());
    }
}
