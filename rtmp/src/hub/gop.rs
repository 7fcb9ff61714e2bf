use crate::time::RtmpTimestamp;
use bytes::Bytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

/// A single cached media payload, exactly as the publisher sent it
#[derive(Debug, Clone)]
pub struct MediaFrame {
    pub kind: MediaKind,
    pub timestamp: RtmpTimestamp,
    pub data: Bytes,
}

/// Holds every frame since the most recent keyframe so late joining
/// subscribers can start decoding immediately instead of waiting for the next
/// keyframe to come around.
///
/// Sequence headers are deliberately *not* kept here; they are cached
/// separately and always delivered ahead of the group.
#[derive(Debug, Default)]
pub struct GopCache {
    frames: Vec<MediaFrame>,
}

impl GopCache {
    pub fn new() -> GopCache {
        GopCache { frames: Vec::new() }
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn append(&mut self, frame: MediaFrame) {
        self.frames.push(frame);
    }

    pub fn frames(&self) -> &[MediaFrame] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyframe_reset_keeps_only_frames_after_it() {
        let mut cache = GopCache::new();

        cache.append(MediaFrame {
            kind: MediaKind::Video,
            timestamp: RtmpTimestamp::new(0),
            data: Bytes::from(vec![1_u8]),
        });
        cache.append(MediaFrame {
            kind: MediaKind::Audio,
            timestamp: RtmpTimestamp::new(10),
            data: Bytes::from(vec![2_u8]),
        });

        assert_eq!(cache.len(), 2);

        cache.clear();
        assert!(cache.is_empty());

        cache.append(MediaFrame {
            kind: MediaKind::Video,
            timestamp: RtmpTimestamp::new(20),
            data: Bytes::from(vec![3_u8]),
        });

        assert_eq!(cache.frames().len(), 1);
        assert_eq!(cache.frames()[0].timestamp, RtmpTimestamp::new(20));
    }
}
