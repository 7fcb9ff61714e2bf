use crate::time::RtmpTimestamp;

#[derive(PartialEq, Debug)]
pub enum ChunkHeaderFormat {
    Full,                            // Format 0
    TimeDeltaWithoutMessageStreamId, // Format 1
    TimeDeltaOnly,                   // Format 2
    Empty,                           // Format 3
}

#[derive(Debug)]
pub struct ChunkHeader {
    pub chunk_stream_id: u32,
    pub timestamp: RtmpTimestamp,
    /// The raw (uncapped) value the 3 byte timestamp field of this chunk is
    /// carrying: an absolute time for format 0, a delta for formats 1 and 2,
    /// and the inherited value for format 3.  Values at or above 0xFFFFFF
    /// spill into the extended timestamp field.
    pub timestamp_field: u32,
    /// The time delta this chunk represents relative to the previous message
    /// on the chunk stream.  Zero for format 0 chunks.  Only meaningful on the
    /// serialization side, where format negotiation compares deltas.
    pub timestamp_delta: u32,
    pub message_length: u32,
    pub message_type_id: u8,
    pub message_stream_id: u32,
    pub can_be_dropped: bool,
}

impl ChunkHeader {
    pub fn new() -> ChunkHeader {
        ChunkHeader {
            chunk_stream_id: 0,
            timestamp: RtmpTimestamp::new(0),
            timestamp_field: 0,
            timestamp_delta: 0,
            message_length: 0,
            message_type_id: 0,
            message_stream_id: 0,
            can_be_dropped: false,
        }
    }
}
