mod chunk_header;
mod deserializer;
mod errors;
mod serializer;

pub use self::deserializer::ChunkDeserializer;
pub use self::errors::{ChunkDeserializationError, ChunkSerializationError};
pub use self::serializer::{ChunkSerializer, Packet};
