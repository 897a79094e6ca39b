//! # Wire Formats
//!
//! Binary serialization shared with physical backends.
//!
//! The chunk codec defines the exact byte layout a backend's column or blob
//! serializer must reproduce for cross-version compatibility. The JSON forms
//! used by the archive directory format live with the types themselves; this
//! module only owns the binary wire shapes.

pub mod chunk_codec;

pub use chunk_codec::{
    CHUNK_CODEC_VERSION, decode_chunk, decode_index, encode_chunk, encode_index,
};
