// VCDIFF format implementation (RFC 3284), decode side.
//
// Reads patches produced by xdelta3, open-vcdiff and other RFC 3284
// encoders, including the xdelta3 per-window Adler-32 extension.
//
// # Modules
//
// - `varint`        - Variable-length integer decoding (base-128, big-endian)
// - `address_cache` - NEAR/SAME address cache for COPY instruction addresses
// - `code_table`    - Default RFC 3284 code table and custom table loading
// - `header`        - File header and per-window header parsing
// - `decoder`       - Instruction execution and window reconstruction

pub mod address_cache;
pub mod code_table;
pub mod decoder;
pub mod header;
pub mod varint;

pub use address_cache::AddressCache;
pub use code_table::{CodeTable, Instruction, InstructionType};
pub use decoder::{
    DecodeError, DecodeOptions, VcdiffDecoder, decode, decode_memory, decode_memory_no_source,
};
pub use header::{FileHeader, VCDIFF_MAGIC, WindowHeader};
