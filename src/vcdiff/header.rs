// VCDIFF file header and per-window header parsing (RFC 3284, Sections 4.1
// and 4.2).

use std::io::{self, Read};

use bitflags::bitflags;

use super::decoder::DecodeError;
use super::varint;

// ---------------------------------------------------------------------------
// VCDIFF magic and version
// ---------------------------------------------------------------------------

/// 'V' | 0x80, 'C' | 0x80, 'D' | 0x80, version 0.
pub const VCDIFF_MAGIC: [u8; 4] = [0xD6, 0xC3, 0xC4, 0x00];

// ---------------------------------------------------------------------------
// Indicator flags
// ---------------------------------------------------------------------------

bitflags! {
    /// File header indicator (`Hdr_Indicator`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct HeaderIndicator: u8 {
        const SECONDARY = 1 << 0;
        const CODETABLE = 1 << 1;
        const APPHEADER = 1 << 2;
    }
}

bitflags! {
    /// Per-window indicator (`Win_Indicator`).
    ///
    /// `ADLER32` is the xdelta3 extension announcing a 4-byte checksum
    /// after the section lengths.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WindowIndicator: u8 {
        const SOURCE = 1 << 0;
        const TARGET = 1 << 1;
        const ADLER32 = 1 << 2;
    }
}

bitflags! {
    /// Per-window delta indicator (`Delta_Indicator`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DeltaIndicator: u8 {
        const DATACOMP = 1 << 0;
        const INSTCOMP = 1 << 1;
        const ADDRCOMP = 1 << 2;
    }
}

// ---------------------------------------------------------------------------
// Patch reading helpers
// ---------------------------------------------------------------------------

/// `read_exact` where end-of-stream means a truncated patch.
pub(crate) fn read_exact<R: Read>(
    r: &mut R,
    buf: &mut [u8],
    context: &'static str,
) -> Result<(), DecodeError> {
    r.read_exact(buf).map_err(|e| truncated_or_io(e, context))
}

pub(crate) fn read_byte<R: Read>(r: &mut R, context: &'static str) -> Result<u8, DecodeError> {
    let mut buf = [0u8; 1];
    read_exact(r, &mut buf, context)?;
    Ok(buf[0])
}

pub(crate) fn read_varint<R: Read>(r: &mut R, context: &'static str) -> Result<u64, DecodeError> {
    varint::stream_read_u64(r).map_err(|e| truncated_or_io(e, context))
}

/// Read exactly `len` bytes into `buf` (replacing its contents).
///
/// Reads through `take` so a hostile length cannot force a large
/// allocation before the data is actually present.
pub(crate) fn read_section<R: Read>(
    r: &mut R,
    len: u64,
    buf: &mut Vec<u8>,
    context: &'static str,
) -> Result<(), DecodeError> {
    buf.clear();
    let got = r
        .by_ref()
        .take(len)
        .read_to_end(buf)
        .map_err(|e| truncated_or_io(e, context))?;
    if (got as u64) < len {
        return Err(DecodeError::Truncated { context });
    }
    Ok(())
}

fn truncated_or_io(e: io::Error, context: &'static str) -> DecodeError {
    match e.kind() {
        io::ErrorKind::UnexpectedEof => DecodeError::Truncated { context },
        io::ErrorKind::InvalidData => DecodeError::InvalidInput(format!("{context}: {e}")),
        _ => DecodeError::Io(e),
    }
}

// ---------------------------------------------------------------------------
// File header
// ---------------------------------------------------------------------------

/// Custom code table payload carried in the file header.
///
/// `delta` is itself a VCDIFF patch against the default table's
/// serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeTableHeader {
    pub near_size: u8,
    pub same_size: u8,
    pub delta: Vec<u8>,
}

/// Parsed VCDIFF file header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileHeader {
    pub indicator: HeaderIndicator,
    pub code_table: Option<CodeTableHeader>,
    /// Length of the skipped application header, if one was present.
    pub app_header_len: Option<u64>,
}

impl FileHeader {
    /// Decode a VCDIFF file header.
    pub fn decode<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
        let mut magic = [0u8; 4];
        read_exact(r, &mut magic, "file header")?;
        if magic[..3] != VCDIFF_MAGIC[..3] {
            return Err(DecodeError::InvalidMagic);
        }
        if magic[3] != VCDIFF_MAGIC[3] {
            return Err(DecodeError::UnsupportedVersion(magic[3]));
        }

        let raw = read_byte(r, "header indicator")?;
        if raw & HeaderIndicator::SECONDARY.bits() != 0 {
            return Err(DecodeError::Unsupported("secondary compression"));
        }
        let indicator =
            HeaderIndicator::from_bits(raw).ok_or(DecodeError::InvalidHeaderIndicator(raw))?;

        let code_table = if indicator.contains(HeaderIndicator::CODETABLE) {
            let total = read_varint(r, "code table length")?;
            let delta_len = total.checked_sub(2).ok_or_else(|| {
                DecodeError::InvalidInput(format!("code table length {total} is below 2"))
            })?;
            let near_size = read_byte(r, "code table near size")?;
            let same_size = read_byte(r, "code table same size")?;
            let mut delta = Vec::new();
            read_section(r, delta_len, &mut delta, "code table data")?;
            Some(CodeTableHeader {
                near_size,
                same_size,
                delta,
            })
        } else {
            None
        };

        let app_header_len = if indicator.contains(HeaderIndicator::APPHEADER) {
            let len = read_varint(r, "application header length")?;
            let skipped = io::copy(&mut r.by_ref().take(len), &mut io::sink())
                .map_err(|e| truncated_or_io(e, "application header"))?;
            if skipped < len {
                return Err(DecodeError::Truncated {
                    context: "application header",
                });
            }
            Some(len)
        } else {
            None
        };

        Ok(Self {
            indicator,
            code_table,
            app_header_len,
        })
    }
}

// ---------------------------------------------------------------------------
// Per-window header
// ---------------------------------------------------------------------------

/// Where a window's source segment comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceSelector {
    /// No source segment; COPY can only reference this window's output.
    None,
    /// Segment of the source stream.
    Source,
    /// Segment of the already-decoded target.
    Target,
}

/// Source segment declared by a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceSegment {
    pub len: u64,
    pub position: u64,
}

/// Parsed VCDIFF per-window header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowHeader {
    pub indicator: WindowIndicator,
    pub selector: SourceSelector,
    pub segment: Option<SourceSegment>,
    /// Length of the delta encoding. Redundant for decoding.
    pub delta_len: u64,
    pub target_len: u64,
    pub data_len: u64,
    pub inst_len: u64,
    pub addr_len: u64,
    pub adler32: Option<u32>,
}

impl WindowHeader {
    /// Decode a per-window header.
    ///
    /// Returns `None` on clean end-of-patch at the indicator byte.
    pub fn decode<R: Read>(r: &mut R) -> Result<Option<Self>, DecodeError> {
        let mut buf1 = [0u8; 1];
        match r.read_exact(&mut buf1) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(DecodeError::Io(e)),
        }
        let raw = buf1[0];
        let indicator = WindowIndicator::from_bits_retain(raw);

        let selector = match raw & !WindowIndicator::ADLER32.bits() {
            0 => SourceSelector::None,
            1 => SourceSelector::Source,
            2 => SourceSelector::Target,
            _ => return Err(DecodeError::InvalidWindowIndicator(raw)),
        };

        let segment = if selector == SourceSelector::None {
            None
        } else {
            let len = read_varint(r, "source segment length")?;
            let position = read_varint(r, "source segment position")?;
            Some(SourceSegment { len, position })
        };

        let delta_len = read_varint(r, "delta encoding length")?;
        let target_len = read_varint(r, "target window length")?;

        let delta_ind = DeltaIndicator::from_bits_retain(read_byte(r, "delta indicator")?);
        if !delta_ind.is_empty() {
            return Err(DecodeError::Unsupported("compressed delta sections"));
        }

        let data_len = read_varint(r, "data section length")?;
        let inst_len = read_varint(r, "instruction section length")?;
        let addr_len = read_varint(r, "address section length")?;

        let adler32 = if indicator.contains(WindowIndicator::ADLER32) {
            let mut cksum = [0u8; 4];
            read_exact(r, &mut cksum, "window checksum")?;
            Some(u32::from_be_bytes(cksum))
        } else {
            None
        };

        Ok(Some(Self {
            indicator,
            selector,
            segment,
            delta_len,
            target_len,
            data_len,
            inst_len,
            addr_len,
            adler32,
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
