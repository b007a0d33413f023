// VCDIFF decoder: header parsing, window reconstruction, instruction
// execution.
//
// A decode session reads the file header once (possibly loading a custom
// code table through a nested decode), then decodes windows until the
// patch ends exactly where the next window indicator would be.  Each
// window's output is built in memory, because COPY instructions may
// reference bytes produced earlier in the same window, and then appended
// to the target.

use std::borrow::Cow;
use std::io::{self, Read};

use log::{debug, trace, warn};

use super::address_cache::{AddressCache, AddressCacheError};
use super::code_table::{CodeTable, InstructionType, InvalidInstructionType, TABLE_BYTES};
use super::header::{self, CodeTableHeader, FileHeader, SourceSegment, SourceSelector, WindowHeader};
use super::varint;
use crate::stream::{NoSource, SourceStream, TargetStream};

/// Default upper bound on a single window's target length (64 MiB).
pub const DEFAULT_MAX_TARGET_WINDOW: u64 = 1 << 26;

// ---------------------------------------------------------------------------
// Decoder error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("truncated patch: unexpected end of data in {context}")]
    Truncated { context: &'static str },
    #[error("not a valid vcdiff file")]
    InvalidMagic,
    #[error("unsupported vcdiff version {0:#04X}")]
    UnsupportedVersion(u8),
    #[error("invalid header indicator {0:#04X}: bits 3-7 not all zero")]
    InvalidHeaderIndicator(u8),
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
    #[error("compressed code table was incorrect size: {0} bytes")]
    InvalidCodeTableSize(usize),
    #[error("invalid window indicator {0:#04X}")]
    InvalidWindowIndicator(u8),
    #[error("source stream required")]
    SourceRequired,
    #[error(transparent)]
    InvalidInstructionType(#[from] InvalidInstructionType),
    #[error("invalid COPY address mode {0}")]
    InvalidAddressMode(u8),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("checksum mismatch: expected {expected:#010X}, got {actual:#010X}")]
    ChecksumMismatch { expected: u32, actual: u32 },
    #[error("window {index} (patch offset {offset}): {source}")]
    Window {
        index: u64,
        offset: u64,
        source: Box<DecodeError>,
    },
}

impl DecodeError {
    /// The underlying error, without window context.
    pub fn root(&self) -> &DecodeError {
        match self {
            Self::Window { source, .. } => source.root(),
            other => other,
        }
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Decoder configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Verify the per-window Adler-32 checksum when the patch carries one.
    pub verify_checksum: bool,
    /// Reject windows declaring a larger target length.
    pub max_target_window: u64,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            verify_checksum: true,
            max_target_window: DEFAULT_MAX_TARGET_WINDOW,
        }
    }
}

// ---------------------------------------------------------------------------
// Patch reader with offset tracking
// ---------------------------------------------------------------------------

struct CountingReader<R> {
    inner: R,
    offset: u64,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.offset += n as u64;
        Ok(n)
    }
}

// ---------------------------------------------------------------------------
// Instruction execution
// ---------------------------------------------------------------------------

/// Borrowed DATA/INST sections of one window.
#[derive(Clone, Copy)]
pub struct WindowSections<'a> {
    pub data: &'a [u8],
    pub inst: &'a [u8],
}

/// Execute a window's instructions into `target`, which must be exactly
/// the window's target length.
///
/// `source` is the materialized source segment (possibly shorter than
/// the declared `source_len`, which still anchors the address space).
/// The cache must already hold this window's address section.
pub fn execute_window(
    table: &CodeTable,
    cache: &mut AddressCache,
    sections: WindowSections<'_>,
    source: &[u8],
    source_len: u64,
    target: &mut [u8],
) -> Result<(), DecodeError> {
    let WindowSections { data, inst } = sections;
    let mut data_pos = 0usize;
    let mut inst_pos = 0usize;
    let mut pos = 0usize;

    while inst_pos < inst.len() {
        let opcode = inst[inst_pos];
        inst_pos += 1;

        for instruction in *table.entry(opcode) {
            let size = if instruction.size_follows() {
                let (size, consumed) = varint::read_usize(&inst[inst_pos..]).map_err(|e| {
                    DecodeError::InvalidInput(format!("instruction size at opcode {opcode}: {e}"))
                })?;
                inst_pos += consumed;
                size
            } else {
                instruction.size as usize
            };

            if instruction.itype == InstructionType::Noop {
                continue;
            }

            let end = pos
                .checked_add(size)
                .filter(|&end| end <= target.len())
                .ok_or_else(|| {
                    DecodeError::InvalidInput(format!(
                        "target window overflow: {size} bytes at {pos} of {}",
                        target.len()
                    ))
                })?;

            match instruction.itype {
                InstructionType::Noop => {}

                InstructionType::Add => {
                    let bytes = data
                        .get(data_pos..data_pos + size)
                        .ok_or_else(|| DecodeError::InvalidInput("data section underflow (ADD)".into()))?;
                    target[pos..end].copy_from_slice(bytes);
                    data_pos += size;
                }

                InstructionType::Run => {
                    let byte = *data
                        .get(data_pos)
                        .ok_or_else(|| DecodeError::InvalidInput("data section underflow (RUN)".into()))?;
                    data_pos += 1;
                    target[pos..end].fill(byte);
                }

                InstructionType::Copy => {
                    let here = source_len.checked_add(pos as u64).ok_or_else(|| {
                        DecodeError::InvalidInput("address space overflow".into())
                    })?;
                    let addr = cache
                        .decode_address(here, instruction.mode)
                        .map_err(|e| match e {
                            AddressCacheError::InvalidMode(mode) => {
                                DecodeError::InvalidAddressMode(mode)
                            }
                            other => DecodeError::InvalidInput(format!("COPY address: {other}")),
                        })?;

                    if addr < source_len {
                        let start = addr as usize;
                        let bytes = start
                            .checked_add(size)
                            .and_then(|stop| source.get(start..stop))
                            .ok_or_else(|| {
                                DecodeError::InvalidInput(format!(
                                    "COPY of {size} bytes at {addr} runs past the {} available source bytes",
                                    source.len()
                                ))
                            })?;
                        target[pos..end].copy_from_slice(bytes);
                    } else {
                        // addr < here, so this lies before `pos`.
                        let local = (addr - source_len) as usize;
                        if local + size <= pos {
                            target.copy_within(local..local + size, pos);
                        } else {
                            // Overlapping run: later bytes repeat earlier output.
                            for i in 0..size {
                                target[pos + i] = target[local + i];
                            }
                        }
                    }
                }
            }

            pos = end;
        }
    }

    if pos != target.len() {
        return Err(DecodeError::InvalidInput(format!(
            "target window underflow: produced {pos} of {} bytes",
            target.len()
        )));
    }
    Ok(())
}

/// Fill `buf` with the declared source segment, clamped to `available`.
///
/// Returns the clamped length.
fn load_segment<F>(
    segment: SourceSegment,
    available: u64,
    buf: &mut Vec<u8>,
    mut read_at: F,
) -> Result<usize, DecodeError>
where
    F: FnMut(u64, &mut [u8]) -> io::Result<usize>,
{
    if segment.position > available {
        return Err(DecodeError::InvalidInput(format!(
            "source position {} beyond end of data ({available} bytes)",
            segment.position
        )));
    }
    let clamped = segment.len.min(available - segment.position);
    if clamped < segment.len {
        warn!(
            "source segment of {} bytes at {} clamped to {clamped} available bytes",
            segment.len, segment.position
        );
    }
    let len = usize::try_from(clamped)
        .map_err(|_| DecodeError::InvalidInput(format!("source segment too large: {clamped}")))?;

    buf.clear();
    buf.resize(len, 0);
    let mut filled = 0usize;
    while filled < len {
        let n = read_at(segment.position + filled as u64, &mut buf[filled..])?;
        if n == 0 {
            return Err(DecodeError::InvalidInput(format!(
                "source data ended after {filled} of {len} segment bytes"
            )));
        }
        filled += n;
    }
    Ok(len)
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// Decodes one VCDIFF patch from `patch`, reading COPY data from `source`
/// and the target itself, and appending the reconstruction to `target`.
///
/// One decoder serves one patch.  Section and window buffers are reused
/// across windows.
pub struct VcdiffDecoder<R, S, T> {
    patch: CountingReader<R>,
    source: Option<S>,
    target: T,
    options: DecodeOptions,
    header: Option<FileHeader>,
    code_table: Cow<'static, CodeTable>,
    cache: AddressCache,
    /// Set on decoders unpacking a custom code table.
    nested: bool,
    windows: u64,
    bytes_written: u64,
    data_buf: Vec<u8>,
    inst_buf: Vec<u8>,
    addr_buf: Vec<u8>,
    source_buf: Vec<u8>,
    target_buf: Vec<u8>,
}

impl<R: Read, S: SourceStream, T: TargetStream> VcdiffDecoder<R, S, T> {
    pub fn new(source: Option<S>, patch: R, target: T) -> Self {
        Self::with_options(source, patch, target, DecodeOptions::default())
    }

    pub fn with_options(source: Option<S>, patch: R, target: T, options: DecodeOptions) -> Self {
        Self {
            patch: CountingReader {
                inner: patch,
                offset: 0,
            },
            source,
            target,
            options,
            header: None,
            code_table: Cow::Borrowed(CodeTable::default_table()),
            cache: AddressCache::default(),
            nested: false,
            windows: 0,
            bytes_written: 0,
            data_buf: Vec::new(),
            inst_buf: Vec::new(),
            addr_buf: Vec::new(),
            source_buf: Vec::new(),
            target_buf: Vec::new(),
        }
    }

    /// Decode the whole patch.
    pub fn decode(&mut self) -> Result<(), DecodeError> {
        self.read_header()?;
        while self.decode_window()? {}
        self.target.flush()?;
        debug!(
            "decoded {} windows, {} bytes",
            self.windows, self.bytes_written
        );
        Ok(())
    }

    /// Read the file header, loading a custom code table if present.
    /// Subsequent calls return the already-parsed header.
    pub fn read_header(&mut self) -> Result<&FileHeader, DecodeError> {
        if self.header.is_none() {
            let hdr = FileHeader::decode(&mut self.patch)?;
            debug!(
                "vcdiff header: indicator={:?} custom_table={} app_header={:?}",
                hdr.indicator,
                hdr.code_table.is_some(),
                hdr.app_header_len
            );
            if let Some(table) = &hdr.code_table {
                self.load_code_table(table)?;
            }
            self.header = Some(hdr);
        }
        Ok(self.header.get_or_insert_default())
    }

    fn load_code_table(&mut self, table: &CodeTableHeader) -> Result<(), DecodeError> {
        if self.nested {
            return Err(DecodeError::Unsupported(
                "custom code table inside a code table delta",
            ));
        }

        let default_bytes = CodeTable::default_table().to_bytes();
        let mut decompressed = Vec::with_capacity(TABLE_BYTES);
        {
            let mut inner = VcdiffDecoder::with_options(
                Some(&default_bytes[..]),
                table.delta.as_slice(),
                &mut decompressed,
                DecodeOptions {
                    max_target_window: TABLE_BYTES as u64,
                    ..self.options.clone()
                },
            );
            inner.nested = true;
            inner.decode()?;
        }

        let bytes: &[u8; TABLE_BYTES] = decompressed
            .as_slice()
            .try_into()
            .map_err(|_| DecodeError::InvalidCodeTableSize(decompressed.len()))?;
        self.code_table = Cow::Owned(CodeTable::from_bytes(bytes)?);
        self.cache = AddressCache::new(table.near_size.into(), table.same_size.into());
        debug!(
            "loaded custom code table: near={} same={}",
            table.near_size, table.same_size
        );
        Ok(())
    }

    /// Decode the next window.
    ///
    /// Returns `Ok(false)` at the clean end of the patch.
    pub fn decode_window(&mut self) -> Result<bool, DecodeError> {
        self.read_header()?;
        let index = self.windows;
        let offset = self.patch.offset;
        self.decode_window_inner()
            .map_err(|e| DecodeError::Window {
                index,
                offset,
                source: Box::new(e),
            })
    }

    fn decode_window_inner(&mut self) -> Result<bool, DecodeError> {
        let Some(hdr) = WindowHeader::decode(&mut self.patch)? else {
            return Ok(false);
        };
        trace!(
            "window {}: indicator={:?} segment={:?} target_len={} sections=({}, {}, {})",
            self.windows,
            hdr.indicator,
            hdr.segment,
            hdr.target_len,
            hdr.data_len,
            hdr.inst_len,
            hdr.addr_len
        );

        if hdr.target_len > self.options.max_target_window {
            return Err(DecodeError::InvalidInput(format!(
                "target window of {} bytes exceeds limit of {}",
                hdr.target_len, self.options.max_target_window
            )));
        }

        let source_len = self.load_source(&hdr)?;

        header::read_section(&mut self.patch, hdr.data_len, &mut self.data_buf, "data section")?;
        header::read_section(
            &mut self.patch,
            hdr.inst_len,
            &mut self.inst_buf,
            "instruction section",
        )?;
        header::read_section(&mut self.patch, hdr.addr_len, &mut self.addr_buf, "address section")?;

        self.cache.reset(&self.addr_buf);

        // Bounded by `max_target_window`.
        self.target_buf.clear();
        self.target_buf.resize(hdr.target_len as usize, 0);

        execute_window(
            &self.code_table,
            &mut self.cache,
            WindowSections {
                data: &self.data_buf,
                inst: &self.inst_buf,
            },
            &self.source_buf,
            source_len,
            &mut self.target_buf,
        )?;

        if let Some(expected) = hdr.adler32
            && self.options.verify_checksum
        {
            let actual = compute_adler32(&self.target_buf);
            if actual != expected {
                return Err(DecodeError::ChecksumMismatch { expected, actual });
            }
        }

        self.target.append(&self.target_buf)?;
        self.bytes_written += self.target_buf.len() as u64;
        self.windows += 1;

        Ok(true)
    }

    /// Materialize the window's source segment into `source_buf`.
    ///
    /// Returns the declared segment length, which anchors the address
    /// space even when fewer bytes were available.
    fn load_source(&mut self, hdr: &WindowHeader) -> Result<u64, DecodeError> {
        self.source_buf.clear();
        match (hdr.selector, hdr.segment) {
            (SourceSelector::Source, Some(segment)) => {
                let source = self.source.as_mut().ok_or(DecodeError::SourceRequired)?;
                let available = source.length()?;
                load_segment(segment, available, &mut self.source_buf, |offset, buf| {
                    source.read_at(offset, buf)
                })?;
                Ok(segment.len)
            }
            (SourceSelector::Target, Some(segment)) => {
                let target = &mut self.target;
                let available = target.position();
                load_segment(segment, available, &mut self.source_buf, |offset, buf| {
                    target.read_back(offset, buf)
                })?;
                Ok(segment.len)
            }
            // `WindowHeader::decode` reads a segment exactly when a source
            // is selected.
            _ => Ok(0),
        }
    }

    /// The parsed file header, once read.
    pub fn header(&self) -> Option<&FileHeader> {
        self.header.as_ref()
    }

    /// The code table in effect.
    pub fn code_table(&self) -> &CodeTable {
        &self.code_table
    }

    /// Number of windows decoded so far.
    pub fn windows_decoded(&self) -> u64 {
        self.windows
    }

    /// Number of target bytes written so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Patch bytes consumed so far.
    pub fn patch_offset(&self) -> u64 {
        self.patch.offset
    }
}

// ---------------------------------------------------------------------------
// Convenience entry points
// ---------------------------------------------------------------------------

/// Apply `patch` to `source`, appending the result to `target`.
pub fn decode<S, R, T>(source: Option<S>, patch: R, target: T) -> Result<(), DecodeError>
where
    S: SourceStream,
    R: Read,
    T: TargetStream,
{
    VcdiffDecoder::new(source, patch, target).decode()
}

/// Apply an in-memory patch to an in-memory source.
pub fn decode_memory(source: &[u8], patch: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut output = Vec::new();
    decode(Some(source), patch, &mut output)?;
    Ok(output)
}

/// Apply an in-memory patch that needs no source.
pub fn decode_memory_no_source(patch: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut output = Vec::new();
    decode(None::<NoSource>, patch, &mut output)?;
    Ok(output)
}

// ---------------------------------------------------------------------------
// Adler-32
// ---------------------------------------------------------------------------

pub(crate) fn compute_adler32(data: &[u8]) -> u32 {
    #[cfg(feature = "adler32")]
    {
        let mut hasher = simd_adler32::Adler32::new();
        hasher.write(data);
        hasher.finish()
    }
    #[cfg(not(feature = "adler32"))]
    {
        const MOD_ADLER: u32 = 65521;
        let mut a: u32 = 1;
        let mut b: u32 = 0;
        for &byte in data {
            a = (a + u32::from(byte)) % MOD_ADLER;
            b = (b + a) % MOD_ADLER;
        }
        (b << 16) | a
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
