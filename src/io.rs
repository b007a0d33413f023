// File-level helper for applying a patch.
//
// `decode_file()` wires files on disk into the streaming decoder: the patch
// is read through a `BufReader`, the source is read at random offsets, and
// the target is opened read-write so VCD_TARGET windows can read back what
// earlier windows produced.

use std::fs::{File, OpenOptions};
use std::io::BufReader;
use std::path::Path;

use log::debug;

use crate::stream::{NoSource, SeekStream};
use crate::vcdiff::decoder::{DecodeError, DecodeOptions, VcdiffDecoder};

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Statistics returned by `decode_file()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeStats {
    /// Source file size in bytes (0 when decoding without a source).
    pub source_size: u64,
    /// Patch file size in bytes.
    pub patch_size: u64,
    /// Reconstructed output size in bytes.
    pub output_size: u64,
    /// Number of VCDIFF windows decoded.
    pub windows: u64,
}

const BUF_SIZE: usize = 64 * 1024; // 64 KiB

// ---------------------------------------------------------------------------
// decode_file
// ---------------------------------------------------------------------------

/// Apply the patch at `patch_path` to the file at `source_path`, writing
/// the reconstruction to `target_path`.
///
/// The target is created or truncated.  Pass `None` as the source for
/// patches that only use ADD, RUN and target copies.
pub fn decode_file(
    source_path: Option<&Path>,
    patch_path: &Path,
    target_path: &Path,
    options: DecodeOptions,
) -> Result<DecodeStats, DecodeError> {
    // Inputs are opened before the target is created or truncated.
    let source_file = source_path.map(File::open).transpose()?;
    let source_size = match &source_file {
        Some(file) => file.metadata()?.len(),
        None => 0,
    };

    let patch_file = File::open(patch_path)?;
    let patch_size = patch_file.metadata()?.len();
    let patch = BufReader::with_capacity(BUF_SIZE, patch_file);

    let target_file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(target_path)?;
    let target = SeekStream::new(target_file);

    let (windows, output_size) = match source_file {
        Some(file) => {
            let mut decoder =
                VcdiffDecoder::with_options(Some(SeekStream::new(file)), patch, target, options);
            decoder.decode()?;
            (decoder.windows_decoded(), decoder.bytes_written())
        }
        None => {
            let mut decoder = VcdiffDecoder::with_options(None::<NoSource>, patch, target, options);
            decoder.decode()?;
            (decoder.windows_decoded(), decoder.bytes_written())
        }
    };

    debug!(
        "{} -> {}: {windows} windows, {output_size} bytes",
        patch_path.display(),
        target_path.display()
    );

    Ok(DecodeStats {
        source_size,
        patch_size,
        output_size,
        windows,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vcdiff::header::VCDIFF_MAGIC;

    /// One window copying `len` source bytes from offset 0, then adding `tail`.
    fn copy_then_add_patch(len: u8, tail: &[u8]) -> Vec<u8> {
        let target_len = len + tail.len() as u8;
        let mut p = VCDIFF_MAGIC.to_vec();
        p.push(0); // header indicator
        p.push(0x01); // VCD_SOURCE
        p.extend_from_slice(&[len, 0]); // segment length, position
        let delta_len = 10 + tail.len() as u8;
        p.extend_from_slice(&[delta_len, target_len, 0, tail.len() as u8, 4, 1]);
        // COPY size-follows SELF (19), ADD size-follows (1).
        p.extend_from_slice(tail);
        p.extend_from_slice(&[19, len, 1, tail.len() as u8]);
        p.push(0); // address 0
        p
    }

    #[test]
    fn decode_file_with_source() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.bin");
        let patch = dir.path().join("patch.vcdiff");
        let target = dir.path().join("target.bin");
        std::fs::write(&source, b"hello world").unwrap();
        let patch_bytes = copy_then_add_patch(6, b"there");
        std::fs::write(&patch, &patch_bytes).unwrap();

        let stats = decode_file(Some(&source), &patch, &target, DecodeOptions::default()).unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"hello there");
        assert_eq!(
            stats,
            DecodeStats {
                source_size: 11,
                patch_size: patch_bytes.len() as u64,
                output_size: 11,
                windows: 1,
            }
        );
    }

    #[test]
    fn decode_file_without_source() {
        let dir = tempfile::tempdir().unwrap();
        let patch = dir.path().join("patch.vcdiff");
        let target = dir.path().join("target.bin");
        let mut p = VCDIFF_MAGIC.to_vec();
        // One window: RUN of 5 'z'.
        p.extend_from_slice(&[0, 0x00, 8, 5, 0, 1, 2, 0, b'z', 0, 5]);
        std::fs::write(&patch, &p).unwrap();

        let stats = decode_file(None, &patch, &target, DecodeOptions::default()).unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"zzzzz");
        assert_eq!(stats.windows, 1);
        assert_eq!(stats.source_size, 0);
    }

    #[test]
    fn decode_file_truncates_existing_target() {
        let dir = tempfile::tempdir().unwrap();
        let patch = dir.path().join("patch.vcdiff");
        let target = dir.path().join("target.bin");
        std::fs::write(&target, b"previous contents that are longer").unwrap();
        let mut p = VCDIFF_MAGIC.to_vec();
        p.push(0);
        std::fs::write(&patch, &p).unwrap();

        let stats = decode_file(None, &patch, &target, DecodeOptions::default()).unwrap();
        assert_eq!(stats.output_size, 0);
        assert!(std::fs::read(&target).unwrap().is_empty());
    }

    #[test]
    fn decode_file_missing_patch_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = decode_file(
            None,
            &dir.path().join("absent.vcdiff"),
            &dir.path().join("out.bin"),
            DecodeOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, DecodeError::Io(_)));
    }

    #[test]
    fn missing_source_leaves_existing_target_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let patch = dir.path().join("patch.vcdiff");
        let target = dir.path().join("target.bin");
        std::fs::write(&target, b"important existing data").unwrap();
        std::fs::write(&patch, copy_then_add_patch(6, b"there")).unwrap();

        let err = decode_file(
            Some(&dir.path().join("no-such-source.bin")),
            &patch,
            &target,
            DecodeOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, DecodeError::Io(_)));
        assert_eq!(std::fs::read(&target).unwrap(), b"important existing data");
    }

    #[test]
    fn missing_patch_leaves_existing_target_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target.bin");
        std::fs::write(&target, b"keep me").unwrap();

        let err = decode_file(
            None,
            &dir.path().join("absent.vcdiff"),
            &target,
            DecodeOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, DecodeError::Io(_)));
        assert_eq!(std::fs::read(&target).unwrap(), b"keep me");
    }
}
