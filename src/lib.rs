//! Vcpatch: VCDIFF (RFC 3284) patch application in Rust.
//!
//! The crate provides:
//! - A pure-Rust VCDIFF decoder (`vcdiff`)
//! - Source and target stream abstractions (`stream`)
//! - File-oriented helpers (`io`)
//!
//! # Quick Start
//!
//! ```no_run
//! use vcpatch::vcdiff::decode_memory;
//!
//! let source = std::fs::read("old.bin").unwrap();
//! let patch = std::fs::read("update.vcdiff").unwrap();
//! let target = decode_memory(&source, &patch).unwrap();
//! std::fs::write("new.bin", target).unwrap();
//! ```
//!
//! Streaming over files, with a target that later windows can copy from:
//!
//! ```no_run
//! use std::path::Path;
//! use vcpatch::io::decode_file;
//! use vcpatch::vcdiff::DecodeOptions;
//!
//! let stats = decode_file(
//!     Some(Path::new("old.bin")),
//!     Path::new("update.vcdiff"),
//!     Path::new("new.bin"),
//!     DecodeOptions::default(),
//! )
//! .unwrap();
//! println!("{} windows, {} bytes", stats.windows, stats.output_size);
//! ```

pub mod io;
pub mod stream;
pub mod vcdiff;
