use crate::decompress::{Decompressor, MaterializeError};
use std::fs::{File, Metadata};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tempfile::NamedTempFile;
use tracing::debug;
use treecmp_common::{AppConfig, CompareStatus, MatchCommands, Side};

const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComparatorOptions {
    /// Files above this many bytes are reported as `ErrorTooBig`
    pub size_limit: Option<u64>,
    /// Decompress `.gz` files that have no explicit command
    pub decompress_gz: bool,
}

impl ComparatorOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            size_limit: config.size_limit_bytes(),
            decompress_gz: config.decompress_gz,
        }
    }
}

impl Default for ComparatorOptions {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// One side ready for comparison, possibly backed by a decompressed copy
struct PreparedSide {
    file: File,
    path: PathBuf,
    _materialized: Option<NamedTempFile>,
}

/// Byte-exact file content comparator
#[derive(Debug, Default)]
pub struct ContentComparator {
    options: ComparatorOptions,
    bytes_read: AtomicU64,
}

impl ContentComparator {
    pub fn new(options: ComparatorOptions) -> Self {
        Self {
            options,
            bytes_read: AtomicU64::new(0),
        }
    }

    pub fn options(&self) -> &ComparatorOptions {
        &self.options
    }

    /// Total content bytes read by this comparator so far
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    /// Compare two files, decompressing either side first if a command or
    /// the `.gz` convention says so
    pub fn compare(&self, left: &Path, right: &Path, commands: &MatchCommands) -> CompareStatus {
        let left_file = match File::open(left) {
            Ok(file) => file,
            Err(e) => {
                debug!("Cannot open {:?}: {}", left, e);
                return CompareStatus::ErrorOpen;
            }
        };
        let right_file = match File::open(right) {
            Ok(file) => file,
            Err(e) => {
                debug!("Cannot open {:?}: {}", right, e);
                return CompareStatus::ErrorOpen;
            }
        };

        let left_side = match self.prepare(left, left_file, commands, Side::Left) {
            Ok(side) => side,
            Err(status) => return status,
        };
        let right_side = match self.prepare(right, right_file, commands, Side::Right) {
            Ok(side) => side,
            Err(status) => return status,
        };

        let status = self.compare_prepared(&left_side, &right_side);
        debug!("Compared {:?} and {:?}: {:?}", left, right, status);
        status
    }

    fn prepare(
        &self,
        path: &Path,
        file: File,
        commands: &MatchCommands,
        side: Side,
    ) -> Result<PreparedSide, CompareStatus> {
        let Some(decompressor) =
            Decompressor::for_side(path, commands.for_side(side), self.options.decompress_gz)
        else {
            return Ok(PreparedSide {
                file,
                path: path.to_path_buf(),
                _materialized: None,
            });
        };

        let materialized = match decompressor.materialize(file, self.options.size_limit) {
            Ok(materialized) => materialized,
            Err(MaterializeError::TooBig) => return Err(CompareStatus::ErrorTooBig),
            Err(MaterializeError::Failed(e)) => {
                debug!("Decompressing {:?} failed: {}", path, e);
                return Err(CompareStatus::ErrorRead);
            }
        };
        let file = materialized.reopen().map_err(|e| {
            debug!("Cannot reopen decompressed copy of {:?}: {}", path, e);
            CompareStatus::ErrorRead
        })?;

        Ok(PreparedSide {
            file,
            path: materialized.path().to_path_buf(),
            _materialized: Some(materialized),
        })
    }

    fn compare_prepared(&self, left: &PreparedSide, right: &PreparedSide) -> CompareStatus {
        if let (Ok(lm), Ok(rm)) = (left.file.metadata(), right.file.metadata()) {
            if same_file(&lm, &rm, &left.path, &right.path) {
                return CompareStatus::Same;
            }

            // Quick size check
            if lm.len() != rm.len() {
                return CompareStatus::Different;
            }

            if let Some(limit) = self.options.size_limit {
                if lm.len() > limit || rm.len() > limit {
                    return CompareStatus::ErrorTooBig;
                }
            }
        }

        match self.compare_streams(&left.file, &right.file) {
            Ok(true) => CompareStatus::Same,
            Ok(false) => CompareStatus::Different,
            Err(e) => {
                debug!("Read error comparing {:?} and {:?}: {}", left.path, right.path, e);
                CompareStatus::ErrorRead
            }
        }
    }

    fn compare_streams(&self, mut left: impl Read, mut right: impl Read) -> io::Result<bool> {
        let mut left_buf = vec![0u8; CHUNK_SIZE];
        let mut right_buf = vec![0u8; CHUNK_SIZE];

        loop {
            let left_len = read_full(&mut left, &mut left_buf)?;
            let right_len = read_full(&mut right, &mut right_buf)?;
            self.bytes_read
                .fetch_add((left_len + right_len) as u64, Ordering::Relaxed);

            if left_len != right_len || left_buf[..left_len] != right_buf[..right_len] {
                return Ok(false);
            }
            if left_len == 0 {
                return Ok(true);
            }
        }
    }
}

/// Fill `buf` unless the stream ends first; returns the bytes read
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(unix)]
fn same_file(a: &Metadata, b: &Metadata, _a_path: &Path, _b_path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    a.dev() == b.dev() && a.ino() == b.ino()
}

#[cfg(not(unix))]
fn same_file(_a: &Metadata, _b: &Metadata, a_path: &Path, b_path: &Path) -> bool {
    match (a_path.canonicalize(), b_path.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
