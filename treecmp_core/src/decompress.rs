//! Materializing compressed files before their contents are compared.
//!
//! gzip is decoded in-process with flate2. Any other command runs through
//! the platform shell with the file on stdin; whatever it writes to stdout is
//! the content that gets compared.

use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use std::process::{Command, Stdio};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

const GZ_SUFFIX: &str = ".gz";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decompressor {
    Gzip,
    Command(String),
}

#[derive(Debug)]
pub enum MaterializeError {
    /// Decompressed output exceeds the size limit
    TooBig,
    Failed(io::Error),
}

impl From<io::Error> for MaterializeError {
    fn from(e: io::Error) -> Self {
        MaterializeError::Failed(e)
    }
}

impl Decompressor {
    /// Interpret a match rule command; gzip-style commands use the built-in
    /// decoder
    pub fn from_command(command: &str) -> Option<Self> {
        let mut words = command.split_whitespace();
        let program = words.next()?;
        let args: Vec<&str> = words.collect();
        let program_name = Path::new(program)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(program);

        let is_gzip = match program_name {
            "gunzip" | "zcat" | "gzcat" => true,
            "gzip" => args
                .iter()
                .any(|arg| matches!(*arg, "-d" | "-dc" | "-cd" | "--decompress")),
            _ => false,
        };

        if is_gzip {
            Some(Decompressor::Gzip)
        } else {
            Some(Decompressor::Command(command.trim().to_string()))
        }
    }

    /// Pick the decompressor for one side: an explicit command wins,
    /// otherwise the `.gz` suffix convention applies when enabled
    pub fn for_side(path: &Path, command: Option<&str>, gz_convention: bool) -> Option<Self> {
        if let Some(command) = command {
            return Self::from_command(command);
        }
        let is_gz = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.to_ascii_lowercase().ends_with(GZ_SUFFIX));
        if gz_convention && is_gz {
            Some(Decompressor::Gzip)
        } else {
            None
        }
    }

    /// Decompress `source` into a temporary file
    pub fn materialize(
        &self,
        source: File,
        size_limit: Option<u64>,
    ) -> Result<NamedTempFile, MaterializeError> {
        let mut output = NamedTempFile::new()?;

        match self {
            Decompressor::Gzip => {
                let decoder = MultiGzDecoder::new(BufReader::new(source));
                let written = copy_capped(decoder, &mut output, size_limit)?;
                if size_limit.is_some_and(|limit| written > limit) {
                    return Err(MaterializeError::TooBig);
                }
            }
            Decompressor::Command(command) => {
                let mut child = shell(command)
                    .stdin(Stdio::from(source))
                    .stdout(Stdio::piped())
                    .stderr(Stdio::null())
                    .spawn()?;
                let copied = match child.stdout.take() {
                    Some(stdout) => copy_capped(stdout, &mut output, size_limit),
                    None => Ok(0),
                };
                let over_limit = match &copied {
                    Ok(written) => size_limit.is_some_and(|limit| *written > limit),
                    Err(_) => true,
                };
                if over_limit {
                    // the command may still be producing output
                    let _ = child.kill();
                    let _ = child.wait();
                    copied?;
                    debug!("'{}' produced more than the size limit", command);
                    return Err(MaterializeError::TooBig);
                }

                let status = child.wait()?;
                if !status.success() {
                    warn!("Decompression command '{}' failed: {}", command, status);
                    return Err(MaterializeError::Failed(io::Error::new(
                        io::ErrorKind::Other,
                        format!("'{}' exited with {}", command, status),
                    )));
                }
            }
        }

        debug!("Materialized {:?} with {:?}", output.path(), self);
        Ok(output)
    }
}

/// Copy at most one byte past `size_limit` into `output`
fn copy_capped(
    reader: impl Read,
    output: &mut NamedTempFile,
    size_limit: Option<u64>,
) -> io::Result<u64> {
    let mut reader: Box<dyn Read + '_> = match size_limit {
        Some(limit) => Box::new(reader.take(limit.saturating_add(1))),
        None => Box::new(reader),
    };
    io::copy(&mut reader, output.as_file_mut())
}

#[cfg(unix)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(not(unix))]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}
