//! Sample directory setup and read concatenation.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::AlignmentConfig;
use crate::errors::AlignflowError;

/// Suffix of the read files picked up from an input directory.
pub const READS_SUFFIX: &str = ".fastq.gz";

/// Creates `<output_root>/<sample_name>/` and any missing parents.
///
/// # Errors
///
/// Returns an IO error if the directory cannot be created.
pub fn prepare_sample_dir(config: &AlignmentConfig) -> Result<PathBuf, AlignflowError> {
    let dir = config.sample_dir();
    std::fs::create_dir_all(&dir)?;
    debug!(dir = %dir.display(), "Sample directory ready");
    Ok(dir)
}

/// Lists the `*.fastq.gz` files directly inside `dir`, sorted by file name.
///
/// # Errors
///
/// Returns an input error if the directory cannot be read.
pub fn list_reads(dir: &Path) -> Result<Vec<PathBuf>, AlignflowError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| AlignflowError::input(format!("cannot read {}: {e}", dir.display())))?;

    let mut reads = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_reads = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(READS_SUFFIX));
        if is_reads && path.is_file() {
            reads.push(path);
        }
    }
    reads.sort();
    Ok(reads)
}

/// Concatenates `sources` byte for byte into `destination`.
///
/// Gzip members concatenated this way form a valid multi-member gzip stream.
/// Returns the number of bytes written.
///
/// # Errors
///
/// Returns an IO error if any source cannot be read or the destination
/// cannot be written.
pub fn concatenate(sources: &[PathBuf], destination: &Path) -> Result<u64, AlignflowError> {
    let mut writer = BufWriter::new(File::create(destination)?);
    let mut total = 0;
    for source in sources {
        let mut reader = File::open(source)?;
        total += std::io::copy(&mut reader, &mut writer)?;
    }
    writer.flush()?;
    Ok(total)
}

/// Creates the sample directory and concatenates every read file of the
/// input directory, then of the secondary directory if one is configured,
/// into a single file.
///
/// Returns the concatenated file's path.
///
/// # Errors
///
/// Returns an input error if the primary directory holds no read files.
pub fn prepare_reads(config: &AlignmentConfig) -> Result<PathBuf, AlignflowError> {
    prepare_sample_dir(config)?;
    let destination = config.concatenated_reads();

    let mut sources: Vec<PathBuf> = list_reads(&config.input_dir)?
        .into_iter()
        .filter(|p| *p != destination)
        .collect();
    if sources.is_empty() {
        return Err(AlignflowError::input(format!(
            "no *{READS_SUFFIX} files in {}",
            config.input_dir.display()
        )));
    }

    if let Some(extra) = &config.additional_dir {
        let more: Vec<PathBuf> = list_reads(extra)?
            .into_iter()
            .filter(|p| *p != destination)
            .collect();
        if more.is_empty() {
            warn!(dir = %extra.display(), "Secondary read directory has no read files");
        }
        sources.extend(more);
    }

    let bytes = concatenate(&sources, &destination)?;
    info!(
        files = sources.len(),
        bytes,
        output = %destination.display(),
        "Reads concatenated"
    );
    Ok(destination)
}
