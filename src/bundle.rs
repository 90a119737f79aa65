//! Download bundles: one zip with everything a finished job produced.

use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::PipelineError;
use crate::layout::file_name_of;

/// Files written by one stage, stored under `prefix/` in the bundle.
///
/// Only what the current run produced belongs here; leftovers from earlier
/// runs in the same stage directory are not bundled.
#[derive(Debug, Clone)]
pub struct BundleSection {
    pub prefix: &'static str,
    pub files: Vec<PathBuf>,
}

impl BundleSection {
    pub fn new(prefix: &'static str, files: Vec<PathBuf>) -> Self {
        Self { prefix, files }
    }
}

/// Zip `extra` files at the archive root, then every section's files under
/// its prefix. Returns the number of entries written.
pub fn bundle_outputs(
    zip_path: &Path,
    sections: &[BundleSection],
    extra: &[PathBuf],
) -> Result<usize, PipelineError> {
    let mut entries: Vec<(PathBuf, String)> = extra
        .iter()
        .map(|path| (path.clone(), file_name_of(path)))
        .collect();
    for section in sections {
        for file in &section.files {
            let name = format!("{}/{}", section.prefix, file_name_of(file));
            entries.push((file.clone(), name));
        }
    }
    write_archive(zip_path, &entries)
}

/// Zip `files` flat at the archive root.
pub fn bundle_files(zip_path: &Path, files: &[PathBuf]) -> Result<usize, PipelineError> {
    let entries: Vec<(PathBuf, String)> = files
        .iter()
        .map(|path| (path.clone(), file_name_of(path)))
        .collect();
    write_archive(zip_path, &entries)
}

fn write_archive(zip_path: &Path, entries: &[(PathBuf, String)]) -> Result<usize, PipelineError> {
    let written = try_write_archive(zip_path, entries).map_err(|e| PipelineError::BundleFailed {
        path: zip_path.to_path_buf(),
        detail: e.to_string(),
    })?;
    debug!("Bundled {written} file(s) into {}", zip_path.display());
    Ok(written)
}

fn try_write_archive(zip_path: &Path, entries: &[(PathBuf, String)]) -> zip::result::ZipResult<usize> {
    if let Some(parent) = zip_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut writer = ZipWriter::new(BufWriter::new(File::create(zip_path)?));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(true);

    for (path, name) in entries {
        writer.start_file(name.as_str(), options)?;
        let mut source = BufReader::new(File::open(path)?);
        io::copy(&mut source, &mut writer)?;
    }

    let mut inner = writer.finish()?;
    io::Write::flush(&mut inner)?;
    Ok(entries.len())
}
