//! Single-file ZIP archives for CAD sources.

use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::{ensure_parent, Transform};
use crate::batch::WorkItem;
use crate::error::TransformError;

/// Packs the input into a deflated archive holding exactly one entry, named
/// after the original file.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipSingle;

impl Transform for ZipSingle {
    fn name(&self) -> &'static str {
        "zip-single"
    }

    fn apply(&self, item: &WorkItem, input: &Path, output: &Path) -> Result<(), TransformError> {
        ensure_parent(output)?;
        let mut source = BufReader::new(File::open(input)?);

        let mut writer = ZipWriter::new(BufWriter::new(File::create(output)?));
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(input.metadata()?.len() >= u32::MAX as u64);
        writer.start_file(item.name.as_str(), options)?;
        io::copy(&mut source, &mut writer)?;

        let mut inner = writer.finish()?;
        io::Write::flush(&mut inner)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::path::PathBuf;

    #[test]
    fn archive_holds_one_entry_named_after_source() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("000123_4.step");
        std::fs::write(&src, b"ISO-10303-21;\nHEADER;\nENDSEC;").unwrap();
        let out: PathBuf = tmp.path().join("ZIP_Output").join("000123_4.zip");
        let item = WorkItem::new(0, src.clone(), vec![out.clone()]);

        ZipSingle.apply(&item, &src, &out).unwrap();

        let mut archive = zip::ZipArchive::new(File::open(&out).unwrap()).unwrap();
        assert_eq!(archive.len(), 1);
        let mut entry = archive.by_index(0).unwrap();
        assert_eq!(entry.name(), "000123_4.step");
        assert_eq!(entry.compression(), CompressionMethod::Deflated);
        let mut body = String::new();
        entry.read_to_string(&mut body).unwrap();
        assert!(body.starts_with("ISO-10303-21"));
    }

    #[test]
    fn missing_source_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("gone.dwg");
        let out = tmp.path().join("gone.zip");
        let item = WorkItem::new(0, src.clone(), vec![out.clone()]);
        assert!(ZipSingle.apply(&item, &src, &out).is_err());
    }
}
