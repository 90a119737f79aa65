//! Raster → baseline RGB JPEG.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, RgbImage};
use tracing::debug;

use super::{ensure_parent, Transform};
use crate::batch::WorkItem;
use crate::error::TransformError;

/// Quality of every converted JPEG.
pub const JPEG_QUALITY: u8 = 95;

/// Decodes any supported raster (TIFF, BMP, PNG …), drops alpha and writes
/// a JPEG at a fixed quality.
#[derive(Debug, Clone, Copy)]
pub struct JpegConvert {
    pub quality: u8,
}

impl Default for JpegConvert {
    fn default() -> Self {
        Self {
            quality: JPEG_QUALITY,
        }
    }
}

impl Transform for JpegConvert {
    fn name(&self) -> &'static str {
        "jpeg-convert"
    }

    fn apply(&self, _item: &WorkItem, input: &Path, output: &Path) -> Result<(), TransformError> {
        let rgb = image::open(input)?.to_rgb8();
        write_jpeg(&rgb, output, self.quality)?;
        debug!("Converted {} → {}", input.display(), output.display());
        Ok(())
    }
}

/// Encode `rgb` as JPEG at `quality` into `output`, creating its directory.
pub(crate) fn write_jpeg(rgb: &RgbImage, output: &Path, quality: u8) -> Result<(), TransformError> {
    ensure_parent(output)?;
    let mut writer = BufWriter::new(File::create(output)?);
    JpegEncoder::new_with_quality(&mut writer, quality).encode(
        rgb.as_raw(),
        rgb.width(),
        rgb.height(),
        ExtendedColorType::Rgb8,
    )?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, GenericImageView, ImageFormat, Rgba, RgbaImage};
    use std::path::PathBuf;

    #[test]
    fn transparent_tiff_becomes_rgb_jpeg() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("scan.tif");
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(24, 16, Rgba([200, 40, 40, 128])))
            .save_with_format(&src, ImageFormat::Tiff)
            .unwrap();
        let out = tmp.path().join("JPG_Output").join("scan.jpg");
        let item = WorkItem::new(0, src.clone(), vec![out.clone()]);

        JpegConvert::default().apply(&item, &src, &out).unwrap();
        let written = image::open(&out).unwrap();
        assert_eq!(written.dimensions(), (24, 16));
        assert_eq!(written.color(), image::ColorType::Rgb8);
    }

    #[test]
    fn undecodable_input_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("broken.bmp");
        std::fs::write(&src, b"BM not really").unwrap();
        let item = WorkItem::new(0, src.clone(), vec![PathBuf::from("unused.jpg")]);
        let err = JpegConvert::default()
            .apply(&item, &src, &tmp.path().join("broken.jpg"))
            .unwrap_err();
        assert!(matches!(err, TransformError::Image(_)));
        assert!(!tmp.path().join("broken.jpg").exists());
    }
}
