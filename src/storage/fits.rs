//! FITS frame files (feature `storage_fits`).
//!
//! The frame goes into the primary HDU as a double image; header cards become
//! FITS keywords, so keys must respect the 8-character keyword limit.

#[cfg(feature = "storage_fits")]
mod enabled {
    use crate::error::{AppResult, DaqError};
    use crate::hardware::frame::Frame;
    use crate::storage::{append_extension, FrameHeader, FrameWriter, EXPTIME};
    use fitsio::hdu::HduInfo;
    use fitsio::images::{ImageDescription, ImageType};
    use fitsio::FitsFile;
    use ndarray::Array2;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    fn fits_err(path: &Path, e: impl std::fmt::Display) -> DaqError {
        DaqError::Storage(format!("FITS error for '{}': {}", path.display(), e))
    }

    /// A writer for FITS frame files.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct FitsFrameWriter;

    impl FitsFrameWriter {
        /// FITS writer.
        pub fn new() -> Self {
            Self
        }
    }

    impl FrameWriter for FitsFrameWriter {
        fn extension(&self) -> &'static str {
            "fits"
        }

        fn write(&self, path: &Path, frame: &Frame, header: &FrameHeader) -> AppResult<PathBuf> {
            let path = append_extension(path, self.extension());
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let (rows, cols) = frame.shape();
            let description = ImageDescription {
                data_type: ImageType::Double,
                dimensions: &[rows, cols],
            };
            let mut fptr = FitsFile::create(&path)
                .with_custom_primary(&description)
                .overwrite()
                .open()
                .map_err(|e| fits_err(&path, e))?;
            let hdu = fptr.primary_hdu().map_err(|e| fits_err(&path, e))?;

            let pixels: Vec<f64> = frame.data.iter().copied().collect();
            hdu.write_image(&mut fptr, &pixels)
                .map_err(|e| fits_err(&path, e))?;
            for (key, value) in header.cards() {
                match value.parse::<f64>() {
                    Ok(number) => hdu.write_key(&mut fptr, key, number),
                    Err(_) => hdu.write_key(&mut fptr, key, value),
                }
                .map_err(|e| fits_err(&path, e))?;
            }
            Ok(path)
        }

        fn read(&self, path: &Path) -> AppResult<(Frame, FrameHeader)> {
            let mut fptr = FitsFile::open(path).map_err(|e| fits_err(path, e))?;
            let hdu = fptr.primary_hdu().map_err(|e| fits_err(path, e))?;
            let shape = match &hdu.info {
                HduInfo::ImageInfo { shape, .. } if shape.len() == 2 => (shape[0], shape[1]),
                _ => return Err(fits_err(path, "primary HDU is not a 2-D image")),
            };
            let pixels: Vec<f64> = hdu.read_image(&mut fptr).map_err(|e| fits_err(path, e))?;
            let data = Array2::from_shape_vec(shape, pixels).map_err(|e| fits_err(path, e))?;

            let exposure = hdu.read_key::<f64>(&mut fptr, EXPTIME).unwrap_or(0.0);
            let header = FrameHeader::new().with(EXPTIME, exposure);
            Ok((
                Frame::new(data, Duration::from_secs_f64(exposure.max(0.0))),
                header,
            ))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use ndarray::array;

        #[test]
        fn primary_hdu_round_trip() {
            let dir = tempfile::tempdir().unwrap();
            let frame = Frame::new(array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]], Duration::from_millis(5));
            let writer = FitsFrameWriter::new();
            let header = FrameHeader::for_frame(&frame).with("FPM", "direct");
            let written = writer.write(&dir.path().join("final_dark_zone"), &frame, &header).unwrap();
            assert!(written.ends_with("final_dark_zone.fits"));

            let (read, _) = writer.read(&written).unwrap();
            assert_eq!(read.data, frame.data);
            assert_eq!(read.exposure, frame.exposure);
        }
    }
}

#[cfg(feature = "storage_fits")]
pub use enabled::FitsFrameWriter;
