//! Writing result images to disk

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::Context;
use image::RgbImage;
use log::info;

/// Writes `pixels` to `path` as a binary PPM.
pub fn write_image(path: &Path, pixels: &RgbImage) -> anyhow::Result<()> {
    write_ppm(path, pixels)?;
    info!(
        "Wrote {}x{} image to {}",
        pixels.width(),
        pixels.height(),
        path.display()
    );
    Ok(())
}

/// Writes `pixels` as a `P6` pixmap with maxval 255.
///
/// The header puts width, height and maxval on lines of their own.
pub fn write_ppm(path: &Path, pixels: &RgbImage) -> anyhow::Result<()> {
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut out = BufWriter::new(file);
    write!(out, "P6\n{}\n{}\n255\n", pixels.width(), pixels.height())
        .and_then(|()| out.write_all(pixels.as_raw()))
        .and_then(|()| out.flush())
        .with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("vkdemos_{}_{name}", std::process::id()))
    }

    fn gradient() -> RgbImage {
        RgbImage::from_fn(3, 2, |x, y| image::Rgb([x as u8 * 80, y as u8 * 200, 7]))
    }

    #[test]
    fn ppm_is_binary_pixmap() {
        let path = temp_path("out.ppm");
        let pixels = gradient();
        write_image(&path, &pixels).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let header = b"P6\n3\n2\n255\n";
        assert_eq!(&bytes[..header.len()], header);
        // Raw RGB triples follow, row-major, top to bottom
        assert_eq!(&bytes[header.len()..], pixels.as_raw().as_slice());

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn ppm_reads_back() {
        let path = temp_path("roundtrip.ppm");
        let pixels = gradient();
        write_ppm(&path, &pixels).unwrap();
        let decoded = image::open(&path).unwrap().to_rgb8();
        assert_eq!(decoded, pixels);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn other_extensions_still_get_a_pixmap() {
        let path = temp_path("out.png");
        write_image(&path, &gradient()).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"P6\n3\n2\n255\n"));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn missing_directory_is_an_error() {
        let path = temp_path("no_such_dir").join("out.ppm");
        assert!(write_image(&path, &gradient()).is_err());
    }
}
