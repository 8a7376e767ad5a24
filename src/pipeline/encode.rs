//! Image encoding: `DynamicImage` → PNG bytes for [`ExtractedImage`].
//!
//! Embedded PDF images arrive in whatever filter the producer chose (DCT,
//! Flate, JBIG2). Re-encoding everything as PNG gives callers one lossless
//! format to deal with; the base64 wrapping happens at serialisation time.
//!
//! [`ExtractedImage`]: crate::document::ExtractedImage

use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode an image as PNG.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    debug!(
        "Encoded {}x{} image → {} bytes PNG",
        img.width(),
        img.height(),
        buf.len()
    );
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let data = encode_png(&img).expect("encode should succeed");
        assert_eq!(&data[1..4], b"PNG");
        let decoded = image::load_from_memory(&data).expect("valid png");
        assert_eq!(decoded.width(), 10);
    }
}
