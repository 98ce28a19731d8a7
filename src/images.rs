//! Image re-encoding that preserves pixel content and drops everything else.
//!
//! Re-encoding from decoded pixels is what guarantees EXIF/XMP/IPTC/ICC
//! blocks cannot survive: the encoders only ever see raw pixel data, so
//! there is no metadata path from input to output.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::webp::WebPEncoder;
use image::ImageFormat;
use log::trace;

use crate::classify::ContentType;
use crate::error::SanitizeError;

/// Quality for JPEG re-encoding. High enough that sanitized photos stay
/// visually faithful, low enough to bound growth on already-compressed
/// input.
pub const JPEG_QUALITY: u8 = 90;

/// Decode `data` as `kind` and re-encode it without metadata, preserving the
/// detected format.
///
/// PNG keeps only the chunks required for rendering (`IHDR`/`IDAT`/`PLTE`/
/// `tRNS`/`IEND`); WebP is re-encoded losslessly; TIFF output is
/// deflate-compressed without user IFD entries.
pub fn sanitize_image(data: &[u8], kind: ContentType) -> Result<Vec<u8>, SanitizeError> {
    let format = match kind {
        ContentType::Jpeg => ImageFormat::Jpeg,
        ContentType::Png => ImageFormat::Png,
        ContentType::Webp => ImageFormat::WebP,
        ContentType::Tiff => ImageFormat::Tiff,
        _ => return Err(SanitizeError::UnsupportedContent),
    };

    let decoded = image::load_from_memory_with_format(data, format)?;
    trace!("decoded {}x{} pixels as {:?}", decoded.width(), decoded.height(), format);

    let mut out = Cursor::new(Vec::with_capacity(data.len()));
    match format {
        ImageFormat::Jpeg => {
            decoded.write_with_encoder(JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY))?;
        },
        ImageFormat::WebP => {
            decoded.write_with_encoder(WebPEncoder::new_lossless(&mut out))?;
        },
        other => decoded.write_to(&mut out, other)?,
    }
    Ok(out.into_inner())
}

// Tests go below the code where they'll be out of the way when not the target of attention
#[cfg(test)]
mod tests {
    use image::{DynamicImage, RgbImage};

    use super::*;

    fn gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x * 37 % 256) as u8, (y * 53 % 256) as u8, ((x + y) % 256) as u8])
        }))
    }

    fn encode(img: &DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, format).unwrap();
        buf.into_inner()
    }

    /// Build a JPEG carrying an EXIF APP1 segment right after SOI.
    fn jpeg_with_exif() -> Vec<u8> {
        let plain = encode(&gradient(8, 8), ImageFormat::Jpeg);
        let mut exif_payload = b"Exif\x00\x00II*\x00\x08\x00\x00\x00\x00\x00".to_vec();
        let mut segment = vec![0xFF, 0xE1];
        let length = (exif_payload.len() + 2) as u16;
        segment.extend_from_slice(&length.to_be_bytes());
        segment.append(&mut exif_payload);

        let mut tagged = plain[..2].to_vec();
        tagged.extend_from_slice(&segment);
        tagged.extend_from_slice(&plain[2..]);
        tagged
    }

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|window| window == needle)
    }

    #[test]
    fn jpeg_exif_block_is_dropped() {
        let tagged = jpeg_with_exif();
        assert!(contains(&tagged, b"Exif\x00\x00"));

        let sanitized = sanitize_image(&tagged, ContentType::Jpeg).unwrap();
        assert!(!contains(&sanitized, b"Exif\x00\x00"));
        // Still a decodable JPEG of the same dimensions.
        let reread = image::load_from_memory_with_format(&sanitized, ImageFormat::Jpeg).unwrap();
        assert_eq!((reread.width(), reread.height()), (8, 8));
    }

    #[test]
    fn png_round_trips_pixels_exactly() {
        let img = gradient(16, 16);
        let sanitized = sanitize_image(&encode(&img, ImageFormat::Png), ContentType::Png).unwrap();
        let reread = image::load_from_memory_with_format(&sanitized, ImageFormat::Png).unwrap();
        assert_eq!(img.to_rgb8().as_raw(), reread.to_rgb8().as_raw());
    }

    #[test]
    fn png_sanitization_is_idempotent() {
        let once =
            sanitize_image(&encode(&gradient(9, 5), ImageFormat::Png), ContentType::Png).unwrap();
        let twice = sanitize_image(&once, ContentType::Png).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn webp_is_reencoded_losslessly() {
        let img = gradient(12, 7);
        let sanitized =
            sanitize_image(&encode(&img, ImageFormat::WebP), ContentType::Webp).unwrap();
        let reread = image::load_from_memory_with_format(&sanitized, ImageFormat::WebP).unwrap();
        assert_eq!(img.to_rgb8().as_raw(), reread.to_rgb8().as_raw());
    }

    #[test]
    fn tiff_round_trips() {
        let img = gradient(6, 6);
        let sanitized =
            sanitize_image(&encode(&img, ImageFormat::Tiff), ContentType::Tiff).unwrap();
        let reread = image::load_from_memory_with_format(&sanitized, ImageFormat::Tiff).unwrap();
        assert_eq!(img.to_rgb8().as_raw(), reread.to_rgb8().as_raw());
    }

    #[test]
    fn truncated_input_is_a_decode_error() {
        let mut png = encode(&gradient(8, 8), ImageFormat::Png);
        png.truncate(20);
        assert!(sanitize_image(&png, ContentType::Png).is_err());
    }

    #[test]
    fn non_image_kind_is_rejected() {
        assert!(sanitize_image(b"%PDF-1.7", ContentType::Pdf).is_err());
    }
}
