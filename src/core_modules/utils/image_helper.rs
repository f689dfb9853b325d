use image::{ExtendedColorType, ImageEncoder, ImageError, RgbImage};

/// Decodes any format the `image` crate recognises into 8-bit RGB.
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, ImageError> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

/// Encodes an RGB image as a baseline JPEG at the given quality (1-100).
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, ImageError> {
    let mut buffer = Vec::new();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buffer, quality);

    encoder.write_image(image.as_raw(), image.width(), image.height(), ExtendedColorType::Rgb8)?;

    Ok(buffer)
}
