//! Injected PNG scaling capability.
//!
//! Containers can serve on-the-fly resized previews of PNG resources. The
//! engine decides *when* to scale, but the scaling itself is an injected
//! capability so that the library does not force an image stack on every
//! consumer. The default implementation, behind the `image-scaling` feature,
//! is backed by the `image` crate.

use crate::error::Result;

/// Scales an encoded PNG to exactly `width` × `height`, with smooth sampling
/// and no aspect-ratio preservation, returning a freshly encoded PNG.
pub trait PngScaler: Send {
    fn scale(&self, png: &[u8], width: u32, height: u32) -> Result<Vec<u8>>;
}

/// The scaler installed into new containers, when one is available.
pub fn default_scaler() -> Option<Box<dyn PngScaler>> {
    #[cfg(feature = "image-scaling")]
    {
        Some(Box::new(SmoothPngScaler))
    }
    #[cfg(not(feature = "image-scaling"))]
    {
        None
    }
}

#[cfg(feature = "image-scaling")]
pub struct SmoothPngScaler;

#[cfg(feature = "image-scaling")]
impl PngScaler for SmoothPngScaler {
    fn scale(&self, png: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
        use crate::error::Error;
        use image::imageops::FilterType;
        use std::io::Cursor;

        let decoded = image::load_from_memory_with_format(png, image::ImageFormat::Png)
            .map_err(|err| Error::Scaling(err.to_string()))?;
        let scaled = decoded.resize_exact(width, height, FilterType::Triangle);

        let mut encoded = Cursor::new(Vec::new());
        scaled
            .write_to(&mut encoded, image::ImageFormat::Png)
            .map_err(|err| Error::Scaling(err.to_string()))?;
        Ok(encoded.into_inner())
    }
}
