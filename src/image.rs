//! PNG/GIF signature sniffing and pixel-level normalisation.
//!
//! Ported from `dedup.image.ImageHash`, extended to also recognise GIF
//! (the Python original only special-cased PNG). The digest is computed
//! over raw RGBA pixels in raster order so that different encodings of
//! the same picture (filter choice, interlacing, palette ordering,
//! ancillary chunks) hash identically. The width/height are not hashed
//! themselves — `ImageHasher::try_finalize` appends them as a plain
//! `{:08x}{:08x}` tail onto the finalized pixel digest, matching
//! `"%s%8.8x%8.8x" % (hashobj.hexdigest(), width, height)` in the original.

use image::ImageFormat;

use crate::error::DecodeError;

pub const MAX_SIZE: usize = 32 * 1024 * 1024;
pub const MAX_PIXELS: u64 = 32 * 1024 * 1024;

const PNG_SIGNATURE: &[u8; 16] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
];

#[derive(Clone, Copy, PartialEq, Eq)]
enum Kind {
    Png,
    Gif,
}

/// Accumulates raw file bytes, detecting PNG/GIF as soon as enough of the
/// header has arrived, and decodes to RGBA on `finish`.
pub struct ImageBuffer {
    content: Vec<u8>,
    kind: Option<Kind>,
    width: Option<u32>,
    height: Option<u32>,
}

impl ImageBuffer {
    pub fn new() -> Self {
        ImageBuffer {
            content: Vec::new(),
            kind: None,
            width: None,
            height: None,
        }
    }

    /// Feed more raw bytes. Returns an error as soon as the buffer proves
    /// the content is not a supported image, or exceeds the size/pixel
    /// bounds.
    pub fn update(&mut self, data: &[u8]) -> Result<(), DecodeError> {
        self.content.extend_from_slice(data);
        if self.content.len() > MAX_SIZE {
            return Err(DecodeError::TooLarge);
        }
        if self.kind.is_some() {
            return Ok(());
        }
        if self.content.len() < 24 {
            // Not enough to confirm PNG (16-byte signature + 8-byte IHDR
            // dimensions) or GIF (6-byte signature + 4-byte dimensions)
            // yet; wait for more data before judging.
            return Ok(());
        }
        if self.content.starts_with(PNG_SIGNATURE) {
            let width = u32::from_be_bytes(self.content[16..20].try_into().unwrap());
            let height = u32::from_be_bytes(self.content[20..24].try_into().unwrap());
            self.confirm(Kind::Png, width, height)?;
        } else if self.content.starts_with(b"GIF87a") || self.content.starts_with(b"GIF89a") {
            // GIF's Logical Screen Descriptor stores width/height
            // little-endian; unlike PNG this is the format's actual
            // byte order, not a bug to work around.
            let width = u16::from_le_bytes([self.content[6], self.content[7]]) as u32;
            let height = u16::from_le_bytes([self.content[8], self.content[9]]) as u32;
            self.confirm(Kind::Gif, width, height)?;
        } else {
            return Err(DecodeError::NotAnImage);
        }
        Ok(())
    }

    fn confirm(&mut self, kind: Kind, width: u32, height: u32) -> Result<(), DecodeError> {
        if (width as u64) * (height as u64) > MAX_PIXELS {
            return Err(DecodeError::TooLarge);
        }
        self.kind = Some(kind);
        self.width = Some(width);
        self.height = Some(height);
        Ok(())
    }

    pub fn clone_buffer(&self) -> Self {
        ImageBuffer {
            content: self.content.clone(),
            kind: self.kind,
            width: self.width,
            height: self.height,
        }
    }

    /// Decode the buffered image and return its RGBA pixels in raster
    /// order. The 16-hex-char width/height tail is appended to the
    /// finalized digest by the caller (`ImageHasher::try_finalize`), not
    /// folded into the hashed bytes themselves.
    pub fn finish(&self) -> Result<Vec<u8>, DecodeError> {
        let kind = self.kind.ok_or(DecodeError::NotAnImage)?;
        let format = match kind {
            Kind::Png => ImageFormat::Png,
            Kind::Gif => ImageFormat::Gif,
        };
        let img = image::load_from_memory_with_format(&self.content, format)
            .map_err(|e| DecodeError::Decode(e.to_string()))?;
        Ok(img.to_rgba8().into_raw())
    }

    /// The declared dimensions, available once a signature has been
    /// confirmed. Used to build the digest's width/height tail.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        Some((self.width?, self.height?))
    }
}

impl Default for ImageBuffer {
    fn default() -> Self {
        Self::new()
    }
}
