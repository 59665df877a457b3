//! Composable content hashers.
//!
//! Mirrors `dedup.hashing` (`HashBlacklist`, `DecompressedHash`,
//! `SuppressingHash`) plus `dedup.image.ImageHash`, recombined behind one
//! `HashStrategy` trait object so `MultiHasher` can fan a byte stream out
//! to all of them at once. `clone_box` is first-class — `Decompressed`'s
//! `finalize` depends on being able to flush a throwaway copy of both the
//! decompressor and the inner digest without disturbing the live hasher.

use faster_hex::hex_string;
use sha2::{Digest, Sha512};
use std::cell::RefCell;

use crate::compression::GzipDecompressor;
use crate::error::DecodeError;
use crate::image::ImageBuffer;

/// Common contract for every hasher in the stack.
pub trait HashStrategy: Send {
    fn update(&mut self, data: &[u8]);
    /// Non-destructive: may be called repeatedly, and further `update`
    /// calls after `finalize` must still be reflected in later digests.
    fn finalize(&self) -> Option<String>;
    fn clone_box(&self) -> Box<dyn HashStrategy>;
}

/// A hasher whose `update`/`finalize` can themselves fail. Only ever used
/// inside a `Suppressing` wrapper, which turns failure into `None`.
pub trait FallibleHashStrategy: Send {
    fn try_update(&mut self, data: &[u8]) -> Result<(), DecodeError>;
    fn try_finalize(&self) -> Result<String, DecodeError>;
    fn clone_box(&self) -> Box<dyn FallibleHashStrategy>;
}

/// Wraps a cryptographic digest (sha-512).
pub struct RawHasher {
    digest: Sha512,
}

impl RawHasher {
    pub fn new() -> Self {
        RawHasher {
            digest: Sha512::new(),
        }
    }
}

impl Default for RawHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl HashStrategy for RawHasher {
    fn update(&mut self, data: &[u8]) {
        self.digest.update(data);
    }

    fn finalize(&self) -> Option<String> {
        Some(hex_string(&self.digest.clone().finalize()))
    }

    fn clone_box(&self) -> Box<dyn HashStrategy> {
        Box::new(RawHasher {
            digest: self.digest.clone(),
        })
    }
}

/// The sha-512 hexdigests of the empty string and of a lone `"\n"` —
/// contents so common they would dominate sharing statistics if counted.
pub fn boring_sha512() -> [&'static str; 2] {
    [
        "cf83e1357eefb8bdf1542850d66d8007d620e4050b5715dc83f4a921d36ce9ce47d0d13c5d85f2b0ff8318d2877eec2f63b931bd47417a81a538327af927da3e",
        "be688838ca8686e5c90689bf2ab585cef1137c999b48c70b92f67a5c34dc15697b5d11c982ed6d71be1e1e7f7b4e0733884aa97c3f7a339a8ed03577cf74be09",
    ]
}

/// Returns `None` instead of the inner digest when it appears in `blacklist`.
pub struct BlacklistHasher {
    inner: Box<dyn HashStrategy>,
    blacklist: Vec<String>,
}

impl BlacklistHasher {
    pub fn new(inner: Box<dyn HashStrategy>, blacklist: Vec<String>) -> Self {
        BlacklistHasher { inner, blacklist }
    }
}

impl HashStrategy for BlacklistHasher {
    fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    fn finalize(&self) -> Option<String> {
        let digest = self.inner.finalize()?;
        if self.blacklist.iter().any(|b| b == &digest) {
            None
        } else {
            Some(digest)
        }
    }

    fn clone_box(&self) -> Box<dyn HashStrategy> {
        Box::new(BlacklistHasher {
            inner: self.inner.clone_box(),
            blacklist: self.blacklist.clone(),
        })
    }
}

/// Once `inner` raises, it is dropped and every later operation is a no-op
/// returning `None`.
pub struct SuppressingHasher {
    inner: RefCell<Option<Box<dyn FallibleHashStrategy>>>,
}

impl SuppressingHasher {
    pub fn new(inner: Box<dyn FallibleHashStrategy>) -> Self {
        SuppressingHasher {
            inner: RefCell::new(Some(inner)),
        }
    }
}

impl HashStrategy for SuppressingHasher {
    fn update(&mut self, data: &[u8]) {
        let mut slot = self.inner.borrow_mut();
        if let Some(inner) = slot.as_mut() {
            if inner.try_update(data).is_err() {
                *slot = None;
            }
        }
    }

    fn finalize(&self) -> Option<String> {
        let mut slot = self.inner.borrow_mut();
        let result = slot.as_ref().and_then(|inner| inner.try_finalize().ok());
        if result.is_none() {
            *slot = None;
        }
        result
    }

    fn clone_box(&self) -> Box<dyn HashStrategy> {
        Box::new(SuppressingHasher {
            inner: RefCell::new(self.inner.borrow().as_ref().map(|i| i.clone_box())),
        })
    }
}

/// Feeds decompressed bytes into an inner hasher. `finalize` clones both
/// the decompressor and the inner hasher, flushes the clone, and finalizes
/// that — leaving the live hasher untouched for further `update`s.
pub struct DecompressedHasher {
    decompressor: GzipDecompressor,
    inner: Box<dyn HashStrategy>,
}

impl DecompressedHasher {
    pub fn new(inner: Box<dyn HashStrategy>) -> Self {
        DecompressedHasher {
            decompressor: GzipDecompressor::new(),
            inner,
        }
    }
}

impl FallibleHashStrategy for DecompressedHasher {
    fn try_update(&mut self, data: &[u8]) -> Result<(), DecodeError> {
        let decompressed = self.decompressor.decompress(data)?;
        self.inner.update(&decompressed);
        Ok(())
    }

    fn try_finalize(&self) -> Result<String, DecodeError> {
        let mut decompressor = self.decompressor.clone_state();
        let mut inner = self.inner.clone_box();
        let tail = decompressor.flush()?;
        inner.update(&tail);
        inner
            .finalize()
            .ok_or_else(|| DecodeError::Deflate("inner digest suppressed".into()))
    }

    fn clone_box(&self) -> Box<dyn FallibleHashStrategy> {
        Box::new(DecompressedHasher {
            decompressor: self.decompressor.clone_state(),
            inner: self.inner.clone_box(),
        })
    }
}

/// Detects PNG/GIF content and hashes normalised pixel data.
pub struct ImageHasher {
    buffer: ImageBuffer,
    inner: Box<dyn HashStrategy>,
}

impl ImageHasher {
    pub fn new(inner: Box<dyn HashStrategy>) -> Self {
        ImageHasher {
            buffer: ImageBuffer::new(),
            inner,
        }
    }
}

impl FallibleHashStrategy for ImageHasher {
    fn try_update(&mut self, data: &[u8]) -> Result<(), DecodeError> {
        self.buffer.update(data)
    }

    fn try_finalize(&self) -> Result<String, DecodeError> {
        let pixels = self.buffer.finish()?;
        let (width, height) = self
            .buffer
            .dimensions()
            .ok_or(DecodeError::Decode("missing dimensions".into()))?;
        let mut inner = self.inner.clone_box();
        inner.update(&pixels);
        let digest = inner
            .finalize()
            .ok_or(DecodeError::Decode("empty digest".into()))?;
        Ok(format!("{digest}{width:08x}{height:08x}"))
    }

    fn clone_box(&self) -> Box<dyn FallibleHashStrategy> {
        Box::new(ImageHasher {
            buffer: self.buffer.clone_buffer(),
            inner: self.inner.clone_box(),
        })
    }
}

/// Fans one byte stream out to several named child hashers.
pub struct MultiHasher {
    children: Vec<(&'static str, Box<dyn HashStrategy>)>,
}

impl MultiHasher {
    pub fn new(children: Vec<(&'static str, Box<dyn HashStrategy>)>) -> Self {
        MultiHasher { children }
    }

    pub fn update(&mut self, data: &[u8]) {
        for (_, child) in &mut self.children {
            child.update(data);
        }
    }

    /// Returns one `(function name, hex digest)` pair per child that
    /// produced a non-`None` digest.
    pub fn finalize(&self) -> Vec<(&'static str, String)> {
        self.children
            .iter()
            .filter_map(|(name, child)| child.finalize().map(|digest| (*name, digest)))
            .collect()
    }
}

/// Builds the standard three-way hasher used for every regular file:
/// `sha512_nontrivial`, `gzip_sha512`, `image_sha512` (§4.2).
pub fn standard_multi_hasher() -> MultiHasher {
    let boring: Vec<String> = boring_sha512().iter().map(|s| s.to_string()).collect();

    let sha512_nontrivial: Box<dyn HashStrategy> =
        Box::new(BlacklistHasher::new(Box::new(RawHasher::new()), boring.clone()));

    let gzip_inner: Box<dyn FallibleHashStrategy> =
        Box::new(DecompressedHasher::new(Box::new(RawHasher::new())));
    let gzip_sha512: Box<dyn HashStrategy> = Box::new(BlacklistHasher::new(
        Box::new(SuppressingHasher::new(gzip_inner)),
        boring,
    ));

    let image_inner: Box<dyn FallibleHashStrategy> =
        Box::new(ImageHasher::new(Box::new(RawHasher::new())));
    let image_sha512: Box<dyn HashStrategy> = Box::new(SuppressingHasher::new(image_inner));

    MultiHasher::new(vec![
        ("sha512", sha512_nontrivial),
        ("gzip_sha512", gzip_sha512),
        ("image_sha512", image_sha512),
    ])
}
