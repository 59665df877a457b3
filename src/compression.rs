//! Gzip header parsing and a generic decompressed byte source.
//!
//! Ported from `dedup.compression.GzipDecompressor`/`DecompressedStream`.
//! The gzip header is parsed by hand (we only need enough of RFC 1952 to
//! skip past it); the deflate body is handed to `flate2`'s raw inflate
//! state machine with no zlib wrapper.

use flate2::{Decompress, FlushDecompress, Status};
use std::io::Read;

use crate::error::DecodeError;

const GZIP_MAGIC: [u8; 3] = [0x1f, 0x8b, 0x08];
const FIXED_HEADER_LEN: usize = 10;

/// A gzip decompressor that can be fed data incrementally, cloned mid
/// stream, and tolerates concatenated gzip members.
///
/// `flate2::Decompress` does not implement `Clone`, so `clone()` keeps the
/// raw (still-compressed) bytes consumed by the current member and replays
/// them through a fresh inflate state to reconstruct an equivalent decoder —
/// the "duplicate the input and re-run from the start" fallback the design
/// calls out, scoped to the current gzip member rather than the whole file.
pub struct GzipDecompressor {
    header_buf: Vec<u8>,
    body_consumed: Vec<u8>,
    inflater: Option<Decompress>,
    finished: bool,
}

impl GzipDecompressor {
    pub fn new() -> Self {
        GzipDecompressor {
            header_buf: Vec::new(),
            body_consumed: Vec::new(),
            inflater: None,
            finished: false,
        }
    }

    pub fn decompress(&mut self, data: &[u8]) -> Result<Vec<u8>, DecodeError> {
        if self.inflater.is_some() {
            return self.decompress_body(data);
        }
        self.header_buf.extend_from_slice(data);
        match self.try_parse_header()? {
            Some(body_start) => {
                let remainder = self.header_buf.split_off(body_start);
                self.header_buf.clear();
                self.inflater = Some(Decompress::new(false));
                self.decompress_body(&remainder)
            }
            None => Ok(Vec::new()),
        }
    }

    fn decompress_body(&mut self, data: &[u8]) -> Result<Vec<u8>, DecodeError> {
        let inflater = self.inflater.as_mut().expect("body decoder present");
        let before_in = inflater.total_in();
        let mut out = Vec::new();
        let status = inflater
            .decompress_vec(data, &mut out, FlushDecompress::None)
            .map_err(|e| DecodeError::Deflate(e.to_string()))?;
        let consumed = (inflater.total_in() - before_in) as usize;
        self.body_consumed.extend_from_slice(&data[..consumed]);

        if status == Status::StreamEnd {
            self.finished = true;
            let leftover = &data[consumed..];
            self.inflater = None;
            if leftover.is_empty() {
                return Ok(out);
            }
            // Concatenated gzip member: re-parse a fresh header from the
            // unused trailing bytes, exactly as dpkg's own control.tar.gz
            // members are sometimes produced by concatenating streams.
            self.body_consumed.clear();
            self.finished = false;
            out.extend(self.decompress(leftover)?);
        }
        Ok(out)
    }

    pub fn flush(&mut self) -> Result<Vec<u8>, DecodeError> {
        let Some(inflater) = self.inflater.as_mut() else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        inflater
            .decompress_vec(&[], &mut out, FlushDecompress::Finish)
            .map_err(|e| DecodeError::Deflate(e.to_string()))?;
        Ok(out)
    }

    /// Bytes that have not yet been attributed to a gzip member: either
    /// undigested header bytes, or bytes past a finished member's end.
    pub fn unused_data(&self) -> &[u8] {
        &self.header_buf
    }

    pub fn clone_state(&self) -> Self {
        let mut clone = GzipDecompressor {
            header_buf: self.header_buf.clone(),
            body_consumed: self.body_consumed.clone(),
            inflater: None,
            finished: self.finished,
        };
        if !self.body_consumed.is_empty() {
            let mut replay = Decompress::new(false);
            let mut sink = Vec::new();
            // Best-effort replay; the original stream already validated
            // this data, so failures here would indicate a logic bug
            // rather than bad input.
            let _ = replay.decompress_vec(&self.body_consumed, &mut sink, FlushDecompress::None);
            clone.inflater = Some(replay);
        }
        clone
    }

    /// Parse as much of the gzip header as is available. Returns the byte
    /// offset in `header_buf` where the deflate body begins, or `None` if
    /// more input is required.
    fn try_parse_header(&self) -> Result<Option<usize>, DecodeError> {
        let buf = &self.header_buf;
        if buf.len() < FIXED_HEADER_LEN {
            return Ok(None);
        }
        if buf[0..3] != GZIP_MAGIC {
            return Err(DecodeError::BadMagic);
        }
        let flag = buf[3];
        let mut skip = FIXED_HEADER_LEN;

        if flag & 0x04 != 0 {
            if buf.len() < skip + 2 {
                return Ok(None);
            }
            let extra_len = u16::from_le_bytes([buf[skip], buf[skip + 1]]) as usize;
            skip += 2 + extra_len;
        }
        for field in [0x08u8, 0x10u8] {
            if flag & field != 0 {
                match buf[skip..].iter().position(|&b| b == 0) {
                    Some(pos) => skip += pos + 1,
                    None => return Ok(None),
                }
            }
        }
        if flag & 0x02 != 0 {
            skip += 2;
        }
        if buf.len() < skip {
            return Ok(None);
        }
        Ok(Some(skip))
    }
}

impl Default for GzipDecompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for GzipDecompressor {
    fn clone(&self) -> Self {
        self.clone_state()
    }
}

/// Turns our hand-rolled `GzipDecompressor` into a sequential byte source
/// with a 64 KiB read block, the way `DecompressedStream` wraps
/// `lzma.LZMADecompressor` in the Python original. `xz2`'s and `bzip2`'s
/// decoders already implement `Read` natively, so unpacking
/// `data.tar.{xz,bz2}` hands the `ar` entry straight to them instead of
/// going through this wrapper.
pub struct DecompressedStream<R> {
    inner: R,
    decompressor: GzipDecompressor,
    buf: Vec<u8>,
    pos: usize,
    inner_eof: bool,
}

const BLOCK_SIZE: usize = 64 * 1024;

impl<R: Read> DecompressedStream<R> {
    pub fn new(inner: R) -> Self {
        DecompressedStream {
            inner,
            decompressor: GzipDecompressor::new(),
            buf: Vec::new(),
            pos: 0,
            inner_eof: false,
        }
    }
}

impl<R: Read> Read for DecompressedStream<R> {
    fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
        while self.pos >= self.buf.len() {
            if self.inner_eof {
                return Ok(0);
            }
            let mut block = [0u8; BLOCK_SIZE];
            let n = self.inner.read(&mut block)?;
            let produced = if n == 0 {
                self.inner_eof = true;
                self.decompressor.flush()
            } else {
                self.decompressor.decompress(&block[..n])
            };
            self.buf = produced.map_err(|e| {
                std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
            })?;
            self.pos = 0;
            if self.inner_eof && self.buf.is_empty() {
                return Ok(0);
            }
        }
        let available = &self.buf[self.pos..];
        let n = std::cmp::min(available.len(), out.len());
        out[..n].copy_from_slice(&available[..n]);
        self.pos += n;
        Ok(n)
    }
}
