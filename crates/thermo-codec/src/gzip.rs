//! Streaming gzip decompression.
//!
//! The decoder pulls compressed bytes from either a fixed in-memory range
//! (the usual case: an asset embedded at build time) or an arbitrary reader,
//! and produces decompressed bytes into caller-supplied buffers of any size.
//!
//! For fixed ranges the uncompressed size is read from the 4-byte
//! little-endian ISIZE field at the end of the container before any byte is
//! decoded. For reader-backed sources the size is only known once the deflate
//! stream ends; the reader must stop 4 bytes before the end of the gzip file,
//! so it yields the header, the deflate payload and the CRC32 field but never
//! the ISIZE field.
//!
//! The decoder always decodes one byte ahead of what was requested and
//! stashes it, consuming the stash first on the next call. This guarantees
//! that [`GzipDecoder::done`] flips on exactly the call that hands out the
//! final byte, even when the caller's buffer length equals the remaining
//! output.

use flate2::{Crc, Decompress, FlushDecompress, Status};
use std::io::Read;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error};

/// Smallest well-formed gzip file: 10 byte header plus 8 byte trailer.
const MIN_GZIP_LEN: usize = 18;

/// Input chunk size for reader-backed sources.
const STREAM_BUF_LEN: usize = 256;

const FHCRC: u8 = 1 << 1;
const FEXTRA: u8 = 1 << 2;
const FNAME: u8 = 1 << 3;
const FCOMMENT: u8 = 1 << 4;

/// Errors that can occur while decoding a gzip stream.
///
/// None of these propagate out of a pull call; they are logged and latch the
/// decoder into its finished state so already-emitted bytes stay valid.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The compressed buffer is smaller than the smallest possible gzip file.
    #[error("compressed buffer too small ({0} bytes)")]
    TooShort(usize),

    /// The gzip magic bytes or compression method are wrong.
    #[error("invalid gzip header")]
    BadHeader,

    /// The source ended before the deflate stream did.
    #[error("compressed stream truncated")]
    Truncated,

    /// The deflate stream itself is malformed.
    #[error("decompression failed: {0}")]
    Decode(String),

    /// The CRC32 in the trailer does not match the produced bytes.
    #[error("crc mismatch: stream says {expected:#010x}, data is {actual:#010x}")]
    CrcMismatch { expected: u32, actual: u32 },
}

/// Where compressed bytes come from.
enum Source {
    Fixed {
        data: Arc<[u8]>,
        pos: usize,
        /// One past the last byte fed to the inflater; excludes the ISIZE field.
        limit: usize,
    },
    Stream {
        reader: Box<dyn Read + Send>,
        buf: Vec<u8>,
        start: usize,
        end: usize,
        eof: bool,
    },
}

impl Source {
    fn available(&self) -> &[u8] {
        match self {
            Source::Fixed { data, pos, limit } => &data[*pos..*limit],
            Source::Stream { buf, start, end, .. } => &buf[*start..*end],
        }
    }

    fn consume(&mut self, n: usize) {
        match self {
            Source::Fixed { pos, .. } => *pos += n,
            Source::Stream { start, .. } => *start += n,
        }
    }

    /// Top up the input window. Only reader-backed sources can grow.
    fn refill(&mut self) {
        if let Source::Stream { reader, buf, start, end, eof } = self {
            if *start == *end && !*eof {
                *start = 0;
                *end = 0;
                loop {
                    match reader.read(buf) {
                        Ok(0) => {
                            *eof = true;
                            break;
                        }
                        Ok(n) => {
                            *end = n;
                            break;
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                        Err(e) => {
                            error!(error = %e, "Reading compressed source failed.");
                            *eof = true;
                            break;
                        }
                    }
                }
            }
        }
    }

    /// True once no further input can ever become available.
    fn exhausted(&self) -> bool {
        match self {
            Source::Fixed { pos, limit, .. } => *pos >= *limit,
            Source::Stream { start, end, eof, .. } => *start >= *end && *eof,
        }
    }

    fn read_byte(&mut self) -> Option<u8> {
        self.refill();
        let byte = self.available().first().copied();
        if byte.is_some() {
            self.consume(1);
        }
        byte
    }

    /// Read the CRC32 field that follows the deflate stream.
    fn read_crc_field(&mut self) -> Option<u32> {
        match self {
            Source::Fixed { data, limit, .. } => {
                if *limit < 4 {
                    return None;
                }
                let crc = &data[*limit - 4..*limit];
                Some(u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]))
            }
            Source::Stream { .. } => {
                let mut bytes = [0u8; 4];
                for slot in bytes.iter_mut() {
                    *slot = self.read_byte()?;
                }
                Some(u32::from_le_bytes(bytes))
            }
        }
    }
}

/// A pull-based gzip decompressor.
///
/// `decompress` is callable repeatedly with buffers of any size; 0 signals
/// end of stream.
pub struct GzipDecoder {
    inflate: Decompress,
    source: Source,
    crc: Crc,
    window_bits: i8,
    /// The one-byte lookahead.
    stash: Option<u8>,
    /// Bytes handed back to callers so far.
    produced: u64,
    /// Uncompressed size, once known.
    size: Option<u64>,
    stream_ended: bool,
    trailer_checked: bool,
    failed: bool,
}

impl GzipDecoder {
    /// Create a decoder over a complete in-memory gzip file.
    ///
    /// `window_bits` is the decompression window size as a negative
    /// power-of-two exponent. It has to be at least as large as the window
    /// used for compression. The valid range is -8 to -15; values outside of
    /// it are clamped.
    ///
    /// The uncompressed size is read from the trailer immediately; a buffer
    /// too small to hold any gzip file logs an error and yields a decoder
    /// that reports an unknown size and produces no bytes.
    pub fn from_slice(data: Arc<[u8]>, window_bits: i8) -> Self {
        let window_bits = clamp_window_bits(window_bits);
        let mut size = None;
        let mut pos = 0;
        let mut limit = 0;
        let mut failed = false;

        if data.len() < MIN_GZIP_LEN {
            error!(
                len = data.len(),
                "Compressed buffer too small, a gzip file is at least {} bytes.", MIN_GZIP_LEN
            );
            failed = true;
        } else {
            let isize_field = &data[data.len() - 4..];
            size = Some(u32::from_le_bytes([
                isize_field[0],
                isize_field[1],
                isize_field[2],
                isize_field[3],
            ]) as u64);
            limit = data.len() - 4;
            match parse_header(&data[..data.len() - 8]) {
                Ok(header_len) => pos = header_len,
                Err(e) => {
                    error!(error = %e, "Failed to parse gzip header.");
                    size = None;
                    failed = true;
                }
            }
        }

        Self {
            inflate: Decompress::new(false),
            source: Source::Fixed { data, pos, limit },
            crc: Crc::new(),
            window_bits,
            stash: None,
            produced: 0,
            size,
            stream_ended: false,
            trailer_checked: false,
            failed,
        }
    }

    /// Create a decoder pulling compressed bytes from a reader.
    ///
    /// The reader must end 4 bytes before the end of the gzip file - it
    /// yields the header, the deflate payload and the CRC32 field, but never
    /// the ISIZE field. The uncompressed size is therefore unknown until the
    /// stream ends; [`GzipDecoder::decompressed_size`] reports the produced
    /// byte count once it does.
    pub fn from_reader<R: Read + Send + 'static>(reader: R, window_bits: i8) -> Self {
        let window_bits = clamp_window_bits(window_bits);
        let mut source = Source::Stream {
            reader: Box::new(reader),
            buf: vec![0; STREAM_BUF_LEN],
            start: 0,
            end: 0,
            eof: false,
        };
        let failed = match parse_header_from(&mut source) {
            Ok(()) => false,
            Err(e) => {
                error!(error = %e, "Failed to parse gzip header.");
                true
            }
        };

        Self {
            inflate: Decompress::new(false),
            source,
            crc: Crc::new(),
            window_bits,
            stash: None,
            produced: 0,
            size: None,
            stream_ended: false,
            trailer_checked: false,
            failed,
        }
    }

    /// The effective (clamped) window size exponent.
    pub fn window_bits(&self) -> i8 {
        self.window_bits
    }

    /// The uncompressed size, or `None` while it is not yet known.
    ///
    /// Known immediately for fixed ranges; for reader-backed sources this
    /// flips to the produced byte count once the end of the stream has been
    /// observed.
    pub fn decompressed_size(&self) -> Option<u64> {
        self.size
    }

    /// Bytes handed out so far.
    pub fn produced(&self) -> u64 {
        self.produced
    }

    /// True once every byte has been handed out (or the decoder failed).
    pub fn done(&self) -> bool {
        self.failed || (self.stream_ended && self.stash.is_none())
    }

    /// Decompress the next segment of the stream into `buf`.
    ///
    /// Returns the number of bytes written; 0 signals end of stream. Decode
    /// errors are logged and stop the stream early - bytes already handed out
    /// stay valid.
    pub fn decompress(&mut self, buf: &mut [u8]) -> usize {
        if self.done() || buf.is_empty() {
            return 0;
        }

        let mut written = 0;
        if let Some(byte) = self.stash.take() {
            buf[0] = byte;
            written = 1;
        }
        written += self.inflate_into(buf, written);
        self.produced += written as u64;

        // Decode one byte ahead so the end of the stream is detected on the
        // call that hands out the final byte, not one call later.
        if !self.stream_ended && !self.failed {
            let mut lookahead = [0u8; 1];
            if self.inflate_into(&mut lookahead, 0) == 1 {
                self.stash = Some(lookahead[0]);
            }
        }

        if self.stream_ended && self.stash.is_none() && !self.trailer_checked {
            self.finish();
        }
        written
    }

    /// Inflate into `out[from..]`, returning the number of bytes written.
    fn inflate_into(&mut self, out: &mut [u8], from: usize) -> usize {
        let mut total = from;
        while total < out.len() && !self.stream_ended && !self.failed {
            self.source.refill();
            let input = self.source.available();
            if input.is_empty() {
                if self.source.exhausted() {
                    error!("{}", CodecError::Truncated);
                    self.failed = true;
                }
                break;
            }

            let before_in = self.inflate.total_in();
            let before_out = self.inflate.total_out();
            match self.inflate.decompress(input, &mut out[total..], FlushDecompress::None) {
                Ok(status) => {
                    let consumed = (self.inflate.total_in() - before_in) as usize;
                    let emitted = (self.inflate.total_out() - before_out) as usize;
                    self.source.consume(consumed);
                    self.crc.update(&out[total..total + emitted]);
                    total += emitted;
                    match status {
                        Status::StreamEnd => self.stream_ended = true,
                        Status::Ok => {}
                        Status::BufError => {
                            if consumed == 0 && emitted == 0 {
                                // No progress with input and output space left.
                                error!("{}", CodecError::Decode("inflater stalled".into()));
                                self.failed = true;
                            }
                        }
                    }
                }
                Err(e) => {
                    error!("{}", CodecError::Decode(e.to_string()));
                    self.failed = true;
                }
            }
        }
        total - from
    }

    /// Verify the CRC32 field and pin the final size.
    fn finish(&mut self) {
        self.trailer_checked = true;
        if self.size.is_none() {
            self.size = Some(self.produced);
        }
        let actual = self.crc.sum();
        match self.source.read_crc_field() {
            Some(expected) if expected == actual => {
                debug!(crc = format_args!("{expected:#010x}"), "Gzip checksum verified.");
            }
            Some(expected) => {
                error!("{}", CodecError::CrcMismatch { expected, actual });
            }
            None => {
                error!("{}", CodecError::Truncated);
            }
        }
    }
}

/// Clamp the window exponent into the valid -8..=-15 range.
fn clamp_window_bits(bits: i8) -> i8 {
    if bits > -8 {
        error!(bits, "Window size out of range.");
        -8
    } else if bits < -15 {
        error!(bits, "Window size out of range.");
        -15
    } else {
        bits
    }
}

/// Parse a gzip header from a slice, returning its length.
fn parse_header(data: &[u8]) -> Result<usize, CodecError> {
    if data.len() < 10 {
        return Err(CodecError::TooShort(data.len()));
    }
    if data[0] != 0x1f || data[1] != 0x8b || data[2] != 8 {
        return Err(CodecError::BadHeader);
    }
    let flags = data[3];
    let mut pos = 10;

    if flags & FEXTRA != 0 {
        if pos + 2 > data.len() {
            return Err(CodecError::Truncated);
        }
        let xlen = u16::from_le_bytes([data[pos], data[pos + 1]]) as usize;
        pos += 2 + xlen;
    }
    for flag in [FNAME, FCOMMENT] {
        if flags & flag != 0 {
            loop {
                if pos >= data.len() {
                    return Err(CodecError::Truncated);
                }
                pos += 1;
                if data[pos - 1] == 0 {
                    break;
                }
            }
        }
    }
    if flags & FHCRC != 0 {
        pos += 2;
    }
    if pos > data.len() {
        return Err(CodecError::Truncated);
    }
    Ok(pos)
}

/// Parse a gzip header by pulling bytes off a source.
fn parse_header_from(source: &mut Source) -> Result<(), CodecError> {
    let mut base = [0u8; 10];
    for slot in base.iter_mut() {
        *slot = source.read_byte().ok_or(CodecError::Truncated)?;
    }
    if base[0] != 0x1f || base[1] != 0x8b || base[2] != 8 {
        return Err(CodecError::BadHeader);
    }
    let flags = base[3];

    if flags & FEXTRA != 0 {
        let lo = source.read_byte().ok_or(CodecError::Truncated)?;
        let hi = source.read_byte().ok_or(CodecError::Truncated)?;
        for _ in 0..u16::from_le_bytes([lo, hi]) {
            source.read_byte().ok_or(CodecError::Truncated)?;
        }
    }
    for flag in [FNAME, FCOMMENT] {
        if flags & flag != 0 {
            while source.read_byte().ok_or(CodecError::Truncated)? != 0 {}
        }
    }
    if flags & FHCRC != 0 {
        source.read_byte().ok_or(CodecError::Truncated)?;
        source.read_byte().ok_or(CodecError::Truncated)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    /// Deterministic pseudo-random payload, incompressible enough to span
    /// many deflate blocks.
    fn pseudo_random(len: usize) -> Vec<u8> {
        let mut state = 0x2545f491_u32;
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                (state >> 16) as u8
            })
            .collect()
    }

    fn drain(decoder: &mut GzipDecoder, chunk_size: usize) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; chunk_size];
        for _ in 0..100_000 {
            let n = decoder.decompress(&mut buf);
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    #[test]
    fn test_fixed_range_four_byte_buffers() {
        let compressed: Arc<[u8]> = gzip(b"Hello, World!").into();
        let mut decoder = GzipDecoder::from_slice(compressed, -10);
        assert_eq!(decoder.decompressed_size(), Some(13));

        let mut out = Vec::new();
        let mut buf = [0u8; 4];
        loop {
            let n = decoder.decompress(&mut buf);
            if n == 0 {
                break;
            }
            // done() flips only on the call emitting the final byte.
            assert_eq!(decoder.done(), out.len() + n == 13);
            assert_eq!(decoder.decompressed_size(), Some(13));
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, b"Hello, World!");
        assert_eq!(decoder.produced(), 13);
        assert!(decoder.done());
    }

    #[test]
    fn test_done_flips_when_buffer_equals_remaining() {
        let compressed: Arc<[u8]> = gzip(b"Hello, World!").into();
        let mut decoder = GzipDecoder::from_slice(compressed, -10);
        let mut buf = [0u8; 13];
        let n = decoder.decompress(&mut buf);
        assert_eq!(n, 13);
        assert!(decoder.done());
        assert_eq!(decoder.decompress(&mut buf), 0);
    }

    #[test]
    fn test_chunk_size_does_not_change_output() {
        let payload = pseudo_random(4_096);
        let compressed: Arc<[u8]> = gzip(&payload).into();

        let whole = drain(&mut GzipDecoder::from_slice(compressed.clone(), -12), 8_192);
        let ones = drain(&mut GzipDecoder::from_slice(compressed.clone(), -12), 1);
        let sevens = drain(&mut GzipDecoder::from_slice(compressed.clone(), -12), 7);
        let exact = drain(&mut GzipDecoder::from_slice(compressed, -12), payload.len());

        assert_eq!(whole, payload);
        assert_eq!(ones, payload);
        assert_eq!(sevens, payload);
        assert_eq!(exact, payload);
    }

    #[test]
    fn test_streaming_source_learns_size_at_eof() {
        let payload = pseudo_random(20_000);
        let compressed = gzip(&payload);
        // The reader must never yield the ISIZE field.
        let reader = std::io::Cursor::new(compressed[..compressed.len() - 4].to_vec());
        let mut decoder = GzipDecoder::from_reader(reader, -15);

        assert_eq!(decoder.decompressed_size(), None);
        let out = drain(&mut decoder, 333);
        assert_eq!(out, payload);
        assert_eq!(decoder.decompressed_size(), Some(20_000));
        assert_eq!(decoder.produced(), 20_000);
    }

    #[test]
    fn test_decompressed_size_is_idempotent() {
        let compressed: Arc<[u8]> = gzip(b"stable").into();
        let mut decoder = GzipDecoder::from_slice(compressed, -10);
        assert_eq!(decoder.decompressed_size(), Some(6));
        drain(&mut decoder, 2);
        assert_eq!(decoder.decompressed_size(), Some(6));
    }

    #[test]
    fn test_empty_payload() {
        let compressed: Arc<[u8]> = gzip(b"").into();
        let mut decoder = GzipDecoder::from_slice(compressed, -10);
        assert_eq!(decoder.decompressed_size(), Some(0));
        let mut buf = [0u8; 16];
        assert_eq!(decoder.decompress(&mut buf), 0);
        assert!(decoder.done());
    }

    #[test]
    fn test_window_bits_are_clamped() {
        let compressed: Arc<[u8]> = gzip(b"x").into();
        assert_eq!(GzipDecoder::from_slice(compressed.clone(), 0).window_bits(), -8);
        assert_eq!(GzipDecoder::from_slice(compressed.clone(), -20).window_bits(), -15);
        assert_eq!(GzipDecoder::from_slice(compressed, -10).window_bits(), -10);
    }

    #[test]
    fn test_too_short_buffer_degrades() {
        let data: Arc<[u8]> = vec![0x1f, 0x8b].into();
        let mut decoder = GzipDecoder::from_slice(data, -10);
        assert_eq!(decoder.decompressed_size(), None);
        let mut buf = [0u8; 8];
        assert_eq!(decoder.decompress(&mut buf), 0);
        assert!(decoder.done());
    }

    #[test]
    fn test_corrupt_stream_stops_without_panicking() {
        let mut compressed = gzip(&pseudo_random(1_000));
        let mid = compressed.len() / 2;
        compressed[mid] ^= 0xff;
        compressed[mid + 1] ^= 0xff;
        let mut decoder = GzipDecoder::from_slice(compressed.into(), -10);
        let out = drain(&mut decoder, 64);
        // Whatever came out before the error stays; the stream just ends.
        assert!(out.len() <= 1_000);
        assert!(decoder.done());
    }

    #[test]
    fn test_truncated_stream_stops() {
        let compressed = gzip(&pseudo_random(1_000));
        let cut: Arc<[u8]> = compressed[..compressed.len() / 2].to_vec().into();
        let mut decoder = GzipDecoder::from_slice(cut, -10);
        let out = drain(&mut decoder, 64);
        assert!(out.len() < 1_000);
        assert!(decoder.done());
    }
}
