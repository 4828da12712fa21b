//! Bounded raw-deflate (RFC 1951) decoder.
//!
//! The caller states how many bytes the stream must expand to. Oversized and
//! implausibly compressed entries are refused before any decoding starts, and
//! the decoder never produces more than the declared size.

use crate::error::{ArchiveError, FeedError, SecurityViolation};

/// Hard ceiling for a single decompressed entry (50 MB).
pub const MAX_ENTRY_SIZE: u64 = 50 * 1024 * 1024;
/// Highest accepted `declared / compressed` ratio.
pub const MAX_COMPRESSION_RATIO: u64 = 100;

const MAX_BITS: usize = 15;
const MAX_LITLEN_CODES: usize = 286;
const MAX_DIST_CODES: usize = 30;
const FIXED_LITLEN_CODES: usize = 288;

const LENGTH_BASE: [u16; 29] = [
    3, 4, 5, 6, 7, 8, 9, 10, 11, 13, 15, 17, 19, 23, 27, 31, 35, 43, 51, 59, 67, 83, 99, 115, 131,
    163, 195, 227, 258,
];
const LENGTH_EXTRA: [u8; 29] = [
    0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 5, 5, 0,
];
const DIST_BASE: [u16; 30] = [
    1, 2, 3, 4, 5, 7, 9, 13, 17, 25, 33, 49, 65, 97, 129, 193, 257, 385, 513, 769, 1025, 1537,
    2049, 3073, 4097, 6145, 8193, 12289, 16385, 24577,
];
const DIST_EXTRA: [u8; 30] = [
    0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10, 10, 11, 11, 12, 12, 13,
    13,
];
/// Order in which code-length code lengths are transmitted.
const CODE_LENGTH_ORDER: [usize; 19] = [
    16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15,
];

type InflateResult<T> = std::result::Result<T, ArchiveError>;

/// Decompress `compressed` into exactly `declared_size` bytes.
pub fn inflate(compressed: &[u8], declared_size: u64) -> Result<Vec<u8>, FeedError> {
    check_limits(compressed.len() as u64, declared_size)?;

    // Bounded by MAX_ENTRY_SIZE above, so this fits in usize.
    let expected = declared_size as usize;
    let out = Decoder::new(compressed, expected).run()?;

    if out.len() != expected {
        return Err(ArchiveError::SizeMismatch {
            expected: declared_size,
            actual: out.len() as u64,
        }
        .into());
    }
    Ok(out)
}

/// Pre-flight checks, applied before a single bit is decoded.
pub fn check_limits(compressed_len: u64, declared_size: u64) -> Result<(), FeedError> {
    if declared_size == 0 {
        return Err(ArchiveError::InvalidDeclaredSize(declared_size).into());
    }
    if declared_size > MAX_ENTRY_SIZE {
        return Err(SecurityViolation::EntryTooLarge {
            declared: declared_size,
            limit: MAX_ENTRY_SIZE,
        }
        .into());
    }
    if declared_size > compressed_len.saturating_mul(MAX_COMPRESSION_RATIO) {
        return Err(SecurityViolation::RatioExceeded {
            declared: declared_size,
            compressed: compressed_len,
            limit: MAX_COMPRESSION_RATIO,
        }
        .into());
    }
    Ok(())
}

// ============================================================================
// Bit input
// ============================================================================

struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
    bit_buf: u32,
    bit_count: u32,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        BitReader {
            data,
            pos: 0,
            bit_buf: 0,
            bit_count: 0,
        }
    }

    /// Read `need` bits (at most 16), least significant first.
    fn bits(&mut self, need: u32) -> InflateResult<u32> {
        while self.bit_count < need {
            let byte = *self
                .data
                .get(self.pos)
                .ok_or(ArchiveError::Deflate("unexpected end of stream"))?;
            self.pos += 1;
            self.bit_buf |= (byte as u32) << self.bit_count;
            self.bit_count += 8;
        }
        let value = self.bit_buf & ((1u32 << need) - 1);
        self.bit_buf >>= need;
        self.bit_count -= need;
        Ok(value)
    }

    /// Drop the remaining bits of the current byte.
    fn align(&mut self) {
        self.bit_buf = 0;
        self.bit_count = 0;
    }

    fn take_bytes(&mut self, len: usize) -> InflateResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or(ArchiveError::Deflate("stored block runs past end of stream"))?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }
}

// ============================================================================
// Canonical Huffman tables
// ============================================================================

struct Huffman {
    /// Number of codes of each bit length.
    counts: [u16; MAX_BITS + 1],
    /// Symbols ordered by code.
    symbols: Vec<u16>,
}

impl Huffman {
    fn new(lengths: &[u8]) -> InflateResult<Self> {
        let mut counts = [0u16; MAX_BITS + 1];
        for &len in lengths {
            counts[len as usize] += 1;
        }

        // Over-subscribed sets cannot be decoded; incomplete ones are legal
        // (a lone distance code, for instance).
        let mut left: i32 = 1;
        for &count in &counts[1..] {
            left <<= 1;
            left -= count as i32;
            if left < 0 {
                return Err(ArchiveError::Deflate("over-subscribed Huffman code"));
            }
        }

        let mut offsets = [0u16; MAX_BITS + 2];
        for len in 1..=MAX_BITS {
            offsets[len + 1] = offsets[len] + counts[len];
        }

        let mut symbols = vec![0u16; lengths.len()];
        for (symbol, &len) in lengths.iter().enumerate() {
            if len != 0 {
                let slot = &mut offsets[len as usize];
                symbols[*slot as usize] = symbol as u16;
                *slot += 1;
            }
        }

        Ok(Huffman { counts, symbols })
    }

    fn decode(&self, input: &mut BitReader<'_>) -> InflateResult<u16> {
        let mut code: i32 = 0;
        let mut first: i32 = 0;
        let mut index: i32 = 0;
        for len in 1..=MAX_BITS {
            code |= input.bits(1)? as i32;
            let count = self.counts[len] as i32;
            if code - first < count {
                return Ok(self.symbols[(index + code - first) as usize]);
            }
            index += count;
            first += count;
            first <<= 1;
            code <<= 1;
        }
        Err(ArchiveError::Deflate("invalid Huffman code"))
    }

    fn fixed() -> InflateResult<(Huffman, Huffman)> {
        let mut lengths = [0u8; FIXED_LITLEN_CODES];
        lengths[..144].fill(8);
        lengths[144..256].fill(9);
        lengths[256..280].fill(7);
        lengths[280..].fill(8);
        let litlen = Huffman::new(&lengths)?;
        let dist = Huffman::new(&[5u8; MAX_DIST_CODES])?;
        Ok((litlen, dist))
    }
}

// ============================================================================
// Block decoding
// ============================================================================

struct Decoder<'a> {
    input: BitReader<'a>,
    out: Vec<u8>,
    limit: usize,
}

impl<'a> Decoder<'a> {
    fn new(compressed: &'a [u8], limit: usize) -> Self {
        Decoder {
            input: BitReader::new(compressed),
            out: Vec::with_capacity(limit),
            limit,
        }
    }

    fn run(mut self) -> InflateResult<Vec<u8>> {
        loop {
            let last = self.input.bits(1)? == 1;
            match self.input.bits(2)? {
                0 => self.stored()?,
                1 => {
                    let (litlen, dist) = Huffman::fixed()?;
                    self.codes(&litlen, &dist)?;
                }
                2 => {
                    let (litlen, dist) = self.dynamic_tables()?;
                    self.codes(&litlen, &dist)?;
                }
                _ => return Err(ArchiveError::Deflate("invalid block type")),
            }
            if last {
                return Ok(self.out);
            }
        }
    }

    fn overflow(&self, extra: usize) -> ArchiveError {
        ArchiveError::SizeMismatch {
            expected: self.limit as u64,
            actual: (self.out.len() + extra) as u64,
        }
    }

    fn stored(&mut self) -> InflateResult<()> {
        self.input.align();
        let header = self.input.take_bytes(4)?;
        let len = u16::from_le_bytes([header[0], header[1]]);
        let nlen = u16::from_le_bytes([header[2], header[3]]);
        if len != !nlen {
            return Err(ArchiveError::Deflate("stored block length check failed"));
        }
        let len = len as usize;
        if self.out.len() + len > self.limit {
            return Err(self.overflow(len));
        }
        let bytes = self.input.take_bytes(len)?;
        self.out.extend_from_slice(bytes);
        Ok(())
    }

    fn dynamic_tables(&mut self) -> InflateResult<(Huffman, Huffman)> {
        let nlen = self.input.bits(5)? as usize + 257;
        let ndist = self.input.bits(5)? as usize + 1;
        let ncode = self.input.bits(4)? as usize + 4;
        if nlen > MAX_LITLEN_CODES || ndist > MAX_DIST_CODES {
            return Err(ArchiveError::Deflate("too many length or distance codes"));
        }

        let mut code_lengths = [0u8; 19];
        for &slot in &CODE_LENGTH_ORDER[..ncode] {
            code_lengths[slot] = self.input.bits(3)? as u8;
        }
        let length_code = Huffman::new(&code_lengths)?;

        let mut lengths = vec![0u8; nlen + ndist];
        let mut index = 0;
        while index < nlen + ndist {
            let symbol = length_code.decode(&mut self.input)?;
            if symbol < 16 {
                lengths[index] = symbol as u8;
                index += 1;
                continue;
            }
            let (value, repeat) = match symbol {
                16 => {
                    if index == 0 {
                        return Err(ArchiveError::Deflate("repeat with no previous length"));
                    }
                    (lengths[index - 1], 3 + self.input.bits(2)? as usize)
                }
                17 => (0, 3 + self.input.bits(3)? as usize),
                _ => (0, 11 + self.input.bits(7)? as usize),
            };
            if index + repeat > nlen + ndist {
                return Err(ArchiveError::Deflate("code lengths overrun the table"));
            }
            lengths[index..index + repeat].fill(value);
            index += repeat;
        }

        if lengths[256] == 0 {
            return Err(ArchiveError::Deflate("missing end-of-block code"));
        }

        let litlen = Huffman::new(&lengths[..nlen])?;
        let dist = Huffman::new(&lengths[nlen..])?;
        Ok((litlen, dist))
    }

    fn codes(&mut self, litlen: &Huffman, dist: &Huffman) -> InflateResult<()> {
        loop {
            let symbol = litlen.decode(&mut self.input)? as usize;
            if symbol < 256 {
                if self.out.len() >= self.limit {
                    return Err(self.overflow(1));
                }
                self.out.push(symbol as u8);
                continue;
            }
            if symbol == 256 {
                return Ok(());
            }

            let symbol = symbol - 257;
            if symbol >= LENGTH_BASE.len() {
                return Err(ArchiveError::Deflate("invalid length symbol"));
            }
            let len = LENGTH_BASE[symbol] as usize
                + self.input.bits(LENGTH_EXTRA[symbol] as u32)? as usize;

            let symbol = dist.decode(&mut self.input)? as usize;
            if symbol >= DIST_BASE.len() {
                return Err(ArchiveError::Deflate("invalid distance symbol"));
            }
            let distance =
                DIST_BASE[symbol] as usize + self.input.bits(DIST_EXTRA[symbol] as u32)? as usize;
            if distance > self.out.len() {
                return Err(ArchiveError::Deflate("distance reaches before start of output"));
            }
            if self.out.len() + len > self.limit {
                return Err(self.overflow(len));
            }

            // Byte at a time: source and destination may overlap.
            let start = self.out.len() - distance;
            for i in 0..len {
                let byte = self.out[start + i];
                self.out.push(byte);
            }
        }
    }
}
