//! Huffman entropy decoding.
//!
//! Bits are pulled from the input through a 64-bit accumulator. When the
//! accumulator runs into a marker it stops reading and feeds zeros from
//! then on; the first time one of those zeros is actually used we warn,
//! since that means the segment was cut short.

use super::idct::ZIGZAG;
use super::marker::Input;
use crate::diag::{CodecError, Warning};

/// Codes up to this long are resolved with one table lookup.
const LOOKAHEAD: u32 = 9;

/// A decoding table derived from a DHT segment.
#[derive(Debug, Clone)]
pub(crate) struct HuffTable {
    /// `(length << 8) | symbol` for every LOOKAHEAD-bit prefix; 0 = slow path.
    lookup: Vec<u16>,
    /// Largest code of each length, -1 if none. Index 17 is a sentinel.
    maxcode: [i32; 18],
    /// Symbol index minus first code, per length.
    valoffset: [i32; 17],
    values: Vec<u8>,
    max_symbol: u8,
}

impl HuffTable {
    /// Build from the 16 length counts and the symbol list of a DHT segment.
    pub fn build(counts: &[u8; 16], symbols: &[u8]) -> Result<Self, CodecError> {
        let total: usize = counts.iter().map(|&c| c as usize).sum();
        if total > 256 || symbols.len() < total {
            return Err(CodecError::BadHuffmanTable);
        }
        let values = symbols[..total].to_vec();
        let mut maxcode = [-1i32; 18];
        let mut valoffset = [0i32; 17];
        let mut lookup = vec![0u16; 1 << LOOKAHEAD];

        let mut code: u32 = 0;
        let mut index: usize = 0;
        for len in 1..=16u32 {
            let count = counts[len as usize - 1] as usize;
            if count > 0 {
                valoffset[len as usize] = index as i32 - code as i32;
                for _ in 0..count {
                    if len <= LOOKAHEAD {
                        let shift = LOOKAHEAD - len;
                        let prefix = (code << shift) as usize;
                        let entry = ((len as u16) << 8) | values[index] as u16;
                        for slot in lookup.iter_mut().skip(prefix).take(1 << shift) {
                            *slot = entry;
                        }
                    }
                    index += 1;
                    code += 1;
                }
                // A length that overflows its bit width is not a prefix code.
                if code > (1 << len) {
                    return Err(CodecError::BadHuffmanTable);
                }
                maxcode[len as usize] = code as i32 - 1;
            }
            code <<= 1;
        }
        maxcode[17] = i32::MAX;

        Ok(Self {
            lookup,
            maxcode,
            valoffset,
            max_symbol: values.iter().copied().max().unwrap_or(0),
            values,
        })
    }

    /// DC tables may only carry magnitude categories up to 15.
    pub fn usable_for_dc(&self) -> bool {
        self.max_symbol <= 15
    }

    /// Decode one symbol. A code that is not in the table warns and yields 0.
    pub fn decode(&self, bits: &mut BitReader, input: &mut Input) -> Result<u8, CodecError> {
        bits.ensure(16, input)?;
        let entry = self.lookup[bits.peek(LOOKAHEAD) as usize];
        if entry != 0 {
            bits.consume(entry as u32 >> 8, input);
            return Ok(entry as u8);
        }
        for len in LOOKAHEAD + 1..=16 {
            let code = bits.peek(len) as i32;
            if code <= self.maxcode[len as usize] {
                bits.consume(len, input);
                let idx = (code + self.valoffset[len as usize]) as usize;
                return Ok(self.values.get(idx).copied().unwrap_or(0));
            }
        }
        bits.consume(16, input);
        input.err.warn(Warning::BadHuffmanCode);
        Ok(0)
    }
}

/// Bit-level reader over entropy-coded data.
#[derive(Debug, Default)]
pub(crate) struct BitReader {
    acc: u64,
    count: u32,
    /// How many of the low `count` bits are zero padding after a marker.
    pad: u32,
    /// Marker that ended the data, not yet handed back.
    marker: Option<u8>,
    warned: bool,
}

impl BitReader {
    pub fn new() -> Self {
        Self::default()
    }

    fn fill(&mut self, input: &mut Input) -> Result<(), CodecError> {
        while self.count <= 56 {
            let byte = if self.marker.is_some() {
                self.pad += 8;
                0
            } else {
                let b = input.read_u8()?;
                if b == 0xFF {
                    let mut next = input.read_u8()?;
                    while next == 0xFF {
                        next = input.read_u8()?;
                    }
                    if next == 0 {
                        0xFF
                    } else {
                        self.marker = Some(next);
                        self.pad += 8;
                        0
                    }
                } else {
                    b
                }
            };
            self.acc = (self.acc << 8) | byte as u64;
            self.count += 8;
        }
        Ok(())
    }

    /// Make sure at least `n` bits (n <= 56) are in the accumulator.
    #[inline]
    pub fn ensure(&mut self, n: u32, input: &mut Input) -> Result<(), CodecError> {
        if self.count < n {
            self.fill(input)?;
        }
        Ok(())
    }

    #[inline]
    fn peek(&self, n: u32) -> u32 {
        ((self.acc >> (self.count - n)) & ((1u64 << n) - 1)) as u32
    }

    #[inline]
    fn consume(&mut self, n: u32, input: &mut Input) {
        self.count -= n;
        if self.count < self.pad {
            self.pad = self.count;
            if !self.warned {
                self.warned = true;
                input.err.warn(Warning::HitMarker);
            }
        }
    }

    /// Read `n` raw bits (n <= 16).
    pub fn get(&mut self, n: u32, input: &mut Input) -> Result<u32, CodecError> {
        if n == 0 {
            return Ok(0);
        }
        self.ensure(n, input)?;
        let v = self.peek(n);
        self.consume(n, input);
        Ok(v)
    }

    /// Read `s` bits and sign-extend them as a JPEG magnitude.
    pub fn receive_extend(&mut self, s: u32, input: &mut Input) -> Result<i32, CodecError> {
        if s == 0 {
            return Ok(0);
        }
        let s = s.min(16);
        let v = self.get(s, input)? as i32;
        Ok(if v < (1 << (s - 1)) {
            v - (1 << s) + 1
        } else {
            v
        })
    }

    /// Drop all buffered bits, e.g. at a restart boundary.
    pub fn discard(&mut self) {
        self.acc = 0;
        self.count = 0;
        self.pad = 0;
        self.warned = false;
    }

    /// The marker that ended the data, if one was hit.
    pub fn take_marker(&mut self) -> Option<u8> {
        self.marker.take()
    }

    /// Put a marker back so that reads keep yielding padding.
    pub fn hold_marker(&mut self, marker: u8) {
        self.marker = Some(marker);
    }
}

/// Per-scan entropy decoding state.
#[derive(Debug, Default)]
pub(crate) struct EntropyState {
    pub bits: BitReader,
    pub preds: [i32; 4],
    pub eobrun: u32,
    pub restarts_left: u16,
    pub next_restart: u8,
}

impl EntropyState {
    pub fn new(restart_interval: u16) -> Self {
        Self {
            restarts_left: restart_interval,
            ..Self::default()
        }
    }

    /// Handle a restart boundary: expect RSTn, resync if it is not there.
    pub fn restart(&mut self, restart_interval: u16, input: &mut Input) -> Result<(), CodecError> {
        self.bits.discard();
        let marker = match self.bits.take_marker() {
            Some(m) => m,
            None => input.next_marker()?,
        };
        let expected = self.next_restart;
        if marker != 0xD0 + expected {
            input.err.warn(Warning::MustResync {
                found: marker,
                expected,
            });
            if !(0xD0..=0xD7).contains(&marker) {
                // Not a restart at all: leave it for the marker reader and
                // let the rest of the scan decode as padding.
                self.bits.hold_marker(marker);
            }
        } else {
            input.err.trace(3, format_args!("RST{expected}"));
        }
        self.next_restart = (expected + 1) & 7;
        self.preds = [0; 4];
        self.eobrun = 0;
        self.restarts_left = restart_interval;
        Ok(())
    }

    /// Counts down MCUs and restarts when the interval is up.
    pub fn before_mcu(&mut self, restart_interval: u16, input: &mut Input) -> Result<(), CodecError> {
        if restart_interval == 0 {
            return Ok(());
        }
        if self.restarts_left == 0 {
            self.restart(restart_interval, input)?;
        }
        self.restarts_left -= 1;
        Ok(())
    }

    /// Hand back whatever marker ended the scan.
    pub fn finish_scan(&mut self, input: &mut Input) {
        if let Some(m) = self.bits.take_marker() {
            input.unread_marker = Some(m);
        }
        self.bits.discard();
    }
}

#[inline]
fn store(v: i32) -> i16 {
    v.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

/// Decode one full block of a sequential scan into `coef` (natural order).
pub(crate) fn decode_block(
    st: &mut EntropyState,
    input: &mut Input,
    dc: &HuffTable,
    ac: &HuffTable,
    comp: usize,
    coef: &mut [i16; 64],
) -> Result<(), CodecError> {
    let s = dc.decode(&mut st.bits, input)? as u32;
    let diff = st.bits.receive_extend(s, input)?;
    st.preds[comp] = st.preds[comp].wrapping_add(diff);
    coef[0] = store(st.preds[comp]);

    let mut k = 1usize;
    while k < 64 {
        let rs = ac.decode(&mut st.bits, input)?;
        let r = (rs >> 4) as usize;
        let s = (rs & 15) as u32;
        if s != 0 {
            k += r;
            if k > 63 {
                break;
            }
            coef[ZIGZAG[k]] = store(st.bits.receive_extend(s, input)?);
        } else if r == 15 {
            k += 15;
        } else {
            break;
        }
        k += 1;
    }
    Ok(())
}

/// First DC scan of a progressive image.
pub(crate) fn decode_dc_first(
    st: &mut EntropyState,
    input: &mut Input,
    dc: &HuffTable,
    comp: usize,
    al: u8,
    coef: &mut [i16; 64],
) -> Result<(), CodecError> {
    let s = dc.decode(&mut st.bits, input)? as u32;
    let diff = st.bits.receive_extend(s, input)?;
    st.preds[comp] = st.preds[comp].wrapping_add(diff);
    coef[0] = st.preds[comp].wrapping_shl(al as u32) as i16;
    Ok(())
}

/// DC refinement: one more bit of precision.
pub(crate) fn decode_dc_refine(
    st: &mut EntropyState,
    input: &mut Input,
    al: u8,
    coef: &mut [i16; 64],
) -> Result<(), CodecError> {
    if st.bits.get(1, input)? != 0 {
        coef[0] |= 1i16.wrapping_shl(al as u32);
    }
    Ok(())
}

/// First AC scan over the band `ss..=se`.
pub(crate) fn decode_ac_first(
    st: &mut EntropyState,
    input: &mut Input,
    ac: &HuffTable,
    ss: u8,
    se: u8,
    al: u8,
    coef: &mut [i16; 64],
) -> Result<(), CodecError> {
    if st.eobrun > 0 {
        st.eobrun -= 1;
        return Ok(());
    }
    let se = se as usize;
    let mut k = ss as usize;
    while k <= se {
        let rs = ac.decode(&mut st.bits, input)?;
        let r = (rs >> 4) as u32;
        let s = (rs & 15) as u32;
        if s != 0 {
            k += r as usize;
            if k > se {
                break;
            }
            let v = st.bits.receive_extend(s, input)?;
            coef[ZIGZAG[k]] = v.wrapping_shl(al as u32) as i16;
        } else if r == 15 {
            k += 15;
        } else {
            st.eobrun = 1 << r;
            if r != 0 {
                st.eobrun += st.bits.get(r, input)?;
            }
            st.eobrun -= 1;
            break;
        }
        k += 1;
    }
    Ok(())
}

#[inline]
fn refine_nonzero(
    bits: &mut BitReader,
    input: &mut Input,
    c: &mut i16,
    p1: i16,
    m1: i16,
) -> Result<(), CodecError> {
    if bits.get(1, input)? != 0 && (*c & p1) == 0 {
        *c = if *c >= 0 {
            c.wrapping_add(p1)
        } else {
            c.wrapping_add(m1)
        };
    }
    Ok(())
}

/// AC refinement over the band `ss..=se`.
pub(crate) fn decode_ac_refine(
    st: &mut EntropyState,
    input: &mut Input,
    ac: &HuffTable,
    ss: u8,
    se: u8,
    al: u8,
    coef: &mut [i16; 64],
) -> Result<(), CodecError> {
    let p1: i16 = 1i16.wrapping_shl(al as u32);
    let m1: i16 = (-1i16).wrapping_shl(al as u32);
    let se = se as usize;
    let mut k = ss as usize;

    if st.eobrun == 0 {
        while k <= se {
            let rs = ac.decode(&mut st.bits, input)?;
            let mut r = (rs >> 4) as i32;
            let s = (rs & 15) as u32;
            let mut value: i16 = 0;
            if s != 0 {
                if s != 1 {
                    input.err.warn(Warning::BadHuffmanCode);
                }
                value = if st.bits.get(1, input)? != 0 { p1 } else { m1 };
            } else if r != 15 {
                st.eobrun = 1 << r;
                if r != 0 {
                    st.eobrun += st.bits.get(r as u32, input)?;
                }
                break;
            }
            // Skip already-nonzero coefficients (refining them) and r zeros.
            while k <= se {
                let c = &mut coef[ZIGZAG[k]];
                if *c != 0 {
                    refine_nonzero(&mut st.bits, input, c, p1, m1)?;
                } else {
                    r -= 1;
                    if r < 0 {
                        break;
                    }
                }
                k += 1;
            }
            if value != 0 && k <= se {
                coef[ZIGZAG[k]] = value;
            }
            k += 1;
        }
    }

    if st.eobrun > 0 {
        while k <= se {
            let c = &mut coef[ZIGZAG[k]];
            if *c != 0 {
                refine_nonzero(&mut st.bits, input, c, p1, m1)?;
            }
            k += 1;
        }
        st.eobrun -= 1;
    }
    Ok(())
}
