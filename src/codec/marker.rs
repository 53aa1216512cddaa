//! Marker segment reading.
//!
//! Walks the datastream between entropy-coded segments: frame and scan
//! headers, tables, restart intervals, and the application segments we
//! either look at (JFIF, Adobe), keep (on request) or skip.

use serde::Serialize;

use super::entropy::HuffTable;
use super::idct::ZIGZAG;
use crate::diag::{CodecError, ErrorContext, Warning};
use crate::stream::DataSource;

pub(crate) const SOF0: u8 = 0xC0;
pub(crate) const SOF1: u8 = 0xC1;
pub(crate) const SOF2: u8 = 0xC2;
pub(crate) const DHT: u8 = 0xC4;
pub(crate) const RST0: u8 = 0xD0;
pub(crate) const RST7: u8 = 0xD7;
pub(crate) const SOI: u8 = 0xD8;
pub(crate) const EOI: u8 = 0xD9;
pub(crate) const SOS: u8 = 0xDA;
pub(crate) const DQT: u8 = 0xDB;
pub(crate) const DRI: u8 = 0xDD;
pub const APP0: u8 = 0xE0;
pub const APP7: u8 = 0xE7;
pub const APP14: u8 = 0xEE;
pub(crate) const APP15: u8 = 0xEF;
pub const COM: u8 = 0xFE;
pub(crate) const TEM: u8 = 0x01;

/// The decoder's view of its source: bytes plus the diagnostics they raise.
pub(crate) struct Input {
    src: Box<dyn DataSource>,
    pub err: ErrorContext,
    /// A marker read ahead by the entropy decoder, not yet processed.
    pub unread_marker: Option<u8>,
}

impl Input {
    pub fn new(src: Box<dyn DataSource>, trace_level: u8) -> Self {
        Self {
            src,
            err: ErrorContext::new(trace_level),
            unread_marker: None,
        }
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        if self.src.buffer().is_empty() {
            self.src.fill_input_buffer(&mut self.err)?;
        }
        let b = *self.src.buffer().first().ok_or(CodecError::InputEmpty)?;
        self.src.consume(1);
        Ok(b)
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        let hi = self.read_u8()?;
        let lo = self.read_u8()?;
        Ok(u16::from_be_bytes([hi, lo]))
    }

    pub fn skip(&mut self, n: usize) -> Result<(), CodecError> {
        if n == 0 {
            return Ok(());
        }
        self.src.skip_input_data(n, &mut self.err)
    }

    /// Read a segment length and return the payload size after it.
    fn segment_length(&mut self) -> Result<usize, CodecError> {
        let len = self.read_u16()?;
        if len < 2 {
            return Err(CodecError::BadLength(len));
        }
        Ok(len as usize - 2)
    }

    /// The SOI that must open the stream.
    pub fn first_marker(&mut self) -> Result<(), CodecError> {
        let a = self.read_u8()?;
        let b = self.read_u8()?;
        if a != 0xFF || b != SOI {
            return Err(CodecError::NotJpeg(a, b));
        }
        Ok(())
    }

    /// Find the next marker, skipping (and reporting) any garbage before it.
    pub fn next_marker(&mut self) -> Result<u8, CodecError> {
        if let Some(m) = self.unread_marker.take() {
            return Ok(m);
        }
        let mut discarded = 0usize;
        loop {
            let mut b = self.read_u8()?;
            while b != 0xFF {
                discarded += 1;
                b = self.read_u8()?;
            }
            // Any number of fill bytes may precede the code.
            loop {
                b = self.read_u8()?;
                if b != 0xFF {
                    break;
                }
            }
            if b != 0 {
                if discarded != 0 {
                    self.err.warn(Warning::ExtraneousData(discarded));
                }
                return Ok(b);
            }
            // FF 00 is stuffed data, not a marker.
            discarded += 2;
        }
    }
}

/// How the frame was coded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Process {
    Baseline,
    ExtendedSequential,
    Progressive,
}

/// One image component as declared by the frame header.
#[derive(Debug, Clone)]
pub(crate) struct Component {
    pub id: u8,
    pub h: usize,
    pub v: usize,
    pub tq: usize,
    /// Blocks that carry image data.
    pub width_in_blocks: usize,
    pub height_in_blocks: usize,
    /// Entropy tables, set by each scan that includes the component.
    pub dc_table: usize,
    pub ac_table: usize,
}

/// The frame header and what follows from it.
#[derive(Debug, Clone)]
pub(crate) struct Frame {
    pub process: Process,
    pub width: u16,
    pub height: u16,
    pub components: Vec<Component>,
    pub max_h: usize,
    pub max_v: usize,
    pub mcus_x: usize,
    pub mcus_y: usize,
}

impl Frame {
    /// Blocks per row of a component, padded to whole MCUs.
    pub fn padded_blocks_w(&self, c: usize) -> usize {
        self.mcus_x * self.components[c].h
    }

    pub fn padded_blocks_h(&self, c: usize) -> usize {
        self.mcus_y * self.components[c].v
    }
}

/// A scan header.
#[derive(Debug, Clone)]
pub(crate) struct ScanHeader {
    /// Indices into the frame's components.
    pub comps: Vec<usize>,
    pub ss: u8,
    pub se: u8,
    pub ah: u8,
    pub al: u8,
}

/// Tables that stay in force across scans.
#[derive(Debug, Default)]
pub(crate) struct Tables {
    /// Natural order.
    pub quant: [Option<[u16; 64]>; 4],
    pub dc: [Option<HuffTable>; 4],
    pub ac: [Option<HuffTable>; 4],
    pub restart_interval: u16,
}

/// A marker segment kept for the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavedMarker {
    /// Marker code, e.g. 0xFE for COM.
    pub code: u8,
    /// Length of the segment payload in the file.
    pub original_length: usize,
    /// Saved payload, possibly cut to the save limit.
    pub data: Vec<u8>,
}

/// What to keep and what the side markers told us.
#[derive(Debug, Default)]
pub(crate) struct MarkerState {
    pub save_rules: Vec<(u8, usize)>,
    pub saved: Vec<SavedMarker>,
    pub saw_jfif: bool,
    pub adobe_transform: Option<u8>,
}

/// Where marker reading stopped.
#[derive(Debug)]
pub(crate) enum MarkerEvent {
    Scan(ScanHeader),
    Eoi,
}

/// Everything marker reading can change.
pub(crate) struct MarkerReader<'a> {
    pub input: &'a mut Input,
    pub tables: &'a mut Tables,
    pub frame: &'a mut Option<Frame>,
    pub markers: &'a mut MarkerState,
}

impl MarkerReader<'_> {
    /// Process markers up to the next SOS or EOI.
    pub fn read_markers(&mut self) -> Result<MarkerEvent, CodecError> {
        loop {
            let m = self.input.next_marker()?;
            self.input.err.trace(3, format_args!("marker {m:#04x}"));
            match m {
                SOF0 => self.read_sof(Process::Baseline)?,
                SOF1 => self.read_sof(Process::ExtendedSequential)?,
                SOF2 => self.read_sof(Process::Progressive)?,
                0xC3 | 0xC5..=0xC7 | 0xC9..=0xCB | 0xCD..=0xCF => {
                    return Err(CodecError::UnsupportedProcess(m))
                }
                DHT => self.read_dht()?,
                DQT => self.read_dqt()?,
                DRI => self.read_dri()?,
                SOS => {
                    let scan = self.read_sos()?;
                    return Ok(MarkerEvent::Scan(scan));
                }
                EOI => return Ok(MarkerEvent::Eoi),
                SOI => self.input.err.trace(1, "stray SOI"),
                RST0..=RST7 | TEM => {}
                APP0..=APP15 | COM => self.read_side_marker(m)?,
                _ => self.skip_segment()?,
            }
        }
    }

    fn skip_segment(&mut self) -> Result<(), CodecError> {
        let len = self.input.segment_length()?;
        self.input.skip(len)
    }

    fn read_sof(&mut self, process: Process) -> Result<(), CodecError> {
        if self.frame.is_some() {
            return Err(CodecError::SofDuplicate);
        }
        let len = self.input.segment_length()?;
        let precision = self.input.read_u8()?;
        let height = self.input.read_u16()?;
        let width = self.input.read_u16()?;
        let n = self.input.read_u8()? as usize;
        if precision != 8 {
            return Err(CodecError::BadPrecision(precision));
        }
        if width == 0 || height == 0 {
            return Err(CodecError::EmptyImage { width, height });
        }
        if n == 0 || n > 4 {
            return Err(CodecError::BadComponentCount(n));
        }
        if len != 6 + n * 3 {
            return Err(CodecError::BadLength(len as u16 + 2));
        }

        let mut components = Vec::with_capacity(n);
        for _ in 0..n {
            let id = self.input.read_u8()?;
            let hv = self.input.read_u8()?;
            let tq = self.input.read_u8()?;
            let (h, v) = (hv >> 4, hv & 15);
            if !(1..=4).contains(&h) || !(1..=4).contains(&v) {
                return Err(CodecError::BadSampling { h, v });
            }
            if tq > 3 {
                return Err(CodecError::BadDqtIndex(tq));
            }
            components.push(Component {
                id,
                h: h as usize,
                v: v as usize,
                tq: tq as usize,
                width_in_blocks: 0,
                height_in_blocks: 0,
                dc_table: 0,
                ac_table: 0,
            });
        }
        // A lone component is never really subsampled.
        if n == 1 {
            components[0].h = 1;
            components[0].v = 1;
        }

        let max_h = components.iter().map(|c| c.h).max().unwrap_or(1);
        let max_v = components.iter().map(|c| c.v).max().unwrap_or(1);
        let (w, h) = (width as usize, height as usize);
        for c in components.iter_mut() {
            c.width_in_blocks = (w * c.h).div_ceil(max_h).div_ceil(8);
            c.height_in_blocks = (h * c.v).div_ceil(max_v).div_ceil(8);
        }
        let frame = Frame {
            process,
            width,
            height,
            max_h,
            max_v,
            mcus_x: w.div_ceil(8 * max_h),
            mcus_y: h.div_ceil(8 * max_v),
            components,
        };
        self.input.err.trace(
            1,
            format_args!("{process:?} frame {width}x{height}, {n} components"),
        );
        *self.frame = Some(frame);
        Ok(())
    }

    fn read_dht(&mut self) -> Result<(), CodecError> {
        let mut left = self.input.segment_length()?;
        while left > 16 {
            let index = self.input.read_u8()?;
            let mut counts = [0u8; 16];
            for c in counts.iter_mut() {
                *c = self.input.read_u8()?;
            }
            left -= 17;
            let total: usize = counts.iter().map(|&c| c as usize).sum();
            if total > 256 || total > left {
                return Err(CodecError::BadHuffmanTable);
            }
            let mut symbols = vec![0u8; total];
            for s in symbols.iter_mut() {
                *s = self.input.read_u8()?;
            }
            left -= total;

            let table = HuffTable::build(&counts, &symbols)?;
            let (class, slot) = (index >> 4, (index & 15) as usize);
            if slot > 3 {
                return Err(CodecError::BadDhtIndex(index));
            }
            match class {
                0 => self.tables.dc[slot] = Some(table),
                1 => self.tables.ac[slot] = Some(table),
                _ => return Err(CodecError::BadDhtIndex(index)),
            }
        }
        if left != 0 {
            return Err(CodecError::BadLength(left as u16));
        }
        Ok(())
    }

    fn read_dqt(&mut self) -> Result<(), CodecError> {
        let mut left = self.input.segment_length()?;
        while left > 0 {
            let pq_tq = self.input.read_u8()?;
            let (precision, slot) = (pq_tq >> 4, (pq_tq & 15) as usize);
            if slot > 3 {
                return Err(CodecError::BadDqtIndex(pq_tq));
            }
            let need = if precision == 0 { 64 } else { 128 };
            if left < 1 + need {
                return Err(CodecError::BadLength(left as u16));
            }
            let mut table = [0u16; 64];
            for &pos in ZIGZAG.iter() {
                table[pos] = if precision == 0 {
                    self.input.read_u8()? as u16
                } else {
                    self.input.read_u16()?
                };
            }
            self.tables.quant[slot] = Some(table);
            left -= 1 + need;
        }
        Ok(())
    }

    fn read_dri(&mut self) -> Result<(), CodecError> {
        let len = self.input.segment_length()?;
        if len != 2 {
            return Err(CodecError::BadLength(len as u16 + 2));
        }
        self.tables.restart_interval = self.input.read_u16()?;
        Ok(())
    }

    fn read_sos(&mut self) -> Result<ScanHeader, CodecError> {
        let Some(frame) = self.frame.as_mut() else {
            return Err(CodecError::SosNoSof);
        };
        let len = self.input.segment_length()?;
        let n = self.input.read_u8()? as usize;
        if n == 0 || n > 4 || n > frame.components.len() || len != 4 + n * 2 {
            return Err(CodecError::BadLength(len as u16 + 2));
        }
        let mut comps = Vec::with_capacity(n);
        for _ in 0..n {
            let id = self.input.read_u8()?;
            let tables = self.input.read_u8()?;
            let ci = frame
                .components
                .iter()
                .position(|c| c.id == id)
                .filter(|ci| !comps.contains(ci))
                .ok_or(CodecError::BadComponentId(id))?;
            let comp = &mut frame.components[ci];
            comp.dc_table = (tables >> 4) as usize;
            comp.ac_table = (tables & 15) as usize;
            if comp.dc_table > 3 || comp.ac_table > 3 {
                return Err(CodecError::BadDhtIndex(tables));
            }
            comps.push(ci);
        }
        let ss = self.input.read_u8()?;
        let se = self.input.read_u8()?;
        let a = self.input.read_u8()?;
        let (ah, al) = (a >> 4, a & 15);

        if frame.process == Process::Progressive {
            let bad = ss > se
                || se > 63
                || (ss == 0 && se != 0)
                || (ss != 0 && n != 1)
                || ah > 13
                || al > 13;
            if bad {
                return Err(CodecError::BadProgression { ss, se, ah, al });
            }
        } else if ss != 0 || se != 63 || ah != 0 || al != 0 {
            self.input.err.warn(Warning::NotSequential);
        }

        Ok(ScanHeader {
            comps,
            ss,
            se,
            ah,
            al,
        })
    }

    /// APPn and COM: note JFIF/Adobe, keep what was asked for, skip the rest.
    fn read_side_marker(&mut self, code: u8) -> Result<(), CodecError> {
        let len = self.input.segment_length()?;
        let limit = self
            .markers
            .save_rules
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, limit)| *limit);
        // Enough to recognize JFIF and Adobe headers.
        let sniff = match code {
            APP0 | APP14 => len.min(12),
            _ => 0,
        };
        let keep = limit.map_or(0, |l| l.min(len));
        let read = keep.max(sniff);
        let mut data = Vec::with_capacity(read);
        for _ in 0..read {
            data.push(self.input.read_u8()?);
        }
        self.input.skip(len - read)?;

        match code {
            APP0 if data.len() >= 5 && &data[..5] == b"JFIF\0" => self.markers.saw_jfif = true,
            APP14 if data.len() >= 12 && &data[..5] == b"Adobe" => {
                self.markers.adobe_transform = Some(data[11]);
            }
            _ => {}
        }
        if limit.is_some() {
            data.truncate(keep);
            self.markers.saved.push(SavedMarker {
                code,
                original_length: len,
                data,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memstream::MemorySource;

    fn input(bytes: &[u8]) -> Input {
        Input::new(Box::new(MemorySource::copy_from(bytes)), 0)
    }

    #[test]
    fn garbage_before_marker_is_reported() {
        let mut inp = input(&[0x12, 0x34, 0xFF, 0xFF, 0xD9]);
        assert_eq!(inp.next_marker().unwrap(), EOI);
        assert_eq!(inp.err.first_warning(), Some(&Warning::ExtraneousData(2)));
    }

    #[test]
    fn not_a_jpeg() {
        let mut inp = input(b"GIF89a");
        assert!(matches!(
            inp.first_marker(),
            Err(CodecError::NotJpeg(b'G', b'I'))
        ));
    }

    #[test]
    fn comment_is_saved_up_to_the_limit() {
        let mut bytes = vec![0xFF, COM, 0x00, 0x07];
        bytes.extend_from_slice(b"hello");
        bytes.extend_from_slice(&[0xFF, EOI]);
        let mut inp = input(&bytes);
        let mut tables = Tables::default();
        let mut frame = None;
        let mut markers = MarkerState {
            save_rules: vec![(COM, 3)],
            ..Default::default()
        };
        let ev = MarkerReader {
            input: &mut inp,
            tables: &mut tables,
            frame: &mut frame,
            markers: &mut markers,
        }
        .read_markers()
        .unwrap();
        assert!(matches!(ev, MarkerEvent::Eoi));
        assert_eq!(
            markers.saved,
            vec![SavedMarker {
                code: COM,
                original_length: 5,
                data: b"hel".to_vec()
            }]
        );
    }
}
