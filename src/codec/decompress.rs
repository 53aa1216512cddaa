//! The scanline decompressor.
//!
//! Usage follows the classic pull sequence:
//! [`read_header`](Decompressor::read_header), adjust the output
//! parameters, [`start_decompress`](Decompressor::start_decompress),
//! [`read_scanlines`](Decompressor::read_scanlines) until all rows are
//! out, then [`finish_decompress`](Decompressor::finish_decompress).
//!
//! Single-scan sequential images are decoded one MCU row at a time as
//! scanlines are requested. Anything with more than one scan
//! (progressive, or non-interleaved sequential) is first read in full
//! into a coefficient buffer.

use super::color::{Converter, JColorSpace};
use super::entropy::{self, EntropyState, HuffTable};
use super::idct::{DctMethod, Idct};
use super::marker::{
    Frame, Input, MarkerEvent, MarkerReader, MarkerState, Process, SavedMarker, ScanHeader,
    Tables, RST0, RST7,
};
use crate::diag::{CodecError, ErrorContext, Warning};
use crate::stream::DataSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    HeaderRead,
    Scanning,
    Done,
}

/// One component's samples for the current MCU row, after the IDCT.
struct Plane {
    data: Vec<u8>,
    stride: usize,
    h: usize,
    v: usize,
}

/// Whole-image coefficient storage for multi-scan images.
struct CoefBuffer {
    blocks: Vec<Vec<[i16; 64]>>,
    /// Successive-approximation bit reached per coefficient, -1 = never seen.
    progress: Vec<[i8; 64]>,
}

impl CoefBuffer {
    fn new(frame: &Frame) -> Result<Self, CodecError> {
        let mut blocks = Vec::with_capacity(frame.components.len());
        for ci in 0..frame.components.len() {
            let n = frame.padded_blocks_w(ci) * frame.padded_blocks_h(ci);
            let mut comp = Vec::new();
            comp.try_reserve_exact(n)
                .map_err(|_| CodecError::OutOfMemory)?;
            comp.resize(n, [0i16; 64]);
            blocks.push(comp);
        }
        Ok(Self {
            blocks,
            progress: vec![[-1i8; 64]; frame.components.len()],
        })
    }

    /// Check that a progressive scan builds on what came before it.
    fn track(&mut self, scan: &ScanHeader, err: &mut ErrorContext) {
        for &ci in &scan.comps {
            let bits = &mut self.progress[ci];
            if scan.ss > 0 && bits[0] < 0 {
                err.warn(Warning::BogusProgression {
                    component: ci,
                    coef: 0,
                });
            }
            for k in scan.ss as usize..=scan.se as usize {
                let expected = bits[k].max(0) as u8;
                if scan.ah != expected {
                    err.warn(Warning::BogusProgression {
                        component: ci,
                        coef: k,
                    });
                }
                bits[k] = scan.al as i8;
            }
        }
    }
}

enum BlockSource {
    Streaming {
        scan: ScanHeader,
        st: EntropyState,
    },
    Buffered(CoefBuffer),
}

/// Everything needed to turn MCU rows into output scanlines.
struct Engine {
    source: BlockSource,
    planes: Vec<Plane>,
    idct: Idct,
    converter: Converter,
    /// Next MCU row to produce.
    mcu_row: usize,
    /// Lines available in the current row group and how many went out.
    group_rows: usize,
    group_next: usize,
}

fn huff(tables: &[Option<HuffTable>; 4], index: usize) -> Result<&HuffTable, CodecError> {
    tables
        .get(index)
        .and_then(Option::as_ref)
        .ok_or(CodecError::NoHuffmanTable(index))
}

fn quant(tables: &Tables, index: usize) -> Result<&[u16; 64], CodecError> {
    tables
        .quant
        .get(index)
        .and_then(Option::as_ref)
        .ok_or(CodecError::NoQuantTable(index))
}

/// Make sure every table a scan will touch exists.
fn check_scan_tables(tables: &Tables, frame: &Frame, scan: &ScanHeader) -> Result<(), CodecError> {
    let progressive = frame.process == Process::Progressive;
    for &ci in &scan.comps {
        let comp = &frame.components[ci];
        if !progressive || (scan.ss == 0 && scan.ah == 0) {
            let dc = huff(&tables.dc, comp.dc_table)?;
            if !dc.usable_for_dc() {
                return Err(CodecError::BadHuffmanTable);
            }
        }
        if !progressive || scan.ss > 0 {
            huff(&tables.ac, comp.ac_table)?;
        }
    }
    Ok(())
}

/// Decode one block of a buffered scan.
fn decode_buffered_block(
    st: &mut EntropyState,
    input: &mut Input,
    tables: &Tables,
    frame: &Frame,
    scan: &ScanHeader,
    ci: usize,
    block: &mut [i16; 64],
) -> Result<(), CodecError> {
    let comp = &frame.components[ci];
    if frame.process != Process::Progressive {
        *block = [0; 64];
        return entropy::decode_block(
            st,
            input,
            huff(&tables.dc, comp.dc_table)?,
            huff(&tables.ac, comp.ac_table)?,
            ci,
            block,
        );
    }
    match (scan.ss, scan.ah) {
        (0, 0) => entropy::decode_dc_first(
            st,
            input,
            huff(&tables.dc, comp.dc_table)?,
            ci,
            scan.al,
            block,
        ),
        (0, _) => entropy::decode_dc_refine(st, input, scan.al, block),
        (_, 0) => entropy::decode_ac_first(
            st,
            input,
            huff(&tables.ac, comp.ac_table)?,
            scan.ss,
            scan.se,
            scan.al,
            block,
        ),
        _ => entropy::decode_ac_refine(
            st,
            input,
            huff(&tables.ac, comp.ac_table)?,
            scan.ss,
            scan.se,
            scan.al,
            block,
        ),
    }
}

/// Read one whole scan into the coefficient buffer.
fn decode_scan_buffered(
    input: &mut Input,
    tables: &Tables,
    frame: &Frame,
    scan: &ScanHeader,
    coefs: &mut CoefBuffer,
) -> Result<(), CodecError> {
    check_scan_tables(tables, frame, scan)?;
    if frame.process == Process::Progressive {
        coefs.track(scan, &mut input.err);
    }
    let ri = tables.restart_interval;
    let mut st = EntropyState::new(ri);

    if scan.comps.len() == 1 {
        let ci = scan.comps[0];
        let comp = &frame.components[ci];
        let bw = frame.padded_blocks_w(ci);
        for by in 0..comp.height_in_blocks {
            for bx in 0..comp.width_in_blocks {
                st.before_mcu(ri, input)?;
                let block = &mut coefs.blocks[ci][by * bw + bx];
                decode_buffered_block(&mut st, input, tables, frame, scan, ci, block)?;
            }
        }
    } else {
        for my in 0..frame.mcus_y {
            for mx in 0..frame.mcus_x {
                st.before_mcu(ri, input)?;
                for &ci in &scan.comps {
                    let comp = &frame.components[ci];
                    let bw = frame.padded_blocks_w(ci);
                    for by in 0..comp.v {
                        for bx in 0..comp.h {
                            let idx = (my * comp.v + by) * bw + mx * comp.h + bx;
                            let block = &mut coefs.blocks[ci][idx];
                            decode_buffered_block(&mut st, input, tables, frame, scan, ci, block)?;
                        }
                    }
                }
            }
        }
    }
    st.finish_scan(input);
    Ok(())
}

impl Engine {
    /// Produce the next MCU row into the planes.
    fn fill_group(
        &mut self,
        input: &mut Input,
        tables: &Tables,
        frame: &Frame,
        output_height: usize,
    ) -> Result<(), CodecError> {
        let n = self.idct.size();
        let m = self.mcu_row;
        let Self {
            source,
            planes,
            idct,
            ..
        } = self;

        match source {
            BlockSource::Streaming { scan, st } => {
                let ri = tables.restart_interval;
                for mx in 0..frame.mcus_x {
                    st.before_mcu(ri, input)?;
                    for &ci in &scan.comps {
                        let comp = &frame.components[ci];
                        let dc = huff(&tables.dc, comp.dc_table)?;
                        let ac = huff(&tables.ac, comp.ac_table)?;
                        let q = quant(tables, comp.tq)?;
                        let plane = &mut planes[ci];
                        for by in 0..comp.v {
                            for bx in 0..comp.h {
                                let mut block = [0i16; 64];
                                entropy::decode_block(st, input, dc, ac, ci, &mut block)?;
                                let at = by * n * plane.stride + (mx * comp.h + bx) * n;
                                idct.transform(&block, q, &mut plane.data[at..], plane.stride);
                            }
                        }
                    }
                }
            }
            BlockSource::Buffered(coefs) => {
                for (ci, comp) in frame.components.iter().enumerate() {
                    let q = quant(tables, comp.tq)?;
                    let bw = frame.padded_blocks_w(ci);
                    let plane = &mut planes[ci];
                    for by in 0..comp.v {
                        let row = (m * comp.v + by) * bw;
                        for bx in 0..bw {
                            let at = by * n * plane.stride + bx * n;
                            let block = &coefs.blocks[ci][row + bx];
                            idct.transform(block, q, &mut plane.data[at..], plane.stride);
                        }
                    }
                }
            }
        }

        let first_line = m * frame.max_v * n;
        self.group_rows = (frame.max_v * n).min(output_height.saturating_sub(first_line));
        self.group_next = 0;
        self.mcu_row += 1;
        Ok(())
    }

    /// Upsample, color convert and write line `i` of the current group.
    fn emit_line(&self, i: usize, frame: &Frame, width: usize, out: &mut [u8]) {
        let oc = self.converter.out_components();
        let mut px = [0u8; 4];
        for (x, dst) in out.chunks_exact_mut(oc).take(width).enumerate() {
            for (c, plane) in self.planes.iter().enumerate() {
                let sy = i * plane.v / frame.max_v;
                let sx = x * plane.h / frame.max_h;
                px[c] = plane.data[sy * plane.stride + sx];
            }
            self.converter.convert(&px, dst);
        }
    }
}

/// Pull-style JPEG decompressor.
pub struct Decompressor {
    input: Input,
    tables: Tables,
    frame: Option<Frame>,
    markers: MarkerState,
    /// First scan, read by the header pass.
    scan: Option<ScanHeader>,
    state: State,
    eoi_reached: bool,
    jpeg_color_space: JColorSpace,
    out_color_space: JColorSpace,
    scale_denom: u32,
    dct_method: DctMethod,
    /// Actual divisor, a power of two.
    block_scale: u32,
    output_width: u32,
    output_height: u32,
    output_components: usize,
    output_scanline: u32,
    engine: Option<Engine>,
}

impl Decompressor {
    /// Create a decompressor reading from `src`.
    pub fn new(src: Box<dyn DataSource>, trace_level: u8) -> Self {
        Self {
            input: Input::new(src, trace_level),
            tables: Tables::default(),
            frame: None,
            markers: MarkerState::default(),
            scan: None,
            state: State::Start,
            eoi_reached: false,
            jpeg_color_space: JColorSpace::Unknown,
            out_color_space: JColorSpace::Unknown,
            scale_denom: 1,
            dct_method: DctMethod::IntegerSlow,
            block_scale: 1,
            output_width: 0,
            output_height: 0,
            output_components: 0,
            output_scanline: 0,
            engine: None,
        }
    }

    /// Keep up to `limit` bytes of every `code` segment seen from now on.
    pub fn save_markers(&mut self, code: u8, limit: usize) {
        self.markers.save_rules.retain(|(c, _)| *c != code);
        if limit > 0 {
            self.markers.save_rules.push((code, limit));
        }
    }

    fn reader(&mut self) -> MarkerReader<'_> {
        MarkerReader {
            input: &mut self.input,
            tables: &mut self.tables,
            frame: &mut self.frame,
            markers: &mut self.markers,
        }
    }

    /// Read everything up to the first scan.
    pub fn read_header(&mut self) -> Result<(), CodecError> {
        if self.state != State::Start {
            return Err(CodecError::BadState("header already read"));
        }
        self.input.first_marker()?;
        match self.reader().read_markers()? {
            MarkerEvent::Scan(scan) => self.scan = Some(scan),
            MarkerEvent::Eoi => return Err(CodecError::NoImage),
        }
        let frame = self.frame.as_ref().ok_or(CodecError::NoImage)?;
        self.jpeg_color_space = JColorSpace::detect(&frame.components, &self.markers);
        self.out_color_space = self.jpeg_color_space.default_output();
        self.state = State::HeaderRead;
        self.calc_output_dimensions()
    }

    pub fn image_width(&self) -> u32 {
        self.frame.as_ref().map_or(0, |f| f.width as u32)
    }

    pub fn image_height(&self) -> u32 {
        self.frame.as_ref().map_or(0, |f| f.height as u32)
    }

    pub fn num_components(&self) -> usize {
        self.frame.as_ref().map_or(0, |f| f.components.len())
    }

    pub fn process(&self) -> Option<Process> {
        self.frame.as_ref().map(|f| f.process)
    }

    /// Color space of the stored samples.
    pub fn jpeg_color_space(&self) -> JColorSpace {
        self.jpeg_color_space
    }

    pub fn out_color_space(&self) -> JColorSpace {
        self.out_color_space
    }

    pub fn set_out_color_space(&mut self, cs: JColorSpace) {
        self.out_color_space = cs;
    }

    /// Request output at 1/`denom` size. Rounded down to 1, 2, 4 or 8.
    pub fn set_scale(&mut self, denom: u32) {
        self.scale_denom = denom;
    }

    pub fn set_dct_method(&mut self, method: DctMethod) {
        self.dct_method = method;
    }

    pub fn saved_markers(&self) -> &[SavedMarker] {
        &self.markers.saved
    }

    /// Work out output size and components for the current parameters.
    pub fn calc_output_dimensions(&mut self) -> Result<(), CodecError> {
        if self.state != State::HeaderRead {
            return Err(CodecError::BadState("output dimensions outside header state"));
        }
        let scale = match self.scale_denom {
            0..=1 => 1,
            2..=3 => 2,
            4..=7 => 4,
            _ => 8,
        };
        let frame = self.frame.as_ref().ok_or(CodecError::NoImage)?;
        let (w, h) = (frame.width as u32, frame.height as u32);
        Converter::new(self.jpeg_color_space, self.out_color_space)?;
        self.block_scale = scale;
        self.output_width = w.div_ceil(scale);
        self.output_height = h.div_ceil(scale);
        self.output_components = self.out_color_space.components();
        Ok(())
    }

    pub fn output_width(&self) -> u32 {
        self.output_width
    }

    pub fn output_height(&self) -> u32 {
        self.output_height
    }

    pub fn output_components(&self) -> usize {
        self.output_components
    }

    pub fn output_scanline(&self) -> u32 {
        self.output_scanline
    }

    /// The divisor actually in effect.
    pub fn block_scale(&self) -> u32 {
        self.block_scale
    }

    /// Rows worth asking for per read. Always one here.
    pub fn rec_outbuf_height(&self) -> usize {
        1
    }

    pub fn err(&self) -> &ErrorContext {
        &self.input.err
    }

    pub fn err_mut(&mut self) -> &mut ErrorContext {
        &mut self.input.err
    }

    /// Set up output. Multi-scan images are read in full here.
    pub fn start_decompress(&mut self) -> Result<(), CodecError> {
        self.calc_output_dimensions()?;
        let n = (8 / self.block_scale) as usize;
        let converter = Converter::new(self.jpeg_color_space, self.out_color_space)?;
        let scan = self
            .scan
            .take()
            .ok_or(CodecError::BadState("no pending scan"))?;

        self.input.err.set_scale(self.block_scale);
        self.input.err.set_position(0);

        let frame = self.frame.as_ref().ok_or(CodecError::NoImage)?;
        let mut planes = Vec::with_capacity(frame.components.len());
        for (ci, comp) in frame.components.iter().enumerate() {
            let stride = frame.padded_blocks_w(ci) * n;
            let len = stride * comp.v * n;
            let mut data = Vec::new();
            data.try_reserve_exact(len)
                .map_err(|_| CodecError::OutOfMemory)?;
            data.resize(len, 0);
            planes.push(Plane {
                data,
                stride,
                h: comp.h,
                v: comp.v,
            });
        }

        let streaming =
            frame.process != Process::Progressive && scan.comps.len() == frame.components.len();
        let source = if streaming {
            check_scan_tables(&self.tables, frame, &scan)?;
            self.input.err.trace(1, "single-scan image, streaming");
            BlockSource::Streaming {
                scan,
                st: EntropyState::new(self.tables.restart_interval),
            }
        } else {
            self.input.err.trace(1, "multi-scan image, buffering coefficients");
            let mut coefs = CoefBuffer::new(frame)?;
            self.absorb(scan, &mut coefs)?;
            BlockSource::Buffered(coefs)
        };

        self.engine = Some(Engine {
            source,
            planes,
            idct: Idct::new(self.dct_method, n),
            converter,
            mcu_row: 0,
            group_rows: 0,
            group_next: 0,
        });
        self.output_scanline = 0;
        self.state = State::Scanning;
        Ok(())
    }

    /// Read every remaining scan into `coefs`.
    fn absorb(&mut self, first: ScanHeader, coefs: &mut CoefBuffer) -> Result<(), CodecError> {
        let mut next = Some(first);
        while let Some(scan) = next.take() {
            {
                let frame = self.frame.as_ref().ok_or(CodecError::SosNoSof)?;
                decode_scan_buffered(&mut self.input, &self.tables, frame, &scan, coefs)?;
            }
            match self.reader().read_markers()? {
                MarkerEvent::Scan(s) => next = Some(s),
                MarkerEvent::Eoi => self.eoi_reached = true,
            }
        }
        Ok(())
    }

    /// Decode up to `max_lines` scanlines into `out`, rows `stride` bytes apart.
    /// Returns how many were produced.
    pub fn read_scanlines(
        &mut self,
        out: &mut [u8],
        stride: usize,
        max_lines: usize,
    ) -> Result<usize, CodecError> {
        if self.state != State::Scanning {
            return Err(CodecError::BadState("read_scanlines before start_decompress"));
        }
        if self.output_scanline >= self.output_height {
            self.input.err.trace(1, "application asked for more scanlines than exist");
            return Ok(0);
        }
        let width = self.output_width as usize;
        let row_bytes = width * self.output_components;
        if stride < row_bytes || out.len() < row_bytes {
            return Ok(0);
        }
        let fit = (out.len() - row_bytes) / stride + 1;

        let engine = self
            .engine
            .as_mut()
            .ok_or(CodecError::BadState("no output engine"))?;
        let frame = self.frame.as_ref().ok_or(CodecError::SosNoSof)?;
        if engine.group_next >= engine.group_rows {
            engine.fill_group(
                &mut self.input,
                &self.tables,
                frame,
                self.output_height as usize,
            )?;
        }
        let lines = max_lines
            .min(fit)
            .min(engine.group_rows - engine.group_next);
        for i in 0..lines {
            let row = &mut out[i * stride..i * stride + row_bytes];
            engine.emit_line(engine.group_next + i, frame, width, row);
        }
        engine.group_next += lines;
        self.output_scanline += lines as u32;
        self.input.err.set_position(self.output_scanline);
        Ok(lines)
    }

    /// Wrap up after the last scanline: read through to EOI.
    pub fn finish_decompress(&mut self) -> Result<(), CodecError> {
        if self.state != State::Scanning || self.output_scanline < self.output_height {
            return Err(CodecError::BadState("finish before all scanlines were read"));
        }
        if let Some(Engine {
            source: BlockSource::Streaming { st, .. },
            ..
        }) = self.engine.as_mut()
        {
            st.finish_scan(&mut self.input);
        }
        self.engine = None;
        while !self.eoi_reached {
            match self.reader().read_markers()? {
                MarkerEvent::Eoi => self.eoi_reached = true,
                MarkerEvent::Scan(_) => self.skip_entropy_data()?,
            }
        }
        self.state = State::Done;
        Ok(())
    }

    /// Skip an entropy-coded segment we have no use for.
    fn skip_entropy_data(&mut self) -> Result<(), CodecError> {
        loop {
            if self.input.read_u8()? != 0xFF {
                continue;
            }
            let mut b = self.input.read_u8()?;
            while b == 0xFF {
                b = self.input.read_u8()?;
            }
            if b != 0 && !(RST0..=RST7).contains(&b) {
                self.input.unread_marker = Some(b);
                return Ok(());
            }
        }
    }

    /// Give up on the image. Releases all decoding state.
    pub fn abort(&mut self) {
        self.engine = None;
        self.scan = None;
        self.state = State::Done;
    }
}
