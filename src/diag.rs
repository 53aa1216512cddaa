//! Codec diagnostics: fatal faults and recoverable warnings.
//!
//! Everything the codec wants to complain about goes through here.
//! - Fatal conditions are [`CodecError`]s. They travel up with `?` and
//!   end the current decode or encode at the public operation boundary.
//! - Recoverable conditions are [`Warning`]s. They are handed to an
//!   [`ErrorContext`], which counts them, decides whether to surface
//!   them in the log, and remembers how far the output had got.

use std::fmt::Display;

use thiserror::Error;

/// A fatal codec condition. The operation that hit it is abandoned.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The input had no bytes at all.
    #[error("empty input file")]
    InputEmpty,

    /// The first two bytes were not SOI.
    #[error("not a JPEG file: starts with {0:#04x} {1:#04x}")]
    NotJpeg(u8, u8),

    /// The datastream ended (EOI) before any image.
    #[error("JPEG datastream contains no image")]
    NoImage,

    /// A frame type (lossless, arithmetic, hierarchical) we don't do.
    #[error("unsupported JPEG process: SOF type {0:#04x}")]
    UnsupportedProcess(u8),

    /// Only 8-bit samples are supported.
    #[error("unsupported JPEG data precision {0}")]
    BadPrecision(u8),

    /// A marker segment declared a length that cannot be right.
    #[error("bogus marker length {0}")]
    BadLength(u16),

    /// Frame header component count out of range.
    #[error("bogus number of components: {0}")]
    BadComponentCount(usize),

    /// Sampling factors outside 1..=4.
    #[error("bogus sampling factors {h}x{v}")]
    BadSampling { h: u8, v: u8 },

    /// A scan referenced a component the frame does not have.
    #[error("invalid component ID {0} in SOS")]
    BadComponentId(u8),

    /// DQT table index out of range.
    #[error("bogus DQT index {0}")]
    BadDqtIndex(u8),

    /// DHT table index or class out of range.
    #[error("bogus DHT index {0:#04x}")]
    BadDhtIndex(u8),

    /// DHT counts or symbols that cannot form a Huffman code.
    #[error("bogus Huffman table definition")]
    BadHuffmanTable,

    /// A component uses a quantization table that was never defined.
    #[error("quantization table {0:#04x} was not defined")]
    NoQuantTable(usize),

    /// A scan uses a Huffman table that was never defined.
    #[error("Huffman table {0:#04x} was not defined")]
    NoHuffmanTable(usize),

    /// Spectral selection or successive approximation makes no sense.
    #[error("invalid progressive parameters Ss={ss} Se={se} Ah={ah} Al={al}")]
    BadProgression { ss: u8, se: u8, ah: u8, al: u8 },

    /// More than one frame header.
    #[error("invalid JPEG file structure: two SOF markers")]
    SofDuplicate,

    /// A scan before the frame header.
    #[error("invalid JPEG file structure: SOS before SOF")]
    SosNoSof,

    /// The frame declares a zero dimension.
    #[error("empty JPEG image ({width}x{height})")]
    EmptyImage { width: u16, height: u16 },

    /// The requested output color space cannot be produced from the input.
    #[error("unsupported color conversion request")]
    ConversionNotImplemented,

    /// The source was asked to skip past what it holds.
    #[error("skip of {requested} bytes exceeds the {available} buffered bytes")]
    SkipOverrun { requested: usize, available: usize },

    /// A codec call was made in the wrong state.
    #[error("improper call to JPEG library in state {0}")]
    BadState(&'static str),

    /// A codec buffer could not be allocated.
    #[error("insufficient memory")]
    OutOfMemory,

    /// The encoder was handed an image it cannot take.
    #[error("image too big for the encoder ({width}x{height})")]
    ImageTooBig { width: usize, height: usize },

    /// Reading the source or writing the destination failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The entropy coder of the encoder failed.
    #[error("encoder: {0}")]
    Encoder(#[from] jpeg_encoder::EncodingError),
}

/// A recoverable corrupt-data condition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Warning {
    /// The source ran dry; a fake EOI was inserted.
    #[error("premature end of JPEG file")]
    JpegEof,

    /// Entropy data ran into a marker before the scan was complete.
    #[error("corrupt JPEG data: premature end of data segment")]
    HitMarker,

    /// A Huffman code that is not in the table.
    #[error("corrupt JPEG data: bad Huffman code")]
    BadHuffmanCode,

    /// Garbage between the end of a segment and the next marker.
    #[error("corrupt JPEG data: {0} extraneous bytes before marker")]
    ExtraneousData(usize),

    /// A restart marker was missing or out of sequence.
    #[error("corrupt JPEG data: found marker {found:#04x} instead of RST{expected}")]
    MustResync { found: u8, expected: u8 },

    /// A sequential scan with progressive-looking parameters.
    #[error("invalid SOS parameters for sequential JPEG")]
    NotSequential,

    /// A refinement scan without the scan it refines.
    #[error("inconsistent progression sequence for component {component} coefficient {coef}")]
    BogusProgression { component: usize, coef: usize },
}

/// Verbosity at which every warning is surfaced, not just the first one.
pub const TRACE_ALL_WARNINGS: u8 = 3;

/// Central dispatch for codec diagnostics.
///
/// One of these lives in each decoder. It tracks the output scanline the
/// decoder has reached so that a warning can be pinned to a position:
/// the last valid row is that position in native rows, i.e. multiplied
/// by the active scale divisor.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// Warnings seen so far, surfaced or not.
    num_warnings: u32,
    /// 0 = only the first warning, >= 3 = every warning, plus traces up to this level.
    trace_level: u8,
    /// Native row reached when the most recent warning fired.
    last_valid_row: Option<u32>,
    /// Output scanlines produced so far.
    output_scanline: u32,
    /// Active scale divisor.
    scale_denom: u32,
    /// The first warning, kept for callers that want the reason.
    first: Option<Warning>,
    /// Input ran out or hit a marker; rows past here are padding.
    exhausted: bool,
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ErrorContext {
    /// Create a context with the given verbosity.
    pub fn new(trace_level: u8) -> Self {
        Self {
            num_warnings: 0,
            trace_level,
            last_valid_row: None,
            output_scanline: 0,
            scale_denom: 1,
            first: None,
            exhausted: false,
        }
    }

    /// Forget everything about the previous operation but keep the verbosity.
    pub fn reset(&mut self) {
        *self = Self::new(self.trace_level);
    }

    /// Record a warning.
    ///
    /// Only the first warning of an operation is surfaced at `warn` level
    /// unless the trace level asks for all of them. All of them count.
    /// Each one moves the last valid row to the current position, until
    /// the entropy data has run out: after that the row stays put.
    pub fn warn(&mut self, warning: Warning) {
        if self.num_warnings == 0 || self.trace_level >= TRACE_ALL_WARNINGS {
            tracing::warn!(
                row = self.output_scanline,
                "JPEG warning: {warning}"
            );
        } else {
            tracing::debug!(
                row = self.output_scanline,
                "JPEG warning (suppressed): {warning}"
            );
        }
        self.num_warnings += 1;
        if !self.exhausted {
            let row = self.output_scanline as u64 * self.scale_denom as u64;
            self.last_valid_row = Some(row.min(u32::MAX as u64) as u32);
        }
        if matches!(warning, Warning::JpegEof | Warning::HitMarker) {
            self.exhausted = true;
        }
        if self.first.is_none() {
            self.first = Some(warning);
        }
    }

    /// Emit a trace message if the verbosity permits it.
    pub fn trace(&self, level: u8, message: impl Display) {
        if self.trace_level >= level {
            tracing::trace!(level, "{message}");
        }
    }

    /// Move the output cursor. Called by the decoder as scanlines go out.
    pub fn set_position(&mut self, output_scanline: u32) {
        self.output_scanline = output_scanline;
    }

    /// Set the active scale divisor (1, 2, 4 or 8).
    pub fn set_scale(&mut self, scale_denom: u32) {
        self.scale_denom = scale_denom.max(1);
    }

    /// Number of warnings so far.
    pub fn num_warnings(&self) -> u32 {
        self.num_warnings
    }

    /// Native row reached at the last warning, `None` if nothing went wrong.
    pub fn last_valid_row(&self) -> Option<u32> {
        self.last_valid_row
    }

    /// The first warning of the operation, if any.
    pub fn first_warning(&self) -> Option<&Warning> {
        self.first.as_ref()
    }

    /// Current verbosity.
    pub fn trace_level(&self) -> u8 {
        self.trace_level
    }

    /// Change the verbosity.
    pub fn set_trace_level(&mut self, level: u8) {
        self.trace_level = level;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_warnings_means_fully_valid() {
        let ctx = ErrorContext::new(0);
        assert_eq!(ctx.num_warnings(), 0);
        assert_eq!(ctx.last_valid_row(), None);
        assert!(ctx.first_warning().is_none());
    }

    #[test]
    fn every_warning_counts_and_moves_the_row() {
        let mut ctx = ErrorContext::new(0);
        ctx.set_scale(4);
        ctx.set_position(3);
        ctx.warn(Warning::BadHuffmanCode);
        assert_eq!(ctx.last_valid_row(), Some(12));
        ctx.set_position(5);
        ctx.warn(Warning::ExtraneousData(2));
        assert_eq!(ctx.num_warnings(), 2);
        assert_eq!(ctx.last_valid_row(), Some(20));
        // The first one is the one we keep as the reason.
        assert_eq!(ctx.first_warning(), Some(&Warning::BadHuffmanCode));
    }

    #[test]
    fn row_stops_moving_once_the_data_runs_out() {
        let mut ctx = ErrorContext::new(0);
        ctx.set_scale(2);
        ctx.set_position(6);
        ctx.warn(Warning::JpegEof);
        ctx.set_position(40);
        ctx.warn(Warning::MustResync {
            found: 0xD9,
            expected: 0xD3,
        });
        ctx.set_position(72);
        ctx.warn(Warning::BadHuffmanCode);
        assert_eq!(ctx.num_warnings(), 3);
        assert_eq!(ctx.last_valid_row(), Some(12));
    }

    #[test]
    fn premature_marker_also_freezes_the_row() {
        let mut ctx = ErrorContext::new(0);
        ctx.set_position(16);
        ctx.warn(Warning::HitMarker);
        ctx.set_position(32);
        ctx.warn(Warning::JpegEof);
        assert_eq!(ctx.last_valid_row(), Some(16));
    }

    #[test]
    fn reset_keeps_verbosity() {
        let mut ctx = ErrorContext::new(TRACE_ALL_WARNINGS);
        ctx.warn(Warning::JpegEof);
        ctx.reset();
        assert_eq!(ctx.num_warnings(), 0);
        assert_eq!(ctx.last_valid_row(), None);
        ctx.set_position(8);
        ctx.warn(Warning::BadHuffmanCode);
        assert_eq!(ctx.last_valid_row(), Some(8));
        assert_eq!(ctx.trace_level(), TRACE_ALL_WARNINGS);
    }
}
