/// Decoder for the oscilloscope capture reply: a handful of ASCII metadata
/// lines followed by a TMC binary block (`#<digit-count><length><bytes>`,
/// optionally a trailing terminator). The instrument streams the reply across
/// many chunks, so decoding is incremental over an accumulating buffer.
use benchsrv_protocol::WaveformCapture;

use crate::Error;

/// Readings beyond this magnitude are the instrument's overflow sentinel.
const OVERFLOW_LIMIT: f64 = 1e30;

/// Horizontal divisions on the scope display, used to derive the time scale.
const HORIZONTAL_DIVS: f64 = 10.0;

/// Scaling fields of the `:WAV:PRE?` reply. The preamble is comma-separated
/// with at least ten fields; only four of them matter for reconstruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Preamble {
    pub x_increment: f64,
    pub y_increment: f64,
    pub y_origin: f64,
    pub y_reference: f64,
}

impl Preamble {
    pub fn parse(line: &str) -> crate::Result<Self> {
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() < 10 {
            return Err(Error::malformed(format!(
                "preamble has {} fields, expected at least 10",
                fields.len()
            )));
        }
        let field = |idx: usize| -> crate::Result<f64> {
            fields[idx]
                .trim()
                .parse()
                .map_err(|_| Error::malformed(format!("preamble field {} is not numeric", idx)))
        };
        Ok(Preamble {
            x_increment: field(4)?,
            y_increment: field(7)?,
            y_origin: field(8)?,
            y_reference: field(9)?,
        })
    }
}

/// Parse a scalar measurement line. Overflow sentinels and unparseable text
/// normalize to 0.0 so downstream consumers never see NaN or 9.9e37.
pub fn normalize_measurement(line: &str) -> f64 {
    match line.trim().parse::<f64>() {
        Ok(x) if x.is_finite() && x.abs() <= OVERFLOW_LIMIT => x,
        _ => 0.0,
    }
}

struct BlockLocation {
    /// End of the ASCII metadata preceding `#`.
    text_end: usize,
    payload_start: usize,
    payload_len: usize,
}

enum Scan {
    /// Header not fully buffered yet; keep accumulating.
    Incomplete,
    Found(BlockLocation),
}

/// Locate the binary block header in the accumulated reply. The length
/// grammar is `#` + one ASCII digit N + N decimal digits of payload length.
fn find_block(rx: &[u8]) -> crate::Result<Scan> {
    let begin = match rx.iter().position(|x| *x == b'#') {
        Some(x) => x,
        None => return Ok(Scan::Incomplete),
    };
    if rx.len() < begin + 2 {
        return Ok(Scan::Incomplete);
    }
    let num_digits = (rx[begin + 1] as char)
        .to_digit(10)
        .ok_or_else(|| Error::malformed("block digit count is not a digit"))?
        as usize;
    if num_digits == 0 {
        return Err(Error::malformed("indefinite-length block is not supported"));
    }
    if rx.len() < begin + 2 + num_digits {
        return Ok(Scan::Incomplete);
    }
    let length_text = std::str::from_utf8(&rx[begin + 2..begin + 2 + num_digits])
        .map_err(|_| Error::malformed("block length is not ASCII"))?;
    let payload_len = length_text
        .parse::<usize>()
        .map_err(|_| Error::malformed("block length is not a decimal integer"))?;
    Ok(Scan::Found(BlockLocation {
        text_end: begin,
        payload_start: begin + 2 + num_digits,
        payload_len,
    }))
}

/// Incremental decoder. Push chunks as they arrive; `try_decode` reports
/// whether the buffer holds a complete capture yet. Grammar violations are
/// terminal; the caller discards the decoder and the buffered bytes with it.
pub struct WaveformDecoder {
    buf: Vec<u8>,
}

impl WaveformDecoder {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// `Ok(None)` means keep buffering. A trailing terminator byte after the
    /// payload is tolerated and ignored.
    pub fn try_decode(&self) -> crate::Result<Option<WaveformCapture>> {
        let loc = match find_block(&self.buf)? {
            Scan::Incomplete => return Ok(None),
            Scan::Found(x) => x,
        };
        if self.buf.len() < loc.payload_start + loc.payload_len {
            return Ok(None);
        }
        self.decode(&loc).map(Some)
    }

    fn decode(&self, loc: &BlockLocation) -> crate::Result<WaveformCapture> {
        let text = String::from_utf8_lossy(&self.buf[..loc.text_end]);
        let lines: Vec<&str> = text
            .lines()
            .map(|x| x.trim())
            .filter(|x| !x.is_empty())
            .collect();
        if lines.len() < 4 {
            return Err(Error::malformed(format!(
                "expected 4 metadata lines before block, got {}",
                lines.len()
            )));
        }
        let voltage_scale = normalize_measurement(lines[0]);
        let vpp = normalize_measurement(lines[1]);
        let freq = normalize_measurement(lines[2]);
        let preamble = Preamble::parse(lines[3])?;

        let payload = &self.buf[loc.payload_start..loc.payload_start + loc.payload_len];
        let samples: Vec<f64> = payload
            .iter()
            .map(|raw| (*raw as f64 - preamble.y_reference) * preamble.y_increment + preamble.y_origin)
            .collect();
        let time_scale = preamble.x_increment * samples.len() as f64 / HORIZONTAL_DIVS;

        Ok(WaveformCapture {
            samples,
            time_scale,
            voltage_scale,
            voltage_offset: preamble.y_origin,
            vpp,
            freq,
        })
    }
}

impl Default for WaveformDecoder {
    fn default() -> Self {
        Self::new()
    }
}
