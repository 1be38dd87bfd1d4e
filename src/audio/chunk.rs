use std::time::Duration;

/// Voice transport sample rate in Hz
pub const SAMPLE_RATE: u64 = 48_000;

/// Duration of one sample at [`SAMPLE_RATE`], in nanoseconds
pub const NANOS_PER_SAMPLE: f64 = 20_833.333;

/// One raw audio packet from a speaker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Opus frame as received, possibly with an RTP extension block
    pub payload: Vec<u8>,
    /// Transport-assigned timestamp, in samples
    pub timestamp: u64,
    /// Position in the session clock, in samples
    pub granule: u64,
}

impl Chunk {
    pub fn new(payload: Vec<u8>, timestamp: u64) -> Self {
        Self {
            payload,
            timestamp,
            granule: 0,
        }
    }
}

/// Convert time elapsed since the session started into a granule position.
///
/// Whole seconds scale by the sample rate; the sub-second remainder is
/// divided by the per-sample duration and truncated.
pub fn granule_from_elapsed(elapsed: Duration) -> u64 {
    let whole = elapsed.as_secs() * SAMPLE_RATE;
    let fraction = (elapsed.subsec_nanos() as f64 / NANOS_PER_SAMPLE) as u64;
    whole + fraction
}
