pub mod chunk;
pub mod encoder;
pub mod page;
pub mod rtp;

pub use chunk::{granule_from_elapsed, Chunk, NANOS_PER_SAMPLE, SAMPLE_RATE};
pub use encoder::{DirectoryEntry, MultiTrackEncoder, RecordingDetails, SessionPaths};
pub use page::{build_page, checksum, PageWriter, BEGIN_OF_STREAM};
