// Ogg page framing
//
// Every page is written whole: a 26-byte base header, the segment count, the
// lacing table and the payload. The checksum covers all of it with the
// checksum field zeroed.
//
// Layout (little-endian):
//   0  "OggS"
//   4  version (0)
//   5  flags
//   6  granule position (48 bits used, bytes 12-13 stay zero)
//   14 logical stream id
//   18 page sequence number
//   22 CRC-32
//   26 segment count, followed by the lacing values

use std::io::Write;

use crate::error::EncodeError;

/// Flag set on the first page of a logical stream
pub const BEGIN_OF_STREAM: u8 = 0x02;

/// Size of the fixed header, excluding the segment count byte
pub const BASE_HEADER_LEN: usize = 26;

/// Byte offset of the checksum field
pub const CHECKSUM_OFFSET: usize = 22;

const CAPTURE_PATTERN: &[u8; 4] = b"OggS";
const STREAM_VERSION: u8 = 0;
const MAX_SEGMENT_LEN: usize = 255;
const MAX_SEGMENTS: usize = 255;

/// Largest granule position the header can carry
pub const MAX_GRANULE: u64 = (1 << 48) - 1;

/// Largest payload whose lacing table still fits in one page
pub const MAX_PAYLOAD_LEN: usize = (MAX_SEGMENTS - 1) * MAX_SEGMENT_LEN + (MAX_SEGMENT_LEN - 1);

static CRC_TABLE: [u32; 256] = crc_table();

const fn crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut r = (i as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            r = if r & 0x8000_0000 != 0 {
                (r << 1) ^ 0x04C1_1DB7
            } else {
                r << 1
            };
            bit += 1;
        }
        table[i] = r;
        i += 1;
    }
    table
}

/// CRC-32 as used by Ogg (poly 0x04C11DB7, no reflection, zero init, no final xor)
pub fn checksum(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |crc, &byte| {
        (crc << 8) ^ CRC_TABLE[(((crc >> 24) as u8) ^ byte) as usize]
    })
}

/// Lacing values for a single packet of `len` bytes.
///
/// Full 255-byte segments followed by one shorter terminating segment, which is
/// zero when `len` is a multiple of 255 (including an empty packet).
pub fn lacing_values(len: usize) -> Vec<u8> {
    let mut table = vec![MAX_SEGMENT_LEN as u8; len / MAX_SEGMENT_LEN];
    table.push((len % MAX_SEGMENT_LEN) as u8);
    table
}

/// Assemble one complete page, checksum included
pub fn build_page(
    granule: u64,
    stream_id: u32,
    sequence: u32,
    payload: &[u8],
    flags: u8,
) -> Result<Vec<u8>, EncodeError> {
    if granule > MAX_GRANULE {
        return Err(EncodeError::GranuleOutOfRange(granule));
    }
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(EncodeError::PayloadTooLarge(payload.len()));
    }

    let lacing = lacing_values(payload.len());
    let mut page = Vec::with_capacity(BASE_HEADER_LEN + 1 + lacing.len() + payload.len());

    page.extend_from_slice(CAPTURE_PATTERN);
    page.push(STREAM_VERSION);
    page.push(flags);
    // granule < 2^48, so the two high bytes are zero
    page.extend_from_slice(&granule.to_le_bytes());
    page.extend_from_slice(&stream_id.to_le_bytes());
    page.extend_from_slice(&sequence.to_le_bytes());
    page.extend_from_slice(&[0u8; 4]);
    page.push(lacing.len() as u8);
    page.extend_from_slice(&lacing);
    page.extend_from_slice(payload);

    let crc = checksum(&page);
    page[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&crc.to_le_bytes());

    Ok(page)
}

/// Writes Ogg pages to a byte sink
pub struct PageWriter<W: Write> {
    sink: W,
    pages_written: u64,
}

impl<W: Write> PageWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            pages_written: 0,
        }
    }

    /// Build a page and append it to the sink in a single write
    pub fn write_page(
        &mut self,
        granule: u64,
        stream_id: u32,
        sequence: u32,
        payload: &[u8],
        flags: u8,
    ) -> Result<(), EncodeError> {
        let page = build_page(granule, stream_id, sequence, payload, flags)?;
        self.sink.write_all(&page)?;
        self.pages_written += 1;
        Ok(())
    }

    pub fn pages_written(&self) -> u64 {
        self.pages_written
    }

    pub fn flush(&mut self) -> Result<(), EncodeError> {
        self.sink.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // First page of a silent Ogg Opus file produced by libopus tooling
    const OPUS_HEAD_PAGE: [u8; 47] = [
        0x4f, 0x67, 0x67, 0x53, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x88,
        0x23, 0x54, 0x9b, 0x00, 0x00, 0x00, 0x00, 0x8e, 0xb3, 0x1d, 0x4a, 0x01, 0x13, 0x4f, 0x70,
        0x75, 0x73, 0x48, 0x65, 0x61, 0x64, 0x01, 0x01, 0x38, 0x01, 0x80, 0xbb, 0x00, 0x00, 0x00,
        0x00, 0x00,
    ];

    #[test]
    fn test_checksum_check_value() {
        assert_eq!(checksum(b"123456789"), 0x89a1_897f);
    }

    #[test]
    fn test_build_page_matches_reference_page() {
        let payload = &OPUS_HEAD_PAGE[28..];
        let page = build_page(0, 0x9b54_2388, 0, payload, BEGIN_OF_STREAM).unwrap();
        assert_eq!(page, OPUS_HEAD_PAGE.to_vec());
    }

    #[test]
    fn test_stored_checksum_recomputes() {
        let payload: Vec<u8> = (0..300u16).map(|i| (i % 251) as u8).collect();
        let page = build_page(123_456, 7, 42, &payload, 0).unwrap();

        let stored = u32::from_le_bytes(page[22..26].try_into().unwrap());
        let mut zeroed = page.clone();
        zeroed[22..26].fill(0);

        assert_eq!(checksum(&zeroed), stored);
    }

    #[test]
    fn test_lacing_table_for_boundary_lengths() {
        for len in [0usize, 1, 254, 255, 256, 509, 510] {
            let payload = vec![0xAAu8; len];
            let page = build_page(0, 1, 2, &payload, 0).unwrap();

            let segments = page[BASE_HEADER_LEN] as usize;
            let table = &page[BASE_HEADER_LEN + 1..BASE_HEADER_LEN + 1 + segments];

            assert_eq!(segments, len / 255 + 1, "segment count for {} bytes", len);
            assert_eq!(
                table.iter().map(|&v| v as usize).sum::<usize>(),
                len,
                "segments must add up to {} bytes",
                len
            );
            assert!(*table.last().unwrap() < 255, "packet of {} bytes must terminate", len);
            assert_eq!(page.len(), BASE_HEADER_LEN + 1 + segments + len);
        }
    }

    #[test]
    fn test_empty_payload_is_single_zero_segment() {
        let page = build_page(960, 3, 5, &[], 0).unwrap();
        assert_eq!(page.len(), BASE_HEADER_LEN + 2);
        assert_eq!(page[26], 1);
        assert_eq!(page[27], 0);
    }

    #[test]
    fn test_header_fields_layout() {
        let granule = 0x0000_1234_5678_9abc;
        let page = build_page(granule, 0x0102_0304, 0x0a0b_0c0d, &[1, 2, 3], BEGIN_OF_STREAM)
            .unwrap();

        assert_eq!(&page[0..4], b"OggS");
        assert_eq!(page[4], 0);
        assert_eq!(page[5], BEGIN_OF_STREAM);
        assert_eq!(&page[6..12], &[0xbc, 0x9a, 0x78, 0x56, 0x34, 0x12]);
        assert_eq!(&page[12..14], &[0, 0]);
        assert_eq!(&page[14..18], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&page[18..22], &[0x0d, 0x0c, 0x0b, 0x0a]);
        assert_eq!(&page[page.len() - 3..], &[1, 2, 3]);
    }

    #[test]
    fn test_granule_over_48_bits_rejected() {
        let result = build_page(1 << 48, 1, 0, &[], 0);
        assert!(matches!(result, Err(EncodeError::GranuleOutOfRange(_))));
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let payload = vec![0u8; MAX_PAYLOAD_LEN + 1];
        let result = build_page(0, 1, 0, &payload, 0);
        assert!(matches!(result, Err(EncodeError::PayloadTooLarge(_))));
        assert!(build_page(0, 1, 0, &payload[1..], 0).is_ok());
    }

    #[test]
    fn test_page_writer_appends_whole_pages() {
        let mut writer = PageWriter::new(Vec::new());
        writer.write_page(0, 1, 0, &[9; 10], BEGIN_OF_STREAM).unwrap();
        writer.write_page(960, 1, 1, &[], 0).unwrap();

        assert_eq!(writer.pages_written(), 2);
        let bytes = writer.into_inner();
        assert_eq!(bytes.len(), (27 + 1 + 10) + (27 + 1));
        assert_eq!(&bytes[38..42], b"OggS");
    }
}
