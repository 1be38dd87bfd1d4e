// RTP header extension stripping
//
// Voice packets sometimes arrive with a one-byte-header RTP extension block
// still attached in front of the Opus frame. The block starts with the 0xBEDE
// profile marker, followed by a big-endian element count. Each element's
// length is the low nibble of its first byte plus 2. Zero padding may follow.

const EXTENSION_MARKER: [u8; 2] = [0xBE, 0xDE];
const ELEMENTS_START: usize = 4;

/// Whether `payload` starts with an RTP extension block
pub fn has_extension_header(payload: &[u8]) -> bool {
    payload.len() > ELEMENTS_START && payload[..2] == EXTENSION_MARKER
}

/// Offset of the first byte after the extension block and its padding
pub fn extension_header_len(payload: &[u8]) -> usize {
    let elements = u16::from_be_bytes([payload[2], payload[3]]) as usize;
    let mut offset = ELEMENTS_START;

    for _ in 0..elements {
        if offset >= payload.len() {
            break;
        }
        offset += (payload[offset] & 0x0f) as usize + 2;
    }

    while offset < payload.len() && payload[offset] == 0 {
        offset += 1;
    }

    offset.min(payload.len())
}

/// Return the payload with any RTP extension block removed
pub fn strip_extension_header(payload: &[u8]) -> &[u8] {
    if !has_extension_header(payload) {
        return payload;
    }
    &payload[extension_header_len(payload)..]
}
