//! Packet checksum
//!
//! The checksum is a wrapping byte sum over everything between the indicator
//! (offset 0) and the trailing checksum byte. A single flipped bit changes the
//! sum by a power of two below 256, so it can never cancel out.

/// Wrapping sum of `data`
pub fn compute_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Checksum of a whole framed packet, i.e. over bytes `[1, len - 2]`
///
/// Returns `None` for buffers too short to carry an indicator and a checksum.
pub fn packet_checksum(packet: &[u8]) -> Option<u8> {
    if packet.len() < 2 {
        return None;
    }
    Some(compute_checksum(&packet[1..packet.len() - 1]))
}

/// Whether the trailing checksum byte of `packet` is correct
pub fn verify_packet(packet: &[u8]) -> bool {
    match (packet_checksum(packet), packet.last()) {
        (Some(computed), Some(received)) => computed == *received,
        _ => false,
    }
}
