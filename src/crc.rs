/// Reflected IEEE 802.3 polynomial (bit-reversed 0x04C11DB7).
pub const POLYNOMIAL: u32 = 0xEDB88320;

/// CRC32 using the IEEE 802.3 polynomial, processed bit by bit, LSB first.
///
/// The register is complemented on entry and on exit, so the result of one call can be passed as
/// `seed` to the next one to checksum a message in pieces. A `seed` of 0 starts a new checksum,
/// which makes this compatible with zlib's `crc32()` and the ESP ROM `crc32_le()`.
pub fn crc32(seed: u32, data: &[u8]) -> u32 {
    let mut crc = !seed;

    for &byte in data {
        crc ^= byte as u32;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ POLYNOMIAL;
            } else {
                crc >>= 1;
            }
        }
    }

    !crc
}
