use embedded_storage::nor_flash::NorFlash;

/// Everything the store needs from the memory it lives in: the `NorFlash` driver primitives
/// (read, program, erase) and a CRC-32 implementation.
///
/// Byte addressable EEPROMs fit the same trait with `READ_SIZE`, `WRITE_SIZE` and `ERASE_SIZE`
/// of 1. See README.md for an example implementation.
pub trait Platform: Crc + NorFlash {}

impl<T: Crc + NorFlash> Platform for T {}

pub type FnCrc32 = fn(seed: u32, data: &[u8]) -> u32;

/// Chained CRC-32 (IEEE, reflected). A seed of 0 starts a new checksum.
///
/// The default implementation is the bit-serial software engine; override it if the target
/// has a ROM or hardware CRC unit with identical semantics.
pub trait Crc {
    fn crc32(seed: u32, data: &[u8]) -> u32 {
        crate::crc::crc32(seed, data)
    }
}

impl<T: Crc> Crc for &mut T {
    fn crc32(seed: u32, data: &[u8]) -> u32 {
        T::crc32(seed, data)
    }
}

pub trait AlignedOps: Platform {
    fn align_read_floor(offset: usize) -> usize {
        align_floor(offset, Self::READ_SIZE)
    }

    fn align_read_ceil(size: usize) -> usize {
        align_ceil(size, Self::READ_SIZE)
    }

    fn align_write_ceil(size: usize) -> usize {
        align_ceil(size, Self::WRITE_SIZE)
    }

    fn align_write_floor(size: usize) -> usize {
        align_floor(size, Self::WRITE_SIZE)
    }
}

#[inline(always)]
const fn align_ceil(size: usize, alignment: usize) -> usize {
    if alignment.is_power_of_two() {
        size.saturating_add(alignment - 1) & !(alignment - 1)
    } else {
        size.saturating_add(alignment - 1) / alignment * alignment
    }
}

#[inline(always)]
const fn align_floor(size: usize, alignment: usize) -> usize {
    if alignment.is_power_of_two() {
        size & !(alignment - 1)
    } else {
        size / alignment * alignment
    }
}

impl<T: Platform> AlignedOps for T {}

#[cfg(any(
    feature = "esp32",
    feature = "esp32s2",
    feature = "esp32s3",
    feature = "esp32c2",
    feature = "esp32c3",
    feature = "esp32c6",
    feature = "esp32h2",
))]
mod chip {
    use esp_storage::FlashStorage;

    use crate::platform::Crc;

    // The ROM routine uses the same complement-in/complement-out chaining as the software engine.
    impl Crc for FlashStorage<'_> {
        fn crc32(seed: u32, data: &[u8]) -> u32 {
            esp_hal::rom::crc::crc32_le(seed, data)
        }
    }
}
