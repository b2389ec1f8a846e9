//! Rolling checksums for candidate block matching
//!
//! Both variants are Adler-32 style: two running sums `a` and `b` packed as
//! `(b << 16) | a`, with `a` seeded to 1. They differ only in the modulus.

/// Weak checksum over a sliding window
pub trait RollingChecksum: Send + Sync {
    /// Name persisted in signature metadata
    fn name(&self) -> &'static str;

    /// Checksum of an empty window
    fn init(&self) -> u32 {
        1
    }

    /// Checksum of an explicit window
    fn calculate(&self, window: &[u8]) -> u32;

    /// Slide the window forward by one byte.
    ///
    /// `window_len` is the length of the window both before and after the
    /// slide; `removed` leaves at the front and `added` enters at the back.
    fn roll(&self, checksum: u32, removed: u8, added: u8, window_len: usize) -> u32;
}

/// Octodiff-compatible Adler-32.
///
/// Sums wrap at 2^16 instead of reducing modulo 65521, so values diverge from
/// real Adler-32 once `b` exceeds 65520 (long runs of high bytes). Signatures
/// naming `Adler32` depend on this exact behaviour.
#[derive(Debug, Clone, Copy, Default)]
pub struct Adler32;

impl RollingChecksum for Adler32 {
    fn name(&self) -> &'static str {
        "Adler32"
    }

    fn calculate(&self, window: &[u8]) -> u32 {
        let mut a: u16 = 1;
        let mut b: u16 = 0;
        for &byte in window {
            a = a.wrapping_add(byte as u16);
            b = b.wrapping_add(a);
        }
        ((b as u32) << 16) | a as u32
    }

    fn roll(&self, checksum: u32, removed: u8, added: u8, window_len: usize) -> u32 {
        let mut a = (checksum & 0xffff) as u16;
        let mut b = (checksum >> 16) as u16;

        a = a.wrapping_sub(removed as u16).wrapping_add(added as u16);
        let weighted = (window_len as u16).wrapping_mul(removed as u16);
        b = b.wrapping_sub(weighted).wrapping_add(a).wrapping_sub(1);

        ((b as u32) << 16) | a as u32
    }
}

const MOD_ADLER: u32 = 65521;

/// Adler-32 with the proper 65521 modulus
#[derive(Debug, Clone, Copy, Default)]
pub struct Adler32V2;

impl RollingChecksum for Adler32V2 {
    fn name(&self) -> &'static str {
        "Adler32V2"
    }

    fn calculate(&self, window: &[u8]) -> u32 {
        let mut a: u32 = 1;
        let mut b: u32 = 0;
        for &byte in window {
            a = (a + byte as u32) % MOD_ADLER;
            b = (b + a) % MOD_ADLER;
        }
        (b << 16) | a
    }

    /// a_new = a_old - out + in
    /// b_new = b_old - n*out + a_new - 1
    fn roll(&self, checksum: u32, removed: u8, added: u8, window_len: usize) -> u32 {
        let a = checksum & 0xffff;
        let b = checksum >> 16;
        let old = removed as u32;
        let new = added as u32;

        let a = (a + MOD_ADLER - old + new) % MOD_ADLER;

        let weighted = ((window_len as u64 % MOD_ADLER as u64) * old as u64 + 1) % MOD_ADLER as u64;
        let b = (b as u64 + MOD_ADLER as u64 + a as u64 - weighted) % MOD_ADLER as u64;

        ((b as u32) << 16) | a
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOREM: &[u8] = b"Lorem ipsum dolor sit amet, consectetur adipiscing elit. \
        Duis malesuada turpis non libero faucibus sodales. Mauris eget justo est. Pellentesque.";

    #[test]
    fn test_adler32_reference_values() {
        let adler = Adler32;
        assert_eq!(adler.calculate(b"Adler32 checksum test"), 0x4ff9_07a1);
        assert_eq!(adler.calculate(b"Fast Rsync Fast Rsync"), 0x5206_079b);
        // wrapping at 2^16 diverges from real Adler-32 here
        assert_eq!(adler.calculate(&[b'~'; 32]), 0x0400_0fc1);
        assert_eq!(adler.calculate(LOREM), 0x2c2f_357d);
    }

    #[test]
    fn test_adler32_v2_reference_values() {
        let adler = Adler32V2;
        assert_eq!(adler.calculate(b"Adler32 checksum test"), 0x4ff9_07a1);
        assert_eq!(adler.calculate(b"Fast Rsync Fast Rsync"), 0x5206_079b);
        assert_eq!(adler.calculate(&[b'~'; 32]), 0x040f_0fc1);
        assert_eq!(adler.calculate(LOREM), 0x2d10_357d);
    }

    #[test]
    fn test_empty_window_is_init() {
        assert_eq!(Adler32.calculate(&[]), Adler32.init());
        assert_eq!(Adler32V2.calculate(&[]), Adler32V2.init());
    }

    fn assert_roll_matches_recalculation(algo: &dyn RollingChecksum, data: &[u8], window: usize) {
        let mut checksum = algo.calculate(&data[..window]);
        for start in 1..=data.len() - window {
            checksum = algo.roll(checksum, data[start - 1], data[start + window - 1], window);
            assert_eq!(
                checksum,
                algo.calculate(&data[start..start + window]),
                "{} diverged at offset {}",
                algo.name(),
                start
            );
        }
    }

    #[test]
    fn test_roll_matches_recalculation() {
        let data: Vec<u8> = (0..4096u32).map(|i| (i * 31 % 251) as u8).collect();
        for window in [1, 16, 128, 2048] {
            assert_roll_matches_recalculation(&Adler32, &data, window);
            assert_roll_matches_recalculation(&Adler32V2, &data, window);
        }
    }

    #[test]
    fn test_roll_over_high_bytes() {
        // Saturating input exercises the modular underflow paths
        let data = vec![0xffu8; 1024];
        assert_roll_matches_recalculation(&Adler32, &data, 512);
        assert_roll_matches_recalculation(&Adler32V2, &data, 512);

        let mixed: Vec<u8> = (0..1024).map(|i| if i % 2 == 0 { 0xff } else { 0 }).collect();
        assert_roll_matches_recalculation(&Adler32V2, &mixed, 31 * 1024 / 64);
    }

    #[test]
    fn test_different_content_changes_checksum() {
        assert_ne!(Adler32V2.calculate(&[0xAA; 32]), Adler32V2.calculate(&[0xBB; 32]));
        assert_ne!(Adler32.calculate(&[0xAA; 32]), Adler32.calculate(&[0xBB; 32]));
    }
}
