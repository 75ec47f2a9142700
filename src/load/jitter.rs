use rand_core::{impls, RngCore, SeedableRng};

/// Seed words shared by every worker. Each process advances its own copy, so
/// the jitter sequences have the same shape but are not phase-locked.
pub const SEED_W: u32 = 0x6deb_3a92;
pub const SEED_Z: u32 = 0x189f_7245;

/// Marsaglia multiply-with-carry generator: two 16-bit lag-1 MWC streams
/// concatenated into one 32-bit word. Cheap and deterministic, not secure.
#[derive(Debug, Clone)]
pub struct Mwc {
    w: u32,
    z: u32,
}

impl Mwc {
    pub fn new(w: u32, z: u32) -> Self {
        // A zero half never leaves zero.
        Self {
            w: if w == 0 { SEED_W } else { w },
            z: if z == 0 { SEED_Z } else { z },
        }
    }
}

impl Default for Mwc {
    fn default() -> Self {
        Self::new(SEED_W, SEED_Z)
    }
}

impl RngCore for Mwc {
    fn next_u32(&mut self) -> u32 {
        self.z = 36969u32
            .wrapping_mul(self.z & 0xffff)
            .wrapping_add(self.z >> 16);
        self.w = 18000u32
            .wrapping_mul(self.w & 0xffff)
            .wrapping_add(self.w >> 16);
        (self.z << 16).wrapping_add(self.w)
    }

    fn next_u64(&mut self) -> u64 {
        impls::next_u64_via_u32(self)
    }

    fn fill_bytes(&mut self, dst: &mut [u8]) {
        impls::fill_bytes_via_next(self, dst)
    }
}

impl SeedableRng for Mwc {
    type Seed = [u8; 8];

    fn from_seed(seed: Self::Seed) -> Self {
        let w = u32::from_le_bytes([seed[0], seed[1], seed[2], seed[3]]);
        let z = u32::from_le_bytes([seed[4], seed[5], seed[6], seed[7]]);
        Self::new(w, z)
    }
}

/// Returns `+sec/10`, `-sec/10` or `0` picked from bits 3..4 of the next word:
/// 0 adds, 1 subtracts, 2 and 3 leave the duration alone.
pub fn jitter<R: RngCore>(rng: &mut R, sec: f64) -> f64 {
    match (rng.next_u32() >> 3) & 3 {
        0 => sec / 10.0,
        1 => -sec / 10.0,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic_same_seed() {
        let mut a = Mwc::new(SEED_W, SEED_Z);
        let mut b = Mwc::default();
        for _ in 0..256 {
            assert_eq!(a.next_u32(), b.next_u32());
        }
    }

    #[test]
    fn test_different_seeds_differ() {
        let mut a = Mwc::new(1, 2);
        let mut b = Mwc::new(2, 1);
        let xs: Vec<u32> = (0..16).map(|_| a.next_u32()).collect();
        let ys: Vec<u32> = (0..16).map(|_| b.next_u32()).collect();
        assert_ne!(xs, ys);
    }

    #[test]
    fn test_from_seed_matches_new() {
        let mut seed = [0u8; 8];
        seed[..4].copy_from_slice(&SEED_W.to_le_bytes());
        seed[4..].copy_from_slice(&SEED_Z.to_le_bytes());
        let mut a = Mwc::from_seed(seed);
        let mut b = Mwc::default();
        assert_eq!(a.next_u64(), b.next_u64());
    }

    #[test]
    fn test_zero_seed_is_replaced() {
        let mut rng = Mwc::new(0, 0);
        let words: Vec<u32> = (0..8).map(|_| rng.next_u32()).collect();
        assert!(words.iter().any(|&w| w != 0));
    }

    #[test]
    fn test_fill_bytes_length() {
        let mut rng = Mwc::default();
        for &size in &[0usize, 1, 3, 8, 17] {
            let mut buf = vec![0u8; size];
            rng.fill_bytes(&mut buf);
            assert_eq!(buf.len(), size);
        }
    }

    #[test]
    fn test_jitter_values_bounded() {
        let mut rng = Mwc::default();
        for &d in &[0.0, 0.001, 0.0625, 0.125, 1.0, 10.0] {
            for _ in 0..500 {
                let j = jitter(&mut rng, d);
                assert!(j == d / 10.0 || j == -d / 10.0 || j == 0.0, "jitter {} for {}", j, d);
                assert!(j.abs() <= d / 10.0);
            }
        }
    }

    #[test]
    fn test_jitter_hits_all_three_branches() {
        let mut rng = Mwc::default();
        let (mut plus, mut minus, mut zero) = (0, 0, 0);
        for _ in 0..4000 {
            let j = jitter(&mut rng, 1.0);
            if j > 0.0 {
                plus += 1;
            } else if j < 0.0 {
                minus += 1;
            } else {
                zero += 1;
            }
        }
        assert!(plus > 0 && minus > 0 && zero > 0);
        // Two of the four selector values map to zero.
        assert!(zero > plus && zero > minus);
    }
}
