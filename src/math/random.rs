//! Seeded RNG fill kernels.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use crate::element::Element;
use crate::error::{DeviceError, Result};
use crate::handle::Handle;
use crate::memory::MemoryBank;

/// Kernel RNG with an explicit reseed lifecycle.
#[derive(Debug)]
pub struct FillRng {
    rng: StdRng,
    seed: u64,
}

impl FillRng {
    /// Create from a seed.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            seed,
        }
    }

    /// Reseed, restarting the sequence.
    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
        self.seed = seed;
    }

    /// Seed last applied.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Fill the first `n` elements of y uniformly over [min, max).
    ///
    /// # Errors
    ///
    /// `ParamOutOfRange` when min > max, handle errors otherwise.
    pub fn uniform<T: Element>(
        &mut self,
        mem: &mut MemoryBank<T>,
        n: usize,
        min: T,
        max: T,
        hy: Handle,
    ) -> Result<()> {
        let (lo, hi) = (min.to_f64(), max.to_f64());
        if lo > hi {
            return Err(DeviceError::ParamOutOfRange(format!(
                "uniform range [{lo}, {hi})"
            )));
        }
        let vals: Vec<T> = (0..n)
            .map(|_| {
                let v = if lo == hi {
                    lo
                } else {
                    self.rng.gen_range(lo..hi)
                };
                T::from_f64(v)
            })
            .collect();
        mem.write(hy, 0, &vals)
    }

    /// Fill with N(mu, sigma) samples.
    ///
    /// # Errors
    ///
    /// `ParamOutOfRange` for a negative sigma, handle errors otherwise.
    pub fn gaussian<T: Element>(
        &mut self,
        mem: &mut MemoryBank<T>,
        n: usize,
        mu: T,
        sigma: T,
        hy: Handle,
    ) -> Result<()> {
        let dist = Normal::new(mu.to_f64(), sigma.to_f64())
            .map_err(|e| DeviceError::ParamOutOfRange(format!("gaussian sigma: {e}")))?;
        let vals: Vec<T> = (0..n)
            .map(|_| T::from_f64(dist.sample(&mut self.rng)))
            .collect();
        mem.write(hy, 0, &vals)
    }

    /// Fill with 0/1 Bernoulli draws at probability `p`.
    ///
    /// # Errors
    ///
    /// `ParamOutOfRange` for p outside [0, 1], handle errors otherwise.
    pub fn bernoulli<T: Element>(
        &mut self,
        mem: &mut MemoryBank<T>,
        n: usize,
        p: T,
        hy: Handle,
    ) -> Result<()> {
        let p = p.to_f64();
        if !(0.0..=1.0).contains(&p) {
            return Err(DeviceError::ParamOutOfRange(format!(
                "bernoulli probability {p}"
            )));
        }
        let vals: Vec<T> = (0..n)
            .map(|_| {
                if self.rng.gen::<f64>() < p {
                    T::one()
                } else {
                    T::zero()
                }
            })
            .collect();
        mem.write(hy, 0, &vals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_sequence() {
        let mut m: MemoryBank<f32> = MemoryBank::new(vec![1 << 20]);
        let ha = m.alloc(0, 16).unwrap();
        let hb = m.alloc(0, 16).unwrap();
        let mut r1 = FillRng::new(7);
        let mut r2 = FillRng::new(7);
        r1.uniform(&mut m, 16, 0.0, 1.0, ha).unwrap();
        r2.uniform(&mut m, 16, 0.0, 1.0, hb).unwrap();
        assert_eq!(m.read_all(ha).unwrap(), m.read_all(hb).unwrap());
    }

    #[test]
    fn reseed_restarts() {
        let mut m: MemoryBank<f32> = MemoryBank::new(vec![1 << 20]);
        let ha = m.alloc(0, 8).unwrap();
        let hb = m.alloc(0, 8).unwrap();
        let mut r = FillRng::new(3);
        r.uniform(&mut m, 8, 0.0, 1.0, ha).unwrap();
        r.reseed(3);
        r.uniform(&mut m, 8, 0.0, 1.0, hb).unwrap();
        assert_eq!(m.read_all(ha).unwrap(), m.read_all(hb).unwrap());
        assert_eq!(r.seed(), 3);
    }

    #[test]
    fn uniform_respects_bounds() {
        let mut m: MemoryBank<f64> = MemoryBank::new(vec![1 << 20]);
        let h = m.alloc(0, 256).unwrap();
        let mut r = FillRng::new(1);
        r.uniform(&mut m, 256, -2.0, 3.0, h).unwrap();
        for v in m.read_all(h).unwrap() {
            assert!((-2.0..3.0).contains(&v));
        }
        assert!(r.uniform(&mut m, 4, 5.0, 1.0, h).is_err());
    }

    #[test]
    fn bernoulli_is_binary() {
        let mut m: MemoryBank<f32> = MemoryBank::new(vec![1 << 20]);
        let h = m.alloc(0, 128).unwrap();
        let mut r = FillRng::new(11);
        r.bernoulli(&mut m, 128, 0.5, h).unwrap();
        let vals = m.read_all(h).unwrap();
        assert!(vals.iter().all(|&v| v == 0.0 || v == 1.0));
        assert!(vals.iter().any(|&v| v == 0.0));
        assert!(vals.iter().any(|&v| v == 1.0));
        assert!(r.bernoulli(&mut m, 4, 1.5, h).is_err());
    }
}
