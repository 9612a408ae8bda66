//! optimization::sobol — Sobol low-discrepancy points in the unit cube.
//!
//! Gray-code construction with Joe–Kuo direction numbers. Used to seed the
//! differential-evolution population and as the Sobol sampling mode of the
//! GlobalDeterministic strategy.
//!
//! Dimension 1 uses the van der Corput sequence; dimensions 2..=16 use the
//! tabulated primitive polynomials below. Higher dimensions continue with
//! the next primitive polynomials over GF(2) in (degree, coefficient) order,
//! found by an order test, with odd initial direction numbers drawn from a
//! fixed-seed generator. The all-zero first point is skipped.
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::optimization::errors::{OptError, OptResult};

const BITS: u32 = 32;
const TWO_POW_BITS: f64 = 4_294_967_296.0;

/// Dimensions covered by the Joe–Kuo table (including van der Corput).
pub const TABULATED_DIM: usize = 16;

/// Maximum supported dimension (primitive polynomials up to degree 18).
pub const MAX_DIM: usize = 21_201;

const DIRECTION_SEED: u64 = 0x5EED_0B01;

// (degree s, polynomial coefficient a, initial direction numbers m_1..m_s)
const JOE_KUO: [(u32, u32, &[u32]); TABULATED_DIM - 1] = [
    (1, 0, &[1]),
    (2, 1, &[1, 3]),
    (3, 1, &[1, 3, 1]),
    (3, 2, &[1, 1, 1]),
    (4, 1, &[1, 1, 3, 3]),
    (4, 4, &[1, 3, 5, 13]),
    (5, 2, &[1, 1, 5, 5, 17]),
    (5, 4, &[1, 1, 5, 5, 5]),
    (5, 7, &[1, 1, 7, 11, 19]),
    (5, 11, &[1, 1, 5, 1, 1]),
    (5, 13, &[1, 1, 1, 3, 11]),
    (5, 14, &[1, 3, 5, 5, 31]),
    (6, 1, &[1, 3, 3, 9, 7, 49]),
    (6, 13, &[1, 1, 1, 15, 21, 21]),
    (6, 16, &[1, 3, 1, 13, 27, 49]),
];

/// Stateful Sobol generator.
#[derive(Debug, Clone, PartialEq)]
pub struct Sobol {
    directions: Vec<[u32; BITS as usize]>,
    state: Vec<u32>,
    index: u32,
}

impl Sobol {
    /// # Errors
    /// [`OptError::SobolDimension`] when `dim` is 0 or above [`MAX_DIM`].
    pub fn new(dim: usize) -> OptResult<Self> {
        if dim == 0 || dim > MAX_DIM {
            return Err(OptError::SobolDimension { dim, max: MAX_DIM });
        }
        let mut directions = Vec::with_capacity(dim);
        let mut first = [0u32; BITS as usize];
        for (k, v) in first.iter_mut().enumerate() {
            *v = 1 << (BITS - 1 - k as u32);
        }
        directions.push(first);

        for &(s, a, m) in JOE_KUO.iter().take(dim - 1) {
            directions.push(direction_numbers(s, a, m));
        }
        if dim > TABULATED_DIM {
            let mut rng = StdRng::seed_from_u64(DIRECTION_SEED);
            for (s, a) in primitive_polynomials().skip(TABULATED_DIM - 1).take(dim - TABULATED_DIM) {
                // m_k odd and below 2^k.
                let m: Vec<u32> = (0..s).map(|k| (rng.gen_range(0..1u32 << k) << 1) | 1).collect();
                directions.push(direction_numbers(s, a, &m));
            }
        }
        let mut sobol = Self { directions, state: vec![0; dim], index: 0 };
        sobol.advance();
        Ok(sobol)
    }

    pub fn dim(&self) -> usize {
        self.state.len()
    }

    fn advance(&mut self) {
        let c = self.index.trailing_ones() as usize;
        for (x, v) in self.state.iter_mut().zip(&self.directions) {
            *x ^= v[c.min(BITS as usize - 1)];
        }
        self.index = self.index.wrapping_add(1);
    }

    /// Next point in `[0, 1)^dim`.
    pub fn next_point(&mut self) -> Vec<f64> {
        let point = self.state.iter().map(|&x| f64::from(x) / TWO_POW_BITS).collect();
        self.advance();
        point
    }

    /// The next `n` points.
    pub fn take_points(&mut self, n: usize) -> Vec<Vec<f64>> {
        (0..n).map(|_| self.next_point()).collect()
    }
}

/// Direction integers `v_k = m_k · 2^(32-k)` extended by the Bratley–Fox
/// recurrence for polynomial `(s, a)`.
fn direction_numbers(s: u32, a: u32, m: &[u32]) -> [u32; BITS as usize] {
    let s_us = s as usize;
    let mut v = [0u32; BITS as usize];
    for k in 0..BITS as usize {
        if k < s_us {
            v[k] = m[k] << (BITS - 1 - k as u32);
        } else {
            let mut value = v[k - s_us] ^ (v[k - s_us] >> s);
            for j in 1..s_us {
                if (a >> (s_us - 1 - j)) & 1 == 1 {
                    value ^= v[k - j];
                }
            }
            v[k] = value;
        }
    }
    v
}

/// Primitive polynomials over GF(2) as `(degree, a)`, ascending by degree
/// then by `a`, where the polynomial is `x^s + a_1 x^(s-1) + … + a_(s-1) x + 1`
/// and `a` packs `a_1..a_(s-1)` most significant first.
pub(crate) fn primitive_polynomials() -> impl Iterator<Item = (u32, u32)> {
    (1..BITS).flat_map(|s| {
        let order = (1u64 << s) - 1;
        let factors = prime_factors(order);
        (0..1u32 << (s - 1)).filter_map(move |a| {
            let poly = (1u64 << s) | (u64::from(a) << 1) | 1;
            is_primitive(poly, s, order, &factors).then_some((s, a))
        })
    })
}

/// `x` has multiplicative order exactly `2^s - 1` modulo `poly`.
fn is_primitive(poly: u64, s: u32, order: u64, factors: &[u64]) -> bool {
    let x = if s == 1 { 1 } else { 0b10 };
    pow_mod(x, order, poly, s) == 1
        && factors.iter().all(|&q| pow_mod(x, order / q, poly, s) != 1)
}

fn pow_mod(base: u64, mut exp: u64, poly: u64, s: u32) -> u64 {
    let mut result = 1u64;
    let mut b = base;
    while exp > 0 {
        if exp & 1 == 1 {
            result = mul_mod(result, b, poly, s);
        }
        b = mul_mod(b, b, poly, s);
        exp >>= 1;
    }
    result
}

/// Carry-less product of two residues reduced modulo `poly` (degree `s`).
fn mul_mod(mut a: u64, mut b: u64, poly: u64, s: u32) -> u64 {
    let top = 1u64 << s;
    let mut acc = 0u64;
    while b > 0 {
        if b & 1 == 1 {
            acc ^= a;
        }
        b >>= 1;
        a <<= 1;
        if a & top != 0 {
            a ^= poly;
        }
    }
    acc
}

fn prime_factors(mut n: u64) -> Vec<u64> {
    let mut factors = Vec::new();
    let mut p = 2;
    while p * p <= n {
        if n % p == 0 {
            factors.push(p);
            while n % p == 0 {
                n /= p;
            }
        }
        p += 1;
    }
    if n > 1 {
        factors.push(n);
    }
    factors
}
