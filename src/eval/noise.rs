// eval/noise.rs — Seeded noise primitives and the per-context generator cache
//
// Simplex noise is built from a Fisher-Yates permutation table driven by
// Mulberry32, so a given integer seed always yields the same field. Cellular
// noise places one jittered feature point per unit cell; the point is derived
// from a hash of the cell coordinates mixed with the seed.

use rustc_hash::FxHashMap;
use serde_json::Value;

/// Upper bound on octave counts read from node fields.
pub const MAX_OCTAVES: u32 = 32;

// ── Seeds ───────────────────────────────────────────────────────────

/// JavaScript `ToInt32`: truncate toward zero, wrap modulo 2^32.
/// Non-finite input maps to 0.
pub fn js_to_int32(v: f64) -> i32 {
    if !v.is_finite() {
        return 0;
    }
    let t = v.trunc();
    let m = t.rem_euclid(4_294_967_296.0);
    m as u64 as u32 as i32
}

/// Java's `String.hashCode()` over UTF-16 code units.
pub fn java_string_hash(s: &str) -> i32 {
    s.encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(unit as i32))
}

/// Integer seed for a `Seed` field. Numbers wrap like JS `seed | 0`, strings
/// use the Java string hash, anything else is 0.
pub fn seed_from_value(seed: Option<&Value>) -> i32 {
    match seed {
        Some(Value::Number(n)) => n.as_f64().map(js_to_int32).unwrap_or(0),
        Some(Value::String(s)) => java_string_hash(s),
        _ => 0,
    }
}

/// Clamp a raw octave field to `1..=MAX_OCTAVES`. Fractional counts round up
/// so that `1.5` still runs two layers.
pub fn octave_count(raw: f64) -> u32 {
    if raw.is_nan() {
        return 1;
    }
    raw.ceil().clamp(1.0, MAX_OCTAVES as f64) as u32
}

// ── Mulberry32 PRNG ─────────────────────────────────────────────────

/// Mulberry32, operating on a wrapping 32-bit state.
pub struct Mulberry32 {
    state: u32,
}

impl Mulberry32 {
    pub fn new(seed: i32) -> Self {
        Self { state: seed as u32 }
    }

    /// Next value in [0, 1).
    pub fn next_f64(&mut self) -> f64 {
        self.state = self.state.wrapping_add(0x6d2b_79f5);
        let s = self.state;
        let mut t = (s ^ (s >> 15)).wrapping_mul(1 | s);
        t = t.wrapping_add((t ^ (t >> 7)).wrapping_mul(61 | t)) ^ t;
        (t ^ (t >> 14)) as f64 / 4_294_967_296.0
    }
}

// ── Simplex noise ───────────────────────────────────────────────────

const GRAD2: [[f64; 2]; 8] = [
    [1.0, 0.0],
    [-1.0, 0.0],
    [0.0, 1.0],
    [0.0, -1.0],
    [1.0, 1.0],
    [-1.0, 1.0],
    [1.0, -1.0],
    [-1.0, -1.0],
];

const GRAD3: [[f64; 3]; 12] = [
    [1.0, 1.0, 0.0],
    [-1.0, 1.0, 0.0],
    [1.0, -1.0, 0.0],
    [-1.0, -1.0, 0.0],
    [1.0, 0.0, 1.0],
    [-1.0, 0.0, 1.0],
    [1.0, 0.0, -1.0],
    [-1.0, 0.0, -1.0],
    [0.0, 1.0, 1.0],
    [0.0, -1.0, 1.0],
    [0.0, 1.0, -1.0],
    [0.0, -1.0, -1.0],
];

const F2: f64 = 0.366_025_403_784_438_6; // (sqrt(3) - 1) / 2
const G2: f64 = 0.211_324_865_405_187_1; // (3 - sqrt(3)) / 6
const F3: f64 = 1.0 / 3.0;
const G3: f64 = 1.0 / 6.0;

/// Shuffled 0..=255, doubled so lookups never wrap.
fn permutation(seed: i32) -> [u8; 512] {
    let mut rng = Mulberry32::new(seed);
    let mut perm = [0u8; 512];
    for (i, p) in perm.iter_mut().take(256).enumerate() {
        *p = i as u8;
    }
    for i in (1..256usize).rev() {
        let j = (rng.next_f64() * (i + 1) as f64) as usize;
        perm.swap(i, j);
    }
    let (lo, hi) = perm.split_at_mut(256);
    hi.copy_from_slice(lo);
    perm
}

#[inline]
fn corner2(g: usize, x: f64, y: f64) -> f64 {
    let t = 0.5 - x * x - y * y;
    if t < 0.0 {
        return 0.0;
    }
    let t2 = t * t;
    t2 * t2 * (GRAD2[g][0] * x + GRAD2[g][1] * y)
}

#[inline]
fn corner3(g: usize, x: f64, y: f64, z: f64) -> f64 {
    let t = 0.6 - x * x - y * y - z * z;
    if t < 0.0 {
        return 0.0;
    }
    let t2 = t * t;
    t2 * t2 * (GRAD3[g][0] * x + GRAD3[g][1] * y + GRAD3[g][2] * z)
}

/// Seeded 2D/3D simplex noise with output in roughly [-1, 1].
pub struct SimplexNoise {
    perm: [u8; 512],
}

impl SimplexNoise {
    pub fn new(seed: i32) -> Self {
        Self {
            perm: permutation(seed),
        }
    }

    #[inline]
    fn p(&self, i: usize) -> usize {
        self.perm[i] as usize
    }

    pub fn sample2(&self, x: f64, y: f64) -> f64 {
        let s = (x + y) * F2;
        let i = (x + s).floor() as i64;
        let j = (y + s).floor() as i64;
        let t = (i + j) as f64 * G2;
        let x0 = x - (i as f64 - t);
        let y0 = y - (j as f64 - t);

        let (i1, j1) = if x0 > y0 { (1, 0) } else { (0, 1) };

        let x1 = x0 - i1 as f64 + G2;
        let y1 = y0 - j1 as f64 + G2;
        let x2 = x0 - 1.0 + 2.0 * G2;
        let y2 = y0 - 1.0 + 2.0 * G2;

        let ii = (i & 255) as usize;
        let jj = (j & 255) as usize;
        let g0 = self.p(ii + self.p(jj)) % 8;
        let g1 = self.p(ii + i1 + self.p(jj + j1)) % 8;
        let g2 = self.p(ii + 1 + self.p(jj + 1)) % 8;

        70.0 * (corner2(g0, x0, y0) + corner2(g1, x1, y1) + corner2(g2, x2, y2))
    }

    pub fn sample3(&self, x: f64, y: f64, z: f64) -> f64 {
        let s = (x + y + z) * F3;
        let i = (x + s).floor() as i64;
        let j = (y + s).floor() as i64;
        let k = (z + s).floor() as i64;
        let t = (i + j + k) as f64 * G3;
        let x0 = x - (i as f64 - t);
        let y0 = y - (j as f64 - t);
        let z0 = z - (k as f64 - t);

        // Pick the tetrahedron containing the point.
        let (i1, j1, k1, i2, j2, k2) = if x0 >= y0 {
            if y0 >= z0 {
                (1, 0, 0, 1, 1, 0)
            } else if x0 >= z0 {
                (1, 0, 0, 1, 0, 1)
            } else {
                (0, 0, 1, 1, 0, 1)
            }
        } else if y0 < z0 {
            (0, 0, 1, 0, 1, 1)
        } else if x0 < z0 {
            (0, 1, 0, 0, 1, 1)
        } else {
            (0, 1, 0, 1, 1, 0)
        };

        let x1 = x0 - i1 as f64 + G3;
        let y1 = y0 - j1 as f64 + G3;
        let z1 = z0 - k1 as f64 + G3;
        let x2 = x0 - i2 as f64 + 2.0 * G3;
        let y2 = y0 - j2 as f64 + 2.0 * G3;
        let z2 = z0 - k2 as f64 + 2.0 * G3;
        let x3 = x0 - 1.0 + 3.0 * G3;
        let y3 = y0 - 1.0 + 3.0 * G3;
        let z3 = z0 - 1.0 + 3.0 * G3;

        let ii = (i & 255) as usize;
        let jj = (j & 255) as usize;
        let kk = (k & 255) as usize;
        let g0 = self.p(ii + self.p(jj + self.p(kk))) % 12;
        let g1 = self.p(ii + i1 + self.p(jj + j1 + self.p(kk + k1))) % 12;
        let g2 = self.p(ii + i2 + self.p(jj + j2 + self.p(kk + k2))) % 12;
        let g3 = self.p(ii + 1 + self.p(jj + 1 + self.p(kk + 1))) % 12;

        32.0 * (corner3(g0, x0, y0, z0)
            + corner3(g1, x1, y1, z1)
            + corner3(g2, x2, y2, z2)
            + corner3(g3, x3, y3, z3))
    }

    /// Fractal Brownian motion over `sample2`.
    pub fn fbm2(&self, x: f64, z: f64, octaves: Octaves) -> f64 {
        octaves.accumulate(|f| self.sample2(x * f, z * f))
    }

    pub fn fbm3(&self, x: f64, y: f64, z: f64, octaves: Octaves) -> f64 {
        octaves.accumulate(|f| self.sample3(x * f, y * f, z * f))
    }

    /// Ridged fbm: `(1 - |n|)^2` per layer, frequency doubling and amplitude
    /// halving each step, rescaled by `sum * 2 - 1`.
    pub fn ridged2(&self, x: f64, z: f64, freq: f64, octaves: u32) -> f64 {
        ridged(freq, octaves, |f| self.sample2(x * f, z * f))
    }

    pub fn ridged3(&self, x: f64, y: f64, z: f64, freq: f64, octaves: u32) -> f64 {
        ridged(freq, octaves, |f| self.sample3(x * f, y * f, z * f))
    }
}

fn ridged(freq: f64, octaves: u32, mut sample: impl FnMut(f64) -> f64) -> f64 {
    let mut sum = 0.0;
    let mut amp = 1.0;
    let mut f = freq;
    for _ in 0..octaves {
        let n = 1.0 - sample(f).abs();
        sum += n * n * amp;
        f *= 2.0;
        amp *= 0.5;
    }
    sum * 2.0 - 1.0
}

/// Layering parameters shared by every fbm flavour.
#[derive(Debug, Clone, Copy)]
pub struct Octaves {
    pub frequency: f64,
    pub count: u32,
    pub lacunarity: f64,
    pub gain: f64,
}

impl Octaves {
    /// Sum `count` layers of `sample(frequency_i)`, each weighted by
    /// `gain^i`.
    pub fn accumulate(self, mut sample: impl FnMut(f64) -> f64) -> f64 {
        let mut sum = 0.0;
        let mut amp = 1.0;
        let mut f = self.frequency;
        for _ in 0..self.count {
            sum += sample(f) * amp;
            f *= self.lacunarity;
            amp *= self.gain;
        }
        sum
    }
}

// ── Cellular noise ──────────────────────────────────────────────────

const HASH_PRIME_A: f64 = 374_761_393.0;
const HASH_PRIME_B: f64 = 668_265_263.0;
const HASH_PRIME_C: f64 = 1_103_515_245.0;

/// What a cellular sample returns, derived from the nearest (`d1`) and
/// second-nearest (`d2`) feature-point distances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellMetric {
    /// `d1 * 2 - 1`
    Euclidean,
    /// `(d1 / d2) * 2 - 1`, 0 when `d2` is 0
    Distance2Div,
    /// `(d2 - d1) * 2 - 1`
    Distance2Sub,
}

impl CellMetric {
    /// Unrecognised names fall back to `Euclidean`.
    pub fn parse(name: &str) -> CellMetric {
        match name {
            "Distance2Div" => CellMetric::Distance2Div,
            "Distance2Sub" => CellMetric::Distance2Sub,
            _ => CellMetric::Euclidean,
        }
    }

    fn finish(self, d1: f64, d2: f64) -> f64 {
        match self {
            CellMetric::Euclidean => d1 * 2.0 - 1.0,
            CellMetric::Distance2Div => {
                if d2 > 0.0 {
                    (d1 / d2) * 2.0 - 1.0
                } else {
                    0.0
                }
            }
            CellMetric::Distance2Sub => (d2 - d1) * 2.0 - 1.0,
        }
    }
}

/// Nearest and second-nearest distances seen so far.
struct Nearest {
    d1: f64,
    d2: f64,
}

impl Nearest {
    fn new() -> Self {
        Self {
            d1: f64::INFINITY,
            d2: f64::INFINITY,
        }
    }

    #[inline]
    fn push(&mut self, d: f64) {
        if d < self.d1 {
            self.d2 = self.d1;
            self.d1 = d;
        } else if d < self.d2 {
            self.d2 = d;
        }
    }
}

/// Cellular (Voronoi) noise over a jittered unit lattice.
pub struct CellularNoise {
    seed: i32,
    metric: CellMetric,
    jitter: f64,
}

impl CellularNoise {
    pub fn new(seed: i32, metric: CellMetric, jitter: f64) -> Self {
        Self {
            seed,
            metric,
            jitter,
        }
    }

    /// Feature-point RNG for one cell. Seed 0 leaves the cell hash untouched.
    #[inline]
    fn cell_rng(&self, hash: f64) -> Mulberry32 {
        Mulberry32::new(js_to_int32(hash) ^ self.seed)
    }

    pub fn sample2(&self, x: f64, y: f64) -> f64 {
        let ix = x.floor();
        let iy = y.floor();
        let mut nearest = Nearest::new();
        for dx in -1..=1 {
            for dy in -1..=1 {
                let cx = ix + dx as f64;
                let cy = iy + dy as f64;
                let mut rng = self.cell_rng(cx * HASH_PRIME_A + cy * HASH_PRIME_B);
                let px = cx + rng.next_f64() * self.jitter;
                let py = cy + rng.next_f64() * self.jitter;
                nearest.push(((x - px).powi(2) + (y - py).powi(2)).sqrt());
            }
        }
        self.metric.finish(nearest.d1, nearest.d2)
    }

    pub fn sample3(&self, x: f64, y: f64, z: f64) -> f64 {
        let ix = x.floor();
        let iy = y.floor();
        let iz = z.floor();
        let mut nearest = Nearest::new();
        for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    let cx = ix + dx as f64;
                    let cy = iy + dy as f64;
                    let cz = iz + dz as f64;
                    let mut rng = self
                        .cell_rng(cx * HASH_PRIME_A + cy * HASH_PRIME_B + cz * HASH_PRIME_C);
                    let px = cx + rng.next_f64() * self.jitter;
                    let py = cy + rng.next_f64() * self.jitter;
                    let pz = cz + rng.next_f64() * self.jitter;
                    nearest.push(
                        ((x - px).powi(2) + (y - py).powi(2) + (z - pz).powi(2)).sqrt(),
                    );
                }
            }
        }
        self.metric.finish(nearest.d1, nearest.d2)
    }

    /// Single sample when `count == 1`, fbm over cells otherwise.
    pub fn fbm2(&self, x: f64, z: f64, octaves: Octaves) -> f64 {
        if octaves.count > 1 {
            octaves.accumulate(|f| self.sample2(x * f, z * f))
        } else {
            self.sample2(x * octaves.frequency, z * octaves.frequency)
        }
    }

    pub fn fbm3(&self, x: f64, y: f64, z: f64, octaves: Octaves) -> f64 {
        if octaves.count > 1 {
            octaves.accumulate(|f| self.sample3(x * f, y * f, z * f))
        } else {
            let f = octaves.frequency;
            self.sample3(x * f, y * f, z * f)
        }
    }
}

// ── Generator cache ─────────────────────────────────────────────────

/// Lazily built generators, keyed by seed (simplex) or by
/// seed + metric + jitter bits (cellular).
#[derive(Default)]
pub struct NoiseCache {
    simplex: FxHashMap<i32, SimplexNoise>,
    cellular: FxHashMap<(i32, CellMetric, u64), CellularNoise>,
}

impl NoiseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn simplex(&mut self, seed: i32) -> &SimplexNoise {
        self.simplex
            .entry(seed)
            .or_insert_with(|| SimplexNoise::new(seed))
    }

    pub fn cellular(&mut self, seed: i32, metric: CellMetric, jitter: f64) -> &CellularNoise {
        self.cellular
            .entry((seed, metric, jitter.to_bits()))
            .or_insert_with(|| CellularNoise::new(seed, metric, jitter))
    }

    /// Number of generators built so far.
    pub fn len(&self) -> usize {
        self.simplex.len() + self.cellular.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn java_hash_matches_known_values() {
        assert_eq!(java_string_hash(""), 0);
        assert_eq!(java_string_hash("a"), 97);
        assert_eq!(java_string_hash("hello"), 99_162_322);
    }

    #[test]
    fn to_int32_wraps_like_javascript() {
        assert_eq!(js_to_int32(42.0), 42);
        assert_eq!(js_to_int32(-7.9), -7);
        assert_eq!(js_to_int32(2_147_483_648.0), i32::MIN);
        assert_eq!(js_to_int32(4_294_967_296.0 + 5.0), 5);
        assert_eq!(js_to_int32(f64::NAN), 0);
        assert_eq!(js_to_int32(f64::INFINITY), 0);
    }

    #[test]
    fn seed_from_value_variants() {
        assert_eq!(seed_from_value(Some(&json!(1234))), 1234);
        assert_eq!(seed_from_value(Some(&json!(3.7))), 3);
        assert_eq!(seed_from_value(Some(&json!("a"))), 97);
        assert_eq!(seed_from_value(Some(&Value::Null)), 0);
        assert_eq!(seed_from_value(None), 0);
    }

    #[test]
    fn octave_count_is_clamped() {
        assert_eq!(octave_count(0.0), 1);
        assert_eq!(octave_count(-3.0), 1);
        assert_eq!(octave_count(1.5), 2);
        assert_eq!(octave_count(4.0), 4);
        assert_eq!(octave_count(1e9), MAX_OCTAVES);
        assert_eq!(octave_count(f64::NAN), 1);
    }

    #[test]
    fn mulberry32_is_deterministic_and_in_range() {
        let mut a = Mulberry32::new(42);
        let mut b = Mulberry32::new(42);
        for _ in 0..100 {
            let va = a.next_f64();
            assert_eq!(va, b.next_f64());
            assert!((0.0..1.0).contains(&va));
        }
        let mut c = Mulberry32::new(43);
        let mut a = Mulberry32::new(42);
        assert_ne!(a.next_f64(), c.next_f64());
    }

    #[test]
    fn permutation_is_a_doubled_shuffle() {
        let perm = permutation(7);
        let mut seen = [false; 256];
        for &p in &perm[..256] {
            seen[p as usize] = true;
        }
        assert!(seen.iter().all(|&s| s));
        assert_eq!(perm[..256], perm[256..]);
    }

    #[test]
    fn simplex_is_deterministic_and_bounded() {
        let a = SimplexNoise::new(99);
        let b = SimplexNoise::new(99);
        for i in 0..200 {
            let x = i as f64 * 0.173 - 17.0;
            let z = i as f64 * 0.311 + 3.0;
            let v2 = a.sample2(x, z);
            assert_eq!(v2, b.sample2(x, z));
            assert!((-1.01..=1.01).contains(&v2), "2d out of range: {v2}");
            let v3 = a.sample3(x, z * 0.5, z);
            assert!((-1.01..=1.01).contains(&v3), "3d out of range: {v3}");
        }
    }

    #[test]
    fn different_seeds_differ() {
        let a = SimplexNoise::new(1);
        let b = SimplexNoise::new(2);
        let differs = (0..50).any(|i| {
            let x = i as f64 * 0.37 + 0.1;
            a.sample2(x, x * 0.5) != b.sample2(x, x * 0.5)
        });
        assert!(differs);
    }

    #[test]
    fn single_octave_fbm_is_plain_sample() {
        let n = SimplexNoise::new(5);
        let oct = Octaves {
            frequency: 0.05,
            count: 1,
            lacunarity: 2.0,
            gain: 0.5,
        };
        assert_eq!(n.fbm2(10.0, 20.0, oct), n.sample2(10.0 * 0.05, 20.0 * 0.05));
    }

    #[test]
    fn fbm_sums_scaled_octaves() {
        let n = SimplexNoise::new(9);
        let oct = Octaves {
            frequency: 0.05,
            count: 3,
            lacunarity: 3.0,
            gain: 0.4,
        };
        let (x, z) = (12.5, -7.25);
        let f = [0.05, 0.05 * 3.0, 0.05 * 3.0 * 3.0];
        let expected = n.sample2(x * f[0], z * f[0])
            + n.sample2(x * f[1], z * f[1]) * 0.4
            + n.sample2(x * f[2], z * f[2]) * (0.4 * 0.4);
        assert_eq!(n.fbm2(x, z, oct), expected);

        let y = 3.5;
        let expected = n.sample3(x * f[0], y * f[0], z * f[0])
            + n.sample3(x * f[1], y * f[1], z * f[1]) * 0.4
            + n.sample3(x * f[2], y * f[2], z * f[2]) * (0.4 * 0.4);
        assert_eq!(n.fbm3(x, y, z, oct), expected);
    }

    #[test]
    fn ridged_squares_inverted_layers() {
        let n = SimplexNoise::new(11);
        let (x, y, z) = (31.0, 9.5, 17.0);
        let layer2 = |f: f64| {
            let v = 1.0 - n.sample2(x * f, z * f).abs();
            v * v
        };
        let expected = (layer2(0.02) + layer2(0.04) * 0.5 + layer2(0.08) * 0.25) * 2.0 - 1.0;
        assert_eq!(n.ridged2(x, z, 0.02, 3), expected);

        let layer3 = |f: f64| {
            let v = 1.0 - n.sample3(x * f, y * f, z * f).abs();
            v * v
        };
        let expected = (layer3(0.02) + layer3(0.04) * 0.5) * 2.0 - 1.0;
        assert_eq!(n.ridged3(x, y, z, 0.02, 2), expected);

        // No octaves leaves only the rescale.
        assert_eq!(n.ridged2(x, z, 0.02, 0), -1.0);
    }

    #[test]
    fn ridged_is_bounded() {
        let n = SimplexNoise::new(11);
        for i in 0..100 {
            let v = n.ridged2(i as f64 * 3.1, i as f64 * 1.7, 0.02, 4);
            assert!((-1.0..=3.0).contains(&v));
        }
    }

    #[test]
    fn cellular_euclidean_is_in_expected_range() {
        let c = CellularNoise::new(0, CellMetric::Euclidean, 1.0);
        for i in 0..100 {
            let v = c.sample2(i as f64 * 0.37, i as f64 * 0.91);
            // d1 is at most ~1.5 within a 3x3 neighbourhood.
            assert!((-1.0..=2.0).contains(&v), "value {v}");
        }
    }

    #[test]
    fn cellular_seed_changes_pattern() {
        let a = CellularNoise::new(0, CellMetric::Euclidean, 1.0);
        let b = CellularNoise::new(12345, CellMetric::Euclidean, 1.0);
        let differs = (0..50).any(|i| {
            let x = i as f64 * 0.61;
            a.sample2(x, x * 1.3) != b.sample2(x, x * 1.3)
        });
        assert!(differs);
    }

    #[test]
    fn cell_metric_parse_defaults_to_euclidean() {
        assert_eq!(CellMetric::parse("Distance2Div"), CellMetric::Distance2Div);
        assert_eq!(CellMetric::parse("Distance2Sub"), CellMetric::Distance2Sub);
        assert_eq!(CellMetric::parse("Manhattan"), CellMetric::Euclidean);
    }

    #[test]
    fn zero_jitter_distance2div_at_lattice_point() {
        // With no jitter every feature point sits on a lattice corner, so a
        // sample exactly on a corner has d1 = 0.
        let c = CellularNoise::new(0, CellMetric::Distance2Div, 0.0);
        assert_eq!(c.sample2(3.0, 4.0), -1.0);
        let e = CellularNoise::new(0, CellMetric::Euclidean, 0.0);
        assert_eq!(e.sample2(3.0, 4.0), -1.0);
    }

    #[test]
    fn zero_jitter_second_nearest_metrics() {
        // Feature points sit on lattice corners. From (3.25, 4.4) the nearest
        // corner is (3, 4) and the second nearest is (3, 5).
        let (x, y) = (3.25, 4.4);
        let d1 = ((x - 3.0f64).powi(2) + (y - 4.0f64).powi(2)).sqrt();
        let d2 = ((x - 3.0f64).powi(2) + (y - 5.0f64).powi(2)).sqrt();

        let sub = CellularNoise::new(0, CellMetric::Distance2Sub, 0.0).sample2(x, y);
        assert_eq!(sub, (d2 - d1) * 2.0 - 1.0);
        assert!(sub != 0.0 && sub != -1.0);

        let div = CellularNoise::new(0, CellMetric::Distance2Div, 0.0).sample2(x, y);
        assert_eq!(div, (d1 / d2) * 2.0 - 1.0);
        assert!(div != 0.0 && div != -1.0);

        let euclid = CellularNoise::new(0, CellMetric::Euclidean, 0.0).sample2(x, y);
        assert_eq!(euclid, d1 * 2.0 - 1.0);
    }

    #[test]
    fn jittered_metrics_agree_on_distances() {
        let make = |metric| CellularNoise::new(77, metric, 1.0);
        let (euclid, div, sub) = (
            make(CellMetric::Euclidean),
            make(CellMetric::Distance2Div),
            make(CellMetric::Distance2Sub),
        );
        for i in 0..40 {
            let (x, y, z) = (i as f64 * 0.73, i as f64 * -0.31, i as f64 * 1.17);
            let d1 = (euclid.sample2(x, z) + 1.0) / 2.0;
            let d2 = d1 + (sub.sample2(x, z) + 1.0) / 2.0;
            assert!(d1 > 0.0 && d2 >= d1);
            let ratio = (div.sample2(x, z) + 1.0) / 2.0;
            assert!((ratio - d1 / d2).abs() < 1e-9, "at {i}: {ratio} vs {}", d1 / d2);

            let d1 = (euclid.sample3(x, y, z) + 1.0) / 2.0;
            let d2 = d1 + (sub.sample3(x, y, z) + 1.0) / 2.0;
            let ratio = (div.sample3(x, y, z) + 1.0) / 2.0;
            assert!((ratio - d1 / d2).abs() < 1e-9);
        }
    }

    #[test]
    fn cellular_fbm_layers_cells() {
        let c = CellularNoise::new(5, CellMetric::Distance2Sub, 1.0);
        let oct = Octaves {
            frequency: 0.1,
            count: 3,
            lacunarity: 2.0,
            gain: 0.5,
        };
        let (x, y, z) = (14.2, 3.0, -6.6);
        let expected = c.sample2(x * 0.1, z * 0.1)
            + c.sample2(x * 0.2, z * 0.2) * 0.5
            + c.sample2(x * 0.4, z * 0.4) * 0.25;
        assert_eq!(c.fbm2(x, z, oct), expected);

        let expected = c.sample3(x * 0.1, y * 0.1, z * 0.1)
            + c.sample3(x * 0.2, y * 0.2, z * 0.2) * 0.5
            + c.sample3(x * 0.4, y * 0.4, z * 0.4) * 0.25;
        assert_eq!(c.fbm3(x, y, z, oct), expected);

        let single = Octaves { count: 1, ..oct };
        assert_eq!(c.fbm2(x, z, single), c.sample2(x * 0.1, z * 0.1));
    }

    #[test]
    fn noise_cache_reuses_generators() {
        let mut cache = NoiseCache::new();
        assert!(cache.is_empty());
        cache.simplex(1);
        cache.simplex(1);
        cache.simplex(2);
        cache.cellular(1, CellMetric::Euclidean, 1.0);
        cache.cellular(1, CellMetric::Euclidean, 1.0);
        cache.cellular(1, CellMetric::Distance2Sub, 1.0);
        assert_eq!(cache.len(), 4);
    }
}
