// eval/nodes.rs — Evaluation context and per-type density semantics
//
// `EvalContext` owns the mutable state of one sampling session over an
// immutable `EvalGraph`: the CacheOnce memo, the cycle guard and the lazily
// built noise generators. Dispatch is an exhaustive match on `DensityType`;
// numeric edge cases (division by zero, degenerate ranges, missing inputs)
// degrade to local defaults and never surface as errors.

use crate::eval::compiled::{Handle, ResolvedInputs};
use crate::eval::curves::{curve_kind, CurveRegistry};
use crate::eval::graph::{
    coerce_number, field_nonzero, field_number, field_range, field_str, field_vec3, nonzero_or,
    EvalGraph, Fields,
};
use crate::eval::node_type::DensityType;
use crate::eval::noise::{octave_count, seed_from_value, CellMetric, NoiseCache, Octaves};
use crate::eval::EvaluationOptions;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::f64::consts::PI;
use std::ops::{Deref, DerefMut};

/// `ToY` default for gradient nodes.
pub const DEFAULT_WORLD_HEIGHT: f64 = 320.0;

/// Forward-difference step used by GradientWarp.
pub const GRADIENT_WARP_STEP: f64 = 0.5;

/// Height returned by BaseHeight when the named content field is absent.
const DEFAULT_BASE_HEIGHT: f64 = 100.0;

// ── Smooth math helpers ─────────────────────────────────────────────

/// Polynomial smooth minimum; hard `min` when `k <= 0`.
pub fn smooth_min(a: f64, b: f64, k: f64) -> f64 {
    if k <= 0.0 {
        return a.min(b);
    }
    let h = (0.5 + 0.5 * (b - a) / k).clamp(0.0, 1.0);
    b + (a - b) * h - k * h * (1.0 - h)
}

pub fn smooth_max(a: f64, b: f64, k: f64) -> f64 {
    -smooth_min(-a, -b, k)
}

/// Linear remap with a zero-width source range mapping to `t` = 0.
fn remap(v: f64, (s0, s1): (f64, f64), (t0, t1): (f64, f64)) -> f64 {
    let range = s1 - s0;
    let t = if range == 0.0 { 0.0 } else { (v - s0) / range };
    t0 + t * (t1 - t0)
}

/// Sign with `sign(0) == 0`.
fn sign(v: f64) -> f64 {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        v
    }
}

/// Axis selector field. Non-string values select no axis.
fn axis_field<'a>(fields: &'a Fields, default: &'a str) -> &'a str {
    match fields.get("Axis") {
        None | Some(Value::Null) => default,
        Some(Value::String(s)) => s,
        Some(_) => "",
    }
}

fn octaves_field(fields: &Fields, default_count: f64) -> Octaves {
    Octaves {
        frequency: field_number(fields, "Frequency", 0.01),
        count: octave_count(field_number(fields, "Octaves", default_count)),
        lacunarity: field_number(fields, "Lacunarity", 2.0),
        gain: field_number(fields, "Gain", 0.5),
    }
}

fn seed_field(fields: &Fields) -> i32 {
    seed_from_value(fields.get("Seed"))
}

// ── Context ─────────────────────────────────────────────────────────

/// Exact-position memo key for CacheOnce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct MemoKey {
    node: u32,
    x: u64,
    y: u64,
    z: u64,
}

impl MemoKey {
    fn new(node: usize, x: f64, y: f64, z: f64) -> Self {
        // `+ 0.0` folds -0.0 into 0.0 so both spell the same position.
        MemoKey {
            node: node as u32,
            x: (x + 0.0).to_bits(),
            y: (y + 0.0).to_bits(),
            z: (z + 0.0).to_bits(),
        }
    }
}

/// Sampling state over one graph. Build one per thread and reuse it for
/// every sample; call [`EvalContext::clear_memo`] between independent
/// samples.
pub struct EvalContext<'g> {
    graph: &'g EvalGraph,
    options: &'g EvaluationOptions,
    curves: &'g CurveRegistry,
    memo: FxHashMap<MemoKey, f64>,
    visiting: Vec<bool>,
    noise: NoiseCache,
}

impl<'g> EvalContext<'g> {
    pub fn new(graph: &'g EvalGraph, options: &'g EvaluationOptions) -> Self {
        Self::with_curves(graph, options, CurveRegistry::builtin())
    }

    /// Context that resolves non-manual curves through `curves`.
    pub fn with_curves(
        graph: &'g EvalGraph,
        options: &'g EvaluationOptions,
        curves: &'g CurveRegistry,
    ) -> Self {
        EvalContext {
            graph,
            options,
            curves,
            memo: FxHashMap::default(),
            visiting: vec![false; graph.node_count()],
            noise: NoiseCache::new(),
        }
    }

    pub fn graph(&self) -> &'g EvalGraph {
        self.graph
    }

    pub fn root_id(&self) -> &'g str {
        &self.graph.root_id
    }

    /// Forget CacheOnce values. Noise generators are kept.
    pub fn clear_memo(&mut self) {
        self.memo.clear();
    }

    /// Number of noise generators built so far.
    pub fn noise_generators(&self) -> usize {
        self.noise.len()
    }

    /// Evaluate the root node at `(x, y, z)`.
    pub fn evaluate_root(&mut self, x: f64, y: f64, z: f64) -> f64 {
        self.evaluate(self.graph.root_idx, x, y, z)
    }

    /// Evaluate a node by id; unknown ids evaluate to 0.
    pub fn evaluate_id(&mut self, id: &str, x: f64, y: f64, z: f64) -> f64 {
        match self.graph.idx_of(id) {
            Some(idx) => self.evaluate(idx, x, y, z),
            None => 0.0,
        }
    }

    /// Evaluate node `idx` at `(x, y, z)`. Re-entering a node that is already
    /// on the evaluation stack yields 0.
    pub fn evaluate(&mut self, idx: usize, x: f64, y: f64, z: f64) -> f64 {
        match self.visiting.get(idx) {
            Some(false) => {}
            _ => return 0.0,
        }
        let mut visit = Visit::enter(self, idx);
        visit.dispatch(idx, x, y, z)
    }

    #[inline]
    fn input(&mut self, ri: &ResolvedInputs, handle: Handle, x: f64, y: f64, z: f64) -> f64 {
        match ri.get(handle) {
            Some(src) => self.evaluate(src, x, y, z),
            None => 0.0,
        }
    }

    #[inline]
    fn indexed(&mut self, ri: &ResolvedInputs, i: u32, x: f64, y: f64, z: f64) -> f64 {
        match ri.at(i) {
            Some(src) => self.evaluate(src, x, y, z),
            None => 0.0,
        }
    }

    /// Pass `value` through the curve node wired to the `Curve` handle.
    /// The curve node is read, not evaluated; no curve leaves `value` as is.
    fn apply_curve(&self, ri: &ResolvedInputs, value: f64) -> f64 {
        let Some(src) = ri.get(Handle::Curve) else {
            return value;
        };
        let node = &self.graph.nodes[src];
        let kind = curve_kind(node.type_name());
        if kind == "Manual" {
            return match &self.graph.curves[src] {
                Some(curve) => curve.sample(value),
                None => value,
            };
        }
        self.curves.apply(kind, &node.data.fields, value)
    }

    fn dispatch(&mut self, idx: usize, x: f64, y: f64, z: f64) -> f64 {
        let graph = self.graph;
        let fields = graph.fields(idx);
        let ri = &graph.resolved[idx];

        match graph.kinds[idx] {
            // ── Noise ──
            DensityType::SimplexNoise2D => {
                let amp = field_number(fields, "Amplitude", 1.0);
                let oct = octaves_field(fields, 1.0);
                self.noise.simplex(seed_field(fields)).fbm2(x, z, oct) * amp
            }
            DensityType::SimplexNoise3D => {
                let amp = field_number(fields, "Amplitude", 1.0);
                let oct = octaves_field(fields, 1.0);
                self.noise.simplex(seed_field(fields)).fbm3(x, y, z, oct) * amp
            }
            DensityType::SimplexRidgeNoise2D => {
                let amp = field_number(fields, "Amplitude", 1.0);
                let oct = octaves_field(fields, 1.0);
                self.noise
                    .simplex(seed_field(fields))
                    .ridged2(x, z, oct.frequency, oct.count)
                    * amp
            }
            DensityType::SimplexRidgeNoise3D => {
                let amp = field_number(fields, "Amplitude", 1.0);
                let oct = octaves_field(fields, 1.0);
                self.noise
                    .simplex(seed_field(fields))
                    .ridged3(x, y, z, oct.frequency, oct.count)
                    * amp
            }
            DensityType::VoronoiNoise2D | DensityType::VoronoiNoise3D => {
                let metric =
                    CellMetric::parse(field_str(fields, "CellType").unwrap_or("Euclidean"));
                let jitter = field_number(fields, "Jitter", 1.0);
                let oct = octaves_field(fields, 1.0);
                let cells = self.noise.cellular(seed_field(fields), metric, jitter);
                if graph.kinds[idx] == DensityType::VoronoiNoise2D {
                    cells.fbm2(x, z, oct)
                } else {
                    cells.fbm3(x, y, z, oct)
                }
            }
            DensityType::FractalNoise2D => {
                let oct = octaves_field(fields, 4.0);
                self.noise.simplex(seed_field(fields)).fbm2(x, z, oct)
            }
            DensityType::FractalNoise3D => {
                let oct = octaves_field(fields, 4.0);
                self.noise.simplex(seed_field(fields)).fbm3(x, y, z, oct)
            }
            DensityType::DomainWarp2D => {
                let amp = field_number(fields, "Amplitude", 1.0);
                let freq = field_number(fields, "Frequency", 0.01);
                let seed = seed_field(fields);
                let (fx, fz) = (x * freq, z * freq);
                let wx = self.noise.simplex(seed).sample2(fx, fz) * amp;
                let wz = self.noise.simplex(seed.wrapping_add(1)).sample2(fx, fz) * amp;
                self.input(ri, Handle::Input, x + wx, y, z + wz)
            }
            DensityType::DomainWarp3D => {
                let amp = field_number(fields, "Amplitude", 1.0);
                let freq = field_number(fields, "Frequency", 0.01);
                let seed = seed_field(fields);
                let (fx, fy, fz) = (x * freq, y * freq, z * freq);
                let wx = self.noise.simplex(seed).sample3(fx, fy, fz) * amp;
                let wy = self.noise.simplex(seed.wrapping_add(1)).sample3(fx, fy, fz) * amp;
                let wz = self.noise.simplex(seed.wrapping_add(2)).sample3(fx, fy, fz) * amp;
                self.input(ri, Handle::Input, x + wx, y + wy, z + wz)
            }

            // ── Arithmetic ──
            DensityType::Sum => {
                let mut sum = self.input(ri, Handle::InputA, x, y, z)
                    + self.input(ri, Handle::InputB, x, y, z);
                for src in ri.indexed() {
                    sum += self.evaluate(src, x, y, z);
                }
                sum
            }
            DensityType::SumSelf => {
                let count = field_number(fields, "Count", 2.0).max(1.0);
                self.input(ri, Handle::Input, x, y, z) * count
            }
            DensityType::WeightedSum => {
                let a = self.indexed(ri, 0, x, y, z);
                let b = self.indexed(ri, 1, x, y, z);
                let weight = |i: usize| match fields.get("Weights") {
                    Some(Value::Array(w)) => w
                        .get(i)
                        .filter(|v| !v.is_null())
                        .map_or(1.0, coerce_number),
                    _ => 1.0,
                };
                a * weight(0) + b * weight(1)
            }
            DensityType::Product => {
                self.indexed(ri, 0, x, y, z) * self.indexed(ri, 1, x, y, z)
            }
            DensityType::Negate => -self.input(ri, Handle::Input, x, y, z),
            DensityType::Abs => self.input(ri, Handle::Input, x, y, z).abs(),
            DensityType::SquareRoot => self.input(ri, Handle::Input, x, y, z).abs().sqrt(),
            DensityType::CubeRoot => self.input(ri, Handle::Input, x, y, z).cbrt(),
            DensityType::Square => {
                let v = self.input(ri, Handle::Input, x, y, z);
                v * v
            }
            DensityType::Cube => {
                let v = self.input(ri, Handle::Input, x, y, z);
                v * v * v
            }
            DensityType::Inverse => {
                let v = self.input(ri, Handle::Input, x, y, z);
                if v == 0.0 {
                    0.0
                } else {
                    1.0 / v
                }
            }
            DensityType::Modulo => {
                let v = self.input(ri, Handle::Input, x, y, z);
                let divisor = field_number(fields, "Divisor", 1.0);
                if divisor == 0.0 {
                    0.0
                } else {
                    v % divisor
                }
            }
            DensityType::AmplitudeConstant => {
                self.input(ri, Handle::Input, x, y, z) * field_number(fields, "Value", 1.0)
            }
            DensityType::Pow => {
                let v = self.input(ri, Handle::Input, x, y, z);
                v.abs().powf(field_number(fields, "Exponent", 2.0)) * sign(v)
            }
            DensityType::Floor => self.input(ri, Handle::Input, x, y, z).floor(),
            DensityType::Ceiling => self.input(ri, Handle::Input, x, y, z).ceil(),
            DensityType::Offset => {
                self.input(ri, Handle::Input, x, y, z) + self.input(ri, Handle::Offset, x, y, z)
            }
            DensityType::Amplitude => {
                self.input(ri, Handle::Input, x, y, z) * self.input(ri, Handle::Amplitude, x, y, z)
            }

            // ── Constants ──
            DensityType::Constant => field_number(fields, "Value", 0.0),
            DensityType::Zero => 0.0,
            DensityType::One => 1.0,
            DensityType::SwitchState => field_number(fields, "State", 0.0),

            // ── Range / remap ──
            DensityType::Clamp => {
                let v = self.input(ri, Handle::Input, x, y, z);
                let lo = field_number(fields, "Min", 0.0);
                let hi = field_number(fields, "Max", 1.0);
                v.min(hi).max(lo)
            }
            DensityType::ClampToIndex => {
                let v = self.input(ri, Handle::Input, x, y, z);
                let lo = field_number(fields, "Min", 0.0);
                let hi = field_number(fields, "Max", 255.0);
                v.floor().min(hi).max(lo)
            }
            DensityType::Normalizer => {
                let v = self.input(ri, Handle::Input, x, y, z);
                remap(
                    v,
                    field_range(fields, "SourceRange", (-1.0, 1.0)),
                    field_range(fields, "TargetRange", (0.0, 1.0)),
                )
            }
            DensityType::DoubleNormalizer => {
                let v = self.input(ri, Handle::Input, x, y, z);
                if v < 0.0 {
                    remap(
                        v,
                        field_range(fields, "SourceRangeA", (-1.0, 0.0)),
                        field_range(fields, "TargetRangeA", (0.0, 0.5)),
                    )
                } else {
                    remap(
                        v,
                        field_range(fields, "SourceRangeB", (0.0, 1.0)),
                        field_range(fields, "TargetRangeB", (0.5, 1.0)),
                    )
                }
            }
            DensityType::RangeChoice | DensityType::Conditional => {
                let default = if graph.kinds[idx] == DensityType::RangeChoice {
                    0.5
                } else {
                    0.0
                };
                let cond = self.input(ri, Handle::Condition, x, y, z);
                let branch = if cond >= field_number(fields, "Threshold", default) {
                    Handle::TrueInput
                } else {
                    Handle::FalseInput
                };
                self.input(ri, branch, x, y, z)
            }
            DensityType::LinearTransform => {
                let v = self.input(ri, Handle::Input, x, y, z);
                v * field_number(fields, "Scale", 1.0) + field_number(fields, "Offset", 0.0)
            }
            DensityType::Interpolate => {
                let a = self.input(ri, Handle::InputA, x, y, z);
                let b = self.input(ri, Handle::InputB, x, y, z);
                let f = self.input(ri, Handle::Factor, x, y, z);
                a + (b - a) * f
            }

            // ── Coordinates and distances ──
            DensityType::CoordinateX => x,
            DensityType::CoordinateY => y,
            DensityType::CoordinateZ => z,
            DensityType::DistanceFromOrigin => (x * x + y * y + z * z).sqrt(),
            DensityType::DistanceFromAxis => match axis_field(fields, "Y") {
                "X" => (y * y + z * z).sqrt(),
                "Z" => (x * x + y * y).sqrt(),
                _ => (x * x + z * z).sqrt(),
            },
            DensityType::DistanceFromPoint => {
                let [px, py, pz] = field_vec3(fields, "Point", [0.0; 3]);
                ((x - px).powi(2) + (y - py).powi(2) + (z - pz).powi(2)).sqrt()
            }
            DensityType::AngleFromOrigin => z.atan2(x),
            DensityType::AngleFromPoint => {
                let [px, _, pz] = field_vec3(fields, "Point", [0.0; 3]);
                (z - pz).atan2(x - px)
            }
            DensityType::Distance => {
                let d = (x * x + y * y + z * z).sqrt();
                self.apply_curve(ri, d)
            }
            DensityType::Gradient | DensityType::YGradient | DensityType::GradientDensity => {
                let from = field_number(fields, "FromY", 0.0);
                let to = field_number(fields, "ToY", DEFAULT_WORLD_HEIGHT);
                let range = to - from;
                if range == 0.0 {
                    0.0
                } else {
                    (y - from) / range
                }
            }
            DensityType::BaseHeight => {
                let name = field_str(fields, "BaseHeightName").unwrap_or("Base");
                let base = self
                    .options
                    .content_fields
                    .get(name)
                    .copied()
                    .unwrap_or(DEFAULT_BASE_HEIGHT);
                if fields.get("Distance") == Some(&Value::Bool(true)) {
                    y - base
                } else {
                    base
                }
            }

            // ── Curves ──
            DensityType::CurveFunction => {
                let v = self.input(ri, Handle::Input, x, y, z);
                self.apply_curve(ri, v)
            }
            DensityType::SplineFunction => {
                let v = self.input(ri, Handle::Input, x, y, z);
                match &graph.curves[idx] {
                    Some(curve) => curve.sample(v),
                    None => v,
                }
            }

            // ── Combinators ──
            DensityType::Switch => {
                let sel = field_number(fields, "Selector", 0.0).floor();
                if sel.is_nan() || sel > u32::MAX as f64 {
                    0.0
                } else {
                    self.indexed(ri, sel.max(0.0) as u32, x, y, z)
                }
            }
            DensityType::Blend => {
                let a = self.input(ri, Handle::InputA, x, y, z);
                let b = self.input(ri, Handle::InputB, x, y, z);
                let f = if ri.has(Handle::Factor) {
                    self.input(ri, Handle::Factor, x, y, z)
                } else {
                    0.5
                };
                a + (b - a) * f
            }
            DensityType::BlendCurve => {
                let a = self.input(ri, Handle::InputA, x, y, z);
                let b = self.input(ri, Handle::InputB, x, y, z);
                let raw = self.input(ri, Handle::Factor, x, y, z);
                let f = self.apply_curve(ri, raw);
                a + (b - a) * f
            }
            DensityType::MinFunction => {
                self.indexed(ri, 0, x, y, z).min(self.indexed(ri, 1, x, y, z))
            }
            DensityType::MaxFunction => {
                self.indexed(ri, 0, x, y, z).max(self.indexed(ri, 1, x, y, z))
            }
            DensityType::AverageFunction => {
                (self.indexed(ri, 0, x, y, z) + self.indexed(ri, 1, x, y, z)) / 2.0
            }

            // ── Smoothing ──
            DensityType::SmoothClamp => {
                let v = self.input(ri, Handle::Input, x, y, z);
                let lo = field_number(fields, "Min", 0.0);
                let hi = field_number(fields, "Max", 1.0);
                let k = field_number(fields, "Smoothness", 0.1);
                smooth_max(smooth_min(v, hi, k), lo, k)
            }
            DensityType::SmoothFloor => {
                let v = self.input(ri, Handle::Input, x, y, z);
                smooth_max(
                    v,
                    field_number(fields, "Threshold", 0.0),
                    field_number(fields, "Smoothness", 0.1),
                )
            }
            DensityType::SmoothCeiling => {
                let v = self.input(ri, Handle::Input, x, y, z);
                smooth_min(
                    v,
                    field_number(fields, "Threshold", 1.0),
                    field_number(fields, "Smoothness", 0.1),
                )
            }
            DensityType::SmoothMin => {
                let a = self.indexed(ri, 0, x, y, z);
                let b = self.indexed(ri, 1, x, y, z);
                smooth_min(a, b, field_number(fields, "Smoothness", 0.1))
            }
            DensityType::SmoothMax => {
                let a = self.indexed(ri, 0, x, y, z);
                let b = self.indexed(ri, 1, x, y, z);
                smooth_max(a, b, field_number(fields, "Smoothness", 0.1))
            }

            // ── Coordinate substitution ──
            DensityType::XOverride => {
                let ox = field_number(fields, "OverrideX", 0.0);
                self.input(ri, Handle::Input, ox, y, z)
            }
            DensityType::YOverride => {
                let oy = match fields.get("OverrideY") {
                    Some(v) if !v.is_null() => coerce_number(v),
                    _ => field_number(fields, "Y", 0.0),
                };
                self.input(ri, Handle::Input, x, oy, z)
            }
            DensityType::ZOverride => {
                let oz = field_number(fields, "OverrideZ", 0.0);
                self.input(ri, Handle::Input, x, y, oz)
            }
            DensityType::YSampled => {
                let sy = self.input(ri, Handle::YProvider, x, y, z);
                self.input(ri, Handle::Input, x, sy, z)
            }
            DensityType::Anchor => self.input(ri, Handle::Input, 0.0, 0.0, 0.0),
            DensityType::TranslatedPosition => {
                let [dx, dy, dz] = field_vec3(fields, "Translation", [0.0; 3]);
                self.input(ri, Handle::Input, x - dx, y - dy, z - dz)
            }
            DensityType::ScaledPosition => {
                let [sx, sy, sz] =
                    field_vec3(fields, "Scale", [1.0; 3]).map(|s| nonzero_or(s, 1.0));
                self.input(ri, Handle::Input, x / sx, y / sy, z / sz)
            }
            DensityType::RotatedPosition => {
                let rad = field_number(fields, "AngleDegrees", 0.0).to_radians();
                let (sin, cos) = rad.sin_cos();
                self.input(ri, Handle::Input, x * cos + z * sin, y, -x * sin + z * cos)
            }
            DensityType::MirroredPosition => {
                let axis = axis_field(fields, "X");
                let mx = if axis == "X" { x.abs() } else { x };
                let my = if axis == "Y" { y.abs() } else { y };
                let mz = if axis == "Z" { z.abs() } else { z };
                self.input(ri, Handle::Input, mx, my, mz)
            }
            DensityType::QuantizedPosition => {
                let step = field_nonzero(fields, "StepSize", 1.0);
                let q = |v: f64| (v / step).floor() * step;
                self.input(ri, Handle::Input, q(x), q(y), q(z))
            }
            DensityType::PositionsPinch => {
                let strength = field_number(fields, "Strength", 1.0);
                let dist = (x * x + z * z).sqrt();
                let pinch = if dist > 0.0 {
                    dist.powf(strength) / dist
                } else {
                    1.0
                };
                self.input(ri, Handle::Input, x * pinch, y, z * pinch)
            }
            DensityType::PositionsTwist => {
                let rad = field_number(fields, "Angle", 0.0) * PI / 180.0 * y;
                let (sin, cos) = rad.sin_cos();
                self.input(ri, Handle::Input, x * cos - z * sin, y, x * sin + z * cos)
            }

            // ── Warps ──
            DensityType::GradientWarp => {
                let scale = field_number(fields, "WarpScale", 1.0);
                let eps = GRADIENT_WARP_STEP;
                let base = self.input(ri, Handle::WarpSource, x, y, z);
                let dx = (self.input(ri, Handle::WarpSource, x + eps, y, z) - base) / eps;
                let dz = (self.input(ri, Handle::WarpSource, x, y, z + eps) - base) / eps;
                self.input(ri, Handle::Input, x + dx * scale, y, z + dz * scale)
            }
            DensityType::VectorWarp => self.input(ri, Handle::Input, x, y, z),

            // ── Cellular position approximations ──
            DensityType::PositionsCellNoise => {
                let max_dist = field_number(fields, "MaxDistance", 0.0);
                let freq = if max_dist > 0.0 {
                    1.0 / max_dist
                } else {
                    field_number(fields, "Frequency", 0.01)
                };
                let metric =
                    CellMetric::parse(field_str(fields, "DistanceFunction").unwrap_or("Euclidean"));
                let raw = self
                    .noise
                    .cellular(seed_field(fields), metric, 1.0)
                    .sample2(x * freq, z * freq);
                if field_str(fields, "ReturnType") == Some("Distance2Div") {
                    raw.abs()
                } else {
                    raw
                }
            }
            DensityType::Positions3D => {
                let freq = field_number(fields, "Frequency", 0.01);
                self.noise
                    .cellular(seed_field(fields), CellMetric::Euclidean, 1.0)
                    .sample3(x * freq, y * freq, z * freq)
            }

            // ── Shape SDFs ──
            DensityType::Ellipsoid => {
                let [rx, ry, rz] =
                    field_vec3(fields, "Radius", [1.0; 3]).map(|r| nonzero_or(r, 1.0));
                ((x / rx).powi(2) + (y / ry).powi(2) + (z / rz).powi(2)).sqrt() - 1.0
            }
            DensityType::Cuboid => {
                let [sx, sy, sz] = field_vec3(fields, "Size", [1.0; 3]).map(|s| nonzero_or(s, 1.0));
                let dx = x.abs() - sx;
                let dy = y.abs() - sy;
                let dz = z.abs() - sz;
                let outside =
                    (dx.max(0.0).powi(2) + dy.max(0.0).powi(2) + dz.max(0.0).powi(2)).sqrt();
                let inside = dx.max(dy).max(dz).min(0.0);
                outside + inside
            }
            DensityType::Cylinder => {
                let radius = field_nonzero(fields, "Radius", 1.0);
                let half_h = field_number(fields, "Height", 2.0) / 2.0;
                let radial = (x * x + z * z).sqrt() - radius;
                let vertical = y.abs() - half_h;
                (radial.max(0.0).powi(2) + vertical.max(0.0).powi(2)).sqrt()
                    + radial.max(vertical).min(0.0)
            }
            DensityType::Plane => {
                let [nx, ny, nz] = field_vec3(fields, "Normal", [0.0, 1.0, 0.0]);
                let len = nonzero_or((nx * nx + ny * ny + nz * nz).sqrt(), 1.0);
                (nx * x + ny * y + nz * z) / len - field_number(fields, "Distance", 0.0)
            }
            DensityType::Shell => {
                let inner = field_number(fields, "InnerRadius", 0.5);
                let outer = field_number(fields, "OuterRadius", 1.0);
                let dist = (x * x + y * y + z * z).sqrt();
                (dist - (inner + outer) / 2.0).abs() - (outer - inner) / 2.0
            }

            // ── Caching and passthrough ──
            DensityType::CacheOnce => {
                let key = MemoKey::new(idx, x, y, z);
                if let Some(&v) = self.memo.get(&key) {
                    return v;
                }
                let v = self.input(ri, Handle::Input, x, y, z);
                self.memo.insert(key, v);
                v
            }
            DensityType::FlatCache
            | DensityType::Wrap
            | DensityType::Passthrough
            | DensityType::Debug
            | DensityType::Exported
            | DensityType::ImportedValue => self.input(ri, Handle::Input, x, y, z),

            // ── Needs host-engine context ──
            DensityType::HeightAboveSurface
            | DensityType::SurfaceDensity
            | DensityType::TerrainBoolean
            | DensityType::TerrainMask
            | DensityType::BeardDensity
            | DensityType::ColumnDensity
            | DensityType::CaveDensity
            | DensityType::Terrain
            | DensityType::CellWallDistance
            | DensityType::DistanceToBiomeEdge
            | DensityType::Pipeline => 0.0,

            // Forward-compatible fallback: follow Input, then Inputs[0].
            DensityType::Unknown => match ri.get(Handle::Input).or_else(|| ri.at(0)) {
                Some(src) => self.evaluate(src, x, y, z),
                None => 0.0,
            },
        }
    }
}

/// Marks a node as on the evaluation stack for the guard's lifetime. The
/// mark is cleared on drop, including during unwinding.
struct Visit<'c, 'g> {
    ctx: &'c mut EvalContext<'g>,
    idx: usize,
}

impl<'c, 'g> Visit<'c, 'g> {
    fn enter(ctx: &'c mut EvalContext<'g>, idx: usize) -> Self {
        ctx.visiting[idx] = true;
        Visit { ctx, idx }
    }
}

impl<'g> Deref for Visit<'_, 'g> {
    type Target = EvalContext<'g>;

    fn deref(&self) -> &Self::Target {
        self.ctx
    }
}

impl DerefMut for Visit<'_, '_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.ctx
    }
}

impl Drop for Visit<'_, '_> {
    fn drop(&mut self) {
        self.ctx.visiting[self.idx] = false;
    }
}

// ── Tests ───────────────────────────────────────────────────────────
