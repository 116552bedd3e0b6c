// eval/curves.rs — Curve sampling and the pluggable curve evaluator table
//
// Manual curves (and SplineFunction point lists) are compiled once into a
// dense Catmull-Rom table with 32 samples per span, then sampled by binary
// search plus linear interpolation. Every other curve kind is resolved through
// a `CurveRegistry` keyed by the curve subtype name.

use crate::eval::graph::{field_number, Fields};
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::sync::OnceLock;

/// Catmull-Rom samples generated per span between two control points.
pub const CURVE_SEGMENTS: usize = 32;

/// Type-string prefix used by curve nodes (`Curve:Manual`, `Curve:Power`, …).
pub const CURVE_PREFIX: &str = "Curve:";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurvePoint {
    pub x: f64,
    pub y: f64,
}

/// Read a control-point list in either `[[x, y], …]` or `[{x, y}, …]` form.
/// Malformed entries become the origin.
pub fn normalize_points(raw: &Value) -> Vec<CurvePoint> {
    let Some(items) = raw.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .map(|p| match p {
            Value::Array(pair) => CurvePoint {
                x: pair.first().and_then(Value::as_f64).unwrap_or(0.0),
                y: pair.get(1).and_then(Value::as_f64).unwrap_or(0.0),
            },
            Value::Object(obj) => CurvePoint {
                x: obj.get("x").and_then(Value::as_f64).unwrap_or(0.0),
                y: obj.get("y").and_then(Value::as_f64).unwrap_or(0.0),
            },
            _ => CurvePoint { x: 0.0, y: 0.0 },
        })
        .collect()
}

/// Densely sample a Catmull-Rom spline through `points` (sorted by x).
/// End tangents reuse the first/last point. Fewer than two points are
/// returned unchanged.
pub fn catmull_rom(points: &[CurvePoint], segments: usize) -> Vec<CurvePoint> {
    let n = points.len();
    if n < 2 {
        return points.to_vec();
    }
    let mut out = Vec::with_capacity((n - 1) * segments + 1);
    for i in 0..n - 1 {
        let p0 = points[i.saturating_sub(1)];
        let p1 = points[i];
        let p2 = points[i + 1];
        let p3 = points[(i + 2).min(n - 1)];
        let spline = |a: f64, b: f64, c: f64, d: f64, t: f64| {
            let t2 = t * t;
            let t3 = t2 * t;
            0.5 * (2.0 * b
                + (c - a) * t
                + (2.0 * a - 5.0 * b + 4.0 * c - d) * t2
                + (3.0 * b - a - 3.0 * c + d) * t3)
        };
        for s in 0..segments {
            let t = s as f64 / segments as f64;
            out.push(CurvePoint {
                x: spline(p0.x, p1.x, p2.x, p3.x, t),
                y: spline(p0.y, p1.y, p2.y, p3.y, t),
            });
        }
    }
    out.push(points[n - 1]);
    out
}

// ── Sampled (manual) curves ─────────────────────────────────────────

/// A control-point curve compiled to a lookup table.
#[derive(Debug, Clone)]
pub struct SampledCurve {
    x_min: f64,
    x_max: f64,
    table: Vec<CurvePoint>,
}

impl SampledCurve {
    /// Compile a `Points` value. `None` when fewer than two points exist;
    /// callers pass the input through in that case.
    pub fn from_points(raw: Option<&Value>) -> Option<SampledCurve> {
        let mut points = normalize_points(raw?);
        if points.len() < 2 {
            return None;
        }
        points.sort_by(|a, b| a.x.total_cmp(&b.x));
        let x_min = points[0].x;
        let x_max = points[points.len() - 1].x;
        Some(SampledCurve {
            x_min,
            x_max,
            table: catmull_rom(&points, CURVE_SEGMENTS),
        })
    }

    /// Clamp `input` to the curve's x-domain, then interpolate between the
    /// two bracketing table entries.
    pub fn sample(&self, input: f64) -> f64 {
        let q = input.max(self.x_min).min(self.x_max);
        let table = &self.table;
        let mut lo = 0usize;
        let mut hi = table.len() - 1;
        while lo + 1 < hi {
            let mid = (lo + hi) >> 1;
            if table[mid].x <= q {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        let (p0, p1) = (table[lo], table[hi]);
        let dx = p1.x - p0.x;
        let t = if dx == 0.0 { 0.0 } else { (q - p0.x) / dx };
        p0.y + (p1.y - p0.y) * t
    }
}

// ── Parametric curves ───────────────────────────────────────────────

/// A curve kind evaluated from its node's fields.
pub trait CurveEvaluator: Send + Sync {
    fn evaluate(&self, fields: &Fields, input: f64) -> f64;
}

impl<F> CurveEvaluator for F
where
    F: Fn(&Fields, f64) -> f64 + Send + Sync,
{
    fn evaluate(&self, fields: &Fields, input: f64) -> f64 {
        self(fields, input)
    }
}

/// Curve evaluators keyed by subtype name (`Power`, `Clamp`, …).
#[derive(Default)]
pub struct CurveRegistry {
    evaluators: FxHashMap<String, Box<dyn CurveEvaluator>>,
}

impl CurveRegistry {
    /// An empty registry: every curve kind passes its input through.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with the built-in curve kinds.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        reg.register("Constant", |f: &Fields, _: f64| field_number(f, "Value", 1.0));
        reg.register("Power", |f: &Fields, v: f64| {
            v.powf(field_number(f, "Exponent", 2.0))
        });
        reg.register("StepFunction", step_function);
        reg.register("Threshold", |f: &Fields, v: f64| {
            if v >= field_number(f, "Threshold", 0.5) {
                1.0
            } else {
                0.0
            }
        });
        reg.register("SmoothStep", smooth_step);
        reg.register("DistanceExponential", distance_exponential);
        reg.register("DistanceS", distance_s);
        reg.register("Inverter", |_: &Fields, v: f64| 1.0 - v);
        reg.register("Not", |_: &Fields, v: f64| 1.0 - v);
        reg.register("Clamp", |f: &Fields, v: f64| {
            v.max(field_number(f, "Min", 0.0))
                .min(field_number(f, "Max", 1.0))
        });
        reg.register("LinearRemap", linear_remap);
        reg.register("Abs", |_: &Fields, v: f64| v.abs());
        reg.register("Square", |_: &Fields, v: f64| v * v);
        reg.register("SquareRoot", |_: &Fields, v: f64| v.abs().sqrt());
        reg.register("Negate", |_: &Fields, v: f64| -v);
        reg
    }

    /// Process-wide shared registry holding the built-ins.
    pub fn builtin() -> &'static CurveRegistry {
        static BUILTIN: OnceLock<CurveRegistry> = OnceLock::new();
        BUILTIN.get_or_init(CurveRegistry::with_builtins)
    }

    /// Add or replace the evaluator for `kind`.
    pub fn register(&mut self, kind: impl Into<String>, evaluator: impl CurveEvaluator + 'static) {
        self.evaluators.insert(kind.into(), Box::new(evaluator));
    }

    pub fn get(&self, kind: &str) -> Option<&dyn CurveEvaluator> {
        self.evaluators.get(kind).map(|e| e.as_ref())
    }

    /// Evaluate `kind`; unknown kinds return `input` unchanged.
    pub fn apply(&self, kind: &str, fields: &Fields, input: f64) -> f64 {
        match self.get(kind) {
            Some(e) => e.evaluate(fields, input),
            None => input,
        }
    }
}

/// Strip the `Curve:` prefix from a curve node's type string.
pub fn curve_kind(type_name: &str) -> &str {
    type_name.strip_prefix(CURVE_PREFIX).unwrap_or(type_name)
}

fn step_function(fields: &Fields, v: f64) -> f64 {
    let steps = field_number(fields, "Steps", 4.0);
    if steps <= 0.0 {
        return v;
    }
    (v * steps).floor() / steps
}

fn smooth_step(fields: &Fields, v: f64) -> f64 {
    let e0 = field_number(fields, "Edge0", 0.0);
    let e1 = field_number(fields, "Edge1", 1.0);
    if e0 == e1 {
        return if v >= e0 { 1.0 } else { 0.0 };
    }
    let t = ((v - e0) / (e1 - e0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// `Min`/`Max` of a nested range object, falling back to flat fields.
fn range_of(fields: &Fields, key: &str, flat: (&str, &str), default: (f64, f64)) -> (f64, f64) {
    match fields.get(key) {
        Some(Value::Object(obj)) => (
            obj.get("Min").and_then(Value::as_f64).unwrap_or(default.0),
            obj.get("Max").and_then(Value::as_f64).unwrap_or(default.1),
        ),
        _ => (
            field_number(fields, flat.0, default.0),
            field_number(fields, flat.1, default.1),
        ),
    }
}

/// `t^exponent` where `t` is the input normalised over `Range` and clamped.
fn distance_exponential(fields: &Fields, v: f64) -> f64 {
    let exp = field_number(fields, "Exponent", 2.0);
    let (lo, hi) = range_of(fields, "Range", ("RangeMin", "RangeMax"), (0.0, 1.0));
    if hi == lo {
        return 0.0;
    }
    ((v - lo) / (hi - lo)).clamp(0.0, 1.0).powf(exp)
}

/// Bell curve `exp(-(|v - offset| / width)^exponent * steepness)`.
fn distance_s(fields: &Fields, v: f64) -> f64 {
    let steepness = field_number(fields, "Steepness", 1.0);
    let offset = field_number(fields, "Offset", 0.5);
    let width = field_number(fields, "Width", 0.5);
    let exponent = field_number(fields, "Exponent", 2.0);
    if width <= 0.0 {
        return 0.0;
    }
    (-((v - offset).abs() / width).powf(exponent) * steepness).exp()
}

fn linear_remap(fields: &Fields, v: f64) -> f64 {
    let (s0, s1) = range_of(fields, "SourceRange", ("SourceMin", "SourceMax"), (0.0, 1.0));
    let (t0, t1) = range_of(fields, "TargetRange", ("TargetMin", "TargetMax"), (0.0, 1.0));
    if s1 == s0 {
        return t0;
    }
    t0 + (v - s0) / (s1 - s0) * (t1 - t0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(pairs: &[(&str, Value)]) -> Fields {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn apply(kind: &str, f: &Fields, v: f64) -> f64 {
        CurveRegistry::builtin().apply(kind, f, v)
    }

    #[test]
    fn constant_and_power() {
        assert_eq!(apply("Constant", &fields(&[("Value", json!(0.5))]), 9.0), 0.5);
        assert_eq!(apply("Power", &fields(&[("Exponent", json!(2))]), 0.5), 0.25);
    }

    #[test]
    fn step_function_quantizes() {
        let f = fields(&[("Steps", json!(4))]);
        assert_eq!(apply("StepFunction", &f, 0.24), 0.0);
        assert_eq!(apply("StepFunction", &f, 0.25), 0.25);
        assert_eq!(apply("StepFunction", &f, 0.49), 0.25);
    }

    #[test]
    fn threshold_is_inclusive() {
        let f = fields(&[("Threshold", json!(0.5))]);
        assert_eq!(apply("Threshold", &f, 0.49), 0.0);
        assert_eq!(apply("Threshold", &f, 0.5), 1.0);
    }

    #[test]
    fn smooth_step_midpoint() {
        let f = fields(&[("Edge0", json!(0)), ("Edge1", json!(1))]);
        assert_eq!(apply("SmoothStep", &f, 0.5), 0.5);
        assert_eq!(apply("SmoothStep", &f, -3.0), 0.0);
    }

    #[test]
    fn distance_exponential_powers_normalised_input() {
        let f = fields(&[("Exponent", json!(2)), ("Range", json!({"Min": 0, "Max": 1}))]);
        assert_eq!(apply("DistanceExponential", &f, 0.5), 0.25);
        assert_eq!(apply("DistanceExponential", &f, 1.0), 1.0);
        assert_eq!(apply("DistanceExponential", &f, 2.0), 1.0);
    }

    #[test]
    fn distance_s_bell() {
        let f = fields(&[
            ("Offset", json!(0)),
            ("Width", json!(1)),
            ("Exponent", json!(2)),
        ]);
        assert_eq!(apply("DistanceS", &f, 0.0), 1.0);
        assert!((apply("DistanceS", &f, 1.0) - (-1.0f64).exp()).abs() < 1e-12);
    }

    #[test]
    fn inverter_and_clamp() {
        assert_eq!(apply("Inverter", &Fields::new(), 0.25), 0.75);
        let f = fields(&[("Min", json!(0.2)), ("Max", json!(0.8))]);
        assert_eq!(apply("Clamp", &f, 0.0), 0.2);
        assert_eq!(apply("Clamp", &f, 1.0), 0.8);
    }

    #[test]
    fn linear_remap_and_degenerate_source() {
        let f = fields(&[
            ("SourceRange", json!({"Min": 0, "Max": 1})),
            ("TargetRange", json!({"Min": 0, "Max": 10})),
        ]);
        assert_eq!(apply("LinearRemap", &f, 0.5), 5.0);
        let d = fields(&[("SourceRange", json!({"Min": 0.5, "Max": 0.5}))]);
        assert_eq!(apply("LinearRemap", &d, 0.5), 0.0);
    }

    #[test]
    fn unknown_kind_passes_through() {
        assert_eq!(apply("Multiplier", &Fields::new(), 7.5), 7.5);
        assert!(CurveRegistry::new().get("Power").is_none());
    }

    #[test]
    fn custom_evaluator_can_be_registered() {
        let mut reg = CurveRegistry::with_builtins();
        reg.register("Double", |_: &Fields, v: f64| v * 2.0);
        assert_eq!(reg.apply("Double", &Fields::new(), 3.0), 6.0);
    }

    #[test]
    fn curve_kind_strips_prefix() {
        assert_eq!(curve_kind("Curve:Manual"), "Manual");
        assert_eq!(curve_kind("Power"), "Power");
    }

    #[test]
    fn catmull_rom_hits_endpoints() {
        let pts = [
            CurvePoint { x: 0.0, y: -0.5 },
            CurvePoint { x: 0.5, y: 1.5 },
            CurvePoint { x: 1.0, y: -0.2 },
        ];
        let out = catmull_rom(&pts, 4);
        assert_eq!(out.len(), 9);
        assert_eq!(out[0], pts[0]);
        assert_eq!(out[8], pts[2]);
        assert!(out.iter().any(|p| p.y > 1.0));
        assert!(catmull_rom(&pts[..1], 4).len() == 1);
    }

    #[test]
    fn sampled_curve_clamps_to_domain() {
        let raw = json!([[1.0, 1.0], [0.0, 0.0]]);
        let curve = SampledCurve::from_points(Some(&raw)).unwrap();
        assert!((curve.sample(0.5) - 0.5).abs() < 0.05);
        assert_eq!(curve.sample(-10.0), 0.0);
        assert!((curve.sample(10.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn sampled_curve_needs_two_points() {
        assert!(SampledCurve::from_points(None).is_none());
        assert!(SampledCurve::from_points(Some(&json!([[0, 0]]))).is_none());
        assert!(SampledCurve::from_points(Some(&json!("nope"))).is_none());
    }

    #[test]
    fn normalize_both_point_forms() {
        let a = normalize_points(&json!([[0.0, 1.0], [0.5, 0.5]]));
        let b = normalize_points(&json!([{"x": 0.0, "y": 1.0}, {"x": 0.5, "y": 0.5}]));
        assert_eq!(a, b);
        assert!(normalize_points(&json!([])).is_empty());
    }
}
