// eval/node_type.rs — Closed set of density node types
//
// Node type strings are mapped once, at graph construction time, to a
// `DensityType` tag. The evaluator matches on the tag exhaustively, so adding
// a variant without a handler is a compile error. Strings that match no
// variant become `DensityType::Unknown`, which keeps the lenient
// follow-the-Input fallback for graphs written by newer editors.

/// Declares `DensityType` together with its string table.
macro_rules! density_types {
    ($($variant:ident),* $(,)?) => {
        /// Density function type tag.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum DensityType {
            $($variant,)*
            /// Unrecognised type string.
            Unknown,
        }

        impl DensityType {
            /// Every known variant, in declaration order.
            pub const ALL: &'static [DensityType] = &[$(DensityType::$variant,)*];

            /// Map a node type string to its tag.
            pub fn parse(name: &str) -> DensityType {
                match name {
                    $(stringify!($variant) => DensityType::$variant,)*
                    // Older graphs spell Cube this way.
                    "CubeMath" => DensityType::Cube,
                    _ => DensityType::Unknown,
                }
            }

            /// Canonical type string.
            pub fn name(self) -> &'static str {
                match self {
                    $(DensityType::$variant => stringify!($variant),)*
                    DensityType::Unknown => "Unknown",
                }
            }
        }
    };
}

density_types! {
    // Noise
    SimplexNoise2D,
    SimplexNoise3D,
    SimplexRidgeNoise2D,
    SimplexRidgeNoise3D,
    VoronoiNoise2D,
    VoronoiNoise3D,
    FractalNoise2D,
    FractalNoise3D,
    DomainWarp2D,
    DomainWarp3D,
    // Arithmetic
    Sum,
    SumSelf,
    WeightedSum,
    Product,
    Negate,
    Abs,
    SquareRoot,
    CubeRoot,
    Square,
    Cube,
    Inverse,
    Modulo,
    AmplitudeConstant,
    Pow,
    Floor,
    Ceiling,
    Offset,
    Amplitude,
    // Constants
    Constant,
    ImportedValue,
    Zero,
    One,
    SwitchState,
    // Range / remap
    Clamp,
    ClampToIndex,
    Normalizer,
    DoubleNormalizer,
    RangeChoice,
    LinearTransform,
    Interpolate,
    // Coordinates and distances
    CoordinateX,
    CoordinateY,
    CoordinateZ,
    DistanceFromOrigin,
    DistanceFromAxis,
    DistanceFromPoint,
    AngleFromOrigin,
    AngleFromPoint,
    Distance,
    Gradient,
    YGradient,
    GradientDensity,
    BaseHeight,
    // Curves
    CurveFunction,
    SplineFunction,
    // Combinators
    Conditional,
    Switch,
    Blend,
    BlendCurve,
    MinFunction,
    MaxFunction,
    AverageFunction,
    // Smoothing
    SmoothClamp,
    SmoothFloor,
    SmoothCeiling,
    SmoothMin,
    SmoothMax,
    // Coordinate substitution
    XOverride,
    YOverride,
    ZOverride,
    YSampled,
    Anchor,
    TranslatedPosition,
    ScaledPosition,
    RotatedPosition,
    MirroredPosition,
    QuantizedPosition,
    PositionsPinch,
    PositionsTwist,
    // Warps
    GradientWarp,
    VectorWarp,
    // Cellular position approximations
    PositionsCellNoise,
    Positions3D,
    // Shape SDFs
    Ellipsoid,
    Cuboid,
    Cylinder,
    Plane,
    Shell,
    // Caching and passthrough
    CacheOnce,
    FlatCache,
    Wrap,
    Passthrough,
    Debug,
    Exported,
    // Context-dependent (need host-engine data)
    HeightAboveSurface,
    SurfaceDensity,
    TerrainBoolean,
    TerrainMask,
    BeardDensity,
    ColumnDensity,
    CaveDensity,
    Terrain,
    CellWallDistance,
    DistanceToBiomeEdge,
    Pipeline,
}

/// How faithfully the preview reproduces a node type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum EvalStatus {
    /// Evaluated with the documented formula.
    Full,
    /// Evaluated with a simplified stand-in.
    Approximated,
    /// Requires host-engine context; always evaluates to 0.
    Unsupported,
}

impl DensityType {
    /// Whether this type belongs to the density-node set used by root
    /// resolution.
    #[inline]
    pub fn is_density(self) -> bool {
        self != DensityType::Unknown
    }

    /// Types that need world/biome/pipeline context this tool does not have.
    pub fn is_context_dependent(self) -> bool {
        matches!(
            self,
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
                | DensityType::Pipeline
        )
    }

    pub fn status(self) -> EvalStatus {
        if self.is_context_dependent() {
            return EvalStatus::Unsupported;
        }
        match self {
            DensityType::VectorWarp
            | DensityType::PositionsCellNoise
            | DensityType::Positions3D
            | DensityType::PositionsPinch
            | DensityType::PositionsTwist
            | DensityType::GradientWarp
            | DensityType::Shell => EvalStatus::Approximated,
            _ => EvalStatus::Full,
        }
    }
}

/// Evaluation status for a raw type string. Unknown strings report `Full`
/// since they are passed through rather than stubbed.
pub fn eval_status(type_name: &str) -> EvalStatus {
    DensityType::parse(type_name).status()
}
