use crate::error::ConfigurationError;
use crate::trajectory::Trajectory;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::f64::consts::{FRAC_PI_2, PI};

/// Live correction derived from the tracker, applied on top of every frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClosedLoopOffset {
    /// Azimuthal rotation of the viewer, radians.
    pub theta_offset: f64,
    pub position: [f64; 3],
}

/// A single value handed to the renderer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Scalar(f64),
    Flag(bool),
    Array(Vec<f64>),
}

/// Parameter slots for one stimulus on one frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StimulusFrame {
    pub stimulus: &'static str,
    pub params: BTreeMap<&'static str, ParamValue>,
}

impl StimulusFrame {
    pub fn new(stimulus: &'static str) -> Self {
        Self {
            stimulus,
            params: BTreeMap::new(),
        }
    }

    pub fn set(&mut self, name: &'static str, value: f64) -> &mut Self {
        self.params.insert(name, ParamValue::Scalar(value));
        self
    }

    pub fn set_flag(&mut self, name: &'static str, value: bool) -> &mut Self {
        self.params.insert(name, ParamValue::Flag(value));
        self
    }

    pub fn set_array(&mut self, name: &'static str, values: Vec<f64>) -> &mut Self {
        self.params.insert(name, ParamValue::Array(values));
        self
    }

    pub fn scalar(&self, name: &str) -> Option<f64> {
        match self.params.get(name) {
            Some(ParamValue::Scalar(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn flag(&self, name: &str) -> Option<bool> {
        match self.params.get(name) {
            Some(ParamValue::Flag(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn array(&self, name: &str) -> Option<&[f64]> {
        match self.params.get(name) {
            Some(ParamValue::Array(v)) => Some(v),
            _ => None,
        }
    }
}

/// A stimulus program as seen by the screen runtime.
pub trait Stimulus: Send + std::fmt::Debug + Sized {
    /// Builds a fresh program from a flat configuration mapping.
    fn configure(name: &str, config: &Map<String, Value>) -> Result<Self, ConfigurationError>;

    fn name(&self) -> &'static str;

    /// Parameter values at `playback_time`. Must not mutate the program.
    fn eval_at(&self, playback_time: f64, offset: &ClosedLoopOffset) -> StimulusFrame;

    /// Changes the drift rate (degrees per second) at `playback_time` without
    /// a jump in phase. Kinds without a rate ignore it.
    fn update_rate(&mut self, _rate: f64, _playback_time: f64) {}
}

const RANDOM_BAR_COUNT: usize = 64;
const GRID_THETA: usize = 256;
const GRID_PHI: usize = 128;

/// Phase bookkeeping shared by every drifting grating.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GratingState {
    /// Spatial frequency, radians of phase per radian of visual angle.
    pub k: f64,
    pub k_theta: f64,
    pub k_phi: f64,
    /// Drift rate, radians per second.
    pub rate: f64,
    pub offset: f64,
}

impl GratingState {
    pub fn new(period_deg: f64, rate_deg: f64, angle_deg: f64) -> Self {
        let k = 2.0 * PI / period_deg.to_radians();
        let angle = angle_deg.to_radians();
        Self {
            k,
            k_theta: k * angle.cos(),
            k_phi: k * angle.sin(),
            rate: rate_deg.to_radians(),
            offset: 0.0,
        }
    }

    pub fn omega(&self) -> f64 {
        self.rate * self.k
    }

    /// Spatially constant part of the grating phase at time `t`.
    pub fn phase_at(&self, t: f64) -> f64 {
        self.offset - self.omega() * t
    }

    pub fn update_rate(&mut self, rate_deg: f64, t: f64) {
        let new_rate = rate_deg.to_radians();
        self.offset += (new_rate - self.rate) * self.k * t;
        self.rate = new_rate;
    }

    fn write(&self, frame: &mut StimulusFrame, t: f64, offset: &ClosedLoopOffset) {
        frame
            .set("k_theta", self.k_theta)
            .set("k_phi", self.k_phi)
            .set("omega", self.omega())
            .set("offset", self.offset + self.k_theta * offset.theta_offset)
            .set("t", t);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct GratingConfig {
    period: f64,
    rate: f64,
    color: f64,
    background: f64,
    angle: f64,
}

impl Default for GratingConfig {
    fn default() -> Self {
        Self {
            period: 20.0,
            rate: 10.0,
            color: 1.0,
            background: 0.0,
            angle: 45.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RotatingBarsConfig {
    duty_cycle: f64,
    period: f64,
    rate: f64,
    color: f64,
    background: f64,
    angle: f64,
}

impl Default for RotatingBarsConfig {
    fn default() -> Self {
        let g = GratingConfig::default();
        Self {
            duty_cycle: 0.5,
            period: g.period,
            rate: g.rate,
            color: g.color,
            background: g.background,
            angle: g.angle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ExpandingEdgesConfig {
    init_width: f64,
    expand_rate: f64,
    period: f64,
    rate: f64,
    color: f64,
    background: f64,
    angle: f64,
}

impl Default for ExpandingEdgesConfig {
    fn default() -> Self {
        let g = GratingConfig::default();
        Self {
            init_width: 2.0,
            expand_rate: 10.0,
            period: 15.0,
            rate: 0.0,
            color: g.color,
            background: g.background,
            angle: g.angle,
        }
    }
}

/// Per-axis trajectories of a moving rectangle, all in degrees except color.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RectangleTrajectory {
    pub x: Trajectory,
    pub y: Trajectory,
    pub w: Trajectory,
    pub h: Trajectory,
    pub angle: Trajectory,
    pub color: Trajectory,
}

impl Default for RectangleTrajectory {
    fn default() -> Self {
        Self {
            x: Trajectory::constant(0.0),
            y: Trajectory::constant(90.0),
            w: Trajectory::constant(10.0),
            h: Trajectory::constant(10.0),
            angle: Trajectory::constant(0.0),
            color: Trajectory::constant(1.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vary {
    #[default]
    Intensity,
    Alpha,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct MovingPatchConfig {
    trajectory: RectangleTrajectory,
    background: Option<f64>,
    vary: Vary,
}

impl Default for MovingPatchConfig {
    fn default() -> Self {
        Self {
            trajectory: RectangleTrajectory::default(),
            background: Some(0.0),
            vary: Vary::Intensity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RandomBarsConfig {
    period: f64,
    vert_extent: f64,
    width: f64,
    rand_min: f64,
    rand_max: f64,
    start_seed: f64,
    update_rate: f64,
    background: f64,
}

impl Default for RandomBarsConfig {
    fn default() -> Self {
        Self {
            period: 15.0,
            vert_extent: 30.0,
            width: 2.0,
            rand_min: 0.0,
            rand_max: 1.0,
            start_seed: 0.0,
            update_rate: 60.0,
            background: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SequentialBarsConfig {
    width: f64,
    period: f64,
    offset: f64,
    first_active_bright: bool,
    second_active_bright: bool,
    first_active_time: f64,
    second_active_time: f64,
    background: f64,
}

impl Default for SequentialBarsConfig {
    fn default() -> Self {
        Self {
            width: 5.0,
            period: 20.0,
            offset: 0.0,
            first_active_bright: true,
            second_active_bright: true,
            first_active_time: 1.0,
            second_active_time: 2.0,
            background: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct DistributionConfig {
    name: String,
    args: Vec<f64>,
    kwargs: Map<String, Value>,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            name: "Uniform".to_string(),
            args: vec![0.0, 1.0],
            kwargs: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RandomGridConfig {
    theta_period: f64,
    phi_period: f64,
    start_seed: f64,
    update_rate: f64,
    distribution: DistributionConfig,
}

impl Default for RandomGridConfig {
    fn default() -> Self {
        Self {
            theta_period: 15.0,
            phi_period: 15.0,
            start_seed: 0.0,
            update_rate: 60.0,
            distribution: DistributionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct CheckerboardConfig {
    theta_period: f64,
    phi_period: f64,
}

impl Default for CheckerboardConfig {
    fn default() -> Self {
        Self {
            theta_period: 2.0,
            phi_period: 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConstantBackgroundConfig {
    background: f64,
}

/// Seeded noise that every screen reproduces identically for the same frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseSchedule {
    pub start_seed: f64,
    pub update_rate: f64,
    pub min: f64,
    pub max: f64,
}

impl NoiseSchedule {
    pub fn seed_at(&self, t: f64) -> u64 {
        (self.start_seed + t * self.update_rate).round() as i64 as u64
    }

    pub fn values_at(&self, t: f64, count: usize) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(self.seed_at(t));
        (0..count)
            .map(|_| rng.random_range(self.min..=self.max))
            .collect()
    }
}

/// Every stimulus kind the screens know how to parameterize.
#[derive(Debug, Clone, PartialEq)]
pub enum StimulusProgram {
    ConstantBackground {
        background: f64,
    },
    SineGrating {
        grating: GratingState,
        color: f64,
        background: f64,
    },
    RotatingBars {
        grating: GratingState,
        duty_cycle: f64,
        color: f64,
        background: f64,
    },
    ExpandingEdges {
        grating: GratingState,
        init_width: f64,
        expand_rate: f64,
        period: f64,
        color: f64,
        background: f64,
    },
    MovingPatch {
        trajectory: RectangleTrajectory,
        background: Option<f64>,
        vary: Vary,
    },
    RandomBars {
        noise: NoiseSchedule,
        phi_min: f64,
        phi_max: f64,
        theta_period: f64,
        theta_duty: f64,
        background: f64,
    },
    SequentialBars {
        theta_offset: f64,
        theta_period: f64,
        thresh_first: f64,
        thresh_second: f64,
        color_first: f64,
        color_second: f64,
        first_active_time: f64,
        second_active_time: f64,
        background: f64,
    },
    RandomGrid {
        noise: NoiseSchedule,
        theta_period: f64,
        phi_period: f64,
    },
    Checkerboard {
        theta_period: f64,
        phi_period: f64,
    },
}

impl StimulusProgram {
    pub const KINDS: [&'static str; 9] = [
        "ConstantBackground",
        "SineGrating",
        "RotatingBars",
        "ExpandingEdges",
        "MovingPatch",
        "RandomBars",
        "SequentialBars",
        "RandomGrid",
        "Checkerboard",
    ];

    pub fn grating(&self) -> Option<&GratingState> {
        match self {
            Self::SineGrating { grating, .. }
            | Self::RotatingBars { grating, .. }
            | Self::ExpandingEdges { grating, .. } => Some(grating),
            _ => None,
        }
    }
}

fn parse<T: DeserializeOwned>(
    stimulus: &'static str,
    config: &Map<String, Value>,
) -> Result<T, ConfigurationError> {
    serde_json::from_value(Value::Object(config.clone()))
        .map_err(|source| ConfigurationError::Invalid { stimulus, source })
}

fn require(
    ok: bool,
    stimulus: &'static str,
    param: &'static str,
    reason: &str,
) -> Result<(), ConfigurationError> {
    if ok {
        Ok(())
    } else {
        Err(ConfigurationError::Value {
            stimulus,
            param,
            reason: reason.to_string(),
        })
    }
}

fn positive(stimulus: &'static str, param: &'static str, v: f64) -> Result<(), ConfigurationError> {
    require(v.is_finite() && v > 0.0, stimulus, param, "must be a positive number")
}

fn unit_interval(
    stimulus: &'static str,
    param: &'static str,
    v: f64,
) -> Result<(), ConfigurationError> {
    require((0.0..=1.0).contains(&v), stimulus, param, "must lie in [0, 1]")
}

fn noise_range(
    stimulus: &'static str,
    min: f64,
    max: f64,
) -> Result<(), ConfigurationError> {
    require(
        min.is_finite() && max.is_finite() && min <= max,
        stimulus,
        "rand_min",
        "must be finite and not exceed the maximum",
    )
}

impl Stimulus for StimulusProgram {
    fn configure(name: &str, config: &Map<String, Value>) -> Result<Self, ConfigurationError> {
        match name {
            "ConstantBackground" => {
                let c: ConstantBackgroundConfig = parse("ConstantBackground", config)?;
                Ok(Self::ConstantBackground {
                    background: c.background,
                })
            }
            "SineGrating" => {
                let c: GratingConfig = parse("SineGrating", config)?;
                positive("SineGrating", "period", c.period)?;
                Ok(Self::SineGrating {
                    grating: GratingState::new(c.period, c.rate, c.angle),
                    color: c.color,
                    background: c.background,
                })
            }
            "RotatingBars" => {
                let c: RotatingBarsConfig = parse("RotatingBars", config)?;
                positive("RotatingBars", "period", c.period)?;
                unit_interval("RotatingBars", "duty_cycle", c.duty_cycle)?;
                Ok(Self::RotatingBars {
                    grating: GratingState::new(c.period, c.rate, c.angle),
                    duty_cycle: c.duty_cycle,
                    color: c.color,
                    background: c.background,
                })
            }
            "ExpandingEdges" => {
                let c: ExpandingEdgesConfig = parse("ExpandingEdges", config)?;
                positive("ExpandingEdges", "period", c.period)?;
                Ok(Self::ExpandingEdges {
                    grating: GratingState::new(c.period, c.rate, c.angle),
                    init_width: c.init_width,
                    expand_rate: c.expand_rate,
                    period: c.period,
                    color: c.color,
                    background: c.background,
                })
            }
            "MovingPatch" => {
                let c: MovingPatchConfig = parse("MovingPatch", config)?;
                Ok(Self::MovingPatch {
                    trajectory: c.trajectory,
                    background: c.background,
                    vary: c.vary,
                })
            }
            "RandomBars" => {
                let c: RandomBarsConfig = parse("RandomBars", config)?;
                positive("RandomBars", "period", c.period)?;
                noise_range("RandomBars", c.rand_min, c.rand_max)?;
                Ok(Self::RandomBars {
                    noise: NoiseSchedule {
                        start_seed: c.start_seed,
                        update_rate: c.update_rate,
                        min: c.rand_min,
                        max: c.rand_max,
                    },
                    phi_min: FRAC_PI_2 - c.vert_extent.to_radians(),
                    phi_max: FRAC_PI_2 + c.vert_extent.to_radians(),
                    theta_period: c.period.to_radians(),
                    theta_duty: c.width / c.period,
                    background: c.background,
                })
            }
            "SequentialBars" => {
                let c: SequentialBarsConfig = parse("SequentialBars", config)?;
                positive("SequentialBars", "period", c.period)?;
                Ok(Self::SequentialBars {
                    theta_offset: c.offset.to_radians(),
                    theta_period: c.period.to_radians(),
                    thresh_first: c.width / c.period,
                    thresh_second: 2.0 * c.width / c.period,
                    color_first: if c.first_active_bright { 1.0 } else { 0.0 },
                    color_second: if c.second_active_bright { 1.0 } else { 0.0 },
                    first_active_time: c.first_active_time,
                    second_active_time: c.second_active_time,
                    background: c.background,
                })
            }
            "RandomGrid" => {
                let c: RandomGridConfig = parse("RandomGrid", config)?;
                positive("RandomGrid", "theta_period", c.theta_period)?;
                positive("RandomGrid", "phi_period", c.phi_period)?;
                let (min, max) = uniform_bounds(&c.distribution)?;
                Ok(Self::RandomGrid {
                    noise: NoiseSchedule {
                        start_seed: c.start_seed,
                        update_rate: c.update_rate,
                        min,
                        max,
                    },
                    theta_period: c.theta_period.to_radians(),
                    phi_period: c.phi_period.to_radians(),
                })
            }
            "Checkerboard" => {
                let c: CheckerboardConfig = parse("Checkerboard", config)?;
                positive("Checkerboard", "theta_period", c.theta_period)?;
                positive("Checkerboard", "phi_period", c.phi_period)?;
                Ok(Self::Checkerboard {
                    theta_period: c.theta_period.to_radians(),
                    phi_period: c.phi_period.to_radians(),
                })
            }
            other => Err(ConfigurationError::UnknownStimulus(other.to_string())),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::ConstantBackground { .. } => "ConstantBackground",
            Self::SineGrating { .. } => "SineGrating",
            Self::RotatingBars { .. } => "RotatingBars",
            Self::ExpandingEdges { .. } => "ExpandingEdges",
            Self::MovingPatch { .. } => "MovingPatch",
            Self::RandomBars { .. } => "RandomBars",
            Self::SequentialBars { .. } => "SequentialBars",
            Self::RandomGrid { .. } => "RandomGrid",
            Self::Checkerboard { .. } => "Checkerboard",
        }
    }

    fn eval_at(&self, t: f64, offset: &ClosedLoopOffset) -> StimulusFrame {
        let mut frame = StimulusFrame::new(self.name());
        match self {
            Self::ConstantBackground { background } => {
                frame.set("background", *background);
            }
            Self::SineGrating {
                grating,
                color,
                background,
            } => {
                grating.write(&mut frame, t, offset);
                frame.set("face_color", *color).set("background", *background);
            }
            Self::RotatingBars {
                grating,
                duty_cycle,
                color,
                background,
            } => {
                grating.write(&mut frame, t, offset);
                frame
                    .set("duty_cycle", *duty_cycle)
                    .set("face_color", *color)
                    .set("background", *background);
            }
            Self::ExpandingEdges {
                grating,
                init_width,
                expand_rate,
                period,
                color,
                background,
            } => {
                grating.write(&mut frame, t, offset);
                frame
                    .set("duty_cycle", (init_width + t * expand_rate) / period)
                    .set("face_color", *color)
                    .set("background", *background);
            }
            Self::MovingPatch {
                trajectory,
                background,
                vary,
            } => {
                frame
                    .set(
                        "theta_center",
                        trajectory.x.eval_at(t).to_radians() + offset.theta_offset,
                    )
                    .set("phi_center", trajectory.y.eval_at(t).to_radians())
                    .set("theta_width", trajectory.w.eval_at(t).to_radians())
                    .set("phi_width", trajectory.h.eval_at(t).to_radians())
                    .set("angle", trajectory.angle.eval_at(t).to_radians())
                    .set("face_color", trajectory.color.eval_at(t))
                    .set_flag("use_alpha", *vary == Vary::Alpha)
                    .set_flag("draw_background", background.is_some());
                if let Some(bg) = background {
                    frame.set("background", *bg);
                }
            }
            Self::RandomBars {
                noise,
                phi_min,
                phi_max,
                theta_period,
                theta_duty,
                background,
            } => {
                frame
                    .set("phi_min", *phi_min)
                    .set("phi_max", *phi_max)
                    .set("theta_period", *theta_period)
                    .set("theta_offset", -theta_period / 2.0 + offset.theta_offset)
                    .set("theta_duty", *theta_duty)
                    .set("background", *background)
                    .set_array("face_colors", noise.values_at(t, RANDOM_BAR_COUNT));
            }
            Self::SequentialBars {
                theta_offset,
                theta_period,
                thresh_first,
                thresh_second,
                color_first,
                color_second,
                first_active_time,
                second_active_time,
                background,
            } => {
                frame
                    .set("theta_offset", theta_offset + offset.theta_offset)
                    .set("theta_period", *theta_period)
                    .set("thresh_first", *thresh_first)
                    .set("thresh_second", *thresh_second)
                    .set("color_first", *color_first)
                    .set("color_second", *color_second)
                    .set("background", *background)
                    .set_flag("enable_first", t >= *first_active_time)
                    .set_flag("enable_second", t >= *second_active_time);
            }
            Self::RandomGrid {
                noise,
                theta_period,
                phi_period,
            } => {
                frame
                    .set("theta_period", *theta_period)
                    .set("phi_period", *phi_period)
                    .set("theta_offset", offset.theta_offset)
                    .set_array("grid_values", noise.values_at(t, GRID_THETA * GRID_PHI));
            }
            Self::Checkerboard {
                theta_period,
                phi_period,
            } => {
                frame
                    .set("theta_period", *theta_period)
                    .set("phi_period", *phi_period)
                    .set("theta_offset", offset.theta_offset);
            }
        }

        let [x, y, z] = offset.position;
        frame.set("viewer_x", x).set("viewer_y", y).set("viewer_z", z);
        frame
    }

    fn update_rate(&mut self, rate: f64, t: f64) {
        match self {
            Self::SineGrating { grating, .. }
            | Self::RotatingBars { grating, .. }
            | Self::ExpandingEdges { grating, .. } => grating.update_rate(rate, t),
            _ => {}
        }
    }
}

fn uniform_bounds(dist: &DistributionConfig) -> Result<(f64, f64), ConfigurationError> {
    require(
        dist.name == "Uniform",
        "RandomGrid",
        "distribution",
        &format!("unsupported distribution '{}'", dist.name),
    )?;
    let kw = |key: &str| dist.kwargs.get(key).and_then(Value::as_f64);
    let min = dist.args.first().copied().or_else(|| kw("rand_min")).unwrap_or(0.0);
    let max = dist.args.get(1).copied().or_else(|| kw("rand_max")).unwrap_or(1.0);
    noise_range("RandomGrid", min, max)?;
    Ok((min, max))
}
