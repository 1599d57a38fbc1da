use crate::error::InvalidTrajectory;
use serde::{Deserialize, Serialize};

/// A single `(time, value)` sample of a trajectory. Time is in seconds of
/// playback time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlPoint {
    pub time: f64,
    pub value: f64,
}

impl ControlPoint {
    pub fn new(time: f64, value: f64) -> Self {
        Self { time, value }
    }
}

impl From<(f64, f64)> for ControlPoint {
    fn from((time, value): (f64, f64)) -> Self {
        Self { time, value }
    }
}

/// Piecewise-linear function of time reconstructed from sparse control points.
///
/// Values are held flat before the first and after the last point. Points are
/// sorted by time on construction; if two points share a time, the one
/// supplied last wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TrajectoryRepr", into = "TrajectoryRepr")]
pub struct Trajectory {
    points: Vec<ControlPoint>,
}

/// Configuration form: a bare number or a list of `[time, value]` pairs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum TrajectoryRepr {
    Constant(f64),
    Points(Vec<(f64, f64)>),
}

impl Trajectory {
    pub fn from_points<P, I>(points: I) -> Result<Self, InvalidTrajectory>
    where
        P: Into<ControlPoint>,
        I: IntoIterator<Item = P>,
    {
        let mut points: Vec<ControlPoint> = points.into_iter().map(Into::into).collect();
        if points.is_empty() {
            return Err(InvalidTrajectory::Empty);
        }
        if let Some(index) = points
            .iter()
            .position(|p| !p.time.is_finite() || !p.value.is_finite())
        {
            return Err(InvalidTrajectory::NonFinite { index });
        }

        // stable sort keeps supply order among equal times
        points.sort_by(|a, b| a.time.total_cmp(&b.time));
        let mut deduped: Vec<ControlPoint> = Vec::with_capacity(points.len());
        for p in points {
            match deduped.last_mut() {
                Some(last) if last.time == p.time => *last = p,
                _ => deduped.push(p),
            }
        }

        Ok(Self { points: deduped })
    }

    pub fn constant(value: f64) -> Self {
        Self {
            points: vec![ControlPoint::new(0.0, value)],
        }
    }

    pub fn eval_at(&self, t: f64) -> f64 {
        let first = self.points[0];
        // NaN holds the first value
        if !(t > first.time) {
            return first.value;
        }
        let last = self.points[self.points.len() - 1];
        if t >= last.time {
            return last.value;
        }

        // first index with time > t; 1..len because of the clamps above
        let hi = self.points.partition_point(|p| p.time <= t);
        let p0 = self.points[hi - 1];
        let p1 = self.points[hi];
        p0.value + (p1.value - p0.value) * (t - p0.time) / (p1.time - p0.time)
    }

    pub fn points(&self) -> &[ControlPoint] {
        &self.points
    }

    pub fn start_time(&self) -> f64 {
        self.points[0].time
    }

    pub fn end_time(&self) -> f64 {
        self.points[self.points.len() - 1].time
    }
}

impl TryFrom<TrajectoryRepr> for Trajectory {
    type Error = InvalidTrajectory;

    fn try_from(repr: TrajectoryRepr) -> Result<Self, Self::Error> {
        match repr {
            TrajectoryRepr::Constant(v) if v.is_finite() => Ok(Trajectory::constant(v)),
            TrajectoryRepr::Constant(_) => Err(InvalidTrajectory::NonFinite { index: 0 }),
            TrajectoryRepr::Points(points) => Trajectory::from_points(points),
        }
    }
}

impl From<Trajectory> for TrajectoryRepr {
    fn from(trajectory: Trajectory) -> Self {
        TrajectoryRepr::Points(
            trajectory
                .points
                .into_iter()
                .map(|p| (p.time, p.value))
                .collect(),
        )
    }
}

impl Default for Trajectory {
    fn default() -> Self {
        Trajectory::constant(0.0)
    }
}
