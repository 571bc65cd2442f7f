//! Boundary-condition providers for the channel solver.
//!
//! - upstream inflow at headwater links (`usqot`)
//! - spillway outflow from a lake into the link below it (`spill`)
//! - normal-depth rating curve at the outlet (`rating_curve`)
//! - water-surface target at the outlet in drain runs (`dsyot`)

use std::collections::HashMap;

use crate::section::{ReservoirParams, SectionProps};

/// Piecewise-linear series of `(time, value)` samples, held flat past both ends.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    points: Vec<(f64, f64)>,
}

impl TimeSeries {
    pub fn new(mut points: Vec<(f64, f64)>) -> Self {
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        TimeSeries { points }
    }

    pub fn constant(value: f64) -> Self {
        TimeSeries {
            points: vec![(0.0, value)],
        }
    }

    pub fn value_at(&self, time: f64) -> f64 {
        let Some(&(t0, v0)) = self.points.first() else {
            return 0.0;
        };
        if time <= t0 {
            return v0;
        }
        for pair in self.points.windows(2) {
            let (ta, va) = pair[0];
            let (tb, vb) = pair[1];
            if time <= tb {
                if tb == ta {
                    return vb;
                }
                return va + (vb - va) * (time - ta) / (tb - ta);
            }
        }
        self.points[self.points.len() - 1].1
    }
}

/// Boundary forcing for one run.
#[derive(Debug, Clone, Default)]
pub struct Boundaries {
    /// inflow hydrographs keyed by link index
    pub inflows: HashMap<usize, TimeSeries>,
    /// constant inflow for headwater links without a hydrograph
    pub base_inflow: f64,
    /// outlet water-surface elevation series for drain runs
    pub stage_target: Option<TimeSeries>,
}

impl Boundaries {
    pub fn constant(base_inflow: f64) -> Self {
        Boundaries {
            base_inflow,
            ..Boundaries::default()
        }
    }
}

/// Discharge entering headwater link `link` at `time`.
pub fn usqot(boundaries: &Boundaries, link: usize, time: f64) -> f64 {
    match boundaries.inflows.get(&link) {
        Some(series) => series.value_at(time),
        None => boundaries.base_inflow,
    }
}

/// Spillway discharge for a lake standing at `elevation`.
pub fn spill(params: &ReservoirParams, elevation: f64) -> f64 {
    let head = elevation - params.crest;
    if head <= 0.0 {
        return 0.0;
    }
    params.spill_coeff * params.spill_width * head.powf(1.5)
}

/// Discharge and its stage derivative on the normal-depth rating curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rating {
    pub discharge: f64,
    pub d_discharge: f64,
}

/// `Q = K sqrt(S0)` evaluated from the outlet section properties. Tabulated
/// sections beyond their deepest row use the extrapolated conveyance.
pub fn rating_curve(props: &SectionProps, slope: f64) -> Rating {
    let root = slope.max(0.0).sqrt();
    Rating {
        discharge: props.conveyance * root,
        d_discharge: props.d_conveyance * root,
    }
}

/// Outlet water-surface target at `time`, if the run has one.
pub fn dsyot(boundaries: &Boundaries, time: f64) -> Option<f64> {
    boundaries
        .stage_target
        .as_ref()
        .map(|series| series.value_at(time))
}
