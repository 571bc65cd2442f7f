//! Linearised Preissmann box-scheme equations for one node pair.
//!
//! Each builder returns the Newton correction equations
//!
//! ```text
//! a  dQ1 + b  dy1 + c  dQ2 + d  dy2 = g     (continuity / structure row)
//! ap dQ1 + bp dy1 + cp dQ2 + dp dy2 = gp    (momentum / pass-through row)
//! ```
//!
//! with `g` and `gp` the negated residuals at the current iterate.

use crate::config::SolverParams;
use crate::network::WeirCrest;
use crate::section::SectionProps;

const AREA_FLOOR: f64 = 1e-9;
const CONVEYANCE_FLOOR: f64 = 1e-9;

/// Froude number above which a warning is raised.
pub const FROUDE_WARNING: f64 = 0.9;

/// Singular-band half width for the submerged weir relation, per unit gravity.
const WEIR_EPS: f64 = 1e-4;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Coefficients {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub g: f64,
    pub ap: f64,
    pub bp: f64,
    pub cp: f64,
    pub dp: f64,
    pub gp: f64,
}

/// Discharge and stage at both ends of a segment, at the current iterate
/// and at the previous time level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentState {
    pub q: [f64; 2],
    pub y: [f64; 2],
    pub qp: [f64; 2],
    pub yp: [f64; 2],
}

/// Weight of the upstream end in the friction term.
///
/// Centred while the discharge runs down the water-surface gradient at both
/// time levels; biased toward the upstream end by `beta` when it runs
/// against it at both levels, and halfway there when the levels disagree.
pub fn friction_weight(beta: f64, q_old: f64, dy_old: f64, q_new: f64, dy_new: f64) -> f64 {
    let adverse_old = q_old * dy_old > 0.0;
    let adverse_new = q_new * dy_new > 0.0;
    match (adverse_old, adverse_new) {
        (false, false) => 0.5,
        (true, true) => beta,
        _ => 0.5 * (0.5 + beta),
    }
}

pub fn coeff(
    params: &SolverParams,
    seg: &SegmentState,
    props: [&SectionProps; 2],
    props_old: [&SectionProps; 2],
    qlat: f64,
    lateral: bool,
) -> Coefficients {
    let dt = params.delt;
    let dx = params.delx;
    let th = params.theta;
    let grav = params.gravity;
    let alpha = params.alpha;

    let [q1, q2] = seg.q;
    let [y1, y2] = seg.y;
    let [qp1, qp2] = seg.qp;
    let [yp1, yp2] = seg.yp;

    let a1 = props[0].area.max(AREA_FLOOR);
    let a2 = props[1].area.max(AREA_FLOOR);
    let ao1 = props_old[0].area.max(AREA_FLOOR);
    let ao2 = props_old[1].area.max(AREA_FLOOR);
    let w1 = props[0].top_width;
    let w2 = props[1].top_width;
    let k1 = props[0].conveyance.max(CONVEYANCE_FLOOR);
    let k2 = props[1].conveyance.max(CONVEYANCE_FLOOR);
    let ko1 = props_old[0].conveyance.max(CONVEYANCE_FLOOR);
    let ko2 = props_old[1].conveyance.max(CONVEYANCE_FLOOR);

    let qm = 0.5 * (q1 + q2);
    let qmo = 0.5 * (qp1 + qp2);
    let bet = friction_weight(params.beta, qmo, yp2 - yp1, qm, y2 - y1);

    let w = bet / (k1 * k1) + (1.0 - bet) / (k2 * k2);
    let wo = bet / (ko1 * ko1) + (1.0 - bet) / (ko2 * ko2);
    let sf = qm * qm.abs() * w;
    let sfo = qmo * qmo.abs() * wo;

    let abar = 0.5 * (a1 + a2);
    let head = th * (y2 - y1) + (1.0 - th) * (yp2 - yp1);
    let friction = th * sf + (1.0 - th) * sfo;

    // drain runs carry no overland coupling
    let inflow = if lateral { qlat / dx } else { 0.0 };

    let continuity = (a1 + a2 - ao1 - ao2) / (2.0 * dt)
        + (th * (q2 - q1) + (1.0 - th) * (qp2 - qp1)) / dx
        - inflow;

    let momentum = (q1 + q2 - qp1 - qp2) / (2.0 * dt)
        + alpha / dx
            * (th * (q2 * q2 / a2 - q1 * q1 / a1)
                + (1.0 - th) * (qp2 * qp2 / ao2 - qp1 * qp1 / ao1))
        + grav * abar * head / dx
        + grav * abar * friction;

    let drag = grav * abar * th * qm.abs() * w;
    let dk1 = props[0].d_conveyance;
    let dk2 = props[1].d_conveyance;

    Coefficients {
        a: -th / dx,
        b: w1 / (2.0 * dt),
        c: th / dx,
        d: w2 / (2.0 * dt),
        g: -continuity,
        ap: 1.0 / (2.0 * dt) - alpha * th / dx * 2.0 * q1 / a1 + drag,
        bp: alpha * th / dx * q1 * q1 / (a1 * a1) * w1 + grav * 0.5 * w1 * head / dx
            - grav * abar * th / dx
            + grav * 0.5 * w1 * friction
            - grav * abar * th * qm * qm.abs() * 2.0 * bet * dk1 / (k1 * k1 * k1),
        cp: 1.0 / (2.0 * dt) + alpha * th / dx * 2.0 * q2 / a2 + drag,
        dp: -alpha * th / dx * q2 * q2 / (a2 * a2) * w2
            + grav * 0.5 * w2 * head / dx
            + grav * abar * th / dx
            + grav * 0.5 * w2 * friction
            - grav * abar * th * qm * qm.abs() * 2.0 * (1.0 - bet) * dk2 / (k2 * k2 * k2),
        gp: -momentum,
    }
}

/// Discharge through a structure and its partial derivatives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeirFlow {
    pub discharge: f64,
    pub d_upstream: f64,
    pub d_downstream: f64,
}

fn free_weir_coefficient(grav: f64) -> f64 {
    (2.0_f64 / 3.0).powf(1.5) * grav.sqrt()
}

fn forward_weir_flow(crest: &WeirCrest, grav: f64, y_up: f64, y_down: f64) -> WeirFlow {
    let eps = WEIR_EPS * grav;
    let width = crest.width;
    let hu = y_up - crest.elevation;
    let hd = y_down - crest.elevation;

    if hu <= eps {
        return WeirFlow {
            discharge: 0.0,
            d_upstream: 0.0,
            d_downstream: 0.0,
        };
    }

    if hd < 2.0 / 3.0 * hu {
        // free overfall, tailwater has no say
        let cf = free_weir_coefficient(grav);
        return WeirFlow {
            discharge: cf * width * hu.powf(1.5),
            d_upstream: 1.5 * cf * width * hu.sqrt(),
            d_downstream: 0.0,
        };
    }

    let dh = y_up - y_down;
    if dh <= eps {
        // flooded with almost no head difference: secant through the origin
        let slope = width * (2.0 * grav * eps).sqrt() / eps;
        WeirFlow {
            discharge: slope * hd * dh,
            d_upstream: slope * hd,
            d_downstream: -slope * hd + slope * dh,
        }
    } else {
        let root = (2.0 * grav * dh).sqrt();
        let d_head = width * hd * grav / root;
        WeirFlow {
            discharge: width * hd * root,
            d_upstream: d_head,
            d_downstream: width * root - d_head,
        }
    }
}

/// Structure discharge from `y_up` to `y_down`; reverse flow is negative.
pub fn weir_flow(crest: &WeirCrest, grav: f64, y_up: f64, y_down: f64) -> WeirFlow {
    if y_down > y_up {
        let reverse = forward_weir_flow(crest, grav, y_down, y_up);
        return WeirFlow {
            discharge: -reverse.discharge,
            d_upstream: -reverse.d_downstream,
            d_downstream: -reverse.d_upstream,
        };
    }
    forward_weir_flow(crest, grav, y_up, y_down)
}

/// Coefficients for a two-node structure link: the weir relation fixes the
/// upstream discharge and the second row passes it through unchanged.
pub fn weir_coeff(params: &SolverParams, crest: &WeirCrest, seg: &SegmentState) -> Coefficients {
    let grav = params.gravity;
    let [q1, q2] = seg.q;
    let [y1, y2] = seg.y;
    let flow = weir_flow(crest, grav, y1, y2);

    // keeps the elimination pivot away from zero when the weir is dry
    let min_slope = 1.5 * free_weir_coefficient(grav) * crest.width * (WEIR_EPS * grav).sqrt();
    let d_upstream = flow.d_upstream.max(min_slope);

    Coefficients {
        a: 1.0,
        b: -d_upstream,
        c: 0.0,
        d: -flow.d_downstream,
        g: flow.discharge - q1,
        ap: -1.0,
        bp: 0.0,
        cp: 1.0,
        dp: 0.0,
        gp: q1 - q2,
    }
}

pub fn froude_number(q: f64, props: &SectionProps, grav: f64) -> f64 {
    let area = props.area.max(AREA_FLOOR);
    if props.top_width <= 0.0 {
        return 0.0;
    }
    let celerity = (grav * area / props.top_width).sqrt();
    q.abs() / area / celerity
}
