//! Cross-section geometry and hydraulic properties.
//!
//! Every shape answers the same question: at a given depth above the bed,
//! what are the flow area, conveyance `K = k_s A^(5/3) / P^(2/3)`, top width
//! and `dK/dy`? Shapes are resolved once when the network is loaded.

use std::sync::Arc;

use crate::error::ConfigError;

/// Depths below this are evaluated at this value so that conveyance and top
/// width never vanish.
pub const DEPTH_FLOOR: f64 = 1e-6;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SectionProps {
    pub area: f64,
    pub conveyance: f64,
    pub top_width: f64,
    pub d_conveyance: f64,
    /// Depth lies beyond the tabulated range of a breakpoint table.
    pub extrapolated: bool,
}

/// `coef * depth^exp`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerLaw {
    pub coef: f64,
    pub exp: f64,
}

impl PowerLaw {
    pub fn new(coef: f64, exp: f64) -> Self {
        PowerLaw { coef, exp }
    }

    fn value(&self, depth: f64) -> f64 {
        self.coef * depth.powf(self.exp)
    }

    fn slope(&self, depth: f64) -> f64 {
        self.coef * self.exp * depth.powf(self.exp - 1.0)
    }
}

/// Width, area and conveyance fitted independently as power laws of depth.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerLawSet {
    pub width: PowerLaw,
    pub area: PowerLaw,
    pub conveyance: PowerLaw,
}

impl PowerLawSet {
    fn properties(&self, depth: f64) -> SectionProps {
        SectionProps {
            area: self.area.value(depth),
            conveyance: self.conveyance.value(depth),
            top_width: self.width.value(depth),
            d_conveyance: self.conveyance.slope(depth),
            extrapolated: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TableRow {
    pub area: f64,
    pub top_width: f64,
    pub conveyance: f64,
}

/// Tabulated section: `rows[i]` describes the depth `(i + 1) * ht_spc`.
/// The trivial zero-depth row of the input file is not stored.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakpointTable {
    number: usize,
    ht_spc: f64,
    rows: Vec<TableRow>,
}

impl BreakpointTable {
    /// Needs a positive spacing and at least two rows to interpolate between.
    pub fn new(number: usize, ht_spc: f64, rows: Vec<TableRow>) -> Result<Self, ConfigError> {
        if ht_spc.is_nan() || ht_spc <= 0.0 {
            return Err(ConfigError::InvalidNetwork(format!(
                "breakpoint table {} has non-positive spacing {}",
                number, ht_spc
            )));
        }
        if rows.len() < 2 {
            return Err(ConfigError::InvalidNetwork(format!(
                "breakpoint table {} needs at least 2 heights, got {}",
                number,
                rows.len()
            )));
        }
        Ok(BreakpointTable {
            number,
            ht_spc,
            rows,
        })
    }

    pub fn number(&self) -> usize {
        self.number
    }

    pub fn ht_spc(&self) -> f64 {
        self.ht_spc
    }

    pub fn rows(&self) -> &[TableRow] {
        &self.rows
    }

    /// Deepest tabulated depth.
    pub fn max_depth(&self) -> f64 {
        self.rows.len() as f64 * self.ht_spc
    }

    pub fn properties(&self, depth: f64) -> SectionProps {
        let h = self.ht_spc;
        let n = self.rows.len();
        let r = depth / h;

        if r < 1.0 {
            // 5/3-power anchored at zero keeps K' finite as the section dries
            let first = self.rows[0];
            return SectionProps {
                area: first.area * r,
                conveyance: first.conveyance * r.powf(5.0 / 3.0),
                top_width: first.top_width,
                d_conveyance: (5.0 / 3.0) * first.conveyance * r.powf(2.0 / 3.0) / h,
                extrapolated: false,
            };
        }

        let (lo, hi, frac, extrapolated) = if r <= n as f64 {
            let mut i = r.floor() as usize;
            if i >= n {
                i = n - 1;
            }
            (self.rows[i - 1], self.rows[i], r - i as f64, false)
        } else {
            // continue the last tabulated segment
            (self.rows[n - 2], self.rows[n - 1], r - (n - 1) as f64, true)
        };

        SectionProps {
            area: lo.area + frac * (hi.area - lo.area),
            conveyance: lo.conveyance + frac * (hi.conveyance - lo.conveyance),
            top_width: lo.top_width + frac * (hi.top_width - lo.top_width),
            d_conveyance: (hi.conveyance - lo.conveyance) / h,
            extrapolated,
        }
    }

    /// Depth at which the tabulated conveyance reaches `target`.
    pub fn depth_for_conveyance(&self, target: f64) -> f64 {
        let h = self.ht_spc;
        let n = self.rows.len();
        let first = self.rows[0].conveyance;
        if target <= first {
            if first <= 0.0 {
                return 0.0;
            }
            return h * (target / first).powf(3.0 / 5.0);
        }
        for i in 1..n {
            let lo = self.rows[i - 1].conveyance;
            let hi = self.rows[i].conveyance;
            if target <= hi && hi > lo {
                return h * (i as f64 + (target - lo) / (hi - lo));
            }
        }
        let lo = self.rows[n - 2].conveyance;
        let hi = self.rows[n - 1].conveyance;
        if hi > lo {
            h * (n as f64 + (target - hi) / (hi - lo))
        } else {
            self.max_depth()
        }
    }
}

/// Spillway and storage description of a lake link.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReservoirParams {
    pub surface_area: f64,
    pub crest: f64,
    pub spill_width: f64,
    pub spill_coeff: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CrossSection {
    Trapezoidal {
        strickler: f64,
        bottom: f64,
        side_slope: f64,
    },
    /// Single power-law fit (APFA type II).
    PowerLawII(PowerLawSet),
    /// In-bank fit below `bank_depth`, overbank increment above (APFA type III).
    PowerLawIII {
        bank_depth: f64,
        inbank: PowerLawSet,
        overbank: PowerLawSet,
    },
    Breakpoint(Arc<BreakpointTable>),
    MultiSlope {
        strickler: f64,
        bottom: f64,
        inbank_slope: f64,
        overbank_slope: f64,
        bank_depth: f64,
    },
    Reservoir(ReservoirParams),
}

fn manning_props(
    strickler: f64,
    area: f64,
    top_width: f64,
    perimeter: f64,
    d_perimeter: f64,
) -> SectionProps {
    let conveyance = strickler * area.powf(5.0 / 3.0) / perimeter.powf(2.0 / 3.0);
    let d_conveyance =
        conveyance * (5.0 * top_width / (3.0 * area) - 2.0 * d_perimeter / (3.0 * perimeter));
    SectionProps {
        area,
        conveyance,
        top_width,
        d_conveyance,
        extrapolated: false,
    }
}

impl CrossSection {
    /// Properties at `depth` above the bed. Lakes have no channel section.
    pub fn properties(&self, depth: f64) -> Option<SectionProps> {
        let d = depth.max(DEPTH_FLOOR);
        let props = match self {
            CrossSection::Trapezoidal {
                strickler,
                bottom,
                side_slope,
            } => {
                let wall = (1.0 + side_slope * side_slope).sqrt();
                manning_props(
                    *strickler,
                    d * (bottom + side_slope * d),
                    bottom + 2.0 * side_slope * d,
                    bottom + 2.0 * d * wall,
                    2.0 * wall,
                )
            }
            CrossSection::PowerLawII(set) => set.properties(d),
            CrossSection::PowerLawIII {
                bank_depth,
                inbank,
                overbank,
            } => {
                if d > *bank_depth {
                    let bank = inbank.properties(*bank_depth);
                    let over = overbank.properties((d - bank_depth).max(DEPTH_FLOOR));
                    SectionProps {
                        area: bank.area + over.area,
                        conveyance: bank.conveyance + over.conveyance,
                        top_width: bank.top_width + over.top_width,
                        d_conveyance: over.d_conveyance,
                        extrapolated: false,
                    }
                } else {
                    inbank.properties(d)
                }
            }
            CrossSection::Breakpoint(table) => table.properties(d),
            CrossSection::MultiSlope {
                strickler,
                bottom,
                inbank_slope,
                overbank_slope,
                bank_depth,
            } => {
                let wall_in = (1.0 + inbank_slope * inbank_slope).sqrt();
                if d <= *bank_depth {
                    manning_props(
                        *strickler,
                        d * (bottom + inbank_slope * d),
                        bottom + 2.0 * inbank_slope * d,
                        bottom + 2.0 * d * wall_in,
                        2.0 * wall_in,
                    )
                } else {
                    let wall_over = (1.0 + overbank_slope * overbank_slope).sqrt();
                    let e = d - bank_depth;
                    let bank_width = bottom + 2.0 * inbank_slope * bank_depth;
                    manning_props(
                        *strickler,
                        bank_depth * (bottom + inbank_slope * bank_depth)
                            + e * (bank_width + overbank_slope * e),
                        bank_width + 2.0 * overbank_slope * e,
                        bottom + 2.0 * bank_depth * wall_in + 2.0 * e * wall_over,
                        2.0 * wall_over,
                    )
                }
            }
            CrossSection::Reservoir(_) => return None,
        };
        Some(props)
    }

    /// Depth holding `area` of flow; `None` when the trapezoid quadratic has
    /// no real root.
    pub fn depth_for_area(&self, area: f64) -> Option<f64> {
        if area <= 0.0 {
            return Some(0.0);
        }
        match self {
            CrossSection::Trapezoidal {
                bottom, side_slope, ..
            } => {
                if *side_slope == 0.0 {
                    return if *bottom > 0.0 { Some(area / bottom) } else { None };
                }
                let disc = bottom * bottom + 4.0 * side_slope * area;
                if disc < 0.0 {
                    return None;
                }
                Some((-bottom + disc.sqrt()) / (2.0 * side_slope))
            }
            CrossSection::Reservoir(_) => None,
            _ => {
                let area_at = |d: f64| self.properties(d).map(|p| p.area).unwrap_or(0.0);
                let mut hi = 1.0;
                let mut grow = 0;
                while area_at(hi) < area {
                    hi *= 2.0;
                    grow += 1;
                    if grow > 60 {
                        return None;
                    }
                }
                let mut lo = 0.0;
                for _ in 0..100 {
                    let mid = 0.5 * (lo + hi);
                    if area_at(mid) < area {
                        lo = mid;
                    } else {
                        hi = mid;
                    }
                }
                Some(0.5 * (lo + hi))
            }
        }
    }

    pub fn is_reservoir(&self) -> bool {
        matches!(self, CrossSection::Reservoir(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 1e-9;

    fn trapezoid() -> CrossSection {
        CrossSection::Trapezoidal {
            strickler: 1.0 / 0.03,
            bottom: 2.0,
            side_slope: 1.0,
        }
    }

    fn table() -> BreakpointTable {
        let rows = (1..=5)
            .map(|i| {
                let d = i as f64 * 0.5;
                TableRow {
                    area: 3.0 * d,
                    top_width: 3.0 + 0.2 * d,
                    conveyance: 20.0 * d * d,
                }
            })
            .collect();
        BreakpointTable::new(1, 0.5, rows).unwrap()
    }

    fn monotone(section: &CrossSection, max_depth: f64) {
        let mut prev = section.properties(0.0).unwrap();
        let steps = 400;
        for k in 1..=steps {
            let d = max_depth * k as f64 / steps as f64;
            let p = section.properties(d).unwrap();
            assert!(p.area >= prev.area - TOL, "area drops at {}", d);
            assert!(p.conveyance >= prev.conveyance - TOL, "K drops at {}", d);
            assert!(p.top_width >= prev.top_width - TOL, "width drops at {}", d);
            prev = p;
        }
    }

    #[test]
    fn trapezoid_geometry() {
        let p = trapezoid().properties(1.5).unwrap();
        assert!((p.area - 5.25).abs() < TOL);
        assert!((p.top_width - 5.0).abs() < TOL);
        let perimeter: f64 = 2.0 + 3.0 * 2.0_f64.sqrt();
        let k = 5.25_f64.powf(5.0 / 3.0) / perimeter.powf(2.0 / 3.0) / 0.03;
        assert!((p.conveyance - k).abs() < 1e-9 * k);
    }

    #[test]
    fn conveyance_derivative_matches_difference() {
        let sections = vec![
            trapezoid(),
            CrossSection::MultiSlope {
                strickler: 25.0,
                bottom: 3.0,
                inbank_slope: 1.5,
                overbank_slope: 10.0,
                bank_depth: 1.0,
            },
            CrossSection::PowerLawII(PowerLawSet {
                width: PowerLaw::new(4.0, 0.3),
                area: PowerLaw::new(3.0, 1.3),
                conveyance: PowerLaw::new(30.0, 1.8),
            }),
        ];
        for section in &sections {
            for &d in &[0.4, 0.9, 1.7, 2.5] {
                let h = 1e-6;
                let up = section.properties(d + h).unwrap().conveyance;
                let dn = section.properties(d - h).unwrap().conveyance;
                let fd = (up - dn) / (2.0 * h);
                let an = section.properties(d).unwrap().d_conveyance;
                assert!((fd - an).abs() < 1e-4 * an.abs().max(1.0), "{:?} at {}", section, d);
            }
        }
    }

    #[test]
    fn every_shape_is_monotone() {
        let inbank = PowerLawSet {
            width: PowerLaw::new(5.0, 0.25),
            area: PowerLaw::new(4.0, 1.25),
            conveyance: PowerLaw::new(40.0, 1.7),
        };
        let overbank = PowerLawSet {
            width: PowerLaw::new(20.0, 0.5),
            area: PowerLaw::new(15.0, 1.5),
            conveyance: PowerLaw::new(60.0, 2.0),
        };
        monotone(&trapezoid(), 6.0);
        monotone(&CrossSection::PowerLawII(inbank), 6.0);
        monotone(
            &CrossSection::PowerLawIII {
                bank_depth: 1.2,
                inbank,
                overbank,
            },
            6.0,
        );
        monotone(
            &CrossSection::MultiSlope {
                strickler: 30.0,
                bottom: 2.0,
                inbank_slope: 1.0,
                overbank_slope: 8.0,
                bank_depth: 1.5,
            },
            6.0,
        );
        // well past the tabulated 2.5 m
        monotone(&CrossSection::Breakpoint(Arc::new(table())), 10.0);
    }

    #[test]
    fn power_law_iii_switches_at_bank() {
        let inbank = PowerLawSet {
            width: PowerLaw::new(5.0, 0.0),
            area: PowerLaw::new(5.0, 1.0),
            conveyance: PowerLaw::new(50.0, 1.5),
        };
        let overbank = PowerLawSet {
            width: PowerLaw::new(30.0, 0.0),
            area: PowerLaw::new(30.0, 1.0),
            conveyance: PowerLaw::new(10.0, 1.0),
        };
        let section = CrossSection::PowerLawIII {
            bank_depth: 2.0,
            inbank,
            overbank,
        };
        let below = section.properties(2.0).unwrap();
        assert!((below.area - 10.0).abs() < TOL);
        let above = section.properties(3.0).unwrap();
        assert!((above.area - 40.0).abs() < TOL);
        assert!((above.top_width - 35.0).abs() < TOL);
        assert!((above.d_conveyance - 10.0).abs() < TOL);
    }

    #[test]
    fn table_regimes() {
        let t = table();
        // below the first interval
        let p = t.properties(0.25);
        assert!((p.area - 0.75).abs() < TOL);
        assert!((p.conveyance - 5.0 * 0.5_f64.powf(5.0 / 3.0)).abs() < TOL);
        assert!(!p.extrapolated);

        // between rows 2 (1.0 m) and 3 (1.5 m)
        let p = t.properties(1.25);
        assert!((p.conveyance - 0.5 * (20.0 + 45.0)).abs() < TOL);
        assert!((p.d_conveyance - (45.0 - 20.0) / 0.5).abs() < TOL);

        // exactly on the last row
        let p = t.properties(2.5);
        assert!((p.conveyance - 125.0).abs() < TOL);
        assert!(!p.extrapolated);
    }

    #[test]
    fn table_needs_two_rows_and_positive_spacing() {
        let row = TableRow {
            area: 1.0,
            top_width: 2.0,
            conveyance: 10.0,
        };
        assert!(matches!(
            BreakpointTable::new(4, 0.5, vec![row]),
            Err(ConfigError::InvalidNetwork(_))
        ));
        assert!(BreakpointTable::new(4, 0.5, Vec::new()).is_err());
        assert!(BreakpointTable::new(4, 0.0, vec![row, row]).is_err());
        assert!(BreakpointTable::new(4, f64::NAN, vec![row, row]).is_err());

        let t = BreakpointTable::new(4, 0.5, vec![row, row]).unwrap();
        assert_eq!(t.number(), 4);
        assert_eq!(t.rows().len(), 2);
        assert!((t.max_depth() - 1.0).abs() < TOL);
    }

    #[test]
    fn table_extrapolates_last_segment() {
        let t = table();
        let k4 = t.rows[3].conveyance;
        let k5 = t.rows[4].conveyance;
        let p = t.properties(10.0 * t.ht_spc);
        assert!(p.extrapolated);
        assert!((p.conveyance - (k5 + 5.0 * (k5 - k4))).abs() < TOL);
        assert!((p.d_conveyance - (k5 - k4) / t.ht_spc).abs() < TOL);
    }

    #[test]
    fn table_conveyance_inverts() {
        let t = table();
        for &d in &[0.2, 0.8, 1.3, 2.4, 3.7] {
            let k = t.properties(d).conveyance;
            assert!((t.depth_for_conveyance(k) - d).abs() < 1e-9);
        }
    }

    #[test]
    fn area_to_depth() {
        let s = trapezoid();
        let area = s.properties(1.3).unwrap().area;
        assert!((s.depth_for_area(area).unwrap() - 1.3).abs() < 1e-12);

        let multi = CrossSection::MultiSlope {
            strickler: 30.0,
            bottom: 2.0,
            inbank_slope: 1.0,
            overbank_slope: 8.0,
            bank_depth: 1.5,
        };
        let area = multi.properties(2.2).unwrap().area;
        assert!((multi.depth_for_area(area).unwrap() - 2.2).abs() < 1e-9);

        let bad = CrossSection::Trapezoidal {
            strickler: 30.0,
            bottom: 1.0,
            side_slope: -1.0,
        };
        assert!(bad.depth_for_area(5.0).is_none());
    }

    #[test]
    fn reservoirs_have_no_section() {
        let lake = CrossSection::Reservoir(ReservoirParams {
            surface_area: 1e5,
            crest: 10.0,
            spill_width: 5.0,
            spill_coeff: 1.7,
        });
        assert!(lake.properties(1.0).is_none());
        assert!(lake.is_reservoir());
    }
}
