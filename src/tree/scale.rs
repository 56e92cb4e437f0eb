use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// "Nice" multipliers tried for the tick step, relative to one tenth of the
/// span's decade.
const STEP_MULTIPLIERS: [i64; 6] = [1, 2, 5, 10, 20, 50];

/// Pixel budget per tick interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickBudget {
    pub min_px_per_tick: f32,
    pub max_px_per_tick: f32,
}

impl Default for TickBudget {
    fn default() -> Self {
        Self {
            min_px_per_tick: 50.0,
            max_px_per_tick: 100.0,
        }
    }
}

/// Distance-scale gridlines: how many, how far apart, and the finest unit the
/// tree allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickScale {
    pub line_count: usize,
    pub step: Decimal,
    pub min_scale_unit: Decimal,
}

impl TickScale {
    pub const EMPTY: TickScale = TickScale {
        line_count: 0,
        step: Decimal::ZERO,
        min_scale_unit: Decimal::ZERO,
    };

    /// Choose line count and step for `span` genetic distance drawn over
    /// `width_px` at `zoom`.
    ///
    /// Brute force over the small candidate grid (nice steps × feasible line
    /// counts) minimising `|span - lines × step|`; ties keep the first
    /// candidate, steps ascending then line counts ascending.
    pub fn solve(
        width_px: f32,
        span: Decimal,
        min_scale_unit: Decimal,
        zoom: f32,
        budget: TickBudget,
    ) -> TickScale {
        let pixels = width_px * zoom.max(0.0);
        if span <= Decimal::ZERO || pixels <= 0.0 || min_scale_unit <= Decimal::ZERO {
            return TickScale::EMPTY;
        }

        let min_lines = (pixels / budget.max_px_per_tick.max(1.0)).ceil() as usize;
        let budget_max = (pixels / budget.min_px_per_tick.max(1.0)).floor() as usize;
        let unit_max = span
            .checked_div(min_scale_unit)
            .and_then(|units| units.floor().to_usize())
            .unwrap_or(usize::MAX);
        let max_lines = budget_max.min(unit_max);
        let degenerate = TickScale {
            line_count: 2,
            step: min_scale_unit,
            min_scale_unit,
        };
        if max_lines <= 2 {
            return degenerate;
        }
        let min_lines = min_lines.clamp(1, max_lines);

        let Some(exponent) = floor_log10(span) else {
            return degenerate;
        };
        let base = pow10(exponent - 1);

        let mut best: Option<(Decimal, TickScale)> = None;
        for multiplier in STEP_MULTIPLIERS {
            let step = base * Decimal::from(multiplier);
            if step < min_scale_unit {
                continue;
            }
            for line_count in min_lines..=max_lines {
                let error = (span - step * Decimal::from(line_count)).abs();
                if best.as_ref().map_or(true, |(best_error, _)| error < *best_error) {
                    best = Some((
                        error,
                        TickScale {
                            line_count,
                            step,
                            min_scale_unit,
                        },
                    ));
                }
            }
        }

        best.map(|(_, scale)| scale).unwrap_or(degenerate)
    }

    pub fn as_tuple(&self) -> (usize, Decimal, Decimal) {
        (self.line_count, self.step, self.min_scale_unit)
    }

    /// Distances at which gridlines are drawn, starting at zero and never
    /// past `span`.
    pub fn tick_distances(&self, span: Decimal) -> Vec<Decimal> {
        if self.line_count == 0 || self.step.is_zero() {
            return Vec::new();
        }
        (0..=self.line_count)
            .map(|index| self.step * Decimal::from(index))
            .take_while(|distance| *distance <= span)
            .collect()
    }

    /// Decimals needed to print a tick label without noise.
    pub fn label_precision(&self) -> u32 {
        self.step.normalize().scale()
    }
}

/// `floor(log10(value))` computed exactly from the decimal representation.
pub(crate) fn floor_log10(value: Decimal) -> Option<i32> {
    if value <= Decimal::ZERO {
        return None;
    }
    let mantissa = value.mantissa().unsigned_abs();
    let digits = mantissa.checked_ilog10()? as i32 + 1;
    Some(digits - 1 - value.scale() as i32)
}

pub(crate) fn pow10(exponent: i32) -> Decimal {
    if exponent >= 0 {
        Decimal::from_i128_with_scale(10i128.pow(exponent.min(28) as u32), 0)
    } else {
        Decimal::new(1, (-exponent).min(28) as u32)
    }
}
