// ============================================================================
// Quota Display
// ============================================================================
//
// Quota is stored as an integer number of points. Audit messages render it
// either as a currency amount (points / quota_per_unit) or as raw points.
//
// ============================================================================

/// Default number of quota points that make up one currency unit.
pub const DEFAULT_QUOTA_PER_UNIT: f64 = 500_000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuotaDisplay {
    pub quota_per_unit: f64,
    pub display_in_currency: bool,
}

impl Default for QuotaDisplay {
    fn default() -> Self {
        Self {
            quota_per_unit: DEFAULT_QUOTA_PER_UNIT,
            display_in_currency: true,
        }
    }
}

impl QuotaDisplay {
    pub fn points() -> Self {
        Self {
            display_in_currency: false,
            ..Self::default()
        }
    }

    pub fn format(&self, quota: i64) -> String {
        if self.display_in_currency && self.quota_per_unit > 0.0 {
            format!("${:.6}", quota as f64 / self.quota_per_unit)
        } else {
            format!("{} points", quota)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_currency_with_six_decimals() {
        let display = QuotaDisplay::default();
        assert_eq!(display.format(500_000), "$1.000000");
        assert_eq!(display.format(200), "$0.000400");
    }

    #[test]
    fn formats_points_when_currency_disabled() {
        assert_eq!(QuotaDisplay::points().format(1234), "1234 points");
    }

    #[test]
    fn zero_unit_falls_back_to_points() {
        let display = QuotaDisplay {
            quota_per_unit: 0.0,
            display_in_currency: true,
        };
        assert_eq!(display.format(7), "7 points");
    }
}
