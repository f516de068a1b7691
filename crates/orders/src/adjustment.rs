//! Typed order adjustments and total computation.

use serde::{Deserialize, Serialize};

use stockroom_core::{DomainError, ValueObject};

/// Percentage expressed in basis points (`1_250` = 12.5%).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Percent(u32);

impl ValueObject for Percent {}

impl Percent {
    pub const MAX_BASIS_POINTS: u32 = 100_000;

    pub fn from_basis_points(basis_points: u32) -> Result<Self, DomainError> {
        if basis_points > Self::MAX_BASIS_POINTS {
            return Err(DomainError::validation("percentage cannot exceed 1000%"));
        }
        Ok(Self(basis_points))
    }

    pub fn basis_points(&self) -> u32 {
        self.0
    }

    /// Apply to `amount`, rounding half up.
    pub fn of(&self, amount: u64) -> u64 {
        let scaled = u128::from(amount) * u128::from(self.0) + 5_000;
        u64::try_from(scaled / 10_000).unwrap_or(u64::MAX)
    }
}

/// One known kind of per-order charge or deduction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Adjustment {
    Shipping { amount: u64 },
    Discount { amount: u64 },
    /// Signed so staff can book a flat credit as well as a surcharge.
    FlatExtra { label: String, amount: i64 },
    /// Computed against the item subtotal, never against a previous total.
    PercentExtra { label: String, percent: Percent },
}

impl ValueObject for Adjustment {}

impl Adjustment {
    /// Signed contribution of this adjustment given the item subtotal.
    pub fn contribution(&self, item_subtotal: u64) -> i128 {
        match self {
            Adjustment::Shipping { amount } => i128::from(*amount),
            Adjustment::Discount { amount } => -i128::from(*amount),
            Adjustment::FlatExtra { amount, .. } => i128::from(*amount),
            Adjustment::PercentExtra { percent, .. } => i128::from(percent.of(item_subtotal)),
        }
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        match self {
            Adjustment::FlatExtra { label, .. } | Adjustment::PercentExtra { label, .. }
                if label.trim().is_empty() =>
            {
                Err(DomainError::validation("extra charges need a label"))
            }
            _ => Ok(()),
        }
    }
}

/// `item_subtotal + shipping − discount + extras`, floored at zero.
pub fn order_total(item_subtotal: u64, adjustments: &[Adjustment]) -> u64 {
    let total = adjustments
        .iter()
        .fold(i128::from(item_subtotal), |acc, a| acc + a.contribution(item_subtotal));
    u64::try_from(total.max(0)).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_extra_uses_item_subtotal_not_running_total() {
        let adjustments = vec![
            Adjustment::Shipping { amount: 500 },
            Adjustment::PercentExtra {
                label: "gift wrap".to_string(),
                percent: Percent::from_basis_points(1_000).unwrap(),
            },
            Adjustment::PercentExtra {
                label: "insurance".to_string(),
                percent: Percent::from_basis_points(1_000).unwrap(),
            },
        ];

        // 10_000 + 500 + 1_000 + 1_000: the second 10% is not compounded.
        assert_eq!(order_total(10_000, &adjustments), 12_500);
        // Recomputing is stable.
        assert_eq!(order_total(10_000, &adjustments), 12_500);
    }

    #[test]
    fn discount_cannot_push_total_below_zero() {
        let adjustments = vec![Adjustment::Discount { amount: 1_000 }];
        assert_eq!(order_total(300, &adjustments), 0);
    }

    #[test]
    fn flat_extra_may_be_a_credit() {
        let adjustments = vec![
            Adjustment::FlatExtra {
                label: "loyalty".to_string(),
                amount: -200,
            },
            Adjustment::Discount { amount: 100 },
        ];
        assert_eq!(order_total(1_000, &adjustments), 700);
    }

    #[test]
    fn percent_rounds_half_up() {
        let p = Percent::from_basis_points(1_250).unwrap();
        assert_eq!(p.of(100), 13);
        assert_eq!(p.of(4), 1);
        assert!(Percent::from_basis_points(100_001).is_err());
    }

    #[test]
    fn extras_require_labels() {
        let unlabeled = Adjustment::FlatExtra {
            label: "  ".to_string(),
            amount: 10,
        };
        assert!(unlabeled.validate().is_err());
        assert!(Adjustment::Shipping { amount: 0 }.validate().is_ok());
    }
}
