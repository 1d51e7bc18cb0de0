use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Rate-table pricing used when no live courier quote is available.
///
/// `cost = base_rate + floor(max(0, weight - min_weight_threshold)) * per_kg_rate`,
/// then VAT at `vat_percentage` (e.g. `7.5`) on top.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateCard {
    pub base_rate: Decimal,
    pub min_weight_threshold: Decimal,
    pub per_kg_rate: Decimal,
    pub vat_percentage: Decimal,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ShippingQuote {
    pub cost: Decimal,
    pub vat: Decimal,
    pub total: Decimal,
}

impl RateCard {
    pub fn new(base_rate: Decimal, min_weight_threshold: Decimal, per_kg_rate: Decimal, vat_percentage: Decimal) -> Self {
        Self {
            base_rate,
            min_weight_threshold,
            per_kg_rate,
            vat_percentage,
        }
    }

    /// Whole kilograms charged above the threshold.
    pub fn billable_excess(&self, total_weight: Decimal) -> Decimal {
        let excess = total_weight - self.min_weight_threshold;
        if excess <= Decimal::ZERO {
            Decimal::ZERO
        } else {
            excess.floor()
        }
    }

    pub fn quote(&self, total_weight: Decimal) -> ShippingQuote {
        let cost = self.base_rate + self.billable_excess(total_weight) * self.per_kg_rate;
        let vat = cost * self.vat_percentage / Decimal::ONE_HUNDRED;

        ShippingQuote {
            cost,
            vat,
            total: cost + vat,
        }
    }
}

impl ShippingQuote {
    /// A live courier price is taken as VAT-inclusive.
    pub fn flat(total: Decimal) -> Self {
        Self {
            cost: total,
            vat: Decimal::ZERO,
            total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn card() -> RateCard {
        RateCard::new(dec!(2500), dec!(0), dec!(500), dec!(7.5))
    }

    #[test]
    fn test_quote_with_excess_weight() {
        let quote = card().quote(dec!(3));

        assert_eq!(quote.cost, dec!(4000));
        assert_eq!(quote.vat, dec!(300));
        assert_eq!(quote.total, dec!(4300));
    }

    #[test]
    fn test_partial_kilogram_is_not_charged() {
        let quote = card().quote(dec!(0.5));

        assert_eq!(quote.cost, dec!(2500));
        assert_eq!(quote.total, dec!(2687.5));
    }

    #[test]
    fn test_threshold_absorbs_weight() {
        let card = RateCard::new(dec!(1000), dec!(2), dec!(200), dec!(0));

        assert_eq!(card.quote(dec!(1.5)).total, dec!(1000));
        assert_eq!(card.quote(dec!(4.9)).total, dec!(1400));
    }
}
