use bigdecimal::{BigDecimal, Zero};
use serde::{Deserialize, Serialize};

use super::{Invoice, Period};

/// 月结统计
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosingSummary {
    pub condominium_id: i64,
    pub period: Period,
    pub total_expenses: BigDecimal,
    pub invoices: usize,
    pub total_prorated: BigDecimal,
    /// total_prorated - total_expenses, 由逐户舍入产生
    pub rounding_difference: BigDecimal,
}

impl ClosingSummary {
    pub fn from_invoices(
        condominium_id: i64,
        period: Period,
        total_expenses: BigDecimal,
        invoices: &[Invoice],
    ) -> Self {
        let total_prorated = invoices
            .iter()
            .fold(BigDecimal::zero(), |acc, inv| acc + &inv.total_charges - &inv.total_interest);
        let rounding_difference = &total_prorated - &total_expenses;
        Self {
            condominium_id,
            period,
            total_expenses,
            invoices: invoices.len(),
            total_prorated,
            rounding_difference,
        }
    }
}

/// 月结结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosingOutcome {
    pub summary: ClosingSummary,
    pub invoices: Vec<Invoice>,
}
