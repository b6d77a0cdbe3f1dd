use bigdecimal::BigDecimal;

use crate::models::InvoiceKey;

/// 滞纳金计算口, 月结时对每张账单调用一次
///
/// 返回 `Some(amount)` 时金额计入 total_interest, 同时累加到 total_charges 与 balance,
/// 并生成一条 late_interest 明细。
pub trait LateFeePolicy: Send + Sync {
    fn assess(&self, key: &InvoiceKey, prorated: &BigDecimal) -> Option<BigDecimal>;
}

/// 不收滞纳金
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLateFee;

impl LateFeePolicy for NoLateFee {
    fn assess(&self, _key: &InvoiceKey, _prorated: &BigDecimal) -> Option<BigDecimal> {
        None
    }
}
