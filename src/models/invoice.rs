use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::Period;
use crate::error::BillingError;

/// 账单类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "invoice_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InvoiceKind {
    Monthly,
    Extraordinary,
    Manual,
}

/// 账单状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "invoice_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    Paid,
    Cancelled,
}

/// 重新月结时如何处理已付金额
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReclosePolicy {
    /// 覆盖: balance = total_charges, 丢弃账单头上的已付记录
    #[default]
    Overwrite,
    /// 保留: balance = total_charges - total_paid
    PreservePayments,
}

/// 账单自然键 (unit, period, kind)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InvoiceKey {
    pub unit_id: i64,
    pub period: Period,
    pub kind: InvoiceKind,
}

/// 账单 (Cobro)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Invoice {
    pub id: i64,
    pub unit_id: i64,
    pub period: Period,
    pub kind: InvoiceKind,
    pub status: InvoiceStatus,
    pub emitted_at: DateTime<Utc>,
    pub rule_id: Option<i64>,
    pub total_charges: BigDecimal,
    pub total_discounts: BigDecimal,
    pub total_interest: BigDecimal,
    pub total_paid: BigDecimal,
    pub balance: BigDecimal,
    pub note: Option<String>,
    /// 乐观锁版本号
    pub version: i32,
}

impl Invoice {
    pub fn key(&self) -> InvoiceKey {
        InvoiceKey {
            unit_id: self.unit_id,
            period: self.period.clone(),
            kind: self.kind,
        }
    }

    /// 用可用金额冲抵本账单, 返回实际冲抵金额
    ///
    /// 足额时结清 (balance = 0, 状态 Paid); 不足时部分冲抵, 状态不变。
    pub fn apply_payment(&mut self, available: &BigDecimal) -> BigDecimal {
        if *available <= BigDecimal::zero() || self.balance <= BigDecimal::zero() {
            return BigDecimal::zero();
        }

        if *available >= self.balance {
            let applied = self.balance.clone();
            self.total_paid += &applied;
            self.balance = BigDecimal::zero();
            self.status = InvoiceStatus::Paid;
            applied
        } else {
            let applied = available.clone();
            self.total_paid += &applied;
            self.balance -= &applied;
            applied
        }
    }

    /// 月结重算账单头, 返回被丢弃的已付金额 (仅 Overwrite 策略下可能非零)
    pub fn restate(&mut self, charges: &Charges, rule_id: i64, policy: ReclosePolicy) -> BigDecimal {
        self.rule_id = Some(rule_id);
        self.total_interest = charges.interest.clone();
        self.total_charges = charges.total();
        self.note = charges.note.clone();

        match policy {
            ReclosePolicy::Overwrite => {
                let discarded = std::mem::replace(&mut self.total_paid, BigDecimal::zero());
                self.balance = self.total_charges.clone();
                self.status = InvoiceStatus::Pending;
                discarded
            }
            ReclosePolicy::PreservePayments => {
                self.balance = &self.total_charges - &self.total_paid;
                self.status = if self.balance > BigDecimal::zero() {
                    InvoiceStatus::Pending
                } else {
                    InvoiceStatus::Paid
                };
                BigDecimal::zero()
            }
        }
    }

    /// balance == total_charges - total_paid
    pub fn is_balanced(&self) -> bool {
        self.balance == &self.total_charges - &self.total_paid
    }
}

/// 月结时写入账单头的金额
#[derive(Debug, Clone)]
pub struct Charges {
    pub prorated: BigDecimal,
    pub interest: BigDecimal,
    pub note: Option<String>,
}

impl Charges {
    pub fn total(&self) -> BigDecimal {
        &self.prorated + &self.interest
    }
}

/// 新账单
#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub unit_id: i64,
    pub period: Period,
    pub kind: InvoiceKind,
    pub status: InvoiceStatus,
    pub emitted_at: DateTime<Utc>,
    pub rule_id: Option<i64>,
    pub total_charges: BigDecimal,
    pub total_interest: BigDecimal,
    pub balance: BigDecimal,
    pub note: Option<String>,
}

impl NewInvoice {
    pub fn issue(key: InvoiceKey, charges: &Charges, rule_id: Option<i64>, emitted_at: DateTime<Utc>) -> Self {
        let total = charges.total();
        Self {
            unit_id: key.unit_id,
            period: key.period,
            kind: key.kind,
            status: InvoiceStatus::Pending,
            emitted_at,
            rule_id,
            total_charges: total.clone(),
            total_interest: charges.interest.clone(),
            balance: total,
            note: charges.note.clone(),
        }
    }

    pub fn key(&self) -> InvoiceKey {
        InvoiceKey {
            unit_id: self.unit_id,
            period: self.period.clone(),
            kind: self.kind,
        }
    }
}

/// 单元费用类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "charge_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ChargeKind {
    Normal,
    Extra,
    Adjustment,
}

/// 单元费用历史 (CargoUnidad), 唯一键 (unit, period, concept)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Charge {
    pub id: i64,
    pub unit_id: i64,
    pub period: Period,
    pub concept_id: i64,
    pub kind: ChargeKind,
    pub amount: BigDecimal,
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCharge {
    pub unit_id: i64,
    pub period: Period,
    pub concept_id: i64,
    pub kind: ChargeKind,
    pub amount: BigDecimal,
    pub detail: Option<String>,
}

/// 明细类型 (落库列)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "detail_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DetailKind {
    CommonCharge,
    IndividualCharge,
    LateInterest,
    Discount,
    Adjustment,
}

/// 明细来源: kind 与引用绑定, 只有费用类明细带引用
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DetailSource {
    CommonCharge { charge_id: i64 },
    IndividualCharge { charge_id: i64 },
    LateInterest,
    Discount,
    Adjustment,
}

impl DetailSource {
    pub fn kind(&self) -> DetailKind {
        match self {
            Self::CommonCharge { .. } => DetailKind::CommonCharge,
            Self::IndividualCharge { .. } => DetailKind::IndividualCharge,
            Self::LateInterest => DetailKind::LateInterest,
            Self::Discount => DetailKind::Discount,
            Self::Adjustment => DetailKind::Adjustment,
        }
    }

    pub fn charge_ref(&self) -> Option<i64> {
        match self {
            Self::CommonCharge { charge_id } | Self::IndividualCharge { charge_id } => Some(*charge_id),
            _ => None,
        }
    }

    /// 从 (kind, charge_ref) 两列还原, 引用有无必须与 kind 一致
    pub fn from_parts(kind: DetailKind, charge_ref: Option<i64>) -> Result<Self, String> {
        match (kind, charge_ref) {
            (DetailKind::CommonCharge, Some(charge_id)) => Ok(Self::CommonCharge { charge_id }),
            (DetailKind::IndividualCharge, Some(charge_id)) => Ok(Self::IndividualCharge { charge_id }),
            (DetailKind::LateInterest, None) => Ok(Self::LateInterest),
            (DetailKind::Discount, None) => Ok(Self::Discount),
            (DetailKind::Adjustment, None) => Ok(Self::Adjustment),
            (kind, Some(r)) => Err(format!("{kind:?} detail must not reference charge {r}")),
            (kind, None) => Err(format!("{kind:?} detail requires a charge reference")),
        }
    }
}

/// 账单明细 (CobroDetalle), 唯一键 (invoice, kind, charge_ref)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceDetail {
    pub id: i64,
    pub invoice_id: i64,
    pub source: DetailSource,
    pub amount: BigDecimal,
    pub label: Option<String>,
}

/// 明细落库行
#[derive(Debug, Clone, FromRow)]
pub struct InvoiceDetailRow {
    pub id: i64,
    pub invoice_id: i64,
    pub kind: DetailKind,
    pub charge_ref: Option<i64>,
    pub amount: BigDecimal,
    pub label: Option<String>,
}

impl TryFrom<InvoiceDetailRow> for InvoiceDetail {
    type Error = BillingError;

    fn try_from(row: InvoiceDetailRow) -> Result<Self, Self::Error> {
        let source = DetailSource::from_parts(row.kind, row.charge_ref).map_err(|reason| {
            BillingError::InconsistentDetail {
                detail_id: row.id,
                reason,
            }
        })?;
        Ok(Self {
            id: row.id,
            invoice_id: row.invoice_id,
            source,
            amount: row.amount,
            label: row.label,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewInvoiceDetail {
    pub invoice_id: i64,
    pub source: DetailSource,
    pub amount: BigDecimal,
    pub label: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invoice(balance: i64) -> Invoice {
        Invoice {
            id: 1,
            unit_id: 10,
            period: Period::parse("202401").unwrap(),
            kind: InvoiceKind::Monthly,
            status: InvoiceStatus::Pending,
            emitted_at: Utc::now(),
            rule_id: Some(1),
            total_charges: BigDecimal::from(balance),
            total_discounts: BigDecimal::zero(),
            total_interest: BigDecimal::zero(),
            total_paid: BigDecimal::zero(),
            balance: BigDecimal::from(balance),
            note: None,
            version: 1,
        }
    }

    fn charges(amount: i64) -> Charges {
        Charges {
            prorated: BigDecimal::from(amount),
            interest: BigDecimal::zero(),
            note: None,
        }
    }

    #[test]
    fn full_settlement_marks_paid() {
        let mut inv = invoice(50000);
        let applied = inv.apply_payment(&BigDecimal::from(60000));
        assert_eq!(applied, BigDecimal::from(50000));
        assert_eq!(inv.balance, BigDecimal::zero());
        assert_eq!(inv.total_paid, BigDecimal::from(50000));
        assert_eq!(inv.status, InvoiceStatus::Paid);
        assert!(inv.is_balanced());
    }

    #[test]
    fn partial_settlement_keeps_status() {
        let mut inv = invoice(30000);
        let applied = inv.apply_payment(&BigDecimal::from(10000));
        assert_eq!(applied, BigDecimal::from(10000));
        assert_eq!(inv.balance, BigDecimal::from(20000));
        assert_eq!(inv.status, InvoiceStatus::Pending);
        assert!(inv.is_balanced());
    }

    #[test]
    fn nothing_available_applies_nothing() {
        let mut inv = invoice(30000);
        assert_eq!(inv.apply_payment(&BigDecimal::zero()), BigDecimal::zero());
        assert_eq!(inv.balance, BigDecimal::from(30000));
    }

    #[test]
    fn overwrite_discards_paid_history() {
        let mut inv = invoice(50000);
        inv.apply_payment(&BigDecimal::from(20000));
        let discarded = inv.restate(&charges(45000), 2, ReclosePolicy::Overwrite);
        assert_eq!(discarded, BigDecimal::from(20000));
        assert_eq!(inv.balance, BigDecimal::from(45000));
        assert_eq!(inv.total_paid, BigDecimal::zero());
        assert_eq!(inv.status, InvoiceStatus::Pending);
        assert_eq!(inv.rule_id, Some(2));
        assert!(inv.is_balanced());
    }

    #[test]
    fn preserve_payments_recomputes_balance() {
        let mut inv = invoice(50000);
        inv.apply_payment(&BigDecimal::from(20000));
        let discarded = inv.restate(&charges(45000), 1, ReclosePolicy::PreservePayments);
        assert_eq!(discarded, BigDecimal::zero());
        assert_eq!(inv.balance, BigDecimal::from(25000));
        assert_eq!(inv.total_paid, BigDecimal::from(20000));
        assert!(inv.is_balanced());

        let mut settled = invoice(10000);
        settled.apply_payment(&BigDecimal::from(10000));
        settled.restate(&charges(8000), 1, ReclosePolicy::PreservePayments);
        assert_eq!(settled.status, InvoiceStatus::Paid);
        assert_eq!(settled.balance, BigDecimal::from(-2000));
    }

    #[test]
    fn detail_source_requires_matching_reference() {
        assert_eq!(
            DetailSource::from_parts(DetailKind::CommonCharge, Some(5)),
            Ok(DetailSource::CommonCharge { charge_id: 5 })
        );
        assert!(DetailSource::from_parts(DetailKind::CommonCharge, None).is_err());
        assert!(DetailSource::from_parts(DetailKind::Discount, Some(5)).is_err());

        let row = InvoiceDetailRow {
            id: 3,
            invoice_id: 1,
            kind: DetailKind::LateInterest,
            charge_ref: Some(8),
            amount: BigDecimal::from(100),
            label: None,
        };
        let err = InvoiceDetail::try_from(row).unwrap_err();
        assert!(matches!(err, BillingError::InconsistentDetail { detail_id: 3, .. }));
    }
}
