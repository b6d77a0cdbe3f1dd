use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::Period;

/// 收款类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    #[default]
    Normal,
    Advance,
    Adjustment,
}

/// 收款 (Pago), 创建后不再修改
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Payment {
    pub id: i64,
    pub unit_id: i64,
    pub kind: PaymentKind,
    pub amount: BigDecimal,
    pub method: String,
    pub paid_at: DateTime<Utc>,
    pub period: Option<Period>,
    pub external_ref: Option<String>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPayment {
    pub unit_id: i64,
    #[serde(default)]
    pub kind: PaymentKind,
    pub amount: BigDecimal,
    pub method: String,
    pub paid_at: DateTime<Utc>,
    #[serde(default)]
    pub period: Option<Period>,
    #[serde(default)]
    pub external_ref: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

/// 收款冲抵记录 (PagoAplicacion), 唯一键 (payment, invoice)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PaymentApplication {
    pub id: i64,
    pub payment_id: i64,
    pub invoice_id: i64,
    pub amount: BigDecimal,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPaymentApplication {
    pub payment_id: i64,
    pub invoice_id: i64,
    pub amount: BigDecimal,
}

/// 收款回执: 收款 + 冲抵明细 + 未冲抵余额
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub payment: Payment,
    pub applications: Vec<PaymentApplication>,
    pub applied: BigDecimal,
    /// 多付部分不转为预存款, 只体现在这里
    pub unapplied: BigDecimal,
}

impl PaymentReceipt {
    pub fn new(payment: Payment, applications: Vec<PaymentApplication>) -> Self {
        let applied = applications
            .iter()
            .fold(BigDecimal::zero(), |acc, a| acc + &a.amount);
        let unapplied = &payment.amount - &applied;
        Self {
            payment,
            applications,
            applied,
            unapplied,
        }
    }
}
