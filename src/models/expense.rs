use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::Period;

/// 社区支出
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Expense {
    pub id: i64,
    pub condominium_id: i64,
    pub period: Period,
    pub category: Option<String>,
    pub net: BigDecimal,
    pub tax: BigDecimal,
    pub total: BigDecimal,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 新支出; total 由 net + tax 推导, 调用方无法指定
#[derive(Debug, Clone)]
pub struct NewExpense {
    pub condominium_id: i64,
    pub period: Period,
    pub category: Option<String>,
    pub net: BigDecimal,
    pub tax: BigDecimal,
    pub description: Option<String>,
}

impl NewExpense {
    pub fn total(&self) -> BigDecimal {
        &self.net + &self.tax
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn total_is_net_plus_tax() {
        let expense = NewExpense {
            condominium_id: 1,
            period: Period::parse("202401").unwrap(),
            category: Some("Aseo".into()),
            net: BigDecimal::from_str("84033.61").unwrap(),
            tax: BigDecimal::from_str("15966.39").unwrap(),
            description: None,
        };
        assert_eq!(expense.total(), BigDecimal::from(100000));
    }
}
