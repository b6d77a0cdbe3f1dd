use bigdecimal::{BigDecimal, Zero};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

use super::money::round_half_even;
use super::Unit;
use crate::error::BillingError;

/// 分摊规则类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "rule_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Ordinary,
    Extraordinary,
    Special,
}

/// 分摊口径
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "proration_criterion", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProrationCriterion {
    ByCoefficient,
    ByArea,
    EqualShare,
    ByType,
    FixedAmount,
}

impl ProrationCriterion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ByCoefficient => "by_coefficient",
            Self::ByArea => "by_area",
            Self::EqualShare => "equal_share",
            Self::ByType => "by_type",
            Self::FixedAmount => "fixed_amount",
        }
    }
}

impl fmt::Display for ProrationCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 收费科目 (如 GASTO_COMUN)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ChargeConcept {
    pub id: i64,
    pub code: String,
    pub name: Option<String>,
}

/// 分摊规则, 唯一键 (condominium, concept, valid_from, kind)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ProrationRule {
    pub id: i64,
    pub condominium_id: i64,
    pub concept_id: i64,
    pub kind: RuleKind,
    pub criterion: ProrationCriterion,
    pub valid_from: NaiveDate,
    pub valid_to: Option<NaiveDate>,
    pub description: Option<String>,
}

impl ProrationRule {
    /// 规则在 [from, to] 区间内是否有效
    pub fn is_active_between(&self, from: NaiveDate, to: NaiveDate) -> bool {
        self.valid_from <= to && self.valid_to.map_or(true, |end| end >= from)
    }

    /// 按口径为每个单元计算分摊系数 (纯计算, 不落库)
    ///
    /// - `ByCoefficient`: 直接复制单元产权系数
    /// - `EqualShare`: 每个单元 round(1/N, scale), 合计可能不等于 1, 不做修正
    /// - 其他口径尚未实现, 返回 `UnimplementedCriterion` 而不是静默生成空系数
    pub fn factors_for(
        &self,
        units: &[Unit],
        factor_scale: u32,
    ) -> Result<Vec<ProrationFactor>, BillingError> {
        if units.is_empty() {
            return Err(BillingError::NoUnits {
                condominium_id: self.condominium_id,
            });
        }

        match self.criterion {
            ProrationCriterion::ByCoefficient => Ok(units
                .iter()
                .map(|unit| ProrationFactor {
                    rule_id: self.id,
                    unit_id: unit.id,
                    factor: unit.proportional_coefficient.clone(),
                })
                .collect()),
            ProrationCriterion::EqualShare => {
                let share = BigDecimal::from(1) / BigDecimal::from(units.len() as i64);
                let share = round_half_even(&share, factor_scale);
                Ok(units
                    .iter()
                    .map(|unit| ProrationFactor {
                        rule_id: self.id,
                        unit_id: unit.id,
                        factor: share.clone(),
                    })
                    .collect())
            }
            criterion @ (ProrationCriterion::ByArea
            | ProrationCriterion::ByType
            | ProrationCriterion::FixedAmount) => Err(BillingError::UnimplementedCriterion {
                rule_id: self.id,
                criterion,
            }),
        }
    }
}

/// 新规则
#[derive(Debug, Clone)]
pub struct NewProrationRule {
    pub condominium_id: i64,
    pub concept_id: i64,
    pub kind: RuleKind,
    pub criterion: ProrationCriterion,
    pub valid_from: NaiveDate,
    pub valid_to: Option<NaiveDate>,
    pub description: Option<String>,
}

/// 单元分摊系数, 每 (rule, unit) 一行; 只整体重算, 不局部更新
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct ProrationFactor {
    pub rule_id: i64,
    pub unit_id: i64,
    pub factor: BigDecimal,
}

/// 系数合计
pub fn factor_sum(factors: &[ProrationFactor]) -> BigDecimal {
    factors
        .iter()
        .fold(BigDecimal::zero(), |acc, f| acc + &f.factor)
}

/// 系数合计与 1 的偏差 (sum - 1)
pub fn factor_drift(factors: &[ProrationFactor]) -> BigDecimal {
    factor_sum(factors) - BigDecimal::from(1)
}
