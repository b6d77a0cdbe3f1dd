use bigdecimal::Zero;
use tracing::{debug, info, warn};

use crate::config::BillingConfig;
use crate::db::{BillingStore, BillingTx};
use crate::error::BillingError;
use crate::models::{
    factor_drift, factor_sum, NewProrationRule, Period, ProrationCriterion, ProrationFactor,
    ProrationRule, RuleKind,
};

const DEFAULT_RULE_DESCRIPTION: &str = "Regla base de gasto común por coeficiente de propiedad";

/// 分摊系数计算服务
pub struct ProrationCalculator<S: BillingStore> {
    store: S,
    config: BillingConfig,
}

impl<S: BillingStore> ProrationCalculator<S> {
    pub fn new(store: S, config: BillingConfig) -> Self {
        Self { store, config }
    }

    /// 重算规则的全部系数, 返回写入条数
    ///
    /// 社区下没有单元时记录警告并返回 0, 已有系数保持不变。
    pub async fn compute_proration_factors(&self, rule_id: i64) -> Result<usize, BillingError> {
        self.compute(rule_id)
            .await
            .map_err(|e| e.proration(rule_id))
    }

    async fn compute(&self, rule_id: i64) -> Result<usize, BillingError> {
        let mut tx = self.store.begin().await?;
        let rule = tx.find_rule(rule_id).await?.ok_or(BillingError::NotFound {
            entity: "proration rule",
            id: rule_id,
        })?;

        let written = match compute_factors_in(&mut tx, &rule, self.config.factor_scale).await {
            Ok(factors) => factors.len(),
            Err(BillingError::NoUnits { condominium_id }) => {
                warn!(
                    "[Proration] 社区 {} 没有单元, 规则 {} 未生成系数",
                    condominium_id, rule.id
                );
                0
            }
            Err(e) => return Err(e),
        };

        tx.commit().await?;
        Ok(written)
    }

    /// 获取或创建社区的默认普通规则 (GASTO_COMUN, 按产权系数)
    pub async fn get_or_create_default_ordinary_rule(
        &self,
        condominium_id: i64,
    ) -> Result<ProrationRule, BillingError> {
        self.default_rule(condominium_id)
            .await
            .map_err(|e| e.default_rule(condominium_id))
    }

    async fn default_rule(&self, condominium_id: i64) -> Result<ProrationRule, BillingError> {
        let mut tx = self.store.begin().await?;
        let rule = default_ordinary_rule_in(&mut tx, condominium_id, &self.config).await?;
        tx.commit().await?;
        Ok(rule)
    }

    /// 读取规则当前系数
    pub async fn factors(&self, rule_id: i64) -> Result<Vec<ProrationFactor>, BillingError> {
        let mut tx = self.store.begin().await?;
        let factors = tx.list_factors(rule_id).await?;
        tx.commit().await?;
        Ok(factors)
    }
}

/// 在调用方事务内重算系数: 先锁规则, 再整体删除后批量插入
///
/// 没有单元时返回 `NoUnits`, 不删除旧系数。
pub(crate) async fn compute_factors_in<T: BillingTx>(
    tx: &mut T,
    rule: &ProrationRule,
    factor_scale: u32,
) -> Result<Vec<ProrationFactor>, BillingError> {
    tx.lock_rule(rule.id).await?;

    let units = tx.list_units(rule.condominium_id).await?;
    let factors = rule.factors_for(&units, factor_scale)?;

    let deleted = tx.delete_factors(rule.id).await?;
    tx.insert_factors(&factors).await?;
    debug!(
        "[Proration] 规则 {} 删除旧系数 {} 条, 写入 {} 条",
        rule.id,
        deleted,
        factors.len()
    );

    let drift = factor_drift(&factors);
    if !drift.is_zero() {
        warn!(
            "[Proration] 规则 {} ({}) 系数合计 {} 偏离 1: drift={}, 单元数 {}",
            rule.id,
            rule.criterion,
            factor_sum(&factors),
            drift,
            factors.len()
        );
    }

    info!(
        "[Proration] 规则 {} 按 {} 生成 {} 条系数",
        rule.id,
        rule.criterion,
        factors.len()
    );
    Ok(factors)
}

/// 查找账期内有效的普通规则, 不存在时返回 `RuleNotFound`
pub(crate) async fn resolve_ordinary_rule_in<T: BillingTx>(
    tx: &mut T,
    condominium_id: i64,
    period: &Period,
) -> Result<ProrationRule, BillingError> {
    tx.find_active_rule(
        condominium_id,
        RuleKind::Ordinary,
        period.first_day(),
        period.last_day(),
    )
    .await?
    .ok_or_else(|| BillingError::RuleNotFound {
        condominium_id,
        period: period.to_string(),
    })
}

/// 按 (社区, 科目, 普通) 获取或创建默认规则; 仅新建时计算系数
pub(crate) async fn default_ordinary_rule_in<T: BillingTx>(
    tx: &mut T,
    condominium_id: i64,
    config: &BillingConfig,
) -> Result<ProrationRule, BillingError> {
    let concept = tx
        .get_or_create_concept(
            &config.common_expense_concept_code,
            &config.common_expense_concept_name,
        )
        .await?;

    if let Some(rule) = tx
        .find_rule_for_concept(condominium_id, concept.id, RuleKind::Ordinary)
        .await?
    {
        return Ok(rule);
    }

    let new_rule = NewProrationRule {
        condominium_id,
        concept_id: concept.id,
        kind: RuleKind::Ordinary,
        criterion: ProrationCriterion::ByCoefficient,
        valid_from: config.default_rule_valid_from,
        valid_to: None,
        description: Some(DEFAULT_RULE_DESCRIPTION.to_string()),
    };

    let Some(rule) = tx.insert_rule(&new_rule).await? else {
        // 并发创建: 唯一键已被占用, 读回对方的规则
        return tx
            .find_rule_for_concept(condominium_id, concept.id, RuleKind::Ordinary)
            .await?
            .ok_or_else(|| BillingError::ConcurrentModification {
                entity: "proration rule",
                key: format!("condominium {} concept {}", condominium_id, concept.code),
            });
    };

    info!(
        "[Proration] 社区 {} 创建默认规则 {} (科目 {})",
        condominium_id, rule.id, concept.code
    );

    match compute_factors_in(tx, &rule, config.factor_scale).await {
        Ok(_) => {}
        Err(BillingError::NoUnits { .. }) => {
            warn!(
                "[Proration] 社区 {} 没有单元, 默认规则 {} 暂无系数",
                condominium_id, rule.id
            );
        }
        Err(e) => return Err(e),
    }

    Ok(rule)
}
