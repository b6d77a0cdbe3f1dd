use thiserror::Error;

use crate::models::ProrationCriterion;

/// 计费引擎错误
#[derive(Debug, Error)]
pub enum BillingError {
    /// 社区下没有任何单元, 无法分摊
    #[error("condominium {condominium_id} has no units to prorate")]
    NoUnits { condominium_id: i64 },

    #[error("proration criterion `{criterion}` is not implemented (rule {rule_id})")]
    UnimplementedCriterion {
        rule_id: i64,
        criterion: ProrationCriterion,
    },

    /// 没有可用的普通分摊规则 (月结时会自动创建默认规则)
    #[error("no active ordinary proration rule for condominium {condominium_id} in period {period}")]
    RuleNotFound { condominium_id: i64, period: String },

    /// 行锁冲突 / 版本号不一致, 调用方应退避后重试
    #[error("concurrent modification of {entity} {key}")]
    ConcurrentModification { entity: &'static str, key: String },

    #[error("invalid period `{0}`, expected YYYYMM")]
    InvalidPeriod(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// 明细的 kind 与引用不一致
    #[error("invoice detail {detail_id} is inconsistent: {reason}")]
    InconsistentDetail { detail_id: i64, reason: String },

    #[error("database error: {0}")]
    Persistence(#[source] sqlx::Error),

    /// 非 SQL 存储失败 (内存存储)
    #[error("storage failure: {0}")]
    Storage(String),

    #[error("closing of condominium {condominium_id} for period {period} failed: {source}")]
    ClosingFailed {
        condominium_id: i64,
        period: String,
        #[source]
        source: Box<BillingError>,
    },

    #[error("payment registration for unit {unit_id} failed: {source}")]
    PaymentFailed {
        unit_id: i64,
        #[source]
        source: Box<BillingError>,
    },

    #[error("proration factor computation for rule {rule_id} failed: {source}")]
    ProrationFailed {
        rule_id: i64,
        #[source]
        source: Box<BillingError>,
    },

    #[error("default proration rule for condominium {condominium_id} failed: {source}")]
    DefaultRuleFailed {
        condominium_id: i64,
        #[source]
        source: Box<BillingError>,
    },
}

impl BillingError {
    /// 是否值得退避重试
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConcurrentModification { .. } => true,
            Self::ClosingFailed { source, .. }
            | Self::PaymentFailed { source, .. }
            | Self::ProrationFailed { source, .. }
            | Self::DefaultRuleFailed { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// 剥掉上下文包装, 返回根因
    pub fn root(&self) -> &BillingError {
        match self {
            Self::ClosingFailed { source, .. }
            | Self::PaymentFailed { source, .. }
            | Self::ProrationFailed { source, .. }
            | Self::DefaultRuleFailed { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn closing(self, condominium_id: i64, period: &str) -> Self {
        Self::ClosingFailed {
            condominium_id,
            period: period.to_string(),
            source: Box::new(self),
        }
    }

    pub fn payment(self, unit_id: i64) -> Self {
        Self::PaymentFailed {
            unit_id,
            source: Box::new(self),
        }
    }

    pub fn proration(self, rule_id: i64) -> Self {
        Self::ProrationFailed {
            rule_id,
            source: Box::new(self),
        }
    }

    pub fn default_rule(self, condominium_id: i64) -> Self {
        Self::DefaultRuleFailed {
            condominium_id,
            source: Box::new(self),
        }
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        // 40001 serialization_failure, 40P01 deadlock_detected
        if let sqlx::Error::Database(db) = &err {
            if matches!(db.code().as_deref(), Some("40001") | Some("40P01")) {
                return Self::ConcurrentModification {
                    entity: "transaction",
                    key: db.message().to_string(),
                };
            }
        }
        Self::Persistence(err)
    }
}
