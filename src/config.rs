use chrono::NaiveDate;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::ReclosePolicy;

/// 金额列 NUMERIC(12, 2) 的小数位上限
pub const MAX_ROUNDING_SCALE: u32 = 2;
/// 系数列 NUMERIC(12, 6) 的小数位上限
pub const MAX_FACTOR_SCALE: u32 = 6;

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub billing: BillingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub run_migrations: bool,
}

/// 计费引擎参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    /// 账单金额保留小数位 (整币种为 0)
    pub rounding_scale: u32,
    /// 分摊系数保留小数位
    pub factor_scale: u32,
    pub reclose_policy: ReclosePolicy,
    pub default_rule_valid_from: NaiveDate,
    pub common_expense_concept_code: String,
    pub common_expense_concept_name: String,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            rounding_scale: 0,
            factor_scale: 6,
            reclose_policy: ReclosePolicy::Overwrite,
            default_rule_valid_from: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap_or_default(),
            common_expense_concept_code: "GASTO_COMUN".to_string(),
            common_expense_concept_name: "Gasto Común".to_string(),
            max_retries: 3,
            retry_base_delay_ms: 50,
        }
    }
}

impl BillingConfig {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// 小数位不能超过数据库列精度, 否则落库时会被再次舍入
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rounding_scale > MAX_ROUNDING_SCALE {
            return Err(ConfigError::Message(format!(
                "billing.rounding_scale {} exceeds the stored money scale {}",
                self.rounding_scale, MAX_ROUNDING_SCALE
            )));
        }
        if self.factor_scale > MAX_FACTOR_SCALE {
            return Err(ConfigError::Message(format!(
                "billing.factor_scale {} exceeds the stored factor scale {}",
                self.factor_scale, MAX_FACTOR_SCALE
            )));
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: "postgres://localhost/condo_billing".to_string(),
                max_connections: 20,
                run_migrations: true,
            },
            billing: BillingConfig::default(),
        }
    }
}

impl AppConfig {
    /// 加载配置: 默认值 -> config/default.toml (可选) -> CONDO__* 环境变量 -> DATABASE_URL 等
    pub fn load() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let billing = &defaults.billing;

        let loaded = Config::builder()
            .set_default("server.host", defaults.server.host.clone())?
            .set_default("server.port", i64::from(defaults.server.port))?
            .set_default("database.url", defaults.database.url.clone())?
            .set_default("database.max_connections", i64::from(defaults.database.max_connections))?
            .set_default("database.run_migrations", defaults.database.run_migrations)?
            .set_default("billing.rounding_scale", i64::from(billing.rounding_scale))?
            .set_default("billing.factor_scale", i64::from(billing.factor_scale))?
            .set_default("billing.reclose_policy", "overwrite")?
            .set_default(
                "billing.default_rule_valid_from",
                billing.default_rule_valid_from.to_string(),
            )?
            .set_default(
                "billing.common_expense_concept_code",
                billing.common_expense_concept_code.clone(),
            )?
            .set_default(
                "billing.common_expense_concept_name",
                billing.common_expense_concept_name.clone(),
            )?
            .set_default("billing.max_retries", i64::from(billing.max_retries))?
            .set_default("billing.retry_base_delay_ms", billing.retry_base_delay_ms as i64)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(
                Environment::with_prefix("CONDO")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("database.url", std::env::var("DATABASE_URL").ok())?
            .set_override_option("server.host", std::env::var("SERVER_HOST").ok())?
            .set_override_option("server.port", std::env::var("SERVER_PORT").ok())?
            .build()?
            .try_deserialize::<Self>()?;

        loaded.billing.validate()?;
        Ok(loaded)
    }
}
