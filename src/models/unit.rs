use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// 单元 (住宅 / 仓库 / 车位), 主数据只读
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Unit {
    pub id: i64,
    pub group_id: i64,
    pub condominium_id: i64,
    pub code: String,
    pub unit_type: Option<String>,
    pub area_m2: Option<BigDecimal>,
    /// 产权系数, 同一社区下约定合计为 1
    pub proportional_coefficient: BigDecimal,
}
