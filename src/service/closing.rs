use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use super::late_fee::{LateFeePolicy, NoLateFee};
use super::proration::{compute_factors_in, default_ordinary_rule_in, resolve_ordinary_rule_in};
use crate::config::BillingConfig;
use crate::db::{export_invoices_csv, BillingStore, BillingTx};
use crate::error::BillingError;
use crate::models::money::round_half_even;
use crate::models::{
    ChargeKind, Charges, ClosingOutcome, ClosingSummary, DetailSource, Expense, Invoice,
    InvoiceKey, InvoiceKind, NewCharge, NewExpense, NewInvoice, NewInvoiceDetail, Period,
    ProrationFactor, ProrationRule,
};

const DETAIL_LABEL: &str = "Gasto común del periodo";
const LATE_INTEREST_LABEL: &str = "Interés por mora";

/// 月结服务: 把账期支出按分摊系数生成各单元账单
pub struct ClosingGenerator<S: BillingStore> {
    store: S,
    config: BillingConfig,
    late_fees: Arc<dyn LateFeePolicy>,
}

impl<S: BillingStore> ClosingGenerator<S> {
    pub fn new(store: S, config: BillingConfig) -> Self {
        Self {
            store,
            config,
            late_fees: Arc::new(NoLateFee),
        }
    }

    pub fn with_late_fee_policy(mut self, policy: Arc<dyn LateFeePolicy>) -> Self {
        self.late_fees = policy;
        self
    }

    /// 记录一笔支出, total = net + tax
    pub async fn record_expense(&self, expense: &NewExpense) -> Result<Expense, BillingError> {
        if expense.net < BigDecimal::zero() || expense.tax < BigDecimal::zero() {
            return Err(BillingError::InvalidAmount(format!(
                "expense net {} / tax {} must not be negative",
                expense.net, expense.tax
            )));
        }

        let mut tx = self.store.begin().await?;
        let row = tx.insert_expense(expense).await?;
        tx.commit().await?;

        info!(
            "[Closing] 社区 {} 账期 {} 记录支出 {} (total={})",
            row.condominium_id, row.period, row.id, row.total
        );
        Ok(row)
    }

    /// 月结, 返回本次写入的账单
    pub async fn close_month(
        &self,
        condominium_id: i64,
        period: &str,
    ) -> Result<Vec<Invoice>, BillingError> {
        Ok(self.close_month_detailed(condominium_id, period).await?.invoices)
    }

    /// 月结, 附带统计
    pub async fn close_month_detailed(
        &self,
        condominium_id: i64,
        period: &str,
    ) -> Result<ClosingOutcome, BillingError> {
        let parsed = Period::parse(period).map_err(|e| e.closing(condominium_id, period))?;
        self.close(condominium_id, &parsed)
            .await
            .map_err(|e| e.closing(condominium_id, period))
    }

    async fn close(&self, condominium_id: i64, period: &Period) -> Result<ClosingOutcome, BillingError> {
        info!("[Closing] 开始月结: 社区 {} 账期 {}", condominium_id, period);
        let mut tx = self.store.begin().await?;

        // 1. 汇总支出; 为 0 时照常生成 0 金额账单
        let total_expenses = tx.sum_expenses(condominium_id, period).await?;
        if total_expenses <= BigDecimal::zero() {
            info!(
                "[Closing] 社区 {} 账期 {} 没有支出, 生成 0 金额账单",
                condominium_id, period
            );
        }

        // 2. 有效规则, 缺失时创建默认规则
        let rule = match resolve_ordinary_rule_in(&mut tx, condominium_id, period).await {
            Ok(rule) => rule,
            Err(BillingError::RuleNotFound { .. }) => {
                info!("[Closing] 社区 {} 没有有效普通规则, 使用默认规则", condominium_id);
                default_ordinary_rule_in(&mut tx, condominium_id, &self.config).await?
            }
            Err(e) => return Err(e),
        };

        // 3. 系数缺失时现算; 没有单元则失败
        tx.lock_rule(rule.id).await?;
        let mut factors = tx.list_factors(rule.id).await?;
        if factors.is_empty() {
            factors = compute_factors_in(&mut tx, &rule, self.config.factor_scale).await?;
        }

        // 4. 逐单元出账
        let emitted_at = Utc::now();
        let mut invoices = Vec::with_capacity(factors.len());
        for factor in &factors {
            let invoice = self
                .bill_unit(&mut tx, &rule, period, factor, &total_expenses, emitted_at)
                .await?;
            invoices.push(invoice);
        }

        tx.commit().await?;

        let summary =
            ClosingSummary::from_invoices(condominium_id, period.clone(), total_expenses, &invoices);
        if !summary.rounding_difference.is_zero() {
            info!(
                "[Closing] 社区 {} 账期 {} 舍入差额 {}",
                condominium_id, period, summary.rounding_difference
            );
        }
        info!(
            "[Closing] 月结完成: 社区 {} 账期 {} 规则 {} 账单 {} 张, 支出 {} 分摊 {}",
            condominium_id,
            period,
            rule.id,
            summary.invoices,
            summary.total_expenses,
            summary.total_prorated
        );
        Ok(ClosingOutcome { summary, invoices })
    }

    /// 单个单元: 账单头 -> 费用 -> 明细 (-> 滞纳金明细)
    async fn bill_unit<T: BillingTx>(
        &self,
        tx: &mut T,
        rule: &ProrationRule,
        period: &Period,
        factor: &ProrationFactor,
        total_expenses: &BigDecimal,
        emitted_at: DateTime<Utc>,
    ) -> Result<Invoice, BillingError> {
        let prorated = round_half_even(&(total_expenses * &factor.factor), self.config.rounding_scale);
        let key = InvoiceKey {
            unit_id: factor.unit_id,
            period: period.clone(),
            kind: InvoiceKind::Monthly,
        };
        let interest = self
            .late_fees
            .assess(&key, &prorated)
            .filter(|amount| *amount > BigDecimal::zero())
            .unwrap_or_else(BigDecimal::zero);
        let charges = Charges {
            prorated: prorated.clone(),
            interest: interest.clone(),
            note: Some(format!("Cierre mensual {}", period)),
        };

        let invoice = match tx.lock_invoice(&key).await? {
            Some(mut existing) => {
                let discarded = existing.restate(&charges, rule.id, self.config.reclose_policy);
                if discarded > BigDecimal::zero() {
                    warn!(
                        "[Closing] 单元 {} 账期 {} 重新月结, 账单 {} 丢弃已付金额 {}",
                        key.unit_id, period, existing.id, discarded
                    );
                }
                tx.update_invoice(&existing).await?
            }
            None => {
                let new_invoice = NewInvoice::issue(key.clone(), &charges, Some(rule.id), emitted_at);
                tx.insert_invoice(&new_invoice)
                    .await?
                    .ok_or_else(|| BillingError::ConcurrentModification {
                        entity: "invoice",
                        key: format!("unit {} period {} monthly", key.unit_id, period),
                    })?
            }
        };

        let charge = tx
            .upsert_charge(&NewCharge {
                unit_id: key.unit_id,
                period: period.clone(),
                concept_id: rule.concept_id,
                kind: ChargeKind::Normal,
                amount: prorated.clone(),
                detail: Some(format!(
                    "Gasto común prorrateado (factor {})",
                    factor.factor.with_scale(6)
                )),
            })
            .await?;

        tx.upsert_invoice_detail(&NewInvoiceDetail {
            invoice_id: invoice.id,
            source: DetailSource::CommonCharge { charge_id: charge.id },
            amount: prorated,
            label: Some(DETAIL_LABEL.to_string()),
        })
        .await?;

        if interest > BigDecimal::zero() {
            tx.upsert_invoice_detail(&NewInvoiceDetail {
                invoice_id: invoice.id,
                source: DetailSource::LateInterest,
                amount: interest,
                label: Some(LATE_INTEREST_LABEL.to_string()),
            })
            .await?;
        } else {
            // 明细合计须与账单头一致, 清掉上次月结留下的滞纳金
            let removed = tx
                .delete_invoice_detail(invoice.id, DetailSource::LateInterest)
                .await?;
            if removed > 0 {
                info!(
                    "[Closing] 账单 {} 重新月结无滞纳金, 移除旧滞纳金明细",
                    invoice.id
                );
            }
        }

        Ok(invoice)
    }

    /// 账期内社区全部账单
    pub async fn invoices_for_period(
        &self,
        condominium_id: i64,
        period: &Period,
    ) -> Result<Vec<Invoice>, BillingError> {
        let mut tx = self.store.begin().await?;
        let invoices = tx.list_invoices_for_period(condominium_id, period).await?;
        tx.commit().await?;
        Ok(invoices)
    }

    /// 导出账期账单为 CSV
    pub async fn export_period_csv(
        &self,
        condominium_id: i64,
        period: &Period,
    ) -> Result<Vec<u8>, BillingError> {
        let invoices = self.invoices_for_period(condominium_id, period).await?;
        let mut buffer = Vec::new();
        export_invoices_csv(&invoices, &mut buffer)
            .map_err(|e| BillingError::Storage(format!("csv export failed: {}", e)))?;
        Ok(buffer)
    }
}
