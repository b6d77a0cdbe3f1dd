use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::NaiveDate;

use crate::error::BillingError;
use crate::models::{
    Charge, ChargeConcept, DetailSource, Expense, Invoice, InvoiceDetail, InvoiceKey, NewCharge,
    NewExpense, NewInvoice, NewInvoiceDetail, NewPayment, NewPaymentApplication, NewProrationRule,
    Payment, PaymentApplication, Period, ProrationFactor, ProrationRule, RuleKind, Unit,
};

/// 存储入口: 每次调用开启一个事务
#[async_trait]
pub trait BillingStore: Send + Sync + 'static {
    type Tx: BillingTx;

    async fn begin(&self) -> Result<Self::Tx, BillingError>;
}

/// 单个事务内可用的读写操作
///
/// 未调用 `commit` 就被丢弃的事务整体回滚。`lock_*` 系列在事务结束前持有行锁。
#[async_trait]
pub trait BillingTx: Send {
    // ---- 主数据 ----
    async fn list_units(&mut self, condominium_id: i64) -> Result<Vec<Unit>, BillingError>;

    async fn find_unit(&mut self, unit_id: i64) -> Result<Option<Unit>, BillingError>;

    // ---- 支出 ----
    async fn insert_expense(&mut self, expense: &NewExpense) -> Result<Expense, BillingError>;

    async fn sum_expenses(
        &mut self,
        condominium_id: i64,
        period: &Period,
    ) -> Result<BigDecimal, BillingError>;

    // ---- 分摊 ----
    async fn get_or_create_concept(
        &mut self,
        code: &str,
        name: &str,
    ) -> Result<ChargeConcept, BillingError>;

    async fn find_rule(&mut self, rule_id: i64) -> Result<Option<ProrationRule>, BillingError>;

    /// 有效期覆盖 [from, to] 的规则, valid_from 最新者优先
    async fn find_active_rule(
        &mut self,
        condominium_id: i64,
        kind: RuleKind,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Option<ProrationRule>, BillingError>;

    /// 按唯一键 (condominium, concept, kind) 查找
    async fn find_rule_for_concept(
        &mut self,
        condominium_id: i64,
        concept_id: i64,
        kind: RuleKind,
    ) -> Result<Option<ProrationRule>, BillingError>;

    /// 唯一键冲突时返回 None
    async fn insert_rule(
        &mut self,
        rule: &NewProrationRule,
    ) -> Result<Option<ProrationRule>, BillingError>;

    /// 规则级锁, 串行化系数重算
    async fn lock_rule(&mut self, rule_id: i64) -> Result<(), BillingError>;

    async fn delete_factors(&mut self, rule_id: i64) -> Result<u64, BillingError>;

    async fn insert_factors(&mut self, factors: &[ProrationFactor]) -> Result<(), BillingError>;

    async fn list_factors(&mut self, rule_id: i64) -> Result<Vec<ProrationFactor>, BillingError>;

    // ---- 账单 ----
    /// 按自然键读取并锁定账单
    async fn lock_invoice(&mut self, key: &InvoiceKey) -> Result<Option<Invoice>, BillingError>;

    /// 自然键冲突时返回 None
    async fn insert_invoice(&mut self, invoice: &NewInvoice) -> Result<Option<Invoice>, BillingError>;

    /// 按版本号比较后更新, 版本不一致返回 `ConcurrentModification`
    async fn update_invoice(&mut self, invoice: &Invoice) -> Result<Invoice, BillingError>;

    /// 单元下 balance > 0 的账单, 按 (emitted_at, id) 升序, 全部加锁
    async fn lock_pending_invoices(&mut self, unit_id: i64) -> Result<Vec<Invoice>, BillingError>;

    async fn list_invoices_for_unit(&mut self, unit_id: i64) -> Result<Vec<Invoice>, BillingError>;

    async fn list_invoices_for_period(
        &mut self,
        condominium_id: i64,
        period: &Period,
    ) -> Result<Vec<Invoice>, BillingError>;

    /// 按 (unit, period, concept) 新增或更新
    async fn upsert_charge(&mut self, charge: &NewCharge) -> Result<Charge, BillingError>;

    async fn list_charges(&mut self, unit_id: i64, period: &Period) -> Result<Vec<Charge>, BillingError>;

    /// 按 (invoice, kind, charge_ref) 新增或更新
    async fn upsert_invoice_detail(
        &mut self,
        detail: &NewInvoiceDetail,
    ) -> Result<InvoiceDetail, BillingError>;

    /// 按 (invoice, kind, charge_ref) 删除明细, 返回删除条数
    async fn delete_invoice_detail(
        &mut self,
        invoice_id: i64,
        source: DetailSource,
    ) -> Result<u64, BillingError>;

    async fn list_invoice_details(&mut self, invoice_id: i64) -> Result<Vec<InvoiceDetail>, BillingError>;

    // ---- 收款 ----
    async fn insert_payment(&mut self, payment: &NewPayment) -> Result<Payment, BillingError>;

    async fn find_payment(&mut self, payment_id: i64) -> Result<Option<Payment>, BillingError>;

    async fn insert_application(
        &mut self,
        application: &NewPaymentApplication,
    ) -> Result<PaymentApplication, BillingError>;

    async fn list_applications(&mut self, payment_id: i64) -> Result<Vec<PaymentApplication>, BillingError>;

    async fn commit(self) -> Result<(), BillingError>;
}
