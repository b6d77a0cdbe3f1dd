use async_trait::async_trait;
use bigdecimal::{BigDecimal, Zero};
use chrono::{NaiveDate, Utc};
use indexmap::IndexMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::store::{BillingStore, BillingTx};
use crate::error::BillingError;
use crate::models::{
    Charge, ChargeConcept, DetailSource, Expense, Invoice, InvoiceDetail, InvoiceKey, NewCharge,
    NewExpense, NewInvoice, NewInvoiceDetail, NewPayment, NewPaymentApplication, NewProrationRule,
    Payment, PaymentApplication, Period, ProrationFactor, ProrationRule, RuleKind, Unit,
};

/// 故障注入点: 同一事务内第 n 次 (从 1 开始) 调用对应操作时失败
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    InvoiceUpdate(usize),
    InvoiceInsert(usize),
    ChargeUpsert(usize),
    DetailUpsert(usize),
    ApplicationInsert(usize),
    Commit,
}

/// 内存中的全部表
#[derive(Debug, Clone, Default)]
struct Tables {
    next_id: i64,
    groups: IndexMap<(i64, String), i64>,
    units: IndexMap<i64, Unit>,
    concepts: IndexMap<i64, ChargeConcept>,
    expenses: IndexMap<i64, Expense>,
    rules: IndexMap<i64, ProrationRule>,
    factors: Vec<ProrationFactor>,
    invoices: IndexMap<i64, Invoice>,
    charges: IndexMap<i64, Charge>,
    details: IndexMap<i64, InvoiceDetail>,
    payments: IndexMap<i64, Payment>,
    applications: IndexMap<i64, PaymentApplication>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// 单元主数据种子
#[derive(Debug, Clone)]
pub struct UnitSeed {
    pub condominium_id: i64,
    pub group: String,
    pub code: String,
    pub unit_type: Option<String>,
    pub area_m2: Option<BigDecimal>,
    pub proportional_coefficient: BigDecimal,
}

impl UnitSeed {
    pub fn new(condominium_id: i64, code: &str, proportional_coefficient: BigDecimal) -> Self {
        Self {
            condominium_id,
            group: "Torre A".to_string(),
            code: code.to_string(),
            unit_type: Some("depto".to_string()),
            area_m2: None,
            proportional_coefficient,
        }
    }
}

/// 进程内存储
///
/// 同一时刻只允许一个事务 (单写者)。事务开始时复制全部表, 提交时整体替换,
/// 丢弃即回滚。唯一键约束与 PostgreSQL 表结构一致。
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    fault: Arc<std::sync::Mutex<Option<FailPoint>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 下一个开启的事务在指定位置失败 (一次性)
    pub fn fail_next(&self, point: FailPoint) {
        if let Ok(mut fault) = self.fault.lock() {
            *fault = Some(point);
        }
    }

    /// 写入单元主数据 (分组按名称复用)
    pub async fn seed_unit(&self, seed: UnitSeed) -> Unit {
        let mut tables = self.tables.lock().await;
        let group_key = (seed.condominium_id, seed.group.clone());
        let existing = tables.groups.get(&group_key).copied();
        let group_id = match existing {
            Some(id) => id,
            None => {
                let id = tables.next_id();
                tables.groups.insert(group_key, id);
                id
            }
        };
        let unit = Unit {
            id: tables.next_id(),
            group_id,
            condominium_id: seed.condominium_id,
            code: seed.code,
            unit_type: seed.unit_type,
            area_m2: seed.area_m2,
            proportional_coefficient: seed.proportional_coefficient,
        };
        tables.units.insert(unit.id, unit.clone());
        unit
    }

    /// 直接写入一张账单 (测试夹具)
    pub async fn seed_invoice(&self, invoice: NewInvoice) -> Invoice {
        let mut tables = self.tables.lock().await;
        let row = materialize_invoice(&mut tables, &invoice);
        tables.invoices.insert(row.id, row.clone());
        row
    }

    /// 更新单元产权系数 (主数据在核心之外维护)
    pub async fn set_coefficient(&self, unit_id: i64, coefficient: BigDecimal) {
        let mut tables = self.tables.lock().await;
        if let Some(unit) = tables.units.get_mut(&unit_id) {
            unit.proportional_coefficient = coefficient;
        }
    }
}

fn materialize_invoice(tables: &mut Tables, invoice: &NewInvoice) -> Invoice {
    Invoice {
        id: tables.next_id(),
        unit_id: invoice.unit_id,
        period: invoice.period.clone(),
        kind: invoice.kind,
        status: invoice.status,
        emitted_at: invoice.emitted_at,
        rule_id: invoice.rule_id,
        total_charges: invoice.total_charges.clone(),
        total_discounts: BigDecimal::zero(),
        total_interest: invoice.total_interest.clone(),
        total_paid: BigDecimal::zero(),
        balance: invoice.balance.clone(),
        note: invoice.note.clone(),
        version: 1,
    }
}

fn sorted_by_emission(mut invoices: Vec<Invoice>) -> Vec<Invoice> {
    invoices.sort_by(|a, b| a.emitted_at.cmp(&b.emitted_at).then(a.id.cmp(&b.id)));
    invoices
}

#[async_trait]
impl BillingStore for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, BillingError> {
        let guard = self.tables.clone().lock_owned().await;
        let work = guard.clone();
        let fault = self.fault.lock().ok().and_then(|mut f| f.take());
        Ok(MemoryTx {
            guard,
            work,
            fault,
            calls: Calls::default(),
        })
    }
}

#[derive(Debug, Default)]
struct Calls {
    invoice_update: usize,
    invoice_insert: usize,
    charge_upsert: usize,
    detail_upsert: usize,
    application_insert: usize,
}

/// 内存事务: 持有全局锁直到提交或丢弃
pub struct MemoryTx {
    guard: OwnedMutexGuard<Tables>,
    work: Tables,
    fault: Option<FailPoint>,
    calls: Calls,
}

impl MemoryTx {
    fn trip(&self, point: FailPoint) -> Result<(), BillingError> {
        if self.fault == Some(point) {
            return Err(BillingError::Storage(format!("injected failure at {point:?}")));
        }
        Ok(())
    }
}

#[async_trait]
impl BillingTx for MemoryTx {
    async fn list_units(&mut self, condominium_id: i64) -> Result<Vec<Unit>, BillingError> {
        Ok(self
            .work
            .units
            .values()
            .filter(|u| u.condominium_id == condominium_id)
            .cloned()
            .collect())
    }

    async fn find_unit(&mut self, unit_id: i64) -> Result<Option<Unit>, BillingError> {
        Ok(self.work.units.get(&unit_id).cloned())
    }

    async fn insert_expense(&mut self, expense: &NewExpense) -> Result<Expense, BillingError> {
        let row = Expense {
            id: self.work.next_id(),
            condominium_id: expense.condominium_id,
            period: expense.period.clone(),
            category: expense.category.clone(),
            net: expense.net.clone(),
            tax: expense.tax.clone(),
            total: expense.total(),
            description: expense.description.clone(),
            created_at: Utc::now(),
        };
        self.work.expenses.insert(row.id, row.clone());
        Ok(row)
    }

    async fn sum_expenses(
        &mut self,
        condominium_id: i64,
        period: &Period,
    ) -> Result<BigDecimal, BillingError> {
        Ok(self
            .work
            .expenses
            .values()
            .filter(|e| e.condominium_id == condominium_id && e.period == *period)
            .fold(BigDecimal::zero(), |acc, e| acc + &e.total))
    }

    async fn get_or_create_concept(
        &mut self,
        code: &str,
        name: &str,
    ) -> Result<ChargeConcept, BillingError> {
        if let Some(concept) = self.work.concepts.values().find(|c| c.code == code) {
            return Ok(concept.clone());
        }
        let concept = ChargeConcept {
            id: self.work.next_id(),
            code: code.to_string(),
            name: Some(name.to_string()),
        };
        self.work.concepts.insert(concept.id, concept.clone());
        Ok(concept)
    }

    async fn find_rule(&mut self, rule_id: i64) -> Result<Option<ProrationRule>, BillingError> {
        Ok(self.work.rules.get(&rule_id).cloned())
    }

    async fn find_active_rule(
        &mut self,
        condominium_id: i64,
        kind: RuleKind,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Option<ProrationRule>, BillingError> {
        let mut candidates: Vec<&ProrationRule> = self
            .work
            .rules
            .values()
            .filter(|r| r.condominium_id == condominium_id && r.kind == kind)
            .filter(|r| r.is_active_between(from, to))
            .collect();
        candidates.sort_by(|a, b| b.valid_from.cmp(&a.valid_from).then(a.id.cmp(&b.id)));
        Ok(candidates.first().map(|r| (*r).clone()))
    }

    async fn find_rule_for_concept(
        &mut self,
        condominium_id: i64,
        concept_id: i64,
        kind: RuleKind,
    ) -> Result<Option<ProrationRule>, BillingError> {
        let mut candidates: Vec<&ProrationRule> = self
            .work
            .rules
            .values()
            .filter(|r| {
                r.condominium_id == condominium_id && r.concept_id == concept_id && r.kind == kind
            })
            .collect();
        candidates.sort_by(|a, b| a.valid_from.cmp(&b.valid_from).then(a.id.cmp(&b.id)));
        Ok(candidates.first().map(|r| (*r).clone()))
    }

    async fn insert_rule(
        &mut self,
        rule: &NewProrationRule,
    ) -> Result<Option<ProrationRule>, BillingError> {
        let taken = self.work.rules.values().any(|r| {
            r.condominium_id == rule.condominium_id
                && r.concept_id == rule.concept_id
                && r.valid_from == rule.valid_from
                && r.kind == rule.kind
        });
        if taken {
            return Ok(None);
        }
        let row = ProrationRule {
            id: self.work.next_id(),
            condominium_id: rule.condominium_id,
            concept_id: rule.concept_id,
            kind: rule.kind,
            criterion: rule.criterion,
            valid_from: rule.valid_from,
            valid_to: rule.valid_to,
            description: rule.description.clone(),
        };
        self.work.rules.insert(row.id, row.clone());
        Ok(Some(row))
    }

    async fn lock_rule(&mut self, rule_id: i64) -> Result<(), BillingError> {
        // 单写者模型下事务本身即锁
        if self.work.rules.contains_key(&rule_id) {
            Ok(())
        } else {
            Err(BillingError::NotFound {
                entity: "proration rule",
                id: rule_id,
            })
        }
    }

    async fn delete_factors(&mut self, rule_id: i64) -> Result<u64, BillingError> {
        let before = self.work.factors.len();
        self.work.factors.retain(|f| f.rule_id != rule_id);
        Ok((before - self.work.factors.len()) as u64)
    }

    async fn insert_factors(&mut self, factors: &[ProrationFactor]) -> Result<(), BillingError> {
        for factor in factors {
            let duplicate = self
                .work
                .factors
                .iter()
                .any(|f| f.rule_id == factor.rule_id && f.unit_id == factor.unit_id);
            if duplicate {
                return Err(BillingError::Storage(format!(
                    "duplicate factor for rule {} unit {}",
                    factor.rule_id, factor.unit_id
                )));
            }
            self.work.factors.push(factor.clone());
        }
        Ok(())
    }

    async fn list_factors(&mut self, rule_id: i64) -> Result<Vec<ProrationFactor>, BillingError> {
        let mut factors: Vec<ProrationFactor> = self
            .work
            .factors
            .iter()
            .filter(|f| f.rule_id == rule_id)
            .cloned()
            .collect();
        factors.sort_by_key(|f| f.unit_id);
        Ok(factors)
    }

    async fn lock_invoice(&mut self, key: &InvoiceKey) -> Result<Option<Invoice>, BillingError> {
        Ok(self
            .work
            .invoices
            .values()
            .find(|i| i.key() == *key)
            .cloned())
    }

    async fn insert_invoice(&mut self, invoice: &NewInvoice) -> Result<Option<Invoice>, BillingError> {
        self.calls.invoice_insert += 1;
        self.trip(FailPoint::InvoiceInsert(self.calls.invoice_insert))?;

        let key = invoice.key();
        if self.work.invoices.values().any(|i| i.key() == key) {
            return Ok(None);
        }
        let row = materialize_invoice(&mut self.work, invoice);
        self.work.invoices.insert(row.id, row.clone());
        Ok(Some(row))
    }

    async fn update_invoice(&mut self, invoice: &Invoice) -> Result<Invoice, BillingError> {
        self.calls.invoice_update += 1;
        self.trip(FailPoint::InvoiceUpdate(self.calls.invoice_update))?;

        let stored = self
            .work
            .invoices
            .get_mut(&invoice.id)
            .ok_or(BillingError::NotFound {
                entity: "invoice",
                id: invoice.id,
            })?;
        if stored.version != invoice.version {
            return Err(BillingError::ConcurrentModification {
                entity: "invoice",
                key: format!("{} (version {})", invoice.id, invoice.version),
            });
        }
        let mut updated = invoice.clone();
        updated.version += 1;
        *stored = updated.clone();
        Ok(updated)
    }

    async fn lock_pending_invoices(&mut self, unit_id: i64) -> Result<Vec<Invoice>, BillingError> {
        let pending = self
            .work
            .invoices
            .values()
            .filter(|i| i.unit_id == unit_id && i.balance > BigDecimal::zero())
            .cloned()
            .collect();
        Ok(sorted_by_emission(pending))
    }

    async fn list_invoices_for_unit(&mut self, unit_id: i64) -> Result<Vec<Invoice>, BillingError> {
        let invoices = self
            .work
            .invoices
            .values()
            .filter(|i| i.unit_id == unit_id)
            .cloned()
            .collect();
        Ok(sorted_by_emission(invoices))
    }

    async fn list_invoices_for_period(
        &mut self,
        condominium_id: i64,
        period: &Period,
    ) -> Result<Vec<Invoice>, BillingError> {
        let units = &self.work.units;
        let mut invoices: Vec<Invoice> = self
            .work
            .invoices
            .values()
            .filter(|i| i.period == *period)
            .filter(|i| {
                units
                    .get(&i.unit_id)
                    .map_or(false, |u| u.condominium_id == condominium_id)
            })
            .cloned()
            .collect();
        invoices.sort_by(|a, b| a.unit_id.cmp(&b.unit_id).then(a.id.cmp(&b.id)));
        Ok(invoices)
    }

    async fn upsert_charge(&mut self, charge: &NewCharge) -> Result<Charge, BillingError> {
        self.calls.charge_upsert += 1;
        self.trip(FailPoint::ChargeUpsert(self.calls.charge_upsert))?;

        let existing = self.work.charges.values_mut().find(|c| {
            c.unit_id == charge.unit_id && c.period == charge.period && c.concept_id == charge.concept_id
        });
        if let Some(row) = existing {
            row.kind = charge.kind;
            row.amount = charge.amount.clone();
            row.detail = charge.detail.clone();
            return Ok(row.clone());
        }
        let row = Charge {
            id: self.work.next_id(),
            unit_id: charge.unit_id,
            period: charge.period.clone(),
            concept_id: charge.concept_id,
            kind: charge.kind,
            amount: charge.amount.clone(),
            detail: charge.detail.clone(),
            created_at: Utc::now(),
        };
        self.work.charges.insert(row.id, row.clone());
        Ok(row)
    }

    async fn list_charges(&mut self, unit_id: i64, period: &Period) -> Result<Vec<Charge>, BillingError> {
        Ok(self
            .work
            .charges
            .values()
            .filter(|c| c.unit_id == unit_id && c.period == *period)
            .cloned()
            .collect())
    }

    async fn upsert_invoice_detail(
        &mut self,
        detail: &NewInvoiceDetail,
    ) -> Result<InvoiceDetail, BillingError> {
        self.calls.detail_upsert += 1;
        self.trip(FailPoint::DetailUpsert(self.calls.detail_upsert))?;

        let existing = self.work.details.values_mut().find(|d| {
            d.invoice_id == detail.invoice_id
                && d.source.kind() == detail.source.kind()
                && d.source.charge_ref() == detail.source.charge_ref()
        });
        if let Some(row) = existing {
            row.amount = detail.amount.clone();
            row.label = detail.label.clone();
            return Ok(row.clone());
        }
        let row = InvoiceDetail {
            id: self.work.next_id(),
            invoice_id: detail.invoice_id,
            source: detail.source,
            amount: detail.amount.clone(),
            label: detail.label.clone(),
        };
        self.work.details.insert(row.id, row.clone());
        Ok(row)
    }

    async fn delete_invoice_detail(
        &mut self,
        invoice_id: i64,
        source: DetailSource,
    ) -> Result<u64, BillingError> {
        let before = self.work.details.len();
        self.work.details.retain(|_, d| {
            !(d.invoice_id == invoice_id
                && d.source.kind() == source.kind()
                && d.source.charge_ref() == source.charge_ref())
        });
        Ok((before - self.work.details.len()) as u64)
    }

    async fn list_invoice_details(&mut self, invoice_id: i64) -> Result<Vec<InvoiceDetail>, BillingError> {
        Ok(self
            .work
            .details
            .values()
            .filter(|d| d.invoice_id == invoice_id)
            .cloned()
            .collect())
    }

    async fn insert_payment(&mut self, payment: &NewPayment) -> Result<Payment, BillingError> {
        if !self.work.units.contains_key(&payment.unit_id) {
            return Err(BillingError::Storage(format!(
                "payment references missing unit {}",
                payment.unit_id
            )));
        }
        let row = Payment {
            id: self.work.next_id(),
            unit_id: payment.unit_id,
            kind: payment.kind,
            amount: payment.amount.clone(),
            method: payment.method.clone(),
            paid_at: payment.paid_at,
            period: payment.period.clone(),
            external_ref: payment.external_ref.clone(),
            note: payment.note.clone(),
            created_at: Utc::now(),
        };
        self.work.payments.insert(row.id, row.clone());
        Ok(row)
    }

    async fn find_payment(&mut self, payment_id: i64) -> Result<Option<Payment>, BillingError> {
        Ok(self.work.payments.get(&payment_id).cloned())
    }

    async fn insert_application(
        &mut self,
        application: &NewPaymentApplication,
    ) -> Result<PaymentApplication, BillingError> {
        self.calls.application_insert += 1;
        self.trip(FailPoint::ApplicationInsert(self.calls.application_insert))?;

        let duplicate = self.work.applications.values().any(|a| {
            a.payment_id == application.payment_id && a.invoice_id == application.invoice_id
        });
        if duplicate {
            return Err(BillingError::Storage(format!(
                "payment {} already applied to invoice {}",
                application.payment_id, application.invoice_id
            )));
        }
        let row = PaymentApplication {
            id: self.work.next_id(),
            payment_id: application.payment_id,
            invoice_id: application.invoice_id,
            amount: application.amount.clone(),
            applied_at: Utc::now(),
        };
        self.work.applications.insert(row.id, row.clone());
        Ok(row)
    }

    async fn list_applications(&mut self, payment_id: i64) -> Result<Vec<PaymentApplication>, BillingError> {
        Ok(self
            .work
            .applications
            .values()
            .filter(|a| a.payment_id == payment_id)
            .cloned()
            .collect())
    }

    async fn commit(self) -> Result<(), BillingError> {
        self.trip(FailPoint::Commit)?;
        let MemoryTx { mut guard, work, .. } = self;
        *guard = work;
        Ok(())
    }
}
