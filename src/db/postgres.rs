use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use sqlx::{PgPool, Postgres, Transaction};

use super::queries;
use super::store::{BillingStore, BillingTx};
use crate::error::BillingError;
use crate::models::{
    Charge, ChargeConcept, DetailSource, Expense, Invoice, InvoiceDetail, InvoiceKey, NewCharge,
    NewExpense, NewInvoice, NewInvoiceDetail, NewPayment, NewPaymentApplication, NewProrationRule,
    Payment, PaymentApplication, Period, ProrationFactor, ProrationRule, RuleKind, Unit,
};

/// PostgreSQL 存储
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BillingStore for PgStore {
    type Tx = PgTx;

    async fn begin(&self) -> Result<PgTx, BillingError> {
        let tx = self.pool.begin().await?;
        Ok(PgTx { tx })
    }
}

/// PostgreSQL 事务; 丢弃即回滚
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl BillingTx for PgTx {
    async fn list_units(&mut self, condominium_id: i64) -> Result<Vec<Unit>, BillingError> {
        Ok(queries::list_units(&mut self.tx, condominium_id).await?)
    }

    async fn find_unit(&mut self, unit_id: i64) -> Result<Option<Unit>, BillingError> {
        Ok(queries::find_unit(&mut self.tx, unit_id).await?)
    }

    async fn insert_expense(&mut self, expense: &NewExpense) -> Result<Expense, BillingError> {
        Ok(queries::insert_expense(&mut self.tx, expense).await?)
    }

    async fn sum_expenses(
        &mut self,
        condominium_id: i64,
        period: &Period,
    ) -> Result<BigDecimal, BillingError> {
        Ok(queries::sum_expenses(&mut self.tx, condominium_id, period).await?)
    }

    async fn get_or_create_concept(
        &mut self,
        code: &str,
        name: &str,
    ) -> Result<ChargeConcept, BillingError> {
        Ok(queries::get_or_create_concept(&mut self.tx, code, name).await?)
    }

    async fn find_rule(&mut self, rule_id: i64) -> Result<Option<ProrationRule>, BillingError> {
        Ok(queries::find_rule(&mut self.tx, rule_id).await?)
    }

    async fn find_active_rule(
        &mut self,
        condominium_id: i64,
        kind: RuleKind,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Option<ProrationRule>, BillingError> {
        Ok(queries::find_active_rule(&mut self.tx, condominium_id, kind, from, to).await?)
    }

    async fn find_rule_for_concept(
        &mut self,
        condominium_id: i64,
        concept_id: i64,
        kind: RuleKind,
    ) -> Result<Option<ProrationRule>, BillingError> {
        Ok(queries::find_rule_for_concept(&mut self.tx, condominium_id, concept_id, kind).await?)
    }

    async fn insert_rule(
        &mut self,
        rule: &NewProrationRule,
    ) -> Result<Option<ProrationRule>, BillingError> {
        Ok(queries::insert_rule(&mut self.tx, rule).await?)
    }

    async fn lock_rule(&mut self, rule_id: i64) -> Result<(), BillingError> {
        if queries::lock_rule(&mut self.tx, rule_id).await? {
            Ok(())
        } else {
            Err(BillingError::NotFound {
                entity: "proration rule",
                id: rule_id,
            })
        }
    }

    async fn delete_factors(&mut self, rule_id: i64) -> Result<u64, BillingError> {
        Ok(queries::delete_factors(&mut self.tx, rule_id).await?)
    }

    async fn insert_factors(&mut self, factors: &[ProrationFactor]) -> Result<(), BillingError> {
        Ok(queries::insert_factors(&mut self.tx, factors).await?)
    }

    async fn list_factors(&mut self, rule_id: i64) -> Result<Vec<ProrationFactor>, BillingError> {
        Ok(queries::list_factors(&mut self.tx, rule_id).await?)
    }

    async fn lock_invoice(&mut self, key: &InvoiceKey) -> Result<Option<Invoice>, BillingError> {
        Ok(queries::lock_invoice(&mut self.tx, key).await?)
    }

    async fn insert_invoice(&mut self, invoice: &NewInvoice) -> Result<Option<Invoice>, BillingError> {
        Ok(queries::insert_invoice(&mut self.tx, invoice).await?)
    }

    async fn update_invoice(&mut self, invoice: &Invoice) -> Result<Invoice, BillingError> {
        queries::update_invoice(&mut self.tx, invoice)
            .await?
            .ok_or_else(|| BillingError::ConcurrentModification {
                entity: "invoice",
                key: format!("{} (version {})", invoice.id, invoice.version),
            })
    }

    async fn lock_pending_invoices(&mut self, unit_id: i64) -> Result<Vec<Invoice>, BillingError> {
        Ok(queries::lock_pending_invoices(&mut self.tx, unit_id).await?)
    }

    async fn list_invoices_for_unit(&mut self, unit_id: i64) -> Result<Vec<Invoice>, BillingError> {
        Ok(queries::list_invoices_for_unit(&mut self.tx, unit_id).await?)
    }

    async fn list_invoices_for_period(
        &mut self,
        condominium_id: i64,
        period: &Period,
    ) -> Result<Vec<Invoice>, BillingError> {
        Ok(queries::list_invoices_for_period(&mut self.tx, condominium_id, period).await?)
    }

    async fn upsert_charge(&mut self, charge: &NewCharge) -> Result<Charge, BillingError> {
        Ok(queries::upsert_charge(&mut self.tx, charge).await?)
    }

    async fn list_charges(&mut self, unit_id: i64, period: &Period) -> Result<Vec<Charge>, BillingError> {
        Ok(queries::list_charges(&mut self.tx, unit_id, period).await?)
    }

    async fn upsert_invoice_detail(
        &mut self,
        detail: &NewInvoiceDetail,
    ) -> Result<InvoiceDetail, BillingError> {
        queries::upsert_invoice_detail(&mut self.tx, detail)
            .await?
            .try_into()
    }

    async fn delete_invoice_detail(
        &mut self,
        invoice_id: i64,
        source: DetailSource,
    ) -> Result<u64, BillingError> {
        Ok(queries::delete_invoice_detail(&mut self.tx, invoice_id, source).await?)
    }

    async fn list_invoice_details(&mut self, invoice_id: i64) -> Result<Vec<InvoiceDetail>, BillingError> {
        queries::list_invoice_details(&mut self.tx, invoice_id)
            .await?
            .into_iter()
            .map(InvoiceDetail::try_from)
            .collect()
    }

    async fn insert_payment(&mut self, payment: &NewPayment) -> Result<Payment, BillingError> {
        Ok(queries::insert_payment(&mut self.tx, payment).await?)
    }

    async fn find_payment(&mut self, payment_id: i64) -> Result<Option<Payment>, BillingError> {
        Ok(queries::find_payment(&mut self.tx, payment_id).await?)
    }

    async fn insert_application(
        &mut self,
        application: &NewPaymentApplication,
    ) -> Result<PaymentApplication, BillingError> {
        Ok(queries::insert_application(&mut self.tx, application).await?)
    }

    async fn list_applications(&mut self, payment_id: i64) -> Result<Vec<PaymentApplication>, BillingError> {
        Ok(queries::list_applications(&mut self.tx, payment_id).await?)
    }

    async fn commit(self) -> Result<(), BillingError> {
        Ok(self.tx.commit().await?)
    }
}
