#![allow(dead_code)]

use bigdecimal::BigDecimal;
use chrono::{DateTime, TimeZone, Utc};
use condo_billing::config::BillingConfig;
use condo_billing::db::{BillingStore, BillingTx, MemoryStore, UnitSeed};
use condo_billing::models::{
    Charges, Invoice, InvoiceKey, InvoiceKind, NewExpense, NewInvoice, NewPayment, NewProrationRule,
    PaymentKind, Period, ProrationCriterion, ProrationRule, RuleKind, Unit,
};
use condo_billing::{ClosingGenerator, PaymentAllocator, ProrationCalculator};
use std::str::FromStr;

pub fn dec(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

pub fn period(raw: &str) -> Period {
    Period::parse(raw).unwrap()
}

pub fn at(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, 9, 0, 0).unwrap()
}

pub struct Fixture {
    pub store: MemoryStore,
    pub config: BillingConfig,
    pub proration: ProrationCalculator<MemoryStore>,
    pub closing: ClosingGenerator<MemoryStore>,
    pub payments: PaymentAllocator<MemoryStore>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(BillingConfig::default())
    }

    pub fn with_config(config: BillingConfig) -> Self {
        let store = MemoryStore::new();
        Self {
            proration: ProrationCalculator::new(store.clone(), config.clone()),
            closing: ClosingGenerator::new(store.clone(), config.clone()),
            payments: PaymentAllocator::new(store.clone()),
            store,
            config,
        }
    }

    /// 按产权系数建单元
    pub async fn units(&self, condominium_id: i64, coefficients: &[&str]) -> Vec<Unit> {
        let mut units = Vec::new();
        for (idx, coefficient) in coefficients.iter().enumerate() {
            let seed = UnitSeed::new(condominium_id, &format!("D-{}", 101 + idx), dec(coefficient));
            units.push(self.store.seed_unit(seed).await);
        }
        units
    }

    pub async fn expense(&self, condominium_id: i64, raw_period: &str, net: &str) {
        self.closing
            .record_expense(&NewExpense {
                condominium_id,
                period: period(raw_period),
                category: Some("Mantención".into()),
                net: dec(net),
                tax: dec("0"),
                description: None,
            })
            .await
            .unwrap();
    }

    /// 直接插入一条有效期从 2023-01-01 起的普通规则
    pub async fn rule(&self, condominium_id: i64, criterion: ProrationCriterion) -> ProrationRule {
        let mut tx = self.store.begin().await.unwrap();
        let concept = tx
            .get_or_create_concept(
                &self.config.common_expense_concept_code,
                &self.config.common_expense_concept_name,
            )
            .await
            .unwrap();
        let rule = tx
            .insert_rule(&NewProrationRule {
                condominium_id,
                concept_id: concept.id,
                kind: RuleKind::Ordinary,
                criterion,
                valid_from: self.config.default_rule_valid_from,
                valid_to: None,
                description: None,
            })
            .await
            .unwrap()
            .unwrap();
        tx.commit().await.unwrap();
        rule
    }

    /// 直接插入一张待付月度账单
    pub async fn pending_invoice(
        &self,
        unit_id: i64,
        raw_period: &str,
        amount: &str,
        emitted_at: DateTime<Utc>,
    ) -> Invoice {
        let key = InvoiceKey {
            unit_id,
            period: period(raw_period),
            kind: InvoiceKind::Monthly,
        };
        let charges = Charges {
            prorated: dec(amount),
            interest: dec("0"),
            note: None,
        };
        self.store
            .seed_invoice(NewInvoice::issue(key, &charges, None, emitted_at))
            .await
    }
}

pub fn payment(unit_id: i64, amount: &str) -> NewPayment {
    NewPayment {
        unit_id,
        kind: PaymentKind::Normal,
        amount: dec(amount),
        method: "transferencia".into(),
        paid_at: at(15),
        period: None,
        external_ref: None,
        note: None,
    }
}

