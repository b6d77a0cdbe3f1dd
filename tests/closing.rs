mod common;

use bigdecimal::{BigDecimal, Zero};
use common::{dec, payment, period, Fixture};
use condo_billing::config::BillingConfig;
use condo_billing::db::{BillingStore, BillingTx, FailPoint};
use condo_billing::models::{
    DetailKind, DetailSource, InvoiceKey, InvoiceKind, InvoiceStatus, ProrationCriterion,
    ReclosePolicy,
};
use condo_billing::service::LateFeePolicy;
use condo_billing::{BillingError, ClosingGenerator};
use std::sync::Arc;

#[tokio::test]
async fn coefficient_closing_conserves_total() {
    let fx = Fixture::new();
    let units = fx.units(1, &["0.500000", "0.300000", "0.200000"]).await;
    fx.expense(1, "202401", "60000").await;
    fx.expense(1, "202401", "40000").await;

    let outcome = fx.closing.close_month_detailed(1, "202401").await.unwrap();

    let amounts: Vec<BigDecimal> = outcome.invoices.iter().map(|i| i.total_charges.clone()).collect();
    assert_eq!(amounts, vec![dec("50000"), dec("30000"), dec("20000")]);
    for (invoice, unit) in outcome.invoices.iter().zip(&units) {
        assert_eq!(invoice.unit_id, unit.id);
        assert_eq!(invoice.balance, invoice.total_charges);
        assert_eq!(invoice.status, InvoiceStatus::Pending);
        assert_eq!(invoice.kind, InvoiceKind::Monthly);
        assert_eq!(invoice.note.as_deref(), Some("Cierre mensual 202401"));
    }
    assert_eq!(outcome.summary.total_expenses, dec("100000"));
    assert_eq!(outcome.summary.total_prorated, dec("100000"));
    assert!(outcome.summary.rounding_difference.is_zero());
    assert_eq!(outcome.summary.invoices, 3);
}

#[tokio::test]
async fn closing_creates_default_rule_when_missing() {
    let fx = Fixture::new();
    fx.units(1, &["0.6", "0.4"]).await;
    fx.expense(1, "202402", "1000").await;

    let invoices = fx.closing.close_month(1, "202402").await.unwrap();
    let rule_id = invoices[0].rule_id.unwrap();

    let rule = fx.proration.get_or_create_default_ordinary_rule(1).await.unwrap();
    assert_eq!(rule.id, rule_id);
    assert_eq!(rule.criterion, ProrationCriterion::ByCoefficient);
    assert_eq!(rule.valid_from, fx.config.default_rule_valid_from);

    let factors = fx.proration.factors(rule_id).await.unwrap();
    assert_eq!(factors.len(), 2);
}

#[tokio::test]
async fn zero_expenses_still_emit_invoices() {
    let fx = Fixture::new();
    fx.units(1, &["0.5", "0.5"]).await;

    let invoices = fx.closing.close_month(1, "202403").await.unwrap();

    assert_eq!(invoices.len(), 2);
    assert!(invoices.iter().all(|i| i.total_charges.is_zero() && i.balance.is_zero()));
}

#[tokio::test]
async fn reclosing_updates_in_place() {
    let fx = Fixture::new();
    let units = fx.units(1, &["0.5", "0.3", "0.2"]).await;
    fx.expense(1, "202401", "100000").await;

    let first = fx.closing.close_month(1, "202401").await.unwrap();
    fx.expense(1, "202401", "50000").await;
    let second = fx.closing.close_month(1, "202401").await.unwrap();

    let first_ids: Vec<i64> = first.iter().map(|i| i.id).collect();
    let second_ids: Vec<i64> = second.iter().map(|i| i.id).collect();
    assert_eq!(first_ids, second_ids);
    let amounts: Vec<BigDecimal> = second.iter().map(|i| i.total_charges.clone()).collect();
    assert_eq!(amounts, vec![dec("75000"), dec("45000"), dec("30000")]);

    let mut tx = fx.store.begin().await.unwrap();
    let invoices = tx.list_invoices_for_period(1, &period("202401")).await.unwrap();
    assert_eq!(invoices.len(), 3);
    for (invoice, unit) in invoices.iter().zip(&units) {
        let charges = tx.list_charges(unit.id, &period("202401")).await.unwrap();
        assert_eq!(charges.len(), 1);
        assert_eq!(charges[0].amount, invoice.total_charges);

        let details = tx.list_invoice_details(invoice.id).await.unwrap();
        assert_eq!(details.len(), 1);
        assert_eq!(
            details[0].source,
            DetailSource::CommonCharge {
                charge_id: charges[0].id
            }
        );
        assert_eq!(details[0].amount, invoice.total_charges);
        assert_eq!(details[0].label.as_deref(), Some("Gasto común del periodo"));
    }
}

#[tokio::test]
async fn reclosing_overwrites_paid_history_by_default() {
    let fx = Fixture::new();
    let units = fx.units(1, &["0.5", "0.5"]).await;
    fx.expense(1, "202401", "100000").await;
    fx.closing.close_month(1, "202401").await.unwrap();

    let receipt = fx
        .payments
        .register_payment_receipt(&payment(units[0].id, "20000"))
        .await
        .unwrap();
    assert_eq!(receipt.applied, dec("20000"));

    let invoices = fx.closing.close_month(1, "202401").await.unwrap();
    let reclosed = &invoices[0];
    assert_eq!(reclosed.balance, dec("50000"));
    assert!(reclosed.total_paid.is_zero());
    assert_eq!(reclosed.status, InvoiceStatus::Pending);
    assert!(reclosed.is_balanced());

    // 冲抵记录保留
    let receipt = fx.payments.receipt(receipt.payment.id).await.unwrap();
    assert_eq!(receipt.applications.len(), 1);
}

#[tokio::test]
async fn reclosing_can_preserve_payments() {
    let config = BillingConfig {
        reclose_policy: ReclosePolicy::PreservePayments,
        ..BillingConfig::default()
    };
    let fx = Fixture::with_config(config);
    let units = fx.units(1, &["0.5", "0.5"]).await;
    fx.expense(1, "202401", "100000").await;
    fx.closing.close_month(1, "202401").await.unwrap();
    fx.payments
        .register_payment(&payment(units[0].id, "20000"))
        .await
        .unwrap();

    let invoices = fx.closing.close_month(1, "202401").await.unwrap();
    assert_eq!(invoices[0].balance, dec("30000"));
    assert_eq!(invoices[0].total_paid, dec("20000"));
    assert_eq!(invoices[0].total_charges, dec("50000"));
    assert!(invoices[0].is_balanced());
}

#[tokio::test]
async fn closing_without_units_fails() {
    let fx = Fixture::new();
    fx.expense(7, "202401", "1000").await;

    let err = fx.closing.close_month(7, "202401").await.unwrap_err();

    assert!(matches!(
        err,
        BillingError::ClosingFailed { condominium_id: 7, .. }
    ));
    assert!(matches!(err.root(), BillingError::NoUnits { condominium_id: 7 }));

    // 整个事务回滚, 默认规则也不会留下
    let mut tx = fx.store.begin().await.unwrap();
    let concept = tx.get_or_create_concept("GASTO_COMUN", "Gasto Común").await.unwrap();
    let rule = tx
        .find_rule_for_concept(7, concept.id, condo_billing::models::RuleKind::Ordinary)
        .await
        .unwrap();
    assert!(rule.is_none());
}

#[tokio::test]
async fn unimplemented_criterion_is_an_error() {
    let fx = Fixture::new();
    fx.units(1, &["0.5", "0.5"]).await;
    fx.rule(1, ProrationCriterion::ByArea).await;
    fx.expense(1, "202401", "1000").await;

    let err = fx.closing.close_month(1, "202401").await.unwrap_err();

    assert!(matches!(
        err.root(),
        BillingError::UnimplementedCriterion {
            criterion: ProrationCriterion::ByArea,
            ..
        }
    ));
    assert!(fx
        .closing
        .invoices_for_period(1, &period("202401"))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn invalid_period_is_rejected() {
    let fx = Fixture::new();
    fx.units(1, &["1"]).await;

    for raw in ["2024-01", "202413", "20240", "abcdef"] {
        let err = fx.closing.close_month(1, raw).await.unwrap_err();
        assert!(matches!(err.root(), BillingError::InvalidPeriod(_)), "{raw}");
    }
}

#[tokio::test]
async fn failed_closing_leaves_nothing_behind() {
    let fx = Fixture::new();
    let units = fx.units(1, &["0.5", "0.3", "0.2"]).await;
    fx.expense(1, "202401", "100000").await;

    fx.store.fail_next(FailPoint::DetailUpsert(3));
    let err = fx.closing.close_month(1, "202401").await.unwrap_err();
    assert!(matches!(err.root(), BillingError::Storage(_)));

    let mut tx = fx.store.begin().await.unwrap();
    assert!(tx
        .list_invoices_for_period(1, &period("202401"))
        .await
        .unwrap()
        .is_empty());
    for unit in &units {
        assert!(tx.list_charges(unit.id, &period("202401")).await.unwrap().is_empty());
    }
    drop(tx);

    // 故障是一次性的, 重跑成功
    let invoices = fx.closing.close_month(1, "202401").await.unwrap();
    assert_eq!(invoices.len(), 3);
}

struct FlatLateFee(BigDecimal);

impl LateFeePolicy for FlatLateFee {
    fn assess(&self, _key: &InvoiceKey, _prorated: &BigDecimal) -> Option<BigDecimal> {
        Some(self.0.clone())
    }
}

#[tokio::test]
async fn late_fee_policy_adds_interest_detail() {
    let fx = Fixture::new();
    fx.units(1, &["0.5", "0.5"]).await;
    fx.expense(1, "202401", "100000").await;
    let closing = ClosingGenerator::new(fx.store.clone(), fx.config.clone())
        .with_late_fee_policy(Arc::new(FlatLateFee(dec("500"))));

    let outcome = closing.close_month_detailed(1, "202401").await.unwrap();

    let invoice = &outcome.invoices[0];
    assert_eq!(invoice.total_interest, dec("500"));
    assert_eq!(invoice.total_charges, dec("50500"));
    assert_eq!(invoice.balance, dec("50500"));
    assert_eq!(outcome.summary.total_prorated, dec("100000"));

    let mut tx = fx.store.begin().await.unwrap();
    let details = tx.list_invoice_details(invoice.id).await.unwrap();
    let kinds: Vec<DetailKind> = details.iter().map(|d| d.source.kind()).collect();
    assert_eq!(kinds, vec![DetailKind::CommonCharge, DetailKind::LateInterest]);
    assert_eq!(details[1].amount, dec("500"));
}

#[tokio::test]
async fn reclosing_without_late_fee_drops_interest_detail() {
    let fx = Fixture::new();
    fx.units(1, &["0.5", "0.5"]).await;
    fx.expense(1, "202401", "100000").await;
    let with_fee = ClosingGenerator::new(fx.store.clone(), fx.config.clone())
        .with_late_fee_policy(Arc::new(FlatLateFee(dec("500"))));
    with_fee.close_month(1, "202401").await.unwrap();

    let invoices = fx.closing.close_month(1, "202401").await.unwrap();

    let mut tx = fx.store.begin().await.unwrap();
    for invoice in &invoices {
        assert!(invoice.total_interest.is_zero());
        assert_eq!(invoice.total_charges, dec("50000"));
        let details = tx.list_invoice_details(invoice.id).await.unwrap();
        assert_eq!(details.len(), 1);
        assert_eq!(details[0].source.kind(), DetailKind::CommonCharge);
        let sum = details
            .iter()
            .fold(BigDecimal::zero(), |acc, d| acc + &d.amount);
        assert_eq!(sum, invoice.total_charges);
    }
}

#[tokio::test]
async fn expense_total_is_derived() {
    let fx = Fixture::new();
    let expense = fx
        .closing
        .record_expense(&condo_billing::models::NewExpense {
            condominium_id: 1,
            period: period("202401"),
            category: Some("Aseo".into()),
            net: dec("84033.61"),
            tax: dec("15966.39"),
            description: Some("Servicio de aseo".into()),
        })
        .await
        .unwrap();
    assert_eq!(expense.total, dec("100000"));

    let err = fx
        .closing
        .record_expense(&condo_billing::models::NewExpense {
            condominium_id: 1,
            period: period("202401"),
            category: None,
            net: dec("-1"),
            tax: BigDecimal::zero(),
            description: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::InvalidAmount(_)));
}

#[tokio::test]
async fn export_lists_period_invoices() {
    let fx = Fixture::new();
    fx.units(1, &["0.5", "0.3", "0.2"]).await;
    fx.expense(1, "202401", "100000").await;
    fx.closing.close_month(1, "202401").await.unwrap();

    let csv = fx.closing.export_period_csv(1, &period("202401")).await.unwrap();
    let text = String::from_utf8(csv).unwrap();
    let lines: Vec<&str> = text.lines().collect();

    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with("invoice_id,unit_id,period,kind,status"));
    assert!(lines[1].contains(",202401,monthly,pending,"));
}
