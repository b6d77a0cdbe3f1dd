use crate::models::{
    Charge, ChargeConcept, DetailSource, Expense, Invoice, InvoiceDetailRow, InvoiceKey, NewCharge,
    NewExpense, NewInvoice, NewInvoiceDetail, NewPayment, NewPaymentApplication, NewProrationRule,
    Payment, PaymentApplication, Period, ProrationFactor, ProrationRule, RuleKind, Unit,
};
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use sqlx::PgConnection;
use std::io::Write;

/// 查询社区下所有单元 (经由分组关联)
pub async fn list_units(
    conn: &mut PgConnection,
    condominium_id: i64,
) -> Result<Vec<Unit>, sqlx::Error> {
    sqlx::query_as::<_, Unit>(
        r#"
        SELECT u.id, u.group_id, g.condominium_id, u.code, u.unit_type,
               u.area_m2, u.proportional_coefficient
        FROM unit u
        INNER JOIN unit_group g ON g.id = u.group_id
        WHERE g.condominium_id = $1
        ORDER BY u.id
        "#,
    )
    .bind(condominium_id)
    .fetch_all(conn)
    .await
}

pub async fn find_unit(conn: &mut PgConnection, unit_id: i64) -> Result<Option<Unit>, sqlx::Error> {
    sqlx::query_as::<_, Unit>(
        r#"
        SELECT u.id, u.group_id, g.condominium_id, u.code, u.unit_type,
               u.area_m2, u.proportional_coefficient
        FROM unit u
        INNER JOIN unit_group g ON g.id = u.group_id
        WHERE u.id = $1
        "#,
    )
    .bind(unit_id)
    .fetch_optional(conn)
    .await
}

/// 新增支出, total 在此处由 net + tax 计算
pub async fn insert_expense(
    conn: &mut PgConnection,
    expense: &NewExpense,
) -> Result<Expense, sqlx::Error> {
    sqlx::query_as::<_, Expense>(
        r#"
        INSERT INTO expense (condominium_id, period, category, net, tax, total, description)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING id, condominium_id, period, category, net, tax, total, description, created_at
        "#,
    )
    .bind(expense.condominium_id)
    .bind(&expense.period)
    .bind(&expense.category)
    .bind(&expense.net)
    .bind(&expense.tax)
    .bind(expense.total())
    .bind(&expense.description)
    .fetch_one(conn)
    .await
}

/// 账期支出合计, 无支出时为 0
pub async fn sum_expenses(
    conn: &mut PgConnection,
    condominium_id: i64,
    period: &Period,
) -> Result<BigDecimal, sqlx::Error> {
    sqlx::query_scalar::<_, BigDecimal>(
        r#"
        SELECT coalesce(sum(total), 0)
        FROM expense
        WHERE condominium_id = $1
          AND period = $2
        "#,
    )
    .bind(condominium_id)
    .bind(period)
    .fetch_one(conn)
    .await
}

pub async fn get_or_create_concept(
    conn: &mut PgConnection,
    code: &str,
    name: &str,
) -> Result<ChargeConcept, sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO charge_concept (code, name)
        VALUES ($1, $2)
        ON CONFLICT (code) DO NOTHING
        "#,
    )
    .bind(code)
    .bind(name)
    .execute(&mut *conn)
    .await?;

    sqlx::query_as::<_, ChargeConcept>(
        r#"
        SELECT id, code, name
        FROM charge_concept
        WHERE code = $1
        "#,
    )
    .bind(code)
    .fetch_one(conn)
    .await
}

pub async fn find_rule(
    conn: &mut PgConnection,
    rule_id: i64,
) -> Result<Option<ProrationRule>, sqlx::Error> {
    sqlx::query_as::<_, ProrationRule>(
        r#"
        SELECT id, condominium_id, concept_id, kind, criterion, valid_from, valid_to, description
        FROM proration_rule
        WHERE id = $1
        "#,
    )
    .bind(rule_id)
    .fetch_optional(conn)
    .await
}

/// 查询在 [from, to] 内有效的规则 (valid_from 降序, id 升序)
pub async fn find_active_rule(
    conn: &mut PgConnection,
    condominium_id: i64,
    kind: RuleKind,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Option<ProrationRule>, sqlx::Error> {
    sqlx::query_as::<_, ProrationRule>(
        r#"
        SELECT id, condominium_id, concept_id, kind, criterion, valid_from, valid_to, description
        FROM proration_rule
        WHERE condominium_id = $1
          AND kind = $2
          AND valid_from <= $4
          AND (valid_to IS NULL OR valid_to >= $3)
        ORDER BY valid_from DESC, id ASC
        LIMIT 1
        "#,
    )
    .bind(condominium_id)
    .bind(kind)
    .bind(from)
    .bind(to)
    .fetch_optional(conn)
    .await
}

pub async fn find_rule_for_concept(
    conn: &mut PgConnection,
    condominium_id: i64,
    concept_id: i64,
    kind: RuleKind,
) -> Result<Option<ProrationRule>, sqlx::Error> {
    sqlx::query_as::<_, ProrationRule>(
        r#"
        SELECT id, condominium_id, concept_id, kind, criterion, valid_from, valid_to, description
        FROM proration_rule
        WHERE condominium_id = $1
          AND concept_id = $2
          AND kind = $3
        ORDER BY valid_from ASC, id ASC
        LIMIT 1
        "#,
    )
    .bind(condominium_id)
    .bind(concept_id)
    .bind(kind)
    .fetch_optional(conn)
    .await
}

/// 新增规则, 唯一键冲突时返回 None
pub async fn insert_rule(
    conn: &mut PgConnection,
    rule: &NewProrationRule,
) -> Result<Option<ProrationRule>, sqlx::Error> {
    sqlx::query_as::<_, ProrationRule>(
        r#"
        INSERT INTO proration_rule
            (condominium_id, concept_id, kind, criterion, valid_from, valid_to, description)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (condominium_id, concept_id, valid_from, kind) DO NOTHING
        RETURNING id, condominium_id, concept_id, kind, criterion, valid_from, valid_to, description
        "#,
    )
    .bind(rule.condominium_id)
    .bind(rule.concept_id)
    .bind(rule.kind)
    .bind(rule.criterion)
    .bind(rule.valid_from)
    .bind(rule.valid_to)
    .bind(&rule.description)
    .fetch_optional(conn)
    .await
}

/// 锁定规则行, 返回规则是否存在
pub async fn lock_rule(conn: &mut PgConnection, rule_id: i64) -> Result<bool, sqlx::Error> {
    let locked = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT id
        FROM proration_rule
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(rule_id)
    .fetch_optional(conn)
    .await?;
    Ok(locked.is_some())
}

pub async fn delete_factors(conn: &mut PgConnection, rule_id: i64) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM proration_factor WHERE rule_id = $1")
        .bind(rule_id)
        .execute(conn)
        .await?;
    Ok(result.rows_affected())
}

/// 批量插入分摊系数 (每1000条分块)
pub async fn insert_factors(
    conn: &mut PgConnection,
    factors: &[ProrationFactor],
) -> Result<(), sqlx::Error> {
    for chunk in factors.chunks(1000) {
        let mut query_builder =
            sqlx::QueryBuilder::new("INSERT INTO proration_factor (rule_id, unit_id, factor) ");
        query_builder.push_values(chunk, |mut b, factor| {
            b.push_bind(factor.rule_id)
                .push_bind(factor.unit_id)
                .push_bind(factor.factor.clone());
        });
        let result = query_builder.build().execute(&mut *conn).await?;
        tracing::debug!("插入分摊系数 {} 行", result.rows_affected());
    }
    Ok(())
}

pub async fn list_factors(
    conn: &mut PgConnection,
    rule_id: i64,
) -> Result<Vec<ProrationFactor>, sqlx::Error> {
    sqlx::query_as::<_, ProrationFactor>(
        r#"
        SELECT rule_id, unit_id, factor
        FROM proration_factor
        WHERE rule_id = $1
        ORDER BY unit_id
        "#,
    )
    .bind(rule_id)
    .fetch_all(conn)
    .await
}

/// 按自然键读取账单并加行锁
pub async fn lock_invoice(
    conn: &mut PgConnection,
    key: &InvoiceKey,
) -> Result<Option<Invoice>, sqlx::Error> {
    sqlx::query_as::<_, Invoice>(
        r#"
        SELECT id, unit_id, period, kind, status, emitted_at, rule_id,
               total_charges, total_discounts, total_interest, total_paid, balance,
               note, version
        FROM invoice
        WHERE unit_id = $1
          AND period = $2
          AND kind = $3
        FOR UPDATE
        "#,
    )
    .bind(key.unit_id)
    .bind(&key.period)
    .bind(key.kind)
    .fetch_optional(conn)
    .await
}

/// 新增账单, 自然键冲突 (并发插入) 时返回 None
pub async fn insert_invoice(
    conn: &mut PgConnection,
    invoice: &NewInvoice,
) -> Result<Option<Invoice>, sqlx::Error> {
    sqlx::query_as::<_, Invoice>(
        r#"
        INSERT INTO invoice
            (unit_id, period, kind, status, emitted_at, rule_id,
             total_charges, total_interest, total_paid, balance, note)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 0, $9, $10)
        ON CONFLICT (unit_id, period, kind) DO NOTHING
        RETURNING id, unit_id, period, kind, status, emitted_at, rule_id,
                  total_charges, total_discounts, total_interest, total_paid, balance,
                  note, version
        "#,
    )
    .bind(invoice.unit_id)
    .bind(&invoice.period)
    .bind(invoice.kind)
    .bind(invoice.status)
    .bind(invoice.emitted_at)
    .bind(invoice.rule_id)
    .bind(&invoice.total_charges)
    .bind(&invoice.total_interest)
    .bind(&invoice.balance)
    .bind(&invoice.note)
    .fetch_optional(conn)
    .await
}

/// 按版本号比较后更新账单头; 版本不一致返回 None
pub async fn update_invoice(
    conn: &mut PgConnection,
    invoice: &Invoice,
) -> Result<Option<Invoice>, sqlx::Error> {
    sqlx::query_as::<_, Invoice>(
        r#"
        UPDATE invoice
        SET status = $3,
            rule_id = $4,
            total_charges = $5,
            total_discounts = $6,
            total_interest = $7,
            total_paid = $8,
            balance = $9,
            note = $10,
            version = version + 1
        WHERE id = $1
          AND version = $2
        RETURNING id, unit_id, period, kind, status, emitted_at, rule_id,
                  total_charges, total_discounts, total_interest, total_paid, balance,
                  note, version
        "#,
    )
    .bind(invoice.id)
    .bind(invoice.version)
    .bind(invoice.status)
    .bind(invoice.rule_id)
    .bind(&invoice.total_charges)
    .bind(&invoice.total_discounts)
    .bind(&invoice.total_interest)
    .bind(&invoice.total_paid)
    .bind(&invoice.balance)
    .bind(&invoice.note)
    .fetch_optional(conn)
    .await
}

/// 查询待收账单 (最早发出的优先) 并加行锁
pub async fn lock_pending_invoices(
    conn: &mut PgConnection,
    unit_id: i64,
) -> Result<Vec<Invoice>, sqlx::Error> {
    sqlx::query_as::<_, Invoice>(
        r#"
        SELECT id, unit_id, period, kind, status, emitted_at, rule_id,
               total_charges, total_discounts, total_interest, total_paid, balance,
               note, version
        FROM invoice
        WHERE unit_id = $1
          AND balance > 0
        ORDER BY emitted_at ASC, id ASC
        FOR UPDATE
        "#,
    )
    .bind(unit_id)
    .fetch_all(conn)
    .await
}

pub async fn list_invoices_for_unit(
    conn: &mut PgConnection,
    unit_id: i64,
) -> Result<Vec<Invoice>, sqlx::Error> {
    sqlx::query_as::<_, Invoice>(
        r#"
        SELECT id, unit_id, period, kind, status, emitted_at, rule_id,
               total_charges, total_discounts, total_interest, total_paid, balance,
               note, version
        FROM invoice
        WHERE unit_id = $1
        ORDER BY emitted_at ASC, id ASC
        "#,
    )
    .bind(unit_id)
    .fetch_all(conn)
    .await
}

pub async fn list_invoices_for_period(
    conn: &mut PgConnection,
    condominium_id: i64,
    period: &Period,
) -> Result<Vec<Invoice>, sqlx::Error> {
    sqlx::query_as::<_, Invoice>(
        r#"
        SELECT i.id, i.unit_id, i.period, i.kind, i.status, i.emitted_at, i.rule_id,
               i.total_charges, i.total_discounts, i.total_interest, i.total_paid, i.balance,
               i.note, i.version
        FROM invoice i
        INNER JOIN unit u ON u.id = i.unit_id
        INNER JOIN unit_group g ON g.id = u.group_id
        WHERE g.condominium_id = $1
          AND i.period = $2
        ORDER BY i.unit_id, i.id
        "#,
    )
    .bind(condominium_id)
    .bind(period)
    .fetch_all(conn)
    .await
}

/// 按 (unit, period, concept) 新增或更新单元费用
pub async fn upsert_charge(
    conn: &mut PgConnection,
    charge: &NewCharge,
) -> Result<Charge, sqlx::Error> {
    sqlx::query_as::<_, Charge>(
        r#"
        INSERT INTO unit_charge (unit_id, period, concept_id, kind, amount, detail)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (unit_id, period, concept_id)
        DO UPDATE SET kind = EXCLUDED.kind,
                      amount = EXCLUDED.amount,
                      detail = EXCLUDED.detail
        RETURNING id, unit_id, period, concept_id, kind, amount, detail, created_at
        "#,
    )
    .bind(charge.unit_id)
    .bind(&charge.period)
    .bind(charge.concept_id)
    .bind(charge.kind)
    .bind(&charge.amount)
    .bind(&charge.detail)
    .fetch_one(conn)
    .await
}

pub async fn list_charges(
    conn: &mut PgConnection,
    unit_id: i64,
    period: &Period,
) -> Result<Vec<Charge>, sqlx::Error> {
    sqlx::query_as::<_, Charge>(
        r#"
        SELECT id, unit_id, period, concept_id, kind, amount, detail, created_at
        FROM unit_charge
        WHERE unit_id = $1
          AND period = $2
        ORDER BY id
        "#,
    )
    .bind(unit_id)
    .bind(period)
    .fetch_all(conn)
    .await
}

/// 按 (invoice, kind, charge_ref) 新增或更新账单明细
pub async fn upsert_invoice_detail(
    conn: &mut PgConnection,
    detail: &NewInvoiceDetail,
) -> Result<InvoiceDetailRow, sqlx::Error> {
    sqlx::query_as::<_, InvoiceDetailRow>(
        r#"
        INSERT INTO invoice_detail (invoice_id, kind, charge_ref, amount, label)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (invoice_id, kind, charge_ref)
        DO UPDATE SET amount = EXCLUDED.amount,
                      label = EXCLUDED.label
        RETURNING id, invoice_id, kind, charge_ref, amount, label
        "#,
    )
    .bind(detail.invoice_id)
    .bind(detail.source.kind())
    .bind(detail.source.charge_ref())
    .bind(&detail.amount)
    .bind(&detail.label)
    .fetch_one(conn)
    .await
}

pub async fn delete_invoice_detail(
    conn: &mut PgConnection,
    invoice_id: i64,
    source: DetailSource,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        DELETE FROM invoice_detail
        WHERE invoice_id = $1 AND kind = $2 AND charge_ref IS NOT DISTINCT FROM $3
        "#,
    )
    .bind(invoice_id)
    .bind(source.kind())
    .bind(source.charge_ref())
    .execute(conn)
    .await?;

    Ok(result.rows_affected())
}

pub async fn list_invoice_details(
    conn: &mut PgConnection,
    invoice_id: i64,
) -> Result<Vec<InvoiceDetailRow>, sqlx::Error> {
    sqlx::query_as::<_, InvoiceDetailRow>(
        r#"
        SELECT id, invoice_id, kind, charge_ref, amount, label
        FROM invoice_detail
        WHERE invoice_id = $1
        ORDER BY id
        "#,
    )
    .bind(invoice_id)
    .fetch_all(conn)
    .await
}

pub async fn insert_payment(
    conn: &mut PgConnection,
    payment: &NewPayment,
) -> Result<Payment, sqlx::Error> {
    sqlx::query_as::<_, Payment>(
        r#"
        INSERT INTO payment (unit_id, kind, amount, method, paid_at, period, external_ref, note)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING id, unit_id, kind, amount, method, paid_at, period, external_ref, note, created_at
        "#,
    )
    .bind(payment.unit_id)
    .bind(payment.kind)
    .bind(&payment.amount)
    .bind(&payment.method)
    .bind(payment.paid_at)
    .bind(&payment.period)
    .bind(&payment.external_ref)
    .bind(&payment.note)
    .fetch_one(conn)
    .await
}

pub async fn find_payment(
    conn: &mut PgConnection,
    payment_id: i64,
) -> Result<Option<Payment>, sqlx::Error> {
    sqlx::query_as::<_, Payment>(
        r#"
        SELECT id, unit_id, kind, amount, method, paid_at, period, external_ref, note, created_at
        FROM payment
        WHERE id = $1
        "#,
    )
    .bind(payment_id)
    .fetch_optional(conn)
    .await
}

pub async fn insert_application(
    conn: &mut PgConnection,
    application: &NewPaymentApplication,
) -> Result<PaymentApplication, sqlx::Error> {
    sqlx::query_as::<_, PaymentApplication>(
        r#"
        INSERT INTO payment_application (payment_id, invoice_id, amount)
        VALUES ($1, $2, $3)
        RETURNING id, payment_id, invoice_id, amount, applied_at
        "#,
    )
    .bind(application.payment_id)
    .bind(application.invoice_id)
    .bind(&application.amount)
    .fetch_one(conn)
    .await
}

pub async fn list_applications(
    conn: &mut PgConnection,
    payment_id: i64,
) -> Result<Vec<PaymentApplication>, sqlx::Error> {
    sqlx::query_as::<_, PaymentApplication>(
        r#"
        SELECT id, payment_id, invoice_id, amount, applied_at
        FROM payment_application
        WHERE payment_id = $1
        ORDER BY id
        "#,
    )
    .bind(payment_id)
    .fetch_all(conn)
    .await
}

/// 导出账单到 CSV
pub fn export_invoices_csv<W: Write>(
    invoices: &[Invoice],
    output: W,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut writer = csv::Writer::from_writer(output);

    writer.write_record([
        "invoice_id",
        "unit_id",
        "period",
        "kind",
        "status",
        "total_charges",
        "total_paid",
        "balance",
        "emitted_at",
    ])?;

    for invoice in invoices {
        writer.write_record(&[
            invoice.id.to_string(),
            invoice.unit_id.to_string(),
            invoice.period.to_string(),
            format!("{:?}", invoice.kind).to_lowercase(),
            format!("{:?}", invoice.status).to_lowercase(),
            invoice.total_charges.to_string(),
            invoice.total_paid.to_string(),
            invoice.balance.to_string(),
            invoice.emitted_at.to_rfc3339(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}
