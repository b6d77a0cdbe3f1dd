use crate::config::BillingConfig;
use crate::db::BillingStore;
use crate::error::BillingError;
use crate::models::{
    ClosingOutcome, ClosingSummary, Expense, NewExpense, NewPayment, PaymentKind, PaymentReceipt,
    Period, ProrationRule,
};
use crate::service::{
    retry_on_conflict, ClosingGenerator, PaymentAllocator, ProrationCalculator, RetryPolicy,
};
use axum::{
    extract::{Json, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};

/// 共享状态: 三个计费服务 + 重试策略
pub struct AppState<S: BillingStore> {
    pub proration: Arc<ProrationCalculator<S>>,
    pub closing: Arc<ClosingGenerator<S>>,
    pub payments: Arc<PaymentAllocator<S>>,
    pub retry: RetryPolicy,
}

impl<S: BillingStore> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            proration: self.proration.clone(),
            closing: self.closing.clone(),
            payments: self.payments.clone(),
            retry: self.retry,
        }
    }
}

impl<S: BillingStore + Clone> AppState<S> {
    pub fn new(store: S, config: &BillingConfig) -> Self {
        Self {
            proration: Arc::new(ProrationCalculator::new(store.clone(), config.clone())),
            closing: Arc::new(ClosingGenerator::new(store.clone(), config.clone())),
            payments: Arc::new(PaymentAllocator::new(store)),
            retry: RetryPolicy::from(config),
        }
    }
}

/// 统一响应体
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(message: String, data: T) -> Response {
        let body = ApiResponse {
            success: true,
            message,
            data: Some(data),
        };
        (StatusCode::OK, Json(body)).into_response()
    }
}

/// 错误 -> HTTP 状态码 (按根因)
pub fn status_for(err: &BillingError) -> StatusCode {
    match err.root() {
        BillingError::InvalidPeriod(_) | BillingError::InvalidAmount(_) => StatusCode::BAD_REQUEST,
        BillingError::NotFound { .. } => StatusCode::NOT_FOUND,
        BillingError::ConcurrentModification { .. } => StatusCode::CONFLICT,
        BillingError::NoUnits { .. } | BillingError::UnimplementedCriterion { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn failure(err: BillingError) -> Response {
    let status = status_for(&err);
    if status.is_server_error() {
        error!("[API] {}", err);
    } else {
        warn!("[API] {}", err);
    }
    let body = ApiResponse::<()> {
        success: false,
        message: format!("Error: {}", err),
        data: None,
    };
    (status, Json(body)).into_response()
}

/// 健康检查
pub async fn health_check() -> &'static str {
    "OK"
}

/// 请求体: 登记支出
#[derive(Debug, Deserialize)]
pub struct RecordExpenseRequest {
    pub period: String,
    #[serde(default)]
    pub category: Option<String>,
    pub net: BigDecimal,
    #[serde(default)]
    pub tax: Option<BigDecimal>,
    #[serde(default)]
    pub description: Option<String>,
}

/// 登记支出
pub async fn record_expense<S: BillingStore>(
    State(state): State<AppState<S>>,
    Path(condominium_id): Path<i64>,
    Json(req): Json<RecordExpenseRequest>,
) -> Response {
    let period = match Period::parse(&req.period) {
        Ok(period) => period,
        Err(e) => return failure(e),
    };
    let expense = NewExpense {
        condominium_id,
        period,
        category: req.category,
        net: req.net,
        tax: req.tax.unwrap_or_else(BigDecimal::zero),
        description: req.description,
    };

    match state.closing.record_expense(&expense).await {
        Ok(row) => ApiResponse::<Expense>::ok(format!("Recorded expense {}", row.id), row),
        Err(e) => failure(e),
    }
}

/// 请求体: 月结
#[derive(Debug, Deserialize)]
pub struct CloseMonthRequest {
    pub period: String,
}

/// 单个社区月结
pub async fn close_month<S: BillingStore>(
    State(state): State<AppState<S>>,
    Path(condominium_id): Path<i64>,
    Json(req): Json<CloseMonthRequest>,
) -> Response {
    let result = retry_on_conflict(&state.retry, || {
        state.closing.close_month_detailed(condominium_id, &req.period)
    })
    .await;

    match result {
        Ok(outcome) => {
            let message = format!(
                "Closed period {} for condominium {}: {} invoices",
                req.period, condominium_id, outcome.summary.invoices
            );
            ApiResponse::<ClosingOutcome>::ok(message, outcome)
        }
        Err(e) => failure(e),
    }
}

/// 请求体: 批量月结
#[derive(Debug, Deserialize)]
pub struct BatchClosingRequest {
    pub condominium_ids: Vec<i64>,
    pub period: String,
}

/// 批量月结中单个社区的结果
#[derive(Debug, Serialize, Deserialize)]
pub struct BatchClosingItem {
    pub condominium_id: i64,
    pub success: bool,
    pub message: String,
    pub summary: Option<ClosingSummary>,
}

/// 批量月结: 各社区互不依赖, 并发执行
pub async fn batch_close<S: BillingStore>(
    State(state): State<AppState<S>>,
    Json(req): Json<BatchClosingRequest>,
) -> Response {
    let closings = req.condominium_ids.iter().map(|&condominium_id| {
        let state = state.clone();
        let period = req.period.clone();
        async move {
            let result = retry_on_conflict(&state.retry, || {
                state.closing.close_month_detailed(condominium_id, &period)
            })
            .await;
            match result {
                Ok(outcome) => BatchClosingItem {
                    condominium_id,
                    success: true,
                    message: format!("{} invoices", outcome.summary.invoices),
                    summary: Some(outcome.summary),
                },
                Err(e) => {
                    warn!("[API] 批量月结 社区 {} 失败: {}", condominium_id, e);
                    BatchClosingItem {
                        condominium_id,
                        success: false,
                        message: format!("Error: {}", e),
                        summary: None,
                    }
                }
            }
        }
    });

    let results = join_all(closings).await;
    let failed = results.iter().filter(|r| !r.success).count();
    let body = ApiResponse {
        success: failed == 0,
        message: format!(
            "Closed {} of {} condominiums for period {}",
            results.len() - failed,
            results.len(),
            req.period
        ),
        data: Some(results),
    };
    (StatusCode::OK, Json(body)).into_response()
}

/// 导出账期账单 CSV
pub async fn export_closing<S: BillingStore>(
    State(state): State<AppState<S>>,
    Path((condominium_id, period)): Path<(i64, String)>,
) -> Response {
    let period = match Period::parse(&period) {
        Ok(period) => period,
        Err(e) => return failure(e),
    };

    match state.closing.export_period_csv(condominium_id, &period).await {
        Ok(csv) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
            csv,
        )
            .into_response(),
        Err(e) => failure(e),
    }
}

/// 获取或创建默认普通规则
pub async fn default_rule<S: BillingStore>(
    State(state): State<AppState<S>>,
    Path(condominium_id): Path<i64>,
) -> Response {
    let result = retry_on_conflict(&state.retry, || {
        state.proration.get_or_create_default_ordinary_rule(condominium_id)
    })
    .await;

    match result {
        Ok(rule) => ApiResponse::<ProrationRule>::ok(format!("Rule {}", rule.id), rule),
        Err(e) => failure(e),
    }
}

/// 重算规则系数
pub async fn compute_factors<S: BillingStore>(
    State(state): State<AppState<S>>,
    Path(rule_id): Path<i64>,
) -> Response {
    let result = retry_on_conflict(&state.retry, || {
        state.proration.compute_proration_factors(rule_id)
    })
    .await;

    match result {
        Ok(written) => ApiResponse::<usize>::ok(
            format!("Computed {} factors for rule {}", written, rule_id),
            written,
        ),
        Err(e) => failure(e),
    }
}

/// 请求体: 登记收款
#[derive(Debug, Deserialize)]
pub struct RegisterPaymentRequest {
    pub amount: BigDecimal,
    pub method: String,
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub kind: PaymentKind,
    #[serde(default)]
    pub period: Option<Period>,
    #[serde(default)]
    pub external_ref: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

/// 登记收款并 FIFO 冲抵
pub async fn register_payment<S: BillingStore>(
    State(state): State<AppState<S>>,
    Path(unit_id): Path<i64>,
    Json(req): Json<RegisterPaymentRequest>,
) -> Response {
    if req.amount <= BigDecimal::zero() {
        return failure(BillingError::InvalidAmount(format!(
            "payment amount {} must be positive",
            req.amount
        )));
    }

    let payment = NewPayment {
        unit_id,
        kind: req.kind,
        amount: req.amount,
        method: req.method,
        paid_at: req.paid_at.unwrap_or_else(Utc::now),
        period: req.period,
        external_ref: req.external_ref,
        note: req.note,
    };

    let result = retry_on_conflict(&state.retry, || {
        state.payments.register_payment_receipt(&payment)
    })
    .await;

    match result {
        Ok(receipt) => {
            let message = format!(
                "Payment {} applied {} to {} invoices, {} unapplied",
                receipt.payment.id,
                receipt.applied,
                receipt.applications.len(),
                receipt.unapplied
            );
            ApiResponse::<PaymentReceipt>::ok(message, receipt)
        }
        Err(e) => failure(e),
    }
}

/// 收款回执
pub async fn payment_receipt<S: BillingStore>(
    State(state): State<AppState<S>>,
    Path(payment_id): Path<i64>,
) -> Response {
    match state.payments.receipt(payment_id).await {
        Ok(receipt) => ApiResponse::<PaymentReceipt>::ok(format!("Payment {}", payment_id), receipt),
        Err(e) => failure(e),
    }
}
