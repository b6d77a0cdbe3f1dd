use bigdecimal::{BigDecimal, Zero};
use tracing::{debug, info};

use crate::db::{BillingStore, BillingTx};
use crate::error::BillingError;
use crate::models::{Invoice, NewPayment, NewPaymentApplication, Payment, PaymentReceipt};

/// 收款冲抵服务: 按账单出账顺序 FIFO 冲抵欠款
pub struct PaymentAllocator<S: BillingStore> {
    store: S,
}

impl<S: BillingStore> PaymentAllocator<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// 登记收款并冲抵, 返回收款记录
    pub async fn register_payment(&self, payment: &NewPayment) -> Result<Payment, BillingError> {
        Ok(self.register_payment_receipt(payment).await?.payment)
    }

    /// 登记收款并冲抵, 返回回执 (含冲抵明细与未冲抵余额)
    pub async fn register_payment_receipt(
        &self,
        payment: &NewPayment,
    ) -> Result<PaymentReceipt, BillingError> {
        self.register(payment)
            .await
            .map_err(|e| e.payment(payment.unit_id))
    }

    async fn register(&self, new_payment: &NewPayment) -> Result<PaymentReceipt, BillingError> {
        let unit_id = new_payment.unit_id;
        let mut tx = self.store.begin().await?;

        tx.find_unit(unit_id).await?.ok_or(BillingError::NotFound {
            entity: "unit",
            id: unit_id,
        })?;

        // 1. 收款原样落库
        let payment = tx.insert_payment(new_payment).await?;

        // 2. 锁定待付账单, 最早的在前
        let pending = tx.lock_pending_invoices(unit_id).await?;
        info!(
            "[Payment] 单元 {} 收款 {} 金额 {}, 待付账单 {} 张",
            unit_id,
            payment.id,
            payment.amount,
            pending.len()
        );

        // 3. FIFO 冲抵
        let mut remaining = payment.amount.clone();
        let mut applications = Vec::new();
        for mut invoice in pending {
            if remaining <= BigDecimal::zero() {
                break;
            }

            let applied = invoice.apply_payment(&remaining);
            remaining -= &applied;
            let updated: Invoice = tx.update_invoice(&invoice).await?;
            debug!(
                "[Payment] 账单 {} 冲抵 {}, 余额 {} ({:?})",
                updated.id, applied, updated.balance, updated.status
            );

            let application = tx
                .insert_application(&NewPaymentApplication {
                    payment_id: payment.id,
                    invoice_id: updated.id,
                    amount: applied,
                })
                .await?;
            applications.push(application);
        }

        // 4. 多付部分不转存, 仅体现在回执中
        if remaining > BigDecimal::zero() {
            info!(
                "[Payment] 收款 {} 尚有 {} 未冲抵 (无待付账单)",
                payment.id, remaining
            );
        }

        tx.commit().await?;
        Ok(PaymentReceipt::new(payment, applications))
    }

    /// 按收款 ID 读取回执
    pub async fn receipt(&self, payment_id: i64) -> Result<PaymentReceipt, BillingError> {
        let mut tx = self.store.begin().await?;
        let payment = tx.find_payment(payment_id).await?.ok_or(BillingError::NotFound {
            entity: "payment",
            id: payment_id,
        })?;
        let applications = tx.list_applications(payment_id).await?;
        tx.commit().await?;
        Ok(PaymentReceipt::new(payment, applications))
    }

    /// 单元全部账单, 按出账顺序
    pub async fn invoices_for_unit(&self, unit_id: i64) -> Result<Vec<Invoice>, BillingError> {
        let mut tx = self.store.begin().await?;
        let invoices = tx.list_invoices_for_unit(unit_id).await?;
        tx.commit().await?;
        Ok(invoices)
    }
}
