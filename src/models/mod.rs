pub mod closing;
pub mod expense;
pub mod invoice;
pub mod money;
pub mod payment;
pub mod period;
pub mod proration;
pub mod unit;

pub use closing::{ClosingOutcome, ClosingSummary};
pub use expense::{Expense, NewExpense};
pub use invoice::{
    Charge, ChargeKind, Charges, DetailKind, DetailSource, Invoice, InvoiceDetail,
    InvoiceDetailRow, InvoiceKey, InvoiceKind, InvoiceStatus, NewCharge, NewInvoice,
    NewInvoiceDetail, ReclosePolicy,
};
pub use payment::{
    NewPayment, NewPaymentApplication, Payment, PaymentApplication, PaymentKind, PaymentReceipt,
};
pub use period::Period;
pub use proration::{
    factor_drift, factor_sum, ChargeConcept, NewProrationRule, ProrationCriterion,
    ProrationFactor, ProrationRule, RuleKind,
};
pub use unit::Unit;
