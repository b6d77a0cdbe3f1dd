pub mod closing;
pub mod late_fee;
pub mod payment;
pub mod proration;
pub mod retry;

pub use closing::ClosingGenerator;
pub use late_fee::{LateFeePolicy, NoLateFee};
pub use payment::PaymentAllocator;
pub use proration::ProrationCalculator;
pub use retry::{retry_on_conflict, RetryPolicy};
