pub mod request_log;
pub mod x402;

pub use request_log::{log_requests, REQUEST_ID_HEADER};
pub use x402::{extract_payment_headers, payment_instructions};
