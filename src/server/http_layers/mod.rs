mod rate_limit;
mod requests_logging;

pub use rate_limit::enforce_rate_limit;
pub use requests_logging::{log_requests, RequestsLoggingLevel};
