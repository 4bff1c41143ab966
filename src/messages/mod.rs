//! Stream message formats
//!
//! Both topics carry UTF-8 JSON keyed by the request URL's hostname.

mod request;
mod result;

pub use request::{CrawlRequest, MalformedMessage};
pub use result::{CrawlResult, ErrorCode, ResultStatus, UNKNOWN_ERROR};
