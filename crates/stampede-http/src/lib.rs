//! Instrumented HTTP client for stampede scenarios.
//!
//! Requests record their samples into any [`MetricSink`](stampede_core::MetricSink),
//! so scenario code passes its iteration or setup context straight in.

pub mod client;
pub mod error;
pub mod extract;
pub mod retry;
pub mod seed;

pub use client::{HttpClient, HttpResponse, RequestSpec};
pub use error::{HttpError, HttpResult};
pub use extract::{parse_json_body, ExtractionChain};
pub use retry::RetryPolicy;
pub use seed::{SeedSource, LIST_LOCATIONS};

pub use reqwest::Method;
