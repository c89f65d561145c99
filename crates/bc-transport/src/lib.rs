//! Request pipeline for the Business Central OData API
//!
//! [`RequestPipeline`] authenticates, paces, caches, routes and retries
//! every outbound call. Request flow:
//! 1. GET with `use_cache` returns a live cached response without dispatching
//! 2. Middleware runs in order: company defaults, company routing, then
//!    caller-registered stages
//! 3. The base company rule settles the `company` query parameter
//! 4. The limiter admits the request (bounded in-flight, spaced starts)
//! 5. Up to four attempts are made inside the slot; the last failure is
//!    classified into [`Error`]
//!
//! Mutations invalidate cached reads for the same endpoint and company.

pub mod cache;
pub mod classify;
pub mod company;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod limiter;
pub mod metrics;
pub mod middleware;
pub mod odata;
pub mod pipeline;

pub use cache::ResponseCache;
pub use company::{CompanyCommand, CompanyRouting, RuntimeCompanyDefaults};
pub use config::{CompanyConfig, CompanyIdentifier, TransportConfig};
pub use descriptor::{
    COMPANY_COMMAND_HEADER, COMPANY_HEADER, COMPANY_IDENTIFIER_HEADER, QueryParams,
    RequestDescriptor, RequestMetadata, RequestOptions,
};
pub use error::{Error, Result};
pub use limiter::ConcurrencyLimiter;
pub use middleware::{FnMiddleware, Middleware, MiddlewarePipeline, from_fn};
pub use odata::{ODataFilter, filter};
pub use pipeline::{RequestPipeline, RequestPipelineBuilder};
