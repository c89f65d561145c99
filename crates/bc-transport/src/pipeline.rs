//! The request pipeline
//!
//! Every call flows through the same stages: cache lookup (GET only),
//! middleware, the base company rule, admission by the limiter, then up to
//! `max_retries + 1` attempts inside the held slot. Only the final
//! classified error reaches the caller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bc_auth::{AuthStrategy, AuthenticatedClient, ClientSettings};
use futures_util::future::{join_all, try_join_all};
use reqwest::header::{HeaderValue, IF_MATCH};
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::cache::ResponseCache;
use crate::classify::{AttemptFailure, classify};
use crate::company::{self, CompanyRouting, RuntimeCompanyDefaults};
use crate::config::TransportConfig;
use crate::descriptor::{COMPANY_HEADER, QueryParams, RequestDescriptor, RequestOptions, query_value};
use crate::error::{Error, Result};
use crate::limiter::ConcurrencyLimiter;
use crate::metrics;
use crate::middleware::{Middleware, MiddlewarePipeline};
use crate::odata::{self, ODataFilter};

/// Builder for [`RequestPipeline`].
pub struct RequestPipelineBuilder {
    config: TransportConfig,
    strategy: AuthStrategy,
    middleware: Vec<Arc<dyn Middleware>>,
}

impl RequestPipelineBuilder {
    /// Register a stage after the built-in company stages.
    pub fn with_middleware(mut self, stage: impl Middleware + 'static) -> Self {
        self.middleware.push(Arc::new(stage));
        self
    }

    pub fn build(self) -> Result<RequestPipeline> {
        self.config.validate()?;
        let preference = self.config.company.preference()?;
        let default_company = self.config.company.default_company()?;

        let base_url = Url::parse(self.config.base_url.trim_end_matches('/')).map_err(|e| {
            Error::Configuration(format!("invalid base_url '{}': {e}", self.config.base_url))
        })?;

        let client = self.strategy.authenticate(&ClientSettings {
            timeout: self.config.timeout(),
            ..ClientSettings::default()
        })?;

        let mut middleware = MiddlewarePipeline::new()
            .with(RuntimeCompanyDefaults::new(preference))
            .with(CompanyRouting::new(self.config.company.clone()));
        for stage in self.middleware {
            middleware.push(stage);
        }

        info!(
            base_url = %base_url,
            auth = self.strategy.id(),
            company_preference = %preference,
            max_concurrent = self.config.max_concurrent,
            "request pipeline ready"
        );

        Ok(RequestPipeline {
            client,
            base_url,
            default_company,
            cache: ResponseCache::new(self.config.cache_ttl(), self.config.cache_capacity),
            limiter: ConcurrencyLimiter::new(self.config.max_concurrent, self.config.min_spacing()),
            middleware,
            max_retries: self.config.max_retries,
            retry_delay: self.config.retry_delay(),
            timeout: self.config.timeout(),
        })
    }
}

/// Resilient client for one tenant's OData API.
pub struct RequestPipeline {
    client: AuthenticatedClient,
    base_url: Url,
    default_company: Option<String>,
    cache: ResponseCache,
    limiter: ConcurrencyLimiter,
    middleware: MiddlewarePipeline,
    max_retries: u32,
    retry_delay: Duration,
    timeout: Duration,
}

impl RequestPipeline {
    pub fn builder(config: TransportConfig, strategy: AuthStrategy) -> RequestPipelineBuilder {
        RequestPipelineBuilder {
            config,
            strategy,
            middleware: Vec::new(),
        }
    }

    pub fn client(&self) -> &AuthenticatedClient {
        &self.client
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    pub fn default_company(&self) -> Option<&str> {
        self.default_company.as_deref()
    }

    /// Company a call with these options addresses.
    pub fn resolve_company<'a>(&'a self, options: &'a RequestOptions) -> Option<&'a str> {
        company::resolve_company(
            options.header_value(COMPANY_HEADER),
            options.company.as_deref(),
            self.default_company.as_deref(),
        )
    }

    /// GET, served from the cache when `options.use_cache` is set.
    pub async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: Option<QueryParams>,
        options: &RequestOptions,
    ) -> Result<T> {
        decode(self.get_value(endpoint, query, options).await?)
    }

    async fn get_value(
        &self,
        endpoint: &str,
        query: Option<QueryParams>,
        options: &RequestOptions,
    ) -> Result<Value> {
        let key = ResponseCache::key(endpoint, self.resolve_company(options), query.as_ref());
        if options.use_cache {
            if let Some(hit) = self.cache.get(&key).await {
                debug!(key = %key, "cache hit");
                metrics::record_cache("hit");
                return Ok(hit);
            }
            metrics::record_cache("miss");
        }

        let descriptor = options
            .describe(Method::GET, endpoint)?
            .with_query(query.unwrap_or_default());
        let value = self.dispatch(descriptor).await?;

        if options.use_cache {
            self.cache.insert(key, value.clone()).await;
        }
        Ok(value)
    }

    /// POST a new entity; invalidates cached reads of `endpoint`.
    pub async fn post<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        payload: Option<Value>,
        options: &RequestOptions,
    ) -> Result<T> {
        let mut descriptor = options.describe(Method::POST, endpoint)?;
        descriptor.body = payload;
        decode(self.mutate(endpoint, options, descriptor).await?)
    }

    /// PUT the entity addressed by `options.primary_key`.
    pub async fn put<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        payload: Value,
        options: &RequestOptions,
    ) -> Result<T> {
        decode(self.keyed(Method::PUT, endpoint, payload, options).await?)
    }

    /// PATCH the entity addressed by `options.primary_key`.
    pub async fn patch<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        payload: Value,
        options: &RequestOptions,
    ) -> Result<T> {
        decode(self.keyed(Method::PATCH, endpoint, payload, options).await?)
    }

    /// DELETE the entity addressed by `options.primary_key`. Key fields are
    /// read from `payload`; anything left is sent as the body.
    pub async fn delete<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        payload: Value,
        options: &RequestOptions,
    ) -> Result<T> {
        decode(self.keyed(Method::DELETE, endpoint, payload, options).await?)
    }

    /// POST to a bound action. Does not touch the cache.
    pub async fn invoke<T: DeserializeOwned>(
        &self,
        action: &str,
        payload: Option<Value>,
        options: &RequestOptions,
    ) -> Result<T> {
        let mut descriptor = options.describe(Method::POST, action)?;
        descriptor.body = payload;
        decode(self.dispatch(descriptor).await?)
    }

    /// Dispatch descriptors concurrently, results in input order.
    ///
    /// Independent batches drop failed entries; dependent batches fail with
    /// the first error.
    pub async fn batch(
        &self,
        requests: Vec<RequestDescriptor>,
        dependent: bool,
    ) -> Result<Vec<Value>> {
        let calls = requests.into_iter().map(|r| self.dispatch(r));
        if dependent {
            return try_join_all(calls).await;
        }
        let results = join_all(calls).await;
        Ok(results
            .into_iter()
            .enumerate()
            .filter_map(|(index, result)| match result {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(index, error = %e, "batch request failed, dropping result");
                    None
                }
            })
            .collect())
    }

    /// `$filter` expression from ordered pairs. See [`odata::filter`].
    pub fn filter<I, K>(&self, params: I) -> ODataFilter
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<str>,
    {
        odata::filter(params)
    }

    /// Forget cached reads of `endpoint` for the company `options` resolve to.
    pub fn clear_cache(&self, endpoint: &str, options: &RequestOptions) -> Result<()> {
        self.cache
            .invalidate_prefix(&ResponseCache::prefix(endpoint, self.resolve_company(options)))
    }

    pub fn clear_all_caches(&self) {
        self.cache.invalidate_all();
    }

    async fn keyed(
        &self,
        method: Method,
        endpoint: &str,
        mut payload: Value,
        options: &RequestOptions,
    ) -> Result<Value> {
        let fields = options.primary_key.as_deref().ok_or_else(|| {
            Error::Configuration(format!(
                "primary key property must be specified for {method} requests"
            ))
        })?;
        let segment = odata::primary_key_segment(&payload, fields)?;
        odata::strip_keys(&mut payload, fields);

        let mut descriptor = options.describe(method.clone(), odata::resource_url(endpoint, &segment))?;
        if !descriptor.headers.contains_key(IF_MATCH) {
            descriptor
                .headers
                .insert(IF_MATCH, HeaderValue::from_static("*"));
        }
        let has_fields = matches!(&payload, Value::Object(map) if !map.is_empty());
        if method != Method::DELETE || has_fields {
            descriptor.body = Some(payload);
        }
        self.mutate(endpoint, options, descriptor).await
    }

    /// Invalidate before sending and again once the call settles, so a read
    /// that raced the mutation cannot leave a stale entry behind.
    async fn mutate(
        &self,
        endpoint: &str,
        options: &RequestOptions,
        descriptor: RequestDescriptor,
    ) -> Result<Value> {
        self.clear_cache(endpoint, options)?;
        let result = self.dispatch(descriptor).await;
        self.clear_cache(endpoint, options)?;
        result
    }

    /// Send one descriptor through middleware, the company rule, the
    /// limiter and the retry loop.
    pub async fn dispatch(&self, descriptor: RequestDescriptor) -> Result<Value> {
        let request_id = Uuid::new_v4().to_string();
        self.send(descriptor, request_id).await
    }

    #[instrument(skip_all, fields(request_id = %request_id, method = %descriptor.method, url = %descriptor.url))]
    async fn send(&self, descriptor: RequestDescriptor, request_id: String) -> Result<Value> {
        let method = descriptor.method.to_string();
        let request = match self.prepare(descriptor) {
            Ok(request) => request,
            Err(e) => {
                metrics::record_error(e.error_type());
                return Err(e);
            }
        };

        let _permit = self.limiter.acquire().await?;
        let started = Instant::now();
        let mut attempt = 0u32;

        let failure = loop {
            attempt += 1;
            match self.attempt(&request).await {
                Ok(value) => {
                    metrics::record_request("success", &method, started.elapsed().as_secs_f64());
                    debug!(attempt, "request succeeded");
                    return Ok(value);
                }
                Err(failure) if attempt > self.max_retries => break failure,
                Err(failure) => {
                    warn!(attempt, failure = %failure.label(), "request failed, retrying");
                    metrics::record_retry(&method);
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        };

        let err = classify(failure, self.timeout);
        error!(attempts = attempt, error = %err, "request failed after all retries");
        metrics::record_request("error", &method, started.elapsed().as_secs_f64());
        metrics::record_error(err.error_type());
        Err(err)
    }

    /// Apply middleware and the company rule, then build the HTTP request.
    /// Failures here are never retried.
    fn prepare(&self, descriptor: RequestDescriptor) -> Result<reqwest::Request> {
        let mut descriptor = self.middleware.apply(descriptor)?;
        company::apply_company_query(&mut descriptor, self.default_company.as_deref());

        let mut url = self.resolve_url(&descriptor.url)?;
        if !descriptor.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in &descriptor.query {
                pairs.append_pair(name, &query_value(value));
            }
        }

        let mut builder = self
            .client
            .request(descriptor.method.clone(), url)
            .headers(descriptor.headers);
        if let Some(body) = &descriptor.body {
            builder = builder.json(body);
        }
        builder.build().map_err(|e| Error::Transport {
            message: format!("failed to build request: {e}"),
            status: None,
            data: None,
        })
    }

    fn resolve_url(&self, path: &str) -> Result<Url> {
        let joined = if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!(
                "{}/{}",
                self.base_url.as_str().trim_end_matches('/'),
                path.trim_start_matches('/')
            )
        };
        Url::parse(&joined)
            .map_err(|e| Error::Configuration(format!("invalid request url '{joined}': {e}")))
    }

    async fn attempt(&self, request: &reqwest::Request) -> std::result::Result<Value, AttemptFailure> {
        let request = request.try_clone().ok_or_else(|| {
            AttemptFailure::Connection("request body cannot be replayed".into())
        })?;
        debug!(url = %request.url(), "sending request");
        let response = self
            .client
            .execute(request)
            .await
            .map_err(|e| AttemptFailure::from_reqwest(&e))?;
        debug!(url = %response.url(), status = response.status().as_u16(), "response received");
        if !response.status().is_success() {
            return Err(AttemptFailure::from_response(response).await);
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| AttemptFailure::from_reqwest(&e))?;
        Ok(parse_success_body(&body))
    }
}

/// JSON when possible, text otherwise, `null` for an empty body (204).
fn parse_success_body(body: &[u8]) -> Value {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Value::Null;
    }
    serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::Decode(e.to_string()))
}
