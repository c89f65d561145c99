//! Company routing
//!
//! A Business Central request addresses one company, either with a
//! `company` query parameter or with a `companies(<id>)` path segment.
//! Two middleware stages decide which, and [`apply_company_query`] runs after
//! all middleware to settle the query parameter.
//!
//! Company resolution order, used everywhere: the per-call
//! `X-Custom-Request-Company` header, then [`RequestOptions::company`], then
//! the pipeline default.
//!
//! [`RequestOptions::company`]: crate::descriptor::RequestOptions

use std::str::FromStr;

use serde_json::Value;
use tracing::warn;

use crate::config::{CompanyConfig, CompanyIdentifier};
use crate::descriptor::{
    COMPANY_COMMAND_HEADER, COMPANY_HEADER, COMPANY_IDENTIFIER_HEADER, RequestDescriptor,
};
use crate::error::{Error, Result};
use crate::middleware::Middleware;

/// Query parameter carrying the company name.
pub const COMPANY_QUERY_PARAM: &str = "company";

/// What the base rule does with the `company` query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompanyCommand {
    /// Routing already set it; leave the query alone.
    Skip,
    /// The company lives in the path; drop any query parameter.
    Remove,
    /// Insert the resolved company if no parameter is present.
    Set,
}

impl CompanyCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompanyCommand::Skip => "skip",
            CompanyCommand::Remove => "remove",
            CompanyCommand::Set => "set",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "skip" => Some(CompanyCommand::Skip),
            "remove" => Some(CompanyCommand::Remove),
            "set" => Some(CompanyCommand::Set),
            _ => None,
        }
    }
}

/// First present value in resolution order.
pub fn resolve_company<'a>(
    header: Option<&'a str>,
    option: Option<&'a str>,
    default: Option<&'a str>,
) -> Option<&'a str> {
    header
        .filter(|v| !v.is_empty())
        .or(option.filter(|v| !v.is_empty()))
        .or(default)
}

/// Stamps the tenant's preferred identifier, and the per-call company from
/// options, onto requests that carry neither.
#[derive(Debug, Clone)]
pub struct RuntimeCompanyDefaults {
    preference: CompanyIdentifier,
}

impl RuntimeCompanyDefaults {
    pub fn new(preference: CompanyIdentifier) -> Self {
        Self { preference }
    }
}

impl Middleware for RuntimeCompanyDefaults {
    fn name(&self) -> &str {
        "runtime-company-defaults"
    }

    fn apply(&self, mut request: RequestDescriptor) -> Result<RequestDescriptor> {
        if !request.has_header(COMPANY_IDENTIFIER_HEADER) {
            request.set_header(COMPANY_IDENTIFIER_HEADER, self.preference.as_str())?;
        }
        if !request.has_header(COMPANY_HEADER)
            && let Some(company) = request.metadata.company.clone().filter(|c| !c.is_empty())
        {
            request.set_header(COMPANY_HEADER, &company)?;
        }
        Ok(request)
    }
}

/// Rewrites the request for the selected identifier and tells the base rule
/// what to do with the query parameter.
#[derive(Debug, Clone)]
pub struct CompanyRouting {
    defaults: CompanyConfig,
}

impl CompanyRouting {
    pub fn new(defaults: CompanyConfig) -> Self {
        Self { defaults }
    }
}

impl Middleware for CompanyRouting {
    fn name(&self) -> &str {
        "company-routing"
    }

    fn apply(&self, mut request: RequestDescriptor) -> Result<RequestDescriptor> {
        let explicit = request.header(COMPANY_HEADER).map(str::to_string);
        let Some(selector) = request.header(COMPANY_IDENTIFIER_HEADER).map(str::to_string) else {
            if explicit.is_some() {
                set_command(&mut request, CompanyCommand::Set)?;
            }
            return Ok(request);
        };

        let command = match CompanyIdentifier::from_str(&selector) {
            Ok(CompanyIdentifier::Name) => {
                let name = explicit
                    .or_else(|| self.defaults.default_for(CompanyIdentifier::Name))
                    .ok_or_else(|| {
                        Error::Configuration("company name is required for Company-Name".into())
                    })?;
                request
                    .query
                    .insert(COMPANY_QUERY_PARAM.into(), Value::String(name));
                CompanyCommand::Skip
            }
            Ok(CompanyIdentifier::Id) => {
                let id = explicit
                    .or_else(|| self.defaults.default_for(CompanyIdentifier::Id))
                    .ok_or_else(|| {
                        Error::Configuration("company id is required for Company-Id".into())
                    })?;
                request.url = insert_company_segment(&request.url, &id);
                CompanyCommand::Remove
            }
            Ok(CompanyIdentifier::UrlComplete) => CompanyCommand::Remove,
            Err(_) => {
                warn!(selector = %selector, "unknown company identifier, using query parameter");
                CompanyCommand::Set
            }
        };
        set_command(&mut request, command)?;
        Ok(request)
    }
}

fn set_command(request: &mut RequestDescriptor, command: CompanyCommand) -> Result<()> {
    request.set_header(COMPANY_COMMAND_HEADER, command.as_str())
}

/// Insert `companies(<id>)` before the last path component.
///
/// Paths that already address a company are returned unchanged, so routing a
/// descriptor twice yields the same URL.
pub fn insert_company_segment(url: &str, id: &str) -> String {
    if url
        .split('/')
        .any(|segment| segment.starts_with("companies("))
    {
        return url.to_string();
    }
    match url.rsplit_once('/') {
        Some((prefix, last)) => format!("{prefix}/companies({id})/{last}"),
        None => format!("/companies({id})/{url}"),
    }
}

/// Settle the `company` query parameter after all middleware ran, and strip
/// the routing command so it is never sent upstream.
pub fn apply_company_query(request: &mut RequestDescriptor, default: Option<&str>) {
    let command = request
        .remove_header(COMPANY_COMMAND_HEADER)
        .and_then(|c| CompanyCommand::parse(&c));

    match command {
        Some(CompanyCommand::Skip) => {}
        Some(CompanyCommand::Remove) => {
            request.query.remove(COMPANY_QUERY_PARAM);
        }
        Some(CompanyCommand::Set) | None => {
            if request.query.contains_key(COMPANY_QUERY_PARAM) {
                return;
            }
            let company = resolve_company(
                request.header(COMPANY_HEADER),
                request.metadata.company.as_deref(),
                default,
            )
            .map(str::to_string);
            if let Some(company) = company {
                request
                    .query
                    .insert(COMPANY_QUERY_PARAM.into(), Value::String(company));
            }
        }
    }
}
