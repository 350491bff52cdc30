//! Request validation
//!
//! Two gates run before any handler logic: a sanitization filter over the
//! scalar fields of the request (file content is exempt), then credential
//! checks against the catalog.

use crate::protocol::request::RequestType;

use super::catalog::{ApiKeyStatus, Catalog, Device};
use super::errors::{ServerError, ServerResult};

/// Substrings rejected by the sanitization filter.
const SANITIZE_LIST: [&str; 7] = ["'", "\"", ";", "\\", "--", "*", "%"];

/// True if a field value contains none of the banned substrings.
pub fn passes_sanitize(value: &str) -> bool {
    SANITIZE_LIST.iter().all(|banned| !value.contains(banned))
}

/// Reject a request whose scalar fields contain banned characters.
pub fn sanitize_fields(fields: &[(&str, &str)]) -> ServerResult<()> {
    for (_, value) in fields {
        if !passes_sanitize(value) {
            return Err(ServerError::UnsafeCharacters);
        }
    }
    Ok(())
}

/// Resolve an api key to its customer, rejecting unknown or inactive keys.
pub fn require_customer(catalog: &Catalog, api_key: &str) -> ServerResult<i64> {
    match catalog.api_key_status(api_key)? {
        ApiKeyStatus::Active { customer_id } => Ok(customer_id),
        ApiKeyStatus::Inactive => Err(ServerError::InactiveApiKey),
        ApiKeyStatus::Unknown => Err(ServerError::Unauthorized),
    }
}

/// Resolve api key + agent id to a device owned by that customer.
pub fn require_device(catalog: &Catalog, api_key: &str, agent_id: &str) -> ServerResult<Device> {
    let customer_id = require_customer(catalog, api_key)?;
    let device = catalog
        .device_by_agent_id(agent_id)?
        .ok_or(ServerError::Unauthorized)?;
    if device.customer_id != customer_id {
        return Err(ServerError::Unauthorized);
    }
    Ok(device)
}

/// Verify the request_type tag matches the endpoint that received it.
pub fn require_request_type(expected: RequestType, actual: RequestType) -> ServerResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(ServerError::BadRequest)
    }
}
