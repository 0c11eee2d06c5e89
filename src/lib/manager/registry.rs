use async_trait::async_trait;
use log::debug;
use reqwest::StatusCode;
use std::time::Duration;

use super::types::{ProbeError, RegistryProbe};
use crate::lib::status::types::LinkStatus;
use crate::lib::store::types::Registry;

/// Probes the registry's `/v2/` endpoint with basic auth.
pub struct HttpRegistryProbe {
    client: reqwest::Client,
}

impl HttpRegistryProbe {
    pub fn new(timeout: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(HttpRegistryProbe { client })
    }
}

pub fn registry_endpoint(url: &str) -> Result<String, ProbeError> {
    let url = url.trim().trim_end_matches('/');
    if url.is_empty() {
        return Err(ProbeError::InvalidUrl(url.to_string()));
    }
    let base = if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{}", url)
    };
    Ok(format!("{}/v2/", base))
}

pub fn link_status(status: StatusCode) -> LinkStatus {
    match status {
        status if status.is_success() => LinkStatus::Connected,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LinkStatus::FailedLogin,
        _ => LinkStatus::FailedVerification,
    }
}

#[async_trait]
impl RegistryProbe for HttpRegistryProbe {
    async fn probe(&self, registry: &Registry) -> Result<LinkStatus, ProbeError> {
        let endpoint = registry_endpoint(&registry.url)?;
        let mut request = self.client.get(&endpoint);
        if let Some(username) = &registry.username {
            request = request.basic_auth(username, registry.password.as_ref());
        }

        let response = request.send().await?;
        debug!("Registry {} answered {}", endpoint, response.status());
        Ok(link_status(response.status()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_gets_scheme_and_path() {
        assert_eq!(
            registry_endpoint("registry.local:5000").unwrap(),
            "https://registry.local:5000/v2/"
        );
        assert_eq!(
            registry_endpoint("http://10.0.0.9:5000/").unwrap(),
            "http://10.0.0.9:5000/v2/"
        );
        assert!(registry_endpoint("  ").is_err());
    }

    #[test]
    fn status_codes_map_to_link_status() {
        assert_eq!(link_status(StatusCode::OK), LinkStatus::Connected);
        assert_eq!(link_status(StatusCode::UNAUTHORIZED), LinkStatus::FailedLogin);
        assert_eq!(link_status(StatusCode::FORBIDDEN), LinkStatus::FailedLogin);
        assert_eq!(
            link_status(StatusCode::INTERNAL_SERVER_ERROR),
            LinkStatus::FailedVerification
        );
    }
}
