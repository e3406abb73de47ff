//! OpenStack Keystone v3 client
//!
//! Password authentication scoped to the consometer tenant, project listing with
//! pagination, and endpoint lookup through the service and endpoint catalogs.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use consometer_common::{ConsometerError, OpenstackCredentials, Project, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use super::{IdentityResolver, Session};

/// Response header carrying a freshly issued token
const SUBJECT_TOKEN_HEADER: &str = "x-subject-token";

/// Keystone v3 identity service
pub struct KeystoneClient {
    client: Client,
    base_url: String,
    credentials: OpenstackCredentials,
}

impl KeystoneClient {
    pub fn new(client: Client, credentials: OpenstackCredentials) -> Self {
        Self {
            client,
            base_url: v3_base_url(&credentials.keystone_uri),
            credentials,
        }
    }

    /// Client whose every request is bounded by `timeout`
    pub fn with_timeout(credentials: OpenstackCredentials, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConsometerError::Network(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self::new(client, credentials))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: DeserializeOwned>(&self, session: &Session, url: &str) -> Result<T> {
        let response = self
            .client
            .get(url)
            .header("X-Auth-Token", &session.token)
            .send()
            .await
            .map_err(|e| ConsometerError::Network(format!("Request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ConsometerError::Identity(format!(
                "Bad response status when getting {} (expecting 200 OK): {}",
                url, status
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ConsometerError::Serialization(format!("Failed decoding {}: {}", url, e)))
    }
}

#[async_trait]
impl IdentityResolver for KeystoneClient {
    #[instrument(skip(self), fields(user = %self.credentials.user, tenant = %self.credentials.tenant))]
    async fn authenticate(&self) -> Result<Session> {
        let body = json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": {
                        "user": {
                            "name": self.credentials.user,
                            "domain": { "name": self.credentials.domain },
                            "password": self.credentials.password,
                        }
                    }
                },
                "scope": {
                    "project": {
                        "name": self.credentials.tenant,
                        "domain": { "name": self.credentials.domain },
                    }
                }
            }
        });

        let url = format!("{}/auth/tokens", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ConsometerError::Network(format!("Authentication request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ConsometerError::Identity(format!(
                "Authentication refused: {}",
                status
            )));
        }

        let token = response
            .headers()
            .get(SUBJECT_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ConsometerError::Identity("No token in authentication response".into()))?;

        debug!("Authenticated against keystone");
        Ok(Session::new(token))
    }

    #[instrument(skip(self, session))]
    async fn list_projects(&self, session: &Session) -> Result<Vec<Project>> {
        let mut projects = Vec::new();
        let mut url = format!("{}/projects", self.base_url);
        let mut visited = HashSet::new();

        loop {
            let page: ProjectList = self.get_json(session, &url).await?;
            projects.extend(
                page.projects
                    .into_iter()
                    .map(|entry| Project::new(entry.id).with_name(entry.name)),
            );

            visited.insert(url);

            match page.links.next {
                Some(next) if next.is_empty() => break,
                Some(next) if visited.contains(&next) => {
                    warn!(next = %next, "Project listing links back to a visited page, stopping");
                    break;
                }
                Some(next) => url = next,
                None => break,
            }
        }

        info!(count = projects.len(), "Listed projects");
        Ok(projects)
    }

    #[instrument(skip(self, session))]
    async fn resolve_endpoint(
        &self,
        session: &Session,
        service_type: &str,
        region: &str,
        interface: &str,
    ) -> Result<String> {
        let services: ServiceCatalog = self
            .get_json(session, &format!("{}/services", self.base_url))
            .await?;
        let service_id = select_service_id(&services.services, service_type)?;

        let endpoints: EndpointCatalog = self
            .get_json(session, &format!("{}/endpoints", self.base_url))
            .await?;
        let url = select_endpoint(&endpoints.endpoints, &service_id, region, interface)?;

        debug!(url = %url, "Resolved endpoint");
        Ok(url)
    }
}

/// Normalize an identity URI to its `/v3` root
fn v3_base_url(uri: &str) -> String {
    let trimmed = uri.trim_end_matches('/');
    if trimmed.ends_with("/v3") {
        trimmed.to_string()
    } else {
        format!("{}/v3", trimmed)
    }
}

#[derive(Debug, Deserialize)]
struct ProjectList {
    projects: Vec<ProjectEntry>,
    #[serde(default)]
    links: Links,
}

#[derive(Debug, Default, Deserialize)]
struct Links {
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProjectEntry {
    id: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct ServiceCatalog {
    services: Vec<ServiceEntry>,
}

#[derive(Debug, Deserialize)]
struct ServiceEntry {
    id: String,
    #[serde(rename = "type")]
    service_type: String,
}

#[derive(Debug, Deserialize)]
struct EndpointCatalog {
    endpoints: Vec<EndpointEntry>,
}

#[derive(Debug, Deserialize)]
struct EndpointEntry {
    url: String,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    region_id: Option<String>,
    interface: String,
    service_id: String,
}

fn select_service_id(services: &[ServiceEntry], service_type: &str) -> Result<String> {
    let matching: Vec<&str> = services
        .iter()
        .filter(|s| s.service_type == service_type)
        .map(|s| s.id.as_str())
        .collect();

    match matching.as_slice() {
        [id] => Ok(id.to_string()),
        [] => Err(ConsometerError::Identity(format!(
            "No service of type {}",
            service_type
        ))),
        many => Err(ConsometerError::Identity(format!(
            "Multiple services available with type {}: {:?}",
            service_type, many
        ))),
    }
}

fn select_endpoint(
    endpoints: &[EndpointEntry],
    service_id: &str,
    region: &str,
    interface: &str,
) -> Result<String> {
    let matching: Vec<&str> = endpoints
        .iter()
        .filter(|e| {
            let in_region =
                e.region.as_deref() == Some(region) || e.region_id.as_deref() == Some(region);
            in_region && e.service_id == service_id && e.interface == interface
        })
        .map(|e| e.url.as_str())
        .collect();

    match matching.as_slice() {
        [url] => Ok(url.to_string()),
        [] => Err(ConsometerError::Identity(format!(
            "No endpoint for service {} in region {}",
            service_id, region
        ))),
        many => Err(ConsometerError::Identity(format!(
            "Multiple endpoints available: {:?}",
            many
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{http_client, http_response, spawn_http_server};

    fn endpoint(url: &str, region: &str, interface: &str, service_id: &str) -> EndpointEntry {
        EndpointEntry {
            url: url.into(),
            region: Some(region.into()),
            region_id: None,
            interface: interface.into(),
            service_id: service_id.into(),
        }
    }

    fn credentials(uri: &str) -> OpenstackCredentials {
        OpenstackCredentials {
            keystone_uri: uri.into(),
            user: "conso".into(),
            password: "secret".into(),
            tenant: "admin".into(),
            domain: "Default".into(),
        }
    }

    #[test]
    fn test_v3_base_url() {
        assert_eq!(v3_base_url("https://keystone:5000"), "https://keystone:5000/v3");
        assert_eq!(v3_base_url("https://keystone:5000/v3/"), "https://keystone:5000/v3");
    }

    #[test]
    fn test_select_service_id() {
        let services = vec![
            ServiceEntry { id: "s1".into(), service_type: "compute".into() },
            ServiceEntry { id: "s2".into(), service_type: "object-store".into() },
        ];
        assert_eq!(select_service_id(&services, "object-store").unwrap(), "s2");
        assert!(select_service_id(&services, "image").is_err());

        let duplicated = vec![
            ServiceEntry { id: "s2".into(), service_type: "object-store".into() },
            ServiceEntry { id: "s3".into(), service_type: "object-store".into() },
        ];
        assert!(select_service_id(&duplicated, "object-store").is_err());
    }

    #[test]
    fn test_select_endpoint() {
        let endpoints = vec![
            endpoint("https://swift.int5:8080", "int5", "admin", "s2"),
            endpoint("https://swift.int5", "int5", "public", "s2"),
            endpoint("https://swift.int6:8080", "int6", "admin", "s2"),
            endpoint("https://nova.int5", "int5", "admin", "s1"),
        ];

        assert_eq!(
            select_endpoint(&endpoints, "s2", "int5", "admin").unwrap(),
            "https://swift.int5:8080"
        );
        assert!(select_endpoint(&endpoints, "s2", "int7", "admin").is_err());

        let mut ambiguous = endpoints;
        ambiguous.push(endpoint("https://swift-bis.int5:8080", "int5", "admin", "s2"));
        assert!(select_endpoint(&ambiguous, "s2", "int5", "admin").is_err());
    }

    #[test]
    fn test_region_id_matches() {
        let endpoints = vec![EndpointEntry {
            url: "https://swift.int5:8080".into(),
            region: None,
            region_id: Some("int5".into()),
            interface: "admin".into(),
            service_id: "s2".into(),
        }];
        assert!(select_endpoint(&endpoints, "s2", "int5", "admin").is_ok());
    }

    #[tokio::test]
    async fn test_authenticate_and_paginate_projects() {
        let (addr, _hits) = spawn_http_server(|request| {
            let lowered = request.to_ascii_lowercase();
            let host = lowered
                .lines()
                .find_map(|line| line.strip_prefix("host: "))
                .unwrap_or_default()
                .trim()
                .to_string();

            if lowered.starts_with("post /v3/auth/tokens ") {
                assert!(request.contains("\"password\":\"secret\""));
                http_response("201 Created", &[("X-Subject-Token", "tok-123")], "{}")
            } else if !lowered.contains("x-auth-token: tok-123") {
                http_response("401 Unauthorized", &[], "")
            } else if lowered.starts_with("get /v3/projects?page=2 ") {
                let body = r#"{"projects":[{"id":"p3","name":"three"}],"links":{"next":null}}"#;
                http_response("200 OK", &[("Content-Type", "application/json")], body)
            } else if lowered.starts_with("get /v3/projects ") {
                let body = format!(
                    r#"{{"projects":[{{"id":"p1","name":"one"}},{{"id":"p2","name":"two"}}],"links":{{"next":"http://{}/v3/projects?page=2"}}}}"#,
                    host
                );
                http_response("200 OK", &[("Content-Type", "application/json")], &body)
            } else {
                http_response("404 Not Found", &[], "")
            }
        })
        .await;

        let keystone = KeystoneClient::new(http_client(), credentials(&format!("http://{}", addr)));
        let session = keystone.authenticate().await.unwrap();
        assert_eq!(session.token, "tok-123");

        let projects = keystone.list_projects(&session).await.unwrap();
        let ids: Vec<&str> = projects.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "p2", "p3"]);
        assert_eq!(projects[2].name, "three");
    }

    #[tokio::test]
    async fn test_pagination_cycle_terminates() {
        let (addr, hits) = spawn_http_server(|request| {
            let lowered = request.to_ascii_lowercase();
            let host = lowered
                .lines()
                .find_map(|line| line.strip_prefix("host: "))
                .unwrap_or_default()
                .trim()
                .to_string();

            // page 3 links back to page 2
            let (projects, next) = if lowered.starts_with("get /v3/projects?page=2 ") {
                (r#"[{"id":"p2","name":"two"}]"#, "3")
            } else if lowered.starts_with("get /v3/projects?page=3 ") {
                (r#"[{"id":"p3","name":"three"}]"#, "2")
            } else if lowered.starts_with("get /v3/projects ") {
                (r#"[{"id":"p1","name":"one"}]"#, "2")
            } else {
                return http_response("404 Not Found", &[], "");
            };
            let body = format!(
                r#"{{"projects":{},"links":{{"next":"http://{}/v3/projects?page={}"}}}}"#,
                projects, host, next
            );
            http_response("200 OK", &[("Content-Type", "application/json")], &body)
        })
        .await;

        let keystone = KeystoneClient::new(http_client(), credentials(&format!("http://{}", addr)));
        let projects = keystone.list_projects(&Session::new("tok")).await.unwrap();

        let ids: Vec<&str> = projects.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "p2", "p3"]);
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_resolve_endpoint() {
        let (addr, _hits) = spawn_http_server(|request| {
            let lowered = request.to_ascii_lowercase();
            let body = if lowered.starts_with("get /v3/services ") {
                r#"{"services":[{"id":"s2","type":"object-store","name":"swift","enabled":true}]}"#
            } else if lowered.starts_with("get /v3/endpoints ") {
                r#"{"endpoints":[
                    {"id":"e1","url":"https://swift.int5:8080","region":"int5","region_id":"int5","interface":"admin","service_id":"s2","enabled":true},
                    {"id":"e2","url":"https://swift.int5","region":"int5","region_id":"int5","interface":"public","service_id":"s2","enabled":true}
                ]}"#
            } else {
                return http_response("404 Not Found", &[], "");
            };
            http_response("200 OK", &[("Content-Type", "application/json")], body)
        })
        .await;

        let keystone = KeystoneClient::new(http_client(), credentials(&format!("http://{}/v3", addr)));
        let url = keystone
            .resolve_endpoint(&Session::new("tok"), "object-store", "int5", "admin")
            .await
            .unwrap();

        assert_eq!(url, "https://swift.int5:8080");
    }

    #[tokio::test]
    async fn test_refused_authentication() {
        let (addr, _hits) = spawn_http_server(|_| http_response("401 Unauthorized", &[], "")).await;

        let keystone = KeystoneClient::new(http_client(), credentials(&format!("http://{}", addr)));
        assert!(matches!(
            keystone.authenticate().await,
            Err(ConsometerError::Identity(_))
        ));
    }
}
