//! Identity and region resolution
//!
//! The collector needs three things from the identity service: a token, the list of
//! tenant projects, and the Swift endpoint of each region.

pub mod keystone;

use std::fmt;

use async_trait::async_trait;
use consometer_common::{Project, Result};

/// Authenticated session with the identity service
#[derive(Clone)]
pub struct Session {
    pub token: String,
}

impl Session {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("token", &"***").finish()
    }
}

/// Identity service operations used by a run
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn authenticate(&self) -> Result<Session>;

    async fn list_projects(&self, session: &Session) -> Result<Vec<Project>>;

    /// URL of the single endpoint matching service type, region and interface
    async fn resolve_endpoint(
        &self,
        session: &Session,
        service_type: &str,
        region: &str,
        interface: &str,
    ) -> Result<String>;
}
