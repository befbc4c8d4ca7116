//! Platform identity lookup.
//!
//! Resolving the identity that receives secret access is the only
//! asynchronous step of graph construction. It is awaited once, before any
//! resource is declared, and is never retried: a failure fails the whole
//! evaluation.

use std::future::Future;
use std::pin::Pin;

use tracing::debug;

use crate::config::{ProviderConfig, StackConfig};
use crate::error::{GraphError, GraphResult};

/// A service identity (an email-shaped account id).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    email: String,
}

impl Identity {
    pub fn new(email: impl Into<String>) -> GraphResult<Self> {
        let email = email.into();
        if !email.contains('@') {
            return Err(GraphError::Identity(format!(
                "{email:?} is not a service account email"
            )));
        }
        Ok(Self { email })
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    /// IAM member string for this identity.
    pub fn member(&self) -> String {
        format!("serviceAccount:{}", self.email)
    }
}

/// Boxed future alias for identity lookups.
pub type IdentityFuture<'a> = Pin<Box<dyn Future<Output = GraphResult<Identity>> + Send + 'a>>;

/// Looks up the identity that should be allowed to read the stack's secret.
pub trait IdentityResolver: Send + Sync {
    fn resolve<'a>(&'a self, provider: &'a ProviderConfig) -> IdentityFuture<'a>;
}

/// A fixed, configured identity.
#[derive(Debug, Clone)]
pub struct StaticIdentity {
    email: String,
}

impl StaticIdentity {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
        }
    }
}

impl IdentityResolver for StaticIdentity {
    fn resolve<'a>(&'a self, _provider: &'a ProviderConfig) -> IdentityFuture<'a> {
        Box::pin(async move { Identity::new(self.email.clone()) })
    }
}

/// The project's default compute identity,
/// `<project number>-compute@developer.gserviceaccount.com`.
#[derive(Debug, Clone, Default)]
pub struct DefaultComputeIdentity;

impl IdentityResolver for DefaultComputeIdentity {
    fn resolve<'a>(&'a self, provider: &'a ProviderConfig) -> IdentityFuture<'a> {
        Box::pin(async move {
            let number = provider.project_number.as_deref().ok_or_else(|| {
                GraphError::Identity(format!(
                    "project {} has no project_number; set provider.project_number or identity.service_account",
                    provider.project
                ))
            })?;
            let identity =
                Identity::new(format!("{number}-compute@developer.gserviceaccount.com"))?;
            debug!(email = identity.email(), "resolved default compute identity");
            Ok(identity)
        })
    }
}

/// Pick the resolver a stack's config asks for.
pub fn resolver_for(config: &StackConfig) -> Box<dyn IdentityResolver> {
    match &config.identity.service_account {
        Some(email) => Box::new(StaticIdentity::new(email.clone())),
        None => Box::new(DefaultComputeIdentity),
    }
}
