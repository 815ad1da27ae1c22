//! Dispatch façade: breaker around retry around one downstream attempt.
//!
//! ```text
//! breaker(target).execute(|| retry.run(|| downstream.send(call)))
//! ```
//!
//! A burst of retries for one logical request is a single breaker decision. When the breaker
//! refuses, the downstream is not contacted at all.

use crate::circuit_breaker::{BreakerStatus, CircuitBreakerConfig};
use crate::downstream::{Downstream, DownstreamCall, DownstreamError, DownstreamResponse};
use crate::error::ResilienceError;
use crate::registry::{BreakerRegistry, RegistryError};
use crate::retry::{RetryConfig, RetryEngine};
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Outcome of a dispatched call that did not succeed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    #[error("no downstream registered for '{0}'")]
    UnknownTarget(String),
    #[error("circuit breaker for '{target}' is open")]
    CircuitOpen { target: String, status: BreakerStatus },
    #[error(transparent)]
    Downstream(#[from] DownstreamError),
}

/// Errors produced while assembling a [`Dispatcher`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchBuildError {
    #[error("user routes point at unregistered target '{0}'")]
    UnknownUserTarget(String),
}

/// Where the user operations live on the downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRoutes {
    pub target: String,
    pub register_path: String,
    pub list_path: String,
}

impl Default for UserRoutes {
    fn default() -> Self {
        Self {
            target: "user-service".to_string(),
            register_path: "/users".to_string(),
            list_path: "/users".to_string(),
        }
    }
}

/// Routes calls to named downstreams through their breakers and the shared retry engine.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: BreakerRegistry,
    downstreams: Arc<HashMap<String, Arc<dyn Downstream>>>,
    retry: RetryEngine,
    retry_config: RetryConfig,
    users: UserRoutes,
}

impl Dispatcher {
    pub fn builder(registry: BreakerRegistry) -> DispatcherBuilder {
        DispatcherBuilder::new(registry)
    }

    /// Send `call` to `target` under breaker and retry protection.
    pub async fn dispatch(
        &self,
        target: &str,
        call: DownstreamCall,
    ) -> Result<DownstreamResponse, DispatchError> {
        let downstream = self
            .downstreams
            .get(target)
            .ok_or_else(|| DispatchError::UnknownTarget(target.to_string()))?;
        let breaker = self
            .registry
            .breaker(target)
            .map_err(|_| DispatchError::UnknownTarget(target.to_string()))?;

        let retry = &self.retry;
        let config = &self.retry_config;
        let call = &call;
        let result = breaker
            .execute(|| {
                retry.run(
                    || async { downstream.send(call).await.map_err(ResilienceError::Inner) },
                    config,
                )
            })
            .await;

        match result {
            Ok(response) => Ok(response),
            Err(ResilienceError::CircuitOpen { status }) => {
                tracing::debug!(target_name = %target, path = %call.path, "dispatch refused by open breaker");
                Err(DispatchError::CircuitOpen { target: target.to_string(), status })
            }
            Err(ResilienceError::Inner(error)) => {
                tracing::debug!(target_name = %target, path = %call.path, %error, "dispatch failed");
                Err(DispatchError::Downstream(error))
            }
        }
    }

    /// Forward a registration payload to the user service.
    pub async fn register_user(&self, body: Bytes) -> Result<DownstreamResponse, DispatchError> {
        let call = DownstreamCall::post_json(self.users.register_path.clone(), body);
        self.dispatch(&self.users.target, call).await
    }

    pub async fn list_users(&self) -> Result<DownstreamResponse, DispatchError> {
        let call = DownstreamCall::get(self.users.list_path.clone());
        self.dispatch(&self.users.target, call).await
    }

    /// Status of every breaker, keyed by target.
    pub fn status(&self) -> BTreeMap<String, BreakerStatus> {
        self.registry.snapshot()
    }

    pub async fn reset(&self, target: &str) -> Result<BreakerStatus, RegistryError> {
        self.registry.reset(target).await
    }

    pub async fn reset_all(&self) -> BTreeMap<String, BreakerStatus> {
        self.registry.reset_all().await
    }

    pub fn registry(&self) -> &BreakerRegistry {
        &self.registry
    }

    pub fn user_routes(&self) -> &UserRoutes {
        &self.users
    }
}

/// Builder for [`Dispatcher`].
#[derive(Debug)]
pub struct DispatcherBuilder {
    registry: BreakerRegistry,
    downstreams: HashMap<String, Arc<dyn Downstream>>,
    retry: RetryEngine,
    retry_config: RetryConfig,
    users: UserRoutes,
}

impl DispatcherBuilder {
    fn new(registry: BreakerRegistry) -> Self {
        Self {
            registry,
            downstreams: HashMap::new(),
            retry: RetryEngine::new(),
            retry_config: RetryConfig::default(),
            users: UserRoutes::default(),
        }
    }

    /// Add a downstream and register its breaker under the downstream's name.
    pub fn downstream<D>(self, downstream: D, breaker: CircuitBreakerConfig) -> Self
    where
        D: Downstream + 'static,
    {
        self.shared_downstream(Arc::new(downstream), breaker)
    }

    pub fn shared_downstream(
        mut self,
        downstream: Arc<dyn Downstream>,
        breaker: CircuitBreakerConfig,
    ) -> Self {
        let name = downstream.name().to_string();
        self.registry.register(name.clone(), breaker);
        self.downstreams.insert(name, downstream);
        self
    }

    pub fn retry(mut self, engine: RetryEngine, config: RetryConfig) -> Self {
        self.retry = engine;
        self.retry_config = config;
        self
    }

    pub fn user_routes(mut self, routes: UserRoutes) -> Self {
        self.users = routes;
        self
    }

    pub fn build(self) -> Result<Dispatcher, DispatchBuildError> {
        if !self.downstreams.contains_key(&self.users.target) {
            return Err(DispatchBuildError::UnknownUserTarget(self.users.target));
        }
        Ok(Dispatcher {
            registry: self.registry,
            downstreams: Arc::new(self.downstreams),
            retry: self.retry,
            retry_config: self.retry_config,
            users: self.users,
        })
    }
}
