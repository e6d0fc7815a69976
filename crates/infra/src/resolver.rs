//! Permission resolver: loads grant rows and applies the tier rules.
//!
//! Every check is bounded by the earlier of the configured check timeout and
//! the caller's deadline. Store failures and timeouts are denials, surfaced
//! as errors so callers can tell "forbidden" from "could not decide".

use std::future::Future;
use std::time::{Duration, Instant};

use tracing::{debug, instrument, warn};

use edugate_auth::{Action, AuthzError, Decision, PermissionMatrix, PermissionPolicy, Role};

use crate::config::{DEFAULT_CHECK_TIMEOUT, EdugateConfig};
use crate::store::{PermissionStore, StoreError};

#[derive(Debug, Clone)]
pub struct PermissionResolver<S> {
    store: S,
    policy: PermissionPolicy,
    check_timeout: Duration,
}

impl<S> PermissionResolver<S>
where
    S: PermissionStore,
{
    pub fn new(store: S, policy: PermissionPolicy) -> Self {
        Self {
            store,
            policy,
            check_timeout: DEFAULT_CHECK_TIMEOUT,
        }
    }

    pub fn from_config(store: S, config: &EdugateConfig) -> Self {
        Self::new(store, PermissionPolicy::new(config.superuser_role.clone())).with_timeout(config.check_timeout)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.check_timeout = timeout;
        self
    }

    pub fn policy(&self) -> &PermissionPolicy {
        &self.policy
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Decide `(role, resource, action)` and report which tier decided.
    #[instrument(skip(self, deadline), fields(role = %role, action = %action), err)]
    pub async fn check(
        &self,
        role: &Role,
        resource: &str,
        action: Action,
        deadline: Option<Instant>,
    ) -> Result<Decision, AuthzError> {
        let (action_grant, resource_grant) = self
            .bounded(deadline, async {
                tokio::try_join!(
                    self.store.action_grant(role, resource, action),
                    self.store.resource_grant(role, resource),
                )
            })
            .await?;

        let decision = self.policy.decide(role, action, action_grant, resource_grant);
        debug!(allowed = decision.allowed, tier = ?decision.tier, resource, "permission decided");
        Ok(decision)
    }

    /// Boolean form of [`check`](Self::check). Fails closed: any error is `false`.
    pub async fn can_perform(&self, role: &Role, resource: &str, action: Action) -> bool {
        match self.check(role, resource, action, None).await {
            Ok(decision) => decision.allowed,
            Err(err) => {
                warn!(%role, resource, %action, error = %err, "permission check failed; denying");
                false
            }
        }
    }

    /// Full capability matrix for a role, from one bulk read.
    #[instrument(skip(self), fields(role = %role), err)]
    pub async fn effective_permissions(&self, role: &Role) -> Result<PermissionMatrix, AuthzError> {
        let grants = self.bounded(None, self.store.role_grants(role)).await?;
        Ok(self.policy.matrix(&grants))
    }

    async fn bounded<T, F>(&self, deadline: Option<Instant>, fut: F) -> Result<T, AuthzError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let budget = match deadline {
            Some(deadline) => self
                .check_timeout
                .min(deadline.saturating_duration_since(Instant::now())),
            None => self.check_timeout,
        };

        match tokio::time::timeout(budget, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(AuthzError::StoreUnavailable(err.to_string())),
            Err(_) => Err(AuthzError::DeadlineExceeded),
        }
    }
}
