//! Authorization façade: the one call a route handler makes before acting.

use chrono::Utc;
use tracing::{info, instrument, warn};

use edugate_auth::{Action, Actor, AuthorizedActor, AuthzError, RequestContext, validate_claims};

use crate::resolver::PermissionResolver;
use crate::store::PermissionStore;

/// Turns an incoming request into an acting user.
#[async_trait::async_trait]
pub trait ActorResolver: Send + Sync {
    async fn resolve(&self, ctx: &RequestContext) -> Result<Actor, AuthzError>;
}

/// Default resolver: session claims whose time window is valid now.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionActorResolver;

#[async_trait::async_trait]
impl ActorResolver for SessionActorResolver {
    async fn resolve(&self, ctx: &RequestContext) -> Result<Actor, AuthzError> {
        let claims = ctx
            .session
            .as_ref()
            .ok_or_else(|| AuthzError::Unauthenticated("no session".to_string()))?;
        validate_claims(claims, Utc::now())?;
        Ok(claims.actor())
    }
}

pub struct Authorizer<S, A = SessionActorResolver> {
    resolver: PermissionResolver<S>,
    actors: A,
}

impl<S> Authorizer<S, SessionActorResolver>
where
    S: PermissionStore,
{
    pub fn new(resolver: PermissionResolver<S>) -> Self {
        Self {
            resolver,
            actors: SessionActorResolver,
        }
    }
}

impl<S, A> Authorizer<S, A>
where
    S: PermissionStore,
    A: ActorResolver,
{
    pub fn with_actor_resolver(resolver: PermissionResolver<S>, actors: A) -> Self {
        Self { resolver, actors }
    }

    pub fn resolver(&self) -> &PermissionResolver<S> {
        &self.resolver
    }

    /// Resolve the actor, check the permission, and hand back everything
    /// the audit recorder needs.
    #[instrument(skip(self, ctx), fields(action = %action), err)]
    pub async fn authorize(
        &self,
        ctx: &RequestContext,
        resource: &str,
        action: Action,
    ) -> Result<AuthorizedActor, AuthzError> {
        let actor = self.actors.resolve(ctx).await?;
        let decision = self
            .resolver
            .check(&actor.role, resource, action, ctx.deadline)
            .await
            .inspect_err(|err| {
                warn!(user_id = %actor.id, role = %actor.role, resource, error = %err, "authorization could not be decided")
            })?;

        if !decision.allowed {
            info!(user_id = %actor.id, role = %actor.role, resource, tier = ?decision.tier, "access denied");
            return Err(AuthzError::forbidden(resource, action));
        }

        Ok(AuthorizedActor {
            actor,
            resource: resource.to_string(),
            action,
            ip_address: ctx.ip_address.clone(),
            user_agent: ctx.user_agent.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use chrono::Duration;
    use edugate_auth::{PermissionPolicy, Role, SessionClaims};
    use edugate_core::UserId;

    fn session(role: &str, ttl_secs: i64) -> SessionClaims {
        let now = Utc::now();
        SessionClaims {
            sub: UserId::new(),
            display_name: "Alice".into(),
            role: Role::new(role.to_string()),
            issued_at: now - Duration::seconds(5),
            expires_at: now + Duration::seconds(ttl_secs),
        }
    }

    fn authorizer() -> (InMemoryStore, Authorizer<InMemoryStore>) {
        let store = InMemoryStore::new();
        store.grant_resource("teacher", "students", true);
        let resolver = PermissionResolver::new(store.clone(), PermissionPolicy::default());
        (store, Authorizer::new(resolver))
    }

    #[tokio::test]
    async fn allowed_request_carries_origin() {
        let (_, authz) = authorizer();
        let ctx = RequestContext::with_session(session("teacher", 60))
            .ip("10.0.0.7")
            .user_agent("test-agent");

        let authorized = authz.authorize(&ctx, "students", Action::View).await.unwrap();
        assert_eq!(authorized.actor.display_name, "Alice");
        assert_eq!(authorized.ip_address.as_deref(), Some("10.0.0.7"));
        assert_eq!(authorized.user_agent.as_deref(), Some("test-agent"));
    }

    #[tokio::test]
    async fn denial_is_forbidden_with_fixed_message() {
        let (_, authz) = authorizer();
        let ctx = RequestContext::with_session(session("teacher", 60));
        let err = authz.authorize(&ctx, "students", Action::Delete).await.unwrap_err();
        assert_eq!(err, AuthzError::forbidden("students", Action::Delete));
        assert_eq!(err.user_message(), "you don't have permission for `delete` on `students`");
    }

    #[tokio::test]
    async fn missing_or_expired_session_is_unauthenticated() {
        let (_, authz) = authorizer();
        let err = authz
            .authorize(&RequestContext::default(), "students", Action::View)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthzError::Unauthenticated(_)));

        let ctx = RequestContext::with_session(session("teacher", -1));
        let err = authz.authorize(&ctx, "students", Action::View).await.unwrap_err();
        assert!(matches!(err, AuthzError::Unauthenticated(_)));
    }

    struct FixedActor(Actor);

    #[async_trait::async_trait]
    impl ActorResolver for FixedActor {
        async fn resolve(&self, _ctx: &RequestContext) -> Result<Actor, AuthzError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn custom_actor_resolver_is_used() {
        let (store, _) = authorizer();
        let resolver = PermissionResolver::new(store, PermissionPolicy::default());
        let actor = Actor::new(UserId::new(), "Root", Role::admin());
        let authz = Authorizer::with_actor_resolver(resolver, FixedActor(actor));

        let authorized = authz
            .authorize(&RequestContext::default(), "students", Action::BulkUpdate)
            .await
            .unwrap();
        assert_eq!(authorized.actor.role, Role::admin());
    }
}
