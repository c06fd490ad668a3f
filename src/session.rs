//! Session lifecycle: login, logout, startup restoration, and the
//! refresh-and-retry request decorator.
//!
//! `SessionManager` is the single source of truth for "who is logged in".
//! The active [`Session`] is immutable-and-replaced: observers hold an
//! `Arc<Session>` snapshot and never see a half-updated state.

use std::future::Future;
use std::sync::{Arc, RwLock};

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::{debug, warn};

use crate::auth_api::{AuthApiClient, AuthApiError, UserProfile};
use crate::notify::client::TokenSource;
use crate::store::{CredentialStore, PersistedCredentials, StoreError};

/// Authenticated identity and token pair.
///
/// A `Session` always carries both a user and a token pair; "logged out" is
/// the absence of a session, so the user/token invariant holds by
/// construction.
#[derive(Clone)]
pub struct Session {
    user: UserProfile,
    access_token: SecretString,
    refresh_token: SecretString,
}

impl Session {
    pub fn user(&self) -> &UserProfile {
        &self.user
    }

    pub fn access_token(&self) -> &SecretString {
        &self.access_token
    }

    pub fn refresh_token(&self) -> &SecretString {
        &self.refresh_token
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    /// No session is active; the caller must log in first.
    #[error("not authenticated")]
    NotAuthenticated,

    /// The access token was rejected and the refresh that should have
    /// recovered it failed; the session has been torn down.
    #[error("session expired: {0}")]
    Expired(#[source] AuthApiError),

    #[error(transparent)]
    Api(#[from] AuthApiError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SessionError {
    /// True when the caller should route the user back to login.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::NotAuthenticated | Self::Expired(_))
    }
}

struct SessionState {
    session: Option<Arc<Session>>,
    restoring: bool,
}

/// Owner of the authentication state.
pub struct SessionManager<S: CredentialStore> {
    api: AuthApiClient,
    store: S,
    state: RwLock<SessionState>,
}

impl<S: CredentialStore> SessionManager<S> {
    /// Creates a manager with no active session.
    ///
    /// The manager starts in the restoring state; call [`restore`] once at
    /// startup to settle it, even when no credentials are persisted.
    ///
    /// [`restore`]: SessionManager::restore
    pub fn new(api: AuthApiClient, store: S) -> Self {
        Self {
            api,
            store,
            state: RwLock::new(SessionState {
                session: None,
                restoring: true,
            }),
        }
    }

    /// Returns the current session snapshot, if authenticated.
    pub fn current(&self) -> Option<Arc<Session>> {
        self.state.read().expect("session state poisoned").session.clone()
    }

    /// Derived from the presence of a session; never stored separately.
    pub fn is_authenticated(&self) -> bool {
        self.current().is_some()
    }

    /// True until startup restoration has completed. Observers must not
    /// treat the session as final while this is set.
    pub fn is_restoring(&self) -> bool {
        self.state.read().expect("session state poisoned").restoring
    }

    /// Attempts to restore a session from persisted credentials.
    ///
    /// Fail-closed: any validation failure clears the persisted credentials
    /// and leaves the manager unauthenticated. Returns whether a session was
    /// restored.
    pub async fn restore(&self) -> bool {
        let restored = self.try_restore().await;
        let mut state = self.state.write().expect("session state poisoned");
        state.restoring = false;
        drop(state);
        restored
    }

    async fn try_restore(&self) -> bool {
        let loaded = match self.store.load() {
            Ok(loaded) => loaded,
            Err(err) => {
                warn!(error = %err, "failed to read persisted credentials");
                self.clear_store();
                return false;
            }
        };
        let Some(credentials) = loaded else {
            return false;
        };

        let access = SecretString::new(credentials.access_token);
        let refresh = SecretString::new(credentials.refresh_token);

        let validated = match self.api.profile(&access).await {
            Ok(user) => Ok((user, access)),
            Err(err) if err.is_auth_failure() => match self.api.refresh(&refresh).await {
                Ok(fresh_access) => self
                    .api
                    .profile(&fresh_access)
                    .await
                    .map(|user| (user, fresh_access)),
                Err(err) => Err(err),
            },
            Err(err) => Err(err),
        };

        match validated {
            Ok((user, access)) => {
                let session = Arc::new(Session {
                    user,
                    access_token: access,
                    refresh_token: refresh,
                });
                if let Err(err) = self.store.save(&to_persisted(&session)) {
                    warn!(error = %err, "failed to persist restored credentials");
                }
                self.install(Some(session));
                true
            }
            Err(err) => {
                debug!(error = %err, "persisted credentials failed validation");
                self.clear_store();
                false
            }
        }
    }

    /// Exchanges credentials for a session.
    ///
    /// On success the token pair and user snapshot are persisted and the new
    /// session is installed. On failure nothing changes; no retry is
    /// performed here.
    pub async fn login(&self, username: &str, password: &str) -> Result<(), SessionError> {
        let grant = self.api.login(username, password).await?;
        let session = Arc::new(Session {
            user: grant.user,
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
        });
        self.store.save(&to_persisted(&session))?;
        self.install(Some(session));
        Ok(())
    }

    /// Clears the session and persisted credentials. Always succeeds;
    /// idempotent.
    pub fn logout(&self) {
        self.install(None);
        self.clear_store();
    }

    /// Runs an authenticated request with at most one transparent
    /// refresh-and-retry.
    ///
    /// `op` receives the current access token. When it fails with an
    /// authorization error, the manager refreshes the access token once,
    /// swaps it into a replacement session, and retries `op` exactly once.
    /// A failed refresh tears the session down and yields
    /// [`SessionError::Expired`].
    pub async fn with_refresh<T, Op, Fut>(&self, mut op: Op) -> Result<T, SessionError>
    where
        Op: FnMut(SecretString) -> Fut,
        Fut: Future<Output = Result<T, AuthApiError>>,
    {
        let session = self.current().ok_or(SessionError::NotAuthenticated)?;

        match op(session.access_token().clone()).await {
            Err(err) if err.is_auth_failure() => {
                debug!("access token rejected, attempting refresh");
                let fresh_access = match self.api.refresh(session.refresh_token()).await {
                    Ok(access) => access,
                    Err(refresh_err) => {
                        warn!(error = %refresh_err, "token refresh failed, tearing session down");
                        self.logout();
                        return Err(SessionError::Expired(refresh_err));
                    }
                };
                self.swap_access_token(&session, fresh_access.clone())?;
                op(fresh_access).await.map_err(SessionError::Api)
            }
            other => other.map_err(SessionError::Api),
        }
    }

    fn swap_access_token(
        &self,
        current: &Arc<Session>,
        access_token: SecretString,
    ) -> Result<(), SessionError> {
        let replacement = Arc::new(Session {
            user: current.user.clone(),
            access_token,
            refresh_token: current.refresh_token().clone(),
        });
        self.store.save(&to_persisted(&replacement))?;
        self.install(Some(replacement));
        Ok(())
    }

    fn install(&self, session: Option<Arc<Session>>) {
        self.state.write().expect("session state poisoned").session = session;
    }

    fn clear_store(&self) {
        if let Err(err) = self.store.clear() {
            warn!(error = %err, "failed to clear persisted credentials");
        }
    }
}

impl<S: CredentialStore> TokenSource for SessionManager<S> {
    fn access_token(&self) -> Option<SecretString> {
        self.current().map(|session| session.access_token().clone())
    }
}

fn to_persisted(session: &Session) -> PersistedCredentials {
    PersistedCredentials {
        access_token: session.access_token().expose_secret().clone(),
        refresh_token: session.refresh_token().expose_secret().clone(),
        user: session.user().clone(),
    }
}

#[cfg(test)]
mod tests {
    use crate::auth_api::AuthApiClient;
    use crate::notify::client::TokenSource;
    use crate::store::{CredentialStore, MemoryCredentialStore};

    use super::{SessionError, SessionManager};

    fn manager() -> SessionManager<MemoryCredentialStore> {
        let api = AuthApiClient::new().expect("build client");
        SessionManager::new(api, MemoryCredentialStore::new())
    }

    #[tokio::test]
    async fn restore_with_empty_store_settles_unauthenticated() {
        let manager = manager();
        assert!(manager.is_restoring());

        assert!(!manager.restore().await);
        assert!(!manager.is_restoring());
        assert!(!manager.is_authenticated());
    }

    #[test]
    fn logout_without_session_is_a_no_op() {
        let manager = manager();
        manager.logout();
        manager.logout();
        assert!(!manager.is_authenticated());
        assert!(manager.store.load().expect("load").is_none());
    }

    #[test]
    fn token_source_is_empty_while_unauthenticated() {
        let manager = manager();
        assert!(manager.access_token().is_none());
    }

    #[tokio::test]
    async fn with_refresh_requires_a_session() {
        let manager = manager();
        let result = manager
            .with_refresh(|_token| async move { Ok::<_, crate::auth_api::AuthApiError>(()) })
            .await;
        assert!(matches!(result, Err(SessionError::NotAuthenticated)));
    }
}
