use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;
use uuid::Uuid;

use ballot_types::api::AuthResponse;

use crate::error::ClientError;
use crate::store::PollStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub user_id: Uuid,
    pub username: String,
    pub token: String,
}

impl From<AuthResponse> for CurrentUser {
    fn from(resp: AuthResponse) -> Self {
        Self {
            user_id: resp.user_id,
            username: resp.username,
            token: resp.token,
        }
    }
}

/// Reactive "who is signed in" value shared by every view in the process.
/// Cloning shares the same underlying value. Only `sign_in`, `sign_up` and
/// `sign_out` write it.
#[derive(Clone)]
pub struct IdentityContext {
    tx: Arc<watch::Sender<Option<CurrentUser>>>,
}

impl Default for IdentityContext {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityContext {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> Option<CurrentUser> {
        self.tx.borrow().clone()
    }

    /// Receiver that wakes on every sign-in and sign-out.
    pub fn watch(&self) -> watch::Receiver<Option<CurrentUser>> {
        self.tx.subscribe()
    }

    pub async fn sign_in<S: PollStore>(
        &self,
        store: &S,
        username: &str,
        password: &str,
    ) -> Result<CurrentUser, ClientError> {
        let user = CurrentUser::from(store.login(username, password).await?);
        info!("Signed in as {} ({})", user.username, user.user_id);
        self.tx.send_replace(Some(user.clone()));
        Ok(user)
    }

    /// Register a new account and sign in with it.
    pub async fn sign_up<S: PollStore>(
        &self,
        store: &S,
        username: &str,
        password: &str,
    ) -> Result<CurrentUser, ClientError> {
        let user = CurrentUser::from(store.register(username, password).await?);
        info!("Registered and signed in as {} ({})", user.username, user.user_id);
        self.tx.send_replace(Some(user.clone()));
        Ok(user)
    }

    pub fn sign_out(&self) {
        if let Some(user) = self.tx.send_replace(None) {
            info!("Signed out {}", user.username);
        }
    }
}
