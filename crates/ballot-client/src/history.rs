use tracing::debug;

use ballot_types::models::PollSummary;

use crate::error::ClientError;
use crate::identity::IdentityContext;
use crate::store::PollStore;

/// Polls the signed-in user created, newest first.
pub async fn load_my_polls<S: PollStore>(
    store: &S,
    identity: &IdentityContext,
) -> Result<Vec<PollSummary>, ClientError> {
    let user = identity.current().ok_or(ClientError::NotSignedIn)?;
    let polls = store.my_polls(&user.token).await?;
    debug!("Loaded {} polls for {}", polls.len(), user.username);
    Ok(polls.iter().map(|p| p.summary()).collect())
}
