//! Poll authoring form state.

use tracing::{info, warn};

use ballot_types::models::{MIN_OPTIONS, NewPoll};

use crate::error::ClientError;
use crate::identity::IdentityContext;
use crate::nav::Route;
use crate::store::PollStore;

/// Editable question plus option slots. Always has at least `MIN_OPTIONS`
/// slots; blank slots are dropped at submit time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollDraft {
    question: String,
    options: Vec<String>,
}

impl Default for PollDraft {
    fn default() -> Self {
        Self::new()
    }
}

impl PollDraft {
    pub fn new() -> Self {
        Self {
            question: String::new(),
            options: vec![String::new(); MIN_OPTIONS],
        }
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn options(&self) -> &[String] {
        &self.options
    }

    pub fn set_question(&mut self, question: impl Into<String>) {
        self.question = question.into();
    }

    /// Returns false if there is no slot at `index`.
    pub fn set_option(&mut self, index: usize, text: impl Into<String>) -> bool {
        match self.options.get_mut(index) {
            Some(slot) => {
                *slot = text.into();
                true
            }
            None => false,
        }
    }

    /// Append a blank slot and return its index.
    pub fn add_option(&mut self) -> usize {
        self.options.push(String::new());
        self.options.len() - 1
    }

    /// Refused when only the minimum number of slots is left.
    pub fn remove_option(&mut self, index: usize) -> bool {
        if self.options.len() <= MIN_OPTIONS || index >= self.options.len() {
            return false;
        }
        self.options.remove(index);
        true
    }

    pub fn validate(&self) -> Result<NewPoll, ClientError> {
        Ok(NewPoll::validate(&self.question, &self.options)?)
    }

    /// Whether the submit control should be enabled.
    pub fn can_submit(&self) -> bool {
        NewPoll::validate(&self.question, &self.options).is_ok()
    }

    /// Store the poll and return the route to its voting view. The draft is
    /// reset only on success; on failure it is left as typed.
    pub async fn submit<S: PollStore>(&mut self, store: &S, identity: &IdentityContext) -> Result<Route, ClientError> {
        let draft = self.validate()?;
        let user = identity.current();

        let poll = match store.create_poll(&draft, user.as_ref().map(|u| u.token.as_str())).await {
            Ok(poll) => poll,
            Err(e) => {
                warn!("Error creating poll: {}", e);
                return Err(e);
            }
        };

        info!("Created poll {} with {} options", poll.id, poll.options.len());
        *self = Self::new();
        Ok(Route::Poll(poll.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ballot_types::api::AuthResponse;
    use ballot_types::models::{ANONYMOUS_CREATOR, DraftError, Poll, PollOption};
    use std::collections::BTreeSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use uuid::Uuid;

    #[derive(Default)]
    struct RecordingStore {
        created: Mutex<Vec<(NewPoll, Option<String>)>>,
        fail: AtomicBool,
    }

    impl PollStore for RecordingStore {
        async fn register(&self, username: &str, password: &str) -> Result<AuthResponse, ClientError> {
            self.login(username, password).await
        }

        async fn login(&self, username: &str, _password: &str) -> Result<AuthResponse, ClientError> {
            Ok(AuthResponse {
                user_id: Uuid::new_v4(),
                username: username.to_string(),
                token: format!("token-{}", username),
            })
        }

        async fn create_poll(&self, draft: &NewPoll, token: Option<&str>) -> Result<Poll, ClientError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(ClientError::Gateway("offline".into()));
            }
            self.created
                .lock()
                .unwrap()
                .push((draft.clone(), token.map(str::to_string)));
            Ok(Poll {
                id: Uuid::new_v4(),
                question: draft.question.clone(),
                options: draft
                    .options
                    .iter()
                    .enumerate()
                    .map(|(i, text)| PollOption {
                        id: format!("opt{}", i),
                        text: text.clone(),
                        votes: 0,
                    })
                    .collect(),
                created_by: ANONYMOUS_CREATOR.to_string(),
                created_at: chrono::Utc::now(),
                voted_uids: BTreeSet::new(),
            })
        }

        async fn fetch_poll(&self, _poll_id: Uuid) -> Result<Option<Poll>, ClientError> {
            Ok(None)
        }

        async fn cast_vote(&self, _poll_id: Uuid, _option_id: &str, _token: &str) -> Result<Poll, ClientError> {
            Err(ClientError::NotSignedIn)
        }

        async fn my_polls(&self, _token: &str) -> Result<Vec<Poll>, ClientError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_starts_with_two_blank_slots() {
        let draft = PollDraft::new();
        assert_eq!(draft.options(), &["", ""]);
        assert!(!draft.can_submit());
    }

    #[test]
    fn test_slot_editing() {
        let mut draft = PollDraft::new();
        assert!(!draft.remove_option(0));

        let third = draft.add_option();
        assert_eq!(third, 2);
        assert!(draft.set_option(2, "Juice"));
        assert!(!draft.set_option(5, "Water"));

        assert!(draft.remove_option(0));
        assert_eq!(draft.options(), &["", "Juice"]);
        assert!(!draft.remove_option(1));
    }

    #[test]
    fn test_can_submit_needs_question_and_two_options() {
        let mut draft = PollDraft::new();
        draft.set_option(0, "Tea");
        draft.set_option(1, "Coffee");
        assert!(!draft.can_submit());

        draft.set_question("   ");
        assert!(!draft.can_submit());

        draft.set_question("Tea or coffee?");
        assert!(draft.can_submit());

        draft.set_option(1, "  ");
        assert!(matches!(draft.validate(), Err(ClientError::Draft(DraftError::TooFewOptions(1)))));
    }

    #[tokio::test]
    async fn test_submit_resets_and_routes_to_poll() {
        let store = RecordingStore::default();
        let identity = IdentityContext::new();
        let mut draft = PollDraft::new();
        draft.set_question(" Tea or coffee? ");
        draft.set_option(0, "Tea");
        draft.add_option();
        draft.set_option(2, " Coffee ");

        let route = draft.submit(&store, &identity).await.unwrap();
        assert!(matches!(route, Route::Poll(_)));
        assert_eq!(draft, PollDraft::new());

        let created = store.created.lock().unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].0.question, "Tea or coffee?");
        assert_eq!(created[0].0.options, vec!["Tea", "Coffee"]);
        assert_eq!(created[0].1, None);
    }

    #[tokio::test]
    async fn test_submit_sends_token_when_signed_in() {
        let store = RecordingStore::default();
        let identity = IdentityContext::new();
        identity.sign_in(&store, "alice", "pw").await.unwrap();

        let mut draft = PollDraft::new();
        draft.set_question("Best editor?");
        draft.set_option(0, "vim");
        draft.set_option(1, "emacs");
        draft.submit(&store, &identity).await.unwrap();

        assert_eq!(store.created.lock().unwrap()[0].1.as_deref(), Some("token-alice"));
    }

    #[tokio::test]
    async fn test_invalid_or_failed_submit_keeps_draft() {
        let store = RecordingStore::default();
        let identity = IdentityContext::new();
        let mut draft = PollDraft::new();
        draft.set_question("Only one?");
        draft.set_option(0, "Yes");

        assert!(matches!(draft.submit(&store, &identity).await, Err(ClientError::Draft(_))));
        assert!(store.created.lock().unwrap().is_empty());

        draft.set_option(1, "No");
        store.fail.store(true, Ordering::SeqCst);
        assert!(draft.submit(&store, &identity).await.is_err());
        assert_eq!(draft.question(), "Only one?");
        assert_eq!(draft.options(), &["Yes", "No"]);
    }
}
