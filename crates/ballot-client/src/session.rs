//! Per-viewer, per-poll voting session.
//!
//! The session owns nothing but local view state: the latest poll record
//! pushed by the subscription, whether this viewer counts as having voted,
//! and whether a vote request is in flight. Marking the viewer as voted
//! happens before the request leaves so rapid repeated input cannot submit
//! twice; a failed request rolls that mark back.

use tracing::{debug, info, warn};
use uuid::Uuid;

use ballot_types::models::{Poll, PollResults};

use crate::error::ClientError;
use crate::identity::{CurrentUser, IdentityContext};
use crate::markers::VotedMarkers;
use crate::nav::Route;
use crate::store::PollStore;
use crate::subscription::{PollFeed, PollSubscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewState {
    /// Waiting for the first subscription callback
    Loading,
    /// No such poll, or the subscription failed. Terminal.
    NotFound,
    ViewingUnvoted,
    ViewingVoted,
    /// A vote request is in flight; voting controls are disabled
    Submitting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    /// Preconditions not met; nothing was sent
    Ignored,
    /// Stored; the viewer is now marked as voted
    Recorded,
    /// The server already had this viewer in its voter set
    AlreadyRecorded,
    /// The request failed and the optimistic mark was reverted
    RolledBack,
}

/// A vote that passed the local checks and is ready to send.
#[derive(Debug, Clone)]
pub struct PendingVote {
    pub poll_id: Uuid,
    pub option_id: String,
    pub user: CurrentUser,
}

pub struct VoteSession {
    poll_id: Uuid,
    poll: Option<Poll>,
    not_found: bool,
    optimistic_voted: bool,
    submitting: bool,
    selected: Option<String>,
    identity: IdentityContext,
    markers: VotedMarkers,
}

impl VoteSession {
    pub fn new(poll_id: Uuid, identity: IdentityContext, markers: VotedMarkers) -> Self {
        Self {
            poll_id,
            poll: None,
            not_found: false,
            optimistic_voted: false,
            submitting: false,
            selected: None,
            identity,
            markers,
        }
    }

    pub fn poll_id(&self) -> Uuid {
        self.poll_id
    }

    pub fn poll(&self) -> Option<&Poll> {
        self.poll.as_ref()
    }

    /// Option this viewer picked during the session, if any.
    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn state(&self) -> ViewState {
        if self.not_found {
            return ViewState::NotFound;
        }
        if self.poll.is_none() {
            return ViewState::Loading;
        }
        if self.submitting {
            return ViewState::Submitting;
        }
        if self.has_voted() {
            ViewState::ViewingVoted
        } else {
            ViewState::ViewingUnvoted
        }
    }

    /// A signed-in viewer counts as voted when the poll's voter set holds
    /// them. This device's marker only applies when nobody is signed in.
    pub fn has_voted(&self) -> bool {
        if self.optimistic_voted {
            return true;
        }
        match self.identity.current() {
            Some(user) => self.poll.as_ref().is_some_and(|poll| poll.has_voted(user.user_id)),
            None => self.markers.has_voted(self.poll_id),
        }
    }

    /// Whether voting controls should be enabled.
    pub fn can_vote(&self) -> bool {
        self.identity.current().is_some() && self.state() == ViewState::ViewingUnvoted
    }

    /// Percentages are only shown once the viewer counts as voted.
    pub fn results(&self) -> Option<PollResults> {
        let poll = self.poll.as_ref()?;
        if !self.has_voted() {
            return None;
        }
        Some(PollResults::compute(poll, self.selected.as_deref()))
    }

    /// Address to hand to the clipboard.
    pub fn share_url(&self, base_url: &str) -> String {
        Route::Poll(self.poll_id).url(base_url)
    }

    /// Fold one subscription callback into the view.
    pub fn apply(&mut self, feed: PollFeed) -> ViewState {
        if self.not_found {
            return ViewState::NotFound;
        }

        match feed {
            PollFeed::Snapshot(poll) if poll.id == self.poll_id => {
                // Totals only grow; an older snapshot can arrive after a newer update.
                let stale = self
                    .poll
                    .as_ref()
                    .is_some_and(|current| current.total_votes() > poll.total_votes());
                if !stale {
                    self.poll = Some(poll);
                }
            }
            PollFeed::Snapshot(poll) => {
                warn!("Session for poll {} got a snapshot of poll {}", self.poll_id, poll.id);
            }
            PollFeed::NotFound => {
                debug!("Poll {} does not exist", self.poll_id);
                self.enter_not_found();
            }
            PollFeed::Failed(reason) => {
                warn!("Subscription to poll {} failed: {}", self.poll_id, reason);
                self.enter_not_found();
            }
        }

        self.state()
    }

    /// Wait for the next subscription callback and apply it. `None` once the
    /// feed has ended.
    pub async fn next_update(&mut self, subscription: &mut PollSubscription) -> Option<ViewState> {
        let feed = subscription.next().await?;
        Some(self.apply(feed))
    }

    fn enter_not_found(&mut self) {
        self.not_found = true;
        self.poll = None;
        self.submitting = false;
    }

    /// Check the preconditions and, if they hold, optimistically mark the
    /// viewer as voted and enter `Submitting`.
    pub fn begin_vote(&mut self, option_id: &str) -> Option<PendingVote> {
        let user = self.identity.current()?;

        if self.state() != ViewState::ViewingUnvoted {
            return None;
        }

        let poll = self.poll.as_ref()?;
        if poll.option(option_id).is_none() {
            warn!("Option {} is not part of poll {}", option_id, self.poll_id);
            return None;
        }

        self.optimistic_voted = true;
        self.submitting = true;
        self.selected = Some(option_id.to_string());

        Some(PendingVote {
            poll_id: self.poll_id,
            option_id: option_id.to_string(),
            user,
        })
    }

    /// Settle a vote started with `begin_vote`.
    pub fn finish_vote(&mut self, pending: PendingVote, result: Result<Poll, ClientError>) -> VoteOutcome {
        self.submitting = false;

        match result {
            Ok(stored) => {
                self.remember_vote();
                // The subscription may already have delivered something newer.
                let newer_local = self
                    .poll
                    .as_ref()
                    .is_some_and(|p| p.total_votes() > stored.total_votes());
                if !newer_local && !self.not_found {
                    self.poll = Some(stored);
                }
                info!("{} voted {} on poll {}", pending.user.username, pending.option_id, pending.poll_id);
                VoteOutcome::Recorded
            }
            Err(e) if e.is_already_voted() => {
                self.remember_vote();
                // We don't know which option the earlier vote picked.
                self.selected = None;
                debug!("Poll {} already had a vote from {}", pending.poll_id, pending.user.username);
                VoteOutcome::AlreadyRecorded
            }
            Err(e) => {
                warn!("Error voting on poll {}: {}", pending.poll_id, e);
                self.optimistic_voted = false;
                self.selected = None;
                VoteOutcome::RolledBack
            }
        }
    }

    fn remember_vote(&mut self) {
        self.optimistic_voted = true;
        if let Err(e) = self.markers.mark_voted(self.poll_id) {
            warn!("Failed to persist voted marker for poll {}: {}", self.poll_id, e);
        }
    }

    /// Full vote flow: local checks, optimistic mark, one request, settle.
    pub async fn vote<S: PollStore>(&mut self, store: &S, option_id: &str) -> VoteOutcome {
        let Some(pending) = self.begin_vote(option_id) else {
            return VoteOutcome::Ignored;
        };

        let result = store
            .cast_vote(pending.poll_id, &pending.option_id, &pending.user.token)
            .await;

        self.finish_vote(pending, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ballot_types::api::AuthResponse;
    use ballot_types::models::{NewPoll, PollOption};
    use std::collections::{BTreeSet, HashMap};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// In-memory backend with the same one-vote rule as the server.
    struct FakeStore {
        poll: Mutex<Poll>,
        users: Mutex<HashMap<String, Uuid>>,
        fail: AtomicBool,
        vote_calls: AtomicUsize,
    }

    impl FakeStore {
        fn new(poll: Poll) -> Self {
            Self {
                poll: Mutex::new(poll),
                users: Mutex::new(HashMap::new()),
                fail: AtomicBool::new(false),
                vote_calls: AtomicUsize::new(0),
            }
        }

        fn stored(&self) -> Poll {
            self.poll.lock().unwrap().clone()
        }
    }

    impl PollStore for FakeStore {
        async fn register(&self, username: &str, password: &str) -> Result<AuthResponse, ClientError> {
            self.login(username, password).await
        }

        async fn login(&self, username: &str, _password: &str) -> Result<AuthResponse, ClientError> {
            let mut users = self.users.lock().unwrap();
            let user_id = *users.entry(username.to_string()).or_insert_with(Uuid::new_v4);
            // the fake's tokens are just the user id
            Ok(AuthResponse {
                user_id,
                username: username.to_string(),
                token: user_id.to_string(),
            })
        }

        async fn create_poll(&self, _draft: &NewPoll, _token: Option<&str>) -> Result<Poll, ClientError> {
            Ok(self.stored())
        }

        async fn fetch_poll(&self, _poll_id: Uuid) -> Result<Option<Poll>, ClientError> {
            Ok(Some(self.stored()))
        }

        async fn cast_vote(&self, _poll_id: Uuid, option_id: &str, token: &str) -> Result<Poll, ClientError> {
            self.vote_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(ClientError::Gateway("storage unavailable".into()));
            }
            let voter: Uuid = token.parse().unwrap();
            let mut poll = self.poll.lock().unwrap();
            if poll.has_voted(voter) {
                return Err(ClientError::Status {
                    status: 409,
                    code: "ALREADY_VOTED".into(),
                    message: "you have already voted on this poll".into(),
                });
            }
            if poll.option(option_id).is_none() {
                return Err(ClientError::Status {
                    status: 400,
                    code: "INVALID_OPTION".into(),
                    message: option_id.to_string(),
                });
            }
            *poll = with_vote(&poll, option_id, voter);
            Ok(poll.clone())
        }

        async fn my_polls(&self, _token: &str) -> Result<Vec<Poll>, ClientError> {
            Ok(vec![self.stored()])
        }
    }

    /// The record as the server stores it after one vote.
    fn with_vote(poll: &Poll, option_id: &str, voter: Uuid) -> Poll {
        let mut next = poll.clone();
        for opt in next.options.iter_mut().filter(|o| o.id == option_id) {
            opt.votes += 1;
        }
        next.voted_uids.insert(voter);
        next
    }

    fn tea_or_coffee() -> Poll {
        Poll {
            id: Uuid::new_v4(),
            question: "Tea or coffee?".into(),
            options: vec![
                PollOption { id: "tea".into(), text: "Tea".into(), votes: 0 },
                PollOption { id: "coffee".into(), text: "Coffee".into(), votes: 0 },
            ],
            created_by: "anonymous".into(),
            created_at: chrono::Utc::now(),
            voted_uids: BTreeSet::new(),
        }
    }

    async fn signed_in(store: &FakeStore, username: &str) -> IdentityContext {
        let identity = IdentityContext::new();
        identity.sign_in(store, username, "pw").await.unwrap();
        identity
    }

    fn votes(poll: &Poll) -> Vec<u64> {
        poll.options.iter().map(|o| o.votes).collect()
    }

    #[tokio::test]
    async fn test_loading_until_first_snapshot() {
        let poll = tea_or_coffee();
        let mut session = VoteSession::new(poll.id, IdentityContext::new(), VotedMarkers::in_memory());

        assert_eq!(session.state(), ViewState::Loading);
        assert!(session.begin_vote("tea").is_none());

        assert_eq!(session.apply(PollFeed::Snapshot(poll)), ViewState::ViewingUnvoted);
    }

    #[tokio::test]
    async fn test_not_found_is_terminal() {
        let poll = tea_or_coffee();
        let mut session = VoteSession::new(poll.id, IdentityContext::new(), VotedMarkers::in_memory());

        assert_eq!(session.apply(PollFeed::NotFound), ViewState::NotFound);
        assert_eq!(session.apply(PollFeed::Snapshot(poll)), ViewState::NotFound);
        assert!(session.poll().is_none());
    }

    #[tokio::test]
    async fn test_subscription_failure_means_not_found() {
        let poll = tea_or_coffee();
        let mut session = VoteSession::new(poll.id, IdentityContext::new(), VotedMarkers::in_memory());
        session.apply(PollFeed::Snapshot(poll));

        assert_eq!(session.apply(PollFeed::Failed("reset".into())), ViewState::NotFound);
    }

    #[tokio::test]
    async fn test_tea_or_coffee_vote() {
        let poll = tea_or_coffee();
        let store = FakeStore::new(poll.clone());
        let identity = signed_in(&store, "alice").await;
        let markers = VotedMarkers::in_memory();
        let mut session = VoteSession::new(poll.id, identity.clone(), markers.clone());
        session.apply(PollFeed::Snapshot(poll.clone()));

        assert!(session.results().is_none());
        assert!(session.can_vote());

        assert_eq!(session.vote(&store, "coffee").await, VoteOutcome::Recorded);

        assert_eq!(session.state(), ViewState::ViewingVoted);
        assert!(markers.has_voted(poll.id));
        let stored = store.stored();
        assert_eq!(votes(&stored), vec![0, 1]);
        assert!(stored.has_voted(identity.current().unwrap().user_id));

        let results = session.results().unwrap();
        assert_eq!(results.rows[0].text, "Tea");
        assert_eq!(results.rows[0].percent, 0);
        assert_eq!(results.rows[1].text, "Coffee");
        assert_eq!(results.rows[1].percent, 100);
        assert!(results.rows[1].selected);
    }

    #[tokio::test]
    async fn test_rapid_repeat_votes_submit_once() {
        let poll = tea_or_coffee();
        let store = FakeStore::new(poll.clone());
        let identity = signed_in(&store, "bob").await;
        let mut session = VoteSession::new(poll.id, identity, VotedMarkers::in_memory());
        session.apply(PollFeed::Snapshot(poll));

        let pending = session.begin_vote("tea").unwrap();
        assert_eq!(session.state(), ViewState::Submitting);
        assert!(!session.can_vote());
        assert_eq!(pending.option_id, "tea");

        // clicks while the first request is in flight
        assert!(session.begin_vote("tea").is_none());
        assert!(session.begin_vote("coffee").is_none());

        let result = store.cast_vote(pending.poll_id, &pending.option_id, &pending.user.token).await;
        assert_eq!(session.finish_vote(pending, result), VoteOutcome::Recorded);

        // and after it settled
        assert_eq!(session.vote(&store, "coffee").await, VoteOutcome::Ignored);
        assert_eq!(store.vote_calls.load(Ordering::SeqCst), 1);
        assert_eq!(votes(&store.stored()), vec![1, 0]);
    }

    #[tokio::test]
    async fn test_failed_vote_rolls_back() {
        let poll = tea_or_coffee();
        let store = FakeStore::new(poll.clone());
        store.fail.store(true, Ordering::SeqCst);
        let identity = signed_in(&store, "carol").await;
        let markers = VotedMarkers::in_memory();
        let mut session = VoteSession::new(poll.id, identity, markers.clone());
        session.apply(PollFeed::Snapshot(poll.clone()));

        assert_eq!(session.vote(&store, "tea").await, VoteOutcome::RolledBack);
        assert_eq!(session.state(), ViewState::ViewingUnvoted);
        assert!(session.selected().is_none());
        assert!(!markers.has_voted(poll.id));

        // retry once storage is back
        store.fail.store(false, Ordering::SeqCst);
        assert_eq!(session.vote(&store, "tea").await, VoteOutcome::Recorded);
        assert_eq!(votes(&store.stored()), vec![1, 0]);
    }

    #[tokio::test]
    async fn test_signed_out_viewer_cannot_vote() {
        let poll = tea_or_coffee();
        let store = FakeStore::new(poll.clone());
        let mut session = VoteSession::new(poll.id, IdentityContext::new(), VotedMarkers::in_memory());
        session.apply(PollFeed::Snapshot(poll));

        assert!(!session.can_vote());
        assert_eq!(session.vote(&store, "tea").await, VoteOutcome::Ignored);
        assert_eq!(store.vote_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_server_voter_set_marks_voted() {
        let store = FakeStore::new(tea_or_coffee());
        let identity = signed_in(&store, "dave").await;
        let me = identity.current().unwrap().user_id;

        let mut poll = tea_or_coffee();
        poll = with_vote(&poll, "tea", me);

        let mut session = VoteSession::new(poll.id, identity, VotedMarkers::in_memory());
        assert_eq!(session.apply(PollFeed::Snapshot(poll)), ViewState::ViewingVoted);
        assert_eq!(session.vote(&store, "coffee").await, VoteOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_device_marker_without_session() {
        let poll = tea_or_coffee();
        let markers = VotedMarkers::in_memory();
        markers.mark_voted(poll.id).unwrap();

        let mut session = VoteSession::new(poll.id, IdentityContext::new(), markers);
        assert_eq!(session.apply(PollFeed::Snapshot(poll)), ViewState::ViewingVoted);
        assert!(session.results().is_some());
    }

    #[tokio::test]
    async fn test_device_marker_does_not_lock_out_other_users() {
        let poll = tea_or_coffee();
        let store = FakeStore::new(poll.clone());
        let markers = VotedMarkers::in_memory();
        // someone else voted on this device earlier
        markers.mark_voted(poll.id).unwrap();

        let identity = signed_in(&store, "grace").await;
        let mut session = VoteSession::new(poll.id, identity, markers);
        assert_eq!(session.apply(PollFeed::Snapshot(poll)), ViewState::ViewingUnvoted);
        assert!(session.can_vote());

        assert_eq!(session.vote(&store, "coffee").await, VoteOutcome::Recorded);
        assert_eq!(votes(&store.stored()), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_server_side_duplicate_counts_as_voted() {
        let poll = tea_or_coffee();
        let store = FakeStore::new(poll.clone());
        let identity = signed_in(&store, "erin").await;

        // voted from another device; this device has not seen the update yet
        let me = identity.current().unwrap().user_id;
        *store.poll.lock().unwrap() = with_vote(&poll, "tea", me);

        let mut session = VoteSession::new(poll.id, identity, VotedMarkers::in_memory());
        session.apply(PollFeed::Snapshot(poll));

        assert_eq!(session.vote(&store, "coffee").await, VoteOutcome::AlreadyRecorded);
        assert_eq!(session.state(), ViewState::ViewingVoted);
        assert_eq!(votes(&store.stored()), vec![1, 0]);
    }

    #[tokio::test]
    async fn test_live_updates_recompute_percentages() {
        let poll = tea_or_coffee();
        let markers = VotedMarkers::in_memory();
        markers.mark_voted(poll.id).unwrap();
        let mut session = VoteSession::new(poll.id, IdentityContext::new(), markers);
        session.apply(PollFeed::Snapshot(poll.clone()));

        let results = session.results().unwrap();
        assert!(results.rows.iter().all(|r| r.percent == 0));

        let mut updated = poll;
        updated.options[0].votes = 3;
        updated.options[1].votes = 1;
        session.apply(PollFeed::Snapshot(updated));

        let percents: Vec<u32> = session.results().unwrap().rows.iter().map(|r| r.percent).collect();
        assert_eq!(percents, vec![75, 25]);
    }

    #[tokio::test]
    async fn test_unknown_option_is_ignored() {
        let poll = tea_or_coffee();
        let store = FakeStore::new(poll.clone());
        let identity = signed_in(&store, "frank").await;
        let mut session = VoteSession::new(poll.id, identity, VotedMarkers::in_memory());
        session.apply(PollFeed::Snapshot(poll));

        assert_eq!(session.vote(&store, "juice").await, VoteOutcome::Ignored);
        assert_eq!(session.state(), ViewState::ViewingUnvoted);
    }

    #[test]
    fn test_share_url() {
        let id = Uuid::new_v4();
        let session = VoteSession::new(id, IdentityContext::new(), VotedMarkers::in_memory());
        assert_eq!(
            session.share_url("https://polls.example/"),
            format!("https://polls.example/poll/{}", id)
        );
    }
}
