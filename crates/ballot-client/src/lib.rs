//! Viewer-side half of Ballot: who is signed in, what this device already
//! voted on, poll authoring, and the per-poll voting session.

pub mod authoring;
pub mod error;
pub mod history;
pub mod identity;
pub mod markers;
pub mod nav;
pub mod session;
pub mod store;
pub mod subscription;

pub use error::ClientError;
pub use identity::{CurrentUser, IdentityContext};
pub use markers::VotedMarkers;
pub use session::{ViewState, VoteOutcome, VoteSession};
pub use store::{HttpStore, PollStore};
pub use subscription::{PollFeed, PollSubscription};
