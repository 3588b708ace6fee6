use std::fmt;

use uuid::Uuid;

use crate::identity::CurrentUser;

/// Addressable views.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Poll authoring
    Home,
    Poll(Uuid),
    MyPolls,
}

impl Route {
    pub fn path(&self) -> String {
        match self {
            Self::Home => "/".to_string(),
            Self::Poll(id) => format!("/poll/{}", id),
            Self::MyPolls => "/my-polls".to_string(),
        }
    }

    /// Absolute address under `base_url`, as shared with other people.
    pub fn url(&self, base_url: &str) -> String {
        format!("{}{}", base_url.trim_end_matches('/'), self.path())
    }

    /// Match a path (query and fragment ignored). Unknown paths yield `None`.
    pub fn parse(path: &str) -> Option<Self> {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let trimmed = path.trim_end_matches('/');

        match trimmed {
            "" => Some(Self::Home),
            "/my-polls" => Some(Self::MyPolls),
            _ => {
                let id = trimmed.strip_prefix("/poll/")?;
                Uuid::parse_str(id).ok().map(Self::Poll)
            }
        }
    }

    /// The view actually shown for this route. My-polls needs a signed-in
    /// user and falls back to home otherwise.
    pub fn resolve(self, user: Option<&CurrentUser>) -> Self {
        match (self, user) {
            (Self::MyPolls, None) => Self::Home,
            (route, _) => route,
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}
