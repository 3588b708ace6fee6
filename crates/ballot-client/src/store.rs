use std::future::Future;

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;
use uuid::Uuid;

use ballot_types::api::{
    AuthResponse, CastVoteRequest, CreatePollRequest, CreatePollResponse, ErrorResponse,
    LoginRequest, RegisterRequest,
};
use ballot_types::models::{NewPoll, Poll};

use crate::error::ClientError;
use crate::subscription::{self, PollSubscription};

/// Storage and identity operations a viewer needs from the backend.
pub trait PollStore: Send + Sync {
    fn register(
        &self,
        username: &str,
        password: &str,
    ) -> impl Future<Output = Result<AuthResponse, ClientError>> + Send;

    fn login(
        &self,
        username: &str,
        password: &str,
    ) -> impl Future<Output = Result<AuthResponse, ClientError>> + Send;

    /// `token` is `None` for anonymous authoring.
    fn create_poll(
        &self,
        draft: &NewPoll,
        token: Option<&str>,
    ) -> impl Future<Output = Result<Poll, ClientError>> + Send;

    fn fetch_poll(&self, poll_id: Uuid) -> impl Future<Output = Result<Option<Poll>, ClientError>> + Send;

    fn cast_vote(
        &self,
        poll_id: Uuid,
        option_id: &str,
        token: &str,
    ) -> impl Future<Output = Result<Poll, ClientError>> + Send;

    fn my_polls(&self, token: &str) -> impl Future<Output = Result<Vec<Poll>, ClientError>> + Send;
}

/// `PollStore` over the REST API, plus live subscriptions over the gateway.
#[derive(Clone)]
pub struct HttpStore {
    base_url: String,
    client: reqwest::Client,
}

impl HttpStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// WebSocket address of the gateway on the same host.
    pub fn gateway_url(&self) -> String {
        let ws_base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            self.base_url.clone()
        };
        format!("{}/gateway", ws_base)
    }

    /// Open a live feed for one poll. Dropping it closes the connection.
    pub async fn subscribe(&self, poll_id: Uuid) -> Result<PollSubscription, ClientError> {
        subscription::subscribe(&self.gateway_url(), poll_id).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ClientError> {
        let response = check(request.send().await?).await?;
        Ok(response.json().await?)
    }
}

/// Turn non-2xx responses into `ClientError::Status`.
async fn check(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let (code, message) = match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(err) => (err.error, err.message),
        Err(_) => (status.as_str().to_string(), body),
    };

    debug!("Request failed with {}: {} {}", status, code, message);
    Err(ClientError::Status {
        status: status.as_u16(),
        code,
        message,
    })
}

impl PollStore for HttpStore {
    async fn register(&self, username: &str, password: &str) -> Result<AuthResponse, ClientError> {
        let body = RegisterRequest {
            username: username.to_string(),
            password: password.to_string(),
        };
        self.send_json(self.client.post(self.url("/auth/register")).json(&body))
            .await
    }

    async fn login(&self, username: &str, password: &str) -> Result<AuthResponse, ClientError> {
        let body = LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        };
        self.send_json(self.client.post(self.url("/auth/login")).json(&body))
            .await
    }

    async fn create_poll(&self, draft: &NewPoll, token: Option<&str>) -> Result<Poll, ClientError> {
        let body = CreatePollRequest {
            question: draft.question.clone(),
            options: draft.options.clone(),
        };
        let mut request = self.client.post(self.url("/polls")).json(&body);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        let created: CreatePollResponse = self.send_json(request).await?;
        Ok(created.poll)
    }

    async fn fetch_poll(&self, poll_id: Uuid) -> Result<Option<Poll>, ClientError> {
        let response = self
            .client
            .get(self.url(&format!("/polls/{}", poll_id)))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(check(response).await?.json().await?))
    }

    async fn cast_vote(&self, poll_id: Uuid, option_id: &str, token: &str) -> Result<Poll, ClientError> {
        let body = CastVoteRequest {
            option_id: option_id.to_string(),
        };
        self.send_json(
            self.client
                .post(self.url(&format!("/polls/{}/vote", poll_id)))
                .bearer_auth(token)
                .json(&body),
        )
        .await
    }

    async fn my_polls(&self, token: &str) -> Result<Vec<Poll>, ClientError> {
        self.send_json(self.client.get(self.url("/polls/mine")).bearer_auth(token))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_url() {
        assert_eq!(HttpStore::new("http://localhost:3000/").gateway_url(), "ws://localhost:3000/gateway");
        assert_eq!(HttpStore::new("https://polls.example").gateway_url(), "wss://polls.example/gateway");
    }
}
