use chrono::Utc;
use reqwest::{RequestBuilder, Response};
use tracing::debug;

use parley_types::Session;
use parley_types::api::{ErrorBody, PasswordCredentials, RefreshRequest, SignUpResponse, TokenResponse};

use super::Inner;
use crate::BackendError;

impl Inner {
    /// Attach the key headers every request needs.
    pub(super) fn authorized(&self, req: RequestBuilder, bearer: &str) -> RequestBuilder {
        req.header("apikey", &self.config.anon_key)
            .header("Authorization", format!("Bearer {}", bearer))
    }

    pub(super) async fn password_grant(&self, email: &str, password: &str) -> Result<Session, BackendError> {
        let url = self.config.endpoint("auth/v1/token")?;
        let req = self
            .http
            .post(url)
            .query(&[("grant_type", "password")])
            .json(&PasswordCredentials { email, password });

        let resp = check(self.authorized(req, &self.config.anon_key).send().await?).await?;
        let body: TokenResponse = resp.json().await?;
        Ok(body.into_session(Utc::now()))
    }

    pub(super) async fn refresh_grant(&self, refresh_token: &str) -> Result<Session, BackendError> {
        let url = self.config.endpoint("auth/v1/token")?;
        let req = self
            .http
            .post(url)
            .query(&[("grant_type", "refresh_token")])
            .json(&RefreshRequest { refresh_token });

        let resp = check(self.authorized(req, &self.config.anon_key).send().await?).await?;
        let body: TokenResponse = resp.json().await?;
        Ok(body.into_session(Utc::now()))
    }

    pub(super) async fn sign_up(&self, email: &str, password: &str) -> Result<Option<Session>, BackendError> {
        let url = self.config.endpoint("auth/v1/signup")?;
        let req = self
            .http
            .post(url)
            .json(&PasswordCredentials { email, password });

        let resp = check(self.authorized(req, &self.config.anon_key).send().await?).await?;
        match resp.json::<SignUpResponse>().await? {
            SignUpResponse::Session(body) => Ok(Some(body.into_session(Utc::now()))),
            SignUpResponse::Pending(user) => {
                debug!("Account {} created, confirmation pending", user.id);
                Ok(None)
            }
        }
    }

    pub(super) async fn logout(&self, access_token: &str) -> Result<(), BackendError> {
        let url = self.config.endpoint("auth/v1/logout")?;
        let req = self.http.post(url);
        check(self.authorized(req, access_token).send().await?).await?;
        Ok(())
    }
}

/// Turn a non-2xx response into `BackendError::Status`, keeping the
/// server's own message when the body has one.
pub(super) async fn check(resp: Response) -> Result<Response, BackendError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let text = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .ok()
        .and_then(|body| body.message().map(str::to_string))
        .unwrap_or_else(|| text.chars().take(200).collect());

    if status.as_u16() == 400 && message.to_lowercase().contains("invalid login credentials") {
        return Err(BackendError::InvalidCredentials);
    }

    Err(BackendError::Status {
        status: status.as_u16(),
        message,
    })
}
