//! Identity provider integration
//!
//! Login, signup and logout are redirects to an external OAuth 2.0 / OpenID
//! Connect provider. The authorization code flow uses PKCE; the only state
//! kept here is the per-browser session holding the pending login and the
//! signed-in [`SessionUser`].

use crate::config::IdentityConfig;
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;
use tower_sessions::Session;
use tracing::{debug, info, instrument};
use uuid::Uuid;

const USER_SESSION_KEY: &str = "user";
const PENDING_LOGIN_KEY: &str = "pending_login";
const CODE_VERIFIER_LEN: usize = 64;

/// Identity errors
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Invalid provider URL: {0}")]
    InvalidUrl(String),

    #[error("Network error: {0}")]
    Transport(String),

    #[error("Provider error {0}: {1}")]
    Provider(u16, String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Login state missing or mismatched")]
    StateMismatch,

    #[error("Session error: {0}")]
    Session(#[from] tower_sessions::session::Error),
}

/// The signed-in user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionUser {
    /// Provider subject identifier, used as the photo owner id
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    /// Avatar URL
    pub picture: Option<String>,
}

/// Which hosted page the provider should show
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginScreen {
    Login,
    Signup,
}

/// External identity provider
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// URL of the provider's hosted login or signup page
    fn authorize_url(&self, state: &str, code_challenge: &str, screen: LoginScreen) -> String;

    /// URL that ends the provider session and returns to the gallery
    fn logout_url(&self) -> String;

    /// Trade an authorization code for the user's profile
    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<SessionUser, IdentityError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    sub: String,
    name: Option<String>,
    nickname: Option<String>,
    email: Option<String>,
    picture: Option<String>,
}

impl From<UserInfo> for SessionUser {
    fn from(info: UserInfo) -> Self {
        let name = info
            .name
            .or(info.nickname)
            .or_else(|| info.email.clone())
            .unwrap_or_else(|| info.sub.clone());

        Self {
            id: info.sub,
            name,
            email: info.email,
            picture: info.picture,
        }
    }
}

/// OAuth 2.0 / OpenID Connect provider reached over HTTPS
pub struct OAuthIdentityProvider {
    http_client: reqwest::Client,
    base_url: Url,
    client_id: String,
    client_secret: Option<String>,
    callback_url: String,
    post_logout_return_url: String,
}

impl OAuthIdentityProvider {
    pub fn new(config: &IdentityConfig) -> Result<Self, IdentityError> {
        let base_url = Url::parse(&format!("https://{}", config.domain))
            .map_err(|e| IdentityError::InvalidUrl(e.to_string()))?;

        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| IdentityError::Transport(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            callback_url: config.callback_url.clone(),
            post_logout_return_url: config.post_logout_return_url.clone(),
        })
    }

    /// Point at a different provider origin (self-hosted providers, tests)
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self, IdentityError> {
        self.base_url =
            Url::parse(base_url).map_err(|e| IdentityError::InvalidUrl(e.to_string()))?;
        Ok(self)
    }

    fn endpoint(&self, path: &str) -> Url {
        let mut url = self.base_url.clone();
        url.set_path(path);
        url
    }

    async fn fetch_token(&self, code: &str, code_verifier: &str) -> Result<String, IdentityError> {
        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("client_id", self.client_id.as_str()),
            ("code", code),
            ("redirect_uri", self.callback_url.as_str()),
            ("code_verifier", code_verifier),
        ];
        if let Some(ref secret) = self.client_secret {
            form.push(("client_secret", secret.as_str()));
        }

        let response = self
            .http_client
            .post(self.endpoint("/oauth/token"))
            .form(&form)
            .send()
            .await
            .map_err(|e| IdentityError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IdentityError::Provider(status.as_u16(), body));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| IdentityError::Decode(e.to_string()))?;

        Ok(token.access_token)
    }

    async fn fetch_user_info(&self, access_token: &str) -> Result<UserInfo, IdentityError> {
        let response = self
            .http_client
            .get(self.endpoint("/userinfo"))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| IdentityError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IdentityError::Provider(status.as_u16(), body));
        }

        response
            .json()
            .await
            .map_err(|e| IdentityError::Decode(e.to_string()))
    }
}

#[async_trait]
impl IdentityProvider for OAuthIdentityProvider {
    fn authorize_url(&self, state: &str, code_challenge: &str, screen: LoginScreen) -> String {
        let mut url = self.endpoint("/authorize");
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.client_id)
                .append_pair("redirect_uri", &self.callback_url)
                .append_pair("scope", "openid profile email")
                .append_pair("state", state)
                .append_pair("code_challenge", code_challenge)
                .append_pair("code_challenge_method", "S256");
            if screen == LoginScreen::Signup {
                query.append_pair("screen_hint", "signup");
            }
        }
        url.to_string()
    }

    fn logout_url(&self) -> String {
        let mut url = self.endpoint("/v2/logout");
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("returnTo", &self.post_logout_return_url);
        url.to_string()
    }

    #[instrument(skip_all)]
    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<SessionUser, IdentityError> {
        let access_token = self.fetch_token(code, code_verifier).await?;
        let info = self.fetch_user_info(&access_token).await?;
        Ok(info.into())
    }
}

/// State parked in the session between the login redirect and the callback
#[derive(Debug, Serialize, Deserialize)]
struct PendingLogin {
    state: String,
    code_verifier: String,
}

/// Per-request view of who is signed in, backed by the browser session
#[derive(Clone)]
pub struct SessionAdapter {
    provider: Arc<dyn IdentityProvider>,
}

impl SessionAdapter {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self { provider }
    }

    /// The signed-in user, if any
    pub async fn current_user(&self, session: &Session) -> Result<Option<SessionUser>, IdentityError> {
        Ok(session.get::<SessionUser>(USER_SESSION_KEY).await?)
    }

    /// Start a login; returns the provider URL to redirect to
    pub async fn begin_login(
        &self,
        session: &Session,
        screen: LoginScreen,
    ) -> Result<String, IdentityError> {
        let pending = PendingLogin {
            state: Uuid::new_v4().simple().to_string(),
            code_verifier: code_verifier(),
        };
        let challenge = code_challenge(&pending.code_verifier);
        let url = self.provider.authorize_url(&pending.state, &challenge, screen);

        session.insert(PENDING_LOGIN_KEY, &pending).await?;

        debug!(screen = ?screen, "Redirecting to identity provider");
        Ok(url)
    }

    /// Finish a login from the provider callback
    pub async fn complete_login(
        &self,
        session: &Session,
        code: &str,
        state: &str,
    ) -> Result<SessionUser, IdentityError> {
        let pending = session
            .remove::<PendingLogin>(PENDING_LOGIN_KEY)
            .await?
            .filter(|pending| pending.state == state)
            .ok_or(IdentityError::StateMismatch)?;

        let user = self
            .provider
            .exchange_code(code, &pending.code_verifier)
            .await?;

        session.cycle_id().await?;
        session.insert(USER_SESSION_KEY, &user).await?;

        info!(user_id = %user.id, "User signed in");
        Ok(user)
    }

    /// Clear the session; returns the provider logout URL
    pub async fn logout(&self, session: &Session) -> Result<String, IdentityError> {
        session.flush().await?;
        Ok(self.provider.logout_url())
    }
}

fn code_verifier() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(CODE_VERIFIER_LEN)
        .map(char::from)
        .collect()
}

/// PKCE S256 challenge for a verifier
fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}
