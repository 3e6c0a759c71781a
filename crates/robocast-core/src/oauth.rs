use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};

use crate::errors::RobocastError;

const GOOGLE_AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const OAUTH_SCOPE: &str = "openid email profile";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoogleUser {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
}

/// Tokens and profile returned by the exchange endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthSession {
    pub access_token: String,
    #[serde(default)]
    pub id_token: Option<String>,
    pub user: GoogleUser,
}

impl OAuthSession {
    /// Name to show for the signed-in user: profile name, else email.
    pub fn display_name(&self) -> Option<String> {
        [self.user.name.as_deref(), self.user.email.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|name| !name.is_empty())
            .map(str::to_string)
    }
}

#[derive(Debug, Serialize)]
struct ExchangeRequest<'a> {
    code: &'a str,
    redirect_uri: &'a str,
}

/// Query parameters delivered to the OAuth redirect target.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// Random anti-forgery value carried through the authorization round-trip.
pub fn generate_state() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect()
}

/// Google consent-screen URL for the authorization-code flow.
pub fn authorization_url(client_id: &str, redirect_uri: &str, state: &str) -> String {
    format!(
        "{GOOGLE_AUTH_ENDPOINT}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}&access_type=offline&prompt=consent",
        urlencoding::encode(client_id),
        urlencoding::encode(redirect_uri),
        urlencoding::encode(OAUTH_SCOPE),
        urlencoding::encode(state),
    )
}

/// Validate the redirect and return the authorization code.
pub fn verify_callback(params: &CallbackParams, expected_state: &str) -> Result<String, RobocastError> {
    if let Some(error) = &params.error {
        return Err(RobocastError::Auth(format!("provider returned error: {error}")));
    }
    let (Some(code), Some(state)) = (&params.code, &params.state) else {
        return Err(RobocastError::Auth("missing OAuth parameters".into()));
    };
    if state != expected_state {
        return Err(RobocastError::Auth("OAuth state mismatch".into()));
    }
    Ok(code.clone())
}

/// Client for the backend endpoint that trades an authorization code for
/// tokens and the user's profile.
pub struct OAuthClient {
    client: reqwest::Client,
    exchange_url: String,
}

impl OAuthClient {
    pub fn new(exchange_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            exchange_url: exchange_url.to_string(),
        }
    }

    pub async fn exchange(&self, code: &str, redirect_uri: &str) -> Result<OAuthSession, RobocastError> {
        if code.is_empty() || redirect_uri.is_empty() {
            return Err(RobocastError::Auth("missing code or redirect_uri".into()));
        }

        tracing::info!(endpoint = %self.exchange_url, "exchanging OAuth code");

        let resp = self
            .client
            .post(&self.exchange_url)
            .json(&ExchangeRequest { code, redirect_uri })
            .send()
            .await
            .map_err(|e| RobocastError::Auth(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(RobocastError::Auth(format!(
                "exchange endpoint returned status {}",
                resp.status()
            )));
        }

        resp.json()
            .await
            .map_err(|e| RobocastError::Auth(format!("invalid exchange response: {e}")))
    }
}
