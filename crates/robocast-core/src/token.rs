use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::RobocastError;
use crate::events::ParticipantId;

/// Role the session credential is minted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenRole {
    /// Publisher.
    Host,
    /// Subscriber only.
    Viewer,
}

impl TokenRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenRole::Host => "host",
            TokenRole::Viewer => "viewer",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRequest {
    pub channel_name: String,
    pub participant_id: ParticipantId,
    pub role: TokenRole,
}

impl TokenRequest {
    /// Build a request, validating the channel name first.
    pub fn new(
        channel_name: &str,
        participant_id: ParticipantId,
        role: TokenRole,
    ) -> Result<Self, RobocastError> {
        Ok(Self {
            channel_name: validate_channel_name(channel_name)?,
            participant_id,
            role,
        })
    }
}

/// Credential returned by the token service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    pub token: String,
    pub expires_in_seconds: u64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(rename = "expiresIn", default)]
    expires_in: Option<u64>,
}

/// Mints session credentials for a channel.
#[async_trait]
pub trait TokenService: Send + Sync {
    async fn request_token(&self, request: &TokenRequest) -> Result<SessionToken, RobocastError>;
}

/// Token service reached over HTTP:
/// `GET {base}?channelName=..&uid=..&role=..` returning `{ token, expiresIn }`.
pub struct HttpTokenService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTokenService {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RobocastError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RobocastError::Http(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn token_url(&self, request: &TokenRequest) -> String {
        format!(
            "{}?channelName={}&uid={}&role={}",
            self.base_url,
            urlencoding::encode(&request.channel_name),
            request.participant_id,
            request.role.as_str()
        )
    }
}

#[async_trait]
impl TokenService for HttpTokenService {
    async fn request_token(&self, request: &TokenRequest) -> Result<SessionToken, RobocastError> {
        let url = self.token_url(request);
        tracing::info!(
            channel = %request.channel_name,
            uid = %request.participant_id,
            role = request.role.as_str(),
            "requesting session token"
        );

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| RobocastError::CredentialUnavailable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(RobocastError::CredentialUnavailable(format!(
                "token server returned status {}",
                resp.status()
            )));
        }

        let body: TokenResponse = resp
            .json()
            .await
            .map_err(|e| RobocastError::CredentialUnavailable(format!("invalid token response: {e}")))?;

        parse_token_response(body)
    }
}

fn parse_token_response(body: TokenResponse) -> Result<SessionToken, RobocastError> {
    match body.token {
        Some(token) if !token.is_empty() => Ok(SessionToken {
            token,
            expires_in_seconds: body.expires_in.unwrap_or(0),
        }),
        _ => Err(RobocastError::CredentialUnavailable(
            "token not found in response".into(),
        )),
    }
}

/// Channel names: ASCII letters, digits, `-` and `_`, at most 64 bytes.
pub fn validate_channel_name(input: &str) -> Result<String, RobocastError> {
    let candidate = input.trim();
    let re = regex::Regex::new(r"^[A-Za-z0-9_-]{1,64}$")
        .map_err(|e| RobocastError::InvalidRoom(e.to_string()))?;
    if re.is_match(candidate) {
        Ok(candidate.to_string())
    } else {
        Err(RobocastError::InvalidRoom(format!(
            "invalid channel name: '{candidate}'"
        )))
    }
}
