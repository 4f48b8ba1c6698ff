/*
 *  credential/provider.rs
 *
 *  wallboard - worth a glance
 *	(c) 2020-26 Stuart Hunter
 *
 *	This program is free software: you can redistribute it and/or modify
 *	it under the terms of the GNU General Public License as published by
 *	the Free Software Foundation, either version 3 of the License, or
 *	(at your option) any later version.
 *
 *	This program is distributed in the hope that it will be useful,
 *	but WITHOUT ANY WARRANTY; without even the implied warranty of
 *	MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *	GNU General Public License for more details.
 *
 *	See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *	Public License.
 *
 */
use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::error::AuthError;
use crate::http::client_with_timeout;

pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Why the manager is asking for a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRequest {
    SignIn,
    Renewal,
}

/// What a successful authorization hands back.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthGrant {
    pub access_token: String,
    #[serde(rename = "expires_in")]
    pub expires_in_seconds: u64,
}

/// The external authorization flow (consent UI, token endpoint, ...).
#[async_trait]
pub trait AuthorizationProvider: Send + Sync {
    async fn authorize(&self, request: AuthRequest) -> Result<AuthGrant, AuthError>;
}

/// Stand-in when the photo client is not set up; every flow fails with
/// `NotConfigured`.
#[derive(Debug, Clone)]
pub struct Unconfigured {
    missing: String,
}

impl Unconfigured {
    pub fn new(missing: impl Into<String>) -> Self {
        Self { missing: missing.into() }
    }
}

#[async_trait]
impl AuthorizationProvider for Unconfigured {
    async fn authorize(&self, _request: AuthRequest) -> Result<AuthGrant, AuthError> {
        Err(AuthError::NotConfigured(self.missing.clone()))
    }
}

#[derive(Debug, Deserialize)]
struct TokenErrorBody {
    error: String,
    error_description: Option<String>,
}

/// OAuth2 refresh-token grant against a token endpoint.
///
/// Exchanges a provisioned long-lived refresh token for short-lived access
/// tokens, for both sign-in and renewal.
#[derive(Debug, Clone)]
pub struct RefreshTokenGrant {
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    refresh_token: String,
}

impl RefreshTokenGrant {
    pub fn new(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Result<Self, AuthError> {
        let client_id = client_id.into();
        let refresh_token = refresh_token.into();
        if client_id.is_empty() {
            return Err(AuthError::NotConfigured("client_id".into()));
        }
        if refresh_token.is_empty() {
            return Err(AuthError::NotConfigured("refresh_token".into()));
        }

        let client = client_with_timeout(Duration::from_secs(15))?;

        Ok(Self {
            client,
            token_url: token_url.into(),
            client_id,
            client_secret: client_secret.into(),
            refresh_token,
        })
    }
}

#[async_trait]
impl AuthorizationProvider for RefreshTokenGrant {
    async fn authorize(&self, request: AuthRequest) -> Result<AuthGrant, AuthError> {
        debug!("Requesting access token ({:?}) from {}", request, self.token_url);
        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", self.refresh_token.as_str()),
        ];
        let response = self.client.post(&self.token_url).form(&params).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let reason = match serde_json::from_str::<TokenErrorBody>(&body) {
                Ok(e) => match e.error_description {
                    Some(d) => format!("{} ({}): {}", e.error, status.as_u16(), d),
                    None => format!("{} ({})", e.error, status.as_u16()),
                },
                Err(_) => format!("token endpoint returned {}", status.as_u16()),
            };
            return Err(AuthError::Flow(reason));
        }

        let grant: AuthGrant = serde_json::from_str(&body)
            .map_err(|e| AuthError::Flow(format!("malformed token response: {e}")))?;
        if grant.access_token.is_empty() {
            return Err(AuthError::Flow("token response carried no access_token".into()));
        }
        Ok(grant)
    }
}
