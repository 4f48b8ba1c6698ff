/*
 *  error.rs
 *
 *  wallboard - worth a glance
 *  (c) 2020-26 Stuart Hunter
 *
 *  Error taxonomy shared by every widget and the credential manager
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use serde::Serialize;
use thiserror::Error;

/// Coarse classification used for retry policy and for what the board shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing required parameters. Fatal to the widget, never retried.
    Config,
    /// Transient. Retried on the next scheduled interval.
    Network,
    /// 401/403 or no usable credential. Needs re-authentication.
    Authorization,
    /// Sign-in or renewal itself failed. Needs an explicit sign-in.
    AuthorizationFlow,
}

/// Error produced by a widget fetch.
///
/// Holds strings rather than source errors so it can live inside a cloned
/// `FetchState` snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("configuration missing: {0}")]
    Config(String),

    #[error("network error: {message}{}", status_suffix(.status))]
    Network { message: String, status: Option<u16> },

    #[error("{0}")]
    NoData(String),

    #[error("unauthorized ({status}): {message}")]
    Unauthorized { status: u16, message: String },

    #[error("needs re-authentication")]
    SignedOut,
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({s})")).unwrap_or_default()
}

impl FetchError {
    /// Classify an HTTP status; 401 and 403 are authorization failures.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        match status {
            401 | 403 => FetchError::Unauthorized { status, message: message.into() },
            _ => FetchError::Network { message: message.into(), status: Some(status) },
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        FetchError::Network { message: message.into(), status: None }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::Config(_) => ErrorKind::Config,
            FetchError::Network { .. } | FetchError::NoData(_) => ErrorKind::Network,
            FetchError::Unauthorized { .. } | FetchError::SignedOut => ErrorKind::Authorization,
        }
    }

    /// True when a downstream API rejected the bearer credential.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, FetchError::Unauthorized { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Network { status, .. } => *status,
            FetchError::Unauthorized { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => FetchError::from_status(status.as_u16(), err.to_string()),
            None => FetchError::network(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::network(format!("malformed payload: {err}"))
    }
}

/// Errors from the credential lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("authorization not configured: {0}")]
    NotConfigured(String),

    #[error("authorization flow failed: {0}")]
    Flow(String),

    #[error("an authorization flow is already in progress")]
    InProgress,

    #[error("authorization result discarded, credential was revoked meanwhile")]
    Superseded,
}

impl AuthError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::NotConfigured(_) => ErrorKind::Config,
            _ => ErrorKind::AuthorizationFlow,
        }
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        AuthError::Flow(err.to_string())
    }
}
