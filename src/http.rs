/*
 *  http.rs
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
use log::debug;
use reqwest::{header, Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

use crate::error::FetchError;

pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), " v", env!("CARGO_PKG_VERSION"));

/// JSON client with our user agent and a whole-request `timeout`.
pub fn client_with_timeout(timeout: Duration) -> reqwest::Result<Client> {
    let mut headers = header::HeaderMap::new();
    headers.insert("User-Agent", header::HeaderValue::from_static(USER_AGENT));
    headers.insert("Accept", header::HeaderValue::from_static("application/json"));

    Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .default_headers(headers)
        .timeout(timeout)
        .build()
}

/// Shared client for widget fetches.
pub fn build_client() -> Result<Client, FetchError> {
    Ok(client_with_timeout(Duration::from_secs(20))?)
}

/// Pull a human readable message out of an API error body.
fn error_message(body: &str) -> Option<String> {
    let v: Value = serde_json::from_str(body).ok()?;
    v.get("message")
        .and_then(Value::as_str)
        .or_else(|| v.pointer("/error/message").and_then(Value::as_str))
        .or_else(|| v.get("error").and_then(Value::as_str))
        .map(str::to_string)
}

/// Send a request and decode a JSON body, classifying failures.
pub async fn get_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, FetchError> {
    let response = request.send().await?;
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        let message = error_message(&body)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
        debug!("HTTP {} -> {}", status.as_u16(), message);
        return Err(FetchError::from_status(status.as_u16(), message));
    }
    Ok(serde_json::from_str(&body)?)
}
