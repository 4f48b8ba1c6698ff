/*
 *  widgets/rail.rs
 *
 *  wallboard - worth a glance
 *  (c) 2020-26 Stuart Hunter
 *
 *  Live departures for the home station, filtered by destination
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

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::required;
use crate::config::RailConfig;
use crate::error::FetchError;
use crate::http::get_json;
use crate::resource::Fetcher;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BoardPayload {
    location_name: Option<String>,
    #[serde(default)]
    train_services: Option<Vec<ServicePayload>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServicePayload {
    std: String,
    etd: Option<String>,
    platform: Option<String>,
    operator: Option<String>,
    #[serde(default)]
    destination: Vec<LocationPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocationPayload {
    location_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Departure {
    pub scheduled: String,
    /// "On time", "Delayed", "Cancelled" or an expected time
    pub expected: String,
    pub destination: String,
    pub platform: Option<String>,
    pub operator: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DepartureBoard {
    pub station: Option<String>,
    pub services: Vec<Departure>,
}

fn bound_for(destination: &str, keywords: &[String]) -> bool {
    if keywords.is_empty() {
        return true;
    }
    let destination = destination.to_lowercase();
    keywords.iter().any(|k| destination.contains(&k.to_lowercase()))
}

/// Keep the services heading somewhere in `keywords`.
///
/// An empty board and an empty filtered list are both reported as `NoData`.
fn select(payload: BoardPayload, keywords: &[String], label: &str) -> Result<DepartureBoard, FetchError> {
    let services = payload.train_services.unwrap_or_default();
    if services.is_empty() {
        return Err(FetchError::NoData("No departures found".into()));
    }

    let services: Vec<Departure> = services
        .into_iter()
        .filter_map(|s| {
            let destination = s.destination.into_iter().next()?.location_name;
            debug!("Train destination: {destination}");
            bound_for(&destination, keywords).then(|| Departure {
                expected: s.etd.unwrap_or_else(|| s.std.clone()),
                scheduled: s.std,
                destination,
                platform: s.platform,
                operator: s.operator,
            })
        })
        .collect();

    if services.is_empty() {
        return Err(FetchError::NoData(format!("No {label}-bound trains found")));
    }
    Ok(DepartureBoard { station: payload.location_name, services })
}

#[derive(Debug, Clone)]
pub struct RailFetcher {
    client: Client,
    config: RailConfig,
}

impl RailFetcher {
    pub fn new(client: Client, config: RailConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl Fetcher<DepartureBoard> for RailFetcher {
    async fn fetch(&self) -> Result<DepartureBoard, FetchError> {
        let station = required(self.config.station.as_deref(), "rail station")?;
        let api_key = required(self.config.api_key.as_deref(), "rail API key")?;

        let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), station);
        let request = self
            .client
            .get(url)
            .header("x-apikey", api_key)
            .query(&[
                ("numRows", self.config.rows),
                ("timeWindow", self.config.time_window),
                ("timeOffset", 0),
            ]);
        let payload: BoardPayload = get_json(request).await?;
        select(payload, &self.config.destinations, &self.config.destination_label)
    }
}
