/*
 *  widgets/weather.rs
 *
 *  wallboard - worth a glance
 *  (c) 2020-26 Stuart Hunter
 *
 *  Current conditions from the OpenWeather One Call API
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
use serde::Serialize;
use serde_json::Value;

use super::{number, required, text};
use crate::config::WeatherConfig;
use crate::error::FetchError;
use crate::http::get_json;
use crate::resource::Fetcher;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentWeather {
    pub temperature: i64,
    pub humidity: i64,
    pub wind_speed: i64,
    pub description: String,
    pub icon: String,
}

impl CurrentWeather {
    pub fn icon_url(&self) -> String {
        format!("https://openweathermap.org/img/wn/{}@2x.png", self.icon)
    }
}

/// One Call request shared by the current-conditions and forecast panels.
#[derive(Debug, Clone)]
pub struct OneCall {
    client: Client,
    config: WeatherConfig,
}

impl OneCall {
    pub fn new(client: Client, config: WeatherConfig) -> Self {
        Self { client, config }
    }

    pub async fn fetch(&self) -> Result<Value, FetchError> {
        const MISSING: &str = "weather API configuration";
        let api_key = required(self.config.api_key.as_deref(), MISSING)?;
        let (lat, lon) = match (self.config.lat, self.config.lon) {
            (Some(lat), Some(lon)) => (lat, lon),
            _ => return Err(FetchError::Config(MISSING.into())),
        };

        debug!("One Call for {lat:.4},{lon:.4}");
        let request = self.client.get(&self.config.base_url).query(&[
            ("lat", lat.to_string()),
            ("lon", lon.to_string()),
            ("appid", api_key.to_string()),
            ("units", self.config.units.clone()),
            ("exclude", "minutely,alerts".to_string()),
        ]);
        get_json(request).await
    }
}

pub fn parse_current(v: &Value) -> Result<CurrentWeather, FetchError> {
    Ok(CurrentWeather {
        temperature: number(v, "/current/temp")?.round() as i64,
        humidity: number(v, "/current/humidity")?.round() as i64,
        wind_speed: number(v, "/current/wind_speed")?.round() as i64,
        description: text(v, "/current/weather/0/description")?,
        icon: text(v, "/current/weather/0/icon")?,
    })
}

#[derive(Debug, Clone)]
pub struct WeatherFetcher {
    source: OneCall,
}

impl WeatherFetcher {
    pub fn new(source: OneCall) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Fetcher<CurrentWeather> for WeatherFetcher {
    async fn fetch(&self) -> Result<CurrentWeather, FetchError> {
        let payload = self.source.fetch().await?;
        parse_current(&payload)
    }
}
