/*
 *  widgets/forecast.rs
 *
 *  wallboard - worth a glance
 *  (c) 2020-26 Stuart Hunter
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
use chrono::{DateTime, Local, TimeZone};
use serde::Serialize;
use serde_json::Value;
use std::fmt::Display;

use super::weather::OneCall;
use super::{field, number, text};
use crate::error::FetchError;
use crate::resource::Fetcher;

/// Every third hour, four slots: roughly the next 12 hours.
const HOURLY_STEP: usize = 3;
const HOURLY_SLOTS: usize = 4;
const DAILY_SLOTS: usize = 7;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourlyForecast {
    pub time: String,
    pub temperature: i64,
    pub icon: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyForecast {
    pub day: String,
    pub temperature: i64,
    pub icon: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Forecast {
    pub hourly: Vec<HourlyForecast>,
    pub daily: Vec<DailyForecast>,
}

fn local_time<Tz: TimeZone>(entry: &Value, tz: &Tz) -> Result<DateTime<Tz>, FetchError> {
    let dt = field(entry, "/dt")?
        .as_i64()
        .ok_or_else(|| FetchError::network("malformed payload: /dt is not a timestamp"))?;
    tz.timestamp_opt(dt, 0)
        .single()
        .ok_or_else(|| FetchError::network(format!("malformed payload: bad timestamp {dt}")))
}

fn entries<'a>(v: &'a Value, key: &str) -> Result<&'a Vec<Value>, FetchError> {
    field(v, key)?
        .as_array()
        .ok_or_else(|| FetchError::network(format!("malformed payload: {key} is not a list")))
}

/// Shape a One Call payload into the hourly strip and the week ahead,
/// rendering times in `tz`.
pub fn parse_forecast<Tz>(v: &Value, tz: &Tz) -> Result<Forecast, FetchError>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let hourly = entries(v, "/hourly")?
        .iter()
        .step_by(HOURLY_STEP)
        .take(HOURLY_SLOTS)
        .map(|hour| {
            Ok(HourlyForecast {
                time: local_time(hour, tz)?.format("%H:%M").to_string(),
                temperature: number(hour, "/temp")?.round() as i64,
                icon: text(hour, "/weather/0/icon")?,
                description: text(hour, "/weather/0/description")?,
            })
        })
        .collect::<Result<Vec<_>, FetchError>>()?;

    // first entry is today
    let daily = entries(v, "/daily")?
        .iter()
        .skip(1)
        .take(DAILY_SLOTS)
        .map(|day| {
            Ok(DailyForecast {
                day: local_time(day, tz)?.format("%a").to_string(),
                temperature: number(day, "/temp/max")?.round() as i64,
                icon: text(day, "/weather/0/icon")?,
                description: text(day, "/weather/0/description")?,
            })
        })
        .collect::<Result<Vec<_>, FetchError>>()?;

    Ok(Forecast { hourly, daily })
}

#[derive(Debug, Clone)]
pub struct ForecastFetcher {
    source: OneCall,
}

impl ForecastFetcher {
    pub fn new(source: OneCall) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Fetcher<Forecast> for ForecastFetcher {
    async fn fetch(&self) -> Result<Forecast, FetchError> {
        let payload = self.source.fetch().await?;
        parse_forecast(&payload, &Local)
    }
}
