/*
 *  widgets/mod.rs
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

//! Data sources behind each panel of the board.

pub mod clock;
pub mod forecast;
pub mod headlines;
pub mod photos;
pub mod rail;
pub mod weather;

pub use clock::{ClockFace, ClockTicker};
pub use forecast::{DailyForecast, Forecast, ForecastFetcher, HourlyForecast};
pub use headlines::{Headline, HeadlinesFetcher};
pub use photos::{Photo, PhotoFetcher, PhotoSettings, PhotoWidget};
pub use rail::{Departure, DepartureBoard, RailFetcher};
pub use weather::{CurrentWeather, OneCall, WeatherFetcher};

use serde_json::Value;

use crate::error::FetchError;

/// A configured, non-blank setting, or a config error naming `what`.
pub(crate) fn required<'a>(value: Option<&'a str>, what: &str) -> Result<&'a str, FetchError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(FetchError::Config(what.to_string())),
    }
}

/// Field lookup by JSON pointer, reporting which field was absent.
pub(crate) fn field<'a>(v: &'a Value, pointer: &str) -> Result<&'a Value, FetchError> {
    v.pointer(pointer)
        .filter(|f| !f.is_null())
        .ok_or_else(|| FetchError::network(format!("malformed payload: missing {pointer}")))
}

pub(crate) fn number(v: &Value, pointer: &str) -> Result<f64, FetchError> {
    field(v, pointer)?
        .as_f64()
        .ok_or_else(|| FetchError::network(format!("malformed payload: {pointer} is not a number")))
}

pub(crate) fn text(v: &Value, pointer: &str) -> Result<String, FetchError> {
    field(v, pointer)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| FetchError::network(format!("malformed payload: {pointer} is not a string")))
}
