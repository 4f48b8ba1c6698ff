/*
 *  board.rs
 *
 *  wallboard - worth a glance
 *  (c) 2020-26 Stuart Hunter
 *
 *  Owns every panel and produces a render-ready snapshot of them all
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

use chrono::{DateTime, Utc};
use log::info;
use serde::Serialize;
use std::time::Duration;

use crate::config::Config;
use crate::credential::{AuthState, CredentialManager};
use crate::error::{ErrorKind, FetchError};
use crate::http::build_client;
use crate::resource::{FetchState, FetchStatus, Fetcher, RefreshPolicy, RefreshableResource};
use crate::rotation::CollectionWindow;
use crate::widgets::{
    ClockFace, ClockTicker, CurrentWeather, DepartureBoard, Forecast, ForecastFetcher, Headline,
    HeadlinesFetcher, OneCall, Photo, PhotoSettings, PhotoWidget, RailFetcher, WeatherFetcher,
};

/// Serializable view of one `FetchState`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PanelSnapshot<T> {
    pub status: FetchStatus,
    pub data: Option<T>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub stale: bool,
    pub last_fetched_at: Option<DateTime<Utc>>,
}

impl<T> From<FetchState<T>> for PanelSnapshot<T> {
    fn from(state: FetchState<T>) -> Self {
        Self {
            stale: state.is_stale(),
            status: state.status,
            error: state.error.as_ref().map(ToString::to_string),
            error_kind: state.error.as_ref().map(FetchError::kind),
            data: state.data,
            last_fetched_at: state.last_fetched_at,
        }
    }
}

impl<T> PanelSnapshot<T> {
    fn summary(&self) -> String {
        match (&self.status, &self.error) {
            (FetchStatus::Error, Some(e)) if self.stale => format!("stale ({e})"),
            (FetchStatus::Error, Some(e)) => format!("error ({e})"),
            (FetchStatus::Ready, _) => "ready".to_string(),
            _ => "loading".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhotoSnapshot {
    pub auth: AuthState,
    pub status: FetchStatus,
    pub error: Option<String>,
    pub window: CollectionWindow<Photo>,
    pub urls: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoardSnapshot {
    pub taken_at: DateTime<Utc>,
    pub clock: ClockFace,
    pub weather: PanelSnapshot<CurrentWeather>,
    pub forecast: PanelSnapshot<Forecast>,
    pub rail: PanelSnapshot<DepartureBoard>,
    pub headlines: PanelSnapshot<Vec<Headline>>,
    pub photos: PhotoSnapshot,
}

impl BoardSnapshot {
    /// Compact one-line status for the periodic log.
    pub fn summary(&self) -> String {
        format!(
            "{} | weather: {} | forecast: {} | rail: {} | headlines: {} | photos: {:?}, {} shown",
            self.clock.time,
            self.weather.summary(),
            self.forecast.summary(),
            self.rail.summary(),
            self.headlines.summary(),
            self.photos.auth,
            self.photos.window.items.len(),
        )
    }
}

struct Feed<T, F> {
    resource: RefreshableResource<T>,
    fetcher: F,
    policy: RefreshPolicy,
}

impl<T, F> Feed<T, F>
where
    T: Clone + Send + Sync + 'static,
    F: Fetcher<T> + Clone + 'static,
{
    fn new(name: &str, fetcher: F, interval_secs: u64) -> Self {
        Self {
            resource: RefreshableResource::new(name),
            fetcher,
            policy: RefreshPolicy::every(Duration::from_secs(interval_secs)),
        }
    }

    fn start(&self) {
        self.resource.start(self.fetcher.clone(), self.policy);
    }

    fn snapshot(&self) -> PanelSnapshot<T> {
        self.resource.state().into()
    }
}

/// All panels of the wall display.
pub struct Board {
    clock: ClockTicker,
    weather: Feed<CurrentWeather, WeatherFetcher>,
    forecast: Feed<Forecast, ForecastFetcher>,
    rail: Feed<DepartureBoard, RailFetcher>,
    headlines: Feed<Vec<Headline>, HeadlinesFetcher>,
    photos: PhotoWidget,
}

impl Board {
    pub fn new(cfg: &Config, credentials: CredentialManager) -> Result<Self, FetchError> {
        let client = build_client()?;
        let weather_cfg = cfg.weather();
        let one_call = OneCall::new(client.clone(), weather_cfg.clone());
        let photos_cfg = cfg.photos();

        Ok(Self {
            clock: ClockTicker::new(),
            weather: Feed::new("Weather", WeatherFetcher::new(one_call.clone()), weather_cfg.interval_secs),
            forecast: Feed::new("Forecast", ForecastFetcher::new(one_call), weather_cfg.forecast_interval_secs),
            rail: Feed::new("Rail", RailFetcher::new(client.clone(), cfg.rail()), cfg.rail().interval_secs),
            headlines: Feed::new(
                "Headlines",
                HeadlinesFetcher::new(client.clone(), cfg.headlines()),
                cfg.headlines().interval_secs,
            ),
            photos: PhotoWidget::new(client, credentials, PhotoSettings::from(&photos_cfg)),
        })
    }

    pub fn start(&self) {
        info!("Starting board");
        self.clock.start();
        self.weather.start();
        self.forecast.start();
        self.rail.start();
        self.headlines.start();
        self.photos.start();
    }

    /// Stop every panel and the credential renewal timer.
    pub fn stop(&self) {
        info!("Stopping board");
        self.clock.stop();
        self.weather.resource.stop();
        self.forecast.resource.stop();
        self.rail.resource.stop();
        self.headlines.resource.stop();
        self.photos.stop();
        self.photos.credentials().shutdown();
    }

    /// Ask every polling panel for an immediate refresh.
    pub fn refresh_all(&self) {
        self.weather.resource.refresh_now();
        self.forecast.resource.refresh_now();
        self.rail.resource.refresh_now();
        self.headlines.resource.refresh_now();
        self.photos.refresh_now();
    }

    pub fn photos(&self) -> &PhotoWidget {
        &self.photos
    }

    pub fn snapshot(&self) -> BoardSnapshot {
        let window = self.photos.window();
        let photo_state = self.photos.state();
        BoardSnapshot {
            taken_at: Utc::now(),
            clock: self.clock.current(),
            weather: self.weather.snapshot(),
            forecast: self.forecast.snapshot(),
            rail: self.rail.snapshot(),
            headlines: self.headlines.snapshot(),
            photos: PhotoSnapshot {
                auth: self.photos.credentials().state(),
                status: photo_state.status,
                error: photo_state.error.as_ref().map(ToString::to_string),
                urls: window.items.iter().map(Photo::display_url).collect(),
                window,
            },
        }
    }
}
