/*
 *  widgets/clock.rs
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

use chrono::{DateTime, Local, TimeZone, Timelike};
use serde::Serialize;
use std::fmt::Display;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClockFace {
    pub time: String,    // 14:05
    pub weekday: String, // Thursday
    pub date: String,    // March 7
    pub seconds: u32,
}

impl ClockFace {
    pub fn at<Tz: TimeZone>(now: &DateTime<Tz>) -> Self
    where
        Tz::Offset: Display,
    {
        Self {
            time: now.format("%H:%M").to_string(),
            weekday: now.format("%A").to_string(),
            date: now.format("%B %-d").to_string(),
            seconds: now.second(),
        }
    }

    pub fn now() -> Self {
        Self::at(&Local::now())
    }
}

/// Publishes the local wall time once a second.
pub struct ClockTicker {
    tx: Arc<watch::Sender<ClockFace>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Default for ClockTicker {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockTicker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ClockFace::now());
        Self { tx: Arc::new(tx), task: Mutex::new(None) }
    }

    pub fn start(&self) {
        self.stop();
        let tx = Arc::clone(&self.tx);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                tx.send_replace(ClockFace::now());
            }
        });
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    pub fn stop(&self) {
        if let Some(handle) = self.task.lock().unwrap_or_else(PoisonError::into_inner).take() {
            handle.abort();
        }
    }

    pub fn current(&self) -> ClockFace {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ClockFace> {
        self.tx.subscribe()
    }
}

impl Drop for ClockTicker {
    fn drop(&mut self) {
        self.stop();
    }
}
