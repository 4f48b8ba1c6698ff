/*
 *  widgets/photos.rs
 *
 *  wallboard - worth a glance
 *  (c) 2020-26 Stuart Hunter
 *
 *  Photo library collage: an auth-gated media listing feeding a
 *  rotating window
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
use log::{debug, info, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::PhotosConfig;
use crate::credential::{AuthState, CredentialManager};
use crate::error::{AuthError, FetchError};
use crate::http::get_json;
use crate::resource::{FetchState, FetchStatus, Fetcher, RefreshPolicy, RefreshableResource};
use crate::rotation::{CollectionWindow, RotatingWindow};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Photo {
    pub id: String,
    pub base_url: String,
    #[serde(default)]
    pub filename: String,
}

impl Photo {
    /// Square 400px crop of the item.
    pub fn display_url(&self) -> String {
        format!("{}=w400-h400-c", self.base_url)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaItems {
    // absent for an empty library
    #[serde(default)]
    media_items: Vec<Photo>,
}

/// Lists media items with the current bearer token.
#[derive(Clone)]
pub struct PhotoFetcher {
    client: Client,
    url: String,
    page_size: u32,
    credentials: CredentialManager,
}

impl PhotoFetcher {
    pub fn new(client: Client, url: impl Into<String>, page_size: u32, credentials: CredentialManager) -> Self {
        Self { client, url: url.into(), page_size, credentials }
    }
}

#[async_trait]
impl Fetcher<Vec<Photo>> for PhotoFetcher {
    async fn fetch(&self) -> Result<Vec<Photo>, FetchError> {
        let token = self.credentials.access_token().ok_or(FetchError::SignedOut)?;
        let request = self
            .client
            .get(&self.url)
            .bearer_auth(token)
            .query(&[("pageSize", self.page_size)]);
        match get_json::<MediaItems>(request).await {
            Ok(items) => {
                debug!("Photo library returned {} items", items.media_items.len());
                Ok(items.media_items)
            }
            Err(e) if e.is_unauthorized() => {
                warn!("Photo library rejected the credential: {}", e);
                self.credentials.on_unauthorized();
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PhotoSettings {
    pub api_url: String,
    pub page_size: u32,
    pub window_size: usize,
    pub rotate_every: Duration,
    pub policy: RefreshPolicy,
    /// Sign in whenever signed out, once per `policy.interval`.
    pub auto_sign_in: bool,
}

impl From<&PhotosConfig> for PhotoSettings {
    fn from(cfg: &PhotosConfig) -> Self {
        Self {
            api_url: cfg.api_base_url.clone(),
            page_size: cfg.page_size,
            window_size: cfg.window_size,
            rotate_every: Duration::from_secs(cfg.rotate_secs),
            policy: RefreshPolicy::every(Duration::from_secs(cfg.interval_secs))
                .with_renew_before_expiry(Duration::from_secs(cfg.renew_before_expiry_secs)),
            auto_sign_in: cfg.auto_sign_in,
        }
    }
}

fn lock<G>(m: &Mutex<G>) -> MutexGuard<'_, G> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The window plus the channel its visible slice is published on.
struct Collage {
    window: Mutex<RotatingWindow<Photo>>,
    tx: watch::Sender<CollectionWindow<Photo>>,
}

impl Collage {
    fn update(&self, f: impl FnOnce(&mut RotatingWindow<Photo>)) {
        let next = {
            let mut window = lock(&self.window);
            f(&mut window);
            window.current_window()
        };
        self.tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

/// Photo panel: polls only while signed in and rotates what it has.
pub struct PhotoWidget {
    credentials: CredentialManager,
    fetcher: PhotoFetcher,
    settings: PhotoSettings,
    resource: Arc<RefreshableResource<Vec<Photo>>>,
    collage: Arc<Collage>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PhotoWidget {
    pub fn new(client: Client, credentials: CredentialManager, settings: PhotoSettings) -> Self {
        let fetcher = PhotoFetcher::new(client, settings.api_url.clone(), settings.page_size, credentials.clone());
        let (tx, _) = watch::channel(CollectionWindow::default());
        Self {
            credentials,
            fetcher,
            resource: Arc::new(RefreshableResource::new("Photos")),
            collage: Arc::new(Collage { window: Mutex::new(RotatingWindow::new(settings.window_size)), tx }),
            settings,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Follow the credential: poll while a token is held, clear the collage
    /// when it goes away, and rotate on a fixed cadence. With `auto_sign_in`
    /// a signed-out widget tries one sign-in now and one per poll interval.
    pub fn start(&self) {
        self.stop();
        info!(
            "Photos: window of {} rotating every {:?}",
            self.settings.window_size, self.settings.rotate_every
        );

        let mut auth_rx = self.credentials.subscribe();
        let resource = Arc::clone(&self.resource);
        let fetcher = self.fetcher.clone();
        let policy = self.settings.policy;
        let collage = Arc::clone(&self.collage);
        let follow_auth = tokio::spawn(async move {
            loop {
                let state = *auth_rx.borrow_and_update();
                match state {
                    AuthState::Authenticated | AuthState::Renewing => {
                        if !resource.is_running() {
                            resource.start(fetcher.clone(), policy);
                        }
                    }
                    AuthState::SignedOut | AuthState::Revoked => {
                        resource.stop();
                        collage.update(|w| w.set_items(Vec::new()));
                    }
                    AuthState::Authenticating => {}
                }
                if auth_rx.changed().await.is_err() {
                    break;
                }
            }
        });

        let mut data_rx = self.resource.subscribe();
        let collage = Arc::clone(&self.collage);
        let follow_data = tokio::spawn(async move {
            loop {
                let fresh = {
                    let state = data_rx.borrow_and_update();
                    match state.status {
                        FetchStatus::Ready => state.data.clone(),
                        _ => None,
                    }
                };
                if let Some(items) = fresh {
                    collage.update(|w| w.set_items(items));
                }
                if data_rx.changed().await.is_err() {
                    break;
                }
            }
        });

        let every = self.settings.rotate_every.max(Duration::from_millis(1));
        let collage = Arc::clone(&self.collage);
        let rotate = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                collage.update(|w| w.tick());
            }
        });

        let mut tasks = lock(&self.tasks);
        tasks.extend([follow_auth, follow_data, rotate]);
        if self.settings.auto_sign_in {
            let credentials = self.credentials.clone();
            let every = self.settings.policy.interval.max(Duration::from_millis(1));
            tasks.push(tokio::spawn(keep_signed_in(credentials, every)));
        }
    }

    pub fn stop(&self) {
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        self.resource.stop();
    }

    pub fn refresh_now(&self) -> bool {
        self.resource.refresh_now()
    }

    pub fn is_polling(&self) -> bool {
        self.resource.is_running()
    }

    pub fn state(&self) -> FetchState<Vec<Photo>> {
        self.resource.state()
    }

    pub fn window(&self) -> CollectionWindow<Photo> {
        self.collage.tx.borrow().clone()
    }

    pub fn subscribe_window(&self) -> watch::Receiver<CollectionWindow<Photo>> {
        self.collage.tx.subscribe()
    }

    pub fn credentials(&self) -> &CredentialManager {
        &self.credentials
    }
}

/// At most one sign-in attempt per tick, and only from a signed-out state.
async fn keep_signed_in(credentials: CredentialManager, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if !matches!(credentials.state(), AuthState::SignedOut | AuthState::Revoked) {
            continue;
        }
        match credentials.sign_in().await {
            Ok(()) => {}
            Err(AuthError::NotConfigured(missing)) => {
                info!("Photo sign-in skipped, {} not configured", missing);
                break;
            }
            Err(e) => warn!("Photo sign-in failed: {}", e),
        }
    }
}

impl Drop for PhotoWidget {
    fn drop(&mut self) {
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
    }
}
