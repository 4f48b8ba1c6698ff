/*
 *  widgets/headlines.rs
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
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::required;
use crate::config::HeadlinesConfig;
use crate::error::FetchError;
use crate::http::get_json;
use crate::resource::Fetcher;

#[derive(Debug, Deserialize)]
struct TopHeadlines {
    #[serde(default)]
    articles: Vec<Article>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Article {
    title: Option<String>,
    source: Source,
    published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct Source {
    name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Headline {
    pub title: String,
    pub source: String,
    pub published_at: Option<DateTime<Utc>>,
}

fn top(payload: TopHeadlines, limit: usize) -> Vec<Headline> {
    payload
        .articles
        .into_iter()
        .filter_map(|a| {
            Some(Headline {
                title: a.title.filter(|t| !t.is_empty())?,
                source: a.source.name.unwrap_or_default(),
                published_at: a.published_at,
            })
        })
        .take(limit)
        .collect()
}

#[derive(Debug, Clone)]
pub struct HeadlinesFetcher {
    client: Client,
    config: HeadlinesConfig,
}

impl HeadlinesFetcher {
    pub fn new(client: Client, config: HeadlinesConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl Fetcher<Vec<Headline>> for HeadlinesFetcher {
    async fn fetch(&self) -> Result<Vec<Headline>, FetchError> {
        let api_key = required(self.config.api_key.as_deref(), "news API key")?;
        let request = self
            .client
            .get(&self.config.base_url)
            .query(&[("country", self.config.country.as_str()), ("apiKey", api_key)]);
        let payload: TopHeadlines = get_json(request).await?;
        Ok(top(payload, self.config.limit))
    }
}
