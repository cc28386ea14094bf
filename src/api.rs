// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! REST client for stops, routes and route geometry.

use std::time::Duration;

use fleet_live::{RoutePattern, RouteSummary, StopPage};
use log::debug;
use reqwest::{Request, Url};
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Stops requested per page.
pub const STOP_PAGE_SIZE: u32 = 200;

/// REST failures.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid API base URL {url}")]
    InvalidUrl { url: String },

    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("could not decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Thin async client over the fleet REST API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|source| ApiError::Http {
                url: base_url.clone(),
                source,
            })?;
        let client = Self { base_url, http };
        client.endpoint(&[])?;
        Ok(client)
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// One page of stops matching `search` (1-based page).
    pub async fn stops(&self, page: u32, search: &str) -> Result<StopPage, ApiError> {
        self.get_json(self.stops_request(page, search)?).await
    }

    /// Every stop id, for "select all".
    pub async fn stop_ids(&self) -> Result<Vec<String>, ApiError> {
        let ids: Vec<serde_json::Value> =
            self.get_json(self.get(&["stops", "ids"])?).await?;
        Ok(ids
            .into_iter()
            .filter_map(|v| match v {
                serde_json::Value::String(s) => Some(s),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect())
    }

    pub async fn routes(&self) -> Result<Vec<RouteSummary>, ApiError> {
        self.get_json(self.get(&["routes"])?).await
    }

    /// Point geometry of every pattern of a route.
    pub async fn route_points(&self, route_id: &str) -> Result<Vec<RoutePattern>, ApiError> {
        self.get_json(self.get(&["route-points", route_id])?).await
    }

    /// Base URL with `segments` appended, each percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let invalid = || ApiError::InvalidUrl {
            url: self.base_url.clone(),
        };
        let mut url = Url::parse(&self.base_url).map_err(|_parse_error| invalid())?;
        url.path_segments_mut()
            .map_err(|()| invalid())?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn get(&self, segments: &[&str]) -> Result<Request, ApiError> {
        let url = self.endpoint(segments)?;
        build(self.http.get(url.clone()), &url)
    }

    fn stops_request(&self, page: u32, search: &str) -> Result<Request, ApiError> {
        let url = self.endpoint(&["stops"])?;
        let builder = self
            .http
            .get(url.clone())
            .query(&[("page", page), ("pageSize", STOP_PAGE_SIZE)])
            .query(&[("search", search)]);
        build(builder, &url)
    }

    async fn get_json<T: DeserializeOwned>(&self, request: Request) -> Result<T, ApiError> {
        let url = request.url().to_string();
        debug!("GET {}", url);
        let response = self
            .http
            .execute(request)
            .await
            .map_err(|source| ApiError::Http {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status { url, status });
        }

        let body = response.text().await.map_err(|source| ApiError::Http {
            url: url.clone(),
            source,
        })?;
        serde_json::from_str(&body).map_err(|source| ApiError::Decode { url, source })
    }
}

fn build(builder: reqwest::RequestBuilder, url: &Url) -> Result<Request, ApiError> {
    builder.build().map_err(|source| ApiError::Http {
        url: url.to_string(),
        source,
    })
}
