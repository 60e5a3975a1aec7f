//! HTTP client for the tracking-data REST API.
//!
//! Maps every store request onto the server's `/api/tracking_data`,
//! `/api/user_route` and `/api/user` endpoints. Each request is sent once with the configured
//! timeout. Transport failures and non-success statuses are surfaced as
//! [`AnalyticsError::Store`]; the consumer shows an empty result and the next
//! drawn region asks again.

use std::time::Duration;

use chrono::{Datelike, NaiveDate};
use log::{debug, info, warn};
use reqwest::Client;
use serde::de::DeserializeOwned;

use super::TrackingStore;
use crate::config::StoreConfig;
use crate::query::{weekday_index, HourRange, Weekday};
use crate::{AnalyticsError, BoundingRegion, Ping, Result, Route, RouteId, User, UserId};

const TRACKING_DATA: &str = "/api/tracking_data";
const USER_ROUTES: &str = "/api/user_route";
const USERS: &str = "/api/user";

type Params = Vec<(&'static str, String)>;

/// Tracking-point store served over HTTP.
pub struct HttpTrackingStore {
    client: Client,
    base_url: String,
}

impl HttpTrackingStore {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AnalyticsError::store(format!("Failed to create HTTP client: {}", e)))?;

        info!("[HttpStore] Using tracking-data server at {}", config.base_url);

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, endpoint: &str, action: &str) -> String {
        format!("{}{}/{}", self.base_url, endpoint, action)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, params: &Params) -> Result<T> {
        debug!("[HttpStore] GET {} {:?}", url, params);
        let response = self.client.get(url).query(params).send().await.map_err(|e| {
            warn!("[HttpStore] Request to {} failed: {}", url, e);
            AnalyticsError::store(format!("Request error: {}", e))
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!("[HttpStore] GET {} returned {}", url, status);
            return Err(AnalyticsError::Store {
                message: format!("GET {} failed", url),
                status_code: Some(status.as_u16()),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| AnalyticsError::store(format!("Parse error: {}", e)))
    }

    async fn pings(&self, action: &str, params: Params) -> Result<Vec<Ping>> {
        let pings: Vec<Ping> = self.get_json(&self.url(TRACKING_DATA, action), &params).await?;
        debug!("[HttpStore] {} returned {} pings", action, pings.len());
        Ok(pings)
    }
}

fn interval_params(region: &BoundingRegion) -> Params {
    vec![
        ("minLat", region.south.to_string()),
        ("maxLat", region.north.to_string()),
        ("minLng", region.west.to_string()),
        ("maxLng", region.east.to_string()),
    ]
}

fn origin_destination_params(origin: &BoundingRegion, destination: &BoundingRegion) -> Params {
    vec![
        ("startMinLat", origin.south.to_string()),
        ("startMinLng", origin.west.to_string()),
        ("startMaxLat", origin.north.to_string()),
        ("startMaxLng", origin.east.to_string()),
        ("endMinLat", destination.south.to_string()),
        ("endMinLng", destination.west.to_string()),
        ("endMaxLat", destination.north.to_string()),
        ("endMaxLng", destination.east.to_string()),
    ]
}

fn window_params(weekday: Weekday, hours: HourRange) -> Params {
    vec![
        ("weekday", weekday_index(weekday).to_string()),
        ("startHour", hours.start_hour().to_string()),
        ("endHour", hours.end_hour().to_string()),
    ]
}

fn date_params(prefix: Option<&'static str>, date: NaiveDate) -> Params {
    let (year, month, day) = match prefix {
        Some("start") => ("startYear", "startMonth", "startDay"),
        Some(_) => ("endYear", "endMonth", "endDay"),
        None => ("year", "month", "day"),
    };
    vec![
        (year, date.year().to_string()),
        (month, date.month().to_string()),
        (day, date.day().to_string()),
    ]
}

impl TrackingStore for HttpTrackingStore {
    async fn fetch_by_region(&self, region: &BoundingRegion) -> Result<Vec<Ping>> {
        self.pings("getByLatLngInterval", interval_params(region)).await
    }

    async fn fetch_by_region_and_weekday_and_hour_range(
        &self,
        region: &BoundingRegion,
        weekday: Weekday,
        hours: HourRange,
    ) -> Result<Vec<Ping>> {
        let mut params = interval_params(region);
        params.extend(window_params(weekday, hours));
        self.pings("getByLatLngIntervalAndDayOfWeek", params).await
    }

    async fn fetch_by_date_and_hour_range(
        &self,
        date: NaiveDate,
        hours: HourRange,
    ) -> Result<Vec<Ping>> {
        let mut params = date_params(None, date);
        params.push(("startHour", hours.start_hour().to_string()));
        params.push(("endHour", hours.end_hour().to_string()));
        self.pings("getByDate", params).await
    }

    async fn fetch_by_date_range(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<Ping>> {
        let mut params = date_params(Some("start"), start);
        params.extend(date_params(Some("end"), end));
        self.pings("getByPeriod", params).await
    }

    async fn fetch_by_origin_and_destination(
        &self,
        origin: &BoundingRegion,
        destination: &BoundingRegion,
    ) -> Result<Vec<Ping>> {
        self.pings(
            "getByOriginAndDestination",
            origin_destination_params(origin, destination),
        )
        .await
    }

    async fn fetch_by_origin_and_destination_and_weekday_and_hour_range(
        &self,
        origin: &BoundingRegion,
        destination: &BoundingRegion,
        weekday: Weekday,
        hours: HourRange,
    ) -> Result<Vec<Ping>> {
        let mut params = origin_destination_params(origin, destination);
        params.extend(window_params(weekday, hours));
        self.pings("getByOriginAndDestinationAndDayOfWeek", params)
            .await
    }

    async fn fetch_by_route(&self, route_id: RouteId) -> Result<Vec<Ping>> {
        self.pings("get", vec![("route", route_id.to_string())]).await
    }

    async fn fetch_route_by_id(&self, route_id: RouteId) -> Result<Option<Route>> {
        let routes: Vec<Route> = self
            .get_json(
                &self.url(USER_ROUTES, "get"),
                &vec![("id", route_id.to_string())],
            )
            .await?;
        Ok(routes.into_iter().find(|r| r.id == route_id))
    }

    async fn fetch_routes_by_user(&self, user_id: UserId) -> Result<Vec<Route>> {
        self.get_json(
            &self.url(USER_ROUTES, "get"),
            &vec![("user", user_id.to_string())],
        )
        .await
    }

    async fn fetch_users(&self) -> Result<Vec<User>> {
        self.get_json(&self.url(USERS, "get"), &Vec::new()).await
    }

    async fn fetch_user_by_id(&self, user_id: UserId) -> Result<Option<User>> {
        let users: Vec<User> = self
            .get_json(&self.url(USERS, "get"), &vec![("id", user_id.to_string())])
            .await?;
        Ok(users.into_iter().next())
    }
}
