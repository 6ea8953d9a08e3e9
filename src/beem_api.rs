use crate::errors::{BeemError, BeemResult};
use crate::models::{
    BatteryDevice, BatteryTelemetry, BeemBox, BoxList, BoxSummary, BoxSummaryRequest,
    DeviceList, LoginRequest, LoginResponse,
};
use chrono::{Datelike, Local};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const BEEM_API_BASE: &str = "https://api-x.beem.energy/beemapp";
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for the Beem cloud API. Owns the bearer token of one account.
///
/// Every authenticated call logs in first when no token is held, and on a
/// 401 logs in again and retries the same request exactly once.
pub struct BeemApiClient {
    endpoint_url: String,
    email: String,
    password: Option<String>,
    token: Option<String>,
    client: Client,
}

impl BeemApiClient {
    pub fn new(
        endpoint_url: impl Into<String>,
        email: impl Into<String>,
        password: Option<String>,
        token: Option<String>,
    ) -> BeemResult<Self> {
        Self::with_timeout(endpoint_url, email, password, token, REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        endpoint_url: impl Into<String>,
        email: impl Into<String>,
        password: Option<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> BeemResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint_url: endpoint_url.into().trim_end_matches('/').to_string(),
            email: email.into(),
            password,
            token,
            client,
        })
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn has_password(&self) -> bool {
        self.password.as_deref().is_some_and(|p| !p.is_empty())
    }

    pub fn set_password(&mut self, password: impl Into<String>) {
        self.password = Some(password.into());
    }

    /// Posts the credentials and stores the returned token.
    /// On any failure the previous token is left untouched.
    pub async fn login(&mut self) -> BeemResult<()> {
        let password = match self.password.as_deref() {
            Some(password) if !password.is_empty() => password,
            _ => {
                error!(email = %self.email, "Password missing, cannot log in");
                return Err(BeemError::MissingPassword);
            }
        };

        let response = self
            .client
            .post(self.url("/user/login"))
            .json(&LoginRequest {
                email: &self.email,
                password,
            })
            .send()
            .await
            .inspect_err(|e| error!(error = %e, "Beem login request failed"))?;

        let status = response.status();
        let body = response.text().await?;
        if !matches!(status, StatusCode::OK | StatusCode::CREATED) {
            error!(status = status.as_u16(), body = %body, "Beem login rejected");
            return Err(BeemError::AuthenticationFailed(format!(
                "login returned status {status}"
            )));
        }

        let login: LoginResponse = serde_json::from_str(&body).map_err(|e| {
            error!(body = %body, "Login response is not JSON");
            BeemError::InvalidResponse(format!("login response: {e}"))
        })?;

        match login.access_token {
            Some(token) if !token.is_empty() => {
                self.token = Some(token);
                info!(email = %self.email, "Beem token acquired");
                Ok(())
            }
            _ => {
                error!("Token missing from login response");
                Err(BeemError::AuthenticationFailed(
                    "token missing from login response".to_string(),
                ))
            }
        }
    }

    /// Live telemetry of one battery.
    pub async fn fetch_live_data(&mut self, battery_id: i64) -> BeemResult<BatteryTelemetry> {
        let url = self.url(&format!("/batteries/{battery_id}/live-data"));
        let response = self
            .send_authorized(|client, token| client.get(&url).bearer_auth(token))
            .await?;
        decode_json(response).await
    }

    /// Battery list, normalized from either response shape.
    pub async fn fetch_devices(&mut self) -> BeemResult<Vec<BatteryDevice>> {
        let url = self.url("/devices");
        let response = self
            .send_authorized(|client, token| client.get(&url).bearer_auth(token))
            .await?;
        let devices: DeviceList = decode_json(response).await?;
        let batteries = devices.into_batteries();
        debug!(count = batteries.len(), "Fetched batteries");
        Ok(batteries)
    }

    /// BeemBox (plug-and-play) devices. Only the grouped `/devices` shape carries them.
    pub async fn fetch_boxes(&mut self) -> BeemResult<Vec<BeemBox>> {
        let url = self.url("/devices");
        let response = self
            .send_authorized(|client, token| client.get(&url).bearer_auth(token))
            .await?;
        let boxes: BoxList = decode_json(response).await?;
        debug!(count = boxes.beemboxes.len(), "Fetched BeemBoxes");
        Ok(boxes.beemboxes)
    }

    /// Monthly BeemBox production. Month and year default to the current
    /// calendar month unless both are given.
    pub async fn fetch_box_summary(
        &mut self,
        month: Option<u32>,
        year: Option<i32>,
    ) -> BeemResult<Vec<BoxSummary>> {
        let payload = summary_period(month, year);
        let url = self.url("/box/summary");
        let response = self
            .send_authorized(|client, token| client.post(&url).bearer_auth(token).json(&payload))
            .await?;
        decode_json(response).await
    }

    async fn ensure_token(&mut self) -> BeemResult<()> {
        if self.token.is_none() {
            warn!("Token missing, logging in");
            self.login().await?;
        }
        Ok(())
    }

    async fn send_authorized<F>(&mut self, build: F) -> BeemResult<Response>
    where
        F: Fn(&Client, &str) -> RequestBuilder,
    {
        self.ensure_token().await?;
        let response = build(&self.client, self.token.as_deref().unwrap_or_default())
            .send()
            .await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        warn!("Token expired, logging in again");
        self.login().await?;
        let response = build(&self.client, self.token.as_deref().unwrap_or_default())
            .send()
            .await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            error!("Still unauthorized after a fresh login");
            return Err(BeemError::AuthenticationFailed(
                "request rejected after re-login".to_string(),
            ));
        }
        Ok(response)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint_url, path)
    }
}

fn summary_period(month: Option<u32>, year: Option<i32>) -> BoxSummaryRequest {
    match (month, year) {
        (Some(month), Some(year)) if month > 0 && year > 0 => BoxSummaryRequest { month, year },
        _ => {
            let now = Local::now();
            BoxSummaryRequest {
                month: now.month(),
                year: now.year(),
            }
        }
    }
}

async fn decode_json<T: DeserializeOwned>(response: Response) -> BeemResult<T> {
    let status = response.status();
    let body = response.text().await?;
    if status != StatusCode::OK {
        error!(status = status.as_u16(), body = %body, "Beem API error");
        return Err(BeemError::Api {
            status: status.as_u16(),
            message: body,
        });
    }
    serde_json::from_str(&body).map_err(|e| {
        error!(body = %body, "Unexpected Beem API response");
        BeemError::InvalidResponse(e.to_string())
    })
}

#[cfg(test)]
mod test_beem_api {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn client(server: &mockito::Server, token: Option<&str>) -> BeemApiClient {
        BeemApiClient::new(
            server.url(),
            "user@example.com",
            Some("secret".to_string()),
            token.map(str::to_string),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_login_stores_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/user/login")
            .match_body(Matcher::Json(
                json!({"email": "user@example.com", "password": "secret"}),
            ))
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"accessToken": "fresh"}"#)
            .create_async()
            .await;

        let mut api = client(&server, None);
        api.login().await.unwrap();

        assert_eq!(api.token(), Some("fresh"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_failed_login_keeps_previous_token() {
        let mut server = mockito::Server::new_async().await;
        let _bad_status = server
            .mock("POST", "/user/login")
            .with_status(403)
            .with_body("forbidden")
            .create_async()
            .await;

        let mut api = client(&server, Some("old"));
        let err = api.login().await.unwrap_err();
        assert!(matches!(err, BeemError::AuthenticationFailed(_)));
        assert_eq!(api.token(), Some("old"));
    }

    #[tokio::test]
    async fn test_login_without_token_field_or_json() {
        let mut server = mockito::Server::new_async().await;
        let _no_token = server
            .mock("POST", "/user/login")
            .match_body(Matcher::PartialJson(json!({"password": "secret"})))
            .with_status(200)
            .with_body(r#"{"user": "me"}"#)
            .create_async()
            .await;

        let mut api = client(&server, Some("old"));
        assert!(matches!(
            api.login().await.unwrap_err(),
            BeemError::AuthenticationFailed(_)
        ));
        assert_eq!(api.token(), Some("old"));

        let _not_json = server
            .mock("POST", "/user/login")
            .match_body(Matcher::PartialJson(json!({"password": "other"})))
            .with_status(200)
            .with_body("<html>")
            .create_async()
            .await;
        api.set_password("other");
        assert!(matches!(
            api.login().await.unwrap_err(),
            BeemError::InvalidResponse(_)
        ));
        assert_eq!(api.token(), Some("old"));
    }

    #[tokio::test]
    async fn test_login_without_password_sends_nothing() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/user/login")
            .expect(0)
            .create_async()
            .await;

        let mut api =
            BeemApiClient::new(server.url(), "user@example.com", None, None).unwrap();
        assert!(!api.has_password());
        assert!(matches!(
            api.login().await.unwrap_err(),
            BeemError::MissingPassword
        ));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_live_data_logs_in_when_token_absent() {
        let mut server = mockito::Server::new_async().await;
        let login = server
            .mock("POST", "/user/login")
            .with_status(200)
            .with_body(r#"{"accessToken": "fresh"}"#)
            .expect(1)
            .create_async()
            .await;
        let live = server
            .mock("GET", "/batteries/12/live-data")
            .match_header("Authorization", "Bearer fresh")
            .with_status(200)
            .with_body(r#"{"batteryPower": -250, "soc": 81}"#)
            .create_async()
            .await;

        let mut api = client(&server, None);
        let telemetry = api.fetch_live_data(12).await.unwrap();

        assert_eq!(telemetry.get("soc"), Some(&json!(81)));
        login.assert_async().await;
        live.assert_async().await;
    }

    #[tokio::test]
    async fn test_live_data_retries_once_after_401() {
        let mut server = mockito::Server::new_async().await;
        let stale = server
            .mock("GET", "/batteries/12/live-data")
            .match_header("Authorization", "Bearer stale")
            .with_status(401)
            .expect(1)
            .create_async()
            .await;
        let login = server
            .mock("POST", "/user/login")
            .with_status(200)
            .with_body(r#"{"accessToken": "fresh"}"#)
            .expect(1)
            .create_async()
            .await;
        let fresh = server
            .mock("GET", "/batteries/12/live-data")
            .match_header("Authorization", "Bearer fresh")
            .with_status(200)
            .with_body(r#"{"batteryPower": 400}"#)
            .expect(1)
            .create_async()
            .await;

        let mut api = client(&server, Some("stale"));
        let telemetry = api.fetch_live_data(12).await.unwrap();

        assert_eq!(telemetry.get("batteryPower"), Some(&json!(400)));
        assert_eq!(api.token(), Some("fresh"));
        stale.assert_async().await;
        login.assert_async().await;
        fresh.assert_async().await;
    }

    #[tokio::test]
    async fn test_second_401_yields_no_data_without_looping() {
        let mut server = mockito::Server::new_async().await;
        let live = server
            .mock("GET", "/batteries/12/live-data")
            .with_status(401)
            .expect(2)
            .create_async()
            .await;
        let login = server
            .mock("POST", "/user/login")
            .with_status(200)
            .with_body(r#"{"accessToken": "fresh"}"#)
            .expect(1)
            .create_async()
            .await;

        let mut api = client(&server, Some("stale"));
        let err = api.fetch_live_data(12).await.unwrap_err();

        assert!(matches!(err, BeemError::AuthenticationFailed(_)));
        live.assert_async().await;
        login.assert_async().await;
    }

    #[tokio::test]
    async fn test_live_data_error_status_and_bad_json() {
        let mut server = mockito::Server::new_async().await;
        let _down = server
            .mock("GET", "/batteries/1/live-data")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;
        let _garbage = server
            .mock("GET", "/batteries/2/live-data")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let mut api = client(&server, Some("token"));
        match api.fetch_live_data(1).await.unwrap_err() {
            BeemError::Api { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(matches!(
            api.fetch_live_data(2).await.unwrap_err(),
            BeemError::InvalidResponse(_)
        ));
    }

    #[tokio::test]
    async fn test_transport_error() {
        let mut api = BeemApiClient::new(
            "http://127.0.0.1:1",
            "user@example.com",
            Some("secret".to_string()),
            Some("token".to_string()),
        )
        .unwrap();
        assert!(matches!(
            api.fetch_live_data(1).await.unwrap_err(),
            BeemError::Transport(_)
        ));
    }

    #[tokio::test]
    async fn test_devices_accepts_both_shapes() {
        let batteries = json!([{"id": 3, "solarEquipments": [{"mpptId": "a"}]}]);

        let mut server = mockito::Server::new_async().await;
        let _bare = server
            .mock("GET", "/devices")
            .match_header("Authorization", "Bearer bare")
            .with_status(200)
            .with_body(batteries.to_string())
            .create_async()
            .await;
        let _grouped = server
            .mock("GET", "/devices")
            .match_header("Authorization", "Bearer grouped")
            .with_status(200)
            .with_body(json!({"batteries": batteries, "beemboxes": []}).to_string())
            .create_async()
            .await;

        let from_bare = client(&server, Some("bare")).fetch_devices().await.unwrap();
        let from_grouped = client(&server, Some("grouped"))
            .fetch_devices()
            .await
            .unwrap();

        assert_eq!(from_bare, from_grouped);
        assert_eq!(from_bare[0].id, Some(3));
    }

    #[tokio::test]
    async fn test_devices_malformed_shape() {
        let mut server = mockito::Server::new_async().await;
        let _odd = server
            .mock("GET", "/devices")
            .with_status(200)
            .with_body(r#"{"devices": []}"#)
            .create_async()
            .await;

        let err = client(&server, Some("t")).fetch_devices().await.unwrap_err();
        assert!(matches!(err, BeemError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_boxes_from_grouped_devices() {
        let mut server = mockito::Server::new_async().await;
        let _devices = server
            .mock("GET", "/devices")
            .with_status(200)
            .with_body(
                json!({"batteries": [], "beemboxes": [{"macAddress": "M1", "power": 120}]})
                    .to_string(),
            )
            .create_async()
            .await;

        let boxes = client(&server, Some("t")).fetch_boxes().await.unwrap();
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].identifier().as_deref(), Some("M1"));
    }

    #[tokio::test]
    async fn test_boxes_failure_is_distinguishable_from_empty() {
        let mut server = mockito::Server::new_async().await;
        let _devices = server
            .mock("GET", "/devices")
            .with_status(502)
            .create_async()
            .await;

        let result = client(&server, Some("t")).fetch_boxes().await;
        assert!(matches!(result, Err(BeemError::Api { status: 502, .. })));
    }

    #[tokio::test]
    async fn test_box_summary_posts_period() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/box/summary")
            .match_header("Authorization", "Bearer t")
            .match_body(Matcher::Json(json!({"month": 3, "year": 2024})))
            .with_status(200)
            .with_body(r#"[{"serialNumber": "S1", "wattHour": 1200, "totalMonth": 54000}]"#)
            .create_async()
            .await;

        let summary = client(&server, Some("t"))
            .fetch_box_summary(Some(3), Some(2024))
            .await
            .unwrap();

        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].get("totalMonth"), Some(&json!(54000)));
        mock.assert_async().await;
    }

    #[test]
    fn test_summary_period_defaults_to_current_month() {
        let now = Local::now();
        let expected = BoxSummaryRequest {
            month: now.month(),
            year: now.year(),
        };
        assert_eq!(summary_period(None, None), expected);
        assert_eq!(summary_period(Some(5), None), expected);
        assert_eq!(
            summary_period(Some(5), Some(2023)),
            BoxSummaryRequest {
                month: 5,
                year: 2023
            }
        );
    }
}
