//! OnCall HTTP API schedule source.
//!
//! Reads `GET {url}/api/v1/schedules/` and picks the configured schedule by
//! id, falling back to its name. `on_call_now` becomes the roster.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use relay_core::config::{OnCallConfig, ScheduleConfig};
use relay_core::error::{RelayError, Result};
use relay_core::traits::ScheduleSource;
use relay_core::types::RosterSnapshot;

/// Pages followed per fetch before giving up.
const MAX_PAGES: usize = 20;

#[derive(Debug, Deserialize)]
struct SchedulesPage {
    #[serde(default)]
    results: Vec<ScheduleItem>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScheduleItem {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    time_zone: Option<String>,
    #[serde(default)]
    on_call_now: Vec<String>,
}

pub struct OnCallApiSource {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl OnCallApiSource {
    pub fn new(config: &OnCallConfig, timeout: Duration) -> Result<Self> {
        if config.url.is_empty() {
            return Err(RelayError::config("oncall.url is required"));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("dutyrelay/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RelayError::Http(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    async fn page(&self, url: &str) -> Result<SchedulesPage> {
        let mut req = self.client.get(url);
        if !self.token.is_empty() {
            // OnCall expects the raw token, without a scheme.
            req = req.header(reqwest::header::AUTHORIZATION, &self.token);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| RelayError::fetch(format!("GET {url}: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RelayError::fetch(format!("GET {url} returned {status}: {body}")));
        }
        resp.json::<SchedulesPage>()
            .await
            .map_err(|e| RelayError::fetch(format!("invalid schedules response: {e}")))
    }
}

#[async_trait]
impl ScheduleSource for OnCallApiSource {
    fn name(&self) -> &str {
        "oncall-api"
    }

    async fn current(&self, schedule: &ScheduleConfig) -> Result<RosterSnapshot> {
        let mut url = format!("{}/api/v1/schedules/", self.base_url);
        for _ in 0..MAX_PAGES {
            let page = self.page(&url).await?;
            let found = page.results.into_iter().find(|item| match &schedule.id {
                Some(id) => &item.id == id,
                None => item.name == schedule.name,
            });
            if let Some(item) = found {
                tracing::debug!(
                    "📥 '{}' ({}): {} on call",
                    schedule.name,
                    item.id,
                    item.on_call_now.len()
                );
                let mut snapshot = RosterSnapshot::new(&item.id, &schedule.name, item.on_call_now)
                    .with_delivery(schedule.delivery());
                if let Some(tz) = item.time_zone.as_deref() {
                    snapshot = snapshot.with_time_zone(tz);
                }
                return Ok(snapshot);
            }
            match page.next {
                Some(next) if !next.is_empty() => url = next,
                _ => break,
            }
        }
        Err(RelayError::fetch(format!(
            "schedule '{}' not found at {}",
            schedule.source_id(),
            self.base_url
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::types::TransportKind;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn source(url: &str) -> OnCallApiSource {
        OnCallApiSource::new(
            &OnCallConfig {
                url: url.to_string(),
                token: "tok".into(),
            },
            Duration::from_secs(2),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_by_name_and_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/schedules/"))
            .and(header("authorization", "tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [
                    {"id": "SBM7DV7BKFUYU", "name": "primary", "time_zone": "Europe/Moscow",
                     "on_call_now": ["U4DNY931HHJS5", "U4DNY931HHJS5"]},
                    {"id": "S2", "name": "secondary", "on_call_now": []}
                ],
                "next": null
            })))
            .mount(&server)
            .await;

        let src = source(&server.uri());
        let snap = src
            .current(&ScheduleConfig::new("primary", TransportKind::Sms))
            .await
            .unwrap();
        assert_eq!(snap.schedule_id, "SBM7DV7BKFUYU");
        assert_eq!(snap.time_zone, "Europe/Moscow");
        assert_eq!(snap.members.len(), 2);

        let mut by_id = ScheduleConfig::new("second line", TransportKind::Slack);
        by_id.id = Some("S2".into());
        let snap = src.current(&by_id).await.unwrap();
        assert!(snap.is_empty());
        assert_eq!(snap.name, "second line");
        assert_eq!(snap.delivery.transport, TransportKind::Slack);
    }

    #[tokio::test]
    async fn test_follows_pagination() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/schedules/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [{"id": "S1", "name": "primary", "on_call_now": ["U1"]}],
                "next": format!("{}/page2", server.uri())
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/page2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [{"id": "S9", "name": "night", "on_call_now": ["U9"]}]
            })))
            .mount(&server)
            .await;

        let snap = source(&server.uri())
            .current(&ScheduleConfig::new("night", TransportKind::Phone))
            .await
            .unwrap();
        assert_eq!(snap.members, vec!["U9"]);
    }

    #[tokio::test]
    async fn test_errors_are_fetch_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
            .mount(&server)
            .await;

        let err = source(&server.uri())
            .current(&ScheduleConfig::new("primary", TransportKind::Sms))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Fetch(ref m) if m.contains("401")));
    }

    #[tokio::test]
    async fn test_unknown_schedule() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"results": []})))
            .mount(&server)
            .await;

        let err = source(&server.uri())
            .current(&ScheduleConfig::new("ghost", TransportKind::Sms))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Fetch(_)));
    }

    #[test]
    fn test_requires_url() {
        assert!(OnCallApiSource::new(&OnCallConfig::default(), Duration::from_secs(1)).is_err());
    }
}
