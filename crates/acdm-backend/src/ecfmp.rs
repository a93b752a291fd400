//! ECFMP flow measure client.
//!
//! The flow-measure API is loosely typed: measure and filter values may be
//! numbers, strings, lists, or objects depending on the measure type, so
//! entries are read field by field instead of through a derived schema.

use acdm_core::models::{EcfmpFilter, EcfmpFlowMeasure, EcfmpMeasure};
use acdm_core::time::parse_backend_time;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

pub const DEFAULT_ECFMP_URL: &str = "https://ecfmp.vatsim.net/api/v1/flow-measure";

pub struct EcfmpClient {
    client: Client,
    url: String,
}

impl EcfmpClient {
    pub fn new(url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            url: url.into(),
        }
    }

    pub async fn fetch_flow_measures(&self) -> Result<Vec<EcfmpFlowMeasure>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .context("Failed to fetch flow measures")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Flow measure request failed: {} {}", status, body));
        }

        let payload = response
            .json::<Value>()
            .await
            .context("Failed to parse flow measure response")?;
        parse_flow_measures(&payload)
    }
}

pub fn parse_flow_measures(payload: &Value) -> Result<Vec<EcfmpFlowMeasure>> {
    let entries = payload
        .as_array()
        .ok_or_else(|| anyhow!("Flow measure response is not a list"))?;
    Ok(entries.iter().filter_map(parse_flow_measure).collect())
}

fn parse_flow_measure(entry: &Value) -> Option<EcfmpFlowMeasure> {
    let id = entry.get("id").and_then(Value::as_i64)?;
    let ident = entry.get("ident").and_then(Value::as_str)?.to_string();

    let measures = match entry.get("measure") {
        Some(Value::Array(items)) => items.iter().filter_map(parse_measure).collect(),
        Some(item) => parse_measure(item).into_iter().collect(),
        None => Vec::new(),
    };

    Some(EcfmpFlowMeasure {
        id,
        ident,
        event_id: entry.get("event_id").and_then(Value::as_i64),
        reason: entry
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        starttime: time_field(entry, "starttime"),
        endtime: time_field(entry, "endtime"),
        withdrawn_at: time_field(entry, "withdrawn_at"),
        notified_firs: entry
            .get("notified_flight_information_regions")
            .and_then(Value::as_array)
            .map(|firs| firs.iter().filter_map(Value::as_i64).collect())
            .unwrap_or_default(),
        measures,
        filters: entry
            .get("filters")
            .and_then(Value::as_array)
            .map(|filters| filters.iter().filter_map(parse_filter).collect())
            .unwrap_or_default(),
    })
}

fn time_field(entry: &Value, key: &str) -> Option<DateTime<Utc>> {
    entry
        .get(key)
        .and_then(Value::as_str)
        .and_then(parse_backend_time)
}

fn parse_measure(measure: &Value) -> Option<EcfmpMeasure> {
    let ident = measure.get("type").and_then(Value::as_str)?.to_string();
    let value = measure.get("value");

    Some(EcfmpMeasure {
        ident,
        value: value.and_then(as_lenient_i64).unwrap_or(-1),
        mandatory_route: value
            .filter(|value| value.is_array())
            .map(strings)
            .unwrap_or_default(),
    })
}

fn parse_filter(filter: &Value) -> Option<EcfmpFilter> {
    let filter_type = filter.get("type").and_then(Value::as_str)?.to_string();
    let value = filter.get("value").cloned().unwrap_or(Value::Null);

    let mut parsed = EcfmpFilter {
        filter_type,
        ..Default::default()
    };
    match parsed.filter_type.as_str() {
        "level_above" | "level_below" | "level" => {
            parsed.flightlevels = match &value {
                Value::Array(items) => items.iter().filter_map(as_lenient_i64).collect(),
                other => as_lenient_i64(other).into_iter().collect(),
            };
        }
        "waypoint" => parsed.waypoints = strings(&value),
        _ => parsed.value = strings(&value),
    }
    Some(parsed)
}

fn as_lenient_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Flatten a filter value into strings. Objects contribute their string and
/// numeric members, e.g. `{"event_id": 12, "event_vatcan": null}`.
fn strings(value: &Value) -> Vec<String> {
    match value {
        Value::String(text) => vec![text.clone()],
        Value::Number(number) => vec![number.to_string()],
        Value::Array(items) => items.iter().flat_map(strings).collect(),
        Value::Object(members) => members
            .values()
            .filter(|member| member.is_string() || member.is_number())
            .flat_map(strings)
            .collect(),
        Value::Null | Value::Bool(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn parses_mixed_value_shapes() {
        let payload = json!([
            {
                "id": 881,
                "ident": "EGTT22A",
                "event_id": null,
                "reason": "Arrival flow",
                "starttime": "2024-05-10T14:00:00Z",
                "endtime": "2024-05-10T18:00:00Z",
                "withdrawn_at": null,
                "notified_flight_information_regions": [17, 18],
                "measure": { "type": "minimum_departure_interval", "value": 120 },
                "filters": [
                    { "type": "ADEP", "value": ["EG**"] },
                    { "type": "ADES", "value": ["EGLL"] },
                    { "type": "level_above", "value": 240 },
                    { "type": "waypoint", "value": ["DVR", "KONAN"] },
                    { "type": "member_event", "value": [{ "event_id": 12, "event_vatcan": null }] }
                ]
            },
            {
                "id": 882,
                "ident": "LFFF05B",
                "measure": { "type": "mandatory_route", "value": ["UL612", "UN869"] },
                "filters": []
            },
            { "ident": "missing id" }
        ]);

        let measures = parse_flow_measures(&payload).unwrap();
        assert_eq!(measures.len(), 2);

        let first = &measures[0];
        assert_eq!(first.notified_firs, vec![17, 18]);
        assert_eq!(first.measures[0].value, 120);
        assert_eq!(
            first.starttime,
            Some(Utc.with_ymd_and_hms(2024, 5, 10, 14, 0, 0).unwrap())
        );
        assert_eq!(first.filters[0].value, vec!["EG**"]);
        assert_eq!(first.filters[2].flightlevels, vec![240]);
        assert_eq!(first.filters[3].waypoints, vec!["DVR", "KONAN"]);
        assert_eq!(first.filters[4].value, vec!["12"]);

        let route = &measures[1].measures[0];
        assert_eq!(route.value, -1);
        assert_eq!(route.mandatory_route, vec!["UL612", "UN869"]);
    }

    #[test]
    fn rejects_non_list_payload() {
        assert!(parse_flow_measures(&json!({ "data": [] })).is_err());
    }
}
