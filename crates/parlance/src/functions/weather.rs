//! Built-in `get_current_weather` function backed by wttr.in.

use super::core::{Function, FunctionArgs, FunctionDef, FunctionFuture};
use crate::json_schema_for;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

pub const FUNCTION_NAME: &str = "get_current_weather";

const DEFAULT_ENDPOINT: &str = "https://wttr.in";

#[derive(Serialize, Deserialize, JsonSchema, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    #[default]
    Celsius,
    Fahrenheit,
}

/// Arguments of `get_current_weather`.
#[derive(Deserialize, JsonSchema, Debug)]
pub struct WeatherArgs {
    /// The city and state, e.g. San Francisco, CA
    pub location: String,
    /// Temperature unit (default: celsius).
    #[serde(default)]
    pub unit: Option<TemperatureUnit>,
}

/// Result reported back to the model.
#[derive(Serialize, Debug, PartialEq)]
pub struct WeatherReport {
    pub location: String,
    pub temperature: String,
    pub unit: TemperatureUnit,
    pub forecast: Vec<String>,
}

pub struct CurrentWeather {
    client: reqwest::Client,
    endpoint: String,
}

impl CurrentWeather {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            endpoint: DEFAULT_ENDPOINT.to_string(),
        })
    }

    /// Point at a different wttr.in-compatible endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    /// `<endpoint>/<location>?format=j1`, with the location percent-encoded
    /// as a single path segment.
    fn url_for(&self, location: &str) -> Result<reqwest::Url, String> {
        let mut url = reqwest::Url::parse(&self.endpoint).map_err(|e| format!("bad endpoint: {e}"))?;
        url.path_segments_mut()
            .map_err(|()| "endpoint cannot take a path".to_string())?
            .pop_if_empty()
            .push(location);
        url.query_pairs_mut().append_pair("format", "j1");
        Ok(url)
    }

    async fn fetch(&self, args: WeatherArgs) -> Result<String, String> {
        let location = args.location.trim();
        if location.is_empty() {
            return Err("location must not be empty".into());
        }
        let unit = args.unit.unwrap_or_default();
        let url = self.url_for(location)?;
        debug!("Fetching weather from {url}");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("weather request failed: {e}"))?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("weather service returned HTTP {}", status.as_u16()));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| format!("failed to parse weather response: {e}"))?;

        let report = parse_report(location, unit, &body)?;
        serde_json::to_string(&report).map_err(|e| format!("failed to encode report: {e}"))
    }
}

/// Extract the current conditions from a wttr.in `j1` document.
fn parse_report(location: &str, unit: TemperatureUnit, body: &Value) -> Result<WeatherReport, String> {
    let current = body
        .get("current_condition")
        .and_then(|c| c.get(0))
        .ok_or("weather response has no current conditions")?;
    let key = match unit {
        TemperatureUnit::Celsius => "temp_C",
        TemperatureUnit::Fahrenheit => "temp_F",
    };
    let temperature = current
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("weather response has no {key}"))?
        .to_string();
    let forecast = current
        .get("weatherDesc")
        .and_then(Value::as_array)
        .map(|descs| {
            descs
                .iter()
                .filter_map(|d| d.get("value").and_then(Value::as_str))
                .map(|s| s.trim().to_string())
                .collect()
        })
        .unwrap_or_default();

    Ok(WeatherReport {
        location: location.to_string(),
        temperature,
        unit,
        forecast,
    })
}

impl Function for CurrentWeather {
    fn definition(&self) -> FunctionDef {
        FunctionDef::new(
            FUNCTION_NAME,
            "Get the current weather in a given location",
            json_schema_for::<WeatherArgs>(),
        )
    }

    fn call(&self, args: FunctionArgs) -> FunctionFuture<'_> {
        Box::pin(async move {
            let args: WeatherArgs = serde_json::from_value(Value::Object(args))
                .map_err(|e| format!("invalid arguments: {e}"))?;
            self.fetch(args).await
        })
    }
}
