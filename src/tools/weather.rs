//! Current-weather lookup against WeatherAPI.com
//!
//! Provider failures never surface as [`ToolError`]: the model gets a
//! readable apology naming the query and the cause, so it can tell the user.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::{ParamKind, ParamSpec, Tool, ToolError, ToolInput, ToolOutput, ToolSpec};

pub const DEFAULT_WEATHER_API_URL: &str = "https://api.weatherapi.com/v1";

#[derive(Debug, Deserialize)]
struct CurrentWeather {
    location: Location,
    current: Conditions,
}

#[derive(Debug, Deserialize)]
struct Location {
    name: String,
    #[serde(default)]
    region: String,
    country: String,
}

#[derive(Debug, Deserialize)]
struct Conditions {
    temp_f: f64,
    feelslike_f: f64,
    condition: ConditionText,
    humidity: f64,
    wind_mph: f64,
    wind_dir: String,
    precip_in: f64,
    cloud: f64,
}

#[derive(Debug, Deserialize)]
struct ConditionText {
    text: String,
}

#[derive(Debug)]
enum WeatherError {
    MissingKey,
    Request(reqwest::Error),
    Provider(String),
    Parse(serde_json::Error),
}

impl std::fmt::Display for WeatherError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WeatherError::MissingKey => write!(
                f,
                "WeatherAPI key not found. Please set WEATHER_API_KEY in your environment variables."
            ),
            WeatherError::Request(e) => write!(f, "Request error: {}", e),
            WeatherError::Provider(detail) => write!(f, "Failed to fetch weather data: {}", detail),
            WeatherError::Parse(e) => write!(f, "Unexpected weather data: {}", e),
        }
    }
}

impl From<reqwest::Error> for WeatherError {
    fn from(e: reqwest::Error) -> Self {
        WeatherError::Request(e)
    }
}

impl From<serde_json::Error> for WeatherError {
    fn from(e: serde_json::Error) -> Self {
        WeatherError::Parse(e)
    }
}

/// The `weather` tool
pub struct WeatherTool {
    spec: ToolSpec,
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl WeatherTool {
    pub fn new(api_key: Option<String>, base_url: impl Into<String>) -> Self {
        let spec = ToolSpec::new(
            "weather",
            "Get current weather for a city. Always include the state or country for better \
             accuracy (e.g., 'Austin, Texas' instead of just 'Austin')",
        )
        .param(ParamSpec::required(
            "query",
            ParamKind::String,
            "The city name and optionally state/country (e.g., 'Paris, France' or 'Austin, TX')",
        ));

        Self {
            spec,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    async fn fetch(&self, query: &str) -> Result<String, WeatherError> {
        let api_key = self.api_key.as_deref().ok_or(WeatherError::MissingKey)?;
        debug!(query, key = %mask_key(api_key), "Fetching weather");

        let response = self
            .client
            .get(format!("{}/current.json", self.base_url))
            .query(&[("key", api_key), ("q", query), ("aqi", "no")])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        debug!(status = status.as_u16(), "Weather provider responded");

        if !status.is_success() {
            return Err(WeatherError::Provider(provider_error_detail(status, &body)));
        }

        let weather: CurrentWeather = serde_json::from_str(&body)?;
        Ok(format_weather(&weather))
    }
}

#[async_trait]
impl Tool for WeatherTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn call(&self, input: ToolInput) -> Result<ToolOutput, ToolError> {
        let query = input.get("query").and_then(Value::as_str).unwrap_or_default();

        match self.fetch(query).await {
            Ok(summary) => Ok(ToolOutput::success(summary)),
            Err(e) => {
                warn!(query, error = %e, "Weather lookup failed");
                Ok(ToolOutput::failure(format!(
                    "I couldn't get the weather for {} ({}). Please try again in a moment or check the city name.",
                    query, e
                )))
            }
        }
    }
}

/// Best description of a non-success provider response
fn provider_error_detail(status: reqwest::StatusCode, body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(json) => match json.pointer("/error/message").and_then(Value::as_str) {
            Some(message) => message.to_string(),
            None => json.to_string(),
        },
        Err(_) if !body.trim().is_empty() => body.to_string(),
        Err(_) => format!("HTTP {}", status.as_u16()),
    }
}

fn format_weather(weather: &CurrentWeather) -> String {
    let CurrentWeather { location, current } = weather;
    let region = if location.region.is_empty() {
        String::new()
    } else {
        format!("{}, ", location.region)
    };

    format!(
        "🌤️ Weather in {}, {}{}:\n\
         • Temperature: {}°F (Feels like {}°F)\n\
         • Conditions: {}\n\
         • Humidity: {}%\n\
         • Wind: {} mph {}\n\
         • Precipitation: {} in\n\
         • Cloud Cover: {}%",
        location.name,
        region,
        location.country,
        round_half_up(current.temp_f),
        round_half_up(current.feelslike_f),
        current.condition.text,
        current.humidity,
        round_half_up(current.wind_mph),
        current.wind_dir,
        current.precip_in,
        current.cloud,
    )
}

/// Halves round toward positive infinity (-2.5 → -2)
fn round_half_up(value: f64) -> i64 {
    (value + 0.5).floor() as i64
}

fn mask_key(key: &str) -> String {
    let tail: String = key.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
    format!("***{}", tail)
}
