//! Current weather via the OpenWeather API.

use crate::traits::{required_str, Tool, ToolResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org";
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Weather lookup tool (metric units).
pub struct WeatherTool {
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl WeatherTool {
    pub fn new(api_key: Option<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: Option<String>, base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();

        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WeatherResponse {
    name: String,
    sys: Sys,
    main: Main,
    #[serde(default)]
    weather: Vec<Condition>,
    wind: Wind,
}

#[derive(Debug, Deserialize)]
struct Sys {
    #[serde(default)]
    country: String,
}

#[derive(Debug, Deserialize)]
struct Main {
    temp: f64,
    feels_like: f64,
    humidity: f64,
}

#[derive(Debug, Deserialize)]
struct Condition {
    description: String,
}

#[derive(Debug, Deserialize)]
struct Wind {
    speed: f64,
}

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &str {
        "get_weather"
    }

    fn description(&self) -> &str {
        "Get the current weather for a city (e.g. 'London', 'Mumbai', 'New York')"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "city": {
                    "type": "string",
                    "description": "City name"
                }
            },
            "required": ["city"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
        let city = required_str(&args, "city")?;
        let Some(api_key) = self.api_key.as_deref() else {
            return Ok(ToolResult::failure("OPENWEATHER_API_KEY is not configured"));
        };

        let response = self
            .client
            .get(format!("{}/data/2.5/weather", self.base_url))
            .query(&[("q", city), ("appid", api_key), ("units", "metric")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Ok(ToolResult::failure(format!(
                "Weather lookup for '{city}' failed ({status}): {body}"
            )));
        }

        let data: WeatherResponse = response.json().await?;
        let conditions = data
            .weather
            .first()
            .map(|c| c.description.clone())
            .unwrap_or_default();

        Ok(ToolResult::json(&json!({
            "city": data.name,
            "country": data.sys.country,
            "temperature": format!("{}°C", data.main.temp),
            "feels_like": format!("{}°C", data.main.feels_like),
            "conditions": conditions,
            "humidity": format!("{}%", data.main.humidity),
            "wind_speed": format!("{} m/s", data.wind.speed),
        })))
    }
}
