//! OpenWeatherMap 2.5 current-weather tools.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::dispatcher::{opt_f64, opt_str, req_str, Arguments, ToolError, ToolHandler};
use super::{env_key, fetch_json, upstream_client};
use crate::mcp_client::types::McpToolDefinition;

pub const OPENWEATHER_BASE: &str = "https://api.openweathermap.org/data/2.5";

/// Environment variable holding the OpenWeatherMap key.
pub const OPENWEATHER_API_KEY_VAR: &str = "OPENWEATHER_API_KEY";

const UNITS: &[&str] = &["metric", "imperial", "standard"];

pub struct WeatherApi {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl WeatherApi {
    pub fn new(api_key: Option<String>) -> Result<Self, ToolError> {
        Ok(Self {
            http: upstream_client()?,
            base_url: OPENWEATHER_BASE.to_string(),
            api_key,
        })
    }

    pub fn from_env() -> Result<Self, ToolError> {
        Self::new(env_key(OPENWEATHER_API_KEY_VAR))
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// `GET /weather` with a location selector plus units and language.
    async fn current(
        &self,
        mut query: Vec<(&'static str, String)>,
        arguments: &Arguments,
    ) -> Result<Value, ToolError> {
        query.extend(common_params(arguments)?);
        let key = self
            .api_key
            .as_ref()
            .ok_or_else(|| ToolError::upstream(format!("{OPENWEATHER_API_KEY_VAR} is not set")))?;
        query.push(("appid", key.clone()));
        fetch_json(&self.http, &format!("{}/weather", self.base_url), &query).await
    }
}

fn common_params(arguments: &Arguments) -> Result<Vec<(&'static str, String)>, ToolError> {
    let units = opt_str(arguments, "units").unwrap_or("metric");
    if !UNITS.contains(&units) {
        return Err(ToolError::InvalidArgument {
            name: "units".into(),
            reason: format!("expected one of {}", UNITS.join(", ")),
        });
    }
    let mut params = vec![("units", units.to_string())];
    if let Some(lang) = opt_str(arguments, "lang") {
        params.push(("lang", lang.to_string()));
    }
    Ok(params)
}

pub fn coordinates_query(arguments: &Arguments) -> Result<Vec<(&'static str, String)>, ToolError> {
    let coordinate = |name: &str, limit: f64| -> Result<f64, ToolError> {
        let value = opt_f64(arguments, name)?.ok_or_else(|| ToolError::MissingArgument {
            name: name.to_string(),
        })?;
        if value.abs() > limit {
            return Err(ToolError::InvalidArgument {
                name: name.to_string(),
                reason: format!("must be between -{limit} and {limit}"),
            });
        }
        Ok(value)
    };
    Ok(vec![
        ("lat", coordinate("lat", 90.0)?.to_string()),
        ("lon", coordinate("lon", 180.0)?.to_string()),
    ])
}

pub fn zip_query(arguments: &Arguments) -> Result<Vec<(&'static str, String)>, ToolError> {
    let zip = req_str(arguments, "zip")?;
    let value = match opt_str(arguments, "country") {
        Some(country) => format!("{zip},{country}"),
        None => zip.to_string(),
    };
    Ok(vec![("zip", value)])
}

// ─── Tool Handlers ──────────────────────────────────────────────────────────

#[derive(Clone, Copy)]
enum Lookup {
    City,
    Coordinates,
    Zip,
}

struct CurrentWeather {
    api: Arc<WeatherApi>,
    lookup: Lookup,
}

/// The three current-weather tools over one shared client.
pub fn tools(api: Arc<WeatherApi>) -> Vec<Arc<dyn ToolHandler>> {
    [Lookup::City, Lookup::Coordinates, Lookup::Zip]
        .into_iter()
        .map(|lookup| {
            Arc::new(CurrentWeather {
                api: Arc::clone(&api),
                lookup,
            }) as Arc<dyn ToolHandler>
        })
        .collect()
}

fn with_common(mut properties: Value) -> Value {
    if let Some(map) = properties.as_object_mut() {
        map.insert(
            "units".into(),
            json!({"type": "string", "enum": UNITS, "description": "Defaults to metric"}),
        );
        map.insert(
            "lang".into(),
            json!({"type": "string", "description": "Description language, e.g. \"en\""}),
        );
    }
    properties
}

#[async_trait]
impl ToolHandler for CurrentWeather {
    fn descriptor(&self) -> McpToolDefinition {
        let (name, description, properties, required) = match self.lookup {
            Lookup::City => (
                "get_current_weather_by_city",
                "Current weather for a city by name, e.g. \"London\" or \"Paris,FR\".",
                json!({"city": {"type": "string", "description": "City name, optionally with a country code"}}),
                json!(["city"]),
            ),
            Lookup::Coordinates => (
                "get_current_weather_by_coordinates",
                "Current weather at geographic coordinates.",
                json!({
                    "lat": {"type": "number", "description": "Latitude, -90 to 90"},
                    "lon": {"type": "number", "description": "Longitude, -180 to 180"}
                }),
                json!(["lat", "lon"]),
            ),
            Lookup::Zip => (
                "get_current_weather_by_zip",
                "Current weather for a postal code.",
                json!({
                    "zip": {"type": "string", "description": "Postal code"},
                    "country": {"type": "string", "description": "Two-letter country code, defaults to us"}
                }),
                json!(["zip"]),
            ),
        };
        McpToolDefinition {
            name: name.into(),
            description: Some(description.into()),
            input_schema: json!({
                "type": "object",
                "properties": with_common(properties),
                "required": required
            }),
        }
    }

    async fn call(&self, arguments: &Arguments) -> Result<String, ToolError> {
        let query = match self.lookup {
            Lookup::City => vec![("q", req_str(arguments, "city")?.to_string())],
            Lookup::Coordinates => coordinates_query(arguments)?,
            Lookup::Zip => zip_query(arguments)?,
        };
        let body = self.api.current(query, arguments).await?;
        serde_json::to_string(&body).map_err(|e| ToolError::upstream(e.to_string()))
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn args(value: Value) -> Arguments {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_coordinates_validated() {
        let query = coordinates_query(&args(json!({"lat": "59.9", "lon": 10.75}))).unwrap();
        assert_eq!(query, vec![("lat", "59.9".to_string()), ("lon", "10.75".to_string())]);

        let err = coordinates_query(&args(json!({"lat": 95, "lon": 0}))).unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgument { ref name, .. } if name == "lat"));
        let err = coordinates_query(&args(json!({"lat": 10}))).unwrap_err();
        assert!(matches!(err, ToolError::MissingArgument { ref name } if name == "lon"));
    }

    #[test]
    fn test_zip_with_country() {
        assert_eq!(
            zip_query(&args(json!({"zip": "94040", "country": "us"}))).unwrap(),
            vec![("zip", "94040,us".to_string())]
        );
    }

    #[test]
    fn test_units_default_and_validation() {
        assert_eq!(
            common_params(&args(json!({}))).unwrap(),
            vec![("units", "metric".to_string())]
        );
        assert!(common_params(&args(json!({"units": "kelvin"}))).is_err());
    }

    #[test]
    fn test_descriptors_require_location() {
        let api = Arc::new(WeatherApi::new(None).unwrap());
        let tools = tools(api);
        let descriptors: Vec<McpToolDefinition> = tools.iter().map(|t| t.descriptor()).collect();
        assert_eq!(descriptors.len(), 3);
        assert_eq!(descriptors[1].required_params(), vec!["lat", "lon"]);
        assert!(descriptors[0].input_schema["properties"]["units"].is_object());
    }

    #[tokio::test]
    async fn test_call_without_key_fails_cleanly() {
        let api = Arc::new(WeatherApi::new(None).unwrap());
        let tool = &tools(api)[0];
        let err = tool.call(&args(json!({"city": "Oslo"}))).await.unwrap_err();
        assert_eq!(err.to_string(), "OPENWEATHER_API_KEY is not set");
    }
}
