//! OpenWeatherMap provider
//!
//! JSON REST endpoints for free-text city search, current conditions and
//! a five-entry daily forecast, keyed by an API credential, unit system
//! and language code. Condition codes are derived from the provider's
//! numeric condition ids first and its icon names second; when neither
//! matches, the snapshot carries the invalid marker and the caller
//! decides whether that is fatal.

use crate::error::WeatherError;
use crate::models::{
    CONDITION_CODE_INVALID, DayForecast, TemperatureUnit, WeatherInfo, WeatherLocation,
    WindSpeedUnit, sanitize_temperature,
};
use crate::providers::{WeatherProvider, WeatherQuery, match_language};
use crate::retriever::Retriever;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

const BASE_URL: &str = "https://api.openweathermap.org/data/2.5";
const FORECAST_DAYS: usize = 5;

/// Language codes supported by the API, matched against the device
/// locale by prefix. Longer prefixes first.
const LANGUAGES: &[(&str, &str)] = &[
    ("zh-TW", "zh_tw"),
    ("zh-Hant", "zh_tw"),
    ("zh", "zh_cn"),
    ("bg", "bg"),
    ("de", "de"),
    ("es", "sp"),
    ("fi", "fi"),
    ("fr", "fr"),
    ("it", "it"),
    ("nl", "nl"),
    ("pl", "pl"),
    ("pt", "pt"),
    ("ro", "ro"),
    ("ru", "ru"),
    ("sv", "se"),
    ("tr", "tr"),
    ("uk", "ua"),
];

/// OpenWeatherMap-backed weather provider
pub struct OpenWeatherMapProvider {
    retriever: Arc<dyn Retriever>,
    api_key: String,
    language: String,
}

impl OpenWeatherMapProvider {
    /// Create a provider with the given credential and device locale
    pub fn new(retriever: Arc<dyn Retriever>, api_key: String, locale: &str) -> Self {
        let language = match_language(locale, LANGUAGES, "en");
        Self {
            retriever,
            api_key,
            language,
        }
    }

    fn selector(query: &WeatherQuery) -> String {
        match query {
            WeatherQuery::CityId(id) => format!("id={id}"),
            WeatherQuery::Coordinates {
                latitude,
                longitude,
            } => format!("lat={latitude}&lon={longitude}"),
        }
    }

    fn units(metric: bool) -> &'static str {
        if metric { "metric" } else { "imperial" }
    }
}

#[async_trait]
impl WeatherProvider for OpenWeatherMapProvider {
    fn name(&self) -> &'static str {
        "openweathermap"
    }

    #[instrument(skip(self), fields(query))]
    async fn lookup_locations(
        &self,
        query: &str,
    ) -> Result<Vec<WeatherLocation>, WeatherError> {
        let url = format!(
            "{BASE_URL}/find?q={}&mode=json&lang={}&appid={}",
            urlencoding::encode(query),
            self.language,
            self.api_key
        );
        let body = self.retriever.retrieve(&url).await?;
        parse_search_results(&body)
    }

    #[instrument(skip(self))]
    async fn lookup_coordinates(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<Vec<WeatherLocation>, WeatherError> {
        let url = format!(
            "{BASE_URL}/find?lat={latitude}&lon={longitude}&cnt=3&mode=json&lang={}&appid={}",
            self.language, self.api_key
        );
        let body = self.retriever.retrieve(&url).await?;
        parse_search_results(&body)
    }

    #[instrument(skip(self), fields(query = ?query, metric))]
    async fn fetch_weather(
        &self,
        query: &WeatherQuery,
        metric: bool,
    ) -> Result<WeatherInfo, WeatherError> {
        let selector = Self::selector(query);
        let units = Self::units(metric);

        let conditions_url = format!(
            "{BASE_URL}/weather?{selector}&mode=json&units={units}&lang={}&appid={}",
            self.language, self.api_key
        );
        let forecast_url = format!(
            "{BASE_URL}/forecast/daily?{selector}&mode=json&units={units}&lang={}&cnt={FORECAST_DAYS}&appid={}",
            self.language, self.api_key
        );

        let conditions_body = self.retriever.retrieve(&conditions_url).await?;
        let forecast_body = self.retriever.retrieve(&forecast_url).await?;

        parse_weather(&conditions_body, &forecast_body, query, metric)
    }
}

/// Parse a current-conditions body plus the matching forecast body into
/// a normalized snapshot.
pub fn parse_weather(
    conditions_body: &str,
    forecast_body: &str,
    query: &WeatherQuery,
    metric: bool,
) -> Result<WeatherInfo, WeatherError> {
    let current: response::CurrentConditions = serde_json::from_str(conditions_body)
        .map_err(|e| WeatherError::malformed(format!("current conditions: {e}")))?;
    let forecast: response::DailyForecast = serde_json::from_str(forecast_body)
        .map_err(|e| WeatherError::malformed(format!("daily forecast: {e}")))?;

    let Some(condition) = current.weather.first() else {
        return Err(WeatherError::malformed("empty weather condition array"));
    };

    let condition_code = map_condition_code(condition.id, condition.icon.as_deref());
    if condition_code == CONDITION_CODE_INVALID {
        warn!(
            "Unknown condition (id {}, icon {:?}), keeping invalid marker",
            condition.id, condition.icon
        );
    }

    let forecasts: Vec<DayForecast> = forecast
        .list
        .iter()
        .take(FORECAST_DAYS)
        .map(|item| {
            let code = item
                .weather
                .first()
                .map(|w| map_condition_code(w.id, w.icon.as_deref()))
                .unwrap_or(CONDITION_CODE_INVALID);
            DayForecast {
                low: sanitize_temperature(item.temp.min, metric),
                high: sanitize_temperature(item.temp.max, metric),
                condition_code: code,
                condition: item.weather.first().map(|w| w.description.clone()),
            }
        })
        .collect();

    // Today's range prefers the forecast entry over the instantaneous
    // min/max in the conditions payload
    let (low, high) = match forecasts.first() {
        Some(today) => (today.low, today.high),
        None => (
            current
                .main
                .temp_min
                .map(|t| sanitize_temperature(t, metric))
                .unwrap_or(f32::NAN),
            current
                .main
                .temp_max
                .map(|t| sanitize_temperature(t, metric))
                .unwrap_or(f32::NAN),
        ),
    };

    // Metric responses report wind in m/s; normalize to km/h
    let wind_speed = match current.wind.speed {
        Some(speed) if metric => speed * 3.6,
        Some(speed) => speed,
        None => f32::NAN,
    };

    let city_id = match query {
        WeatherQuery::CityId(id) => id.clone(),
        WeatherQuery::Coordinates { .. } => current
            .id
            .map(|id| id.to_string())
            .unwrap_or_default(),
    };

    debug!("Parsed OpenWeatherMap snapshot for city id '{}'", city_id);

    Ok(WeatherInfo {
        city_id,
        city: current.name.unwrap_or_default(),
        condition: condition.description.clone(),
        condition_code,
        temperature: sanitize_temperature(current.main.temp, metric),
        temperature_unit: if metric {
            TemperatureUnit::Celsius
        } else {
            TemperatureUnit::Fahrenheit
        },
        low,
        high,
        humidity: current.main.humidity.unwrap_or(f32::NAN),
        wind_speed,
        wind_speed_unit: if metric {
            WindSpeedUnit::Kmh
        } else {
            WindSpeedUnit::Mph
        },
        wind_direction: current.wind.deg.unwrap_or(f32::NAN),
        forecasts,
        retrieved_at: Utc::now(),
    })
}

/// Parse a `/find` search payload into location candidates
pub fn parse_search_results(body: &str) -> Result<Vec<WeatherLocation>, WeatherError> {
    let search: response::SearchResults = serde_json::from_str(body)
        .map_err(|e| WeatherError::malformed(format!("location search: {e}")))?;

    Ok(search
        .list
        .into_iter()
        .map(|item| {
            let country = item
                .sys
                .and_then(|sys| sys.country)
                .unwrap_or_default();
            WeatherLocation {
                city_id: item.id.to_string(),
                city: item.name,
                postal: None,
                country_id: country.clone(),
                country,
                state: None,
            }
        })
        .collect())
}

/// Derive the normalized condition code. Numeric condition-id overrides
/// take precedence over the icon-name table for known special cases;
/// `CONDITION_CODE_INVALID` when neither matches.
fn map_condition_code(id: i64, icon: Option<&str>) -> i32 {
    if let Some(code) = condition_id_override(id) {
        return code;
    }
    icon.and_then(icon_condition_code)
        .unwrap_or(CONDITION_CODE_INVALID)
}

/// Condition-id overrides for the thunderstorm, drizzle, rain, snow,
/// atmosphere and extreme categories
fn condition_id_override(id: i64) -> Option<i32> {
    match id {
        // thunderstorm with drizzle / heavy or ragged thunderstorms
        202 | 212 | 221 | 230 | 231 | 232 => Some(4),
        // drizzle
        300..=321 => Some(9),
        // rain
        500 | 501 | 520 | 521 => Some(11),
        511 => Some(10),
        522 | 531 => Some(12),
        // snow
        600 | 620 => Some(14),
        601 | 621 => Some(16),
        602 => Some(41),
        611 => Some(18),
        612 => Some(6),
        615 | 616 => Some(5),
        622 => Some(43),
        // atmosphere
        701 | 741 => Some(20),
        711 => Some(22),
        721 => Some(21),
        731 | 751 | 761 | 762 => Some(19),
        771 => Some(23),
        // extreme
        781 | 900 => Some(0),
        901 => Some(1),
        902 => Some(2),
        903 => Some(25),
        904 => Some(36),
        905 => Some(24),
        906 => Some(17),
        _ => None,
    }
}

/// Icon-name fallback table
fn icon_condition_code(icon: &str) -> Option<i32> {
    match icon {
        "01d" => Some(32),
        "01n" => Some(31),
        "02d" => Some(30),
        "02n" => Some(29),
        "03d" | "03n" => Some(26),
        "04d" => Some(28),
        "04n" => Some(27),
        "09d" | "09n" => Some(11),
        "10d" | "10n" => Some(12),
        "11d" | "11n" => Some(4),
        "13d" | "13n" => Some(16),
        "50d" | "50n" => Some(20),
        _ => None,
    }
}

/// OpenWeatherMap API response structures
mod response {
    use serde::Deserialize;

    /// Current conditions. The condition array, main block and wind
    /// block are required; their absence fails the whole parse.
    #[derive(Debug, Deserialize)]
    pub struct CurrentConditions {
        pub weather: Vec<Condition>,
        pub main: Main,
        pub wind: Wind,
        pub name: Option<String>,
        pub id: Option<i64>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Condition {
        pub id: i64,
        pub description: String,
        pub icon: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Main {
        pub temp: f32,
        pub temp_min: Option<f32>,
        pub temp_max: Option<f32>,
        pub humidity: Option<f32>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Wind {
        pub speed: Option<f32>,
        pub deg: Option<f32>,
    }

    #[derive(Debug, Deserialize)]
    pub struct DailyForecast {
        #[serde(default)]
        pub list: Vec<ForecastItem>,
    }

    #[derive(Debug, Deserialize)]
    pub struct ForecastItem {
        pub temp: ForecastTemp,
        #[serde(default)]
        pub weather: Vec<Condition>,
    }

    #[derive(Debug, Deserialize)]
    pub struct ForecastTemp {
        pub min: f32,
        pub max: f32,
    }

    #[derive(Debug, Deserialize)]
    pub struct SearchResults {
        #[serde(default)]
        pub list: Vec<SearchItem>,
    }

    #[derive(Debug, Deserialize)]
    pub struct SearchItem {
        pub id: i64,
        pub name: String,
        pub sys: Option<SearchSys>,
    }

    #[derive(Debug, Deserialize)]
    pub struct SearchSys {
        pub country: Option<String>,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const CURRENT: &str = r#"{
        "id": 2950159,
        "name": "Berlin",
        "weather": [{"id": 500, "main": "Rain", "description": "light rain", "icon": "10d"}],
        "main": {"temp": 12.3, "temp_min": 10.0, "temp_max": 14.0, "humidity": 81},
        "wind": {"speed": 4.1, "deg": 250}
    }"#;

    const FORECAST: &str = r#"{
        "list": [
            {"temp": {"min": 9.0, "max": 15.0}, "weather": [{"id": 500, "description": "light rain", "icon": "10d"}]},
            {"temp": {"min": 7.5, "max": 13.0}, "weather": [{"id": 800, "description": "clear sky", "icon": "01d"}]},
            {"temp": {"min": 8.0, "max": 12.0}, "weather": [{"id": 212, "description": "heavy thunderstorm", "icon": "11d"}]}
        ]
    }"#;

    #[test]
    fn test_parse_weather_normalizes_fields() {
        let query = WeatherQuery::CityId("2950159".to_string());
        let info = parse_weather(CURRENT, FORECAST, &query, true).unwrap();

        assert_eq!(info.city_id, "2950159");
        assert_eq!(info.city, "Berlin");
        assert_eq!(info.condition, "light rain");
        assert_eq!(info.condition_code, 11);
        assert!((info.temperature - 12.3).abs() < f32::EPSILON);
        assert_eq!(info.temperature_unit, TemperatureUnit::Celsius);
        // today's range comes from the first forecast entry
        assert!((info.low - 9.0).abs() < f32::EPSILON);
        assert!((info.high - 15.0).abs() < f32::EPSILON);
        assert!((info.humidity - 81.0).abs() < f32::EPSILON);
        // m/s converted to km/h for metric
        assert!((info.wind_speed - 14.76).abs() < 0.01);
        assert_eq!(info.wind_speed_unit, WindSpeedUnit::Kmh);
        assert_eq!(info.forecasts.len(), 3);
        assert_eq!(info.forecasts[2].condition_code, 4);
    }

    #[test]
    fn test_parse_weather_missing_wind_fails() {
        let current = r#"{
            "weather": [{"id": 800, "description": "clear sky", "icon": "01d"}],
            "main": {"temp": 20.0}
        }"#;
        let query = WeatherQuery::CityId("1".to_string());
        let result = parse_weather(current, FORECAST, &query, true);
        assert!(matches!(result, Err(WeatherError::Malformed { .. })));
    }

    #[test]
    fn test_parse_weather_empty_condition_array_fails() {
        let current = r#"{
            "weather": [],
            "main": {"temp": 20.0},
            "wind": {"speed": 1.0}
        }"#;
        let query = WeatherQuery::CityId("1".to_string());
        let result = parse_weather(current, FORECAST, &query, true);
        assert!(matches!(result, Err(WeatherError::Malformed { .. })));
    }

    #[test]
    fn test_parse_weather_kelvin_sanitization() {
        let current = r#"{
            "weather": [{"id": 800, "description": "clear sky", "icon": "01d"}],
            "main": {"temp": 300.0, "humidity": 40},
            "wind": {"speed": 2.0, "deg": 90}
        }"#;
        let empty_forecast = r#"{"list": []}"#;
        let query = WeatherQuery::CityId("1".to_string());

        let metric = parse_weather(current, empty_forecast, &query, true).unwrap();
        assert!((metric.temperature - 26.85).abs() < 0.01);

        let imperial = parse_weather(current, empty_forecast, &query, false).unwrap();
        assert!((imperial.temperature - 80.33).abs() < 0.01);
    }

    #[rstest]
    // numeric overrides take precedence over the icon table
    #[case(212, Some("01d"), 4)]
    #[case(301, Some("01d"), 9)]
    #[case(602, None, 41)]
    // unmapped id falls back to the icon table
    #[case(800, Some("01d"), 32)]
    #[case(800, Some("01n"), 31)]
    // nothing matches
    #[case(799, Some("99x"), CONDITION_CODE_INVALID)]
    #[case(799, None, CONDITION_CODE_INVALID)]
    fn test_condition_code_mapping(
        #[case] id: i64,
        #[case] icon: Option<&str>,
        #[case] expected: i32,
    ) {
        assert_eq!(map_condition_code(id, icon), expected);
    }

    #[test]
    fn test_parse_search_results() {
        let body = r#"{
            "count": 2,
            "list": [
                {"id": 2950159, "name": "Berlin", "sys": {"country": "DE"}},
                {"id": 4500771, "name": "Berlin", "sys": {"country": "US"}}
            ]
        }"#;
        let locations = parse_search_results(body).unwrap();
        assert_eq!(locations.len(), 2);
        assert_eq!(locations[0].city_id, "2950159");
        assert_eq!(locations[0].country_id, "DE");
        assert_eq!(locations[1].country_id, "US");
    }

    #[test]
    fn test_parse_search_results_garbage_fails() {
        assert!(matches!(
            parse_search_results("not json"),
            Err(WeatherError::Malformed { .. })
        ));
    }
}
