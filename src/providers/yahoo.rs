//! Yahoo weather provider
//!
//! Free-text and coordinate place lookup go through JSON-over-YQL
//! endpoints; the forecast itself is an XML document keyed by a WOEID
//! and a unit letter. The forecast parse is all-or-nothing: a document
//! missing any required field is rejected outright, never returned as a
//! partially populated snapshot.

use crate::error::WeatherError;
use crate::models::{
    CONDITION_CODE_INVALID, CONDITION_CODE_NOT_AVAILABLE, DayForecast, TemperatureUnit,
    WeatherInfo, WeatherLocation, WindSpeedUnit, sanitize_temperature,
};
use crate::providers::{WeatherProvider, WeatherQuery};
use crate::retriever::Retriever;
use async_trait::async_trait;
use chrono::Utc;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

const YQL_URL: &str = "https://query.yahooapis.com/v1/public/yql?format=json&q=";
const FORECAST_URL: &str = "https://weather.yahooapis.com/forecastrss";

/// Yahoo-backed weather provider
pub struct YahooProvider {
    retriever: Arc<dyn Retriever>,
    language: String,
}

impl YahooProvider {
    /// Create a provider for the given device locale. Yahoo accepts
    /// BCP-47 style codes directly, so the locale is passed through
    /// with an English fallback rather than table-matched.
    pub fn new(retriever: Arc<dyn Retriever>, locale: &str) -> Self {
        let language = if locale.is_empty() {
            "en-US".to_string()
        } else {
            locale.replace('_', "-")
        };
        Self {
            retriever,
            language,
        }
    }

    async fn run_yql(&self, query: String) -> Result<String, WeatherError> {
        let url = format!("{YQL_URL}{}", urlencoding::encode(&query));
        self.retriever.retrieve(&url).await
    }
}

#[async_trait]
impl WeatherProvider for YahooProvider {
    fn name(&self) -> &'static str {
        "yahoo"
    }

    #[instrument(skip(self), fields(query))]
    async fn lookup_locations(
        &self,
        query: &str,
    ) -> Result<Vec<WeatherLocation>, WeatherError> {
        let yql = format!(
            "select woeid, postal, admin1, admin2, admin3, locality1, locality2, country \
             from geo.places where text = \"{}\" and lang = \"{}\"",
            query.replace('"', ""),
            self.language
        );
        let body = self.run_yql(yql).await?;
        parse_places(&body)
    }

    #[instrument(skip(self))]
    async fn lookup_coordinates(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<Vec<WeatherLocation>, WeatherError> {
        let yql = format!(
            "select * from geo.placefinder where text = \"{latitude},{longitude}\" \
             and gflags = \"R\" and locale = \"{}\"",
            self.language
        );
        let body = self.run_yql(yql).await?;
        parse_placefinder(&body)
    }

    #[instrument(skip(self), fields(query = ?query, metric))]
    async fn fetch_weather(
        &self,
        query: &WeatherQuery,
        metric: bool,
    ) -> Result<WeatherInfo, WeatherError> {
        let city_id = match query {
            WeatherQuery::CityId(id) => id.clone(),
            WeatherQuery::Coordinates {
                latitude,
                longitude,
            } => {
                // Yahoo has no coordinate-keyed forecast endpoint, so
                // coordinates are resolved to a WOEID first
                let candidates = self.lookup_coordinates(*latitude, *longitude).await?;
                match candidates.into_iter().next() {
                    Some(location) => location.city_id,
                    None => {
                        return Err(WeatherError::location_unavailable(
                            "No place found for coordinates",
                        ));
                    }
                }
            }
        };

        let unit = if metric { "c" } else { "f" };
        let url = format!("{FORECAST_URL}?w={city_id}&u={unit}");
        let body = self.retriever.retrieve(&url).await?;
        parse_forecast_document(&body, &city_id, metric)
    }
}

/// Read an attribute value by name from an XML element
fn attr(element: &BytesStart<'_>, name: &str) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|a| a.key.as_ref() == name.as_bytes())
        .and_then(|a| a.unescape_value().ok())
        .map(|v| v.into_owned())
}

fn attr_f32(element: &BytesStart<'_>, name: &str) -> Option<f32> {
    attr(element, name).and_then(|v| v.parse().ok())
}

fn attr_i32(element: &BytesStart<'_>, name: &str) -> Option<i32> {
    attr(element, name).and_then(|v| v.parse().ok())
}

/// Fields collected while walking the forecast document, validated as a
/// whole once the walk completes
#[derive(Default)]
struct ForecastDocument {
    city: Option<String>,
    temperature_unit: Option<TemperatureUnit>,
    wind_speed_unit: Option<WindSpeedUnit>,
    condition: Option<String>,
    condition_code: Option<i32>,
    temperature: Option<f32>,
    humidity: Option<f32>,
    wind_speed: Option<f32>,
    wind_direction: Option<f32>,
    forecasts: Vec<DayForecast>,
}

/// Parse a forecast XML document into a snapshot. Requires the
/// temperature unit, wind-speed unit, condition code, current
/// temperature and at least one forecast entry; anything less fails the
/// whole parse.
pub fn parse_forecast_document(
    body: &str,
    city_id: &str,
    metric: bool,
) -> Result<WeatherInfo, WeatherError> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut doc = ForecastDocument::default();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                b"yweather:location" => {
                    doc.city = attr(e, "city");
                }
                b"yweather:units" => {
                    doc.temperature_unit = attr(e, "temperature").and_then(|u| match u.as_str() {
                        "C" | "c" => Some(TemperatureUnit::Celsius),
                        "F" | "f" => Some(TemperatureUnit::Fahrenheit),
                        _ => None,
                    });
                    doc.wind_speed_unit = attr(e, "speed").and_then(|u| match u.as_str() {
                        "km/h" => Some(WindSpeedUnit::Kmh),
                        "mph" => Some(WindSpeedUnit::Mph),
                        _ => None,
                    });
                }
                b"yweather:wind" => {
                    doc.wind_speed = attr_f32(e, "speed");
                    doc.wind_direction = attr_f32(e, "direction");
                }
                b"yweather:atmosphere" => {
                    doc.humidity = attr_f32(e, "humidity");
                }
                b"yweather:condition" => {
                    doc.condition = attr(e, "text");
                    doc.condition_code = attr_i32(e, "code");
                    doc.temperature = attr_f32(e, "temp");
                }
                b"yweather:forecast" => {
                    if let (Some(low), Some(high), Some(code)) = (
                        attr_f32(e, "low"),
                        attr_f32(e, "high"),
                        attr_i32(e, "code"),
                    ) {
                        doc.forecasts.push(DayForecast {
                            low: sanitize_temperature(low, metric),
                            high: sanitize_temperature(high, metric),
                            condition_code: code,
                            condition: attr(e, "text"),
                        });
                    } else {
                        // A broken forecast entry poisons the document
                        return Err(WeatherError::malformed(
                            "Forecast entry missing low/high/code",
                        ));
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(WeatherError::malformed(format!("Invalid XML: {e}")));
            }
        }
    }

    // All-or-nothing validation
    let (Some(temperature_unit), Some(wind_speed_unit), Some(mut condition_code), Some(temperature)) = (
        doc.temperature_unit,
        doc.wind_speed_unit,
        doc.condition_code,
        doc.temperature,
    ) else {
        return Err(WeatherError::malformed(
            "Forecast document missing required fields",
        ));
    };
    if doc.forecasts.is_empty() {
        return Err(WeatherError::malformed("Forecast document has no forecast entries"));
    }

    // The "not available" sentinel renders as a placeholder icon; a
    // usable code from today's forecast entry is a better approximation
    if condition_code == CONDITION_CODE_NOT_AVAILABLE {
        let first = doc.forecasts[0].condition_code;
        if first != CONDITION_CODE_NOT_AVAILABLE && first != CONDITION_CODE_INVALID {
            debug!("Substituting condition code {} for the 'not available' sentinel", first);
            condition_code = first;
        }
    }

    let (low, high) = (doc.forecasts[0].low, doc.forecasts[0].high);

    Ok(WeatherInfo {
        city_id: city_id.to_string(),
        city: doc.city.unwrap_or_default(),
        condition: doc.condition.unwrap_or_default(),
        condition_code,
        temperature: sanitize_temperature(temperature, metric),
        temperature_unit,
        low,
        high,
        humidity: doc.humidity.unwrap_or(f32::NAN),
        wind_speed: doc.wind_speed.unwrap_or(f32::NAN),
        wind_speed_unit,
        wind_direction: doc.wind_direction.unwrap_or(f32::NAN),
        forecasts: doc.forecasts,
        retrieved_at: Utc::now(),
    })
}

/// YQL attributes arrive either as a bare string or as an object whose
/// text sits under "content"
fn content_of(place: &Value, key: &str) -> Option<String> {
    match place.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => obj
            .get("content")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

/// Normalize the YQL quirk where a single match comes back as a bare
/// object instead of a one-element array
fn as_place_list(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(_) => vec![value],
        _ => Vec::new(),
    }
}

/// Parse a geo.places search payload into location candidates
pub fn parse_places(body: &str) -> Result<Vec<WeatherLocation>, WeatherError> {
    let root: Value = serde_json::from_str(body)
        .map_err(|e| WeatherError::malformed(format!("place search: {e}")))?;
    let results = root
        .get("query")
        .and_then(|q| q.get("results"))
        .ok_or_else(|| WeatherError::malformed("place search response has no results"))?;

    let places = results.get("place").map(as_place_list).unwrap_or_default();

    let mut locations = Vec::with_capacity(places.len());
    for place in places {
        let Some(city_id) = content_of(place, "woeid") else {
            warn!("Skipping place candidate without a woeid");
            continue;
        };
        // Finest locality granularity available wins
        let city = content_of(place, "locality2")
            .or_else(|| content_of(place, "locality1"))
            .or_else(|| content_of(place, "admin3"))
            .or_else(|| content_of(place, "admin2"))
            .or_else(|| content_of(place, "admin1"))
            .unwrap_or_default();
        locations.push(WeatherLocation {
            city_id,
            city,
            postal: content_of(place, "postal"),
            country_id: place
                .get("country")
                .and_then(|c| c.get("code"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            country: content_of(place, "country").unwrap_or_default(),
            state: content_of(place, "admin1"),
        });
    }
    Ok(locations)
}

/// Parse a geo.placefinder payload (coordinate reverse lookup)
pub fn parse_placefinder(body: &str) -> Result<Vec<WeatherLocation>, WeatherError> {
    let root: Value = serde_json::from_str(body)
        .map_err(|e| WeatherError::malformed(format!("placefinder: {e}")))?;
    let results = root
        .get("query")
        .and_then(|q| q.get("results"))
        .ok_or_else(|| WeatherError::malformed("placefinder response has no results"))?;

    let entries = results.get("Result").map(as_place_list).unwrap_or_default();

    let mut locations = Vec::with_capacity(entries.len());
    for entry in entries {
        let Some(city_id) = content_of(entry, "woeid") else {
            warn!("Skipping placefinder result without a woeid");
            continue;
        };
        locations.push(WeatherLocation {
            city_id,
            city: content_of(entry, "city").unwrap_or_default(),
            postal: content_of(entry, "postal"),
            country_id: content_of(entry, "countrycode").unwrap_or_default(),
            country: content_of(entry, "country").unwrap_or_default(),
            state: content_of(entry, "state"),
        });
    }
    Ok(locations)
}
