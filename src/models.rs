//! Data models for normalized weather information
//!
//! This module contains the provider-independent weather value objects.
//! Provider-specific response structures live next to the parser that
//! consumes them in `providers`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Marker for "no condition code could be derived"
pub const CONDITION_CODE_INVALID: i32 = -1;

/// Yahoo's "unknown / not available" condition sentinel
pub const CONDITION_CODE_NOT_AVAILABLE: i32 = 3200;

/// Temperatures above this are implausible in Celsius or Fahrenheit and
/// are reinterpreted as Kelvin
const KELVIN_THRESHOLD: f32 = 170.0;

/// Temperature unit as reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    Celsius,
    Fahrenheit,
    #[default]
    Unknown,
}

impl TemperatureUnit {
    /// Display symbol; "–" for the invalid marker
    #[must_use]
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Celsius => "°C",
            Self::Fahrenheit => "°F",
            Self::Unknown => "–",
        }
    }
}

/// Wind-speed unit as reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WindSpeedUnit {
    Kmh,
    Mph,
    #[default]
    Unknown,
}

impl WindSpeedUnit {
    /// Display label; "–" for the invalid marker
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Kmh => "km/h",
            Self::Mph => "mph",
            Self::Unknown => "–",
        }
    }
}

/// Single forecast day. Ordering within `WeatherInfo::forecasts` is
/// chronological ascending; there is no identity beyond position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayForecast {
    /// Low temperature, NaN when the provider omitted it
    pub low: f32,
    /// High temperature, NaN when the provider omitted it
    pub high: f32,
    /// Condition code, `CONDITION_CODE_INVALID` when unmapped
    pub condition_code: i32,
    /// Textual condition, when the provider supplies one
    pub condition: Option<String>,
}

/// Normalized weather snapshot, immutable once constructed.
///
/// Missing numeric fields are NaN; renderers must show a placeholder
/// rather than crash on them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherInfo {
    /// Provider-specific city identifier
    pub city_id: String,
    /// City display name
    pub city: String,
    /// Textual condition
    pub condition: String,
    /// Numeric condition code, drives icon selection
    pub condition_code: i32,
    /// Current temperature
    pub temperature: f32,
    pub temperature_unit: TemperatureUnit,
    /// Today's low
    pub low: f32,
    /// Today's high
    pub high: f32,
    /// Relative humidity in percent
    pub humidity: f32,
    pub wind_speed: f32,
    pub wind_speed_unit: WindSpeedUnit,
    /// Wind direction in degrees (0-360, where 0/360 is North)
    pub wind_direction: f32,
    /// Up to five forecast days, day 0 per provider convention
    pub forecasts: Vec<DayForecast>,
    /// When this snapshot was retrieved
    pub retrieved_at: DateTime<Utc>,
}

/// A resolved geographic place, used both as a disambiguation candidate
/// and as the persisted pinned location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherLocation {
    /// Provider-specific city identifier (WOEID-like token or numeric id)
    pub city_id: String,
    /// City display name
    pub city: String,
    /// Postal code, when known
    pub postal: Option<String>,
    /// Country code (ISO 3166-1 alpha-2 where the provider uses one)
    pub country_id: String,
    /// Country display name
    pub country: String,
    /// State / admin region, when known
    pub state: Option<String>,
}

/// Reinterpret implausible temperatures as Kelvin and convert to the
/// requested unit. Providers occasionally return Kelvin even when
/// Celsius or Fahrenheit was requested.
#[must_use]
pub fn sanitize_temperature(value: f32, metric: bool) -> f32 {
    if value > KELVIN_THRESHOLD {
        let celsius = kelvin_to_celsius(value);
        if metric {
            celsius
        } else {
            celsius_to_fahrenheit(celsius)
        }
    } else {
        value
    }
}

/// Convert temperature from Kelvin to Celsius
#[must_use]
pub fn kelvin_to_celsius(kelvin: f32) -> f32 {
    kelvin - 273.15
}

/// Convert temperature from Celsius to Fahrenheit
#[must_use]
pub fn celsius_to_fahrenheit(celsius: f32) -> f32 {
    celsius * 1.8 + 32.0
}

/// Convert wind direction in degrees to a cardinal direction.
/// Returns "–" for NaN or out-of-range input.
#[must_use]
pub fn wind_direction_to_cardinal(degrees: f32) -> &'static str {
    if !degrees.is_finite() {
        return "–";
    }
    let normalized = degrees.rem_euclid(360.0).round() as u16;
    match normalized {
        0..=11 | 349..=360 => "N",
        12..=33 => "NNE",
        34..=56 => "NE",
        57..=78 => "ENE",
        79..=101 => "E",
        102..=123 => "ESE",
        124..=146 => "SE",
        147..=168 => "SSE",
        169..=191 => "S",
        192..=213 => "SSW",
        214..=236 => "SW",
        237..=258 => "WSW",
        259..=281 => "W",
        282..=303 => "WNW",
        304..=326 => "NW",
        327..=348 => "NNW",
        _ => "–",
    }
}

impl WeatherInfo {
    /// Format the current temperature with unit, "–" when unavailable
    #[must_use]
    pub fn format_temperature(&self) -> String {
        if self.temperature.is_nan() {
            "–".to_string()
        } else {
            format!("{:.0}{}", self.temperature, self.temperature_unit.symbol())
        }
    }

    /// Format today's low/high range, "–" for missing sides
    #[must_use]
    pub fn format_low_high(&self) -> String {
        let fmt = |v: f32| {
            if v.is_nan() {
                "–".to_string()
            } else {
                format!("{v:.0}")
            }
        };
        format!("{} / {}", fmt(self.low), fmt(self.high))
    }

    /// Format wind speed and direction, "–" when unavailable
    #[must_use]
    pub fn format_wind(&self) -> String {
        if self.wind_speed.is_nan() {
            return "–".to_string();
        }
        format!(
            "{:.0} {} {}",
            self.wind_speed,
            self.wind_speed_unit.label(),
            wind_direction_to_cardinal(self.wind_direction)
        )
    }

    /// Format relative humidity, "–" when unavailable
    #[must_use]
    pub fn format_humidity(&self) -> String {
        if self.humidity.is_nan() {
            "–".to_string()
        } else {
            format!("{:.0}%", self.humidity)
        }
    }

    /// Whether an icon can be selected for the current condition
    #[must_use]
    pub fn has_valid_condition_code(&self) -> bool {
        self.condition_code != CONDITION_CODE_INVALID
    }
}

impl WeatherLocation {
    /// Format location as "City, Country" (or "City, State, Country")
    #[must_use]
    pub fn display_name(&self) -> String {
        match &self.state {
            Some(state) if !state.is_empty() => {
                format!("{}, {}, {}", self.city, state, self.country)
            }
            _ => format!("{}, {}", self.city, self.country),
        }
    }
}
