/*!
 # Location and sun time computation

 Resolves the coordinates used for sunrise/sunset relative schedule
 entries. Several IP-geolocation HTTP services are tried in order, each
 with its own response schema; when all of them fail, the system timezone
 is mapped to approximate coordinates, and as a last resort a fixed
 fallback location is used.

 Sun times themselves are a pure astronomical computation; any failure
 yields `None` and callers treat sun-based schedule entries as inert.
*/

use chrono::{DateTime, Datelike, Local, NaiveDate, TimeZone};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Coordinates used when no location source succeeds
pub const FALLBACK_COORDS: (f64, f64) = (47.4338, 19.1931);

const HTTP_TIMEOUT: Duration = Duration::from_secs(5);
const USER_AGENT: &str = concat!("lamp-scheduler/", env!("CARGO_PKG_VERSION"));

/// A resolved location. `located` is false when the fixed fallback is used.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub located: bool,
}

/// Sunrise and sunset for one local date. Either side may be absent when
/// the computation failed.
#[derive(Debug, Clone, Copy, Default)]
pub struct SunTimes {
    pub sunrise: Option<DateTime<Local>>,
    pub sunset: Option<DateTime<Local>>,
}

impl SunTimes {
    /// Computes the pair for a location and date
    pub fn compute(location: &Location, date: NaiveDate) -> SunTimes {
        match sun_times(location.latitude, location.longitude, date) {
            Some((sunrise, sunset)) => SunTimes {
                sunrise: Some(sunrise),
                sunset: Some(sunset),
            },
            None => SunTimes::default(),
        }
    }
}

/// One IP-geolocation provider: an endpoint plus the schema-specific
/// extraction of the coordinate pair from its JSON body.
struct Provider {
    name: &'static str,
    url: &'static str,
    parse: fn(&Value) -> Option<(f64, f64)>,
}

fn number(value: &Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

fn parse_ip_api(body: &Value) -> Option<(f64, f64)> {
    if body.get("status")?.as_str()? != "success" {
        return None;
    }
    Some((number(body.get("lat")?)?, number(body.get("lon")?)?))
}

fn parse_ipinfo(body: &Value) -> Option<(f64, f64)> {
    let loc = body.get("loc")?.as_str()?;
    let (lat, lon) = loc.split_once(',')?;
    Some((lat.trim().parse().ok()?, lon.trim().parse().ok()?))
}

fn parse_ipwhois(body: &Value) -> Option<(f64, f64)> {
    if !body.get("success")?.as_bool()? {
        return None;
    }
    Some((
        number(body.get("latitude")?)?,
        number(body.get("longitude")?)?,
    ))
}

fn parse_ipapi_co(body: &Value) -> Option<(f64, f64)> {
    Some((
        number(body.get("latitude")?)?,
        number(body.get("longitude")?)?,
    ))
}

fn parse_geolocation_db(body: &Value) -> Option<(f64, f64)> {
    Some((
        number(body.get("latitude")?)?,
        number(body.get("longitude")?)?,
    ))
}

/// Providers in priority order
const PROVIDERS: [Provider; 5] = [
    Provider {
        name: "ip-api.com",
        url: "http://ip-api.com/json/",
        parse: parse_ip_api,
    },
    Provider {
        name: "ipinfo.io",
        url: "https://ipinfo.io/json",
        parse: parse_ipinfo,
    },
    Provider {
        name: "ipwho.is",
        url: "https://ipwho.is/",
        parse: parse_ipwhois,
    },
    Provider {
        name: "ipapi.co",
        url: "https://ipapi.co/json/",
        parse: parse_ipapi_co,
    },
    Provider {
        name: "geolocation-db.com",
        url: "https://geolocation-db.com/json/",
        parse: parse_geolocation_db,
    },
];

/// Approximate coordinates for common IANA timezones, used as a
/// last-resort location heuristic when every HTTP provider fails.
const TIMEZONE_COORDS: [(&str, f64, f64); 48] = [
    ("Europe/Budapest", 47.4979, 19.0402),
    ("Europe/London", 51.5074, -0.1278),
    ("Europe/Berlin", 52.52, 13.405),
    ("Europe/Paris", 48.8566, 2.3522),
    ("Europe/Madrid", 40.4168, -3.7038),
    ("Europe/Rome", 41.9028, 12.4964),
    ("Europe/Vienna", 48.2082, 16.3738),
    ("Europe/Prague", 50.0755, 14.4378),
    ("Europe/Warsaw", 52.2297, 21.0122),
    ("Europe/Bucharest", 44.4268, 26.1025),
    ("Europe/Athens", 37.9838, 23.7275),
    ("Europe/Helsinki", 60.1699, 24.9384),
    ("Europe/Stockholm", 59.3293, 18.0686),
    ("Europe/Oslo", 59.9139, 10.7522),
    ("Europe/Copenhagen", 55.6761, 12.5683),
    ("Europe/Dublin", 53.3498, -6.2603),
    ("Europe/Lisbon", 38.7223, -9.1393),
    ("Europe/Amsterdam", 52.3676, 4.9041),
    ("Europe/Brussels", 50.8503, 4.3517),
    ("Europe/Zurich", 47.3769, 8.5417),
    ("Europe/Kyiv", 50.4501, 30.5234),
    ("Europe/Moscow", 55.7558, 37.6173),
    ("Europe/Istanbul", 41.0082, 28.9784),
    ("America/New_York", 40.7128, -74.006),
    ("America/Chicago", 41.8781, -87.6298),
    ("America/Denver", 39.7392, -104.9903),
    ("America/Los_Angeles", 34.0522, -118.2437),
    ("America/Phoenix", 33.4484, -112.074),
    ("America/Toronto", 43.6532, -79.3832),
    ("America/Vancouver", 49.2827, -123.1207),
    ("America/Mexico_City", 19.4326, -99.1332),
    ("America/Sao_Paulo", -23.5505, -46.6333),
    ("America/Argentina/Buenos_Aires", -34.6037, -58.3816),
    ("America/Bogota", 4.711, -74.0721),
    ("America/Santiago", -33.4489, -70.6693),
    ("Asia/Tokyo", 35.6762, 139.6503),
    ("Asia/Seoul", 37.5665, 126.978),
    ("Asia/Shanghai", 31.2304, 121.4737),
    ("Asia/Hong_Kong", 22.3193, 114.1694),
    ("Asia/Singapore", 1.3521, 103.8198),
    ("Asia/Bangkok", 13.7563, 100.5018),
    ("Asia/Kolkata", 28.6139, 77.209),
    ("Asia/Dubai", 25.2048, 55.2708),
    ("Asia/Jerusalem", 31.7683, 35.2137),
    ("Africa/Cairo", 30.0444, 31.2357),
    ("Africa/Johannesburg", -26.2041, 28.0473),
    ("Australia/Sydney", -33.8688, 151.2093),
    ("Pacific/Auckland", -36.8485, 174.7633),
];

fn timezone_coords(zone: &str) -> Option<(f64, f64)> {
    TIMEZONE_COORDS
        .iter()
        .find(|(name, _, _)| *name == zone)
        .map(|(_, lat, lon)| (*lat, *lon))
}

/// Resolves coordinates for sun time computation
pub struct SunCalculator {
    http: reqwest::Client,
}

impl Default for SunCalculator {
    fn default() -> Self {
        SunCalculator::new()
    }
}

impl SunCalculator {
    pub fn new() -> SunCalculator {
        SunCalculator {
            http: reqwest::Client::new(),
        }
    }

    /// Tries every geolocation provider in order, then the system-timezone
    /// heuristic; returns the fixed fallback with `located = false` when
    /// everything fails.
    pub async fn locate(&self) -> Location {
        for provider in &PROVIDERS {
            debug!("Requesting coordinates from {}", provider.name);
            match self.fetch(provider).await {
                Ok((latitude, longitude)) => {
                    info!(
                        "Coordinates from {}: lat={:.4}, lon={:.4}",
                        provider.name, latitude, longitude
                    );
                    return Location {
                        latitude,
                        longitude,
                        located: true,
                    };
                }
                Err(e) => warn!("Geolocation via {} failed: {}", provider.name, e),
            }
        }

        if let Ok(zone) = iana_time_zone::get_timezone() {
            if let Some((latitude, longitude)) = timezone_coords(&zone) {
                info!("Coordinates from system timezone {}", zone);
                return Location {
                    latitude,
                    longitude,
                    located: true,
                };
            }
            debug!("No coordinate entry for timezone {}", zone);
        }

        warn!("All location sources failed, using fallback coordinates");
        Location {
            latitude: FALLBACK_COORDS.0,
            longitude: FALLBACK_COORDS.1,
            located: false,
        }
    }

    async fn fetch(&self, provider: &Provider) -> std::result::Result<(f64, f64), String> {
        let body: Value = self
            .http
            .get(provider.url)
            .timeout(HTTP_TIMEOUT)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .send()
            .await
            .map_err(|e| e.to_string())?
            .error_for_status()
            .map_err(|e| e.to_string())?
            .json()
            .await
            .map_err(|e| e.to_string())?;
        (provider.parse)(&body).ok_or_else(|| "unexpected response body".to_string())
    }
}

/// Computes local sunrise and sunset for a date and coordinate pair.
///
/// Returns `None` when the instants cannot be represented in the local
/// timezone, so sun-based schedule entries simply never trigger.
pub fn sun_times(
    latitude: f64,
    longitude: f64,
    date: NaiveDate,
) -> Option<(DateTime<Local>, DateTime<Local>)> {
    let (sunrise_ts, sunset_ts) = sunrise::sunrise_sunset(
        latitude,
        longitude,
        date.year(),
        date.month(),
        date.day(),
    );
    let sunrise = Local.timestamp_opt(sunrise_ts, 0).single()?;
    let sunset = Local.timestamp_opt(sunset_ts, 0).single()?;
    if sunset <= sunrise {
        return None;
    }
    Some((sunrise, sunset))
}
