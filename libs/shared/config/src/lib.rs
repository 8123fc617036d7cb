use std::env;
use std::str::FromStr;

use chrono::NaiveTime;
use tracing::warn;

pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";
pub const DEFAULT_APPOINTMENT_EVENTS_TOPIC: &str = "appointment-events";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_service_role_key: String,
    pub redis_url: Option<String>,
    pub appointment_events_topic: String,
    pub event_stream_max_len: usize,
    pub event_publish_max_attempts: u32,
    pub booking_lock_lease_seconds: u64,
    pub clinic_opening_time: NaiveTime,
    pub clinic_closing_time: NaiveTime,
    pub slot_duration_minutes: u32,
    pub server_port: u16,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, appointments will be kept in memory");
                    String::new()
                }),
            supabase_service_role_key: env::var("SUPABASE_SERVICE_ROLE_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_SERVICE_ROLE_KEY not set, using empty value");
                    String::new()
                }),
            redis_url: env::var("REDIS_URL").ok().or_else(|| {
                warn!("REDIS_URL not set, using {}", DEFAULT_REDIS_URL);
                None
            }),
            appointment_events_topic: env::var("APPOINTMENT_EVENTS_TOPIC")
                .unwrap_or_else(|_| DEFAULT_APPOINTMENT_EVENTS_TOPIC.to_string()),
            event_stream_max_len: parse_or("EVENT_STREAM_MAX_LEN", 100_000),
            event_publish_max_attempts: parse_or("EVENT_PUBLISH_MAX_ATTEMPTS", 3),
            booking_lock_lease_seconds: parse_or("BOOKING_LOCK_LEASE_SECONDS", 30),
            clinic_opening_time: parse_time_or("CLINIC_OPENING_TIME", NaiveTime::from_hms_opt(9, 0, 0)),
            clinic_closing_time: parse_time_or("CLINIC_CLOSING_TIME", NaiveTime::from_hms_opt(17, 0, 0)),
            slot_duration_minutes: parse_or("SLOT_DURATION_MINUTES", 30),
            server_port: parse_or("SERVER_PORT", 3000),
        };

        if !config.is_persistence_configured() {
            warn!("Supabase not configured - falling back to the in-memory appointment store");
        }

        if config.clinic_closing_time <= config.clinic_opening_time {
            warn!(
                "Clinic closing time {} is not after opening time {}, no slots will be offered",
                config.clinic_closing_time, config.clinic_opening_time
            );
        }

        config
    }

    pub fn is_persistence_configured(&self) -> bool {
        !self.supabase_url.is_empty() && !self.supabase_service_role_key.is_empty()
    }

    pub fn redis_url(&self) -> &str {
        self.redis_url.as_deref().unwrap_or(DEFAULT_REDIS_URL)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            supabase_service_role_key: String::new(),
            redis_url: None,
            appointment_events_topic: DEFAULT_APPOINTMENT_EVENTS_TOPIC.to_string(),
            event_stream_max_len: 100_000,
            event_publish_max_attempts: 3,
            booking_lock_lease_seconds: 30,
            clinic_opening_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN),
            clinic_closing_time: NaiveTime::from_hms_opt(17, 0, 0).unwrap_or(NaiveTime::MIN),
            slot_duration_minutes: 30,
            server_port: 3000,
        }
    }
}

fn parse_or<T>(key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value {:?}, using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}

fn parse_time_or(key: &str, default: Option<NaiveTime>) -> NaiveTime {
    let default = default.unwrap_or(NaiveTime::MIN);
    match env::var(key) {
        Ok(raw) => NaiveTime::parse_from_str(raw.trim(), "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(raw.trim(), "%H:%M:%S"))
            .unwrap_or_else(|_| {
                warn!("{} has invalid value {:?}, using default {}", key, raw, default);
                default
            }),
        Err(_) => default,
    }
}
