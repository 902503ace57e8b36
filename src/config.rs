//! # Configuración
//!
//! Se lee de variables de entorno (y del archivo `.env` cargado con `dotenvy`
//! al arrancar). Un valor ausente o inválido nunca impide arrancar: se usa el
//! valor por defecto y se deja constancia en el log.

use std::{env, fmt::Display, str::FromStr, time::Duration};

#[derive(Debug, Clone)]
pub struct Config {
    /// `MONGODB_URI`
    pub mongodb_uri: String,
    /// `MONGODB_DATABASE`
    pub mongodb_database: String,
    /// `BIND_ADDRESS`
    pub bind_address: String,
    /// `SWEEP_INTERVAL_SECS`: cadencia del barrido de reservas terminadas
    pub sweep_interval: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let sweep_secs: u64 = load(&lookup, "SWEEP_INTERVAL_SECS", 60);

        Self {
            mongodb_uri: load(&lookup, "MONGODB_URI", "mongodb://localhost:27017".to_string()),
            mongodb_database: load(&lookup, "MONGODB_DATABASE", "table_reservations".to_string()),
            bind_address: load(&lookup, "BIND_ADDRESS", "0.0.0.0:8080".to_string()),
            sweep_interval: Duration::from_secs(sweep_secs.max(1)),
        }
    }
}

fn load<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    match lookup(key) {
        None => {
            tracing::info!("{key} not set, using default: {default}");
            default
        }
        Some(raw) => raw.trim().parse().unwrap_or_else(|e| {
            tracing::warn!("Invalid {key} value '{raw}': {e}, using default: {default}");
            default
        }),
    }
}
