//! # Table Reservations Server
//!
//! Servicio de reservas de mesas construido con Rust, Actix Web y MongoDB.
//!
//! ## Características principales
//!
//! - **Asignación de mesas**: combina mesas libres hasta cubrir el número de comensales
//! - **Franjas libres**: por mesa, por restaurante o en todos los restaurantes
//! - **Barrido de reservas terminadas**: libera las mesas al acabar cada franja
//! - **Mantenimiento de mesas**: alta, baja y modificación por administradores
//!
//! ## Configuración
//!
//! El servidor se configura mediante variables de entorno (archivo `.env`):
//!
//! ```env
//! # Base de datos MongoDB (replica set, las reservas usan transacciones)
//! MONGODB_URI=mongodb://localhost:27017/?replicaSet=rs0
//! MONGODB_DATABASE=table_reservations
//!
//! # Servidor
//! BIND_ADDRESS=0.0.0.0:8080
//!
//! # Barrido de reservas terminadas, en segundos
//! SWEEP_INTERVAL_SECS=60
//!
//! # Logging
//! RUST_LOG=table_reservations=debug,mongodb=info
//! ```
//!
//! ## Arquitectura
//!
//! ```text
//! API REST (Actix Web) ──┐
//!                        ├─> lifecycle ─> scheduling (lógica pura)
//! Barrido (tokio) ───────┘        │
//!                                 └─> MongoDB
//! ```

use actix_web::{web, App, HttpServer, middleware::Logger};

mod api;
mod config;
mod db;
mod lifecycle;
mod scheduling;
mod sweep;

use api::middleware::ErrorLogExt;

/// Función principal que inicia el servidor web
///
/// 1. Carga variables de entorno desde `.env`
/// 2. Configura el sistema de logging con tracing
/// 3. Establece conexión con MongoDB y crea índices
/// 4. Lanza el barrido de reservas terminadas
/// 5. Inicia el servidor HTTP
///
/// # Errores
///
/// Retorna `std::io::Error` si no se puede conectar a MongoDB o no se puede
/// bindear la dirección configurada.
#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new("table_reservations=debug,mongodb=info")
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("Starting table reservations server");
    let config = config::Config::from_env();

    let repo = match db::MongoRepo::init(&config).await {
        Ok(repo) => repo,
        Err(e) => {
            tracing::error!(error = %e, "Could not connect to MongoDB");
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("MongoDB error: {}", e),
            ));
        }
    };

    // Sin índices el servicio funciona, sólo más lento
    let _ = repo.create_indexes().await.log_error_context("creating indexes");

    let sweep = sweep::ExpirySweep::new(repo.clone(), config.sweep_interval);
    tokio::spawn(sweep.run());

    tracing::info!(bind_address = %config.bind_address, "HTTP server listening");
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(repo.clone()))
            .wrap(Logger::default())
            .configure(api::init_routes)
    })
        .bind(&config.bind_address)?
        .run()
        .await
}
