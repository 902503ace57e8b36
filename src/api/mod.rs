//! # Módulo API
//!
//! Este módulo contiene todas las rutas y controladores de la API REST.
//!
//! ## Módulos principales
//!
//! - [`reservation`] - Reservas (crear, listar, franjas libres, confirmar, cancelar, borrar)
//! - [`table`] - Mantenimiento de mesas
//! - [`identity`] - Identidad del llamante inyectada por la capa de auth
//! - [`errors`] - Manejo de errores de la aplicación

pub mod errors;
pub mod identity;
pub mod middleware;
pub mod reservation;
pub mod table;

// Re-exportar tipos comunes para facilitar su uso
pub use errors::{AppError, AppResult, ResultExt};

use actix_web::{error, web, HttpRequest};

/// Configura todas las rutas de la API
///
/// Además registra los manejadores de error de `Json` y `Query`, para que un
/// cuerpo o una query mal formados respondan con el mismo sobre JSON que el
/// resto de errores.
///
/// ## Rutas configuradas
///
/// - `/api/reservation/*` - Ver [`reservation::routes`]
/// - `/api/table/*` - Ver [`table::routes`]
///
/// Se registra en `main` con `App::new().configure(api::init_routes)`.
pub fn init_routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config());
    cfg.app_data(query_config());
    reservation::routes(cfg);
    table::routes(cfg);
}

fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err: error::JsonPayloadError, _req: &HttpRequest| {
        AppError::Validation(format!("Invalid JSON body: {}", err)).into()
    })
}

fn query_config() -> web::QueryConfig {
    web::QueryConfig::default().error_handler(|err: error::QueryPayloadError, _req: &HttpRequest| {
        AppError::Validation(format!("Invalid query string: {}", err)).into()
    })
}
