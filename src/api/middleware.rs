//! # Utilidades de logging para errores
//!
//! Para errores que no llegan a una respuesta HTTP (barrido en segundo plano,
//! arranque del servidor) y que sólo pueden quedar en el log.

use std::error::Error as StdError;

/// Recorre `source()` y devuelve los mensajes de la cadena, del más externo
/// al más interno
pub fn error_chain<E>(error: &E) -> Vec<String>
where
    E: StdError + 'static,
{
    let mut chain = Vec::new();
    let mut current: Option<&dyn StdError> = Some(error);

    while let Some(err) = current {
        chain.push(err.to_string());
        current = err.source();
    }
    chain
}

/// Registra la cadena completa de errores
///
/// # Ejemplo
/// ```rust,ignore
/// if let Err(e) = repo.create_indexes().await {
///     log_error_chain(&e, "creating indexes");
/// }
/// ```
pub fn log_error_chain<E>(error: &E, context: &str)
where
    E: StdError + 'static,
{
    let chain = error_chain(error);
    tracing::error!(
        context = %context,
        error_chain = ?chain,
        depth = chain.len(),
        "Error with full chain"
    );
}

/// Extension trait para Results que registra la cadena de errores sin
/// consumir el error
///
/// ```rust,ignore
/// sweep.tick().await.log_error_context("expiry sweep tick")?;
/// ```
pub trait ErrorLogExt<T, E> {
    fn log_error_context(self, context: &str) -> Result<T, E>;
}

impl<T, E> ErrorLogExt<T, E> for Result<T, E>
where
    E: StdError + 'static,
{
    fn log_error_context(self, context: &str) -> Result<T, E> {
        if let Err(ref error) = self {
            log_error_chain(error, context);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::AppError;

    #[derive(Debug, thiserror::Error)]
    #[error("could not load config")]
    struct Outer {
        #[source]
        source: std::io::Error,
    }

    #[test]
    fn chain_follows_sources() {
        let err = Outer {
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing .env"),
        };
        assert_eq!(error_chain(&err), vec!["could not load config", "missing .env"]);
    }

    #[test]
    fn log_error_context_passes_result_through() {
        let ok: Result<u32, AppError> = Ok(3);
        assert_eq!(ok.log_error_context("test").ok(), Some(3));

        let err: Result<u32, AppError> = Err(AppError::Validation("bad".to_string()));
        assert!(matches!(err.log_error_context("test"), Err(AppError::Validation(_))));
    }
}
