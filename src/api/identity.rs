//! # Identidad del llamante
//!
//! La autenticación ocurre antes de llegar a este servicio. La capa de auth
//! inyecta `x-user-id` y `x-user-role` en cada petición y aquí se confía en
//! esos valores sin volver a verificarlos.

use actix_web::{dev::Payload, FromRequest, HttpRequest};
use mongodb::bson::oid::ObjectId;
use std::future::{ready, Ready};
use std::str::FromStr;
use super::{AppError, AppResult};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Customer,
    RestaurantAdmin,
    SuperAdmin,
    KitchenStaff,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "Customer",
            Role::RestaurantAdmin => "RestaurantAdmin",
            Role::SuperAdmin => "SuperAdmin",
            Role::KitchenStaff => "KitchenStaff",
        }
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(value: &str) -> AppResult<Self> {
        match value {
            "Customer" => Ok(Role::Customer),
            "RestaurantAdmin" => Ok(Role::RestaurantAdmin),
            "SuperAdmin" => Ok(Role::SuperAdmin),
            "KitchenStaff" => Ok(Role::KitchenStaff),
            other => Err(AppError::Unauthorized(format!("Unknown role '{}'", other))),
        }
    }
}

/// Usuario autenticado que hace la petición
#[derive(Debug, Clone, Copy)]
pub struct CallerIdentity {
    pub user_id: ObjectId,
    pub role: Role,
}

impl CallerIdentity {
    /// # Errores
    /// - `Forbidden`: el rol del llamante no está en `allowed`
    pub fn require(&self, operation: &str, allowed: &[Role]) -> AppResult<()> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(AppError::forbidden(operation, self.role.as_str()))
        }
    }

    fn from_headers(req: &HttpRequest) -> AppResult<Self> {
        let user_id = header(req, USER_ID_HEADER)?;
        let user_id = ObjectId::parse_str(user_id)
            .map_err(|_| AppError::Unauthorized(format!("Invalid {} header", USER_ID_HEADER)))?;
        let role = header(req, USER_ROLE_HEADER)?.parse()?;

        Ok(CallerIdentity { user_id, role })
    }
}

fn header<'a>(req: &'a HttpRequest, name: &str) -> AppResult<&'a str> {
    req.headers()
        .get(name)
        .ok_or_else(|| AppError::Unauthorized(format!("Missing {} header", name)))?
        .to_str()
        .map(str::trim)
        .map_err(|_| AppError::Unauthorized(format!("Invalid {} header", name)))
}

impl FromRequest for CallerIdentity {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(Self::from_headers(req))
    }
}
