//! # API de Mesas
//!
//! Mantenimiento de las mesas de un restaurante. Crear, modificar y borrar
//! mesas requiere rol `RestaurantAdmin` o `SuperAdmin`; las lecturas están
//! abiertas a cualquier rol.
//!
//! Los bloqueos (`availability`) no se editan desde aquí: sólo los escriben
//! las reservas y el barrido.

use actix_web::{delete, get, post, put, web, HttpResponse, Responder};
use mongodb::bson::{oid::ObjectId, Document};
use serde::{Deserialize, Serialize};
use super::identity::{CallerIdentity, Role};
use super::{AppError, AppResult};
use crate::db::{AvailabilityHold, MongoRepo, Table};

const TABLE_ADMINS: &[Role] = &[Role::RestaurantAdmin, Role::SuperAdmin];

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTableRequest {
    pub restaurant_id: Option<String>,
    pub table_number: Option<String>,
    pub capacity: Option<i32>,
}

impl NewTableRequest {
    /// Construye la mesa a insertar
    ///
    /// # Errores
    /// - `ValidationWithField`: falta `restaurantId`, `tableNumber` o `capacity`, o la capacidad no es positiva
    pub fn build_table(&self, created_by: ObjectId) -> AppResult<Table> {
        let restaurant_id = self
            .restaurant_id
            .as_deref()
            .ok_or_else(|| AppError::validation_field("restaurantId", "is required"))
            .and_then(|id| parse_id("restaurantId", id))?;
        let table_number = table_number(self.table_number.as_deref())?
            .ok_or_else(|| AppError::validation_field("tableNumber", "is required"))?;
        let capacity = capacity(self.capacity)?
            .ok_or_else(|| AppError::validation_field("capacity", "is required"))?;

        let now = MongoRepo::current_timestamp();
        Ok(Table {
            id: None,
            restaurant_id,
            table_number,
            capacity,
            availability: Vec::new(),
            is_available: Some(true),
            created_by: Some(created_by),
            booking_version: 0,
            created_at: now,
            updated_at: now,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTableRequest {
    pub table_number: Option<String>,
    pub capacity: Option<i32>,
    pub is_available: Option<bool>,
}

impl UpdateTableRequest {
    /// Documento `$set` con los campos presentes
    pub fn to_changes(&self) -> AppResult<Document> {
        let mut changes = Document::new();

        if let Some(number) = table_number(self.table_number.as_deref())? {
            changes.insert("tableNumber", number);
        }
        if let Some(capacity) = capacity(self.capacity)? {
            changes.insert("capacity", capacity);
        }
        if let Some(is_available) = self.is_available {
            changes.insert("isAvailable", is_available);
        }

        if changes.is_empty() {
            return Err(AppError::Validation(
                "Nothing to update: send tableNumber, capacity or isAvailable".to_string(),
            ));
        }
        Ok(changes)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestaurantQuery {
    pub restaurant_id: Option<String>,
}

impl RestaurantQuery {
    fn restaurant_id(&self) -> AppResult<ObjectId> {
        let id = self
            .restaurant_id
            .as_deref()
            .ok_or_else(|| AppError::validation_field("restaurantId", "is required"))?;
        parse_id("restaurantId", id)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableResponse {
    pub id: String,
    pub restaurant_id: String,
    pub table_number: String,
    pub capacity: i32,
    pub availability: Vec<AvailabilityHold>,
    pub is_available: Option<bool>,
    pub created_by: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<Table> for TableResponse {
    fn from(table: Table) -> Self {
        TableResponse {
            id: table.id.map(|id| id.to_hex()).unwrap_or_default(),
            restaurant_id: table.restaurant_id.to_hex(),
            table_number: table.table_number,
            capacity: table.capacity,
            availability: table.availability,
            is_available: table.is_available,
            created_by: table.created_by.map(|id| id.to_hex()),
            created_at: table.created_at,
            updated_at: table.updated_at,
        }
    }
}

fn parse_id(field: &str, value: &str) -> AppResult<ObjectId> {
    ObjectId::parse_str(value.trim()).map_err(|_| AppError::validation_field(field, "invalid id"))
}

fn table_number(value: Option<&str>) -> AppResult<Option<String>> {
    match value.map(str::trim) {
        None => Ok(None),
        Some("") => Err(AppError::validation_field("tableNumber", "must not be empty")),
        Some(number) => Ok(Some(number.to_string())),
    }
}

fn capacity(value: Option<i32>) -> AppResult<Option<i32>> {
    match value {
        Some(c) if c <= 0 => Err(AppError::validation_field("capacity", "must be greater than 0")),
        other => Ok(other),
    }
}

/// Crea una mesa y la vincula a su restaurante
///
/// # Errores
/// - `400 Bad Request`: datos inválidos o número de mesa repetido en el restaurante
/// - `403 Forbidden`: el rol no puede mantener mesas
/// - `404 Not Found`: restaurante no encontrado
#[post("/api/table/createTable")]
async fn create_table(
    identity: CallerIdentity,
    repo: web::Data<MongoRepo>,
    data: web::Json<NewTableRequest>,
) -> AppResult<impl Responder> {
    identity.require("createTable", TABLE_ADMINS)?;
    let mut table = data.build_table(identity.user_id)?;

    let table_id = repo.insert_table(&table).await?;
    table.id = Some(table_id);
    tracing::info!(
        table_id = %table_id,
        restaurant_id = %table.restaurant_id,
        capacity = table.capacity,
        "Table created"
    );

    Ok(HttpResponse::Created().json(serde_json::json!({
        "success": true,
        "message": "Table created successfully",
        "table": TableResponse::from(table)
    })))
}

#[get("/api/table/getTablesByRestaurant")]
async fn get_tables_by_restaurant(
    _identity: CallerIdentity,
    repo: web::Data<MongoRepo>,
    query: web::Query<RestaurantQuery>,
) -> AppResult<impl Responder> {
    let restaurant_id = query.restaurant_id()?;

    let tables = repo.tables_for_restaurant(restaurant_id).await?;
    let tables: Vec<TableResponse> = tables.into_iter().map(Into::into).collect();

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": "Tables retrieved successfully",
        "tables": tables
    })))
}

#[get("/api/table/getTableById/{id}")]
async fn get_table_by_id(
    _identity: CallerIdentity,
    repo: web::Data<MongoRepo>,
    path: web::Path<String>,
) -> AppResult<impl Responder> {
    let table_id = parse_id("id", &path.into_inner())?;
    let table = repo.find_table(table_id).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": "Table retrieved successfully.",
        "table": TableResponse::from(table)
    })))
}

/// Modifica número, capacidad o flag `isAvailable` de una mesa
///
/// # Errores
/// - `400 Bad Request`: nada que actualizar, valores inválidos o número de mesa repetido
/// - `403 Forbidden`: el rol no puede mantener mesas
/// - `404 Not Found`: mesa no encontrada
#[put("/api/table/updateTable/{id}")]
async fn update_table(
    identity: CallerIdentity,
    repo: web::Data<MongoRepo>,
    path: web::Path<String>,
    data: web::Json<UpdateTableRequest>,
) -> AppResult<impl Responder> {
    identity.require("updateTable", TABLE_ADMINS)?;
    let table_id = parse_id("id", &path.into_inner())?;
    let changes = data.to_changes()?;

    if let Ok(number) = changes.get_str("tableNumber") {
        let current = repo.find_table(table_id).await?;
        let siblings = repo.tables_for_restaurant(current.restaurant_id).await?;
        if siblings.iter().any(|t| t.id != Some(table_id) && t.table_number == number) {
            return Err(AppError::Conflict(format!(
                "Table number {} already exists for this restaurant.",
                number
            )));
        }
    }

    let table = repo.update_table(table_id, changes).await?;
    tracing::info!(table_id = %table_id, "Table updated");

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": "Table updated successfully.",
        "table": TableResponse::from(table)
    })))
}

#[delete("/api/table/deleteTable/{id}")]
async fn delete_table(
    identity: CallerIdentity,
    repo: web::Data<MongoRepo>,
    path: web::Path<String>,
) -> AppResult<impl Responder> {
    identity.require("deleteTable", TABLE_ADMINS)?;
    let table_id = parse_id("id", &path.into_inner())?;

    let table = repo.delete_table(table_id).await?;
    tracing::info!(table_id = %table_id, restaurant_id = %table.restaurant_id, "Table deleted");

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": "Table deleted successfully.",
        "id": table_id.to_hex()
    })))
}

/// Borra todas las mesas de un restaurante
#[delete("/api/table/clearTables")]
async fn clear_tables(
    identity: CallerIdentity,
    repo: web::Data<MongoRepo>,
    query: web::Query<RestaurantQuery>,
) -> AppResult<impl Responder> {
    identity.require("clearTables", TABLE_ADMINS)?;
    let restaurant_id = query.restaurant_id()?;

    let deleted = repo.clear_tables(restaurant_id).await?;
    tracing::info!(restaurant_id = %restaurant_id, deleted = deleted, "Restaurant tables cleared");

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": "All tables deleted successfully",
        "deleted": deleted
    })))
}

/// Configura las rutas relacionadas con mesas
///
/// # Rutas disponibles
/// - `POST /api/table/createTable`
/// - `GET /api/table/getTablesByRestaurant?restaurantId=`
/// - `GET /api/table/getTableById/{id}`
/// - `PUT /api/table/updateTable/{id}`
/// - `DELETE /api/table/deleteTable/{id}`
/// - `DELETE /api/table/clearTables?restaurantId=`
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(create_table);
    cfg.service(get_tables_by_restaurant);
    cfg.service(get_table_by_id);
    cfg.service(update_table);
    cfg.service(delete_table);
    cfg.service(clear_tables);
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn builds_new_table_without_holds() {
        let restaurant_id = ObjectId::new();
        let admin = ObjectId::new();
        let request = NewTableRequest {
            restaurant_id: Some(restaurant_id.to_hex()),
            table_number: Some(" 12 ".to_string()),
            capacity: Some(6),
        };

        let table = assert_ok!(request.build_table(admin));
        assert_eq!(table.restaurant_id, restaurant_id);
        assert_eq!(table.table_number, "12");
        assert_eq!(table.capacity, 6);
        assert!(table.availability.is_empty());
        assert_eq!(table.created_by, Some(admin));
        assert_eq!(table.booking_version, 0);
    }

    #[test]
    fn new_table_requires_every_field() {
        let complete = || NewTableRequest {
            restaurant_id: Some(ObjectId::new().to_hex()),
            table_number: Some("1".to_string()),
            capacity: Some(2),
        };

        assert_err!(NewTableRequest { restaurant_id: None, ..complete() }.build_table(ObjectId::new()));
        assert_err!(NewTableRequest { table_number: Some("".into()), ..complete() }.build_table(ObjectId::new()));
        assert_err!(NewTableRequest { capacity: Some(-1), ..complete() }.build_table(ObjectId::new()));
        assert_err!(NewTableRequest { capacity: None, ..complete() }.build_table(ObjectId::new()));
    }

    #[test]
    fn update_only_sets_present_fields() {
        let request = UpdateTableRequest {
            capacity: Some(8),
            ..Default::default()
        };
        assert_eq!(assert_ok!(request.to_changes()), doc! { "capacity": 8 });

        let request = UpdateTableRequest {
            table_number: Some("A1".to_string()),
            is_available: Some(false),
            ..Default::default()
        };
        assert_eq!(
            assert_ok!(request.to_changes()),
            doc! { "tableNumber": "A1", "isAvailable": false }
        );

        assert_err!(UpdateTableRequest::default().to_changes());
        assert_err!(UpdateTableRequest { capacity: Some(0), ..Default::default() }.to_changes());
    }

    #[test]
    fn restaurant_query_validates_id() {
        let query = RestaurantQuery { restaurant_id: None };
        assert_err!(query.restaurant_id());
        let query = RestaurantQuery { restaurant_id: Some("xyz".to_string()) };
        assert_err!(query.restaurant_id());
        let id = ObjectId::new();
        let query = RestaurantQuery { restaurant_id: Some(id.to_hex()) };
        assert_eq!(assert_ok!(query.restaurant_id()), id);
    }
}
