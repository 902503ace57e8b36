//! # API de Reservas
//!
//! Este módulo maneja todas las operaciones relacionadas con reservas:
//! - Crear reservas, por capacidad (asignación automática de mesas) o sobre una mesa concreta
//! - Listar reservas, todas o las del usuario que llama
//! - Consultar franjas libres por restaurante, por mesa o en todos los restaurantes
//! - Confirmar, cancelar y borrar reservas
//!
//! Todas las rutas requieren la identidad que inyecta la capa de autenticación
//! (`x-user-id`, `x-user-role`). Cualquier rol puede usarlas.

use actix_web::{delete, get, post, put, web, HttpResponse, Responder};
use chrono::NaiveDate;
use mongodb::bson::{doc, oid::ObjectId, Document};
use serde::{Deserialize, Serialize};
use super::identity::{CallerIdentity, Role};
use super::{AppError, AppResult};
use crate::db::{MongoRepo, Reservation, ReservationStatus};
use crate::lifecycle::{self, NewReservation};
use crate::scheduling::{parse_clock, TimeWindow, DEFAULT_SLOT_MINUTES};

const RESERVATION_ROLES: &[Role] = &[
    Role::Customer,
    Role::RestaurantAdmin,
    Role::SuperAdmin,
    Role::KitchenStaff,
];

/// Cuerpo de `createReservation`.
///
/// Sin `tableId` la reserva se crea por capacidad y `capacity` es
/// obligatoria. Con `tableId` se reserva esa mesa y `capacity` es opcional.
/// La ventana termina en `endTime`, o `durationMinutes` después de
/// `startTime`, o 90 minutos después si no se indica ninguno.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReservationRequest {
    pub restaurant_id: Option<String>,
    pub customer_id: Option<String>,
    pub reservation_date: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub duration_minutes: Option<u32>,
    pub capacity: Option<i32>,
    pub table_id: Option<String>,
}

impl CreateReservationRequest {
    /// Valida el cuerpo y lo convierte en una petición tipada
    ///
    /// # Errores
    /// - `ValidationWithField`: falta un campo obligatorio o tiene un formato inválido
    pub fn validate(&self) -> AppResult<NewReservation> {
        let restaurant_id = parse_id("restaurantId", required("restaurantId", &self.restaurant_id)?)?;
        let customer_id = parse_id("customerId", required("customerId", &self.customer_id)?)?;
        let date = parse_date(required("reservationDate", &self.reservation_date)?)?;
        let window = self.window()?;

        if let Some(capacity) = self.capacity {
            if capacity <= 0 {
                return Err(AppError::validation_field("capacity", "must be greater than 0"));
            }
        }

        match &self.table_id {
            Some(table_id) => Ok(NewReservation::ForTable {
                restaurant_id,
                customer_id,
                table_id: parse_id("tableId", table_id)?,
                date,
                window,
                capacity: self.capacity,
            }),
            None => Ok(NewReservation::ByCapacity {
                restaurant_id,
                customer_id,
                date,
                window,
                capacity: self
                    .capacity
                    .ok_or_else(|| AppError::validation_field("capacity", "is required"))?,
            }),
        }
    }

    fn window(&self) -> AppResult<TimeWindow> {
        let start = parse_clock("startTime", required("startTime", &self.start_time)?)?;

        match (&self.end_time, self.duration_minutes) {
            (Some(_), Some(_)) => Err(AppError::validation_field(
                "durationMinutes",
                "use either endTime or durationMinutes",
            )),
            (Some(end), None) => TimeWindow::new(start, parse_clock("endTime", end)?),
            (None, Some(0)) => Err(AppError::validation_field(
                "durationMinutes",
                "must be greater than 0",
            )),
            (None, Some(duration)) => TimeWindow::starting_at(start, duration),
            (None, None) => TimeWindow::starting_at(start, DEFAULT_SLOT_MINUTES),
        }
    }
}

/// Reserva tal y como se devuelve al cliente, con los ObjectIds en hexadecimal
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationResponse {
    pub id: String,
    pub restaurant_id: String,
    pub customer_id: String,
    pub table_ids: Vec<String>,
    pub reservation_date: String,
    pub start_time: String,
    pub end_time: String,
    pub status: ReservationStatus,
    pub capacity: Option<i32>,
    pub created_by: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<Reservation> for ReservationResponse {
    fn from(reservation: Reservation) -> Self {
        ReservationResponse {
            id: reservation.id.map(|id| id.to_hex()).unwrap_or_default(),
            restaurant_id: reservation.restaurant_id.to_hex(),
            customer_id: reservation.customer_id.to_hex(),
            table_ids: reservation.table_ids.iter().map(|id| id.to_hex()).collect(),
            reservation_date: reservation.reservation_date,
            start_time: reservation.start_time,
            end_time: reservation.end_time,
            status: reservation.status,
            capacity: reservation.capacity,
            created_by: reservation.created_by.map(|id| id.to_hex()),
            created_at: reservation.created_at,
            updated_at: reservation.updated_at,
        }
    }
}

/// Filtros opcionales de `getAllReservations`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationListQuery {
    pub restaurant_id: Option<String>,
    pub reservation_date: Option<String>,
    pub status: Option<String>,
}

impl ReservationListQuery {
    pub fn to_filter(&self) -> AppResult<Document> {
        let mut filter = Document::new();

        if let Some(restaurant_id) = &self.restaurant_id {
            filter.insert("restaurantId", parse_id("restaurantId", restaurant_id)?);
        }
        if let Some(date) = &self.reservation_date {
            filter.insert("reservationDate", parse_date(date)?);
        }
        if let Some(status) = &self.status {
            filter.insert("status", parse_status(status)?.as_str());
        }
        Ok(filter)
    }
}

/// Parámetros de las consultas de disponibilidad
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotQuery {
    pub restaurant_id: Option<String>,
    pub reservation_date: Option<String>,
    pub table_id: Option<String>,
    pub capacity: Option<i32>,
}

impl SlotQuery {
    fn restaurant_id(&self) -> AppResult<ObjectId> {
        parse_id("restaurantId", required("restaurantId", &self.restaurant_id)?)
    }

    fn date(&self) -> AppResult<String> {
        parse_date(required("reservationDate", &self.reservation_date)?)
    }

    fn table_id(&self) -> AppResult<Option<ObjectId>> {
        self.table_id
            .as_deref()
            .map(|id| parse_id("tableId", id))
            .transpose()
    }
}

fn required<'a>(field: &str, value: &'a Option<String>) -> AppResult<&'a str> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(AppError::validation_field(field, "is required")),
    }
}

fn parse_id(field: &str, value: &str) -> AppResult<ObjectId> {
    ObjectId::parse_str(value.trim()).map_err(|_| AppError::validation_field(field, "invalid id"))
}

/// Valida `YYYY-MM-DD` y devuelve la fecha normalizada
fn parse_date(value: &str) -> AppResult<String> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map(|date| date.format("%Y-%m-%d").to_string())
        .map_err(|_| AppError::validation_field("reservationDate", "invalid date, use YYYY-MM-DD"))
}

fn parse_status(value: &str) -> AppResult<ReservationStatus> {
    match value {
        "Pending" => Ok(ReservationStatus::Pending),
        "Confirmed" => Ok(ReservationStatus::Confirmed),
        "Cancelled" => Ok(ReservationStatus::Cancelled),
        "Completed" => Ok(ReservationStatus::Completed),
        _ => Err(AppError::validation_field(
            "status",
            "expected Pending, Confirmed, Cancelled or Completed",
        )),
    }
}

fn parse_path_id(path: web::Path<String>) -> AppResult<ObjectId> {
    parse_id("id", &path.into_inner())
}

/// Crea una nueva reserva
///
/// # Respuesta
/// ```json
/// {
///   "success": true,
///   "message": "Reservation created successfully.",
///   "reservation": { "id": "...", "status": "Confirmed", "tableIds": ["..."] }
/// }
/// ```
///
/// # Errores
/// - `400 Bad Request`: datos inválidos, mesa ocupada o ninguna combinación de mesas libres
/// - `401 Unauthorized`: falta la identidad del llamante
/// - `404 Not Found`: restaurante o mesa no encontrados
/// - `500 Internal Server Error`: error de base de datos
#[post("/api/reservation/createReservation")]
async fn create_reservation(
    identity: CallerIdentity,
    repo: web::Data<MongoRepo>,
    data: web::Json<CreateReservationRequest>,
) -> AppResult<impl Responder> {
    identity.require("createReservation", RESERVATION_ROLES)?;
    let request = data.validate()?;

    let reservation = lifecycle::create(repo.get_ref(), request, identity.user_id).await?;

    Ok(HttpResponse::Created().json(serde_json::json!({
        "success": true,
        "message": "Reservation created successfully.",
        "reservation": ReservationResponse::from(reservation)
    })))
}

/// Lista reservas, más recientes primero, con filtros opcionales por
/// restaurante, fecha y estado
#[get("/api/reservation/getAllReservations")]
async fn get_all_reservations(
    identity: CallerIdentity,
    repo: web::Data<MongoRepo>,
    query: web::Query<ReservationListQuery>,
) -> AppResult<impl Responder> {
    identity.require("getAllReservations", RESERVATION_ROLES)?;
    let filter = query.to_filter()?;

    let reservations = repo.list_reservations(filter).await?;
    let results: Vec<ReservationResponse> = reservations.into_iter().map(Into::into).collect();

    Ok(HttpResponse::Ok().json(results))
}

/// Reservas en las que el llamante es el cliente o quien las creó
#[get("/api/reservation/getUserReservations")]
async fn get_user_reservations(
    identity: CallerIdentity,
    repo: web::Data<MongoRepo>,
) -> AppResult<impl Responder> {
    identity.require("getUserReservations", RESERVATION_ROLES)?;

    let reservations = repo.list_reservations(owned_by(identity.user_id)).await?;
    let results: Vec<ReservationResponse> = reservations.into_iter().map(Into::into).collect();

    Ok(HttpResponse::Ok().json(results))
}

fn owned_by(user_id: ObjectId) -> Document {
    doc! { "$or": [ { "customerId": user_id }, { "createdBy": user_id } ] }
}

/// Franjas libres de un restaurante para una fecha
///
/// Con `tableId`, las franjas libres de esa mesa. Sin ella, las franjas en
/// las que se podría sentar a `capacity` comensales (1 por defecto).
///
/// # Errores
/// - `404 Not Found`: restaurante o mesa no encontrados, o ninguna franja libre
#[get("/api/reservation/getAvailableSlots")]
async fn get_available_slots(
    identity: CallerIdentity,
    repo: web::Data<MongoRepo>,
    query: web::Query<SlotQuery>,
) -> AppResult<impl Responder> {
    identity.require("getAvailableSlots", RESERVATION_ROLES)?;
    let restaurant_id = query.restaurant_id()?;
    let date = query.date()?;

    let slots = lifecycle::available_slots(
        repo.get_ref(),
        restaurant_id,
        &date,
        query.table_id()?,
        query.capacity,
    )
    .await?;

    if slots.is_empty() {
        return Err(AppError::NotFound(format!("No available slots on {}", date)));
    }

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": "Available slots fetched successfully.",
        "availableSlots": slots.iter().map(TimeWindow::to_slot).collect::<Vec<_>>()
    })))
}

/// Franjas libres por mesa de un restaurante
#[get("/api/reservation/getAvailableTableAndSlots")]
async fn get_available_table_and_slots(
    identity: CallerIdentity,
    repo: web::Data<MongoRepo>,
    query: web::Query<SlotQuery>,
) -> AppResult<impl Responder> {
    identity.require("getAvailableTableAndSlots", RESERVATION_ROLES)?;
    let restaurant_id = query.restaurant_id()?;
    let date = query.date()?;

    let tables =
        lifecycle::available_tables_and_slots(repo.get_ref(), restaurant_id, &date, query.table_id()?).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": "Available tables and slots fetched successfully.",
        "tables": tables
    })))
}

/// Franjas libres por mesa en todos los restaurantes
#[get("/api/reservation/getAvailableTableAndSlotsForAllRestaurants")]
async fn get_available_table_and_slots_for_all_restaurants(
    identity: CallerIdentity,
    repo: web::Data<MongoRepo>,
    query: web::Query<SlotQuery>,
) -> AppResult<impl Responder> {
    identity.require("getAvailableTableAndSlotsForAllRestaurants", RESERVATION_ROLES)?;
    let date = query.date()?;

    let restaurants =
        lifecycle::available_tables_and_slots_everywhere(repo.get_ref(), &date, query.table_id()?).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": "Available tables and slots fetched successfully.",
        "restaurants": restaurants
    })))
}

/// Confirma una reserva `Pending`
///
/// # Errores
/// - `400 Bad Request`: la reserva no está pendiente
/// - `404 Not Found`: reserva no encontrada
#[put("/api/reservation/confirmReservation/{id}")]
async fn confirm_reservation(
    identity: CallerIdentity,
    repo: web::Data<MongoRepo>,
    path: web::Path<String>,
) -> AppResult<impl Responder> {
    identity.require("confirmReservation", RESERVATION_ROLES)?;
    let reservation_id = parse_path_id(path)?;

    let reservation = lifecycle::confirm(repo.get_ref(), reservation_id).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": "Reservation confirmed successfully.",
        "reservation": ReservationResponse::from(reservation)
    })))
}

/// Cancela una reserva `Pending` o `Confirmed`.
///
/// Los bloqueos de mesa no se retiran aquí; lo hace el barrido cuando
/// termina la franja.
///
/// # Errores
/// - `400 Bad Request`: la reserva ya está cancelada o completada
/// - `404 Not Found`: reserva no encontrada
#[put("/api/reservation/cancelReservation/{id}")]
async fn cancel_reservation(
    identity: CallerIdentity,
    repo: web::Data<MongoRepo>,
    path: web::Path<String>,
) -> AppResult<impl Responder> {
    identity.require("cancelReservation", RESERVATION_ROLES)?;
    let reservation_id = parse_path_id(path)?;

    let reservation = lifecycle::cancel(repo.get_ref(), reservation_id).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": "Reservation cancelled successfully.",
        "reservation": ReservationResponse::from(reservation)
    })))
}

/// Borra una reserva. Los bloqueos de mesa se mantienen hasta el barrido.
#[delete("/api/reservation/deleteReservation/{id}")]
async fn delete_reservation(
    identity: CallerIdentity,
    repo: web::Data<MongoRepo>,
    path: web::Path<String>,
) -> AppResult<impl Responder> {
    identity.require("deleteReservation", RESERVATION_ROLES)?;
    let reservation_id = parse_path_id(path)?;

    lifecycle::delete(repo.get_ref(), reservation_id).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": "Reservation deleted successfully.",
        "id": reservation_id.to_hex()
    })))
}

/// Configura las rutas relacionadas con reservas
///
/// # Rutas disponibles
/// - `POST /api/reservation/createReservation`
/// - `GET /api/reservation/getAllReservations`
/// - `GET /api/reservation/getUserReservations`
/// - `GET /api/reservation/getAvailableSlots`
/// - `GET /api/reservation/getAvailableTableAndSlots`
/// - `GET /api/reservation/getAvailableTableAndSlotsForAllRestaurants`
/// - `PUT /api/reservation/confirmReservation/{id}`
/// - `PUT /api/reservation/cancelReservation/{id}`
/// - `DELETE /api/reservation/deleteReservation/{id}`
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(create_reservation);
    cfg.service(get_all_reservations);
    cfg.service(get_user_reservations);
    cfg.service(get_available_slots);
    cfg.service(get_available_table_and_slots);
    cfg.service(get_available_table_and_slots_for_all_restaurants);
    cfg.service(confirm_reservation);
    cfg.service(cancel_reservation);
    cfg.service(delete_reservation);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn body(table_id: Option<String>) -> CreateReservationRequest {
        CreateReservationRequest {
            restaurant_id: Some(ObjectId::new().to_hex()),
            customer_id: Some(ObjectId::new().to_hex()),
            reservation_date: Some("2024-06-01".to_string()),
            start_time: Some("12:00".to_string()),
            capacity: Some(4),
            table_id,
            ..Default::default()
        }
    }

    fn field_of(err: AppError) -> String {
        match err {
            AppError::ValidationWithField { field, .. } => field,
            other => panic!("expected a field validation error, got {:?}", other),
        }
    }

    #[test]
    fn capacity_request_defaults_to_ninety_minutes() {
        match assert_ok!(body(None).validate()) {
            NewReservation::ByCapacity { date, window, capacity, .. } => {
                assert_eq!(date, "2024-06-01");
                assert_eq!((window.start_clock(), window.end_clock()), ("12:00".into(), "13:30".into()));
                assert_eq!(capacity, 4);
            }
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[test]
    fn table_request_uses_end_time_and_optional_capacity() {
        let table_id = ObjectId::new();
        let mut request = body(Some(table_id.to_hex()));
        request.end_time = Some("14:00".to_string());
        request.capacity = None;

        match assert_ok!(request.validate()) {
            NewReservation::ForTable { table_id: parsed, window, capacity, .. } => {
                assert_eq!(parsed, table_id);
                assert_eq!(window.duration(), 120);
                assert_eq!(capacity, None);
            }
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[test]
    fn duration_minutes_overrides_default() {
        let mut request = body(None);
        request.duration_minutes = Some(60);
        match assert_ok!(request.validate()) {
            NewReservation::ByCapacity { window, .. } => assert_eq!(window.end_clock(), "13:00"),
            other => panic!("unexpected request {:?}", other),
        }

        request.end_time = Some("13:00".to_string());
        assert_eq!(field_of(assert_err!(request.validate())), "durationMinutes");
    }

    #[test]
    fn missing_fields_are_reported_by_name() {
        let mut request = body(None);
        request.restaurant_id = None;
        assert_eq!(field_of(assert_err!(request.validate())), "restaurantId");

        let mut request = body(None);
        request.start_time = Some("  ".to_string());
        assert_eq!(field_of(assert_err!(request.validate())), "startTime");

        let mut request = body(None);
        request.capacity = None;
        assert_eq!(field_of(assert_err!(request.validate())), "capacity");

        let mut request = body(None);
        request.capacity = Some(0);
        assert_eq!(field_of(assert_err!(request.validate())), "capacity");
    }

    #[test]
    fn malformed_values_are_rejected() {
        let mut request = body(None);
        request.reservation_date = Some("01/06/2024".to_string());
        assert_eq!(field_of(assert_err!(request.validate())), "reservationDate");

        let mut request = body(Some("nope".to_string()));
        request.capacity = Some(2);
        assert_eq!(field_of(assert_err!(request.validate())), "tableId");

        let mut request = body(None);
        request.start_time = Some("23:00".to_string());
        assert_eq!(field_of(assert_err!(request.validate())), "endTime");
    }

    #[test]
    fn request_body_uses_camel_case() {
        let json = serde_json::json!({
            "restaurantId": ObjectId::new().to_hex(),
            "customerId": ObjectId::new().to_hex(),
            "reservationDate": "2024-06-01",
            "startTime": "18:00",
            "capacity": 4
        });
        let request: CreateReservationRequest = serde_json::from_value(json).unwrap();
        assert!(matches!(assert_ok!(request.validate()), NewReservation::ByCapacity { .. }));
    }

    #[test]
    fn list_filter_only_includes_given_fields() {
        assert!(assert_ok!(ReservationListQuery::default().to_filter()).is_empty());

        let restaurant_id = ObjectId::new();
        let query = ReservationListQuery {
            restaurant_id: Some(restaurant_id.to_hex()),
            reservation_date: Some("2024-06-01".to_string()),
            status: Some("Confirmed".to_string()),
        };
        let filter = assert_ok!(query.to_filter());
        assert_eq!(
            filter,
            doc! { "restaurantId": restaurant_id, "reservationDate": "2024-06-01", "status": "Confirmed" }
        );

        let query = ReservationListQuery { status: Some("Lost".to_string()), ..Default::default() };
        assert_err!(query.to_filter());
    }

    #[test]
    fn user_filter_matches_customer_or_creator() {
        let user_id = ObjectId::new();
        let filter = owned_by(user_id);
        let branches = filter.get_array("$or").unwrap();
        assert_eq!(branches.len(), 2);
    }

    #[test]
    fn response_uses_hex_ids() {
        use crate::scheduling::availability::fixtures::{reservation, table};

        let t = table(4, "7");
        let r = reservation(&t, "2024-06-01", "12:00", "13:30", ReservationStatus::Confirmed);
        let expected_id = r.id.map(|id| id.to_hex());
        let json = serde_json::to_value(ReservationResponse::from(r)).unwrap();

        assert_eq!(json["id"].as_str().map(str::to_string), expected_id);
        assert_eq!(json["tableIds"][0].as_str().map(str::to_string), t.id.map(|id| id.to_hex()));
        assert_eq!(json["status"], "Confirmed");
        assert_eq!(json["startTime"], "12:00");
    }

    #[test]
    fn slot_query_requires_restaurant_and_date() {
        let query = SlotQuery::default();
        assert_eq!(field_of(assert_err!(query.restaurant_id())), "restaurantId");
        assert_eq!(field_of(assert_err!(query.date())), "reservationDate");
        assert_eq!(assert_ok!(query.table_id()), None);
    }
}
