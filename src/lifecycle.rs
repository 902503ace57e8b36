//! # Ciclo de vida de las reservas
//!
//! Orquesta la creación, cancelación y borrado de reservas, y las consultas
//! de franjas libres. Sólo toca documentos de reservas y de mesas.
//!
//! Hay dos formas de crear una reserva:
//!
//! - **Por capacidad**: el asignador elige las mesas, la reserva nace
//!   `Confirmed` y cada mesa recibe un bloqueo.
//! - **Sobre una mesa concreta**: sólo se comprueba el solapamiento, la
//!   reserva nace `Pending` y no se crea bloqueo hasta que se confirma.

use mongodb::bson::oid::ObjectId;
use serde::Serialize;
use crate::api::{AppError, AppResult};
use crate::db::{MongoRepo, Reservation, ReservationStatus, Restaurant, Table};
use crate::scheduling::{
    allocate, business_hours, free_slots, unavailable_windows, AllocationRequest, SlotGenerator,
    SlotView, TimeWindow,
};

/// Intentos de asignación: el primero y un único reintento tras un conflicto de escritura
const ALLOCATION_ATTEMPTS: u32 = 2;

/// Reserva ya validada, lista para crearse
#[derive(Debug, Clone)]
pub enum NewReservation {
    ByCapacity {
        restaurant_id: ObjectId,
        customer_id: ObjectId,
        date: String,
        window: TimeWindow,
        capacity: i32,
    },
    ForTable {
        restaurant_id: ObjectId,
        customer_id: ObjectId,
        table_id: ObjectId,
        date: String,
        window: TimeWindow,
        capacity: Option<i32>,
    },
}

pub async fn create(repo: &MongoRepo, request: NewReservation, created_by: ObjectId) -> AppResult<Reservation> {
    match request {
        NewReservation::ByCapacity { restaurant_id, customer_id, date, window, capacity } => {
            let allocation = AllocationRequest { capacity, date, window };
            create_by_capacity(repo, restaurant_id, customer_id, allocation, created_by).await
        }
        NewReservation::ForTable { restaurant_id, customer_id, table_id, date, window, capacity } => {
            let reservation = draft(restaurant_id, customer_id, vec![table_id], &date, &window, capacity, created_by);
            create_for_table(repo, reservation, capacity).await
        }
    }
}

async fn create_by_capacity(
    repo: &MongoRepo,
    restaurant_id: ObjectId,
    customer_id: ObjectId,
    request: AllocationRequest,
    created_by: ObjectId,
) -> AppResult<Reservation> {
    repo.find_restaurant(restaurant_id).await?;

    let mut attempt = 1;
    loop {
        let tables = repo.tables_for_restaurant(restaurant_id).await?;
        let reservations = repo.active_reservations_on(Some(restaurant_id), &request.date).await?;
        let allocation = allocate(&tables, &reservations, &request)?;

        let mut reservation = draft(
            restaurant_id,
            customer_id,
            allocation.table_ids,
            &request.date,
            &request.window,
            Some(request.capacity),
            created_by,
        );
        reservation.status = ReservationStatus::Confirmed;
        reservation.holds_placed = true;

        match repo.insert_reservation_with_holds(&reservation).await {
            Ok(id) => {
                reservation.id = Some(id);
                tracing::info!(
                    reservation_id = %id,
                    restaurant_id = %restaurant_id,
                    tables = reservation.table_ids.len(),
                    total_capacity = allocation.total_capacity,
                    date = %reservation.reservation_date,
                    start_time = %reservation.start_time,
                    duration_minutes = request.window.duration(),
                    "Reservation allocated"
                );
                return Ok(reservation);
            }
            Err(e) => match after_insert_error(attempt, &e) {
                InsertRetry::Retry => {
                    tracing::warn!(attempt = attempt, error = %e, "Allocation lost a race, retrying");
                    attempt += 1;
                }
                InsertRetry::GiveUp => {
                    tracing::warn!(attempt = attempt, error = %e, "Allocation lost a race again, giving up");
                    return Err(AppError::NoSuitableTables {
                        capacity: request.capacity,
                        date: request.date.clone(),
                        start_time: request.window.start_clock(),
                    });
                }
                InsertRetry::Propagate => return Err(e),
            },
        }
    }
}

/// Qué hacer cuando falla la escritura de una reserva asignada
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InsertRetry {
    /// Otra reserva ocupó alguna mesa: se vuelve a leer y a asignar
    Retry,
    /// Sin intentos: la petición termina en `NoSuitableTables`
    GiveUp,
    Propagate,
}

fn after_insert_error(attempt: u32, error: &AppError) -> InsertRetry {
    match error {
        e if !e.is_write_conflict() => InsertRetry::Propagate,
        _ if attempt < ALLOCATION_ATTEMPTS => InsertRetry::Retry,
        _ => InsertRetry::GiveUp,
    }
}

async fn create_for_table(repo: &MongoRepo, mut reservation: Reservation, capacity: Option<i32>) -> AppResult<Reservation> {
    repo.find_restaurant(reservation.restaurant_id).await?;

    let table_id = reservation.table_ids[0];
    let table = repo.find_table(table_id).await?;
    if table.restaurant_id != reservation.restaurant_id {
        return Err(AppError::validation_field(
            "tableId",
            "table does not belong to the restaurant",
        ));
    }
    if let Some(capacity) = capacity {
        if capacity > table.capacity {
            return Err(AppError::validation_field(
                "capacity",
                &format!("table seats at most {} guests", table.capacity),
            ));
        }
    }

    let window = TimeWindow::parse(&reservation.start_time, &reservation.end_time)?;
    let reservations = repo
        .active_reservations_on(Some(reservation.restaurant_id), &reservation.reservation_date)
        .await?;
    if !table_is_free(&table, &reservation.reservation_date, &window, &reservations) {
        return Err(AppError::Conflict(
            "The table is already reserved for this time slot.".to_string(),
        ));
    }

    let id = repo
        .insert_reservation_for_table(&reservation)
        .await
        .map_err(|e| {
            if e.is_write_conflict() {
                AppError::Conflict("The table is already reserved for this time slot.".to_string())
            } else {
                e
            }
        })?;

    reservation.id = Some(id);
    tracing::info!(
        reservation_id = %id,
        table_id = %table_id,
        date = %reservation.reservation_date,
        start_time = %reservation.start_time,
        "Table reservation created"
    );
    Ok(reservation)
}

fn table_is_free(table: &Table, date: &str, window: &TimeWindow, reservations: &[Reservation]) -> bool {
    let busy = unavailable_windows(table, date, reservations);
    crate::scheduling::availability::is_free(window, &busy)
}

fn draft(
    restaurant_id: ObjectId,
    customer_id: ObjectId,
    table_ids: Vec<ObjectId>,
    date: &str,
    window: &TimeWindow,
    capacity: Option<i32>,
    created_by: ObjectId,
) -> Reservation {
    let now = MongoRepo::current_timestamp();
    Reservation {
        id: None,
        restaurant_id,
        customer_id,
        table_ids,
        reservation_date: date.to_string(),
        start_time: window.start_clock(),
        end_time: window.end_clock(),
        status: ReservationStatus::Pending,
        capacity,
        created_by: Some(created_by),
        holds_placed: false,
        holds_released: false,
        created_at: now,
        updated_at: now,
    }
}

/// Confirma una reserva `Pending` y bloquea su mesa
pub async fn confirm(repo: &MongoRepo, id: ObjectId) -> AppResult<Reservation> {
    let reservation = repo.confirm_reservation(id).await?;
    tracing::info!(reservation_id = %id, "Reservation confirmed");
    Ok(reservation)
}

/// Cancela la reserva. Los bloqueos de mesa se retiran en el barrido, al
/// terminar la franja, igual que para cualquier otra reserva.
pub async fn cancel(repo: &MongoRepo, id: ObjectId) -> AppResult<Reservation> {
    let reservation = repo.cancel_reservation(id).await?;
    tracing::info!(reservation_id = %id, "Reservation cancelled");
    Ok(reservation)
}

/// Borra la reserva sin tocar los bloqueos de mesa
pub async fn delete(repo: &MongoRepo, id: ObjectId) -> AppResult<Reservation> {
    let reservation = repo.delete_reservation(id).await?;
    tracing::info!(reservation_id = %id, "Reservation deleted");
    Ok(reservation)
}

// ---------------------------------------------------------------------------
// Consultas de disponibilidad
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSlots {
    pub table_id: String,
    pub table_number: String,
    pub capacity: i32,
    pub available_slots: Vec<SlotView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestaurantSlots {
    pub restaurant_id: String,
    pub name: String,
    pub tables: Vec<TableSlots>,
}

fn slot_generator(restaurant: &Restaurant) -> AppResult<SlotGenerator> {
    let (open, close) = business_hours(
        restaurant.opening_hours.as_deref(),
        restaurant.closing_hours.as_deref(),
    );
    SlotGenerator::with_defaults(open, close)
}

/// Franjas libres de un restaurante.
///
/// Con `table_id`, las franjas libres de esa mesa (vacío si la mesa no
/// admite `capacity`). Sin ella, las franjas en las que el asignador podría
/// sentar a `capacity` comensales (1 por defecto).
pub fn restaurant_free_slots(
    restaurant: &Restaurant,
    tables: &[Table],
    reservations: &[Reservation],
    date: &str,
    table_id: Option<ObjectId>,
    capacity: Option<i32>,
) -> AppResult<Vec<TimeWindow>> {
    let generator = slot_generator(restaurant)?;

    if let Some(table_id) = table_id {
        let table = tables
            .iter()
            .find(|t| t.id == Some(table_id))
            .ok_or_else(|| AppError::not_found_id("Table", &table_id.to_hex()))?;
        if capacity.is_some_and(|c| c > table.capacity) {
            return Ok(Vec::new());
        }
        let busy = unavailable_windows(table, date, reservations);
        return Ok(free_slots(&generator, &busy));
    }

    let capacity = capacity.unwrap_or(1);
    if capacity <= 0 {
        return Err(AppError::validation_field("capacity", "must be greater than 0"));
    }

    Ok(generator
        .iter()
        .filter(|window| {
            let request = AllocationRequest {
                capacity,
                date: date.to_string(),
                window: *window,
            };
            allocate(tables, reservations, &request).is_ok()
        })
        .collect())
}

/// Franjas libres por mesa, opcionalmente limitadas a una mesa
pub fn tables_free_slots(
    restaurant: &Restaurant,
    tables: &[Table],
    reservations: &[Reservation],
    date: &str,
    table_id: Option<ObjectId>,
) -> AppResult<Vec<TableSlots>> {
    let generator = slot_generator(restaurant)?;

    let listed: Vec<TableSlots> = tables
        .iter()
        .filter(|t| table_id.is_none() || t.id == table_id)
        .filter_map(|table| {
            let id = table.id?;
            let busy = unavailable_windows(table, date, reservations);
            Some(TableSlots {
                table_id: id.to_hex(),
                table_number: table.table_number.clone(),
                capacity: table.capacity,
                available_slots: free_slots(&generator, &busy).iter().map(TimeWindow::to_slot).collect(),
            })
        })
        .collect();

    if let Some(table_id) = table_id {
        if listed.is_empty() {
            return Err(AppError::not_found_id("Table", &table_id.to_hex()));
        }
    }
    Ok(listed)
}

pub async fn available_slots(
    repo: &MongoRepo,
    restaurant_id: ObjectId,
    date: &str,
    table_id: Option<ObjectId>,
    capacity: Option<i32>,
) -> AppResult<Vec<TimeWindow>> {
    let restaurant = repo.find_restaurant(restaurant_id).await?;
    let tables = repo.tables_for_restaurant(restaurant_id).await?;
    let reservations = repo.active_reservations_on(Some(restaurant_id), date).await?;
    restaurant_free_slots(&restaurant, &tables, &reservations, date, table_id, capacity)
}

pub async fn available_tables_and_slots(
    repo: &MongoRepo,
    restaurant_id: ObjectId,
    date: &str,
    table_id: Option<ObjectId>,
) -> AppResult<Vec<TableSlots>> {
    let restaurant = repo.find_restaurant(restaurant_id).await?;
    let tables = repo.tables_for_restaurant(restaurant_id).await?;
    let reservations = repo.active_reservations_on(Some(restaurant_id), date).await?;
    tables_free_slots(&restaurant, &tables, &reservations, date, table_id)
}

pub async fn available_tables_and_slots_everywhere(
    repo: &MongoRepo,
    date: &str,
    table_id: Option<ObjectId>,
) -> AppResult<Vec<RestaurantSlots>> {
    let restaurants = repo.list_restaurants().await?;
    let reservations = repo.active_reservations_on(None, date).await?;
    let mut listing = Vec::with_capacity(restaurants.len());

    for restaurant in restaurants {
        let Some(restaurant_id) = restaurant.id else { continue };
        let tables = repo.tables_for_restaurant(restaurant_id).await?;
        if table_id.is_some_and(|id| !tables.iter().any(|t| t.id == Some(id))) {
            continue;
        }
        let tables = tables_free_slots(&restaurant, &tables, &reservations, date, table_id)?;
        listing.push(RestaurantSlots {
            restaurant_id: restaurant_id.to_hex(),
            name: restaurant.name,
            tables,
        });
    }

    if let Some(table_id) = table_id {
        if listing.is_empty() {
            return Err(AppError::not_found_id("Table", &table_id.to_hex()));
        }
    }
    Ok(listing)
}
