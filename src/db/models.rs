use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Restaurante tal y como lo mantiene el servicio de restaurantes.
/// Aquí sólo se leen los campos que necesitan las reservas.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Restaurant {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    #[serde(default)]
    pub name: String,
    pub opening_hours: Option<String>,
    pub closing_hours: Option<String>,
    #[serde(default)]
    pub tables: Vec<ObjectId>,
}

/// Bloqueo de una mesa para una fecha y franja concreta
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityHold {
    pub is_available: bool,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub restaurant_id: ObjectId,
    pub table_number: String,
    pub capacity: i32,
    #[serde(default)]
    pub availability: Vec<AvailabilityHold>,
    // flag global del modelo antiguo, no participa en la asignación
    pub is_available: Option<bool>,
    pub created_by: Option<ObjectId>,
    // se incrementa en cada reserva para que dos transacciones sobre la misma mesa choquen
    #[serde(default)]
    pub booking_version: i64,
    pub created_at: i64, // timestamp unix
    pub updated_at: i64, // timestamp unix
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl ReservationStatus {
    /// Estados que mantienen ocupada una mesa
    pub const ACTIVE: [ReservationStatus; 2] = [Self::Pending, Self::Confirmed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Confirmed => "Confirmed",
            Self::Cancelled => "Cancelled",
            Self::Completed => "Completed",
        }
    }

    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }

    /// `Pending -> Confirmed -> Completed`, con `Cancelled` alcanzable desde
    /// cualquier estado activo. Los estados terminales no se reabren.
    pub fn can_transition_to(&self, next: ReservationStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Confirmed)
                | (Self::Pending, Self::Cancelled)
                | (Self::Pending, Self::Completed)
                | (Self::Confirmed, Self::Cancelled)
                | (Self::Confirmed, Self::Completed)
        )
    }

    /// Nombres de los estados activos, para filtros `$in`
    pub fn active_names() -> Vec<&'static str> {
        Self::ACTIVE.iter().map(|s| s.as_str()).collect()
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub restaurant_id: ObjectId,
    pub customer_id: ObjectId,
    pub table_ids: Vec<ObjectId>,
    pub reservation_date: String,
    pub start_time: String,
    pub end_time: String,
    pub status: ReservationStatus,
    pub capacity: Option<i32>,
    pub created_by: Option<ObjectId>,
    // la reserva puso bloqueos en sus mesas (asignación por capacidad o confirmación)
    #[serde(default)]
    pub holds_placed: bool,
    #[serde(default)]
    pub holds_released: bool,
    pub created_at: i64, // timestamp unix
    pub updated_at: i64, // timestamp unix
}

impl Reservation {
    pub fn references_table(&self, table_id: &ObjectId) -> bool {
        self.table_ids.contains(table_id)
    }
}
