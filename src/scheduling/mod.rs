//! # Motor de disponibilidad
//!
//! Lógica pura, sin acceso a base de datos:
//!
//! - [`window`] - Ventanas `[inicio, fin)` en minutos y formato `HH:mm`
//! - [`slots`] - Generación de franjas candidatas de un día de servicio
//! - [`availability`] - Regla de solapamiento e intervalos ocupados por mesa
//! - [`allocator`] - Selección de mesas por capacidad

pub mod allocator;
pub mod availability;
pub mod slots;
pub mod window;

pub use allocator::{allocate, AllocationRequest};
pub use availability::{free_slots, unavailable_windows};
pub use slots::{business_hours, SlotGenerator, DEFAULT_SLOT_MINUTES};
pub use window::{parse_clock, SlotView, TimeWindow};
