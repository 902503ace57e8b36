//! # Asignación de mesas
//!
//! Elige una o varias mesas de un restaurante cuya capacidad conjunta cubra
//! el número de comensales en la ventana pedida.
//!
//! Orden de búsqueda:
//! 1. mesas con capacidad exacta
//! 2. mesas más grandes
//! 3. mesas más pequeñas, que sólo sirven combinadas
//!
//! Dentro de cada grupo se prueban primero las de mayor capacidad, para
//! juntar el menor número de mesas posible. La búsqueda termina en cuanto la
//! capacidad acumulada alcanza la pedida.

use mongodb::bson::oid::ObjectId;
use super::availability::{is_free, unavailable_windows};
use super::window::TimeWindow;
use crate::api::{AppError, AppResult};
use crate::db::{Reservation, Table};

/// Petición de asignación ya validada
#[derive(Debug, Clone)]
pub struct AllocationRequest {
    pub capacity: i32,
    pub date: String,
    pub window: TimeWindow,
}

/// Resultado de una asignación satisfactoria
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub table_ids: Vec<ObjectId>,
    pub total_capacity: i32,
}

/// Asigna mesas para `request` a partir de las mesas del restaurante y de
/// las reservas existentes en esa fecha.
///
/// # Errores
/// - `Validation`: capacidad no positiva
/// - `NoSuitableTables`: ninguna combinación de mesas libres llega a la capacidad
pub fn allocate(
    tables: &[Table],
    reservations: &[Reservation],
    request: &AllocationRequest,
) -> AppResult<Allocation> {
    if request.capacity <= 0 {
        return Err(AppError::validation_field("capacity", "must be greater than 0"));
    }

    let mut selected = Vec::new();
    let mut total_capacity = 0;

    for table in search_order(tables, request.capacity) {
        let Some(table_id) = table.id else { continue };

        let busy = unavailable_windows(table, &request.date, reservations);
        if !is_free(&request.window, &busy) {
            tracing::trace!(table_id = %table_id, "Table busy for requested window");
            continue;
        }

        selected.push(table_id);
        total_capacity += table.capacity;
        if total_capacity >= request.capacity {
            return Ok(Allocation { table_ids: selected, total_capacity });
        }
    }

    Err(AppError::NoSuitableTables {
        capacity: request.capacity,
        date: request.date.clone(),
        start_time: request.window.start_clock(),
    })
}

/// Mesas en el orden en que se prueban: exactas, mayores y menores, cada
/// grupo de mayor a menor capacidad. Las mesas sin capacidad no participan.
fn search_order(tables: &[Table], capacity: i32) -> Vec<&Table> {
    let usable = || tables.iter().filter(|t| t.capacity > 0);
    let exact = by_capacity_desc(usable().filter(|t| t.capacity == capacity).collect());
    let larger = by_capacity_desc(usable().filter(|t| t.capacity > capacity).collect());
    let smaller = by_capacity_desc(usable().filter(|t| t.capacity < capacity).collect());

    exact.into_iter().chain(larger).chain(smaller).collect()
}

fn by_capacity_desc(mut group: Vec<&Table>) -> Vec<&Table> {
    group.sort_by(|a, b| {
        b.capacity
            .cmp(&a.capacity)
            .then_with(|| a.table_number.cmp(&b.table_number))
    });
    group
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduling::availability::fixtures::{hold, reservation, table};
    use crate::db::ReservationStatus;
    use tokio_test::{assert_err, assert_ok};

    const DATE: &str = "2024-06-01";

    fn request(capacity: i32, start: &str) -> AllocationRequest {
        let start = assert_ok!(crate::scheduling::parse_clock("startTime", start));
        AllocationRequest {
            capacity,
            date: DATE.to_string(),
            window: assert_ok!(TimeWindow::starting_at(start, 90)),
        }
    }

    #[test]
    fn single_exact_table() {
        let t = table(4, "1");
        let allocation = assert_ok!(allocate(&[t.clone()], &[], &request(4, "12:00")));
        assert_eq!(allocation.table_ids, vec![t.id.unwrap()]);
        assert_eq!(allocation.total_capacity, 4);
    }

    #[test]
    fn held_table_is_rejected_on_overlap() {
        let mut t = table(4, "1");
        t.availability.push(hold(DATE, "12:00", "13:30"));

        let err = assert_err!(allocate(&[t.clone()], &[], &request(4, "12:30")));
        assert!(matches!(err, AppError::NoSuitableTables { capacity: 4, .. }));

        // Justo al terminar el bloqueo la mesa vuelve a estar libre
        assert_ok!(allocate(&[t], &[], &request(4, "13:30")));
    }

    #[test]
    fn combines_small_tables() {
        let a = table(2, "1");
        let b = table(2, "2");
        let allocation = assert_ok!(allocate(&[a.clone(), b.clone()], &[], &request(4, "18:00")));
        assert_eq!(allocation.total_capacity, 4);
        assert_eq!(allocation.table_ids.len(), 2);
        assert!(allocation.table_ids.contains(&a.id.unwrap()));
        assert!(allocation.table_ids.contains(&b.id.unwrap()));
    }

    #[test]
    fn prefers_exact_then_larger_then_smaller() {
        let small = table(2, "1");
        let big = table(8, "2");
        let bigger = table(10, "3");
        let exact = table(4, "4");
        let tables = vec![small.clone(), big.clone(), bigger.clone(), exact.clone()];

        let allocation = assert_ok!(allocate(&tables, &[], &request(4, "12:00")));
        assert_eq!(allocation.table_ids, vec![exact.id.unwrap()]);

        let busy = reservation(&exact, DATE, "12:00", "13:30", ReservationStatus::Confirmed);
        let allocation = assert_ok!(allocate(&tables, &[busy], &request(4, "12:00")));
        assert_eq!(allocation.table_ids, vec![bigger.id.unwrap()]);
    }

    #[test]
    fn larger_small_tables_are_combined_first() {
        let two = table(2, "1");
        let three = table(3, "2");
        let one = table(1, "3");
        let allocation = assert_ok!(allocate(&[two.clone(), one, three.clone()], &[], &request(5, "12:00")));
        assert_eq!(allocation.table_ids, vec![three.id.unwrap(), two.id.unwrap()]);
    }

    #[test]
    fn cancelled_reservations_do_not_block() {
        let t = table(4, "1");
        let cancelled = reservation(&t, DATE, "12:00", "13:30", ReservationStatus::Cancelled);
        assert_ok!(allocate(&[t], &[cancelled], &request(4, "12:00")));
    }

    #[test]
    fn insufficient_capacity_fails() {
        let tables = vec![table(2, "1"), table(4, "2"), table(3, "3")];
        let err = assert_err!(allocate(&tables, &[], &request(10, "12:00")));
        assert!(matches!(err, AppError::NoSuitableTables { capacity: 10, .. }));
    }

    #[test]
    fn successful_allocations_cover_capacity_with_free_tables() {
        let mut tables = vec![table(2, "1"), table(2, "2"), table(6, "3"), table(4, "4")];
        tables[2].availability.push(hold(DATE, "11:00", "12:30"));
        let reservations = vec![reservation(&tables[3], DATE, "13:00", "14:30", ReservationStatus::Pending)];

        for capacity in 1..=8 {
            for start in ["10:00", "12:00", "13:15", "19:00"] {
                let req = request(capacity, start);
                if let Ok(allocation) = allocate(&tables, &reservations, &req) {
                    assert!(allocation.total_capacity >= capacity);
                    for id in &allocation.table_ids {
                        let t = tables.iter().find(|t| t.id.as_ref() == Some(id)).unwrap();
                        let busy = unavailable_windows(t, DATE, &reservations);
                        assert!(is_free(&req.window, &busy));
                    }
                }
            }
        }
    }

    #[test]
    fn rejects_non_positive_capacity() {
        let err = assert_err!(allocate(&[table(4, "1")], &[], &request(0, "12:00")));
        assert!(matches!(err, AppError::ValidationWithField { .. }));
    }
}
