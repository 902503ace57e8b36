//! # Comprobación de disponibilidad
//!
//! Reúne los intervalos ocupados de una mesa para una fecha (bloqueos
//! persistidos en la mesa más reservas activas que la referencian) y decide
//! si una ventana candidata está libre.

use super::slots::SlotGenerator;
use super::window::TimeWindow;
use crate::db::{Reservation, Table};

/// `true` si `a` y `b` se solapan. Regla única para todo el servicio.
pub fn conflicts(a: &TimeWindow, b: &TimeWindow) -> bool {
    a.overlaps(b)
}

/// `true` si `candidate` no se solapa con ningún intervalo ocupado
pub fn is_free(candidate: &TimeWindow, unavailable: &[TimeWindow]) -> bool {
    !unavailable.iter().any(|busy| conflicts(candidate, busy))
}

/// Intervalos ocupados de `table` en `date`.
///
/// Los bloqueos con horas ilegibles se ignoran con un aviso: un documento
/// corrupto no debe impedir reservar el resto del día.
pub fn unavailable_windows(table: &Table, date: &str, reservations: &[Reservation]) -> Vec<TimeWindow> {
    let holds = table
        .availability
        .iter()
        .filter(|hold| !hold.is_available && hold.date == date)
        .filter_map(|hold| match TimeWindow::parse(&hold.start_time, &hold.end_time) {
            Ok(window) => Some(window),
            Err(e) => {
                tracing::warn!(
                    table_id = ?table.id,
                    date = %hold.date,
                    error = %e,
                    "Ignoring unreadable table hold"
                );
                None
            }
        });

    let booked = reservations
        .iter()
        .filter(|r| r.status.is_active() && r.reservation_date == date)
        .filter(|r| table.id.as_ref().is_some_and(|id| r.references_table(id)))
        .filter_map(|r| TimeWindow::parse(&r.start_time, &r.end_time).ok());

    let mut windows: Vec<TimeWindow> = holds.chain(booked).collect();
    windows.sort();
    windows.dedup();
    windows
}

/// Franjas del generador que no chocan con ningún intervalo ocupado
pub fn free_slots(generator: &SlotGenerator, unavailable: &[TimeWindow]) -> Vec<TimeWindow> {
    generator
        .iter()
        .filter(|slot| is_free(slot, unavailable))
        .collect()
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::db::{AvailabilityHold, Reservation, ReservationStatus, Table};
    use mongodb::bson::oid::ObjectId;

    pub fn table(capacity: i32, number: &str) -> Table {
        Table {
            id: Some(ObjectId::new()),
            restaurant_id: ObjectId::new(),
            table_number: number.to_string(),
            capacity,
            availability: Vec::new(),
            is_available: None,
            created_by: None,
            booking_version: 0,
            created_at: 0,
            updated_at: 0,
        }
    }

    pub fn hold(date: &str, start: &str, end: &str) -> AvailabilityHold {
        AvailabilityHold {
            is_available: false,
            date: date.to_string(),
            start_time: start.to_string(),
            end_time: end.to_string(),
        }
    }

    pub fn reservation(
        table: &Table,
        date: &str,
        start: &str,
        end: &str,
        status: ReservationStatus,
    ) -> Reservation {
        Reservation {
            id: Some(ObjectId::new()),
            restaurant_id: table.restaurant_id,
            customer_id: ObjectId::new(),
            table_ids: table.id.into_iter().collect(),
            reservation_date: date.to_string(),
            start_time: start.to_string(),
            end_time: end.to_string(),
            status,
            capacity: Some(table.capacity),
            created_by: None,
            holds_placed: status == ReservationStatus::Confirmed,
            holds_released: false,
            created_at: 0,
            updated_at: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::db::{AvailabilityHold, ReservationStatus};
    use tokio_test::assert_ok;

    const DATE: &str = "2024-06-01";

    #[test]
    fn touching_windows_are_free() {
        let busy = [assert_ok!(TimeWindow::parse("12:00", "13:30"))];
        assert!(is_free(&assert_ok!(TimeWindow::parse("13:30", "15:00")), &busy));
        assert!(is_free(&assert_ok!(TimeWindow::parse("10:30", "12:00")), &busy));
        assert!(!is_free(&assert_ok!(TimeWindow::parse("12:30", "14:00")), &busy));
    }

    #[test]
    fn collects_holds_and_active_reservations_for_the_date() {
        let mut t = table(4, "1");
        t.availability.push(hold(DATE, "12:00", "13:30"));
        t.availability.push(hold("2024-06-02", "09:00", "10:30"));
        t.availability.push(AvailabilityHold { is_available: true, ..hold(DATE, "18:00", "19:30") });

        let reservations = vec![
            reservation(&t, DATE, "20:00", "21:30", ReservationStatus::Pending),
            reservation(&t, DATE, "16:00", "17:30", ReservationStatus::Cancelled),
            reservation(&t, DATE, "12:00", "13:30", ReservationStatus::Confirmed),
            reservation(&table(4, "2"), DATE, "09:00", "10:30", ReservationStatus::Confirmed),
        ];

        let busy = unavailable_windows(&t, DATE, &reservations);
        let clocks: Vec<_> = busy.iter().map(|w| (w.start_clock(), w.end_clock())).collect();
        assert_eq!(
            clocks,
            vec![
                ("12:00".to_string(), "13:30".to_string()),
                ("20:00".to_string(), "21:30".to_string()),
            ]
        );
    }

    #[test]
    fn free_slots_skip_overlaps_and_are_stable() {
        let mut t = table(2, "1");
        t.availability.push(hold(DATE, "09:00", "10:30"));
        let generator = assert_ok!(SlotGenerator::with_defaults(8 * 60, 12 * 60));
        let busy = unavailable_windows(&t, DATE, &[]);

        let first = free_slots(&generator, &busy);
        let second = free_slots(&generator, &busy);
        assert_eq!(first, second);

        for slot in &first {
            assert!(is_free(slot, &busy));
        }
        let starts: Vec<_> = first.iter().map(|s| s.start_clock()).collect();
        assert_eq!(starts, vec!["10:30"]);
    }
}
