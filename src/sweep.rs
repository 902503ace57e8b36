//! # Barrido de reservas terminadas
//!
//! Tarea en segundo plano que, cada `SWEEP_INTERVAL_SECS`, lee las reservas
//! cuyos bloqueos siguen puestos y programa para cada una un temporizador a
//! la hora de fin de su franja. Al vencer, el temporizador retira los
//! bloqueos de las mesas y cierra la reserva.
//!
//! Los temporizadores se indexan por id de reserva: un mismo tick no vuelve a
//! programar una reserva que ya tiene temporizador con la misma franja, y si
//! la franja cambia el temporizador anterior se aborta y se sustituye.

use chrono::{DateTime, Local, NaiveDate, TimeZone};
use mongodb::bson::oid::ObjectId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use crate::api::middleware::ErrorLogExt;
use crate::api::{AppError, AppResult};
use crate::db::{MongoRepo, Reservation, ReservationStatus};
use crate::scheduling::parse_clock;

/// Lo necesario para liberar una reserva, y a la vez su huella: si cambia,
/// el temporizador se reprograma.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleasePlan {
    pub reservation_id: ObjectId,
    pub table_ids: Vec<ObjectId>,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub holds_placed: bool,
}

impl ReleasePlan {
    pub fn from_reservation(reservation: &Reservation) -> Option<Self> {
        Some(Self {
            reservation_id: reservation.id?,
            table_ids: reservation.table_ids.clone(),
            date: reservation.reservation_date.clone(),
            start_time: reservation.start_time.clone(),
            end_time: reservation.end_time.clone(),
            holds_placed: reservation.holds_placed,
        })
    }

    /// Momento local en que termina la franja
    pub fn deadline(&self) -> AppResult<DateTime<Local>> {
        release_deadline(&self.date, &self.end_time)
    }
}

struct ArmedRelease {
    plan: ReleasePlan,
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Armed {
    releases: HashMap<ObjectId, ArmedRelease>,
    next_generation: u64,
}

#[derive(Clone)]
pub struct ExpirySweep {
    repo: MongoRepo,
    interval: Duration,
    armed: Arc<Mutex<Armed>>,
}

impl ExpirySweep {
    pub fn new(repo: MongoRepo, interval: Duration) -> Self {
        Self {
            repo,
            interval,
            armed: Arc::new(Mutex::new(Armed::default())),
        }
    }

    /// Bucle principal. No termina nunca; los errores de un tick se registran
    /// y el siguiente tick lo vuelve a intentar.
    pub async fn run(self) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Expiry sweep started");
        let mut ticker = tokio::time::interval(self.interval);

        loop {
            ticker.tick().await;
            match self.tick().await.log_error_context("expiry sweep tick") {
                Ok(0) => {}
                Ok(armed) => tracing::debug!(armed = armed, "Expiry sweep armed releases"),
                Err(_) => {}
            }
        }
    }

    /// Un pase del barrido. Devuelve cuántos temporizadores se han programado.
    pub async fn tick(&self) -> AppResult<usize> {
        let reservations = self.repo.releasable_reservations().await?;
        let candidates: Vec<ReleasePlan> = reservations
            .iter()
            .filter_map(ReleasePlan::from_reservation)
            .collect();

        let mut armed = self
            .armed
            .lock()
            .map_err(|_| AppError::internal_trace("expiry sweep state poisoned", None))?;

        let snapshot: HashMap<ObjectId, ReleasePlan> = armed
            .releases
            .iter()
            .map(|(id, release)| (*id, release.plan.clone()))
            .collect();

        let to_arm = plans_to_arm(&snapshot, candidates);
        let count = to_arm.len();

        for plan in to_arm {
            let delay = match plan.deadline() {
                Ok(deadline) => delay_until(deadline, Local::now()),
                Err(e) => {
                    tracing::warn!(
                        reservation_id = %plan.reservation_id,
                        error = %e,
                        "Skipping reservation with unreadable date or end time"
                    );
                    continue;
                }
            };

            if let Some(stale) = armed.releases.remove(&plan.reservation_id) {
                tracing::debug!(reservation_id = %plan.reservation_id, "Replacing armed release");
                stale.handle.abort();
            }

            armed.next_generation += 1;
            let generation = armed.next_generation;
            let handle = self.spawn_release(plan.clone(), generation, delay);
            armed.releases.insert(plan.reservation_id, ArmedRelease { plan, generation, handle });
        }

        Ok(count)
    }

    fn spawn_release(&self, plan: ReleasePlan, generation: u64, delay: Duration) -> JoinHandle<()> {
        let repo = self.repo.clone();
        let armed = Arc::clone(&self.armed);

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            release(&repo, &plan).await;

            if let Ok(mut armed) = armed.lock() {
                let current = armed.releases.get(&plan.reservation_id).map(|r| r.generation);
                if current == Some(generation) {
                    armed.releases.remove(&plan.reservation_id);
                }
            }
        })
    }
}

/// Planes nuevos o cuya huella ha cambiado respecto a los ya programados
pub fn plans_to_arm(armed: &HashMap<ObjectId, ReleasePlan>, candidates: Vec<ReleasePlan>) -> Vec<ReleasePlan> {
    candidates
        .into_iter()
        .filter(|plan| armed.get(&plan.reservation_id) != Some(plan))
        .collect()
}

/// `date` (`YYYY-MM-DD`) + `end_time` (`HH:mm`, admite `24:00`) en hora local
pub fn release_deadline(date: &str, end_time: &str) -> AppResult<DateTime<Local>> {
    let day = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|_| AppError::validation_field("reservationDate", "invalid date, use YYYY-MM-DD"))?;
    let minutes = parse_clock("endTime", end_time)?;

    let midnight = day
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| AppError::Internal(format!("invalid midnight for {}", date)))?;
    let naive = midnight + chrono::Duration::minutes(i64::from(minutes));

    Local
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| AppError::Internal(format!("{} {} does not exist in local time", date, end_time)))
}

/// Espera hasta `deadline`; cero si ya ha pasado
pub fn delay_until(deadline: DateTime<Local>, now: DateTime<Local>) -> Duration {
    (deadline - now).to_std().unwrap_or(Duration::ZERO)
}

/// Cómo cerrar la reserva tras retirar sus bloqueos
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Closing {
    /// Sigue activa: pasa a `Completed`
    Complete,
    /// Cancelada: sólo se marca `holdsReleased`
    MarkReleased,
    /// Borrada: no queda documento que cerrar
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseAction {
    AlreadyReleased,
    /// La reserva cambió desde que se programó; el siguiente tick la reprograma
    Stale,
    Release { pull_holds: bool, closing: Closing },
}

/// Decide qué hacer con un plan vencido a partir de la reserva releída.
///
/// Sólo se retiran bloqueos si la reserva los puso: una reserva de mesa
/// concreta sin confirmar no tiene ninguno.
pub fn release_action(current: Option<&Reservation>, plan: &ReleasePlan) -> ReleaseAction {
    let Some(reservation) = current else {
        return ReleaseAction::Release {
            pull_holds: plan.holds_placed,
            closing: Closing::Deleted,
        };
    };

    if reservation.holds_released {
        return ReleaseAction::AlreadyReleased;
    }
    if ReleasePlan::from_reservation(reservation).as_ref() != Some(plan) {
        return ReleaseAction::Stale;
    }

    let closing = if reservation.status.can_transition_to(ReservationStatus::Completed) {
        Closing::Complete
    } else {
        Closing::MarkReleased
    };
    ReleaseAction::Release { pull_holds: plan.holds_placed, closing }
}

/// Retira los bloqueos de un plan vencido y cierra la reserva.
///
/// Antes de tocar nada se relee la reserva (ver [`release_action`]). Un fallo
/// en una mesa se registra y no impide liberar las demás.
async fn release(repo: &MongoRepo, plan: &ReleasePlan) {
    let id = plan.reservation_id;

    let current = match repo.find_reservation(id).await {
        Ok(current) => current,
        Err(e) => {
            tracing::error!(reservation_id = %id, error = %e, "Could not re-read reservation before release");
            return;
        }
    };

    let (pull_holds, closing) = match release_action(current.as_ref(), plan) {
        ReleaseAction::AlreadyReleased => {
            tracing::debug!(reservation_id = %id, "Holds already released");
            return;
        }
        ReleaseAction::Stale => {
            tracing::debug!(reservation_id = %id, "Reservation changed since it was armed, skipping");
            return;
        }
        ReleaseAction::Release { pull_holds, closing } => (pull_holds, closing),
    };

    if pull_holds {
        for table_id in &plan.table_ids {
            match repo
                .release_hold(*table_id, &plan.date, &plan.start_time, &plan.end_time)
                .await
            {
                Ok(removed) => tracing::info!(
                    reservation_id = %id,
                    table_id = %table_id,
                    removed = removed,
                    "Table hold released"
                ),
                Err(e) => tracing::error!(
                    reservation_id = %id,
                    table_id = %table_id,
                    error = %e,
                    "Failed to release table hold"
                ),
            }
        }
    }

    let closed = match closing {
        Closing::Deleted => {
            tracing::info!(reservation_id = %id, "Reservation was deleted, nothing to close");
            return;
        }
        Closing::Complete => match repo.complete_reservation(id).await {
            Ok(true) => {
                tracing::info!(reservation_id = %id, "Reservation marked as completed");
                return;
            }
            // cancelada entre la relectura y el cierre
            Ok(false) => repo.mark_holds_released(id).await,
            Err(e) => Err(e),
        },
        Closing::MarkReleased => repo.mark_holds_released(id).await,
    };

    match closed {
        Ok(()) => tracing::info!(reservation_id = %id, "Reservation closed without status change"),
        Err(e) => tracing::error!(reservation_id = %id, error = %e, "Failed to close reservation"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ReservationStatus;
    use crate::scheduling::availability::fixtures::{reservation, table};
    use chrono::{Datelike, Timelike};
    use tokio_test::{assert_err, assert_ok};

    fn plan(start: &str, end: &str) -> ReleasePlan {
        let r = reservation(&table(4, "1"), "2024-06-01", start, end, ReservationStatus::Confirmed);
        ReleasePlan::from_reservation(&r).unwrap()
    }

    #[test]
    fn plan_requires_persisted_id() {
        let mut r = reservation(&table(4, "1"), "2024-06-01", "09:00", "10:30", ReservationStatus::Pending);
        assert!(ReleasePlan::from_reservation(&r).is_some());
        r.id = None;
        assert!(ReleasePlan::from_reservation(&r).is_none());
    }

    #[test]
    fn arms_only_new_or_changed_reservations() {
        let unchanged = plan("09:00", "10:30");
        let moved = plan("12:00", "13:30");
        let fresh = plan("18:00", "19:30");

        let mut armed = HashMap::new();
        armed.insert(unchanged.reservation_id, unchanged.clone());
        let mut previous = moved.clone();
        previous.start_time = "11:00".to_string();
        previous.end_time = "12:30".to_string();
        armed.insert(moved.reservation_id, previous);

        let to_arm = plans_to_arm(&armed, vec![unchanged.clone(), moved.clone(), fresh.clone()]);
        assert_eq!(to_arm, vec![moved, fresh]);

        // Un segundo pase sin cambios no programa nada
        let mut armed_now = armed.clone();
        for p in &to_arm {
            armed_now.insert(p.reservation_id, p.clone());
        }
        assert!(plans_to_arm(&armed_now, vec![unchanged, to_arm[0].clone(), to_arm[1].clone()]).is_empty());
    }

    #[test]
    fn confirmed_reservation_is_released_and_completed() {
        let r = reservation(&table(4, "1"), "2024-06-01", "09:00", "10:30", ReservationStatus::Confirmed);
        let armed = ReleasePlan::from_reservation(&r).unwrap();
        assert!(armed.holds_placed);

        assert_eq!(
            release_action(Some(&r), &armed),
            ReleaseAction::Release { pull_holds: true, closing: Closing::Complete }
        );
        let deadline = assert_ok!(armed.deadline());
        assert_eq!((deadline.hour(), deadline.minute()), (10, 30));
    }

    #[test]
    fn pending_table_reservation_has_no_hold_to_pull() {
        let r = reservation(&table(4, "1"), "2024-06-01", "12:00", "12:30", ReservationStatus::Pending);
        let armed = ReleasePlan::from_reservation(&r).unwrap();

        assert_eq!(
            release_action(Some(&r), &armed),
            ReleaseAction::Release { pull_holds: false, closing: Closing::Complete }
        );
    }

    #[test]
    fn cancelled_reservation_releases_holds_but_stays_cancelled() {
        let mut r = reservation(&table(4, "1"), "2024-06-01", "12:00", "13:30", ReservationStatus::Confirmed);
        let armed = ReleasePlan::from_reservation(&r).unwrap();
        r.status = ReservationStatus::Cancelled;

        assert_eq!(
            release_action(Some(&r), &armed),
            ReleaseAction::Release { pull_holds: true, closing: Closing::MarkReleased }
        );

        // Cancelada antes de confirmarse: no hay bloqueo que retirar
        let mut pending = reservation(&table(4, "1"), "2024-06-01", "12:00", "12:30", ReservationStatus::Pending);
        let armed = ReleasePlan::from_reservation(&pending).unwrap();
        pending.status = ReservationStatus::Cancelled;
        assert_eq!(
            release_action(Some(&pending), &armed),
            ReleaseAction::Release { pull_holds: false, closing: Closing::MarkReleased }
        );
    }

    #[test]
    fn deleted_reservation_only_pulls_its_own_holds() {
        let confirmed = plan("09:00", "10:30");
        assert_eq!(
            release_action(None, &confirmed),
            ReleaseAction::Release { pull_holds: true, closing: Closing::Deleted }
        );

        let mut unconfirmed = plan("09:00", "10:30");
        unconfirmed.holds_placed = false;
        assert_eq!(
            release_action(None, &unconfirmed),
            ReleaseAction::Release { pull_holds: false, closing: Closing::Deleted }
        );
    }

    #[test]
    fn released_or_changed_reservations_are_left_alone() {
        let mut r = reservation(&table(4, "1"), "2024-06-01", "09:00", "10:30", ReservationStatus::Confirmed);
        let armed = ReleasePlan::from_reservation(&r).unwrap();

        r.holds_released = true;
        assert_eq!(release_action(Some(&r), &armed), ReleaseAction::AlreadyReleased);

        r.holds_released = false;
        r.end_time = "11:00".to_string();
        assert_eq!(release_action(Some(&r), &armed), ReleaseAction::Stale);

        // Confirmar una reserva de mesa concreta también cambia su plan
        let mut pending = reservation(&table(4, "1"), "2024-06-01", "12:00", "12:30", ReservationStatus::Pending);
        let armed = ReleasePlan::from_reservation(&pending).unwrap();
        pending.status = ReservationStatus::Confirmed;
        pending.holds_placed = true;
        assert_eq!(release_action(Some(&pending), &armed), ReleaseAction::Stale);
    }

    #[test]
    fn deadline_is_end_time_on_reservation_date() {
        let deadline = assert_ok!(release_deadline("2024-06-01", "10:30"));
        assert_eq!((deadline.year(), deadline.month(), deadline.day()), (2024, 6, 1));
        assert_eq!((deadline.hour(), deadline.minute()), (10, 30));

        let midnight = assert_ok!(release_deadline("2024-06-01", "24:00"));
        assert_eq!((midnight.month(), midnight.day(), midnight.hour()), (6, 2, 0));

        assert_err!(release_deadline("01/06/2024", "10:30"));
        assert_err!(release_deadline("2024-06-01", "late"));
    }

    #[test]
    fn past_deadlines_fire_immediately() {
        let now = assert_ok!(release_deadline("2024-06-01", "10:30"));
        let earlier = assert_ok!(release_deadline("2024-06-01", "09:00"));
        let later = assert_ok!(release_deadline("2024-06-01", "12:00"));

        assert_eq!(delay_until(earlier, now), Duration::ZERO);
        assert_eq!(delay_until(now, now), Duration::ZERO);
        assert_eq!(delay_until(later, now), Duration::from_secs(90 * 60));
    }
}
