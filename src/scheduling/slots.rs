//! # Generador de franjas
//!
//! Produce las ventanas candidatas de un día de servicio. La secuencia es
//! perezosa y se puede recorrer tantas veces como haga falta: cada llamada a
//! [`SlotGenerator::iter`] empieza de nuevo desde la apertura.

use chrono::{NaiveTime, Timelike};
use super::window::{parse_clock, TimeWindow, MINUTES_PER_DAY};
use crate::api::{AppError, AppResult};

/// Duración por defecto de una reserva, en minutos
pub const DEFAULT_SLOT_MINUTES: u32 = 90;

/// Separación por defecto entre el inicio de dos franjas consecutivas
pub const DEFAULT_STEP_MINUTES: u32 = 15;

/// Horario de servicio cuando el restaurante no tiene uno utilizable
pub const DEFAULT_OPENING: u32 = 8 * 60;
pub const DEFAULT_CLOSING: u32 = 22 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotGenerator {
    business_start: u32,
    business_end: u32,
    duration: u32,
    step: u32,
}

impl SlotGenerator {
    /// # Errores
    /// - `ValidationWithField`: duración o paso igual a cero, o cierre fuera del día
    pub fn new(business_start: u32, business_end: u32, duration: u32, step: u32) -> AppResult<Self> {
        if duration == 0 {
            return Err(AppError::validation_field("durationMinutes", "must be greater than 0"));
        }
        if step == 0 {
            return Err(AppError::validation_field("step", "must be greater than 0"));
        }
        if business_end > MINUTES_PER_DAY {
            return Err(AppError::validation_field("closingHours", "must be within the day"));
        }
        Ok(Self { business_start, business_end, duration, step })
    }

    /// Generador con la duración y el paso por defecto
    pub fn with_defaults(business_start: u32, business_end: u32) -> AppResult<Self> {
        Self::new(business_start, business_end, DEFAULT_SLOT_MINUTES, DEFAULT_STEP_MINUTES)
    }

    pub fn iter(&self) -> Slots {
        Slots {
            next_start: self.business_start,
            business_end: self.business_end,
            duration: self.duration,
            step: self.step,
        }
    }
}

impl IntoIterator for &SlotGenerator {
    type Item = TimeWindow;
    type IntoIter = Slots;

    fn into_iter(self) -> Slots {
        self.iter()
    }
}

/// Iterador sobre las franjas de un [`SlotGenerator`]
#[derive(Debug, Clone)]
pub struct Slots {
    next_start: u32,
    business_end: u32,
    duration: u32,
    step: u32,
}

impl Iterator for Slots {
    type Item = TimeWindow;

    fn next(&mut self) -> Option<TimeWindow> {
        let end = self.next_start.checked_add(self.duration)?;
        if end > self.business_end {
            return None;
        }
        let slot = TimeWindow { start: self.next_start, end };
        self.next_start += self.step;
        Some(slot)
    }
}

/// Horario de servicio de un restaurante a partir de `openingHours`/`closingHours`.
///
/// Acepta `HH:mm` y `h:mm AM/PM`. Si falta alguno o no se puede interpretar,
/// se usa 08:00-22:00.
pub fn business_hours(opening: Option<&str>, closing: Option<&str>) -> (u32, u32) {
    let opening = opening.and_then(parse_business_clock);
    let closing = closing.and_then(parse_business_clock);

    match (opening, closing) {
        (Some(open), Some(close)) if open < close => (open, close),
        _ => {
            tracing::debug!("Restaurant business hours missing or unparseable, using defaults");
            (DEFAULT_OPENING, DEFAULT_CLOSING)
        }
    }
}

fn parse_business_clock(value: &str) -> Option<u32> {
    let value = value.trim();
    if let Ok(minutes) = parse_clock("businessHours", value) {
        return Some(minutes);
    }
    ["%I:%M %p", "%I:%M%p"]
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(&value.to_uppercase(), format).ok())
        .map(|time| time.hour() * 60 + time.minute())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn slots_have_fixed_duration_and_step() {
        let generator = assert_ok!(SlotGenerator::with_defaults(8 * 60, 22 * 60));
        let slots: Vec<_> = generator.iter().collect();

        assert!(!slots.is_empty());
        for slot in &slots {
            assert_eq!(slot.duration(), DEFAULT_SLOT_MINUTES);
            assert!(slot.end <= 22 * 60);
        }
        for pair in slots.windows(2) {
            assert_eq!(pair[1].start - pair[0].start, DEFAULT_STEP_MINUTES);
        }
        assert_eq!(slots.first().unwrap().start_clock(), "08:00");
        assert_eq!(slots.last().unwrap().end_clock(), "22:00");
        assert_eq!(slots.len(), 51);
    }

    #[test]
    fn stops_before_passing_business_end() {
        let generator = assert_ok!(SlotGenerator::new(600, 700, 60, 25));
        let starts: Vec<_> = generator.iter().map(|s| s.start).collect();
        assert_eq!(starts, vec![600, 625]);
    }

    #[test]
    fn short_business_day_yields_nothing() {
        let generator = assert_ok!(SlotGenerator::with_defaults(600, 680));
        assert_eq!(generator.iter().count(), 0);
    }

    #[test]
    fn sequence_is_restartable() {
        let generator = assert_ok!(SlotGenerator::with_defaults(9 * 60, 13 * 60));
        let first: Vec<_> = (&generator).into_iter().collect();
        let second: Vec<_> = generator.iter().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn rejects_zero_step_or_duration() {
        assert_err!(SlotGenerator::new(600, 700, 0, 15));
        assert_err!(SlotGenerator::new(600, 700, 90, 0));
    }

    #[test]
    fn business_hours_accepts_both_clock_styles() {
        assert_eq!(business_hours(Some("10:00"), Some("23:30")), (600, 1410));
        assert_eq!(business_hours(Some("9:00 am"), Some("11:00 PM")), (540, 1380));
        assert_eq!(business_hours(None, Some("23:00")), (DEFAULT_OPENING, DEFAULT_CLOSING));
        assert_eq!(business_hours(Some("late"), Some("later")), (DEFAULT_OPENING, DEFAULT_CLOSING));
        assert_eq!(business_hours(Some("22:00"), Some("10:00")), (DEFAULT_OPENING, DEFAULT_CLOSING));
    }
}
