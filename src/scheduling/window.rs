//! # Ventanas horarias
//!
//! Representación de un intervalo `[start, end)` en minutos desde la
//! medianoche de una fecha concreta, junto con el parseo y formateo `HH:mm`.

use chrono::{NaiveTime, Timelike};
use serde::Serialize;
use crate::api::{AppError, AppResult};

/// Minutos en un día natural. Una ventana nunca termina después de este valor.
pub const MINUTES_PER_DAY: u32 = 24 * 60;

/// Intervalo semiabierto `[start, end)` expresado en minutos desde medianoche
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimeWindow {
    pub start: u32,
    pub end: u32,
}

impl TimeWindow {
    /// Crea una ventana validando que no esté vacía y que no cruce la medianoche
    pub fn new(start: u32, end: u32) -> AppResult<Self> {
        if end <= start {
            return Err(AppError::validation_field(
                "endTime",
                "must be later than startTime",
            ));
        }
        if end > MINUTES_PER_DAY {
            return Err(AppError::validation_field(
                "endTime",
                "reservation window must end on the same day",
            ));
        }
        Ok(Self { start, end })
    }

    /// Ventana que empieza en `start` y dura `duration` minutos
    pub fn starting_at(start: u32, duration: u32) -> AppResult<Self> {
        Self::new(start, start.saturating_add(duration))
    }

    /// Parsea una pareja de horas `HH:mm`
    pub fn parse(start: &str, end: &str) -> AppResult<Self> {
        Self::new(parse_clock("startTime", start)?, parse_clock("endTime", end)?)
    }

    pub fn duration(&self) -> u32 {
        self.end - self.start
    }

    /// Dos intervalos entran en conflicto si `s1 < e2 && e1 > s2`.
    /// Los extremos que se tocan no se solapan.
    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start < other.end && self.end > other.start
    }

    pub fn start_clock(&self) -> String {
        format_clock(self.start)
    }

    pub fn end_clock(&self) -> String {
        format_clock(self.end)
    }

    pub fn to_slot(&self) -> SlotView {
        SlotView {
            start_time: self.start_clock(),
            end_time: self.end_clock(),
        }
    }
}

/// Forma serializada de una ventana, tal y como la devuelve la API
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotView {
    pub start_time: String,
    pub end_time: String,
}

/// Parsea `HH:mm` (se aceptan segundos, que se descartan) a minutos desde medianoche.
/// `24:00` es válido como fin de ventana.
pub fn parse_clock(field: &str, value: &str) -> AppResult<u32> {
    let value = value.trim();
    if value == "24:00" {
        return Ok(MINUTES_PER_DAY);
    }
    let time = NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .map_err(|_| AppError::validation_field(field, "invalid time, use HH:mm"))?;
    Ok(time.hour() * 60 + time.minute())
}

/// Formatea minutos desde medianoche como `HH:mm`. `1440` se muestra como `24:00`.
pub fn format_clock(minutes: u32) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn w(start: u32, end: u32) -> TimeWindow {
        TimeWindow { start, end }
    }

    #[test]
    fn parses_and_formats_clock_times() {
        assert_eq!(assert_ok!(parse_clock("startTime", "09:05")), 545);
        assert_eq!(assert_ok!(parse_clock("startTime", "12:30:59")), 750);
        assert_eq!(format_clock(545), "09:05");
        assert_eq!(format_clock(MINUTES_PER_DAY), "24:00");
        assert_eq!(assert_ok!(parse_clock("endTime", "24:00")), MINUTES_PER_DAY);
        assert_err!(parse_clock("startTime", "noon"));
        assert_err!(parse_clock("startTime", "25:00"));
    }

    #[test]
    fn rejects_empty_and_overnight_windows() {
        assert_err!(TimeWindow::new(600, 600));
        assert_err!(TimeWindow::new(700, 600));
        assert_err!(TimeWindow::starting_at(23 * 60, 90));
        assert_ok!(TimeWindow::starting_at(22 * 60 + 30, 90));
    }

    #[test]
    fn overlap_is_symmetric_and_half_open() {
        let pairs = [
            (w(720, 810), w(750, 840)),
            (w(720, 810), w(810, 900)),
            (w(600, 660), w(540, 720)),
            (w(0, 30), w(1000, 1100)),
        ];
        for (a, b) in pairs {
            assert_eq!(a.overlaps(&b), b.overlaps(&a));
        }
        assert!(w(720, 810).overlaps(&w(720, 810)));
        assert!(!w(720, 810).overlaps(&w(810, 900)));
        assert!(!w(810, 900).overlaps(&w(720, 810)));
    }

    #[test]
    fn slot_view_uses_clock_strings() {
        let view = assert_ok!(TimeWindow::parse("12:00", "13:30")).to_slot();
        assert_eq!(view.start_time, "12:00");
        assert_eq!(view.end_time, "13:30");
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json, serde_json::json!({"startTime": "12:00", "endTime": "13:30"}));
    }
}
