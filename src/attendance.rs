use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::aggregate::ratio;
use crate::models::RecurringSessionRecord;

/// Concatenates both session sheets and keeps the first occurrence of each
/// (unique id 1, unique id 2) pair.
pub fn combine_sessions(
    recurring: Vec<RecurringSessionRecord>,
    teacher: Vec<RecurringSessionRecord>,
) -> Vec<RecurringSessionRecord> {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    recurring
        .into_iter()
        .chain(teacher)
        .filter(|session| {
            seen.insert((session.unique_id_1.clone(), session.unique_id_2.clone()))
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionFilter {
    pub location: Option<String>,
    pub locations: Vec<String>,
    pub trainers: Vec<String>,
    pub classes: Vec<String>,
    pub days: Vec<String>,
}

impl SessionFilter {
    pub fn matches(&self, session: &RecurringSessionRecord) -> bool {
        fn allowed(values: &[String], value: &str) -> bool {
            values.is_empty() || values.iter().any(|v| v == value)
        }

        self.location
            .as_deref()
            .map(|l| session.location == l)
            .unwrap_or(true)
            && allowed(&self.locations, &session.location)
            && allowed(&self.trainers, &session.trainer)
            && allowed(&self.classes, &session.class_name)
            && allowed(&self.days, &session.day)
    }

    pub fn apply(&self, sessions: &[RecurringSessionRecord]) -> Vec<RecurringSessionRecord> {
        sessions
            .iter()
            .filter(|session| self.matches(session))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilterOptions {
    pub locations: Vec<String>,
    pub trainers: Vec<String>,
    pub classes: Vec<String>,
    pub days: Vec<String>,
    pub times: Vec<String>,
}

fn distinct<'a>(values: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for value in values {
        if !value.is_empty() && !out.contains(value) {
            out.push(value.clone());
        }
    }
    out
}

pub fn filter_options(sessions: &[RecurringSessionRecord]) -> FilterOptions {
    FilterOptions {
        locations: distinct(sessions.iter().map(|s| &s.location)),
        trainers: distinct(sessions.iter().map(|s| &s.trainer)),
        classes: distinct(sessions.iter().map(|s| &s.class_name)),
        days: distinct(sessions.iter().map(|s| &s.day)),
        times: distinct(sessions.iter().map(|s| &s.time)),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionSummary {
    pub sessions: usize,
    pub capacity: f64,
    pub checked_in: f64,
    pub booked: f64,
    pub late_cancelled: f64,
    pub revenue: f64,
    pub avg_attendance: f64,
    pub fill_rate: f64,
}

pub fn summarize_sessions(sessions: &[RecurringSessionRecord]) -> SessionSummary {
    let capacity: f64 = sessions.iter().map(|s| s.capacity).sum();
    let checked_in: f64 = sessions.iter().map(|s| s.checked_in).sum();

    SessionSummary {
        sessions: sessions.len(),
        capacity,
        checked_in,
        booked: sessions.iter().map(|s| s.booked).sum(),
        late_cancelled: sessions.iter().map(|s| s.late_cancelled).sum(),
        revenue: sessions.iter().map(|s| s.revenue).sum(),
        avg_attendance: ratio(checked_in, sessions.len() as f64),
        fill_rate: ratio(checked_in, capacity) * 100.0,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassPerformance {
    pub class_name: String,
    pub sessions: usize,
    pub checked_in: f64,
    pub capacity: f64,
    pub avg_attendance: f64,
    pub fill_rate: f64,
}

/// Per-class attendance, best average attendance first.
pub fn class_performance(sessions: &[RecurringSessionRecord]) -> Vec<ClassPerformance> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, (usize, f64, f64)> = HashMap::new();

    for session in sessions {
        let entry = groups
            .entry(session.class_name.clone())
            .or_insert_with(|| {
                order.push(session.class_name.clone());
                (0, 0.0, 0.0)
            });
        entry.0 += 1;
        entry.1 += session.checked_in;
        entry.2 += session.capacity;
    }

    let mut classes: Vec<ClassPerformance> = order
        .into_iter()
        .filter_map(|name| {
            groups
                .remove(&name)
                .map(|(count, checked_in, capacity)| ClassPerformance {
                    class_name: name,
                    sessions: count,
                    checked_in,
                    capacity,
                    avg_attendance: ratio(checked_in, count as f64),
                    fill_rate: ratio(checked_in, capacity) * 100.0,
                })
        })
        .collect();

    classes.sort_by(|a, b| {
        b.avg_attendance
            .partial_cmp(&a.avg_attendance)
            .unwrap_or(Ordering::Equal)
    });
    classes
}
