use std::cmp::Ordering;

use clap::ValueEnum;
use serde::Serialize;

use crate::models::ClientConversionRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn flipped(self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
pub enum ClientSortField {
    FirstVisitDate,
    Name,
    Trainer,
    Location,
    Membership,
    ConversionStatus,
    RetentionStatus,
    Ltv,
    VisitsPostTrial,
    ConversionSpan,
}

/// Table sort state: clicking the active column flips direction, clicking a
/// new column sorts it ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SortState {
    pub field: ClientSortField,
    pub direction: SortDirection,
}

impl Default for SortState {
    fn default() -> Self {
        SortState {
            field: ClientSortField::FirstVisitDate,
            direction: SortDirection::Desc,
        }
    }
}

impl SortState {
    pub fn toggle(self, field: ClientSortField) -> Self {
        if self.field == field {
            SortState {
                field,
                direction: self.direction.flipped(),
            }
        } else {
            SortState {
                field,
                direction: SortDirection::Asc,
            }
        }
    }
}

pub fn search_clients(
    clients: &[ClientConversionRecord],
    text: &str,
) -> Vec<ClientConversionRecord> {
    let needle = text.trim().to_lowercase();
    if needle.is_empty() {
        return clients.to_vec();
    }

    clients
        .iter()
        .filter(|client| {
            [
                client.full_name().as_str(),
                client.trainer_name.as_str(),
                client.first_visit_location.as_str(),
                client.membership_used.as_str(),
                client.conversion_status.as_str(),
                client.retention_status.as_str(),
                client.payment_method.as_str(),
            ]
            .iter()
            .any(|field| field.to_lowercase().contains(&needle))
        })
        .cloned()
        .collect()
}

fn compare_text(a: &str, b: &str) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase())
}

fn compare_number(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

fn compare_clients(
    a: &ClientConversionRecord,
    b: &ClientConversionRecord,
    field: ClientSortField,
) -> Ordering {
    match field {
        ClientSortField::FirstVisitDate => a.first_visit_date.cmp(&b.first_visit_date),
        ClientSortField::Name => compare_text(&a.full_name(), &b.full_name()),
        ClientSortField::Trainer => compare_text(&a.trainer_name, &b.trainer_name),
        ClientSortField::Location => compare_text(&a.first_visit_location, &b.first_visit_location),
        ClientSortField::Membership => compare_text(&a.membership_used, &b.membership_used),
        ClientSortField::ConversionStatus => {
            compare_text(&a.conversion_status, &b.conversion_status)
        }
        ClientSortField::RetentionStatus => compare_text(&a.retention_status, &b.retention_status),
        ClientSortField::Ltv => compare_number(a.ltv, b.ltv),
        ClientSortField::VisitsPostTrial => {
            compare_number(a.visits_post_trial, b.visits_post_trial)
        }
        ClientSortField::ConversionSpan => compare_number(a.conversion_span, b.conversion_span),
    }
}

pub fn sort_clients(
    clients: &[ClientConversionRecord],
    state: SortState,
) -> Vec<ClientConversionRecord> {
    let mut sorted = clients.to_vec();
    sorted.sort_by(|a, b| {
        let ordering = compare_clients(a, b, state.field);
        match state.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    });
    sorted
}
