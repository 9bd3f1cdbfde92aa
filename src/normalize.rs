use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::debug;

use crate::models::{ClientConversionRecord, Grid, RecurringSessionRecord, SalesRecord};

pub const UNKNOWN: &str = "Unknown";

/// Coercion failures. These never reach the caller of the lenient
/// helpers; they are logged and replaced with a default.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ParseError {
    #[error("not a number: {0:?}")]
    Number(String),
    #[error("not a DD/MM/YYYY date: {0:?}")]
    Date(String),
}

pub fn try_coerce_number(raw: &str) -> Result<f64, ParseError> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();

    match cleaned.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(ParseError::Number(raw.to_string())),
    }
}

/// Strips currency symbols, separators and whitespace, then parses.
/// Blank or non-numeric input is 0.
pub fn coerce_number(raw: &str) -> f64 {
    if raw.trim().is_empty() {
        return 0.0;
    }
    match try_coerce_number(raw) {
        Ok(value) => value,
        Err(err) => {
            debug!(error = %err, "defaulting cell to 0");
            0.0
        }
    }
}

pub fn try_parse_date(raw: &str) -> Result<NaiveDate, ParseError> {
    let invalid = || ParseError::Date(raw.to_string());
    let date_part = raw
        .trim()
        .split([' ', ','])
        .next()
        .filter(|part| !part.is_empty())
        .ok_or_else(invalid)?;

    if let Ok(date) = NaiveDate::parse_from_str(date_part, "%Y-%m-%d") {
        return Ok(date);
    }

    let mut parts = date_part.split('/');
    let (Some(day), Some(month), Some(year), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(invalid());
    };
    if year.len() != 4 {
        return Err(invalid());
    }

    let day: u32 = day.parse().map_err(|_| invalid())?;
    let month: u32 = month.parse().map_err(|_| invalid())?;
    let year: i32 = year.parse().map_err(|_| invalid())?;
    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(invalid)
}

pub fn parse_sheet_date(raw: &str) -> Option<NaiveDate> {
    if raw.trim().is_empty() {
        return None;
    }
    match try_parse_date(raw) {
        Ok(date) => Some(date),
        Err(err) => {
            debug!(error = %err, "dropping unparseable date");
            None
        }
    }
}

/// `DD/MM/YYYY[ HH:mm:ss]` to `YYYY-MM-DD`; anything unparseable is "".
pub fn normalize_date(raw: &str) -> String {
    parse_sheet_date(raw)
        .map(|date| date.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    Text(String),
    Number(f64),
}

/// One data row keyed by its header cells.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SheetRecord {
    cells: BTreeMap<String, Cell>,
}

impl SheetRecord {
    pub fn get(&self, column: &str) -> Option<&Cell> {
        self.cells.get(column)
    }

    pub fn text(&self, column: &str) -> String {
        match self.get(column) {
            Some(Cell::Text(value)) => value.trim().to_string(),
            Some(Cell::Number(value)) => value.to_string(),
            None => String::new(),
        }
    }

    pub fn text_or_unknown(&self, column: &str) -> String {
        let value = self.text(column);
        if value.is_empty() {
            UNKNOWN.to_string()
        } else {
            value
        }
    }

    pub fn number(&self, column: &str) -> f64 {
        match self.get(column) {
            Some(Cell::Number(value)) => *value,
            Some(Cell::Text(value)) => coerce_number(value),
            None => 0.0,
        }
    }
}

fn is_date_column(column: &str) -> bool {
    column == "Date" || column.ends_with(" Date")
}

/// Pairs each row with the header. Columns listed in `identifier_columns`
/// stay text (date columns among them are rewritten to ISO), every other
/// column is coerced to a number.
pub fn normalize_rows(
    header: &[String],
    rows: &[Vec<String>],
    identifier_columns: &[&str],
) -> Vec<SheetRecord> {
    let header: Vec<&str> = header.iter().map(|h| h.trim()).collect();

    rows.iter()
        .filter(|row| row.iter().any(|cell| !cell.trim().is_empty()))
        .map(|row| {
            let mut cells = BTreeMap::new();
            for (idx, column) in header.iter().enumerate() {
                if column.is_empty() {
                    continue;
                }
                let raw = row.get(idx).map(String::as_str).unwrap_or("");
                let cell = if identifier_columns.contains(column) {
                    if is_date_column(column) {
                        Cell::Text(normalize_date(raw))
                    } else {
                        Cell::Text(raw.to_string())
                    }
                } else {
                    Cell::Number(coerce_number(raw))
                };
                cells.insert(column.to_string(), cell);
            }
            SheetRecord { cells }
        })
        .collect()
}

/// Treats the first grid row as the header.
pub fn normalize_grid(grid: &Grid, identifier_columns: &[&str]) -> Vec<SheetRecord> {
    match grid.split_first() {
        Some((header, rows)) => normalize_rows(header, rows, identifier_columns),
        None => Vec::new(),
    }
}

const SALES_TEXT_COLUMNS: &[&str] = &[
    "Member ID",
    "Customer Name",
    "Customer Email",
    "Sale Item ID",
    "Payment Category",
    "Membership Type",
    "Payment Date",
    "Payment Item",
    "Payment Status",
    "Payment Method",
    "Payment Transaction ID",
    "Stripe Token",
    "Sold By",
    "Sale Reference",
    "Calculated Location",
    "Cleaned Product",
    "Cleaned Category",
    "Host Id",
];

pub fn sales_record(record: &SheetRecord) -> SalesRecord {
    let payment_value = record.number("Payment Value");
    let payment_vat = record.number("Payment VAT");
    let sold_by = match record.text("Sold By").as_str() {
        "-" => "Online/System".to_string(),
        "" => UNKNOWN.to_string(),
        other => other.to_string(),
    };

    SalesRecord {
        member_id: record.text("Member ID"),
        customer_name: record.text_or_unknown("Customer Name"),
        customer_email: record.text("Customer Email"),
        sale_item_id: record.text("Sale Item ID"),
        payment_category: record.text("Payment Category"),
        membership_type: record.text("Membership Type"),
        payment_date: parse_sheet_date(&record.text("Payment Date")),
        payment_value,
        paid_in_money_credits: record.number("Paid In Money Credits"),
        payment_vat,
        payment_item: record.text("Payment Item"),
        payment_status: record.text("Payment Status"),
        payment_method: record.text("Payment Method"),
        sold_by,
        location: record.text_or_unknown("Calculated Location"),
        product: record.text_or_unknown("Cleaned Product"),
        category: record.text_or_unknown("Cleaned Category"),
        mrp_pre_tax: record.number("Mrp - Pre Tax"),
        mrp_post_tax: record.number("Mrp - Post Tax"),
        discount_amount: record.number("Discount Amount -Mrp- Payment Value"),
        discount_percentage: record.number("Discount Percentage - discount amount/mrp*100"),
        net_revenue: payment_value - payment_vat,
    }
}

pub fn parse_sales(grid: &Grid) -> Vec<SalesRecord> {
    normalize_grid(grid, SALES_TEXT_COLUMNS)
        .iter()
        .map(sales_record)
        .collect()
}

const CLIENT_TEXT_COLUMNS: &[&str] = &[
    "First Name",
    "Last Name",
    "First Visit Date",
    "First Visit Location",
    "First Visit Entity Name",
    "Is New",
    "Trainer Name",
    "Membership Used",
    "Payment Method",
    "Conversion Status",
    "Retention Status",
    "Home Location",
    "Month Year",
];

pub fn client_record(record: &SheetRecord) -> ClientConversionRecord {
    ClientConversionRecord {
        first_name: record.text("First Name"),
        last_name: record.text("Last Name"),
        first_visit_date: parse_sheet_date(&record.text("First Visit Date")),
        first_visit_location: record.text_or_unknown("First Visit Location"),
        first_visit_entity_name: record.text("First Visit Entity Name"),
        is_new: record.text("Is New"),
        trainer_name: record.text("Trainer Name"),
        membership_used: record.text("Membership Used"),
        payment_method: record.text("Payment Method"),
        conversion_status: record.text("Conversion Status"),
        retention_status: record.text("Retention Status"),
        visits_post_trial: record.number("Visits Post Trial"),
        conversion_span: record.number("Conversion Span"),
        ltv: record.number("LTV"),
        class_no: record.number("Class No"),
        home_location: record.text("Home Location"),
        month_year: record.text("Month Year"),
    }
}

pub fn parse_clients(grid: &Grid) -> Vec<ClientConversionRecord> {
    normalize_grid(grid, CLIENT_TEXT_COLUMNS)
        .iter()
        .map(client_record)
        .collect()
}

const SESSION_TEXT_COLUMNS: &[&str] = &[
    "Unique ID 1",
    "Unique ID 2",
    "Location",
    "Trainer",
    "Class",
    "Day",
    "Time",
    "Date",
];

pub fn session_record(record: &SheetRecord) -> RecurringSessionRecord {
    RecurringSessionRecord {
        unique_id_1: record.text("Unique ID 1"),
        unique_id_2: record.text("Unique ID 2"),
        location: record.text_or_unknown("Location"),
        trainer: record.text_or_unknown("Trainer"),
        class_name: record.text_or_unknown("Class"),
        day: record.text("Day"),
        time: record.text("Time"),
        date: parse_sheet_date(&record.text("Date")),
        capacity: record.number("Capacity"),
        booked: record.number("Booked"),
        checked_in: record.number("Checked In"),
        late_cancelled: record.number("Late Cancelled"),
        revenue: record.number("Revenue"),
    }
}

pub fn parse_sessions(grid: &Grid) -> Vec<RecurringSessionRecord> {
    normalize_grid(grid, SESSION_TEXT_COLUMNS)
        .iter()
        .map(session_record)
        .collect()
}
