use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

/// Row-major string cells of one sheet tab.
pub type Grid = Vec<Vec<String>>;

#[derive(Debug, Clone, Serialize)]
pub struct SalesRecord {
    pub member_id: String,
    pub customer_name: String,
    pub customer_email: String,
    pub sale_item_id: String,
    pub payment_category: String,
    pub membership_type: String,
    pub payment_date: Option<NaiveDate>,
    pub payment_value: f64,
    pub paid_in_money_credits: f64,
    pub payment_vat: f64,
    pub payment_item: String,
    pub payment_status: String,
    pub payment_method: String,
    pub sold_by: String,
    pub location: String,
    pub product: String,
    pub category: String,
    pub mrp_pre_tax: f64,
    pub mrp_post_tax: f64,
    pub discount_amount: f64,
    pub discount_percentage: f64,
    pub net_revenue: f64,
}

impl SalesRecord {
    pub fn is_discounted(&self) -> bool {
        self.discount_amount > 0.0 || self.discount_percentage > 0.0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientConversionRecord {
    pub first_name: String,
    pub last_name: String,
    pub first_visit_date: Option<NaiveDate>,
    pub first_visit_location: String,
    pub first_visit_entity_name: String,
    pub is_new: String,
    pub trainer_name: String,
    pub membership_used: String,
    pub payment_method: String,
    pub conversion_status: String,
    pub retention_status: String,
    pub visits_post_trial: f64,
    pub conversion_span: f64,
    pub ltv: f64,
    pub class_no: f64,
    pub home_location: String,
    pub month_year: String,
}

impl ClientConversionRecord {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecurringSessionRecord {
    pub unique_id_1: String,
    pub unique_id_2: String,
    pub location: String,
    pub trainer: String,
    pub class_name: String,
    pub day: String,
    pub time: String,
    pub date: Option<NaiveDate>,
    pub capacity: f64,
    pub booked: f64,
    pub checked_in: f64,
    pub late_cancelled: f64,
    pub revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LateCancellationMonthlyRow {
    pub location: String,
    pub dimension: Option<String>,
    pub counts: BTreeMap<String, f64>,
}

impl LateCancellationMonthlyRow {
    pub fn count(&self, month: &str) -> f64 {
        self.counts.get(month).copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LateCancellationTable {
    /// Header of the grouping column next to location, if the table has one.
    pub dimension_header: Option<String>,
    /// Month columns in sheet order.
    pub months: Vec<String>,
    pub rows: Vec<LateCancellationMonthlyRow>,
}
