use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use clap::ValueEnum;
use serde::Serialize;

use crate::models::SalesRecord;
use crate::normalize::UNKNOWN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKey {
    Product,
    Category,
    Member,
    Seller,
    Location,
}

impl GroupKey {
    pub fn key<'a>(&self, record: &'a SalesRecord) -> &'a str {
        match self {
            GroupKey::Product => &record.product,
            GroupKey::Category => &record.category,
            GroupKey::Member => &record.customer_name,
            GroupKey::Seller => &record.sold_by,
            GroupKey::Location => &record.location,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            GroupKey::Product => "Products",
            GroupKey::Category => "Categories",
            GroupKey::Member => "Members",
            GroupKey::Seller => "Associates",
            GroupKey::Location => "Locations",
        }
    }
}

#[derive(Debug, Clone, Default)]
struct SalesAccumulator {
    total_value: f64,
    units_sold: usize,
    transactions: usize,
    members: HashSet<String>,
}

impl SalesAccumulator {
    fn add(&mut self, record: &SalesRecord) {
        self.total_value += record.payment_value;
        // every sheet row is a single sale item
        self.units_sold += 1;
        self.transactions += 1;
        self.members.insert(record.member_id.clone());
    }

    fn finish(self, name: String) -> SalesGroupSummary {
        let unique_members = self.members.len();
        SalesGroupSummary {
            name,
            total_value: self.total_value,
            units_sold: self.units_sold,
            transactions: self.transactions,
            unique_members,
            atv: ratio(self.total_value, self.transactions as f64),
            auv: ratio(self.total_value, self.units_sold as f64),
            asv: ratio(self.total_value, unique_members as f64),
            upt: ratio(self.units_sold as f64, self.transactions as f64),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SalesGroupSummary {
    pub name: String,
    pub total_value: f64,
    pub units_sold: usize,
    pub transactions: usize,
    pub unique_members: usize,
    pub atv: f64,
    pub auv: f64,
    pub asv: f64,
    pub upt: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SliceTotals {
    pub total_value: f64,
    pub units_sold: usize,
    pub transactions: usize,
    pub unique_members: usize,
}

pub fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

fn by_total_desc(a: &SalesGroupSummary, b: &SalesGroupSummary) -> Ordering {
    b.total_value
        .partial_cmp(&a.total_value)
        .unwrap_or(Ordering::Equal)
}

/// Groups sales by `key`. Output is sorted by total value descending; equal
/// totals keep first-seen order.
pub fn group_sales(records: &[SalesRecord], key: GroupKey) -> Vec<SalesGroupSummary> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, SalesAccumulator> = HashMap::new();

    for record in records {
        let name = key.key(record);
        let name = if name.is_empty() { UNKNOWN } else { name };
        let entry = groups.entry(name.to_string()).or_insert_with(|| {
            order.push(name.to_string());
            SalesAccumulator::default()
        });
        entry.add(record);
    }

    let mut summaries: Vec<SalesGroupSummary> = order
        .into_iter()
        .filter_map(|name| groups.remove(&name).map(|acc| acc.finish(name)))
        .collect();
    summaries.sort_by(by_total_desc);
    summaries
}

pub fn top_n(groups: &[SalesGroupSummary], n: usize) -> Vec<SalesGroupSummary> {
    let mut ranked = groups.to_vec();
    ranked.sort_by(by_total_desc);
    ranked.truncate(n);
    ranked
}

pub fn bottom_n(groups: &[SalesGroupSummary], n: usize) -> Vec<SalesGroupSummary> {
    let mut ranked = groups.to_vec();
    ranked.sort_by(|a, b| by_total_desc(b, a));
    ranked.truncate(n);
    ranked
}

pub fn slice_totals(groups: &[SalesGroupSummary]) -> SliceTotals {
    groups.iter().fold(SliceTotals::default(), |mut acc, group| {
        acc.total_value += group.total_value;
        acc.units_sold += group.units_sold;
        acc.transactions += group.transactions;
        acc.unique_members += group.unique_members;
        acc
    })
}

pub fn filter_by_location(records: &[SalesRecord], location: Option<&str>) -> Vec<SalesRecord> {
    records
        .iter()
        .filter(|record| location.map(|l| record.location == l).unwrap_or(true))
        .cloned()
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductDiscount {
    pub name: String,
    pub total_discount: f64,
    pub transactions: usize,
    pub revenue: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MonthlyDiscountTrend {
    pub month: String,
    pub revenue: f64,
    pub discounts: f64,
    pub transactions: usize,
    pub discounted_transactions: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationDiscount {
    pub location: String,
    pub revenue: f64,
    pub discounts: f64,
    pub transactions: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiscountAnalysis {
    pub total_transactions: usize,
    pub discounted_transactions: usize,
    pub total_revenue: f64,
    pub total_discounts: f64,
    pub avg_discount_percent: f64,
    pub discount_rate: f64,
    pub penetration_rate: f64,
    pub top_discounted_products: Vec<ProductDiscount>,
    pub monthly_trends: Vec<MonthlyDiscountTrend>,
    pub location_breakdown: Vec<LocationDiscount>,
}

pub fn analyze_discounts(records: &[SalesRecord]) -> DiscountAnalysis {
    if records.is_empty() {
        return DiscountAnalysis::default();
    }

    let discounted: Vec<&SalesRecord> = records
        .iter()
        .filter(|record| record.discount_amount > 0.0)
        .collect();
    let total_revenue: f64 = records.iter().map(|r| r.payment_value).sum();
    let total_discounts: f64 = records.iter().map(|r| r.discount_amount).sum();
    let avg_discount_percent = ratio(
        discounted.iter().map(|r| r.discount_percentage).sum(),
        discounted.len() as f64,
    );

    let mut product_order: Vec<String> = Vec::new();
    let mut products: HashMap<String, ProductDiscount> = HashMap::new();
    let mut months: BTreeMap<String, MonthlyDiscountTrend> = BTreeMap::new();
    let mut location_order: Vec<String> = Vec::new();
    let mut locations: HashMap<String, LocationDiscount> = HashMap::new();

    for record in records {
        let product = products.entry(record.product.clone()).or_insert_with(|| {
            product_order.push(record.product.clone());
            ProductDiscount {
                name: record.product.clone(),
                total_discount: 0.0,
                transactions: 0,
                revenue: 0.0,
            }
        });
        product.total_discount += record.discount_amount;
        product.transactions += 1;
        product.revenue += record.payment_value;

        if let Some(date) = record.payment_date {
            let month = date.format("%Y-%m").to_string();
            let trend = months
                .entry(month.clone())
                .or_insert_with(|| MonthlyDiscountTrend {
                    month,
                    ..MonthlyDiscountTrend::default()
                });
            trend.revenue += record.payment_value;
            trend.discounts += record.discount_amount;
            trend.transactions += 1;
            if record.discount_amount > 0.0 {
                trend.discounted_transactions += 1;
            }
        }

        let location = locations.entry(record.location.clone()).or_insert_with(|| {
            location_order.push(record.location.clone());
            LocationDiscount {
                location: record.location.clone(),
                revenue: 0.0,
                discounts: 0.0,
                transactions: 0,
            }
        });
        location.revenue += record.payment_value;
        location.discounts += record.discount_amount;
        location.transactions += 1;
    }

    let mut top_discounted_products: Vec<ProductDiscount> = product_order
        .iter()
        .filter_map(|name| products.remove(name))
        .collect();
    top_discounted_products.sort_by(|a, b| {
        b.total_discount
            .partial_cmp(&a.total_discount)
            .unwrap_or(Ordering::Equal)
    });
    top_discounted_products.truncate(10);

    DiscountAnalysis {
        total_transactions: records.len(),
        discounted_transactions: discounted.len(),
        total_revenue,
        total_discounts,
        avg_discount_percent,
        discount_rate: ratio(total_discounts, total_revenue) * 100.0,
        penetration_rate: ratio(discounted.len() as f64, records.len() as f64) * 100.0,
        top_discounted_products,
        monthly_trends: months.into_values().collect(),
        location_breakdown: location_order
            .iter()
            .filter_map(|name| locations.remove(name))
            .collect(),
    }
}

pub const DISCOUNT_VIEW_LIMIT: usize = 2000;

/// Discounted sales, newest first. Falls back to every sale when nothing in
/// the set carries a discount.
pub fn discount_view(records: &[SalesRecord], limit: usize) -> Vec<SalesRecord> {
    let discounted: Vec<SalesRecord> = records
        .iter()
        .filter(|record| record.is_discounted())
        .cloned()
        .collect();
    let mut view = if discounted.is_empty() {
        records.to_vec()
    } else {
        discounted
    };

    // None sorts before Some, so undated rows land last when reversed.
    view.sort_by(|a, b| b.payment_date.cmp(&a.payment_date));
    view.truncate(limit);
    view
}
