use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::aggregate::ratio;
use crate::models::ClientConversionRecord;

const HOSTED_KEYWORDS: &[&str] = &[
    "host",
    "birthday",
    "rugby",
    "outdoor",
    "p57",
    "sign",
    "link",
    "influencer",
];

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(needle)
}

pub fn is_new(client: &ClientConversionRecord) -> bool {
    contains_ci(&client.is_new, "new")
}

pub fn is_converted(client: &ClientConversionRecord) -> bool {
    contains_ci(&client.conversion_status, "converted")
}

pub fn is_retained(client: &ClientConversionRecord) -> bool {
    contains_ci(&client.retention_status, "retained")
}

pub fn is_hosted_class(entity: &str) -> bool {
    let entity = entity.to_lowercase();
    !entity.is_empty() && HOSTED_KEYWORDS.iter().any(|kw| entity.contains(kw))
}

pub fn engagement_score(client: &ClientConversionRecord) -> f64 {
    client.visits_post_trial / client.conversion_span.max(1.0) * 100.0
}

/// `YYYY-MM` bucket for a client: explicit month-year column first, then the
/// first visit date.
pub fn month_bucket(client: &ClientConversionRecord) -> String {
    if !client.month_year.is_empty() {
        return client.month_year.clone();
    }
    client
        .first_visit_date
        .map(|date| date.format("%Y-%m").to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}

fn average_nonzero(values: &[f64]) -> f64 {
    ratio(values.iter().sum(), values.len() as f64)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClientSummary {
    pub total_clients: usize,
    pub new_clients: usize,
    pub converted: usize,
    pub retained: usize,
    pub conversion_rate: f64,
    pub retention_rate: f64,
    pub avg_ltv: f64,
    pub avg_conversion_span: f64,
}

pub fn summarize_clients(clients: &[ClientConversionRecord]) -> ClientSummary {
    let total = clients.len();
    let converted = clients.iter().filter(|c| is_converted(c)).count();
    let retained = clients.iter().filter(|c| is_retained(c)).count();
    let spans: Vec<f64> = clients
        .iter()
        .map(|c| c.conversion_span)
        .filter(|span| *span > 0.0)
        .collect();

    ClientSummary {
        total_clients: total,
        new_clients: clients.iter().filter(|c| is_new(c)).count(),
        converted,
        retained,
        conversion_rate: ratio(converted as f64, total as f64) * 100.0,
        retention_rate: ratio(retained as f64, total as f64) * 100.0,
        avg_ltv: ratio(clients.iter().map(|c| c.ltv).sum(), total as f64),
        avg_conversion_span: average_nonzero(&spans),
    }
}

#[derive(Debug, Default)]
struct CohortAccumulator {
    total_clients: usize,
    converted: usize,
    retained: usize,
    total_ltv: f64,
    samples: Vec<f64>,
}

impl CohortAccumulator {
    fn add(&mut self, client: &ClientConversionRecord, sample: f64) {
        self.total_clients += 1;
        if is_converted(client) {
            self.converted += 1;
        }
        if is_retained(client) {
            self.retained += 1;
        }
        self.total_ltv += client.ltv;
        if sample > 0.0 {
            self.samples.push(sample);
        }
    }

    fn finish(self, name: String) -> CohortStats {
        let total = self.total_clients as f64;
        CohortStats {
            name,
            total_clients: self.total_clients,
            converted: self.converted,
            retained: self.retained,
            conversion_rate: ratio(self.converted as f64, total) * 100.0,
            retention_rate: ratio(self.retained as f64, total) * 100.0,
            avg_ltv: ratio(self.total_ltv, total),
            avg_sample: average_nonzero(&self.samples),
        }
    }
}

/// Conversion stats for one membership type or trainer. `avg_sample` is the
/// mean conversion span for memberships and the mean class number for
/// trainers, ignoring zeros.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CohortStats {
    pub name: String,
    pub total_clients: usize,
    pub converted: usize,
    pub retained: usize,
    pub conversion_rate: f64,
    pub retention_rate: f64,
    pub avg_ltv: f64,
    pub avg_sample: f64,
}

fn cohort_stats(
    clients: &[ClientConversionRecord],
    fallback: &str,
    key: impl Fn(&ClientConversionRecord) -> &str,
    sample: impl Fn(&ClientConversionRecord) -> f64,
) -> Vec<CohortStats> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, CohortAccumulator> = HashMap::new();

    for client in clients {
        let name = match key(client) {
            "" => fallback,
            other => other,
        };
        groups
            .entry(name.to_string())
            .or_insert_with(|| {
                order.push(name.to_string());
                CohortAccumulator::default()
            })
            .add(client, sample(client));
    }

    order
        .into_iter()
        .filter_map(|name| groups.remove(&name).map(|acc| acc.finish(name)))
        .collect()
}

pub fn membership_stats(clients: &[ClientConversionRecord]) -> Vec<CohortStats> {
    cohort_stats(
        clients,
        "No Membership",
        |c| c.membership_used.as_str(),
        |c| c.conversion_span,
    )
}

pub fn trainer_stats(clients: &[ClientConversionRecord]) -> Vec<CohortStats> {
    cohort_stats(
        clients,
        "No Trainer",
        |c| c.trainer_name.as_str(),
        |c| c.class_no,
    )
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HostedClassMonth {
    pub month: String,
    pub total: usize,
    pub new_clients: usize,
    pub converted: usize,
    pub retained: usize,
}

pub fn hosted_class_trend(clients: &[ClientConversionRecord]) -> Vec<HostedClassMonth> {
    let mut months: BTreeMap<String, HostedClassMonth> = BTreeMap::new();

    for client in clients
        .iter()
        .filter(|c| is_hosted_class(&c.first_visit_entity_name))
    {
        let month = month_bucket(client);
        let entry = months
            .entry(month.clone())
            .or_insert_with(|| HostedClassMonth {
                month,
                ..HostedClassMonth::default()
            });
        entry.total += 1;
        if is_new(client) {
            entry.new_clients += 1;
        }
        if is_converted(client) {
            entry.converted += 1;
        }
        if is_retained(client) {
            entry.retained += 1;
        }
    }

    months.into_values().collect()
}
