use std::collections::BTreeMap;

use chrono::NaiveDate;
use clap::ValueEnum;
use serde::Serialize;
use tracing::debug;

use crate::models::{Grid, LateCancellationMonthlyRow, LateCancellationTable};
use crate::normalize::coerce_number;
use crate::sections::{is_grand_total, split_sections};

pub const BY_CLASS: &str = "Late Cancellations by Class";
pub const BY_TRAINER: &str = "Late Cancellations by Trainer";
pub const BY_PRODUCT: &str = "Late Cancellations by Product";
pub const BY_MEMBER: &str = "Members with >1 Late Cancellation Per Day";
/// Only used to close the by-member block.
pub const MULTI_CHECK_IN: &str = "Members with >1 Check-in Per Day";

#[derive(Debug, Clone, Default, Serialize)]
pub struct LateCancellationReport {
    pub by_location: LateCancellationTable,
    pub by_class: LateCancellationTable,
    pub by_trainer: LateCancellationTable,
    pub by_product: LateCancellationTable,
    pub by_member: LateCancellationTable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize)]
pub enum Timeframe {
    #[default]
    All,
    #[value(name = "3m")]
    LastThreeMonths,
    #[value(name = "6m")]
    LastSixMonths,
    #[value(name = "12m")]
    LastTwelveMonths,
}

impl Timeframe {
    fn month_count(self) -> Option<usize> {
        match self {
            Timeframe::All => None,
            Timeframe::LastThreeMonths => Some(3),
            Timeframe::LastSixMonths => Some(6),
            Timeframe::LastTwelveMonths => Some(12),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LateCancellationMetrics {
    pub current_month: Option<String>,
    pub previous_month: Option<String>,
    pub current_total: f64,
    pub previous_total: f64,
    pub percentage_change: f64,
    pub most_affected_location: Option<String>,
    pub most_affected_count: f64,
    pub active_classes: usize,
    pub problematic_members: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthTotal {
    pub month: String,
    pub cancellations: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassCancellations {
    pub class_name: String,
    pub cancellations: f64,
}

/// Parses `Jan-2024` style headers.
pub fn parse_month_label(label: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(&format!("01-{}", label.trim()), "%d-%b-%Y").ok()
}

fn parse_table(rows: &[Vec<String>], key_columns: usize) -> LateCancellationTable {
    let Some((header, data)) = rows.split_first() else {
        return LateCancellationTable::default();
    };

    let dimension_header = (key_columns > 1)
        .then(|| header.get(1).map(|h| h.trim().to_string()))
        .flatten();
    // Month columns by position. Totals and other non-month headers drop out.
    let mut month_columns: Vec<(usize, NaiveDate, String)> = header
        .iter()
        .enumerate()
        .skip(key_columns)
        .filter_map(|(idx, h)| {
            let label = h.trim();
            parse_month_label(label).map(|date| (idx, date, label.to_string()))
        })
        .collect();
    month_columns.sort_by_key(|(_, date, _)| *date);
    let months: Vec<String> = month_columns
        .iter()
        .map(|(_, _, label)| label.clone())
        .collect();

    let rows = data
        .iter()
        .filter(|row| {
            row.first()
                .map(|cell| !cell.trim().is_empty())
                .unwrap_or(false)
                && !is_grand_total(row)
        })
        .map(|row| {
            let cell = |idx: usize| row.get(idx).map(|c| c.trim()).unwrap_or("");
            let counts: BTreeMap<String, f64> = month_columns
                .iter()
                .map(|(idx, _, label)| (label.clone(), coerce_number(cell(*idx))))
                .collect();
            LateCancellationMonthlyRow {
                location: cell(0).to_string(),
                dimension: (key_columns > 1).then(|| cell(1).to_string()),
                counts,
            }
        })
        .collect();

    LateCancellationTable {
        dimension_header,
        months,
        rows,
    }
}

/// Splits the Late Cancellations tab into its five tables. The by-location
/// table has no label row and sits at the top of the sheet.
pub fn parse_late_cancellations(grid: &Grid) -> LateCancellationReport {
    let sections = split_sections(
        grid,
        &[BY_CLASS, BY_TRAINER, BY_PRODUCT, BY_MEMBER, MULTI_CHECK_IN],
    );

    let report = LateCancellationReport {
        by_location: parse_table(&sections.preamble, 1),
        by_class: parse_table(sections.get(BY_CLASS), 2),
        by_trainer: parse_table(sections.get(BY_TRAINER), 2),
        by_product: parse_table(sections.get(BY_PRODUCT), 2),
        by_member: parse_table(sections.get(BY_MEMBER), 2),
    };

    debug!(
        locations = report.by_location.rows.len(),
        classes = report.by_class.rows.len(),
        trainers = report.by_trainer.rows.len(),
        products = report.by_product.rows.len(),
        members = report.by_member.rows.len(),
        "parsed late cancellation tables"
    );
    report
}

impl LateCancellationTable {
    fn retain_location(&self, location: &str) -> LateCancellationTable {
        LateCancellationTable {
            dimension_header: self.dimension_header.clone(),
            months: self.months.clone(),
            rows: self
                .rows
                .iter()
                .filter(|row| row.location == location)
                .cloned()
                .collect(),
        }
    }

    fn trailing_months(&self, count: usize) -> LateCancellationTable {
        let skip = self.months.len().saturating_sub(count);
        let months: Vec<String> = self.months[skip..].to_vec();
        let rows = self
            .rows
            .iter()
            .map(|row| LateCancellationMonthlyRow {
                location: row.location.clone(),
                dimension: row.dimension.clone(),
                counts: row
                    .counts
                    .iter()
                    .filter(|(month, _)| months.contains(month))
                    .map(|(month, count)| (month.clone(), *count))
                    .collect(),
            })
            .collect();
        LateCancellationTable {
            dimension_header: self.dimension_header.clone(),
            months,
            rows,
        }
    }

    pub fn total_for(&self, month: &str) -> f64 {
        self.rows.iter().map(|row| row.count(month)).sum()
    }
}

impl LateCancellationReport {
    fn map_tables(&self, f: impl Fn(&LateCancellationTable) -> LateCancellationTable) -> Self {
        LateCancellationReport {
            by_location: f(&self.by_location),
            by_class: f(&self.by_class),
            by_trainer: f(&self.by_trainer),
            by_product: f(&self.by_product),
            by_member: f(&self.by_member),
        }
    }

    /// Keeps rows for one location across every table. `None` keeps all.
    pub fn filter_location(&self, location: Option<&str>) -> Self {
        match location {
            Some(location) => self.map_tables(|table| table.retain_location(location)),
            None => self.clone(),
        }
    }

    pub fn apply_timeframe(&self, timeframe: Timeframe) -> Self {
        match timeframe.month_count() {
            Some(count) => self.map_tables(|table| table.trailing_months(count)),
            None => self.clone(),
        }
    }

    pub fn locations(&self) -> Vec<String> {
        let mut seen: Vec<String> = Vec::new();
        for row in &self.by_location.rows {
            if !row.location.is_empty() && !seen.contains(&row.location) {
                seen.push(row.location.clone());
            }
        }
        seen
    }

    /// Latest month column of the by-location table.
    pub fn current_month(&self) -> Option<&str> {
        self.by_location.months.last().map(String::as_str)
    }

    pub fn previous_month(&self) -> Option<&str> {
        let months = &self.by_location.months;
        months.len().checked_sub(2).map(|idx| months[idx].as_str())
    }

    pub fn metrics(&self) -> LateCancellationMetrics {
        let Some(current) = self.current_month() else {
            return LateCancellationMetrics::default();
        };
        let previous = self.previous_month();

        let current_total = self.by_location.total_for(current);
        let previous_total = previous
            .map(|month| self.by_location.total_for(month))
            .unwrap_or(0.0);
        let percentage_change = if previous_total > 0.0 {
            (current_total - previous_total) / previous_total * 100.0
        } else {
            0.0
        };

        let mut most_affected: Option<&LateCancellationMonthlyRow> = None;
        for row in &self.by_location.rows {
            let best = most_affected.map(|r| r.count(current)).unwrap_or(0.0);
            if row.count(current) > best {
                most_affected = Some(row);
            }
        }

        LateCancellationMetrics {
            current_month: Some(current.to_string()),
            previous_month: previous.map(str::to_string),
            current_total,
            previous_total,
            percentage_change,
            most_affected_location: most_affected.map(|row| row.location.clone()),
            most_affected_count: most_affected.map(|row| row.count(current)).unwrap_or(0.0),
            active_classes: self
                .by_class
                .rows
                .iter()
                .filter(|row| row.count(current) > 0.0)
                .count(),
            problematic_members: self.by_member.total_for(current),
        }
    }

    pub fn monthly_trend(&self, location: Option<&str>) -> Vec<MonthTotal> {
        self.by_location
            .months
            .iter()
            .cloned()
            .map(|month| {
                let cancellations = match location {
                    Some(location) => self
                        .by_location
                        .rows
                        .iter()
                        .find(|row| row.location == location)
                        .map(|row| row.count(&month))
                        .unwrap_or(0.0),
                    None => self.by_location.total_for(&month),
                };
                MonthTotal {
                    month,
                    cancellations,
                }
            })
            .collect()
    }

    pub fn top_classes(&self, location: Option<&str>, limit: usize) -> Vec<ClassCancellations> {
        let Some(current) = self.current_month() else {
            return Vec::new();
        };

        let mut classes: Vec<ClassCancellations> = self
            .by_class
            .rows
            .iter()
            .filter(|row| location.map(|l| row.location == l).unwrap_or(true))
            .map(|row| ClassCancellations {
                class_name: row
                    .dimension
                    .clone()
                    .filter(|name| !name.is_empty())
                    .unwrap_or_else(|| "Unknown".to_string()),
                cancellations: row.count(current),
            })
            .filter(|item| item.cancellations > 0.0)
            .collect();

        classes.sort_by(|a, b| {
            b.cancellations
                .partial_cmp(&a.cancellations)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        classes.truncate(limit);
        classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    fn sample_grid() -> Grid {
        vec![
            row(&["Location", "Jul-2025", "Aug-2025"]),
            row(&["Kwality House, Kemps Corner", "10", "14"]),
            row(&["Supreme HQ, Bandra", "6", "4"]),
            row(&["Grand Total", "16", "18"]),
            row(&[]),
            row(&["Late Cancellations by Class"]),
            row(&["Location", "Cleaned Class", "Jul-2025", "Aug-2025"]),
            row(&["Kwality House, Kemps Corner", "Barre 57", "4", "9"]),
            row(&["Kwality House, Kemps Corner", "powerCycle", "6", "0"]),
            row(&["Supreme HQ, Bandra", "Mat 57", "6", "4"]),
            row(&["Grand Total", "", "16", "13"]),
            row(&[]),
            row(&["Late Cancellations by Trainer"]),
            row(&["Location", "Trainer Name", "Jul-2025", "Aug-2025"]),
            row(&["Supreme HQ, Bandra", "Anisha Shah", "6", "4"]),
            row(&[]),
            row(&["Late Cancellations by Product"]),
            row(&["Location", "Cleaned Product", "Jul-2025", "Aug-2025"]),
            row(&["Supreme HQ, Bandra", "8 Class Pack", "1", "2"]),
            row(&[]),
            row(&["Members with >1 Late Cancellation Per Day"]),
            row(&["Location", "Cleaned Product", "Jul-2025", "Aug-2025"]),
            row(&["Kwality House, Kemps Corner", "Unlimited", "1", "3"]),
            row(&[]),
            row(&["Members with >1 Check-in Per Day"]),
            row(&["Location", "Cleaned Product", "Jul-2025", "Aug-2025"]),
            row(&["Kwality House, Kemps Corner", "Unlimited", "7", "7"]),
        ]
    }

    #[test]
    fn parses_location_row_into_month_counts() {
        let grid = vec![
            row(&["Location", "Jan-2024", "Feb-2024"]),
            row(&["Kwality House", "3", "5"]),
        ];
        let report = parse_late_cancellations(&grid);

        assert_eq!(report.by_location.months, vec!["Jan-2024", "Feb-2024"]);
        let parsed = &report.by_location.rows[0];
        assert_eq!(parsed.location, "Kwality House");
        assert_eq!(parsed.dimension, None);
        assert_eq!(parsed.count("Jan-2024"), 3.0);
        assert_eq!(parsed.count("Feb-2024"), 5.0);
        assert!(report.by_class.rows.is_empty());
    }

    #[test]
    fn splits_every_table() {
        let report = parse_late_cancellations(&sample_grid());

        assert_eq!(report.by_location.rows.len(), 2);
        assert_eq!(report.by_class.rows.len(), 3);
        assert_eq!(
            report.by_class.dimension_header.as_deref(),
            Some("Cleaned Class")
        );
        assert_eq!(report.by_trainer.rows.len(), 1);
        assert_eq!(report.by_product.rows.len(), 1);
        assert_eq!(report.by_member.rows.len(), 1);
        assert_eq!(
            report.by_member.rows[0].dimension.as_deref(),
            Some("Unlimited")
        );
    }

    #[test]
    fn metrics_use_latest_month_columns() {
        let report = parse_late_cancellations(&sample_grid());
        let metrics = report.metrics();

        assert_eq!(metrics.current_month.as_deref(), Some("Aug-2025"));
        assert_eq!(metrics.previous_month.as_deref(), Some("Jul-2025"));
        assert_eq!(metrics.current_total, 18.0);
        assert_eq!(metrics.previous_total, 16.0);
        assert!((metrics.percentage_change - 12.5).abs() < 1e-9);
        assert_eq!(
            metrics.most_affected_location.as_deref(),
            Some("Kwality House, Kemps Corner")
        );
        assert_eq!(metrics.most_affected_count, 14.0);
        assert_eq!(metrics.active_classes, 2);
        assert_eq!(metrics.problematic_members, 3.0);
    }

    #[test]
    fn empty_sheet_has_zero_metrics() {
        let report = parse_late_cancellations(&Vec::new());
        assert_eq!(report.metrics(), LateCancellationMetrics::default());
        assert!(report.top_classes(None, 10).is_empty());
    }

    #[test]
    fn location_filter_applies_to_all_tables() {
        let report = parse_late_cancellations(&sample_grid());
        let filtered = report.filter_location(Some("Supreme HQ, Bandra"));

        assert_eq!(filtered.by_location.rows.len(), 1);
        assert_eq!(filtered.by_class.rows.len(), 1);
        assert!(filtered.by_member.rows.is_empty());
        assert_eq!(
            report.locations(),
            vec!["Kwality House, Kemps Corner", "Supreme HQ, Bandra"]
        );
    }

    #[test]
    fn trend_and_top_classes() {
        let report = parse_late_cancellations(&sample_grid());

        let trend = report.monthly_trend(None);
        assert_eq!(trend.len(), 2);
        assert_eq!(trend[0].month, "Jul-2025");
        assert_eq!(trend[1].cancellations, 18.0);

        let single = report.monthly_trend(Some("Supreme HQ, Bandra"));
        assert_eq!(single[0].cancellations, 6.0);

        let top = report.top_classes(None, 10);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].class_name, "Barre 57");
        assert_eq!(top[1].class_name, "Mat 57");
    }

    #[test]
    fn timeframe_keeps_trailing_months() {
        let grid = vec![
            row(&["Location", "Jan-2025", "Feb-2025", "Mar-2025", "Apr-2025"]),
            row(&["Kenkere House", "1", "2", "3", "4"]),
        ];
        let report = parse_late_cancellations(&grid).apply_timeframe(Timeframe::LastThreeMonths);

        assert_eq!(
            report.by_location.months,
            vec!["Feb-2025", "Mar-2025", "Apr-2025"]
        );
        assert_eq!(report.by_location.rows[0].counts.len(), 3);
        assert_eq!(report.by_location.rows[0].count("Jan-2025"), 0.0);
    }

    #[test]
    fn month_labels_parse() {
        assert_eq!(
            parse_month_label("Aug-2025"),
            NaiveDate::from_ymd_opt(2025, 8, 1)
        );
        assert_eq!(parse_month_label("Total"), None);
    }

    #[test]
    fn grand_total_column_is_not_a_month() {
        let grid = vec![
            row(&["Location", "Jun-2025", "Jul-2025", "Aug-2025", "Grand Total"]),
            row(&["Kenkere House", "5", "8", "11", "24"]),
            row(&["Supreme HQ, Bandra", "3", "4", "2", "9"]),
        ];
        let report = parse_late_cancellations(&grid);

        assert_eq!(
            report.by_location.months,
            vec!["Jun-2025", "Jul-2025", "Aug-2025"]
        );
        let metrics = report.metrics();
        assert_eq!(metrics.current_month.as_deref(), Some("Aug-2025"));
        assert_eq!(metrics.previous_month.as_deref(), Some("Jul-2025"));
        assert_eq!(metrics.current_total, 13.0);
        assert_eq!(metrics.previous_total, 12.0);

        let recent = report.apply_timeframe(Timeframe::LastThreeMonths);
        assert_eq!(
            recent.by_location.months,
            vec!["Jun-2025", "Jul-2025", "Aug-2025"]
        );
        let trend = report.monthly_trend(None);
        assert_eq!(trend.len(), 3);
        assert_eq!(trend[2].month, "Aug-2025");
    }

    #[test]
    fn descending_headers_are_read_chronologically() {
        let grid = vec![
            row(&["Location", "Aug-2025", "Jul-2025", "Jun-2025", "May-2025"]),
            row(&["Kenkere House", "8", "7", "6", "5"]),
        ];
        let report = parse_late_cancellations(&grid);

        let metrics = report.metrics();
        assert_eq!(metrics.current_month.as_deref(), Some("Aug-2025"));
        assert_eq!(metrics.previous_month.as_deref(), Some("Jul-2025"));
        assert_eq!(metrics.current_total, 8.0);
        assert_eq!(report.by_location.rows[0].count("May-2025"), 5.0);

        let recent = report.apply_timeframe(Timeframe::LastThreeMonths);
        assert_eq!(
            recent.by_location.months,
            vec!["Jun-2025", "Jul-2025", "Aug-2025"]
        );
        let trend = report.monthly_trend(None);
        assert_eq!(trend.last().map(|t| t.month.as_str()), Some("Aug-2025"));
    }

    #[test]
    fn zero_previous_month_gives_zero_change() {
        let grid = vec![
            row(&["Location", "Jul-2025", "Aug-2025"]),
            row(&["Kenkere House", "0", "7"]),
            row(&["Supreme HQ, Bandra", "", "3"]),
        ];
        let metrics = parse_late_cancellations(&grid).metrics();

        assert_eq!(metrics.previous_month.as_deref(), Some("Jul-2025"));
        assert_eq!(metrics.current_total, 10.0);
        assert_eq!(metrics.previous_total, 0.0);
        assert_eq!(metrics.percentage_change, 0.0);
    }

    #[test]
    fn single_month_has_no_previous() {
        let grid = vec![
            row(&["Location", "Aug-2025"]),
            row(&["Kenkere House", "7"]),
        ];
        let metrics = parse_late_cancellations(&grid).metrics();

        assert_eq!(metrics.current_month.as_deref(), Some("Aug-2025"));
        assert_eq!(metrics.previous_month, None);
        assert_eq!(metrics.previous_total, 0.0);
        assert_eq!(metrics.percentage_change, 0.0);
    }
}
