use std::fmt::Write;

use crate::aggregate::{self, DiscountAnalysis, GroupKey, SalesGroupSummary};
use crate::attendance::{self, SessionSummary};
use crate::conversion::{self, CohortStats};
use crate::late_cancellations::LateCancellationReport;
use crate::models::{
    ClientConversionRecord, LateCancellationTable, RecurringSessionRecord, SalesRecord,
};

fn group_digits(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

pub fn format_number(value: f64) -> String {
    let rounded = value.round();
    let digits = group_digits(&format!("{}", rounded.abs() as u64));
    if rounded < 0.0 {
        format!("-{digits}")
    } else {
        digits
    }
}

pub fn format_currency(value: f64) -> String {
    let number = format_number(value);
    match number.strip_prefix('-') {
        Some(abs) => format!("-₹{abs}"),
        None => format!("₹{number}"),
    }
}

pub fn format_percent(value: f64) -> String {
    format!("{value:.1}%")
}

fn seller_table(output: &mut String, title: &str, groups: &[SalesGroupSummary]) {
    let _ = writeln!(output, "### {title}");
    if groups.is_empty() {
        let _ = writeln!(output, "No sales recorded for this selection.");
        let _ = writeln!(output);
        return;
    }

    let _ = writeln!(
        output,
        "| # | Name | Txns | Units | Customers | ATV | AUV | ASV | UPT | Revenue |"
    );
    let _ = writeln!(output, "|---|---|---|---|---|---|---|---|---|---|");
    for (idx, group) in groups.iter().enumerate() {
        let _ = writeln!(
            output,
            "| {} | {} | {} | {} | {} | {} | {} | {} | {:.2} | {} |",
            idx + 1,
            group.name,
            group.transactions,
            group.units_sold,
            group.unique_members,
            format_currency(group.atv),
            format_currency(group.auv),
            format_currency(group.asv),
            group.upt,
            format_currency(group.total_value)
        );
    }
    let totals = aggregate::slice_totals(groups);
    let _ = writeln!(
        output,
        "| | **Total** | {} | {} | {} | | | | | {} |",
        totals.transactions,
        totals.units_sold,
        totals.unique_members,
        format_currency(totals.total_value)
    );
    let _ = writeln!(output);
}

pub fn sellers_section(records: &[SalesRecord], key: GroupKey, limit: usize) -> String {
    let groups = aggregate::group_sales(records, key);
    let mut output = String::new();

    let _ = writeln!(output, "## Top & Bottom {}", key.label());
    seller_table(
        &mut output,
        &format!("Top {limit} {}", key.label()),
        &aggregate::top_n(&groups, limit),
    );
    seller_table(
        &mut output,
        &format!("Bottom {limit} {}", key.label()),
        &aggregate::bottom_n(&groups, limit),
    );
    output
}

pub fn discounts_section(analysis: &DiscountAnalysis, recent: &[SalesRecord]) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "## Discounts");

    if analysis.total_transactions == 0 {
        let _ = writeln!(output, "No sales recorded for this selection.");
        return output;
    }

    let _ = writeln!(output, "- Total revenue: {}", format_currency(analysis.total_revenue));
    let _ = writeln!(output, "- Total discounts: {}", format_currency(analysis.total_discounts));
    let _ = writeln!(output, "- Discount rate: {}", format_percent(analysis.discount_rate));
    let _ = writeln!(
        output,
        "- Discounted sales: {} / {}",
        format_number(analysis.discounted_transactions as f64),
        format_number(analysis.total_transactions as f64)
    );
    let _ = writeln!(
        output,
        "- Avg discount: {}",
        format_percent(analysis.avg_discount_percent)
    );
    let _ = writeln!(
        output,
        "- Penetration rate: {}",
        format_percent(analysis.penetration_rate)
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "### Top Discounted Products");
    for product in &analysis.top_discounted_products {
        let _ = writeln!(
            output,
            "- {}: {} off across {} sales ({} revenue)",
            product.name,
            format_currency(product.total_discount),
            product.transactions,
            format_currency(product.revenue)
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "### Monthly Trend");
    if analysis.monthly_trends.is_empty() {
        let _ = writeln!(output, "No dated sales.");
    }
    for month in &analysis.monthly_trends {
        let _ = writeln!(
            output,
            "- {}: {} revenue, {} discounts, {} of {} sales discounted",
            month.month,
            format_currency(month.revenue),
            format_currency(month.discounts),
            month.discounted_transactions,
            month.transactions
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "### By Location");
    for location in &analysis.location_breakdown {
        let _ = writeln!(
            output,
            "- {}: {} revenue, {} discounts over {} sales",
            location.location,
            format_currency(location.revenue),
            format_currency(location.discounts),
            location.transactions
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "### Recent Discounted Sales");
    let _ = writeln!(output, "| Date | Location | Product | Discount % | Discount | Revenue |");
    let _ = writeln!(output, "|---|---|---|---|---|---|");
    for sale in recent {
        let _ = writeln!(
            output,
            "| {} | {} | {} | {} | {} | {} |",
            sale.payment_date
                .map(|d| d.to_string())
                .unwrap_or_else(|| "-".to_string()),
            sale.location,
            sale.product,
            format_percent(sale.discount_percentage),
            format_currency(sale.discount_amount),
            format_currency(sale.payment_value)
        );
    }
    output
}

fn cohort_table(output: &mut String, title: &str, sample_header: &str, stats: &[CohortStats]) {
    let _ = writeln!(output, "### {title}");
    let _ = writeln!(
        output,
        "| Name | Clients | Converted | Conv. Rate | Retained | Ret. Rate | Avg LTV | {sample_header} |"
    );
    let _ = writeln!(output, "|---|---|---|---|---|---|---|---|");
    for stat in stats {
        let _ = writeln!(
            output,
            "| {} | {} | {} | {} | {} | {} | {} | {:.1} |",
            stat.name,
            stat.total_clients,
            stat.converted,
            format_percent(stat.conversion_rate),
            stat.retained,
            format_percent(stat.retention_rate),
            format_currency(stat.avg_ltv),
            stat.avg_sample
        );
    }
    let _ = writeln!(output);
}

/// `clients` is the full set for the metrics; `table` is the searched and
/// sorted slice to list.
pub fn conversion_section(
    clients: &[ClientConversionRecord],
    table: &[ClientConversionRecord],
) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "## Client Conversion");

    if clients.is_empty() {
        let _ = writeln!(output, "No clients recorded for this selection.");
        return output;
    }

    let summary = conversion::summarize_clients(clients);
    let _ = writeln!(output, "- Total clients: {}", format_number(summary.total_clients as f64));
    let _ = writeln!(output, "- New clients: {}", format_number(summary.new_clients as f64));
    let _ = writeln!(
        output,
        "- Converted: {} ({})",
        format_number(summary.converted as f64),
        format_percent(summary.conversion_rate)
    );
    let _ = writeln!(
        output,
        "- Retained: {} ({})",
        format_number(summary.retained as f64),
        format_percent(summary.retention_rate)
    );
    let _ = writeln!(output, "- Avg LTV: {}", format_currency(summary.avg_ltv));
    let _ = writeln!(
        output,
        "- Avg conversion span: {:.1} days",
        summary.avg_conversion_span
    );
    let _ = writeln!(output);

    cohort_table(
        &mut output,
        "Membership Performance",
        "Avg Conv. Days",
        &conversion::membership_stats(clients),
    );
    cohort_table(
        &mut output,
        "Trainer Performance",
        "Avg Class No",
        &conversion::trainer_stats(clients),
    );

    let hosted = conversion::hosted_class_trend(clients);
    let _ = writeln!(output, "### Hosted Classes by Month");
    if hosted.is_empty() {
        let _ = writeln!(output, "No hosted class visits.");
    }
    for month in &hosted {
        let _ = writeln!(
            output,
            "- {}: {} clients, {} new, {} converted, {} retained",
            month.month, month.total, month.new_clients, month.converted, month.retained
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "### Clients");
    if table.is_empty() {
        let _ = writeln!(output, "No clients match this search.");
        return output;
    }
    let _ = writeln!(
        output,
        "| Client | First Visit | Location | Trainer | Membership | Conversion | Retention | LTV | Engagement |"
    );
    let _ = writeln!(output, "|---|---|---|---|---|---|---|---|---|");
    for client in table {
        let name = client.full_name();
        let _ = writeln!(
            output,
            "| {} | {} | {} | {} | {} | {} | {} | {} | {} |",
            if name.is_empty() { "Unknown Client" } else { name.as_str() },
            client
                .first_visit_date
                .map(|d| d.to_string())
                .unwrap_or_else(|| "-".to_string()),
            client.first_visit_location,
            client.trainer_name,
            client.membership_used,
            client.conversion_status,
            client.retention_status,
            format_currency(client.ltv),
            format_percent(conversion::engagement_score(client))
        );
    }
    output
}

pub fn attendance_section(sessions: &[RecurringSessionRecord], limit: usize) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "## Class Attendance");

    if sessions.is_empty() {
        let _ = writeln!(output, "No sessions match these filters.");
        return output;
    }

    let SessionSummary {
        sessions: count,
        capacity,
        checked_in,
        booked,
        late_cancelled,
        revenue,
        avg_attendance,
        fill_rate,
    } = attendance::summarize_sessions(sessions);
    let _ = writeln!(output, "- Sessions: {}", format_number(count as f64));
    let _ = writeln!(
        output,
        "- Check-ins: {} of {} capacity ({} fill)",
        format_number(checked_in),
        format_number(capacity),
        format_percent(fill_rate)
    );
    let _ = writeln!(output, "- Booked: {}", format_number(booked));
    let _ = writeln!(output, "- Late cancellations: {}", format_number(late_cancelled));
    let _ = writeln!(output, "- Avg attendance: {avg_attendance:.1}");
    let _ = writeln!(output, "- Revenue: {}", format_currency(revenue));

    let classes = attendance::class_performance(sessions);
    let _ = writeln!(output);
    let _ = writeln!(output, "### Best Attended Classes");
    for class in classes.iter().take(limit) {
        let _ = writeln!(
            output,
            "- {}: {:.1} avg across {} sessions ({} fill)",
            class.class_name,
            class.avg_attendance,
            class.sessions,
            format_percent(class.fill_rate)
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "### Least Attended Classes");
    for class in classes.iter().rev().take(limit) {
        let _ = writeln!(
            output,
            "- {}: {:.1} avg across {} sessions ({} fill)",
            class.class_name,
            class.avg_attendance,
            class.sessions,
            format_percent(class.fill_rate)
        );
    }
    output
}

fn monthly_table(output: &mut String, title: &str, table: &LateCancellationTable) {
    let _ = writeln!(output, "### {title}");
    if table.rows.is_empty() {
        let _ = writeln!(output, "No rows.");
        let _ = writeln!(output);
        return;
    }

    let mut header = vec!["Location".to_string()];
    if let Some(dimension) = &table.dimension_header {
        header.push(dimension.clone());
    }
    header.extend(table.months.iter().cloned());
    let _ = writeln!(output, "| {} |", header.join(" | "));
    let _ = writeln!(output, "|{}", "---|".repeat(header.len()));

    for row in &table.rows {
        let mut cells = vec![row.location.clone()];
        if table.dimension_header.is_some() {
            cells.push(row.dimension.clone().unwrap_or_default());
        }
        cells.extend(table.months.iter().map(|m| format_number(row.count(m))));
        let _ = writeln!(output, "| {} |", cells.join(" | "));
    }
    let _ = writeln!(output);
}

pub fn late_cancellations_section(
    report: &LateCancellationReport,
    location: Option<&str>,
) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "## Late Cancellations");

    let metrics = report.metrics();
    let Some(current) = metrics.current_month.as_deref() else {
        let _ = writeln!(output, "No late cancellation data.");
        return output;
    };

    let _ = writeln!(
        output,
        "- Total late cancellations ({current}): {}",
        format_number(metrics.current_total)
    );
    let direction = if metrics.percentage_change >= 0.0 { "up" } else { "down" };
    let _ = writeln!(
        output,
        "- {} {} from {}",
        direction,
        format_percent(metrics.percentage_change.abs()),
        metrics.previous_month.as_deref().unwrap_or("previous month")
    );
    let _ = writeln!(
        output,
        "- Most affected location: {} ({})",
        metrics.most_affected_location.as_deref().unwrap_or("N/A"),
        format_number(metrics.most_affected_count)
    );
    let _ = writeln!(output, "- Classes with cancellations: {}", metrics.active_classes);
    let _ = writeln!(
        output,
        "- Members with >1 cancellation/day: {}",
        format_number(metrics.problematic_members)
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "### Monthly Trend");
    for point in report.monthly_trend(location) {
        let _ = writeln!(output, "- {}: {}", point.month, format_number(point.cancellations));
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "### Top Classes ({current})");
    let top = report.top_classes(location, 10);
    if top.is_empty() {
        let _ = writeln!(output, "No class cancellations this month.");
    }
    for class in top {
        let _ = writeln!(output, "- {}: {}", class.class_name, format_number(class.cancellations));
    }
    let _ = writeln!(output);

    monthly_table(&mut output, "By Location", &report.by_location);
    monthly_table(&mut output, "By Class", &report.by_class);
    monthly_table(&mut output, "By Trainer", &report.by_trainer);
    monthly_table(&mut output, "By Product", &report.by_product);
    monthly_table(&mut output, "Members >1/Day", &report.by_member);
    output
}

pub struct DashboardInputs<'a> {
    pub sales: &'a [SalesRecord],
    pub clients: &'a [ClientConversionRecord],
    pub sessions: &'a [RecurringSessionRecord],
    pub late_cancellations: &'a LateCancellationReport,
}

pub fn build_report(generated_on: chrono::NaiveDate, inputs: &DashboardInputs<'_>) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "# Studio Performance Report");
    let _ = writeln!(output, "Generated on {generated_on}");
    let _ = writeln!(output);

    output.push_str(&sellers_section(inputs.sales, GroupKey::Product, 5));
    output.push_str(&sellers_section(inputs.sales, GroupKey::Seller, 5));
    let _ = writeln!(output);
    let recent = aggregate::discount_view(inputs.sales, 10);
    output.push_str(&discounts_section(
        &aggregate::analyze_discounts(inputs.sales),
        &recent,
    ));
    let _ = writeln!(output);
    let mut newest_clients = inputs.clients.to_vec();
    newest_clients.sort_by(|a, b| b.first_visit_date.cmp(&a.first_visit_date));
    newest_clients.truncate(10);
    output.push_str(&conversion_section(inputs.clients, &newest_clients));
    let _ = writeln!(output);
    output.push_str(&attendance_section(inputs.sessions, 5));
    let _ = writeln!(output);
    output.push_str(&late_cancellations_section(inputs.late_cancellations, None));
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::late_cancellations::parse_late_cancellations;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn formats_numbers_and_currency() {
        assert_eq!(format_number(0.0), "0");
        assert_eq!(format_number(999.4), "999");
        assert_eq!(format_number(1234567.0), "1,234,567");
        assert_eq!(format_number(-4500.0), "-4,500");
        assert_eq!(format_currency(150000.0), "₹150,000");
        assert_eq!(format_currency(-20.0), "-₹20");
        assert_eq!(format_percent(12.345), "12.3%");
    }

    #[test]
    fn empty_inputs_render_empty_states() {
        assert!(discounts_section(&DiscountAnalysis::default(), &[])
            .contains("No sales recorded"));
        assert!(conversion_section(&[], &[]).contains("No clients recorded"));
        assert!(attendance_section(&[], 5).contains("No sessions match"));
        assert!(late_cancellations_section(&LateCancellationReport::default(), None)
            .contains("No late cancellation data"));
        assert!(sellers_section(&[], GroupKey::Product, 5).contains("No sales recorded"));
    }

    #[test]
    fn late_cancellation_tables_render_months() {
        let grid = vec![
            row(&["Location", "Jul-2025", "Aug-2025"]),
            row(&["Kenkere House", "2", "7"]),
            row(&["Late Cancellations by Class"]),
            row(&["Location", "Cleaned Class", "Jul-2025", "Aug-2025"]),
            row(&["Kenkere House", "Barre 57", "2", "7"]),
        ];
        let section = late_cancellations_section(&parse_late_cancellations(&grid), None);

        assert!(section.contains("Total late cancellations (Aug-2025): 7"));
        assert!(section.contains("up 250.0% from Jul-2025"));
        assert!(section.contains("| Location | Jul-2025 | Aug-2025 |"));
        assert!(section.contains("| Kenkere House | Barre 57 | 2 | 7 |"));
        assert!(section.contains("- Barre 57: 7"));
    }
}
