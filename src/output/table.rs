use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color, ContentArrangement, Row, Table};

use crate::store::{AreaSummary, Report};

fn area_color(area: &AreaSummary) -> Color {
    if area.available_slots_7d > 0 {
        Color::Green
    } else if area.next_available_slot.is_some() {
        Color::Yellow
    } else {
        Color::Red
    }
}

pub fn render_report_table(report: &Report) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        "Area",
        "Slots (7d)",
        "Vaccinations (28d)",
        "Next slot",
    ]);

    for area in &report.areas {
        let color = area_color(area);
        table.add_row(Row::from(vec![
            Cell::new(&area.area).fg(color),
            Cell::new(area.available_slots_7d).fg(color),
            Cell::new(area.vaccinations_28d),
            Cell::new(area.next_available_slot.as_deref().unwrap_or("-")),
        ]));
    }
    if !report.areas.is_empty() {
        table.add_row(vec![
            Cell::new("Total"),
            Cell::new(report.total_available_slots_7d),
            Cell::new(report.total_vaccinations_28d),
            Cell::new(""),
        ]);
    }

    match &report.date {
        Some(date) => format!("Snapshot of {date}\n{table}"),
        None => "No snapshot recorded yet".to_string(),
    }
}
