use anyhow::Result;

use crate::store::Report;

pub fn report_to_csv(report: &Report) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record([
        "date",
        "area",
        "available_slots_7d",
        "vaccinations_28d",
        "next_available_slot",
    ])?;
    let date = report.date.clone().unwrap_or_default();
    for area in &report.areas {
        writer.write_record([
            date.clone(),
            area.area.clone(),
            area.available_slots_7d.to_string(),
            area.vaccinations_28d.to_string(),
            area.next_available_slot.clone().unwrap_or_default(),
        ])?;
    }
    let data = writer.into_inner()?;
    Ok(String::from_utf8_lossy(&data).to_string())
}

#[cfg(test)]
mod tests {
    use super::report_to_csv;
    use crate::store::{AreaSummary, Report};

    #[test]
    fn one_line_per_area_after_the_header() {
        let report = Report {
            date: Some("2021-05-01".to_string()),
            areas: vec![AreaSummary {
                area: "2A".to_string(),
                available_slots_7d: 4,
                vaccinations_28d: 0,
                next_available_slot: None,
            }],
            total_available_slots_7d: 4,
            total_vaccinations_28d: 0,
        };
        let csv = report_to_csv(&report).expect("csv");
        let lines = csv.lines().collect::<Vec<_>>();
        assert_eq!(
            lines,
            vec![
                "date,area,available_slots_7d,vaccinations_28d,next_available_slot",
                "2021-05-01,2A,4,0,"
            ]
        );
    }
}
