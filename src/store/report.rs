use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::store::{Store, StoreError, STATS_TABLE};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AreaSummary {
    pub area: String,
    pub available_slots_7d: i64,
    pub vaccinations_28d: i64,
    pub next_available_slot: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub date: Option<String>,
    pub areas: Vec<AreaSummary>,
    pub total_available_slots_7d: i64,
    pub total_vaccinations_28d: i64,
}

impl Store {
    pub fn latest_date(&self) -> Result<Option<String>, StoreError> {
        if !self.table_exists(STATS_TABLE)? {
            return Ok(None);
        }
        let date: Option<String> =
            self.conn()
                .query_row("SELECT MAX(date) FROM stats", [], |row| row.get(0))?;
        Ok(date)
    }

    pub fn department_summary(&self) -> Result<Report, StoreError> {
        let Some(date) = self.latest_date()? else {
            return Ok(Report::default());
        };

        let mut stmt = self.conn().prepare(
            r#"
SELECT area,
       COALESCE(SUM(available_slots_7d), 0),
       COALESCE(SUM(vaccinations_28d), 0),
       MIN(next_available_slot)
FROM stats
WHERE date = ?1
GROUP BY area
ORDER BY area
"#,
        )?;
        let areas = stmt
            .query_map(params![date], |row| {
                Ok(AreaSummary {
                    area: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                    available_slots_7d: row.get(1)?,
                    vaccinations_28d: row.get(2)?,
                    next_available_slot: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Report {
            total_available_slots_7d: areas.iter().map(|a| a.available_slots_7d).sum(),
            total_vaccinations_28d: areas.iter().map(|a| a.vaccinations_28d).sum(),
            date: Some(date),
            areas,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::store::{Record, Store, STATS_TABLE};

    fn row(
        area: &str,
        date: &str,
        slots: i64,
        vaccinations: Option<i64>,
        next: Option<&str>,
    ) -> Record {
        Record::new()
            .with("uri", format!("doctolib://{area}-{slots}"))
            .with("area", area.to_string())
            .with("date", date.to_string())
            .with("available_slots_7d", slots)
            .with("vaccinations_28d", vaccinations)
            .with("next_available_slot", next.map(str::to_string))
    }

    #[test]
    fn empty_store_gives_empty_report() {
        let store = Store::open_in_memory().expect("store");
        let report = store.department_summary().expect("report");
        assert!(report.date.is_none());
        assert!(report.areas.is_empty());
    }

    #[test]
    fn aggregates_latest_day_by_area() {
        let store = Store::open_in_memory().expect("store");
        let first = row("75", "2021-05-01", 3, Some(10), Some("2021-05-03T10:00:00"));
        store
            .ensure_table(STATS_TABLE, first.columns(), None)
            .expect("table");
        for record in [
            first.clone(),
            row("75", "2021-05-01", 2, None, Some("2021-05-02T09:00:00")),
            row("13", "2021-05-01", 0, Some(4), None),
            row("13", "2021-04-30", 99, Some(99), None),
        ] {
            store.append(STATS_TABLE, &record).expect("append");
        }

        let report = store.department_summary().expect("report");
        assert_eq!(report.date.as_deref(), Some("2021-05-01"));
        assert_eq!(report.areas.len(), 2);
        assert_eq!(report.areas[0].area, "13");
        assert_eq!(report.areas[0].available_slots_7d, 0);
        assert_eq!(report.areas[0].next_available_slot, None);
        assert_eq!(report.areas[1].area, "75");
        assert_eq!(report.areas[1].available_slots_7d, 5);
        assert_eq!(report.areas[1].vaccinations_28d, 10);
        assert_eq!(
            report.areas[1].next_available_slot.as_deref(),
            Some("2021-05-02T09:00:00")
        );
        assert_eq!(report.total_available_slots_7d, 5);
        assert_eq!(report.total_vaccinations_28d, 14);
    }
}
