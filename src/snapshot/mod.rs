pub mod recorder;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::store::Record;

pub use recorder::SnapshotRecorder;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityRecord {
    pub uri: String,
    pub zipcode: String,
    pub area: String,
    pub date: NaiveDate,
    pub has_availabilities: bool,
    pub available_slots_7d: Option<i64>,
    pub next_available_slot: Option<String>,
    /// Confirmed upcoming vaccinations, not a slot count.
    pub vaccinations_28d: Option<i64>,
}

impl AvailabilityRecord {
    pub fn to_record(&self) -> Record {
        Record::new()
            .with("uri", self.uri.clone())
            .with("zipcode", self.zipcode.clone())
            .with("area", self.area.clone())
            .with("date", self.date.format("%Y-%m-%d").to_string())
            .with("has_availabilities", self.has_availabilities)
            .with("available_slots_7d", self.available_slots_7d)
            .with("next_available_slot", self.next_available_slot.clone())
            .with("vaccinations_28d", self.vaccinations_28d)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub centres_imported: usize,
    pub sources_seen: usize,
    pub sources_harvested: usize,
    pub already_recorded: usize,
    pub unknown_providers: usize,
    pub records_written: usize,
}
