use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::providers::http::JsonFetcher;
use crate::providers::{AvailabilityHarvester, Provider, RecordStream, SourceIdentity};
use crate::snapshot::AvailabilityRecord;

pub const DEFAULT_PARTNER_HOST: &str = "partners.doctolib.fr";
const SLOT_LOOKAHEAD_DAYS: u32 = 7;
const VACCINATION_DAYS_RANGE: u32 = 26;

#[derive(Debug, Clone)]
pub struct DoctolibSettings {
    pub partner_host: String,
    pub courtesy_delay: Duration,
}

impl Default for DoctolibSettings {
    fn default() -> Self {
        Self {
            partner_host: DEFAULT_PARTNER_HOST.to_string(),
            courtesy_delay: Duration::from_secs(1),
        }
    }
}

/// Platform id; the API mixes numbers and numeric strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id(String);

impl Id {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Id {
    fn from(value: &str) -> Self {
        Id(value.trim().to_string())
    }
}

impl From<i64> for Id {
    fn from(value: i64) -> Self {
        Id(value.to_string())
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(i64),
            Text(String),
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Int(i) => Id::from(i),
            Raw::Text(s) => Id::from(s.as_str()),
        })
    }
}

fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Bool(b)) => b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
        Some(Value::String(s)) => !s.is_empty() && s != "0" && s != "false",
        _ => false,
    })
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn lenient_motive_map<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<BTreeMap<String, Vec<Id>>, D::Error> {
    let raw = Option::<BTreeMap<String, Option<Vec<Id>>>>::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(practice, motives)| (practice, motives.unwrap_or_default()))
        .collect())
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookingResponse {
    pub data: BookingData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookingData {
    #[serde(default, deserialize_with = "null_as_default")]
    pub visit_motives: Vec<VisitMotive>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub places: Vec<Place>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub agendas: Vec<Agenda>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub profile: Profile,
    #[serde(default)]
    pub number_future_vaccinations: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VisitMotive {
    pub id: Id,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub first_shot_motive: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Place {
    #[serde(default, deserialize_with = "lenient_string")]
    pub zipcode: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub practice_ids: Vec<Id>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Agenda {
    pub id: Id,
    #[serde(default)]
    pub practice_id: Option<Id>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub booking_disabled: bool,
    #[serde(default, deserialize_with = "lenient_motive_map")]
    pub visit_motive_ids_by_practice_id: BTreeMap<String, Vec<Id>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub id: Option<Id>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub organization: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AvailabilityResponse {
    #[serde(default)]
    pub total: Option<i64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub availabilities: Vec<Value>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub next_slot: Option<String>,
    #[serde(default)]
    pub number_future_vaccinations: Option<i64>,
}

pub fn first_dose_motives(data: &BookingData) -> Vec<Id> {
    let mut seen = BTreeSet::new();
    data.visit_motives
        .iter()
        .filter(|m| m.first_shot_motive)
        .filter(|m| seen.insert(m.id.clone()))
        .map(|m| m.id.clone())
        .collect()
}

pub fn open_agendas(data: &BookingData, motives: &[Id], practice: &Id) -> Vec<Id> {
    let wanted = motives.iter().collect::<BTreeSet<_>>();
    data.agendas
        .iter()
        .filter(|agenda| !agenda.booking_disabled)
        .filter(|agenda| agenda.practice_id.as_ref() == Some(practice))
        .filter(|agenda| {
            let Some(offered) = agenda.visit_motive_ids_by_practice_id.get(practice.as_str())
            else {
                return false;
            };
            let offered = offered.iter().collect::<BTreeSet<_>>();
            !offered.is_empty() && offered == wanted
        })
        .map(|agenda| agenda.id.clone())
        .collect()
}

pub fn split_zipcode(raw: &str) -> (String, String) {
    let trimmed = raw.trim();
    (
        trimmed.chars().take(5).collect(),
        trimmed.chars().take(2).collect(),
    )
}

#[derive(Debug, Clone, PartialEq)]
pub struct PracticeQuery {
    pub template: AvailabilityRecord,
    pub practice_id: Id,
    pub agenda_ids: Vec<Id>,
    pub motive_ids: Vec<Id>,
    pub profile_id: Option<Id>,
    pub is_organization: bool,
    pub future_vaccinations: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HarvestStep {
    Closed(AvailabilityRecord),
    Practice(PracticeQuery),
}

/// Lazily walks places and practices of one metadata document.
///
/// With no first-dose motive the plan ends after its first step.
pub struct HarvestPlan {
    base: SourceIdentity,
    data: BookingData,
    motives: Vec<Id>,
    date: NaiveDate,
    place: usize,
    practice: usize,
    seen: BTreeSet<Id>,
    finished: bool,
}

impl HarvestPlan {
    pub fn new(identity: &SourceIdentity, data: BookingData, date: NaiveDate) -> Self {
        let motives = first_dose_motives(&data);
        Self {
            base: identity.base(),
            data,
            motives,
            date,
            place: 0,
            practice: 0,
            seen: BTreeSet::new(),
            finished: false,
        }
    }

    fn record_for(&self, identity: &SourceIdentity, zipcode: &str) -> AvailabilityRecord {
        let (zipcode, area) = split_zipcode(zipcode);
        AvailabilityRecord {
            uri: identity.to_string(),
            zipcode,
            area,
            date: self.date,
            has_availabilities: false,
            available_slots_7d: None,
            next_available_slot: None,
            vaccinations_28d: None,
        }
    }
}

impl Iterator for HarvestPlan {
    type Item = HarvestStep;

    fn next(&mut self) -> Option<HarvestStep> {
        while !self.finished {
            let Some(place) = self.data.places.get(self.place) else {
                self.finished = true;
                break;
            };
            let zipcode = place.zipcode.clone().unwrap_or_default();

            if self.motives.is_empty() {
                self.finished = true;
                let mut record = self.record_for(&self.base, &zipcode);
                record.vaccinations_28d = self.data.number_future_vaccinations;
                return Some(HarvestStep::Closed(record));
            }

            let Some(practice_id) = place.practice_ids.get(self.practice).cloned() else {
                self.place += 1;
                self.practice = 0;
                self.seen.clear();
                continue;
            };
            self.practice += 1;
            if !self.seen.insert(practice_id.clone()) {
                continue;
            }

            let agenda_ids = open_agendas(&self.data, &self.motives, &practice_id);
            if agenda_ids.is_empty() {
                debug!(source = %self.base, practice = %practice_id, "no open agenda");
                continue;
            }

            let identity = self.base.qualified("pid", &practice_id);
            return Some(HarvestStep::Practice(PracticeQuery {
                template: self.record_for(&identity, &zipcode),
                practice_id,
                agenda_ids,
                motive_ids: self.motives.clone(),
                profile_id: self.data.profile.id.clone(),
                is_organization: self.data.profile.organization,
                future_vaccinations: self.data.number_future_vaccinations,
            }));
        }
        None
    }
}

fn join_ids(ids: &[Id]) -> String {
    ids.iter().map(Id::as_str).collect::<Vec<_>>().join("-")
}

pub fn apply_availability(
    template: AvailabilityRecord,
    response: &AvailabilityResponse,
) -> AvailabilityRecord {
    let total = response.total.unwrap_or(0).max(0);
    AvailabilityRecord {
        has_availabilities: total > 0 && !response.availabilities.is_empty(),
        available_slots_7d: Some(total),
        next_available_slot: response.next_slot.clone(),
        vaccinations_28d: response.number_future_vaccinations,
        ..template
    }
}

pub struct DoctolibHarvester {
    fetcher: Arc<dyn JsonFetcher>,
    settings: DoctolibSettings,
}

impl DoctolibHarvester {
    pub fn new(fetcher: Arc<dyn JsonFetcher>, settings: DoctolibSettings) -> Self {
        Self { fetcher, settings }
    }

    pub fn booking_url(&self, identity: &SourceIdentity) -> String {
        format!(
            "https://{}/booking/{}.json",
            self.settings.partner_host,
            identity.id.trim()
        )
    }

    pub fn availability_url(&self, query: &PracticeQuery, today: NaiveDate) -> Result<Url> {
        let mut params = vec![
            ("start_date", today.format("%Y-%m-%d").to_string()),
            ("visit_motive_ids", join_ids(&query.motive_ids)),
            ("agenda_ids", join_ids(&query.agenda_ids)),
            ("insurance_sector", "public".to_string()),
            ("practice_ids", query.practice_id.to_string()),
            ("destroy_temporary", "true".to_string()),
            ("limit", SLOT_LOOKAHEAD_DAYS.to_string()),
            ("allowNewPatients", "true".to_string()),
            ("telehealth", "false".to_string()),
        ];
        if let Some(profile_id) = &query.profile_id {
            params.push(("profileId", profile_id.to_string()));
        }
        params.extend([
            ("isOrganization", query.is_organization.to_string()),
            ("telehealthFeatureEnabled", "false".to_string()),
            ("vaccinationMotive", "true".to_string()),
            ("vaccinationDaysRange", VACCINATION_DAYS_RANGE.to_string()),
            ("vaccinationCenter", "true".to_string()),
        ]);
        if let Some(count) = query.future_vaccinations {
            params.push(("nbConfirmedVaccinationAppointments", count.to_string()));
        }
        let base = format!("https://{}/availabilities.json", self.settings.partner_host);
        Url::parse_with_params(&base, &params)
            .with_context(|| format!("invalid availability endpoint: {base}"))
    }

    pub async fn fetch_metadata(&self, identity: &SourceIdentity) -> Result<Option<BookingData>> {
        let url = self.booking_url(identity);
        let outcome = self.fetcher.get_json(&url).await;

        if !self.settings.courtesy_delay.is_zero() {
            tokio::time::sleep(self.settings.courtesy_delay).await;
        }

        let payload = match outcome {
            Ok(payload) => payload,
            Err(err) if !err.is_fatal() => {
                warn!(source = %identity, "no booking metadata: {err}");
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        match serde_json::from_value::<BookingResponse>(payload) {
            Ok(response) => Ok(Some(response.data)),
            Err(err) => {
                warn!(source = %identity, "unexpected booking metadata shape: {err}");
                Ok(None)
            }
        }
    }

    async fn run_step(
        &self,
        step: HarvestStep,
        today: NaiveDate,
    ) -> Option<Result<AvailabilityRecord>> {
        let query = match step {
            HarvestStep::Closed(record) => {
                info!(source = %record.uri, "closed: no first-dose motive");
                return Some(Ok(record));
            }
            HarvestStep::Practice(query) => query,
        };

        let url = match self.availability_url(&query, today) {
            Ok(url) => url,
            Err(err) => return Some(Err(err)),
        };
        match self.fetcher.get_json(url.as_str()).await {
            Ok(payload) => match serde_json::from_value::<AvailabilityResponse>(payload) {
                Ok(response) => Some(Ok(apply_availability(query.template, &response))),
                Err(err) => {
                    warn!(source = %query.template.uri, "unexpected availability shape: {err}");
                    None
                }
            },
            Err(err) if !err.is_fatal() => {
                warn!(source = %query.template.uri, "skipping practice: {err}");
                None
            }
            Err(err) => Some(Err(err.into())),
        }
    }
}

#[async_trait]
impl AvailabilityHarvester for DoctolibHarvester {
    fn provider(&self) -> Provider {
        Provider::Doctolib
    }

    async fn harvest<'s>(
        &'s self,
        identity: &SourceIdentity,
        today: NaiveDate,
    ) -> Result<RecordStream<'s>> {
        let Some(data) = self.fetch_metadata(identity).await? else {
            return Ok(stream::empty().boxed());
        };
        let plan = HarvestPlan::new(identity, data, today);
        Ok(stream::iter(plan)
            .filter_map(move |step| self.run_step(step, today))
            .boxed())
    }
}
