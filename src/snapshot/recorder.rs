use std::collections::BTreeSet;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use futures_util::StreamExt;
use tracing::{debug, info, warn};

use crate::directory::Centre;
use crate::providers::{resolve, HarvesterRegistry, SourceIdentity};
use crate::snapshot::RunSummary;
use crate::store::{Store, TableSchema, CENTRES_TABLE, STATS_TABLE};

pub const DEFAULT_BATCH_SIZE: usize = 50;

pub struct SnapshotRecorder<'a> {
    store: &'a Store,
    registry: &'a HarvesterRegistry,
    batch_size: usize,
}

impl<'a> SnapshotRecorder<'a> {
    pub fn new(store: &'a Store, registry: &'a HarvesterRegistry, batch_size: usize) -> Self {
        Self {
            store,
            registry,
            batch_size,
        }
    }

    pub fn collect_sources(&self, summary: &mut RunSummary) -> Result<BTreeSet<SourceIdentity>> {
        let mut sources = BTreeSet::new();
        for row in self.store.rows(CENTRES_TABLE)? {
            let centre = Centre::from(row);
            match resolve(centre.booking_url()) {
                Ok(Some(identity)) => {
                    sources.insert(identity.base());
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(
                        centre = centre.gid().as_deref().unwrap_or("?"),
                        "{err}"
                    );
                    summary.unknown_providers += 1;
                }
            }
        }
        summary.sources_seen = sources.len();
        Ok(sources)
    }

    pub async fn record(&self, today: NaiveDate) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let sources = self.collect_sources(&mut summary)?;

        let mut batch = self.store.begin_batch(self.batch_size)?;
        let mut schema: Option<TableSchema> = None;

        for source in sources {
            let base_uri = source.to_string();
            if batch.exists_today(STATS_TABLE, &base_uri, today)? {
                info!("already got: {base_uri}");
                summary.already_recorded += 1;
                continue;
            }

            let Some(harvester) = self.registry.by_provider(source.provider) else {
                warn!("no harvester for provider: {base_uri}");
                summary.unknown_providers += 1;
                continue;
            };

            let mut records = harvester
                .harvest(&source, today)
                .await
                .with_context(|| format!("harvesting {base_uri}"))?;
            while let Some(record) = records.next().await {
                let record = record.with_context(|| format!("harvesting {base_uri}"))?;
                let row = record.to_record();
                if !schema.as_ref().is_some_and(|s| s.covers(&row)) {
                    schema = Some(batch.ensure_table(STATS_TABLE, row.columns(), None)?);
                }
                debug!(uri = %record.uri, slots = ?record.available_slots_7d, "inserting stats");
                batch.append(STATS_TABLE, &row)?;
                summary.records_written += 1;
            }

            summary.sources_harvested += 1;
            batch.unit_done()?;
        }

        batch.finish()?;
        info!(
            sources = summary.sources_seen,
            harvested = summary.sources_harvested,
            skipped = summary.already_recorded,
            unknown = summary.unknown_providers,
            records = summary.records_written,
            "snapshot run complete"
        );
        Ok(summary)
    }
}
