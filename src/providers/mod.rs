pub mod doctolib;
pub mod http;
pub mod identity;
pub mod resolver;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use futures_util::stream::BoxStream;

use crate::providers::doctolib::{DoctolibHarvester, DoctolibSettings};
use crate::providers::http::JsonFetcher;
use crate::snapshot::AvailabilityRecord;

pub use identity::{Provider, SourceIdentity};
pub use resolver::{resolve, ResolveError};

pub type RecordStream<'s> = BoxStream<'s, Result<AvailabilityRecord>>;

#[async_trait]
pub trait AvailabilityHarvester: Send + Sync {
    fn provider(&self) -> Provider;

    async fn harvest<'s>(
        &'s self,
        identity: &SourceIdentity,
        today: NaiveDate,
    ) -> Result<RecordStream<'s>>;
}

#[derive(Clone, Default)]
pub struct HarvesterRegistry {
    harvesters: Vec<Arc<dyn AvailabilityHarvester>>,
}

impl HarvesterRegistry {
    pub fn with_defaults(fetcher: Arc<dyn JsonFetcher>, doctolib: DoctolibSettings) -> Self {
        Self::default().register(Arc::new(DoctolibHarvester::new(fetcher, doctolib)))
    }

    pub fn register(mut self, harvester: Arc<dyn AvailabilityHarvester>) -> Self {
        self.harvesters.retain(|h| h.provider() != harvester.provider());
        self.harvesters.push(harvester);
        self
    }

    pub fn by_provider(&self, provider: Provider) -> Option<Arc<dyn AvailabilityHarvester>> {
        self.harvesters
            .iter()
            .find(|h| h.provider() == provider)
            .cloned()
    }
}
