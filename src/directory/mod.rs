use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info};

use crate::providers::http::JsonFetcher;
use crate::store::{
    json_to_sql, Record, SqlValue, Store, StoreError, TableSchema, CENTRES_TABLE,
};

pub const DEFAULT_PROPERTY_PREFIX: &str = "c_";
pub const CENTRE_KEY: &str = "gid";

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("invalid centres feed: {0}")]
    InvalidFeed(String),
    #[error("feature #{index} has no usable geometry")]
    MissingGeometry { index: usize },
    #[error("feature #{index} has no gid")]
    MissingKey { index: usize },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeatureCollection {
    pub features: Vec<Feature>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Feature {
    #[serde(default)]
    pub properties: Option<Map<String, Value>>,
    #[serde(default)]
    pub geometry: Option<Geometry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Geometry {
    #[serde(default)]
    pub coordinates: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Centre(pub Record);

impl Centre {
    pub fn gid(&self) -> Option<String> {
        match self.0.get(CENTRE_KEY)? {
            SqlValue::Integer(i) => Some(i.to_string()),
            SqlValue::Text(s) => Some(s.clone()),
            _ => None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.0.text("nom")
    }

    pub fn booking_url(&self) -> Option<&str> {
        self.0.text("rdv_site_web")
    }

    pub fn record(&self) -> &Record {
        &self.0
    }
}

impl From<Record> for Centre {
    fn from(record: Record) -> Self {
        Centre(record)
    }
}

pub fn parse_feed(value: Value) -> Result<FeatureCollection, ImportError> {
    let has_properties = value
        .get("features")
        .and_then(|f| f.get(0))
        .and_then(|f| f.get("properties"))
        .is_some_and(Value::is_object);
    if !has_properties {
        return Err(ImportError::InvalidFeed(
            "features[0].properties is missing".to_string(),
        ));
    }
    serde_json::from_value(value).map_err(|err| ImportError::InvalidFeed(err.to_string()))
}

pub fn first_position(coordinates: &Value) -> Option<(f64, f64)> {
    let mut current = coordinates.as_array()?;
    loop {
        match current.first()? {
            Value::Array(inner) => current = inner,
            Value::Number(lon) => {
                let lat = current.get(1)?.as_f64()?;
                return Some((lon.as_f64()?, lat));
            }
            _ => return None,
        }
    }
}

pub fn normalize_feature(
    feature: &Feature,
    prefix: &str,
    index: usize,
) -> Result<Centre, ImportError> {
    let mut record = Record::new();
    if let Some(properties) = &feature.properties {
        for (key, value) in properties {
            let Some(stripped) = key.strip_prefix(prefix) else {
                continue;
            };
            record.set(stripped.to_lowercase(), json_to_sql(value));
        }
    }
    let (lon, lat) = feature
        .geometry
        .as_ref()
        .and_then(|g| first_position(&g.coordinates))
        .ok_or(ImportError::MissingGeometry { index })?;
    record.set("lon", lon);
    record.set("lat", lat);

    let centre = Centre(record);
    if centre.gid().is_none() {
        return Err(ImportError::MissingKey { index });
    }
    Ok(centre)
}

pub struct DirectoryImporter<'a> {
    store: &'a Store,
    prefix: String,
}

impl<'a> DirectoryImporter<'a> {
    pub fn new(store: &'a Store, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    pub fn import(&self, feed: &FeatureCollection) -> Result<usize, ImportError> {
        self.store.with_transaction(0, |batch| {
            let mut schema: Option<TableSchema> = None;
            for (index, feature) in feed.features.iter().enumerate() {
                let centre = normalize_feature(feature, &self.prefix, index)?;
                let record = centre.record();
                if !schema.as_ref().is_some_and(|s| s.covers(record)) {
                    schema = Some(batch.ensure_table(
                        CENTRES_TABLE,
                        record.columns(),
                        Some(CENTRE_KEY),
                    )?);
                }
                debug!("updating centre: {}", centre.name().unwrap_or("<unnamed>"));
                batch.upsert(CENTRES_TABLE, record)?;
                batch.unit_done()?;
            }
            Ok(feed.features.len())
        })
    }
}

pub async fn fetch_feed(fetcher: &dyn JsonFetcher, url: &str) -> Result<FeatureCollection> {
    let payload = fetcher
        .get_json(url)
        .await
        .with_context(|| format!("failed fetching centres feed: {url}"))?;
    let feed = parse_feed(payload)?;
    info!(features = feed.features.len(), "fetched centres feed");
    Ok(feed)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        first_position, parse_feed, DirectoryImporter, FeatureCollection, ImportError,
        DEFAULT_PROPERTY_PREFIX,
    };
    use crate::store::{SqlValue, Store, CENTRES_TABLE};

    fn feature(gid: i64, name: &str, extra: Option<(&str, &str)>) -> serde_json::Value {
        let mut properties = json!({
            "c_gid": gid,
            "c_nom": name,
            "c_rdv_site_web": format!("https://partners.doctolib.fr/centre/{gid}"),
            "ignored": "not namespaced",
        });
        if let Some((key, value)) = extra {
            properties[key] = json!(value);
        }
        json!({
            "type": "Feature",
            "properties": properties,
            "geometry": { "type": "MultiPoint", "coordinates": [[2.35, 48.85]] }
        })
    }

    fn feed(features: Vec<serde_json::Value>) -> FeatureCollection {
        parse_feed(json!({ "type": "FeatureCollection", "features": features })).expect("feed")
    }

    #[test]
    fn finds_first_position_at_any_depth() {
        assert_eq!(first_position(&json!([1.0, 2.0])), Some((1.0, 2.0)));
        assert_eq!(first_position(&json!([[3.0, 4.0], [5.0, 6.0]])), Some((3.0, 4.0)));
        assert_eq!(first_position(&json!([[[7.0, 8.0]]])), Some((7.0, 8.0)));
        assert_eq!(first_position(&json!([])), None);
        assert_eq!(first_position(&json!([1.0])), None);
        assert_eq!(first_position(&json!("nope")), None);
    }

    #[test]
    fn rejects_feed_without_properties() {
        let err = parse_feed(json!({ "features": [] })).unwrap_err();
        assert!(matches!(err, ImportError::InvalidFeed(_)));
        let err = parse_feed(json!({ "rows": [1, 2] })).unwrap_err();
        assert!(matches!(err, ImportError::InvalidFeed(_)));
    }

    #[test]
    fn importing_twice_keeps_one_row_per_gid() {
        let store = Store::open_in_memory().expect("store");
        let importer = DirectoryImporter::new(&store, DEFAULT_PROPERTY_PREFIX);
        let collection = feed(vec![feature(1, "A", None), feature(2, "B", None)]);
        importer.import(&collection).expect("first import");
        importer.import(&collection).expect("second import");

        let rows = store.rows(CENTRES_TABLE).expect("rows");
        assert_eq!(rows.len(), 2);
        let first = &rows[0];
        assert_eq!(first.integer("gid"), Some(1));
        assert_eq!(first.text("nom"), Some("A"));
        assert_eq!(first.real("lon"), Some(2.35));
        assert_eq!(first.real("lat"), Some(48.85));
        assert!(first.get("ignored").is_none());
    }

    #[test]
    fn replaced_rows_drop_stale_values_but_keep_added_columns() {
        let store = Store::open_in_memory().expect("store");
        let importer = DirectoryImporter::new(&store, DEFAULT_PROPERTY_PREFIX);
        importer
            .import(&feed(vec![feature(1, "A", Some(("c_Telephone", "0102")))]))
            .expect("first import");
        importer
            .import(&feed(vec![feature(1, "A2", None)]))
            .expect("second import");

        let rows = store.rows(CENTRES_TABLE).expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].text("nom"), Some("A2"));
        assert_eq!(rows[0].get("telephone"), Some(&SqlValue::Null));
    }

    #[test]
    fn later_features_with_new_fields_extend_the_table() {
        let store = Store::open_in_memory().expect("store");
        let importer = DirectoryImporter::new(&store, DEFAULT_PROPERTY_PREFIX);
        importer
            .import(&feed(vec![
                feature(1, "A", None),
                feature(2, "B", Some(("c_horaires", "9h-17h"))),
            ]))
            .expect("import");

        let rows = store.rows(CENTRES_TABLE).expect("rows");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("horaires"), Some(&SqlValue::Null));
        assert_eq!(rows[1].text("horaires"), Some("9h-17h"));
    }

    #[test]
    fn missing_geometry_aborts_without_writes() {
        let store = Store::open_in_memory().expect("store");
        let importer = DirectoryImporter::new(&store, DEFAULT_PROPERTY_PREFIX);
        let mut broken = feature(2, "B", None);
        broken["geometry"] = serde_json::Value::Null;
        let err = importer
            .import(&feed(vec![feature(1, "A", None), broken]))
            .unwrap_err();
        assert!(matches!(err, ImportError::MissingGeometry { index: 1 }));
        assert_eq!(store.count(CENTRES_TABLE).expect("count"), 0);
    }
}
