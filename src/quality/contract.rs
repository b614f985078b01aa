//! Schema contract: a JSON description of every silver table plus key checks.

use anyhow::Result;
use chrono::{DateTime, Utc};
use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io;
use std::path::Path;
use tracing::debug;

use super::RawTable;
use crate::silver::{
    BIKE_STATIONS_CSV, BIKE_TIMESERIES_CSV, METRO_BIKE_LINKS_CSV, METRO_STATIONS_CSV,
    METRO_TIMESERIES_CSV,
};

pub const SCHEMA_VERSION: u32 = 1;

const TABLES: [&str; 5] = [
    METRO_STATIONS_CSV,
    BIKE_STATIONS_CSV,
    METRO_BIKE_LINKS_CSV,
    BIKE_TIMESERIES_CSV,
    METRO_TIMESERIES_CSV,
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    pub nulls: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMeta {
    pub exists: bool,
    pub size_bytes: Option<u64>,
    pub modified_at: Option<DateTime<Utc>>,
    pub sha256: Option<String>,
    pub row_count: Option<usize>,
    pub columns: Vec<ColumnMeta>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContractChecks {
    pub metro_pk_duplicates: usize,
    pub bike_pk_duplicates: usize,
    pub link_pk_duplicates: usize,
    pub link_fk_missing_metro: usize,
    pub link_fk_missing_bike: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaMeta {
    #[serde(rename = "type")]
    pub kind: String,
    pub schema_version: u32,
    pub generated_at: DateTime<Utc>,
    pub tables: BTreeMap<String, TableMeta>,
    pub checks: ContractChecks,
    pub issues: Vec<String>,
}

fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

fn describe(path: &Path) -> Result<(TableMeta, Option<RawTable>)> {
    if !path.is_file() {
        return Ok((
            TableMeta {
                exists: false,
                size_bytes: None,
                modified_at: None,
                sha256: None,
                row_count: None,
                columns: Vec::new(),
            },
            None,
        ));
    }

    let metadata = fs::metadata(path)?;
    let raw = RawTable::read(path)?;
    let columns = raw
        .headers
        .iter()
        .enumerate()
        .map(|(idx, name)| ColumnMeta {
            name: name.to_string(),
            nulls: raw.values(idx).filter(|v| v.is_empty()).count(),
        })
        .collect();

    let meta = TableMeta {
        exists: true,
        size_bytes: Some(metadata.len()),
        modified_at: metadata.modified().ok().map(DateTime::<Utc>::from),
        sha256: Some(sha256_file(path)?),
        row_count: Some(raw.rows.len()),
        columns,
    };
    Ok((meta, Some(raw)))
}

fn id_set(raw: Option<&RawTable>, col: &str) -> (HashSet<String>, usize) {
    let mut seen = HashSet::new();
    let mut duplicates = 0;
    if let Some(raw) = raw {
        if let Some(idx) = raw.column(col) {
            for id in raw.values(idx) {
                if !id.is_empty() && !seen.insert(id.to_string()) {
                    duplicates += 1;
                }
            }
        }
    }
    (seen, duplicates)
}

/// Describe the silver tables in `dir` and run primary/foreign key checks.
pub fn compute_schema_meta(dir: &Path) -> Result<SchemaMeta> {
    let mut tables = BTreeMap::new();
    let mut raws: BTreeMap<&str, RawTable> = BTreeMap::new();
    let mut issues = Vec::new();

    for table in TABLES {
        let (meta, raw) = describe(&dir.join(table))?;
        if let Some(raw) = raw {
            raws.insert(table, raw);
        }
        tables.insert(table.to_string(), meta);
    }

    let (metro_ids, metro_dups) = id_set(raws.get(METRO_STATIONS_CSV), "station_id");
    let (bike_ids, bike_dups) = id_set(raws.get(BIKE_STATIONS_CSV), "station_id");
    let mut checks = ContractChecks {
        metro_pk_duplicates: metro_dups,
        bike_pk_duplicates: bike_dups,
        ..Default::default()
    };

    if let Some(links) = raws.get(METRO_BIKE_LINKS_CSV) {
        if let (Some(m), Some(b)) = (
            links.column("metro_station_id"),
            links.column("bike_station_id"),
        ) {
            let mut pairs = HashSet::new();
            for row in &links.rows {
                let metro = row.get(m).unwrap_or("").trim();
                let bike = row.get(b).unwrap_or("").trim();
                if !pairs.insert((metro, bike)) {
                    checks.link_pk_duplicates += 1;
                }
                if !metro_ids.contains(metro) {
                    checks.link_fk_missing_metro += 1;
                }
                if !bike_ids.contains(bike) {
                    checks.link_fk_missing_bike += 1;
                }
            }
        } else {
            issues.push(format!("{}: missing key columns", METRO_BIKE_LINKS_CSV));
        }
    }

    for (label, count) in [
        ("duplicate metro station ids", checks.metro_pk_duplicates),
        ("duplicate bike station ids", checks.bike_pk_duplicates),
        ("duplicate metro/bike link pairs", checks.link_pk_duplicates),
        ("links with unknown metro station", checks.link_fk_missing_metro),
        ("links with unknown bike station", checks.link_fk_missing_bike),
    ] {
        if count > 0 {
            issues.push(format!("{}: {}", label, count));
        }
    }
    for table in [METRO_STATIONS_CSV, BIKE_STATIONS_CSV, METRO_BIKE_LINKS_CSV] {
        if !raws.contains_key(table) {
            issues.push(format!("{}: missing", table));
        }
    }

    debug!("Schema meta computed with {} issues", issues.len());
    Ok(SchemaMeta {
        kind: "silver_schema_meta".to_string(),
        schema_version: SCHEMA_VERSION,
        generated_at: Utc::now(),
        tables,
        checks,
        issues,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::Builder;

    #[test]
    fn test_schema_meta_checks() {
        let dir = Builder::new().prefix("atlas-contract-").tempdir().unwrap();
        fs::write(
            dir.path().join(METRO_STATIONS_CSV),
            "station_id,name,lat,lon\nM1,A,25.0,121.5\nM1,A,25.0,\n",
        )
        .unwrap();
        fs::write(
            dir.path().join(BIKE_STATIONS_CSV),
            "station_id,name,lat,lon\nB1,B,25.0,121.5\n",
        )
        .unwrap();
        fs::write(
            dir.path().join(METRO_BIKE_LINKS_CSV),
            "metro_station_id,bike_station_id,distance_m\nM1,B1,1\nM1,B1,1\nM2,B7,3\n",
        )
        .unwrap();

        let meta = compute_schema_meta(dir.path()).unwrap();
        assert_eq!(meta.kind, "silver_schema_meta");
        assert_eq!(meta.schema_version, 1);

        let metro = &meta.tables[METRO_STATIONS_CSV];
        assert!(metro.exists);
        assert_eq!(metro.row_count, Some(2));
        assert_eq!(metro.sha256.as_ref().map(String::len), Some(64));
        let lon = metro.columns.iter().find(|c| c.name == "lon").unwrap();
        assert_eq!(lon.nulls, 1);

        assert!(!meta.tables[BIKE_TIMESERIES_CSV].exists);
        assert_eq!(meta.checks.metro_pk_duplicates, 1);
        assert_eq!(meta.checks.link_pk_duplicates, 1);
        assert_eq!(meta.checks.link_fk_missing_metro, 1);
        assert_eq!(meta.checks.link_fk_missing_bike, 1);
        assert_eq!(meta.issues.len(), 4);

        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["type"], "silver_schema_meta");
    }
}
