//! Station feature table with a dynamic set of numeric columns.

use anyhow::{bail, Context, Result};
use csv::{ReaderBuilder, WriterBuilder};
use std::fs;
use std::path::Path;
use tempfile::NamedTempFile;

/// One row of the feature table
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub station_id: String,
    pub district: Option<String>,
    /// Parallel to [`FeatureTable::columns`]
    pub values: Vec<Option<f64>>,
}

/// Station-level features. `station_id` and `district` are fixed; every
/// other column is numeric and may be missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureTable {
    pub columns: Vec<String>,
    pub rows: Vec<FeatureRow>,
}

impl FeatureTable {
    /// Empty table with one row per station
    pub fn with_stations<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: Vec::new(),
            rows: ids
                .into_iter()
                .map(|id| FeatureRow {
                    station_id: id.into(),
                    district: None,
                    values: Vec::new(),
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_district(&self) -> bool {
        self.rows.iter().any(|r| r.district.is_some())
    }

    /// Append a column; `values` is parallel to the rows.
    pub fn push_column(&mut self, name: impl Into<String>, values: Vec<Option<f64>>) {
        debug_assert_eq!(values.len(), self.rows.len());
        self.columns.push(name.into());
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.values.push(value.filter(|v| v.is_finite()));
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn row(&self, station_id: &str) -> Option<&FeatureRow> {
        self.rows.iter().find(|r| r.station_id == station_id)
    }

    /// Column values in row order
    pub fn column(&self, idx: usize) -> Vec<Option<f64>> {
        self.rows
            .iter()
            .map(|r| r.values.get(idx).copied().flatten())
            .collect()
    }

    /// Write the table, replacing `path` atomically.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

        let with_district = self.has_district();
        let tmp = NamedTempFile::new_in(dir)?;
        {
            let mut writer = WriterBuilder::new().from_writer(tmp.as_file());

            let mut header = vec!["station_id".to_string()];
            if with_district {
                header.push("district".to_string());
            }
            header.extend(self.columns.iter().cloned());
            writer.write_record(&header)?;

            for row in &self.rows {
                let mut record = vec![row.station_id.clone()];
                if with_district {
                    record.push(row.district.clone().unwrap_or_default());
                }
                record.extend(
                    row.values
                        .iter()
                        .map(|v| v.map(|x| x.to_string()).unwrap_or_default()),
                );
                writer.write_record(&record)?;
            }
            writer.flush()?;
        }
        tmp.persist(path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Read a feature table. Cells that do not parse as numbers are missing.
    pub fn read_csv(path: &Path) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let headers = reader.headers()?.clone();

        let Some(id_idx) = headers.iter().position(|h| h == "station_id") else {
            bail!("{} has no station_id column", path.display());
        };
        let district_idx = headers.iter().position(|h| h == "district");
        let numeric: Vec<(usize, String)> = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != id_idx && Some(*i) != district_idx)
            .map(|(i, h)| (i, h.to_string()))
            .collect();

        let mut table = FeatureTable {
            columns: numeric.iter().map(|(_, h)| h.clone()).collect(),
            rows: Vec::new(),
        };
        for record in reader.records() {
            let record = record?;
            let station_id = record.get(id_idx).unwrap_or("").trim().to_string();
            if station_id.is_empty() {
                continue;
            }
            let district = district_idx
                .and_then(|i| record.get(i))
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string);
            let values = numeric
                .iter()
                .map(|(i, _)| {
                    record
                        .get(*i)
                        .and_then(|v| v.trim().parse::<f64>().ok())
                        .filter(|v| v.is_finite())
                })
                .collect();
            table.rows.push(FeatureRow {
                station_id,
                district,
                values,
            });
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::Builder;

    #[test]
    fn test_push_column_and_lookup() {
        let mut table = FeatureTable::with_stations(["M1", "M2"]);
        table.push_column("a", vec![Some(1.0), None]);
        table.push_column("b", vec![Some(f64::NAN), Some(2.0)]);

        assert_eq!(table.column_index("b"), Some(1));
        assert_eq!(table.column(0), vec![Some(1.0), None]);
        assert_eq!(table.row("M2").unwrap().values, vec![None, Some(2.0)]);
        assert_eq!(table.row("M1").unwrap().values[1], None);
    }

    #[test]
    fn test_csv_roundtrip_with_district() {
        let dir = Builder::new().prefix("atlas-features-").tempdir().unwrap();
        let path = dir.path().join("station_features.csv");

        let mut table = FeatureTable::with_stations(["M1", "M2"]);
        table.rows[0].district = Some("Zhongzheng".to_string());
        table.push_column("bike_station_count_r500m", vec![Some(2.0), Some(0.0)]);
        table.push_column("bike_distance_mean_m_r500m", vec![Some(120.5), None]);
        table.write_csv(&path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("station_id,district,bike_station_count_r500m"));

        let back = FeatureTable::read_csv(&path).unwrap();
        assert_eq!(back, table);
    }

    #[test]
    fn test_write_replaces_existing_file() {
        let dir = Builder::new().prefix("atlas-features-").tempdir().unwrap();
        let path = dir.path().join("station_features.csv");
        fs::write(&path, "station_id,stale\nOLD,1\nOLDER,2\nOLDEST,3\n").unwrap();

        let mut table = FeatureTable::with_stations(["M1"]);
        table.push_column("poi_count_500m", vec![Some(4.0)]);
        table.write_csv(&path).unwrap();

        assert_eq!(FeatureTable::read_csv(&path).unwrap(), table);
        let entries = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }
}
