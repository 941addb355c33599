//! Access to a job's solver result set.
//!
//! The solver's binary result database is only reachable through the
//! vendor's own scripting API, so the pipeline consumes a JSON export of
//! it: steps → frames (time + field values per region) and history
//! regions → outputs → `[time, value]` samples.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ExtractError;

/// Node set of a part instance, keyed as `instance.node_set` in exports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub instance: String,
    pub node_set: String,
}

impl Region {
    pub fn key(&self) -> String {
        format!("{}.{}", self.instance, self.node_set)
    }
}

pub trait ResultSet {
    /// Time of every output frame of `step`, in frame order.
    fn frame_times(&self, step: &str) -> Result<Vec<f64>, ExtractError>;

    /// One component of a field at the first node of `region`.
    fn field_component(
        &self,
        step: &str,
        frame: usize,
        field: &str,
        region: &Region,
        component: usize,
    ) -> Result<f64, ExtractError>;

    /// `(time, value)` samples of a history output.
    fn history(&self, step: &str, region: &str, output: &str) -> Result<Vec<(f64, f64)>, ExtractError>;
}

pub trait ResultStore: Sync {
    fn open(&self, job: &str) -> Result<Box<dyn ResultSet>, ExtractError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrameExport {
    pub time: f64,
    /// field → region key → components
    #[serde(default)]
    pub fields: BTreeMap<String, BTreeMap<String, Vec<f64>>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepExport {
    pub frames: Vec<FrameExport>,
    /// history region → output → samples
    #[serde(default)]
    pub history_regions: BTreeMap<String, BTreeMap<String, Vec<[f64; 2]>>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultExport {
    pub steps: BTreeMap<String, StepExport>,
}

impl ResultExport {
    fn step(&self, step: &str) -> Result<&StepExport, ExtractError> {
        self.steps
            .get(step)
            .ok_or_else(|| ExtractError::MissingStep(step.to_string()))
    }
}

impl ResultSet for ResultExport {
    fn frame_times(&self, step: &str) -> Result<Vec<f64>, ExtractError> {
        Ok(self.step(step)?.frames.iter().map(|f| f.time).collect())
    }

    fn field_component(
        &self,
        step: &str,
        frame: usize,
        field: &str,
        region: &Region,
        component: usize,
    ) -> Result<f64, ExtractError> {
        let key = region.key();
        self.step(step)?
            .frames
            .get(frame)
            .and_then(|f| f.fields.get(field))
            .and_then(|regions| regions.get(&key))
            .and_then(|values| values.get(component))
            .copied()
            .ok_or_else(|| ExtractError::MissingField {
                field: field.to_string(),
                region: key.clone(),
                component,
                frame,
            })
    }

    fn history(&self, step: &str, region: &str, output: &str) -> Result<Vec<(f64, f64)>, ExtractError> {
        self.step(step)?
            .history_regions
            .get(region)
            .and_then(|outputs| outputs.get(output))
            .map(|samples| samples.iter().map(|s| (s[0], s[1])).collect())
            .ok_or_else(|| ExtractError::MissingHistory {
                region: region.to_string(),
                output: output.to_string(),
            })
    }
}

/// Reads `<dir>/<job>.<extension>` exports.
pub struct JsonResultStore {
    dir: PathBuf,
    extension: String,
}

impl JsonResultStore {
    pub fn new(dir: &Path, extension: &str) -> Self {
        Self {
            dir: dir.to_path_buf(),
            extension: extension.to_string(),
        }
    }

    pub fn path(&self, job: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", job, self.extension))
    }
}

impl ResultStore for JsonResultStore {
    fn open(&self, job: &str) -> Result<Box<dyn ResultSet>, ExtractError> {
        let path = self.path(job);
        if !path.exists() {
            return Err(ExtractError::MissingExport { path });
        }
        let text = fs::read_to_string(&path).map_err(|source| ExtractError::Io { path: path.clone(), source })?;
        let export: ResultExport =
            serde_json::from_str(&text).map_err(|source| ExtractError::Decode { path, source })?;
        Ok(Box::new(export))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const EXPORT: &str = r#"{
      "steps": {
        "Step-1": {
          "frames": [
            {"time": 0.0, "fields": {"U": {"PART-1-1.SPHERE": [0.0, 0.0, 0.0]}}},
            {"time": 0.5, "fields": {"U": {"PART-1-1.SPHERE": [0.0, -0.02, 0.0]}}}
          ],
          "history_regions": {
            "NodeSet  Z000001": {"CAREA    SURF/RSURF": [[0.0, 0.0], [0.5, 0.7]]}
          }
        }
      }
    }"#;

    fn region() -> Region {
        Region { instance: "PART-1-1".to_string(), node_set: "SPHERE".to_string() }
    }

    #[test]
    fn test_json_store_reads_export() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("Job-0001.json"), EXPORT).unwrap();
        let store = JsonResultStore::new(dir.path(), "json");

        let rs = store.open("Job-0001").unwrap();
        assert_eq!(rs.frame_times("Step-1").unwrap(), vec![0.0, 0.5]);
        assert_eq!(rs.field_component("Step-1", 1, "U", &region(), 1).unwrap(), -0.02);
        assert_eq!(
            rs.history("Step-1", "NodeSet  Z000001", "CAREA    SURF/RSURF").unwrap(),
            vec![(0.0, 0.0), (0.5, 0.7)]
        );
    }

    #[test]
    fn test_missing_pieces_are_typed_errors() {
        let export: ResultExport = serde_json::from_str(EXPORT).unwrap();
        assert!(matches!(export.frame_times("Step-2"), Err(ExtractError::MissingStep(_))));
        assert!(matches!(
            export.field_component("Step-1", 0, "RF", &region(), 1),
            Err(ExtractError::MissingField { .. })
        ));
        assert!(matches!(
            export.field_component("Step-1", 0, "U", &region(), 7),
            Err(ExtractError::MissingField { .. })
        ));
        assert!(matches!(
            export.history("Step-1", "NodeSet  Z000001", "CPRESS"),
            Err(ExtractError::MissingHistory { .. })
        ));
    }

    #[test]
    fn test_missing_and_corrupt_exports() {
        let dir = TempDir::new().unwrap();
        let store = JsonResultStore::new(dir.path(), "json");
        assert!(matches!(store.open("Job-0009"), Err(ExtractError::MissingExport { .. })));

        std::fs::write(dir.path().join("Job-0010.json"), "{ not json").unwrap();
        assert!(matches!(store.open("Job-0010"), Err(ExtractError::Decode { .. })));
    }
}
