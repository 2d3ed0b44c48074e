use crate::assets::Panorama;
use glam::Vec3;
use std::collections::HashMap;
use std::path::Path;

const BUILTIN_TABLE: &str = include_str!("../../config/sun_calibration.json");

#[derive(Debug, thiserror::Error)]
pub enum CalibrationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("calibration entry {index} has neither a preset name nor a digest")]
    MissingKey { index: usize },
    #[error("calibration entry {index} has a zero or non-finite direction")]
    InvalidDirection { index: usize },
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CalibrationEntry {
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default)]
    pub digest: Option<String>,
    pub direction: [f32; 3],
}

/// Hand-measured sun directions that take precedence over panorama
/// sampling, keyed by preset name or by panorama content digest.
#[derive(Debug, Clone, Default)]
pub struct CalibrationTable {
    by_preset: HashMap<String, Vec3>,
    by_digest: HashMap<String, Vec3>,
}

impl CalibrationTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Table shipped with the binary. A broken embedded file is logged and
    /// yields an empty table.
    pub fn builtin() -> Self {
        match Self::from_json(BUILTIN_TABLE) {
            Ok(table) => table,
            Err(err) => {
                log::error!("Built-in sun calibration table is invalid: {}", err);
                Self::empty()
            }
        }
    }

    pub fn load(path: &Path) -> Result<Self, CalibrationError> {
        let json = std::fs::read_to_string(path)?;
        let table = Self::from_json(&json)?;
        log::info!(
            "Loaded {} calibration entries from {}",
            table.len(),
            path.display()
        );
        Ok(table)
    }

    pub fn from_json(json: &str) -> Result<Self, CalibrationError> {
        let entries: Vec<CalibrationEntry> = serde_json::from_str(json)?;
        let mut table = Self::empty();
        for (index, entry) in entries.into_iter().enumerate() {
            let direction = Vec3::from(entry.direction);
            if !direction.is_finite() || direction.length_squared() < 1e-12 {
                return Err(CalibrationError::InvalidDirection { index });
            }
            let direction = direction.normalize();
            if entry.preset.is_none() && entry.digest.is_none() {
                return Err(CalibrationError::MissingKey { index });
            }
            if let Some(preset) = entry.preset {
                table.by_preset.insert(preset, direction);
            }
            if let Some(digest) = entry.digest {
                table.by_digest.insert(digest.to_ascii_lowercase(), direction);
            }
        }
        Ok(table)
    }

    /// Entries from `other` replace entries with the same key.
    pub fn merge(&mut self, other: CalibrationTable) {
        self.by_preset.extend(other.by_preset);
        self.by_digest.extend(other.by_digest);
    }

    pub fn len(&self) -> usize {
        self.by_preset.len() + self.by_digest.len()
    }

    pub fn lookup(&self, preset: Option<&str>, panorama: &Panorama) -> Option<Vec3> {
        if let Some(direction) = preset.and_then(|name| self.by_preset.get(name)) {
            return Some(*direction);
        }
        if self.by_digest.is_empty() {
            return None;
        }
        self.by_digest.get(panorama.id().as_str()).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::{CalibrationError, CalibrationTable};
    use crate::assets::Panorama;
    use glam::Vec3;

    #[test]
    fn builtin_table_parses() {
        assert_eq!(CalibrationTable::builtin().len(), 5);
    }

    #[test]
    fn directions_are_normalized() {
        let table =
            CalibrationTable::from_json(r#"[{ "preset": "a", "direction": [0.0, 3.0, 4.0] }]"#)
                .unwrap();
        let panorama = Panorama::new(1, 1, vec![[0.0; 3]]).unwrap();
        let direction = table.lookup(Some("a"), &panorama).unwrap();
        assert!((direction.length() - 1.0).abs() < 1e-6);
        assert!((direction - Vec3::new(0.0, 0.6, 0.8)).length() < 1e-6);
    }

    #[test]
    fn digest_entries_match_identical_content() {
        let panorama = Panorama::new(2, 1, vec![[1.0, 2.0, 3.0], [0.0; 3]]).unwrap();
        let json = format!(
            r#"[{{ "digest": "{}", "direction": [1.0, 0.0, 0.0] }}]"#,
            panorama.id().as_str().to_ascii_uppercase()
        );
        let table = CalibrationTable::from_json(&json).unwrap();
        assert_eq!(table.lookup(None, &panorama), Some(Vec3::X));
        let other = Panorama::new(2, 1, vec![[0.0; 3], [1.0, 2.0, 3.0]]).unwrap();
        assert_eq!(table.lookup(None, &other), None);
    }

    #[test]
    fn invalid_entries_are_rejected() {
        assert!(matches!(
            CalibrationTable::from_json(r#"[{ "preset": "a", "direction": [0.0, 0.0, 0.0] }]"#),
            Err(CalibrationError::InvalidDirection { index: 0 })
        ));
        assert!(matches!(
            CalibrationTable::from_json(r#"[{ "direction": [0.0, 1.0, 0.0] }]"#),
            Err(CalibrationError::MissingKey { index: 0 })
        ));
    }

    #[test]
    fn merge_overrides_existing_presets() {
        let mut table =
            CalibrationTable::from_json(r#"[{ "preset": "a", "direction": [0.0, 1.0, 0.0] }]"#)
                .unwrap();
        table.merge(
            CalibrationTable::from_json(r#"[{ "preset": "a", "direction": [1.0, 0.0, 0.0] }]"#)
                .unwrap(),
        );
        let panorama = Panorama::new(1, 1, vec![[0.0; 3]]).unwrap();
        assert_eq!(table.lookup(Some("a"), &panorama), Some(Vec3::X));
    }
}
