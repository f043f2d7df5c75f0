//! Tolerance levels and the selection state used by screenshot checks.
//!
//! The catalog is a JSON asset:
//!
//! ```json
//! { "toleranceLevels": [ { "name": "Level A", "threshold": 0.0, "filterImperceptibleDiffs": false } ] }
//! ```
//!
//! Levels are kept sorted by ascending threshold. Thresholds must be strictly
//! increasing once sorted; names must be unique and non-empty.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Label of the first override choice
pub const SCRIPT_CONTROLLED_LABEL: &str = "[Script-controlled]";

/// Result type for catalog operations
pub type ToleranceResult<T> = Result<T, ToleranceError>;

/// Errors raised while loading a catalog or selecting a level
#[derive(Debug, thiserror::Error)]
pub enum ToleranceError {
    #[error("failed to read tolerance catalog '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse tolerance catalog: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("tolerance level {index} has an empty name")]
    EmptyName { index: usize },

    #[error("tolerance level '{0}' is defined more than once")]
    DuplicateName(String),

    #[error("tolerance level '{name}' has invalid threshold {threshold}")]
    InvalidThreshold { name: String, threshold: f32 },

    #[error("tolerance levels '{lower}' and '{upper}' share threshold {threshold}")]
    ThresholdNotIncreasing {
        lower: String,
        upper: String,
        threshold: f32,
    },

    #[error("ImageComparisonToleranceLevel '{0}' not found.")]
    UnknownLevel(String),
}

/// A named (threshold, perceptual filter) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToleranceLevel {
    pub name: String,
    pub threshold: f32,
    #[serde(default)]
    pub filter_imperceptible_diffs: bool,
}

impl ToleranceLevel {
    pub fn new(name: impl Into<String>, threshold: f32, filter_imperceptible_diffs: bool) -> Self {
        Self {
            name: name.into(),
            threshold,
            filter_imperceptible_diffs,
        }
    }
}

impl Default for ToleranceLevel {
    fn default() -> Self {
        Self::new("", 0.0, false)
    }
}

impl fmt::Display for ToleranceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' (threshold {:.6}{})",
            self.name,
            self.threshold,
            if self.filter_imperceptible_diffs { ", filtered" } else { "" }
        )
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct CatalogFile {
    tolerance_levels: Vec<ToleranceLevel>,
}

/// A validated, threshold-ordered list of tolerance levels
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToleranceCatalog {
    levels: Vec<ToleranceLevel>,
}

impl ToleranceCatalog {
    /// Validate and sort a list of levels
    pub fn from_levels(mut levels: Vec<ToleranceLevel>) -> ToleranceResult<Self> {
        for (index, level) in levels.iter().enumerate() {
            if level.name.trim().is_empty() {
                return Err(ToleranceError::EmptyName { index });
            }
            if !level.threshold.is_finite() || level.threshold < 0.0 {
                return Err(ToleranceError::InvalidThreshold {
                    name: level.name.clone(),
                    threshold: level.threshold,
                });
            }
            if levels[..index].iter().any(|other| other.name == level.name) {
                return Err(ToleranceError::DuplicateName(level.name.clone()));
            }
        }

        levels.sort_by(|a, b| a.threshold.total_cmp(&b.threshold));

        for pair in levels.windows(2) {
            let (lower, upper) = (&pair[0], &pair[1]);
            if upper.threshold <= lower.threshold {
                return Err(ToleranceError::ThresholdNotIncreasing {
                    lower: lower.name.clone(),
                    upper: upper.name.clone(),
                    threshold: upper.threshold,
                });
            }
            if lower.filter_imperceptible_diffs && !upper.filter_imperceptible_diffs {
                warn!(
                    lower = %lower.name,
                    upper = %upper.name,
                    "filterImperceptibleDiffs decreases between tolerance levels"
                );
            }
        }

        Ok(Self { levels })
    }

    /// Parse a catalog from JSON text
    pub fn from_json(json: &str) -> ToleranceResult<Self> {
        let file: CatalogFile = serde_json::from_str(json)?;
        Self::from_levels(file.tolerance_levels)
    }

    /// Load a catalog file
    pub fn load(path: &Path) -> ToleranceResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|source| ToleranceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let catalog = Self::from_json(&json)?;
        debug!(path = %path.display(), levels = catalog.len(), "loaded tolerance catalog");
        Ok(catalog)
    }

    /// Serialize back to the asset format
    pub fn to_json(&self) -> ToleranceResult<String> {
        let file = CatalogFile {
            tolerance_levels: self.levels.clone(),
        };
        Ok(serde_json::to_string_pretty(&file)?)
    }

    pub fn levels(&self) -> &[ToleranceLevel] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ToleranceLevel> {
        self.levels.iter().find(|level| level.name == name)
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.levels.iter().position(|level| level.name == name)
    }
}

/// The strictest level that would accept `diff_score`.
///
/// A level qualifies when it filters at least as much as requested and its
/// threshold is not below the score.
pub fn find_best_tolerance_level(
    levels: &[ToleranceLevel],
    diff_score: f32,
    filter_imperceptible_diffs: bool,
) -> Option<&ToleranceLevel> {
    levels.iter().find(|level| {
        filter_imperceptible_diffs <= level.filter_imperceptible_diffs
            && diff_score <= level.threshold
    })
}

/// Tolerance selection: script-controlled or a fixed override, plus an
/// adjustment applied to script-controlled lookups
#[derive(Debug, Clone, Default)]
pub struct ToleranceOptions {
    catalog: ToleranceCatalog,
    override_options: Vec<String>,
    /// 0 is script-controlled, otherwise 1 + catalog index
    selected_override: usize,
    adjustment: i32,
    current: Option<usize>,
}

impl ToleranceOptions {
    pub fn new(catalog: ToleranceCatalog) -> Self {
        let mut options = Self::default();
        options.reload(catalog);
        options
    }

    /// Replace the catalog.
    ///
    /// An override survives the reload when a level with the same name still
    /// exists; otherwise selection falls back to script-controlled.
    pub fn reload(&mut self, catalog: ToleranceCatalog) {
        let previous_override = self.selected_override_name().map(str::to_string);

        self.override_options = std::iter::once(SCRIPT_CONTROLLED_LABEL.to_string())
            .chain(catalog.levels().iter().map(|level| level.name.clone()))
            .collect();
        self.catalog = catalog;
        self.current = None;
        self.selected_override = 0;

        if let Some(index) = previous_override.and_then(|name| self.catalog.index_of(&name)) {
            self.select_override(index + 1);
        }
    }

    pub fn catalog(&self) -> &ToleranceCatalog {
        &self.catalog
    }

    pub fn available_levels(&self) -> &[ToleranceLevel] {
        self.catalog.levels()
    }

    /// `"[Script-controlled]"` followed by every level name
    pub fn override_options(&self) -> &[String] {
        &self.override_options
    }

    pub fn selected_override(&self) -> usize {
        self.selected_override
    }

    fn selected_override_name(&self) -> Option<&str> {
        if self.selected_override == 0 {
            return None;
        }
        self.override_options
            .get(self.selected_override)
            .map(String::as_str)
    }

    /// Pick an override choice; out-of-range choices are ignored
    pub fn select_override(&mut self, choice: usize) {
        if choice >= self.override_options.len() {
            return;
        }
        self.selected_override = choice;
        self.current = choice.checked_sub(1);
    }

    pub fn adjustment(&self) -> i32 {
        self.adjustment
    }

    pub fn set_adjustment(&mut self, adjustment: i32) {
        self.adjustment = adjustment;
    }

    pub fn is_script_controlled(&self) -> bool {
        self.selected_override == 0
    }

    pub fn is_level_adjusted(&self) -> bool {
        self.adjustment != 0
    }

    /// Restore script-controlled selection with no adjustment
    pub fn reset(&mut self) {
        self.current = None;
        self.selected_override = 0;
        self.adjustment = 0;
    }

    /// Find a level by name, shifted by the adjustment and clamped when
    /// `allow_adjustment` is set
    pub fn find_tolerance_level(&self, name: &str, allow_adjustment: bool) -> Option<&ToleranceLevel> {
        self.find_index(name, allow_adjustment)
            .and_then(|index| self.catalog.levels().get(index))
    }

    fn find_index(&self, name: &str, allow_adjustment: bool) -> Option<usize> {
        let index = self.catalog.index_of(name)?;
        if !allow_adjustment {
            return Some(index);
        }
        let last = self.catalog.len() as i64 - 1;
        let adjusted = (index as i64 + i64::from(self.adjustment)).clamp(0, last);
        Some(adjusted as usize)
    }

    /// Select a level for the next screenshot check.
    ///
    /// Ignored unless script-controlled. An unknown name leaves the current
    /// selection untouched and is returned as an error for the caller to report.
    pub fn select_tolerance_level(&mut self, name: &str, allow_adjustment: bool) -> ToleranceResult<()> {
        if !self.is_script_controlled() {
            return Ok(());
        }
        match self.find_index(name, allow_adjustment) {
            Some(index) => {
                self.current = Some(index);
                Ok(())
            }
            None => Err(ToleranceError::UnknownLevel(name.to_string())),
        }
    }

    /// Forget the selected level (script-controlled mode only)
    pub fn clear_selection(&mut self) {
        if self.is_script_controlled() {
            self.current = None;
        }
    }

    pub fn current_level(&self) -> Option<&ToleranceLevel> {
        self.current.and_then(|index| self.catalog.levels().get(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn sample_catalog() -> ToleranceCatalog {
        ToleranceCatalog::from_json(
            r#"{ "toleranceLevels": [
                { "name": "Zero", "threshold": 0.0, "filterImperceptibleDiffs": false },
                { "name": "Minor", "threshold": 0.01, "filterImperceptibleDiffs": true },
                { "name": "Moderate", "threshold": 0.05, "filterImperceptibleDiffs": true },
                { "name": "Severe", "threshold": 0.2, "filterImperceptibleDiffs": true }
            ] }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_catalog_sorts_by_threshold() {
        let catalog = ToleranceCatalog::from_json(
            r#"{ "toleranceLevels": [
                { "name": "Low", "threshold": 5.0, "filterImperceptibleDiffs": false },
                { "name": "High", "threshold": 1.0, "filterImperceptibleDiffs": true }
            ] }"#,
        )
        .unwrap();
        let names: Vec<&str> = catalog.levels().iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["High", "Low"]);

        let levels = catalog.levels();
        assert_eq!(find_best_tolerance_level(levels, 0.5, true).unwrap().name, "High");
        assert_eq!(find_best_tolerance_level(levels, 3.0, false).unwrap().name, "Low");
        assert!(find_best_tolerance_level(levels, 10.0, false).is_none());
        assert!(find_best_tolerance_level(levels, 10.0, true).is_none());
    }

    #[test]
    fn test_catalog_validation() {
        let dup = vec![ToleranceLevel::new("A", 0.1, false), ToleranceLevel::new("A", 0.2, false)];
        assert!(matches!(
            ToleranceCatalog::from_levels(dup),
            Err(ToleranceError::DuplicateName(name)) if name == "A"
        ));

        let equal = vec![ToleranceLevel::new("A", 0.1, false), ToleranceLevel::new("B", 0.1, false)];
        assert!(matches!(
            ToleranceCatalog::from_levels(equal),
            Err(ToleranceError::ThresholdNotIncreasing { .. })
        ));

        let negative = vec![ToleranceLevel::new("A", -1.0, false)];
        assert!(matches!(
            ToleranceCatalog::from_levels(negative),
            Err(ToleranceError::InvalidThreshold { .. })
        ));

        let nan = vec![ToleranceLevel::new("A", f32::NAN, false)];
        assert!(ToleranceCatalog::from_levels(nan).is_err());

        let unnamed = vec![ToleranceLevel::new(" ", 0.1, false)];
        assert!(matches!(
            ToleranceCatalog::from_levels(unnamed),
            Err(ToleranceError::EmptyName { index: 0 })
        ));

        assert!(matches!(
            ToleranceCatalog::from_json("{ not json"),
            Err(ToleranceError::Parse(_))
        ));
    }

    #[test]
    fn test_level_display() {
        assert_eq!(
            ToleranceLevel::new("Level E", 0.04, true).to_string(),
            "'Level E' (threshold 0.040000, filtered)"
        );
        assert_eq!(
            ToleranceLevel::new("Zero", 0.0, false).to_string(),
            "'Zero' (threshold 0.000000)"
        );
    }

    #[test]
    fn test_override_options_list() {
        let options = ToleranceOptions::new(sample_catalog());
        assert_eq!(
            options.override_options(),
            &["[Script-controlled]", "Zero", "Minor", "Moderate", "Severe"]
        );
        assert!(options.is_script_controlled());
        assert!(options.current_level().is_none());
    }

    #[test]
    fn test_adjustment_is_clamped() {
        let mut options = ToleranceOptions::new(sample_catalog());
        options.set_adjustment(1);
        assert_eq!(options.find_tolerance_level("Minor", true).unwrap().name, "Moderate");
        assert_eq!(options.find_tolerance_level("Minor", false).unwrap().name, "Minor");
        assert_eq!(options.find_tolerance_level("Severe", true).unwrap().name, "Severe");

        options.set_adjustment(-10);
        assert_eq!(options.find_tolerance_level("Moderate", true).unwrap().name, "Zero");
        assert!(options.is_level_adjusted());
    }

    #[test]
    fn test_select_only_when_script_controlled() {
        let mut options = ToleranceOptions::new(sample_catalog());
        options.select_tolerance_level("Minor", true).unwrap();
        assert_eq!(options.current_level().unwrap().name, "Minor");

        let err = options.select_tolerance_level("Missing", true).unwrap_err();
        assert_eq!(err.to_string(), "ImageComparisonToleranceLevel 'Missing' not found.");
        assert_eq!(options.current_level().unwrap().name, "Minor");

        options.select_override(4);
        assert_eq!(options.current_level().unwrap().name, "Severe");
        options.select_tolerance_level("Zero", false).unwrap();
        assert_eq!(options.current_level().unwrap().name, "Severe");
        options.clear_selection();
        assert_eq!(options.current_level().unwrap().name, "Severe");

        options.reset();
        assert!(options.is_script_controlled());
        assert!(options.current_level().is_none());
    }

    #[test]
    fn test_reload_keeps_override_by_name() {
        let mut options = ToleranceOptions::new(sample_catalog());
        options.select_override(3);
        assert_eq!(options.current_level().unwrap().name, "Moderate");

        let smaller = ToleranceCatalog::from_levels(vec![
            ToleranceLevel::new("Moderate", 0.05, true),
            ToleranceLevel::new("Severe", 0.2, true),
        ])
        .unwrap();
        options.reload(smaller);
        assert_eq!(options.selected_override(), 1);
        assert_eq!(options.current_level().unwrap().name, "Moderate");

        let unrelated =
            ToleranceCatalog::from_levels(vec![ToleranceLevel::new("Other", 0.3, false)]).unwrap();
        options.reload(unrelated);
        assert!(options.is_script_controlled());
    }

    #[test]
    fn test_json_roundtrip_keeps_field_names() {
        let json = sample_catalog().to_json().unwrap();
        assert!(json.contains("\"toleranceLevels\""));
        assert!(json.contains("\"filterImperceptibleDiffs\""));
        assert_eq!(ToleranceCatalog::from_json(&json).unwrap(), sample_catalog());
    }

    fn arb_catalog() -> impl Strategy<Value = ToleranceCatalog> {
        proptest::collection::btree_set(0u32..10_000, 1..8).prop_flat_map(|thresholds| {
            let n = thresholds.len();
            proptest::collection::vec(any::<bool>(), n).prop_map(move |filters| {
                let levels = thresholds
                    .iter()
                    .zip(filters)
                    .enumerate()
                    .map(|(i, (t, f))| ToleranceLevel::new(format!("L{i}"), *t as f32 / 1000.0, f))
                    .collect();
                ToleranceCatalog::from_levels(levels).unwrap()
            })
        })
    }

    proptest! {
        #[test]
        fn prop_best_level_is_monotonic(
            catalog in arb_catalog(),
            a in 0.0f32..12.0,
            b in 0.0f32..12.0,
            filtered in any::<bool>(),
        ) {
            let (low, high) = if a <= b { (a, b) } else { (b, a) };
            let levels = catalog.levels();
            let for_low = find_best_tolerance_level(levels, low, filtered);
            let for_high = find_best_tolerance_level(levels, high, filtered);
            if let (Some(l), Some(h)) = (for_low, for_high) {
                prop_assert!(h.threshold >= l.threshold);
            }
            if for_low.is_none() {
                prop_assert!(for_high.is_none());
            }
        }
    }
}
