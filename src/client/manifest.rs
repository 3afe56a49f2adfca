//! Visualization artifacts for a session.
//!
//! The typed manifest from `/api/check_visualization_files` is authoritative.
//! When a server lacks that endpoint, [`VisualizationManifest::from_paths`]
//! classifies the flat `/api/visualize` listing by file name:
//!
//! - room graph: contains `constraints_visualization` and not `table`
//! - constraints table: contains `table`
//! - layout: contains `solution` or `layout`
//!
//! When several paths match a slot the lexicographically greatest wins, so
//! `..._refined_2.png` beats `..._refined_1.png` regardless of listing order.

use serde::{Deserialize, Serialize};

/// Which visualization artifacts exist, keyed by role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisualizationManifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_graph: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints_table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<String>,
}

impl VisualizationManifest {
    pub fn is_empty(&self) -> bool {
        self.room_graph.is_none() && self.constraints_table.is_none() && self.layout.is_none()
    }

    /// Fallback classification of a flat path listing.
    pub fn from_paths(paths: &[String]) -> Self {
        let pick = |pred: &dyn Fn(&str) -> bool| -> Option<String> {
            paths.iter().filter(|p| pred(p)).max().cloned()
        };

        Self {
            room_graph: pick(&|p| p.contains("constraints_visualization") && !p.contains("table")),
            constraints_table: pick(&|p| p.contains("table")),
            layout: pick(&|p| p.contains("solution") || p.contains("layout")),
        }
    }

    /// Rewrite every present path with `f` (e.g. to absolute URLs).
    pub fn map_paths(self, f: impl Fn(&str) -> String) -> Self {
        Self {
            room_graph: self.room_graph.as_deref().map(&f),
            constraints_table: self.constraints_table.as_deref().map(&f),
            layout: self.layout.as_deref().map(&f),
        }
    }
}
