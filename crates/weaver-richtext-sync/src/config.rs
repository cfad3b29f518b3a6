//! Controller configuration.

use serde::{Deserialize, Serialize};
use weaver_richtext::Prop;

use crate::error::{Result, SyncError};

/// Settings for a [`SyncController`](crate::SyncController).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    /// Path of the text field inside the replicated document.
    pub text_path: Vec<Prop>,

    /// After a local edit, compare the editor tree with a rebuild from the
    /// replica's spans and repair it when they differ.
    pub verify_after_local: bool,

    /// Same check for trees updated from remote patches.
    pub verify_remote: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            text_path: vec![Prop::from("text")],
            verify_after_local: true,
            verify_remote: true,
        }
    }
}

impl SyncConfig {
    /// Parses a JSON configuration. Missing fields take their defaults.
    pub fn from_json(src: &str) -> Result<Self> {
        serde_json::from_str(src).map_err(|e| SyncError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config = SyncConfig::from_json(r#"{"textPath":["note",0,"body"],"verifyRemote":false}"#)
            .unwrap();
        assert_eq!(
            config.text_path,
            vec![Prop::from("note"), Prop::Index(0), Prop::from("body")]
        );
        assert!(config.verify_after_local);
        assert!(!config.verify_remote);

        assert_eq!(SyncConfig::from_json("{}").unwrap(), SyncConfig::default());
    }

    #[test]
    fn test_bad_json() {
        assert!(matches!(
            SyncConfig::from_json(r#"{"textPath": 3}"#),
            Err(SyncError::Config(_))
        ));
    }
}
