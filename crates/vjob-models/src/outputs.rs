//! Deterministic layout of transcoded outputs in object storage.
//!
//! A raw upload such as `raw/a.mp4` is transcoded into an HLS ladder under
//! `output/a/`. Everything here is a pure function of the input key so the
//! same input always yields the same output map.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Renditions produced for every input.
pub const DEFAULT_RENDITIONS: &[&str] = &["1080p", "720p", "480p"];

/// Name of the master playlist entry in an output map.
pub const MASTER_PLAYLIST: &str = "master";

/// Object storage layout for inputs and outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLayout {
    /// Prefix under which raw uploads live (e.g. `raw/`)
    pub input_prefix: String,
    /// Prefix under which output namespaces are written (e.g. `output/`)
    pub output_prefix: String,
    /// Rendition names, one playlist per rendition
    pub renditions: Vec<String>,
}

impl Default for OutputLayout {
    fn default() -> Self {
        Self {
            input_prefix: "raw/".to_string(),
            output_prefix: "output/".to_string(),
            renditions: DEFAULT_RENDITIONS.iter().map(|r| r.to_string()).collect(),
        }
    }
}

impl OutputLayout {
    /// Create a layout with custom prefixes and the default renditions.
    pub fn new(input_prefix: impl Into<String>, output_prefix: impl Into<String>) -> Self {
        Self {
            input_prefix: with_trailing_slash(input_prefix.into()),
            output_prefix: with_trailing_slash(output_prefix.into()),
            ..Default::default()
        }
    }

    /// Output namespace for an input key: the file stem of its last segment.
    ///
    /// `raw/a.mp4` -> `a`, `uploads/2024/show.final.mov` -> `show.final`.
    pub fn namespace_for(&self, input_ref: &str) -> String {
        let file_name = input_ref
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(input_ref);

        match file_name.rfind('.') {
            Some(idx) if idx > 0 => file_name[..idx].to_string(),
            _ => file_name.to_string(),
        }
    }

    /// Prefix of the output namespace for an input key (`output/a/`).
    pub fn output_dir_for(&self, input_ref: &str) -> String {
        format!("{}{}/", self.output_prefix, self.namespace_for(input_ref))
    }

    /// Named artifact locations for a completed input.
    pub fn outputs_for(&self, input_ref: &str) -> BTreeMap<String, String> {
        let dir = self.output_dir_for(input_ref);
        let mut outputs = BTreeMap::new();
        outputs.insert(MASTER_PLAYLIST.to_string(), format!("{}master.m3u8", dir));
        for rendition in &self.renditions {
            outputs.insert(rendition.clone(), format!("{}{}/index.m3u8", dir, rendition));
        }
        outputs
    }

    /// Plausible input key for an output namespace found without a job.
    pub fn reconstruct_input_ref(&self, namespace: &str) -> String {
        format!("{}{}.mp4", self.input_prefix, namespace)
    }

    /// Extract the namespace from a listed common prefix (`output/xyz/` -> `xyz`).
    ///
    /// Returns `None` for prefixes outside the output prefix or empty namespaces.
    pub fn namespace_from_prefix(&self, common_prefix: &str) -> Option<String> {
        let rest = common_prefix.strip_prefix(&self.output_prefix)?;
        let namespace = rest.trim_end_matches('/');
        if namespace.is_empty() || namespace.contains('/') {
            return None;
        }
        Some(namespace.to_string())
    }
}

fn with_trailing_slash(mut prefix: String) -> String {
    if !prefix.is_empty() && !prefix.ends_with('/') {
        prefix.push('/');
    }
    prefix
}
