//! Virtual path to storage key translation.

use crate::path::{ROOT, SEPARATOR};

#[derive(Debug, Clone, Default)]
pub struct KeyTranslator {
    media_root_basename: Option<String>,
}

impl KeyTranslator {
    pub fn new(media_root_basename: Option<String>) -> Self {
        Self {
            media_root_basename: media_root_basename.filter(|b| !b.is_empty()),
        }
    }

    /// Storage key for a canonical virtual path.
    ///
    /// When the media-root basename occurs as a segment, everything up to and
    /// including its first occurrence is dropped so keys stay relative to the
    /// media directory however deep it is nested on disk.
    pub fn to_key(&self, virtual_path: &str) -> String {
        if virtual_path.is_empty() || virtual_path == ROOT {
            return String::new();
        }
        let stripped = virtual_path.trim_start_matches(SEPARATOR);

        let Some(ref basename) = self.media_root_basename else {
            return stripped.to_string();
        };
        let segments: Vec<&str> = stripped.split(SEPARATOR).collect();
        match segments.iter().position(|s| *s == basename.as_str()) {
            Some(idx) => segments[idx + 1..].join("/"),
            None => stripped.to_string(),
        }
    }

    /// Virtual path for a storage key; a trailing marker is kept.
    pub fn to_virtual(&self, key: &str) -> String {
        format!("/{}", key.trim_start_matches(SEPARATOR))
    }
}

/// Listing entry name as the protocol layer expects it: directories carry a
/// trailing separator.
pub fn entry_name(name: &str, is_dir: bool) -> String {
    let name = name.trim_end_matches(SEPARATOR);
    if is_dir {
        format!("{}/", name)
    } else {
        name.to_string()
    }
}

/// The `/`-terminated marker key of a directory key.
pub fn dir_marker(key: &str) -> String {
    if key.is_empty() || key.ends_with(SEPARATOR) {
        key.to_string()
    } else {
        format!("{}/", key)
    }
}
