//! Known subgenre taxonomy
//!
//! A compact built-in list covers the catalog's common subgenres. A
//! taxonomy file (one subgenre per line, `#` comments allowed) replaces it
//! entirely when configured.

use crate::error::{PipelineError, PipelineResult};
use std::collections::HashMap;
use std::path::Path;

const BUILTIN_SUBGENRES: &[&str] = &[
    "2000s Dance",
    "2000s Indie Rock",
    "2000s Pop",
    "2000s Pop Punk",
    "2010s Indie Pop",
    "2010s Pop",
    "2020s Indie Pop",
    "2020s Pop",
    "80s Pop",
    "90s Dance",
    "90s Hip-Hop",
    "Afro Nu-Disco",
    "Alternative R&B",
    "Ambient",
    "Arena Rock",
    "Classic Rock",
    "Country",
    "Deep House",
    "Disco Classics",
    "Disco Edits",
    "EDM Classics",
    "Folk",
    "Funk & Soul Classics",
    "Hip-Hop Instrumental",
    "Indie Electronica",
    "Indie Pop",
    "Indie Soft Pop",
    "Jazz & Piano",
    "Jazz Standards",
    "Latin Pop",
    "Lounge/Chill Out",
    "Modern Dance",
    "Modern Funk",
    "Modern Soul",
    "Neo Soul",
    "Nu-Disco",
    "Pop Dance",
    "Reggae",
    "Refined Covers",
    "Soft Rock",
];

/// Closed set of valid subgenre names, matched case-insensitively
#[derive(Debug, Clone)]
pub struct Taxonomy {
    /// Canonical names in display order
    names: Vec<String>,
    /// Lowercased name → index into `names`
    lookup: HashMap<String, usize>,
}

impl Taxonomy {
    pub fn builtin() -> Self {
        Self::from_names(BUILTIN_SUBGENRES.iter().map(|s| s.to_string()))
    }

    /// Load a taxonomy file (one subgenre per line)
    pub fn from_file(path: &Path) -> PipelineResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let taxonomy = Self::from_names(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_string),
        );

        if taxonomy.is_empty() {
            return Err(PipelineError::Input(format!(
                "Taxonomy file {} lists no subgenres",
                path.display()
            )));
        }

        tracing::info!(path = %path.display(), subgenres = taxonomy.len(), "Loaded taxonomy file");
        Ok(taxonomy)
    }

    /// Built-in taxonomy unless a file is configured
    pub fn load(path: Option<&Path>) -> PipelineResult<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::builtin()),
        }
    }

    fn from_names(names: impl IntoIterator<Item = String>) -> Self {
        let mut taxonomy = Self {
            names: Vec::new(),
            lookup: HashMap::new(),
        };
        for name in names {
            let key = name.trim().to_lowercase();
            if !taxonomy.lookup.contains_key(&key) {
                taxonomy.lookup.insert(key, taxonomy.names.len());
                taxonomy.names.push(name.trim().to_string());
            }
        }
        taxonomy
    }

    /// Canonical spelling of `name`, if it is a known subgenre
    pub fn canonical(&self, name: &str) -> Option<&str> {
        self.lookup
            .get(&name.trim().to_lowercase())
            .map(|&i| self.names[i].as_str())
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Default for Taxonomy {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_builtin_lookup_is_case_insensitive() {
        let taxonomy = Taxonomy::builtin();
        assert_eq!(taxonomy.canonical("indie pop"), Some("Indie Pop"));
        assert_eq!(taxonomy.canonical(" JAZZ STANDARDS "), Some("Jazz Standards"));
        assert_eq!(taxonomy.canonical("Space Polka"), None);
    }

    #[test]
    fn test_file_replaces_builtin_and_dedupes() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("taxonomy.txt");
        std::fs::write(&path, "# house styles\nDeep House\n\ndeep house\nAcid House\n").unwrap();

        let taxonomy = Taxonomy::from_file(&path).unwrap();
        assert_eq!(taxonomy.names(), ["Deep House", "Acid House"]);
        assert!(taxonomy.canonical("Indie Pop").is_none());
    }

    #[test]
    fn test_empty_file_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("taxonomy.txt");
        std::fs::write(&path, "# nothing here\n").unwrap();

        assert!(matches!(Taxonomy::from_file(&path), Err(PipelineError::Input(_))));
    }
}
