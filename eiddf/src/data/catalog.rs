use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use eidcore::error::CoreError;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};

use crate::data::shard::{ShardFile, ShardRead};
use crate::error::{DataError, DataResult};

/// Column whose length defines the number of events of a shard
pub const REFERENCE_FIELD: &str = "eventNumber";

fn default_regions() -> Vec<String> {
    vec!["0.0-1.3".to_string(), "1.3-1.6".to_string(), "1.6-2.5".to_string()]
}

fn default_prefix() -> String {
    "e-ID_".to_string()
}

fn default_extension() -> String {
    ".db".to_string()
}

/// Where the shard files live.
///
/// With `input_dir` set, every matching file of `input_path/input_dir` is used.
/// Otherwise the sorted file lists of the `regions` sub-directories are
/// interleaved file by file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default)]
    pub input_path: PathBuf,
    #[serde(default)]
    pub input_dir: Option<String>,
    #[serde(default = "default_regions")]
    pub regions: Vec<String>,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default = "default_extension")]
    pub extension: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        CatalogConfig {
            input_path: PathBuf::new(),
            input_dir: None,
            regions: default_regions(),
            prefix: default_prefix(),
            extension: default_extension(),
        }
    }
}

fn list_shards(folder: &Path, prefix: &str, extension: &str) -> DataResult<Vec<PathBuf>> {
    let entries = std::fs::read_dir(folder).map_err(|e| {
        CoreError::Configuration(format!("cannot read shard directory {}: {}", folder.display(), e))
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| DataError::io(folder, e))?.path();
        let matches = path
            .file_name()
            .and_then(|name| name.to_str())
            .map_or(false, |name| name.starts_with(prefix) && name.ends_with(extension));
        if matches && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Ordered list of shard files described by the configuration.
pub fn discover(config: &CatalogConfig) -> DataResult<Vec<PathBuf>> {
    let files = match &config.input_dir {
        Some(dir) => list_shards(&config.input_path.join(dir), &config.prefix, &config.extension)?,
        None => {
            let lists = config
                .regions
                .iter()
                .map(|region| list_shards(&config.input_path.join(region), &config.prefix, &config.extension))
                .collect::<DataResult<Vec<_>>>()?;
            let n_groups = lists.iter().map(|l| l.len()).min().unwrap_or(0);
            if lists.iter().any(|l| l.len() != n_groups) {
                log::warn!("region directories hold unequal file counts, keeping {} files per region", n_groups);
            }
            (0..n_groups)
                .flat_map(|i| lists.iter().map(move |l| l[i].clone()))
                .collect()
        }
    };

    if files.is_empty() {
        return Err(CoreError::Configuration(format!(
            "no `{}*{}` shard found under {}",
            config.prefix,
            config.extension,
            config.input_path.display()
        ))
        .into());
    }
    Ok(files)
}

/// Number of events of a shard, from column metadata only
pub fn event_count(path: &Path) -> DataResult<usize> {
    let shard = ShardFile::open(path)?;
    shard.field_len(REFERENCE_FIELD).ok_or_else(|| {
        CoreError::SchemaMismatch(format!("{} has no `{}` column", path.display(), REFERENCE_FIELD)).into()
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShardDescriptor {
    pub id: usize,
    pub path: PathBuf,
    pub n_events: usize,
}

/// Immutable, ordered view of every shard and its event count
#[derive(Debug, Clone, PartialEq)]
pub struct ShardCatalog {
    shards: Vec<ShardDescriptor>,
    offsets: Vec<usize>,
}

impl ShardCatalog {
    /// Build a catalog from shard paths, counting events on `num_threads` threads.
    ///
    /// # Arguments
    ///
    /// * `paths` - shard files in catalog order
    /// * `num_threads` - size of the counting pool
    ///
    /// # Returns
    ///
    /// * `ShardCatalog` - descriptors in the given order with global offsets
    ///
    pub fn from_paths(paths: Vec<PathBuf>, num_threads: usize) -> DataResult<Self> {
        if paths.is_empty() {
            return Err(CoreError::Configuration("a catalog needs at least one shard".to_string()).into());
        }

        let pool = ThreadPoolBuilder::new().num_threads(num_threads.max(1)).build()?;
        let counts: Vec<usize> = pool.install(|| {
            paths
                .par_iter()
                .map(|path| event_count(path))
                .collect::<DataResult<Vec<_>>>()
        })?;

        let shards: Vec<ShardDescriptor> = paths
            .into_iter()
            .zip(counts)
            .enumerate()
            .map(|(id, (path, n_events))| ShardDescriptor { id, path, n_events })
            .collect();

        let mut offsets = Vec::with_capacity(shards.len() + 1);
        offsets.push(0);
        for shard in &shards {
            offsets.push(offsets[offsets.len() - 1] + shard.n_events);
        }

        let catalog = ShardCatalog { shards, offsets };
        log::info!("catalog of {} shards, {} events", catalog.len(), catalog.total_events());
        Ok(catalog)
    }

    pub fn from_config(config: &CatalogConfig, num_threads: usize) -> DataResult<Self> {
        ShardCatalog::from_paths(discover(config)?, num_threads)
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    pub fn shards(&self) -> &[ShardDescriptor] {
        &self.shards
    }

    pub fn get(&self, id: usize) -> Option<&ShardDescriptor> {
        self.shards.get(id)
    }

    pub fn lengths(&self) -> Vec<usize> {
        self.shards.iter().map(|s| s.n_events).collect()
    }

    pub fn total_events(&self) -> usize {
        self.offsets[self.offsets.len() - 1]
    }

    /// Global index of the first event of shard `id`
    pub fn offset(&self, id: usize) -> Option<usize> {
        (id < self.shards.len()).then(|| self.offsets[id])
    }

    /// Shard id and local row of a global event index
    pub fn locate(&self, global: usize) -> Option<(usize, usize)> {
        if global >= self.total_events() {
            return None;
        }
        let id = self.offsets.partition_point(|&offset| offset <= global) - 1;
        Some((id, global - self.offsets[id]))
    }

    pub fn open(&self, id: usize) -> DataResult<ShardFile> {
        let shard = self.shards.get(id).ok_or(CoreError::Index {
            lo: id,
            hi: id + 1,
            total: self.shards.len(),
        })?;
        ShardFile::open(&shard.path)
    }

    /// Every field name found in any shard, sorted
    pub fn field_names_union(&self) -> DataResult<Vec<String>> {
        let mut names = BTreeSet::new();
        for id in 0..self.shards.len() {
            names.extend(self.open(id)?.field_names());
        }
        Ok(names.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locate_skips_empty_shards() {
        let catalog = ShardCatalog {
            shards: vec![
                ShardDescriptor { id: 0, path: PathBuf::from("a"), n_events: 3 },
                ShardDescriptor { id: 1, path: PathBuf::from("b"), n_events: 0 },
                ShardDescriptor { id: 2, path: PathBuf::from("c"), n_events: 2 },
            ],
            offsets: vec![0, 3, 3, 5],
        };
        assert_eq!(catalog.locate(0), Some((0, 0)));
        assert_eq!(catalog.locate(2), Some((0, 2)));
        assert_eq!(catalog.locate(3), Some((2, 0)));
        assert_eq!(catalog.locate(5), None);
        assert_eq!(catalog.offset(2), Some(3));
        assert_eq!(catalog.offset(3), None);
    }

    #[test]
    fn test_discover_unreadable_directory() {
        let config = CatalogConfig {
            input_path: PathBuf::from("/nonexistent/shards"),
            input_dir: Some("x".to_string()),
            ..CatalogConfig::default()
        };
        assert!(matches!(discover(&config), Err(DataError::Core(CoreError::Configuration(_)))));
    }

    #[test]
    fn test_empty_catalog_is_rejected() {
        assert!(ShardCatalog::from_paths(Vec::new(), 1).is_err());
    }
}
