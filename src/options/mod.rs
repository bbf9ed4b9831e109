use std::{fs, io, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_FILE_NAME: &str = "structure.txt";

/// Keys inserted in sorted order each land one level deeper, doubling the
/// file. This stops that at about 4 MB of commas.
pub const DEFAULT_MAX_SLOTS: usize = 1 << 22;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Truncate the index file and write it again. A failure partway through
    /// leaves a truncated file behind.
    #[default]
    InPlace,
    /// Write a sibling temp file and rename it over the index.
    Atomic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RebalanceScope {
    /// Only the root is checked after an insert.
    #[default]
    Root,
    /// Every slot on the path from the new key's parent up to the root.
    Path,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexOptions {
    pub file_name: String,
    pub write_mode: WriteMode,
    pub rebalance: RebalanceScope,
    /// fsync after every write of the index.
    pub sync: bool,
    /// Inserts that would need a slot at or past this fail with
    /// `Error::IndexTooDeep`.
    pub max_slots: usize,
}

impl Default for IndexOptions {
    fn default() -> Self {
        IndexOptions {
            file_name: DEFAULT_FILE_NAME.to_owned(),
            write_mode: WriteMode::default(),
            rebalance: RebalanceScope::default(),
            sync: false,
            max_slots: DEFAULT_MAX_SLOTS,
        }
    }
}

impl IndexOptions {
    /// Reads options from a JSON file. Missing files and missing fields fall
    /// back to the defaults.
    pub fn load<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).map_err(|source| Error::Config {
                path: path.to_owned(),
                source,
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(Error::storage(path)(e)),
        }
    }

    pub fn with_file_name<S: Into<String>>(mut self, file_name: S) -> Self {
        self.file_name = file_name.into();
        self
    }

    pub fn with_write_mode(mut self, write_mode: WriteMode) -> Self {
        self.write_mode = write_mode;
        self
    }

    pub fn with_rebalance(mut self, rebalance: RebalanceScope) -> Self {
        self.rebalance = rebalance;
        self
    }

    pub fn with_sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    pub fn with_max_slots(mut self, max_slots: usize) -> Self {
        self.max_slots = max_slots;
        self
    }

    pub(crate) fn tmp_file_name(&self) -> String {
        format!("{}.tmp", self.file_name)
    }
}

#[test]
fn test_load_partial() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("options.json");
    fs::write(
        &path,
        r#"{"write_mode": "atomic", "sync": true, "max_slots": 1024}"#,
    )?;

    let opts = IndexOptions::load(&path)?;
    assert_eq!(
        IndexOptions::default()
            .with_write_mode(WriteMode::Atomic)
            .with_sync(true)
            .with_max_slots(1024),
        opts
    );
    assert_eq!(DEFAULT_MAX_SLOTS, IndexOptions::default().max_slots);
    assert_eq!("structure.txt.tmp", opts.tmp_file_name());

    Ok(())
}

#[test]
fn test_load_missing_and_bad() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;

    let opts = IndexOptions::load(dir.path().join("nope.json"))?;
    assert_eq!(IndexOptions::default(), opts);

    let bad = dir.path().join("bad.json");
    fs::write(&bad, r#"{"rebalance": "sideways"}"#)?;
    assert!(matches!(
        IndexOptions::load(&bad),
        Err(Error::Config { .. })
    ));

    Ok(())
}
