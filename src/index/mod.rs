use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::Serialize;

use crate::{
    codec,
    error::{Error, Result},
    fs::{IndexDir, IndexFile, OsDir},
    options::{IndexOptions, RebalanceScope, WriteMode},
    tree::SlotTree,
};

#[cfg(test)]
mod metamorphic_test;

/// The username index: a `SlotTree` persisted as a single file in `dir`.
///
/// Nothing is cached. Every call reads the whole file, and every insert
/// rewrites all of it.
#[derive(Debug)]
pub struct NameIndex<D>
where
    D: IndexDir,
{
    dir: D,
    options: IndexOptions,
}

/// A snapshot of the index for display.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct IndexReport {
    pub file: PathBuf,
    pub exists: bool,
    pub slots: Vec<Option<String>>,
    pub keys: usize,
    pub height: usize,
    pub root_balance: isize,
}

impl<D> NameIndex<D>
where
    D: IndexDir,
{
    pub fn new(dir: D, options: IndexOptions) -> Self {
        NameIndex { dir, options }
    }

    pub fn options(&self) -> &IndexOptions {
        &self.options
    }

    pub fn path(&self) -> PathBuf {
        self.dir.path_of(&self.options.file_name)
    }

    fn read(&mut self) -> Result<Option<Vec<u8>>> {
        let path = self.path();
        let file = self
            .dir
            .open(&self.options.file_name)
            .map_err(Error::storage(&path))?;
        match file {
            Some(mut f) => Ok(Some(f.read_all().map_err(Error::storage(&path))?)),
            None => Ok(None),
        }
    }

    /// `None` if the index file doesn't exist yet.
    pub fn load(&mut self) -> Result<Option<SlotTree>> {
        match self.read()? {
            Some(bytes) => {
                let tree = codec::decode(&bytes)?;
                debug!("loaded {} slots from {}", tree.len(), self.path().display());
                Ok(Some(tree))
            }
            None => Ok(None),
        }
    }

    /// Adds `key` to the index. Keys already present are added again; use
    /// `insert_unique` to skip them. Nothing is written if the key would land
    /// at or past `max_slots`.
    pub fn insert(&mut self, key: &str) -> Result<()> {
        codec::validate_key(key)?;

        let mut tree = match self.load()? {
            Some(tree) => tree,
            None => {
                // The slot check still applies to the first key.
                SlotTree::new().insert(key.to_owned(), self.options.max_slots)?;
                info!("creating index {} with {:?}", self.path().display(), key);
                return self.persist(key);
            }
        };

        let index = tree.insert(key.to_owned(), self.options.max_slots)?;
        let rotations = match self.options.rebalance {
            RebalanceScope::Root => usize::from(tree.rebalance(0)),
            RebalanceScope::Path => tree.rebalance_path(index),
        };
        if rotations > 0 {
            warn!(
                "inserting {:?} at slot {} unbalanced the index; {} swap(s) applied",
                key, index, rotations
            );
        }

        self.persist(&codec::encode(&tree))
    }

    /// Inserts `key` unless it's already there. Returns whether it was added.
    pub fn insert_unique(&mut self, key: &str) -> Result<bool> {
        if self.search(key)? {
            return Ok(false);
        }
        self.insert(key)?;
        Ok(true)
    }

    pub fn search(&mut self, key: &str) -> Result<bool> {
        match self.load()? {
            Some(tree) => Ok(tree.contains(key)),
            None => Ok(false),
        }
    }

    pub fn report(&mut self) -> Result<IndexReport> {
        let file = self.path();
        let report = match self.load()? {
            Some(tree) => IndexReport {
                file,
                exists: true,
                keys: tree.keys().count(),
                height: tree.height(0),
                root_balance: tree.balance_factor(0),
                slots: tree.slots().to_vec(),
            },
            None => IndexReport {
                file,
                exists: false,
                slots: Vec::new(),
                keys: 0,
                height: 0,
                root_balance: 0,
            },
        };
        Ok(report)
    }

    fn persist(&mut self, contents: &str) -> Result<()> {
        let name = self.options.file_name.clone();
        match self.options.write_mode {
            WriteMode::InPlace => self.write_file(&name, contents),
            WriteMode::Atomic => {
                let tmp = self.options.tmp_file_name();
                self.write_file(&tmp, contents)?;
                self.dir
                    .rename(&tmp, &name)
                    .map_err(Error::storage(self.dir.path_of(&name)))
            }
        }?;
        debug!("wrote {} bytes to {}", contents.len(), self.path().display());
        Ok(())
    }

    fn write_file(&mut self, name: &str, contents: &str) -> Result<()> {
        let path = self.dir.path_of(&name);
        let mut file = self.dir.create(&name).map_err(Error::storage(&path))?;
        file.write(contents.as_bytes())
            .map_err(Error::storage(&path))?;
        if self.options.sync {
            file.sync().map_err(Error::storage(&path))?;
        }
        Ok(())
    }
}

fn index_at(path: &Path) -> Result<NameIndex<OsDir>> {
    let file_name = path
        .file_name()
        .and_then(|f| f.to_str())
        .ok_or_else(|| Error::Storage {
            path: path.to_owned(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a file path"),
        })?;
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => OsDir::new(p),
        _ => OsDir::new("."),
    };
    Ok(NameIndex::new(
        dir,
        IndexOptions::default().with_file_name(file_name),
    ))
}

/// Adds `name` to the index file at `path`, creating it if needed.
pub fn insert<P>(path: P, name: &str) -> Result<()>
where
    P: AsRef<Path>,
{
    index_at(path.as_ref())?.insert(name)
}

/// Whether `name` is in the index file at `path`. A missing file holds
/// nothing.
pub fn search<P>(path: P, name: &str) -> Result<bool>
where
    P: AsRef<Path>,
{
    index_at(path.as_ref())?.search(name)
}

#[cfg(test)]
mod test {
    use crate::{
        error::Error,
        fs::{IndexDir, MockDir},
        options::{IndexOptions, RebalanceScope, WriteMode},
    };

    use super::NameIndex;

    fn contents(dir: &MockDir, name: &str) -> Option<String> {
        dir.contents(&name)
            .map(|c| String::from_utf8(c).unwrap())
    }

    #[test]
    fn test_bootstrap_writes_bare_key() -> anyhow::Result<()> {
        let dir = MockDir::new();
        let mut index = NameIndex::new(dir.clone(), IndexOptions::default());

        assert!(!index.search("alice")?);
        assert_eq!(None, index.load()?);
        index.insert("alice")?;

        assert_eq!(Some("alice".to_owned()), contents(&dir, "structure.txt"));
        let tree = index.load()?.unwrap();
        assert_eq!(vec!["alice"], tree.keys().collect::<Vec<_>>());
        assert!(index.search("alice")?);

        Ok(())
    }

    #[test]
    fn test_positional_growth() -> anyhow::Result<()> {
        let dir = MockDir::new();
        let mut index = NameIndex::new(dir.clone(), IndexOptions::default());
        for k in ["m", "b", "t"] {
            index.insert(k)?;
        }
        assert_eq!(Some("m,b,t".to_owned()), contents(&dir, "structure.txt"));
        Ok(())
    }

    #[test]
    fn test_root_rotation_swaps_values() -> anyhow::Result<()> {
        let dir = MockDir::new();
        let mut index = NameIndex::new(dir.clone(), IndexOptions::default());
        for k in ["z", "m"] {
            index.insert(k)?;
        }
        assert_eq!(Some("z,m".to_owned()), contents(&dir, "structure.txt"));

        // "b" makes the root lean left by two; the root and its left child
        // trade values and "b" stays where it landed.
        index.insert("b")?;
        assert_eq!(Some("m,z,,b".to_owned()), contents(&dir, "structure.txt"));

        index.insert("a")?;
        assert_eq!(
            Some("z,m,,b,,,,a".to_owned()),
            contents(&dir, "structure.txt")
        );
        for k in ["z", "m", "b", "a"] {
            assert!(index.search(k)?);
        }

        Ok(())
    }

    #[test]
    fn test_duplicates_are_stored_again() -> anyhow::Result<()> {
        let dir = MockDir::new();
        let mut index = NameIndex::new(dir.clone(), IndexOptions::default());
        for k in ["m", "b", "t", "m"] {
            index.insert(k)?;
        }
        assert_eq!(
            Some("m,b,t,,,m".to_owned()),
            contents(&dir, "structure.txt")
        );

        assert!(!index.insert_unique("m")?);
        // "q" lands deep on the right and tips the root: the right child
        // takes its left child's value, then trades with the root.
        assert!(index.insert_unique("q")?);
        assert_eq!(
            Some("m,b,m,,,t,,,,,,,q".to_owned()),
            contents(&dir, "structure.txt")
        );

        Ok(())
    }

    #[test]
    fn test_sorted_inserts_stop_at_max_slots() -> anyhow::Result<()> {
        let dir = MockDir::new();
        let opts = IndexOptions::default().with_max_slots(64);
        let mut index = NameIndex::new(dir.clone(), opts);

        // Each key sorts after everything before it and goes one level
        // deeper: slots 0, 2, 6, 14, 30, 62, then 126.
        let mut n = 0;
        let err = loop {
            match index.insert(&format!("user{:02}", n)) {
                Ok(()) => n += 1,
                Err(e) => break e,
            }
        };
        assert_eq!(6, n);
        assert!(matches!(
            err,
            Error::IndexTooDeep {
                index: 126,
                max_slots: 64
            }
        ));

        let before = contents(&dir, "structure.txt");
        assert_eq!(Some(63), before.as_ref().map(|c| c.split(',').count()));
        (*dir.fs).borrow_mut().take_events();
        assert!(index.insert("user99").is_err());
        assert_eq!(before, contents(&dir, "structure.txt"));
        assert!(!index.search("user06")?);
        assert!(index.search("user05")?);
        assert!((*dir.fs)
            .borrow()
            .iter_events()
            .all(|e| matches!(e, crate::fs::Event::Open(_))));

        // A key that sorts first still fits next to the root.
        index.insert("aaron")?;
        assert!(index.search("aaron")?);

        Ok(())
    }

    #[test]
    fn test_max_slots_covers_bootstrap() {
        let dir = MockDir::new();
        let mut index = NameIndex::new(dir.clone(), IndexOptions::default().with_max_slots(0));
        assert!(matches!(
            index.insert("m"),
            Err(Error::IndexTooDeep { index: 0, .. })
        ));
        assert_eq!(None, contents(&dir, "structure.txt"));
    }

    #[test]
    fn test_search_skips_empty_slots() -> anyhow::Result<()> {
        let dir = MockDir::new();
        dir.put(&"structure.txt", b"m,b,,t");
        let mut index = NameIndex::new(dir, IndexOptions::default());

        assert!(index.search("m")?);
        assert!(!index.search("")?);
        assert!(index.search("t")?);
        assert!(!index.search("x")?);

        Ok(())
    }

    #[test]
    fn test_search_does_not_write() -> anyhow::Result<()> {
        let dir = MockDir::new();
        let mut index = NameIndex::new(dir.clone(), IndexOptions::default());
        index.insert("m")?;
        (*dir.fs).borrow_mut().take_events();

        let first = index.search("m")?;
        let second = index.search("m")?;
        assert_eq!(first, second);

        let events = (*dir.fs).borrow_mut().take_events();
        assert_eq!(2, events.len());
        assert!(events
            .iter()
            .all(|e| matches!(e, crate::fs::Event::Open(_))));

        Ok(())
    }

    #[test]
    fn test_invalid_keys_touch_nothing() -> anyhow::Result<()> {
        let dir = MockDir::new();
        let mut index = NameIndex::new(dir.clone(), IndexOptions::default());

        for bad in ["", "a,b", "line\nbreak"] {
            assert!(matches!(index.insert(bad), Err(Error::InvalidKey(_))));
        }
        assert_eq!(0, (*dir.fs).borrow().iter_events().count());
        assert_eq!(None, contents(&dir, "structure.txt"));

        Ok(())
    }

    #[test]
    fn test_corrupt_file() -> anyhow::Result<()> {
        let dir = MockDir::new();
        dir.put(&"structure.txt", b",orphan");
        let mut index = NameIndex::new(dir.clone(), IndexOptions::default());

        assert!(matches!(
            index.search("orphan"),
            Err(Error::CorruptIndex { .. })
        ));
        assert!(matches!(
            index.insert("x"),
            Err(Error::CorruptIndex { .. })
        ));
        assert_eq!(Some(",orphan".to_owned()), contents(&dir, "structure.txt"));

        Ok(())
    }

    #[test]
    fn test_in_place_crash_truncates() -> anyhow::Result<()> {
        let dir = MockDir::new();
        let mut index = NameIndex::new(dir.clone(), IndexOptions::default());
        index.insert("m")?;

        // The truncating create goes through, the write doesn't.
        (*dir.fs).borrow_mut().schedule_crash(1);
        assert!(matches!(index.insert("b"), Err(Error::Storage { .. })));
        (*dir.fs).borrow_mut().recover();

        assert_eq!(Some("".to_owned()), contents(&dir, "structure.txt"));
        assert!(!index.search("m")?);

        Ok(())
    }

    #[test]
    fn test_atomic_crash_keeps_old_contents() -> anyhow::Result<()> {
        let dir = MockDir::new();
        let opts = IndexOptions::default().with_write_mode(WriteMode::Atomic);
        let mut index = NameIndex::new(dir.clone(), opts);
        index.insert("m")?;
        assert_eq!(None, contents(&dir, "structure.txt.tmp"));

        (*dir.fs).borrow_mut().schedule_crash(1);
        assert!(matches!(index.insert("b"), Err(Error::Storage { .. })));
        (*dir.fs).borrow_mut().recover();

        assert_eq!(Some("m".to_owned()), contents(&dir, "structure.txt"));
        assert!(index.search("m")?);
        assert!(!index.search("b")?);

        index.insert("b")?;
        assert_eq!(Some("m,b".to_owned()), contents(&dir, "structure.txt"));

        Ok(())
    }

    #[test]
    fn test_path_rebalance() -> anyhow::Result<()> {
        let dir = MockDir::new();
        dir.put(&"structure.txt", b"m,c,t,b");
        let opts = IndexOptions::default().with_rebalance(RebalanceScope::Path);
        let mut index = NameIndex::new(dir.clone(), opts);

        index.insert("a")?;
        assert_eq!(
            Some("b,m,t,c,,,,a".to_owned()),
            contents(&dir, "structure.txt")
        );

        // Root-only leaves slot 1 alone and only swaps at the root.
        let dir = MockDir::new();
        dir.put(&"structure.txt", b"m,c,t,b");
        let mut index = NameIndex::new(dir.clone(), IndexOptions::default());
        index.insert("a")?;
        assert_eq!(
            Some("c,m,t,b,,,,a".to_owned()),
            contents(&dir, "structure.txt")
        );

        Ok(())
    }

    #[test]
    fn test_report() -> anyhow::Result<()> {
        let dir = MockDir::new();
        let mut index = NameIndex::new(dir.cd(&"listeners"), IndexOptions::default());

        let empty = index.report()?;
        assert!(!empty.exists);
        assert_eq!(0, empty.keys);

        for k in ["m", "b", "t", "a"] {
            index.insert(k)?;
        }
        let report = index.report()?;
        assert!(report.exists);
        assert_eq!(4, report.keys);
        assert_eq!(3, report.height);
        assert_eq!(1, report.root_balance);
        assert_eq!(
            std::path::PathBuf::from("listeners/structure.txt"),
            report.file
        );

        Ok(())
    }
}
