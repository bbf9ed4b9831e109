use std::{
    cell::RefCell,
    collections::HashMap,
    fs::{self, File, OpenOptions},
    io::{self, Read, Write},
    path::{Path, PathBuf},
    rc::Rc,
};

pub trait IndexFile: std::fmt::Debug {
    fn write(&mut self, buf: &[u8]) -> io::Result<()>;
    fn sync(&mut self) -> io::Result<()>;
    fn read_all(&mut self) -> io::Result<Vec<u8>>;
}

/// A directory the index and account files live in. Paths are relative to it.
pub trait IndexDir: Clone + std::fmt::Debug {
    type File: IndexFile;

    fn cd<P>(&self, dir_name: &P) -> Self
    where
        P: AsRef<Path>;

    /// Where `fname` lives, for error messages.
    fn path_of<P>(&self, fname: &P) -> PathBuf
    where
        P: AsRef<Path>;

    /// Creates `fname`, truncating it if it exists.
    fn create<P>(&mut self, fname: &P) -> io::Result<Self::File>
    where
        P: AsRef<Path>;

    /// `None` if there is no such file.
    fn open<P>(&mut self, fname: &P) -> io::Result<Option<Self::File>>
    where
        P: AsRef<Path>;

    fn rename<P, Q>(&mut self, from: &P, to: &Q) -> io::Result<()>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>;
}

// Real implementation

#[derive(Debug)]
pub struct OsFile {
    file: File,
}

impl IndexFile for OsFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        self.file.write_all(buf)?;
        self.file.flush()
    }

    fn sync(&mut self) -> io::Result<()> {
        self.file.sync_all()
    }

    fn read_all(&mut self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.file.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

#[derive(Clone, Debug)]
pub struct OsDir {
    root: PathBuf,
}

impl OsDir {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        OsDir { root: root.into() }
    }
}

impl IndexDir for OsDir {
    type File = OsFile;

    fn cd<P>(&self, dir_name: &P) -> Self
    where
        P: AsRef<Path>,
    {
        OsDir {
            root: self.root.join(dir_name),
        }
    }

    fn path_of<P>(&self, fname: &P) -> PathBuf
    where
        P: AsRef<Path>,
    {
        self.root.join(fname)
    }

    fn create<P>(&mut self, fname: &P) -> io::Result<OsFile>
    where
        P: AsRef<Path>,
    {
        let path = self.path_of(fname);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .create(true)
            .open(&path)?;
        Ok(OsFile { file })
    }

    fn open<P>(&mut self, fname: &P) -> io::Result<Option<OsFile>>
    where
        P: AsRef<Path>,
    {
        match File::open(self.path_of(fname)) {
            Ok(file) => Ok(Some(OsFile { file })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn rename<P, Q>(&mut self, from: &P, to: &Q) -> io::Result<()>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        fs::rename(self.path_of(from), self.path_of(to))
    }
}

// Mock Implementation

type FileId = usize;

#[derive(Clone, Debug)]
pub struct MockFile {
    pub file_id: FileId,
    fs: Rc<RefCell<MockFs>>,
}

impl IndexFile for MockFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        (*self.fs).borrow_mut().write(self.file_id, buf)
    }

    fn sync(&mut self) -> io::Result<()> {
        (*self.fs).borrow_mut().sync(self.file_id)
    }

    fn read_all(&mut self) -> io::Result<Vec<u8>> {
        Ok((*self.fs).borrow().data[self.file_id].clone())
    }
}

#[derive(Clone, Debug)]
pub struct MockDir {
    pub fs: Rc<RefCell<MockFs>>,
    prefix: Vec<String>,
}

impl MockDir {
    pub fn new() -> Self {
        MockDir {
            fs: Rc::new(RefCell::new(MockFs::new())),
            prefix: Vec::new(),
        }
    }

    fn full_path<P>(&self, p: &P) -> String
    where
        P: AsRef<Path>,
    {
        self.prefix
            .iter()
            .cloned()
            .chain(
                p.as_ref()
                    .iter()
                    .map(|s| s.to_string_lossy().into_owned()),
            )
            .collect::<Vec<_>>()
            .join("/")
    }

    /// The current contents of `fname`, bypassing the event trace.
    pub fn contents<P>(&self, fname: &P) -> Option<Vec<u8>>
    where
        P: AsRef<Path>,
    {
        let fs = (*self.fs).borrow();
        let contents = fs
            .names
            .get(&self.full_path(fname))
            .map(|id| fs.data[*id].clone());
        contents
    }

    /// Writes `fname` without going through the event trace or crash
    /// accounting.
    pub fn put<P>(&self, fname: &P, contents: &[u8])
    where
        P: AsRef<Path>,
    {
        let path = self.full_path(fname);
        let mut fs = (*self.fs).borrow_mut();
        let id = fs.id_for(path);
        fs.data[id] = contents.to_vec();
    }
}

impl IndexDir for MockDir {
    type File = MockFile;

    fn cd<P>(&self, dir_name: &P) -> Self
    where
        P: AsRef<Path>,
    {
        MockDir {
            fs: self.fs.clone(),
            prefix: self
                .prefix
                .iter()
                .cloned()
                .chain(
                    dir_name
                        .as_ref()
                        .iter()
                        .map(|s| s.to_string_lossy().into_owned()),
                )
                .collect(),
        }
    }

    fn path_of<P>(&self, fname: &P) -> PathBuf
    where
        P: AsRef<Path>,
    {
        PathBuf::from(self.full_path(fname))
    }

    fn create<P>(&mut self, fname: &P) -> io::Result<MockFile>
    where
        P: AsRef<Path>,
    {
        let file_id = (*self.fs).borrow_mut().create(self.full_path(fname))?;
        Ok(MockFile {
            fs: self.fs.clone(),
            file_id,
        })
    }

    fn open<P>(&mut self, fname: &P) -> io::Result<Option<MockFile>>
    where
        P: AsRef<Path>,
    {
        Ok((*self.fs)
            .borrow_mut()
            .open(self.full_path(fname))
            .map(|file_id| MockFile {
                fs: self.fs.clone(),
                file_id,
            }))
    }

    fn rename<P, Q>(&mut self, from: &P, to: &Q) -> io::Result<()>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        (*self.fs)
            .borrow_mut()
            .rename(self.full_path(from), self.full_path(to))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Create(String, FileId),
    Write(FileId, Vec<u8>),
    Sync(FileId),
    Rename(String, String),
    Open(String),
}

impl Event {
    pub fn write_abbrev<W: std::fmt::Write>(&self, w: &mut W) -> std::fmt::Result {
        match self {
            Event::Create(name, file_id) => write!(w, "Create({}, {})", name, file_id),
            Event::Write(file_id, contents) => write!(
                w,
                "Write({}, {:?})",
                file_id,
                String::from_utf8_lossy(contents)
            ),
            Event::Sync(file_id) => write!(w, "Sync({})", file_id),
            Event::Rename(from, to) => write!(w, "Rename({}, {})", from, to),
            Event::Open(name) => write!(w, "Open({})", name),
        }
    }
}

#[derive(Debug)]
pub struct MockFs {
    names: HashMap<String, FileId>,
    data: Vec<Vec<u8>>,
    events: Vec<Event>,

    // After this many mutating operations, "crash" the FS: every create,
    // write, sync and rename fails until `recover` is called. Whatever was
    // already written stays.
    time_to_crash: Option<usize>,
}

impl MockFs {
    fn new() -> Self {
        MockFs {
            names: HashMap::new(),
            data: Vec::new(),
            events: Vec::new(),
            time_to_crash: None,
        }
    }

    pub fn schedule_crash(&mut self, ops: usize) {
        self.time_to_crash = Some(ops);
    }

    pub fn recover(&mut self) {
        self.time_to_crash = None;
    }

    fn perform_op(&mut self) -> io::Result<()> {
        match self.time_to_crash {
            Some(0) => Err(io::Error::new(
                io::ErrorKind::Other,
                "filesystem is down",
            )),
            Some(x) => {
                self.time_to_crash = Some(x - 1);
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn record(&mut self, e: Event) {
        self.events.push(e);
    }

    pub fn iter_events(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    fn id_for(&mut self, path: String) -> FileId {
        match self.names.get(&path) {
            Some(id) => *id,
            None => {
                let id = self.data.len();
                self.data.push(Vec::new());
                self.names.insert(path, id);
                id
            }
        }
    }

    fn create(&mut self, path: String) -> io::Result<FileId> {
        self.perform_op()?;

        let id = self.id_for(path.clone());
        self.data[id].clear();
        self.record(Event::Create(path, id));
        Ok(id)
    }

    fn open(&mut self, path: String) -> Option<FileId> {
        let id = self.names.get(&path).cloned();
        self.record(Event::Open(path));
        id
    }

    fn rename(&mut self, from: String, to: String) -> io::Result<()> {
        self.perform_op()?;

        self.record(Event::Rename(from.clone(), to.clone()));
        match self.names.remove(&from) {
            Some(id) => {
                self.names.insert(to, id);
                Ok(())
            }
            None => Err(io::Error::new(io::ErrorKind::NotFound, from)),
        }
    }

    fn write(&mut self, file: FileId, buf: &[u8]) -> io::Result<()> {
        self.perform_op()?;

        self.data[file].extend_from_slice(buf);
        self.record(Event::Write(file, buf.to_vec()));
        Ok(())
    }

    fn sync(&mut self, file: FileId) -> io::Result<()> {
        self.perform_op()?;

        self.record(Event::Sync(file));
        Ok(())
    }
}

#[test]
fn test_mock_file() -> anyhow::Result<()> {
    let mut dir = MockDir::new();

    assert!(dir.open(&"a")?.is_none());

    let mut a = dir.create(&"a")?;
    a.write(&[1, 2])?;
    a.write(&[3, 4])?;
    assert_eq!(vec![1, 2, 3, 4], dir.open(&"a")?.unwrap().read_all()?);

    // Creating again truncates but keeps the id.
    let b = dir.create(&"a")?;
    assert_eq!(a.file_id, b.file_id);
    assert_eq!(Some(vec![]), dir.contents(&"a"));

    Ok(())
}

#[test]
fn test_mock_rename_replaces_target() -> anyhow::Result<()> {
    let mut dir = MockDir::new();
    dir.put(&"target", b"old");
    dir.create(&"tmp")?.write(b"new")?;
    dir.rename(&"tmp", &"target")?;

    assert_eq!(Some(b"new".to_vec()), dir.contents(&"target"));
    assert_eq!(None, dir.contents(&"tmp"));
    assert!(dir.rename(&"tmp", &"target").is_err());

    Ok(())
}

#[test]
fn test_mock_crash() -> anyhow::Result<()> {
    let mut dir = MockDir::new();
    (*dir.fs).borrow_mut().schedule_crash(1);

    let mut f = dir.create(&"a")?;
    assert!(f.write(b"lost").is_err());
    assert!(dir.create(&"b").is_err());
    assert_eq!(Some(vec![]), dir.contents(&"a"));

    (*dir.fs).borrow_mut().recover();
    f.write(b"kept")?;
    assert_eq!(Some(b"kept".to_vec()), dir.contents(&"a"));

    Ok(())
}

#[test]
fn test_mock_cd() -> anyhow::Result<()> {
    let mut dir = MockDir::new();
    let mut sub = dir.cd(&"listeners").cd(&"alice");
    sub.create(&"credentials.txt")?.write(b"x")?;

    assert_eq!(
        PathBuf::from("listeners/alice/credentials.txt"),
        sub.path_of(&"credentials.txt")
    );
    assert!(dir.open(&"listeners/alice/credentials.txt")?.is_some());

    let events: Vec<Event> = (*dir.fs).borrow().iter_events().cloned().collect();
    assert_eq!(
        Event::Create("listeners/alice/credentials.txt".to_owned(), 0),
        events[0]
    );

    Ok(())
}

#[test]
fn test_os_dir() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut dir = OsDir::new(tmp.path());

    assert!(dir.open(&"nested/x")?.is_none());
    dir.create(&"nested/x")?.write(b"hello")?;
    dir.rename(&"nested/x", &"nested/y")?;
    assert!(dir.open(&"nested/x")?.is_none());
    assert_eq!(b"hello".to_vec(), dir.open(&"nested/y")?.unwrap().read_all()?);

    Ok(())
}
