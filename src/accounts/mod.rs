// Per-role user accounts. Each role directory holds the role's name index and
// one folder per user with a plaintext credentials file:
//
//   listeners/structure.txt
//   listeners/alice/credentials.txt   "alice\n<password>\n"

use log::{info, warn};

use crate::{
    codec,
    error::{Error, Result},
    fs::{IndexDir, IndexFile},
    index::NameIndex,
    options::IndexOptions,
};

pub const CREDENTIALS_FILE: &str = "credentials.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Listener,
    Artist,
}

impl Role {
    pub const ALL: [Role; 2] = [Role::Listener, Role::Artist];

    pub fn dir_name(&self) -> &'static str {
        match self {
            Role::Listener => "listeners",
            Role::Artist => "artists",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Login {
    Success,
    UnknownUser,
    WrongPassword,
}

#[derive(Debug)]
pub struct AccountStore<D>
where
    D: IndexDir,
{
    base: D,
    options: IndexOptions,
}

impl<D> AccountStore<D>
where
    D: IndexDir,
{
    pub fn new(base: D, options: IndexOptions) -> Self {
        AccountStore { base, options }
    }

    pub fn index(&self, role: Role) -> NameIndex<D> {
        NameIndex::new(self.base.cd(&role.dir_name()), self.options.clone())
    }

    fn user_dir(&self, role: Role, name: &str) -> D {
        self.base.cd(&role.dir_name()).cd(&name)
    }

    /// Registers `name` under `role`. The credentials file is written before
    /// the name is indexed, so a failed signup never leaves an indexed name
    /// without credentials and can simply be retried.
    pub fn sign_up(&mut self, role: Role, name: &str, password: &str) -> Result<()> {
        // The name doubles as a folder name.
        if name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(Error::InvalidKey(name.to_owned()));
        }
        codec::validate_key(name)?;

        let mut index = self.index(role);
        if index.search(name)? {
            return Err(Error::UserExists(name.to_owned()));
        }

        let mut dir = self.user_dir(role, name);
        let path = dir.path_of(&CREDENTIALS_FILE);
        let mut file = dir
            .create(&CREDENTIALS_FILE)
            .map_err(Error::storage(&path))?;
        file.write(format!("{}\n{}\n", name, password).as_bytes())
            .map_err(Error::storage(&path))?;

        index.insert(name)?;

        info!("signed up {} {:?}", role.dir_name(), name);
        Ok(())
    }

    pub fn sign_in(&mut self, role: Role, name: &str, password: &str) -> Result<Login> {
        if !self.index(role).search(name)? {
            warn!("login for unknown {} {:?}", role.dir_name(), name);
            return Ok(Login::UnknownUser);
        }

        let mut dir = self.user_dir(role, name);
        let path = dir.path_of(&CREDENTIALS_FILE);
        let contents = match dir.open(&CREDENTIALS_FILE).map_err(Error::storage(&path))? {
            Some(mut f) => f.read_all().map_err(Error::storage(&path))?,
            None => {
                warn!("{:?} is indexed but has no credentials", name);
                return Ok(Login::UnknownUser);
            }
        };

        let contents = String::from_utf8_lossy(&contents);
        match contents.lines().nth(1) {
            Some(stored) if stored.trim() == password => Ok(Login::Success),
            _ => {
                warn!("wrong password for {} {:?}", role.dir_name(), name);
                Ok(Login::WrongPassword)
            }
        }
    }

    /// Whether `name` is registered under any role.
    pub fn exists(&mut self, name: &str) -> Result<bool> {
        for role in Role::ALL {
            if self.index(role).search(name)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
