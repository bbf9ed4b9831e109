use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use nametree::{AccountStore, IndexOptions, Login, NameIndex, OsDir, Role};

#[derive(Parser, Debug)]
#[command(name = "nametree")]
#[command(about = "Manage the username index and accounts of a music app", long_about = None)]
struct Args {
    /// Directory holding the role folders
    #[arg(short = 'r', long, default_value = "users")]
    root: PathBuf,

    /// JSON options file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Role whose index `insert`, `search` and `dump` work on
    #[arg(long, value_enum, default_value_t = RoleArg::Listener)]
    role: RoleArg,

    /// Verbose logging
    #[arg(short = 'v', long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum RoleArg {
    Listener,
    Artist,
}

impl From<RoleArg> for Role {
    fn from(r: RoleArg) -> Role {
        match r {
            RoleArg::Listener => Role::Listener,
            RoleArg::Artist => Role::Artist,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add a name to the index (duplicates are stored again)
    Insert { name: String },
    /// Print whether a name is in the index
    Search { name: String },
    /// Print the index as JSON
    Dump,
    /// Register a user under --role
    Signup { name: String, password: String },
    /// Check a user's password under --role
    Login { name: String, password: String },
    /// Print whether a name is registered under any role
    Exists { name: String },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let options = match &args.config {
        Some(path) => IndexOptions::load(path)?,
        None => IndexOptions::default(),
    };
    log::debug!("options: {:?}", options);

    let role = Role::from(args.role);
    let mut store = AccountStore::new(OsDir::new(&args.root), options);
    let mut index: NameIndex<OsDir> = store.index(role);

    match args.command {
        Command::Insert { name } => {
            index.insert(&name)?;
            log::info!("inserted {:?} into {}", name, index.path().display());
        }
        Command::Search { name } => {
            println!("{}", index.search(&name)?);
        }
        Command::Dump => {
            println!("{}", serde_json::to_string_pretty(&index.report()?)?);
        }
        Command::Signup { name, password } => {
            store.sign_up(role, &name, &password)?;
            println!("Account created for {} under {}", name, role.dir_name());
        }
        Command::Login { name, password } => match store.sign_in(role, &name, &password)? {
            Login::Success => println!("Login successful"),
            Login::UnknownUser => bail!("user {:?} not found", name),
            Login::WrongPassword => bail!("incorrect password for {:?}", name),
        },
        Command::Exists { name } => {
            println!("{}", store.exists(&name)?);
        }
    }

    Ok(())
}
