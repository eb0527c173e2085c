use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_hw::Camera;
use rollcall_store::Store;
use serde_json::json;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance database and camera tool")]
struct Cli {
    /// Database path (default: $ROLLCALL_DB_PATH or $XDG_DATA_HOME/rollcall/face_recognition.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Print JSON instead of a table
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered users
    Users,
    /// List attendance records, newest first
    Attendance,
    /// Delete users and their attendance history
    Delete {
        /// Names to delete
        #[arg(required = true)]
        names: Vec<String>,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// List V4L2 capture devices
    Devices,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match cli.command {
        Commands::Users => list_users(&open_store(cli.db)?, &mut out, cli.json)?,
        Commands::Attendance => list_attendance(&open_store(cli.db)?, &mut out, cli.json)?,
        Commands::Delete { names, yes } => {
            let store = open_store(cli.db)?;
            let stdin = io::stdin();
            delete_users(&store, &names, yes, &mut stdin.lock(), &mut out)?;
        }
        Commands::Devices => list_devices(&mut out, cli.json)?,
    }

    Ok(())
}

fn default_db_path() -> PathBuf {
    if let Ok(path) = std::env::var("ROLLCALL_DB_PATH") {
        return PathBuf::from(path);
    }
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall/face_recognition.db")
}

fn open_store(db: Option<PathBuf>) -> Result<Store> {
    let path = db.unwrap_or_else(default_db_path);
    Store::open_existing(&path).with_context(|| format!("opening {}", path.display()))
}

fn list_users(store: &Store, out: &mut impl Write, as_json: bool) -> Result<()> {
    let users = store.load_identities()?;

    if as_json {
        let rows: Vec<_> = users
            .iter()
            .map(|u| json!({ "name": u.name, "age": u.age, "email": u.email, "dim": u.encoding.len() }))
            .collect();
        writeln!(out, "{}", serde_json::to_string_pretty(&rows)?)?;
        return Ok(());
    }

    if users.is_empty() {
        writeln!(out, "No users in the database yet.")?;
        return Ok(());
    }
    writeln!(out, "{:<20} {:<5}  Email", "Name", "Age")?;
    writeln!(out, "{}", "-".repeat(60))?;
    for user in &users {
        writeln!(out, "{:<20} {:<5}  {}", user.name, user.age, user.email)?;
    }
    Ok(())
}

fn list_attendance(store: &Store, out: &mut impl Write, as_json: bool) -> Result<()> {
    let rows = store.list_attendance()?;

    if as_json {
        let rows: Vec<_> = rows
            .iter()
            .map(|r| json!({ "name": r.name, "timestamp": r.timestamp }))
            .collect();
        writeln!(out, "{}", serde_json::to_string_pretty(&rows)?)?;
        return Ok(());
    }

    if rows.is_empty() {
        writeln!(out, "No attendance records yet.")?;
        return Ok(());
    }
    writeln!(out, "{:<20}  Name", "Timestamp")?;
    writeln!(out, "{}", "-".repeat(40))?;
    for row in &rows {
        writeln!(out, "{:<20}  {}", row.timestamp, row.name)?;
    }
    Ok(())
}

fn delete_users(
    store: &Store,
    names: &[String],
    yes: bool,
    input: &mut impl BufRead,
    out: &mut impl Write,
) -> Result<()> {
    if !yes {
        writeln!(out, "You are about to delete the following user(s):")?;
        for name in names {
            writeln!(out, "  - {name}")?;
        }
        write!(out, "Proceed? [y/N] ")?;
        out.flush()?;

        let mut answer = String::new();
        input.read_line(&mut answer)?;
        if !matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes") {
            writeln!(out, "Aborted.")?;
            return Ok(());
        }
    }

    let removed = store.delete_identities(names)?;
    tracing::info!(requested = names.len(), removed, "users deleted");
    writeln!(out, "Deleted {removed} user(s).")?;
    Ok(())
}

fn list_devices(out: &mut impl Write, as_json: bool) -> Result<()> {
    let devices = Camera::list_devices();

    if as_json {
        let rows: Vec<_> = devices
            .iter()
            .map(|d| json!({ "path": d.path, "name": d.name, "driver": d.driver, "bus": d.bus }))
            .collect();
        writeln!(out, "{}", serde_json::to_string_pretty(&rows)?)?;
        return Ok(());
    }

    if devices.is_empty() {
        writeln!(out, "No V4L2 capture devices found.")?;
        return Ok(());
    }
    for d in &devices {
        writeln!(out, "{:<14} {} ({}, {})", d.path, d.name, d.driver, d.bus)?;
    }
    Ok(())
}
