use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rosterlock_core::audit::AuditLog;
use rosterlock_core::backup::{ArtifactStatus, BackupCoordinator, RestoreReport};
use rosterlock_core::cipher::FieldCipher;
use rosterlock_core::keystore::KeyStore;
use rosterlock_core::paths::DataPaths;
use rosterlock_core::store::{MemberStore, MemberUpdate, NewMember};
use rosterlock_core::Error;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rosterlock")]
#[command(about = "Encrypted membership administration", long_about = None)]
struct Cli {
    /// Administrator name recorded in the audit trail
    #[arg(long, global = true, default_value = "system")]
    actor: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the key pair, generating and persisting one if absent
    InitKeys,

    /// Member administration
    #[command(subcommand)]
    Member(MemberCmd),

    /// Audit log inspection
    #[command(subcommand)]
    Log(LogCmd),

    /// Backup and restore of the data store and audit artifacts
    #[command(subcommand)]
    Backup(BackupCmd),
}

#[derive(Subcommand)]
enum MemberCmd {
    /// Register a new member
    Add {
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        #[arg(long)]
        age: u32,
        #[arg(long)]
        gender: String,
        #[arg(long)]
        weight: f64,
        #[arg(long)]
        address: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        phone: String,
    },
    /// Search members by decrypted name, address, email, phone or membership id
    Search { term: String },
    /// Update contact fields of an existing member
    Update {
        membership_id: String,
        #[arg(long)]
        address: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        weight: Option<f64>,
    },
    /// Remove a member by membership id
    Delete { membership_id: String },
}

#[derive(Subcommand)]
enum LogCmd {
    /// Decrypt and display the audit log
    View {
        /// Only records flagged suspicious
        #[arg(long)]
        suspicious: bool,
        /// Machine-readable output
        #[arg(long)]
        json: bool,
    },
    /// Write the decrypted log table to a file
    Export {
        /// Destination path (defaults to logs_export.csv in the data dir)
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum BackupCmd {
    /// Snapshot the database and audit artifacts into a zip archive
    Create,
    /// Restore a named archive from the backup directory
    Restore { archive: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let paths = DataPaths::resolve()?;
    paths.ensure_root()?;
    init_tracing(&paths)?;

    match cli.command {
        Commands::InitKeys => init_keys(&paths),
        Commands::Member(cmd) => member_command(&paths, &cli.actor, cmd),
        Commands::Log(cmd) => log_command(&paths, &cli.actor, cmd),
        Commands::Backup(cmd) => backup_command(&paths, &cli.actor, cmd),
    }
}

/// Human output on stderr, plus a plaintext process log in the data dir
/// (one of the artifacts every backup carries).
fn init_tracing(paths: &DataPaths) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(paths.process_log())
        .context("open process log")?;
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(file)),
        )
        .init();
    Ok(())
}

fn open_cipher(paths: &DataPaths) -> Result<FieldCipher> {
    let keys = Arc::new(KeyStore::ensure(paths).context("initialise key material")?);
    Ok(FieldCipher::new(keys))
}

fn init_keys(paths: &DataPaths) -> Result<()> {
    open_cipher(paths)?;
    println!("public key:  {}", paths.public_key().display());
    println!("private key: {}", paths.private_key().display());
    Ok(())
}

fn member_command(paths: &DataPaths, actor: &str, cmd: MemberCmd) -> Result<()> {
    let cipher = open_cipher(paths)?;
    let audit = AuditLog::new(paths.audit_log(), cipher.clone());
    let store = MemberStore::open(&paths.database(), cipher)?;

    match cmd {
        MemberCmd::Add {
            first_name,
            last_name,
            age,
            gender,
            weight,
            address,
            email,
            phone,
        } => {
            let member = NewMember {
                first_name,
                last_name,
                age,
                gender,
                weight,
                address,
                email,
                phone,
            };
            match store.insert(&member) {
                Ok(profile) => {
                    audit.append(
                        actor,
                        "Member added",
                        &format!(
                            "{} {} ({})",
                            profile.first_name, profile.last_name, profile.membership_id
                        ),
                        false,
                    )?;
                    info!(membership_id = %profile.membership_id, "member registered");
                    println!("member registered: {}", profile.membership_id);
                    Ok(())
                }
                Err(e) => {
                    audit.append_suspicious(
                        actor,
                        "Failed to add member",
                        &format!("{} {}", member.first_name, member.last_name),
                    )?;
                    Err(e).context("add member")
                }
            }
        }
        MemberCmd::Search { term } => {
            audit.append(actor, "Member search", &format!("term: {term}"), false)?;
            let matches = store.search(&term)?;
            if matches.is_empty() {
                println!("no members match '{term}'");
            } else {
                for m in matches {
                    println!(
                        "{} | {} {} | age {} | {} | {} | {}",
                        m.membership_id, m.first_name, m.last_name, m.age, m.address, m.email,
                        m.phone
                    );
                }
            }
            Ok(())
        }
        MemberCmd::Update {
            membership_id,
            address,
            email,
            phone,
            weight,
        } => {
            let changes = MemberUpdate {
                address,
                email,
                phone,
                weight,
            };
            match store.update(&membership_id, &changes)? {
                Some(profile) => {
                    audit.append(actor, "Member updated", &membership_id, false)?;
                    println!(
                        "member {} updated: {} {}",
                        profile.membership_id, profile.first_name, profile.last_name
                    );
                }
                None => {
                    audit.append_suspicious(
                        actor,
                        "Failed to update member",
                        &format!("unknown membership id {membership_id}"),
                    )?;
                    println!("no member with membership id {membership_id}");
                }
            }
            Ok(())
        }
        MemberCmd::Delete { membership_id } => {
            if store.delete(&membership_id)? {
                audit.append(actor, "Member deleted", &membership_id, false)?;
                println!("member {membership_id} deleted");
            } else {
                audit.append_suspicious(
                    actor,
                    "Failed to delete member",
                    &format!("unknown membership id {membership_id}"),
                )?;
                println!("no member with membership id {membership_id}");
            }
            Ok(())
        }
    }
}

fn log_command(paths: &DataPaths, actor: &str, cmd: LogCmd) -> Result<()> {
    let cipher = open_cipher(paths)?;
    let audit = AuditLog::new(paths.audit_log(), cipher);

    match cmd {
        LogCmd::View { suspicious, json } => {
            audit.append(actor, "Viewed audit log", "", false)?;
            let records = audit.decrypt_all()?;
            if json {
                if suspicious {
                    let flagged = AuditLog::filter_suspicious(&records);
                    println!("{}", serde_json::to_string_pretty(&flagged)?);
                } else {
                    println!("{}", serde_json::to_string_pretty(&records)?);
                }
            } else if suspicious {
                let flagged = AuditLog::filter_suspicious(&records);
                if flagged.is_empty() {
                    println!("no suspicious records");
                } else {
                    for entry in flagged {
                        println!(
                            "{} {} {} | {} | {} | {}",
                            entry.sequence,
                            entry.date,
                            entry.time,
                            entry.actor,
                            entry.description,
                            entry.extra_info
                        );
                    }
                }
            } else {
                print!("{}", AuditLog::render(&records));
            }
            Ok(())
        }
        LogCmd::Export { output } => {
            let destination = output.unwrap_or_else(|| paths.log_export());
            let records = audit.decrypt_all()?;
            std::fs::write(&destination, AuditLog::render(&records))
                .with_context(|| format!("write {}", destination.display()))?;
            audit.append(
                actor,
                "Exported audit log",
                &destination.display().to_string(),
                false,
            )?;
            println!("exported {} records to {}", records.len(), destination.display());
            Ok(())
        }
    }
}

fn backup_command(paths: &DataPaths, actor: &str, cmd: BackupCmd) -> Result<()> {
    let coordinator = BackupCoordinator::new(paths);

    match cmd {
        BackupCmd::Create => {
            let cipher = open_cipher(paths)?;
            let audit = AuditLog::new(paths.audit_log(), cipher);
            let archive = coordinator
                .create(&paths.database())
                .context("create backup")?;
            let name = archive
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            audit.append(actor, "Backup created", &name, false)?;
            info!(archive = %name, "backup created");
            println!("backup created: {}", archive.display());
            Ok(())
        }
        BackupCmd::Restore { archive } => {
            match coordinator.restore(&archive, &paths.database()) {
                Ok(report) => {
                    print_restore_report(&report);
                    // Everything cached in this process (store handle, key
                    // material) may now reference replaced files, so no
                    // further work happens here; the next invocation starts
                    // from the restored state.
                    if !report.fully_restored() {
                        std::process::exit(1);
                    }
                    Ok(())
                }
                Err(Error::ArchiveNotFound { name }) => {
                    println!(
                        "backup archive '{}' not found in {}",
                        name,
                        coordinator.backup_dir().display()
                    );
                    std::process::exit(1);
                }
                Err(e) => Err(e).context("restore backup"),
            }
        }
    }
}

fn print_restore_report(report: &RestoreReport) {
    println!("restored from {}:", report.archive);
    for artifact in &report.artifacts {
        let status = match &artifact.status {
            ArtifactStatus::Restored => "restored".to_string(),
            ArtifactStatus::AlreadyInPlace => "already in place".to_string(),
            ArtifactStatus::NotInArchive => "not in archive, left untouched".to_string(),
            ArtifactStatus::Failed { reason } => format!("FAILED: {reason}"),
        };
        println!("  {:<18} {}", artifact.name, status);
    }
    if report.reload_required {
        println!("restart required: rerun to operate on the restored data");
    }
}
