//! SecretVault CLI - Command line interface for shielding project secrets.
//!
//! This tool finds sensitive files in a project, replaces them with
//! encrypted sidecars, and brings them back from the best available copy.

mod keystore;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::Command;
use tracing::{debug, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use keystore::KeyStore;
use secretvault_common::ProjectContext;
use secretvault_crypto::file::{plaintext_path, sidecar_path};
use secretvault_crypto::{derive_key_from_passphrase, KdfParams, VaultKey};
use secretvault_storage::{DocumentStore, OnePasswordCli};
use secretvault_vault::{
    absorb_file, cleanup_remote, cleanup_targets, lock_file, lock_targets, select_entries,
    status, unlock_files, Classifier, ClassifierRules, ManifestStore, RestoreSource, Restorer,
    VaultHome,
};

/// Environment variable naming the default 1Password vault.
const OP_VAULT_ENV: &str = "SECRETVAULT_OP_VAULT";

/// Vault used when neither `--vault` nor the environment names one.
const DEFAULT_OP_VAULT: &str = "Private";

#[derive(Parser)]
#[command(name = "secretvault")]
#[command(about = "SecretVault - Keep project secrets encrypted at rest")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON file replacing the built-in classifier rules.
    #[arg(long, global = true)]
    rules: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List sensitive files.
    Scan {
        /// Files or directories to scan (default: current directory).
        roots: Vec<PathBuf>,
    },

    /// Encrypt sensitive files and track them in the vault.
    Lock {
        /// Show what would be encrypted.
        #[arg(long)]
        dry_run: bool,

        /// Files or directories to lock (default: current directory).
        roots: Vec<PathBuf>,
    },

    /// Decrypt encrypted sidecars in place.
    Unlock {
        /// Show what would be decrypted.
        #[arg(long)]
        dry_run: bool,

        /// Files or directories to unlock (default: current directory).
        roots: Vec<PathBuf>,
    },

    /// Restore tracked files from the best available copy.
    Restore {
        /// Restore every tracked file, not only missing ones.
        #[arg(long)]
        all: bool,

        /// Overwrite plaintext files that already exist.
        #[arg(long)]
        force: bool,

        /// Paths, relative paths or file names to restore.
        names: Vec<String>,
    },

    /// Show where copies of each tracked file exist.
    Status,

    /// Manage the project's encryption key.
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },

    /// Upload sensitive files to 1Password, then lock them.
    Absorb {
        /// 1Password vault name.
        #[arg(long, env = OP_VAULT_ENV, default_value = DEFAULT_OP_VAULT)]
        vault: String,

        /// Show what would be absorbed.
        #[arg(long)]
        dry_run: bool,

        /// Files or directories to absorb (default: current directory).
        roots: Vec<PathBuf>,
    },

    /// Delete this project's documents from 1Password.
    Cleanup {
        /// Show what would be removed.
        #[arg(long)]
        dry_run: bool,

        /// Confirm the deletion.
        #[arg(long)]
        yes: bool,
    },

    /// Restore missing files, run a command, then lock again.
    Run {
        /// Command and arguments.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },
}

#[derive(Subcommand)]
enum KeyAction {
    /// Generate and store a random key.
    Generate,

    /// Derive and store a key from a passphrase.
    Set {
        /// Passphrase (prompted when omitted).
        #[arg(long)]
        value: Option<String>,
    },

    /// Show whether a key is configured and its fingerprint.
    Show,

    /// Remove the stored key.
    Clear,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let rules = match &cli.rules {
        Some(path) => ClassifierRules::load(path)
            .with_context(|| format!("Failed to load rules from {}", path.display()))?,
        None => ClassifierRules::default(),
    };
    let app = App::new(rules)?;

    match cli.command {
        Commands::Scan { roots } => app.cmd_scan(&roots),
        Commands::Lock { dry_run, roots } => app.cmd_lock(&roots, dry_run),
        Commands::Unlock { dry_run, roots } => app.cmd_unlock(&roots, dry_run),
        Commands::Restore { all, force, names } => app.cmd_restore(&names, all, force),
        Commands::Status => app.cmd_status(),
        Commands::Key { action } => app.cmd_key(action),
        Commands::Absorb {
            vault,
            dry_run,
            roots,
        } => app.cmd_absorb(&vault, &roots, dry_run),
        Commands::Cleanup { dry_run, yes } => app.cmd_cleanup(dry_run, yes),
        Commands::Run { command } => app.cmd_run(&command),
    }
}

/// Everything a command needs for the current project.
struct App {
    classifier: Classifier,
    store: ManifestStore,
    keys: KeyStore,
}

impl App {
    fn new(rules: ClassifierRules) -> Result<Self> {
        let home = VaultHome::from_env().context("Failed to locate vault home")?;
        let ctx = ProjectContext::current().context("Failed to resolve project directory")?;
        debug!(project = %ctx, home = %home.root().display(), "context");
        Ok(Self {
            classifier: Classifier::new(&rules).context("Invalid classifier rules")?,
            keys: KeyStore::for_project(&home, &ctx),
            store: ManifestStore::new(home, ctx),
        })
    }

    fn ctx(&self) -> &ProjectContext {
        self.store.context()
    }

    fn require_key(&self) -> Result<VaultKey> {
        match self.keys.load()? {
            Some(key) => Ok(key),
            None => bail!("Missing key for this project. Run: secretvault key generate"),
        }
    }

    fn remote(&self) -> Result<OnePasswordCli> {
        let op = OnePasswordCli::new();
        if !op.is_available()? {
            bail!("1Password CLI (op) is not installed or not signed in");
        }
        Ok(op)
    }

    fn cmd_scan(&self, roots: &[PathBuf]) -> Result<()> {
        let targets = self.classifier.find_sensitive(roots)?;
        if targets.is_empty() {
            println!("No sensitive files detected.");
            return Ok(());
        }
        for target in &targets {
            println!("{}", target.display());
        }
        println!("Detected {} sensitive file(s).", targets.len());
        Ok(())
    }

    fn cmd_lock(&self, roots: &[PathBuf], dry_run: bool) -> Result<()> {
        let key = if dry_run { None } else { Some(self.require_key()?) };
        let targets = lock_targets(&self.classifier, &self.store, roots)?;
        if targets.is_empty() {
            println!("No sensitive files detected to lock.");
            return Ok(());
        }

        let mut count = 0;
        for path in &targets {
            match &key {
                None => println!("[dry-run] {} -> {}", path.display(), sidecar_path(path).display()),
                Some(key) => {
                    lock_file(&self.store, key, path)
                        .with_context(|| format!("Failed to lock {}", path.display()))?;
                    println!("locked {}", path.display());
                }
            }
            count += 1;
        }

        if dry_run {
            println!("Would lock {} file(s).", count);
        } else {
            println!("Locked {} file(s).", count);
        }
        Ok(())
    }

    fn cmd_unlock(&self, roots: &[PathBuf], dry_run: bool) -> Result<()> {
        let targets = self.classifier.find_encrypted(roots)?;
        if targets.is_empty() {
            println!("No encrypted files detected to unlock.");
            return Ok(());
        }

        if dry_run {
            for path in &targets {
                let plain = plaintext_path(path).unwrap_or_else(|| path.clone());
                println!("[dry-run] {} -> {}", path.display(), plain.display());
            }
            println!("Would unlock {} file(s).", targets.len());
            return Ok(());
        }

        let key = self.require_key()?;
        let outcome = unlock_files(&key, &targets)?;
        for path in &outcome.unlocked {
            println!("unlocked {}", path.display());
        }
        for path in &outcome.skipped {
            println!("skip {} (plaintext already exists)", path.display());
        }
        println!("Unlocked {} file(s).", outcome.unlocked.len());
        Ok(())
    }

    fn cmd_restore(&self, names: &[String], all: bool, force: bool) -> Result<()> {
        let (manifest, _) = self.store.load()?;
        let entries = select_entries(self.ctx(), &manifest, names, all);
        if entries.is_empty() {
            println!("No tracked files to restore.");
            return Ok(());
        }

        let key = self.keys.load()?;
        let op = OnePasswordCli::new();
        let mut restorer = Restorer::new(&self.store, key.as_ref());
        if entries.iter().any(|e| e.remote_document().is_some()) {
            restorer = restorer.with_remote(&op);
        }

        let outcome = restorer.restore(&entries, force).map_err(|e| match e {
            secretvault_common::Error::NotFound(_) if key.is_none() => {
                anyhow::anyhow!("Missing key for this project. Run: secretvault key generate")
            }
            other => anyhow::Error::new(other).context("Restore failed"),
        })?;

        for path in &outcome.skipped {
            println!("skip {} (already exists, use --force to overwrite)", path.display());
        }
        for (path, source) in &outcome.restored {
            match source {
                RestoreSource::Local(_) => println!("restored {}", path.display()),
                RestoreSource::Remote(_) => println!("restored {} from 1Password", path.display()),
            }
        }

        if outcome.restored.is_empty() {
            println!("Nothing restored.");
        } else {
            println!("Restored {} file(s).", outcome.restored.len());
        }
        Ok(())
    }

    fn cmd_status(&self) -> Result<()> {
        let (manifest, _) = self.store.load()?;
        if manifest.is_empty() {
            println!("No tracked files in vault for this project.");
            return Ok(());
        }

        println!("Tracked files for project {}", self.ctx().project_path().display());
        for entry in status(&self.store, &manifest)? {
            println!(
                "- {} | plain:{} project:{} backup:{} op:{}",
                entry.display,
                yes_no(entry.plaintext),
                yes_no(entry.project_sidecar),
                yes_no(entry.backup),
                yes_no(entry.remote),
            );
        }
        Ok(())
    }

    fn cmd_key(&self, action: KeyAction) -> Result<()> {
        let project = self.ctx().project_path().display();
        match action {
            KeyAction::Generate => {
                let key = VaultKey::generate();
                self.keys.save(&key)?;
                println!("Stored encryption key for project {}", project);
                println!("Key fingerprint: {}", key.fingerprint());
            }
            KeyAction::Set { value } => {
                let passphrase = match value {
                    Some(value) => zeroize::Zeroizing::new(value),
                    None => zeroize::Zeroizing::new(
                        rpassword::prompt_password("Enter encryption passphrase: ")
                            .context("Failed to read passphrase")?,
                    ),
                };
                let key = derive_key_from_passphrase(passphrase.as_bytes(), &KdfParams::default())?;
                self.keys.save(&key)?;
                println!("Stored encryption key for project {}", project);
                println!("Key fingerprint: {}", key.fingerprint());
            }
            KeyAction::Show => match self.keys.load()? {
                Some(key) => {
                    println!("Key is configured for project {}", project);
                    println!("Key fingerprint: {}", key.fingerprint());
                }
                None => {
                    println!("No key configured for this project.");
                    println!("Run: secretvault key generate");
                }
            },
            KeyAction::Clear => {
                if self.keys.clear()? {
                    println!("Cleared key for project {}", project);
                } else {
                    println!("No key configured for this project.");
                }
            }
        }
        Ok(())
    }

    fn cmd_absorb(&self, vault: &str, roots: &[PathBuf], dry_run: bool) -> Result<()> {
        let vault = vault.trim();
        if vault.is_empty() {
            bail!("Missing --vault value (or set {})", OP_VAULT_ENV);
        }

        let targets = self.classifier.find_sensitive(roots)?;
        if targets.is_empty() {
            println!("No sensitive files found to absorb.");
            return Ok(());
        }

        if dry_run {
            for path in &targets {
                println!("[dry-run] absorb {} -> op vault {}", path.display(), vault);
            }
            println!("Would absorb {} file(s).", targets.len());
            return Ok(());
        }

        let op = self.remote()?;
        let key = self.require_key()?;
        for path in &targets {
            let entry = absorb_file(&self.store, &key, &op, vault, path)
                .with_context(|| format!("Failed to absorb {}", path.display()))?;
            let document = entry
                .remote_document()
                .map(|d| d.document_id.to_string())
                .unwrap_or_default();
            println!("absorbed {} -> {}", path.display(), document);
        }
        println!("Absorbed {} file(s).", targets.len());
        Ok(())
    }

    fn cmd_cleanup(&self, dry_run: bool, yes: bool) -> Result<()> {
        let targets = cleanup_targets(&self.store)?;
        if targets.is_empty() {
            println!("No absorbed 1Password documents found for this project.");
            return Ok(());
        }

        println!("1Password documents queued for cleanup:");
        for entry in &targets {
            let display = if entry.relative_path.trim().is_empty() {
                entry.filename.clone()
            } else {
                entry.relative_path.clone()
            };
            if let Some(doc) = entry.remote_document() {
                if doc.vault.trim().is_empty() {
                    println!("- {} -> {}", display, doc.document_id);
                } else {
                    println!("- {} -> {} (vault: {})", display, doc.document_id, doc.vault);
                }
            }
        }

        if dry_run {
            println!("Would remove {} document(s) from 1Password.", targets.len());
            return Ok(());
        }
        if !yes {
            bail!("Re-run with --yes to delete these documents");
        }

        let op = self.remote()?;
        let outcome = cleanup_remote(&self.store, &op)?;
        for id in &outcome.deleted {
            println!("deleted {}", id);
        }
        for (id, err) in &outcome.failed {
            println!("failed {}: {}", id, err);
        }
        if !outcome.failed.is_empty() {
            bail!(
                "Cleanup removed {} document(s), {} failed",
                outcome.deleted.len(),
                outcome.failed.len()
            );
        }
        println!("Cleaned up {} document(s) from 1Password.", outcome.deleted.len());
        Ok(())
    }

    fn cmd_run(&self, command: &[String]) -> Result<()> {
        let Some((program, args)) = command.split_first() else {
            bail!("Missing command. Usage: secretvault run -- <command>");
        };

        self.cmd_restore(&[], false, false)
            .context("Failed to prepare runtime secrets")?;

        let run = Command::new(program)
            .args(args)
            .env("SECRETVAULT_RUNTIME", "1")
            .status()
            .with_context(|| format!("Failed to start {}", program));
        let run = run.and_then(|status| {
            if status.success() {
                Ok(())
            } else {
                Err(anyhow::anyhow!("{} exited with {}", program, status))
            }
        });
        let relock = self.cmd_lock(&[], false);

        match (run, relock) {
            (Err(run), Err(lock)) => {
                bail!("Wrapped command failed: {:#}; re-shield failed: {:#}", run, lock)
            }
            (Err(run), Ok(())) => Err(run),
            (Ok(()), Err(lock)) => Err(lock.context("Re-shield failed")),
            (Ok(()), Ok(())) => Ok(()),
        }
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}
