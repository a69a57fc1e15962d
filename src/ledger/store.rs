use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::entry::LedgerEntry;
use crate::error::LedgerError;

/// Identifiers with a `success` or `already_handled` entry.
pub type CompletedSet = Arc<HashSet<String>>;

const QUEUE_DEPTH: usize = 64;

enum Command {
    Append {
        entry: LedgerEntry,
        reply: oneshot::Sender<Result<(), LedgerError>>,
    },
    Snapshot {
        reply: oneshot::Sender<CompletedSet>,
    },
}

/// Cloneable handle to the ledger writer task.
#[derive(Clone)]
pub struct Ledger {
    tx: mpsc::Sender<Command>,
    path: PathBuf,
}

/// The writer task. Await [`LedgerTask::join`] after the last handle is dropped
/// to be sure every accepted append has been flushed.
pub struct LedgerTask {
    handle: JoinHandle<()>,
}

impl LedgerTask {
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            warn!(error = %e, "ledger writer task ended abnormally");
        }
    }
}

impl Ledger {
    /// Opens (or creates) the ledger at `path`, loads the completed set and
    /// spawns the single writer task.
    pub async fn open(path: impl Into<PathBuf>) -> Result<(Ledger, LedgerTask), LedgerError> {
        let path = path.into();
        let io_err = |source| LedgerError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let contents = read_existing(&path)?;
        let completed: HashSet<String> = parse_entries(&path, &contents)
            .into_iter()
            .filter(|e| e.status.is_done())
            .map(|e| e.id)
            .collect();
        debug!(path = %path.display(), completed = completed.len(), "ledger loaded");

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(io_err)?;
        // Close off a line torn by a crash so the next entry starts clean.
        if !contents.is_empty() && !contents.ends_with('\n') {
            warn!(path = %path.display(), "ledger ends mid-line, terminating it");
            file.write_all(b"\n").await.map_err(io_err)?;
        }

        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let writer = Writer {
            path: path.clone(),
            file,
            torn: false,
            completed: Arc::new(completed),
        };
        let handle = tokio::spawn(writer.run(rx));

        Ok((Ledger { tx, path }, LedgerTask { handle }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one entry. Returns once the line is durably written.
    pub async fn append(&self, entry: LedgerEntry) -> Result<(), LedgerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Append { entry, reply })
            .await
            .map_err(|_| LedgerError::Closed)?;
        rx.await.map_err(|_| LedgerError::Closed)?
    }

    /// Point-in-time copy of the completed identifiers.
    pub async fn snapshot(&self) -> Result<CompletedSet, LedgerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Snapshot { reply })
            .await
            .map_err(|_| LedgerError::Closed)?;
        rx.await.map_err(|_| LedgerError::Closed)
    }
}

struct Writer {
    path: PathBuf,
    file: File,
    /// A failed write may have left part of a line behind.
    torn: bool,
    completed: CompletedSet,
}

impl Writer {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Append { entry, reply } => {
                    let result = self.write(&entry).await;
                    if result.is_ok() && entry.status.is_done() {
                        Arc::make_mut(&mut self.completed).insert(entry.id);
                    }
                    let _ = reply.send(result);
                }
                Command::Snapshot { reply } => {
                    let _ = reply.send(Arc::clone(&self.completed));
                }
            }
        }
        if let Err(e) = self.file.sync_all().await {
            warn!(path = %self.path.display(), error = %e, "final ledger sync failed");
        }
        debug!(path = %self.path.display(), "ledger writer stopped");
    }

    async fn write(&mut self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        let io_err = |source| LedgerError::Io {
            path: self.path.clone(),
            source,
        };
        write_line(&mut self.file, &mut self.torn, &line)
            .await
            .map_err(io_err)?;
        self.file.sync_data().await.map_err(io_err)?;
        Ok(())
    }
}

/// Writes one newline-terminated `line`, first closing off whatever a
/// previous failed write left behind.
async fn write_line<W>(out: &mut W, torn: &mut bool, line: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if *torn {
        out.write_all(b"\n").await?;
        *torn = false;
    }
    if let Err(e) = out.write_all(line).await {
        *torn = true;
        return Err(e);
    }
    Ok(())
}

/// Reads every entry in file order. A missing file is an empty ledger;
/// unreadable lines (e.g. a write torn by a crash) are skipped.
pub fn load_entries(path: &Path) -> Result<Vec<LedgerEntry>, LedgerError> {
    let contents = read_existing(path)?;
    Ok(parse_entries(path, &contents))
}

fn read_existing(path: &Path) -> Result<String, LedgerError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(contents),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(source) => Err(LedgerError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn parse_entries(path: &Path, contents: &str) -> Vec<LedgerEntry> {
    let mut entries = Vec::new();
    for (n, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LedgerEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => warn!(
                path = %path.display(),
                line = n + 1,
                error = %e,
                "skipping unreadable ledger line"
            ),
        }
    }
    entries
}
