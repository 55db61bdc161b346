//! Persisted watchlist of symbols.
//!
//! Stored as a line-delimited text file (`#` starts a comment). Every
//! mutation rewrites the whole file via temp-file-and-rename, and the
//! in-memory set only changes once the write succeeded.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{info, warn};

use crate::data::Symbol;

/// Watchlist persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum WatchlistError {
    #[error("failed to write watchlist {path}: {source}")]
    WriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read watchlist {path}: {source}")]
    ReadFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<WatchlistError> for tickerbot_common::Error {
    fn from(e: WatchlistError) -> Self {
        Self::Internal(e.to_string())
    }
}

/// Result of [`WatchlistStore::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    AlreadyPresent,
}

/// Result of [`WatchlistStore::remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    /// The symbol was not on the watchlist; nothing changed
    NotFound,
}

/// File-backed symbol set shared by alert jobs and command handlers.
pub struct WatchlistStore {
    path: PathBuf,
    symbols: RwLock<BTreeSet<Symbol>>,
}

impl WatchlistStore {
    /// Load from `path`, or start from `defaults` when the file does not exist.
    ///
    /// Unparseable lines are skipped with a warning.
    pub fn load(path: impl Into<PathBuf>, defaults: &[Symbol]) -> Result<Self, WatchlistError> {
        let path = path.into();
        let symbols = if path.exists() {
            let symbols = read_file(&path)?;
            info!(path = %path.display(), count = symbols.len(), "Watchlist loaded");
            symbols
        } else {
            info!(path = %path.display(), "No watchlist file, starting from defaults");
            defaults.iter().cloned().collect()
        };

        Ok(Self {
            path,
            symbols: RwLock::new(symbols),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the current symbols, sorted.
    pub fn list(&self) -> Vec<Symbol> {
        self.read_guard().iter().cloned().collect()
    }

    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.read_guard().contains(symbol)
    }

    pub fn len(&self) -> usize {
        self.read_guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add a symbol. Adding one already present is a successful no-op.
    pub fn add(&self, symbol: Symbol) -> Result<AddOutcome, WatchlistError> {
        let mut guard = self.write_guard();
        if guard.contains(&symbol) {
            return Ok(AddOutcome::AlreadyPresent);
        }

        let mut next = guard.clone();
        next.insert(symbol.clone());
        self.persist(&next)?;
        *guard = next;

        info!(symbol = %symbol, "Added to watchlist");
        Ok(AddOutcome::Added)
    }

    /// Remove a symbol, reporting `NotFound` when it was absent.
    pub fn remove(&self, symbol: &Symbol) -> Result<RemoveOutcome, WatchlistError> {
        let mut guard = self.write_guard();
        if !guard.contains(symbol) {
            return Ok(RemoveOutcome::NotFound);
        }

        let mut next = guard.clone();
        next.remove(symbol);
        self.persist(&next)?;
        *guard = next;

        info!(symbol = %symbol, "Removed from watchlist");
        Ok(RemoveOutcome::Removed)
    }

    /// Re-read the file, replacing the in-memory set.
    pub fn reload(&self) -> Result<usize, WatchlistError> {
        let symbols = read_file(&self.path)?;
        let count = symbols.len();
        *self.write_guard() = symbols;
        Ok(count)
    }

    fn persist(&self, symbols: &BTreeSet<Symbol>) -> Result<(), WatchlistError> {
        let mut content = String::from("# tickerbot watchlist, one symbol per line\n");
        for symbol in symbols {
            content.push_str(symbol.as_str());
            content.push('\n');
        }

        tickerbot_common::util::write_atomic(&self.path, content.as_bytes()).map_err(|source| {
            warn!(path = %self.path.display(), error = %source, "Watchlist write failed");
            WatchlistError::WriteFailure {
                path: self.path.clone(),
                source,
            }
        })
    }

    fn read_guard(&self) -> std::sync::RwLockReadGuard<'_, BTreeSet<Symbol>> {
        match self.symbols.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_guard(&self) -> std::sync::RwLockWriteGuard<'_, BTreeSet<Symbol>> {
        match self.symbols.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn read_file(path: &Path) -> Result<BTreeSet<Symbol>, WatchlistError> {
    let content = fs::read_to_string(path).map_err(|source| WatchlistError::ReadFailure {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_lines(&content))
}

fn parse_lines(content: &str) -> BTreeSet<Symbol> {
    content
        .lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty())
        .filter_map(|line| match Symbol::parse(line) {
            Ok(symbol) => Some(symbol),
            Err(e) => {
                warn!(line, error = %e, "Skipping invalid watchlist entry");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    fn store_with(dir: &TempDir, content: &str) -> WatchlistStore {
        let path = dir.path().join("watchlist.txt");
        fs::write(&path, content).unwrap();
        WatchlistStore::load(path, &[]).unwrap()
    }

    #[test]
    fn test_parse_lines() {
        let parsed = parse_lines("# header\naapl\n\n  msft  # big tech\nUSDSGD=X\nbad symbol\n");
        let names: Vec<_> = parsed.iter().map(|s| s.as_str()).collect();
        assert_eq!(names, vec!["AAPL", "MSFT", "USDSGD=X"]);
    }

    #[test]
    fn test_defaults_when_missing() {
        let dir = TempDir::new().unwrap();
        let store = WatchlistStore::load(
            dir.path().join("missing.txt"),
            &[sym("AAPL"), sym("MSFT"), sym("GOOGL")],
        )
        .unwrap();
        assert_eq!(store.len(), 3);
        assert!(!store.path().exists());
    }

    #[test]
    fn test_add_then_remove_missing() {
        let dir = TempDir::new().unwrap();
        let store = store_with(&dir, "AAPL\n");

        assert_eq!(store.add(sym("TSLA")).unwrap(), AddOutcome::Added);
        assert_eq!(store.list(), vec![sym("AAPL"), sym("TSLA")]);

        assert_eq!(store.remove(&sym("MSFT")).unwrap(), RemoveOutcome::NotFound);
        assert_eq!(store.list(), vec![sym("AAPL"), sym("TSLA")]);
    }

    #[test]
    fn test_add_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = store_with(&dir, "AAPL\n");

        assert_eq!(store.add(sym("nvda")).unwrap(), AddOutcome::Added);
        assert_eq!(store.add(sym("NVDA")).unwrap(), AddOutcome::AlreadyPresent);

        let on_disk = fs::read_to_string(store.path()).unwrap();
        assert_eq!(on_disk.lines().filter(|l| *l == "NVDA").count(), 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_mutations_persist() {
        let dir = TempDir::new().unwrap();
        let store = store_with(&dir, "AAPL\nMSFT\n");
        store.add(sym("TSLA")).unwrap();
        assert_eq!(store.remove(&sym("AAPL")).unwrap(), RemoveOutcome::Removed);

        let reopened = WatchlistStore::load(store.path().to_path_buf(), &[]).unwrap();
        assert_eq!(reopened.list(), vec![sym("MSFT"), sym("TSLA")]);
    }

    #[test]
    fn test_failed_write_keeps_memory_unchanged() {
        let dir = TempDir::new().unwrap();
        // Parent path is a regular file, so the write cannot succeed
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "").unwrap();
        let store = WatchlistStore::load(blocker.join("watchlist.txt"), &[sym("AAPL")]).unwrap();

        let err = store.add(sym("TSLA")).unwrap_err();
        assert!(matches!(err, WatchlistError::WriteFailure { .. }));
        assert_eq!(store.list(), vec![sym("AAPL")]);

        assert!(store.remove(&sym("AAPL")).is_err());
        assert!(store.contains(&sym("AAPL")));
    }

    #[test]
    fn test_reload_picks_up_external_edits() {
        let dir = TempDir::new().unwrap();
        let store = store_with(&dir, "AAPL\n");
        fs::write(store.path(), "AMD\nINTC\n").unwrap();
        assert_eq!(store.reload().unwrap(), 2);
        assert!(store.contains(&sym("AMD")));
        assert!(!store.contains(&sym("AAPL")));
    }
}
