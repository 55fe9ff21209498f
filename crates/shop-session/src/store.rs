//! Session storage
//!
//! Holds the single live `Session` behind a tokio Mutex and, when backed by a
//! file, writes every mutation through with an atomic temp-file + rename. The
//! lock is held across the write so a `set` or `clear` is never observed half
//! applied, and two mutations never interleave on disk.
//!
//! Nothing outside this store keeps a token longer than one request.

use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::session::Session;

/// Single source of truth for "is the caller authenticated".
pub struct SessionStore {
    path: Option<PathBuf>,
    state: Mutex<Session>,
}

impl SessionStore {
    /// Seed the store from the given session file.
    ///
    /// If the file doesn't exist, starts anonymous and creates it as `{}` so
    /// later writes never race a missing parent path check.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let session = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading session file: {e}")))?;
            let session: Session = serde_json::from_str(&contents)
                .map_err(|e| Error::SessionParse(format!("parsing session file: {e}")))?;
            info!(
                path = %path.display(),
                authenticated = session.is_authenticated(),
                "loaded session"
            );
            session
        } else {
            info!(path = %path.display(), "session file not found, starting anonymous");
            let session = Session::anonymous();
            write_atomic(&path, &session).await?;
            session
        };

        Ok(Self {
            path: Some(path),
            state: Mutex::new(session),
        })
    }

    /// A store that lives only in memory.
    pub fn in_memory(session: Session) -> Self {
        Self {
            path: None,
            state: Mutex::new(session),
        }
    }

    /// Snapshot of the current session.
    pub async fn get(&self) -> Session {
        self.state.lock().await.clone()
    }

    /// Whether an access token is currently held.
    pub async fn is_authenticated(&self) -> bool {
        self.state.lock().await.is_authenticated()
    }

    /// Replace the session and persist it.
    ///
    /// The in-memory value is updated even if persisting fails.
    pub async fn set(&self, session: Session) -> Result<()> {
        let mut state = self.state.lock().await;
        *state = session;
        debug!(authenticated = state.is_authenticated(), "session replaced");
        self.persist(&state).await
    }

    /// Drop both credentials and persist the anonymous session.
    pub async fn clear(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        *state = Session::anonymous();
        debug!("session cleared");
        self.persist(&state).await
    }

    /// Replace the session only if it still equals `expected`.
    ///
    /// Returns `Ok(false)` without writing when another writer got there
    /// first. Callers that computed `session` from an earlier snapshot use
    /// this so a logout or login in between is never overwritten.
    pub async fn replace_if(&self, expected: &Session, session: Session) -> Result<bool> {
        let mut state = self.state.lock().await;
        if *state != *expected {
            debug!("session changed since snapshot, not replacing");
            return Ok(false);
        }
        *state = session;
        debug!(authenticated = state.is_authenticated(), "session replaced");
        self.persist(&state).await?;
        Ok(true)
    }

    async fn persist(&self, session: &Session) -> Result<()> {
        match &self.path {
            Some(path) => write_atomic(path, session).await,
            None => Ok(()),
        }
    }
}

/// Write the session to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over the
/// target. Permissions are 0600 on unix since the file holds bearer tokens.
async fn write_atomic(path: &Path, session: &Session) -> Result<()> {
    let json = serde_json::to_string_pretty(session)
        .map_err(|e| Error::SessionParse(format!("serializing session: {e}")))?;

    let dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d,
        _ => Path::new("."),
    };

    let tmp_path = dir.join(format!(".session.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp session file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting session file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp session file: {e}")))?;

    debug!(path = %path.display(), "persisted session");
    Ok(())
}
