//! Remote replicas reached through an authenticated session.
//!
//! A [`Connector`] knows how to open a session to some remote module once
//! it has [`Credentials`]. [`RemoteReplica`] defers that until the first
//! operation that needs the remote, then asks the [`AuthCallback`] for
//! credentials exactly once per replica.

use super::{ListItem, LocalReplica, Replica, ReplicaCapabilities};
use crate::error::{ReplicaError, ReplicaResult};
use csync_core::{ExcludeSet, FileEntry, SymlinkPolicy};
use parking_lot::Mutex;
use std::fmt;
use std::io::Read;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

/// User name and password for a remote module.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// User name.
    pub user: String,
    /// Password.
    pub password: String,
}

impl Credentials {
    /// Creates credentials.
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Supplies credentials for the described remote; `None` means the user
/// declined.
pub type AuthCallback = Arc<dyn Fn(&str) -> Option<Credentials> + Send + Sync>;

/// Opens sessions to a remote module.
pub trait Connector: Send + Sync {
    /// The replica a session exposes.
    type Session: Replica;

    /// Description of the remote, passed to the credential callback.
    fn describe(&self) -> String;

    /// Capabilities the remote will have once connected.
    fn capabilities(&self) -> ReplicaCapabilities;

    /// Opens a session.
    ///
    /// # Errors
    ///
    /// Returns [`ReplicaError::Authentication`] if the credentials are
    /// rejected, or [`ReplicaError::Unreachable`] if the remote is down.
    fn connect(&self, credentials: &Credentials) -> ReplicaResult<Self::Session>;
}

/// A replica behind a lazily established, authenticated session.
pub struct RemoteReplica<C: Connector> {
    connector: C,
    auth: AuthCallback,
    session: OnceLock<C::Session>,
    connecting: Mutex<()>,
}

impl<C: Connector> RemoteReplica<C> {
    /// Creates a replica; nothing is contacted yet.
    pub fn new(connector: C, auth: AuthCallback) -> Self {
        Self {
            connector,
            auth,
            session: OnceLock::new(),
            connecting: Mutex::new(()),
        }
    }

    /// Returns true once a session has been established.
    pub fn is_connected(&self) -> bool {
        self.session.get().is_some()
    }

    fn session(&self) -> ReplicaResult<&C::Session> {
        if let Some(session) = self.session.get() {
            return Ok(session);
        }

        let _guard = self.connecting.lock();
        if let Some(session) = self.session.get() {
            return Ok(session);
        }

        let remote = self.connector.describe();
        let credentials = (self.auth)(&remote).ok_or_else(|| {
            ReplicaError::Authentication(format!("no credentials supplied for {remote}"))
        })?;
        let session = self.connector.connect(&credentials)?;
        tracing::info!(remote = %remote, user = %credentials.user, "remote session established");
        Ok(self.session.get_or_init(|| session))
    }
}

impl<C: Connector> Replica for RemoteReplica<C> {
    fn describe(&self) -> String {
        format!("remote:{}", self.connector.describe())
    }

    fn capabilities(&self) -> ReplicaCapabilities {
        self.connector.capabilities()
    }

    fn list(&self, excludes: &ExcludeSet) -> ReplicaResult<Vec<ListItem>> {
        self.session()?.list(excludes)
    }

    fn stat(&self, path: &str) -> ReplicaResult<FileEntry> {
        self.session()?.stat(path)
    }

    fn read(&self, path: &str) -> ReplicaResult<Box<dyn Read + Send>> {
        self.session()?.read(path)
    }

    fn write(&self, path: &str, data: &mut dyn Read) -> ReplicaResult<u64> {
        self.session()?.write(path, data)
    }

    fn mkdir(&self, path: &str) -> ReplicaResult<()> {
        self.session()?.mkdir(path)
    }

    fn remove(&self, path: &str) -> ReplicaResult<()> {
        self.session()?.remove(path)
    }

    fn remove_all(&self, path: &str) -> ReplicaResult<()> {
        self.session()?.remove_all(path)
    }

    fn rename(&self, from: &str, to: &str) -> ReplicaResult<()> {
        self.session()?.rename(from, to)
    }

    fn set_times(&self, path: &str, mtime: i64, mode: u32) -> ReplicaResult<()> {
        self.session()?.set_times(path, mtime, mode)
    }

    fn read_link(&self, path: &str) -> ReplicaResult<String> {
        self.session()?.read_link(path)
    }

    fn symlink(&self, target: &str, path: &str) -> ReplicaResult<()> {
        self.session()?.symlink(target, path)
    }
}

/// Exposes a local directory as a remote module.
///
/// Stands in for a network module: it goes through the same credential
/// handshake and can restrict access to one user name.
#[derive(Debug, Clone)]
pub struct DirectoryConnector {
    root: PathBuf,
    symlinks: SymlinkPolicy,
    allowed_user: Option<String>,
}

impl DirectoryConnector {
    /// Creates a connector for `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            symlinks: SymlinkPolicy::default(),
            allowed_user: None,
        }
    }

    /// Sets the symlink policy of the session.
    #[must_use]
    pub fn with_symlinks(mut self, symlinks: SymlinkPolicy) -> Self {
        self.symlinks = symlinks;
        self
    }

    /// Only accepts sessions for `user`.
    #[must_use]
    pub fn with_allowed_user(mut self, user: impl Into<String>) -> Self {
        self.allowed_user = Some(user.into());
        self
    }
}

impl Connector for DirectoryConnector {
    type Session = LocalReplica;

    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    fn capabilities(&self) -> ReplicaCapabilities {
        ReplicaCapabilities {
            stable_inodes: cfg!(unix),
            settable_mtime: true,
        }
    }

    fn connect(&self, credentials: &Credentials) -> ReplicaResult<LocalReplica> {
        if let Some(allowed) = &self.allowed_user {
            if &credentials.user != allowed {
                return Err(ReplicaError::Authentication(format!(
                    "user {:?} may not access {}",
                    credentials.user,
                    self.root.display()
                )));
            }
        }
        if !self.root.is_dir() {
            return Err(ReplicaError::Unreachable {
                root: self.describe(),
                message: "module root is not a directory".into(),
            });
        }
        Ok(LocalReplica::new(&self.root).with_symlinks(self.symlinks))
    }
}
