use oscal_runner_core::{RunnerError, ServiceProcessRecord};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::Builder;
use tracing::{debug, info, warn};

/// A lock older than this is left over from a crashed start
const STALE_LOCK_AGE: Duration = Duration::from_secs(60);

/// Reads and writes the persisted process record
#[derive(Debug, Clone)]
pub struct PidRecordStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl PidRecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = path.with_extension("lock");
        Self { path, lock_path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// `None` when no record exists
    pub fn load(&self) -> Result<Option<ServiceProcessRecord>, RunnerError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => ServiceProcessRecord::parse(&contents).map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RunnerError::Record(format!(
                "cannot read {}: {e}",
                self.path.display()
            ))),
        }
    }

    /// Replace the record atomically
    pub fn save(&self, record: &ServiceProcessRecord) -> Result<(), RunnerError> {
        atomic_write(&self.path, record.to_file_contents().as_bytes()).map_err(|e| {
            RunnerError::Record(format!("cannot write {}: {e}", self.path.display()))
        })?;
        info!(pid = record.pid, file = %self.path.display(), "Process record written");
        Ok(())
    }

    /// Returns whether a record was present
    pub fn remove(&self) -> Result<bool, RunnerError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(file = %self.path.display(), "Process record removed");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(RunnerError::Record(format!(
                "cannot remove {}: {e}",
                self.path.display()
            ))),
        }
    }

    /// Exclusive create-if-absent lock around the check-and-write of a start
    pub fn acquire_start_lock(&self) -> Result<StartLock, RunnerError> {
        if let Some(parent) = self.lock_path.parent() {
            fs::create_dir_all(parent)?;
        }

        match create_lock(&self.lock_path) {
            Ok(file) => Ok(StartLock::new(self.lock_path.clone(), file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                if !lock_is_stale(&self.lock_path) {
                    return Err(RunnerError::Record(format!(
                        "another start is in progress (lock file {})",
                        self.lock_path.display()
                    )));
                }

                warn!(file = %self.lock_path.display(), "Removing stale start lock");
                fs::remove_file(&self.lock_path)?;
                let file = create_lock(&self.lock_path)?;
                Ok(StartLock::new(self.lock_path.clone(), file))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Held for the duration of a start; the lock file goes away on drop
#[derive(Debug)]
pub struct StartLock {
    path: PathBuf,
    _file: File,
}

impl StartLock {
    fn new(path: PathBuf, file: File) -> Self {
        Self { path, _file: file }
    }
}

impl Drop for StartLock {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Err(error) if error.kind() != io::ErrorKind::NotFound => {
                warn!(
                    file = %self.path.display(),
                    error = %error,
                    "failed to remove lock file"
                );
            }
            _ => {}
        }
    }
}

fn create_lock(path: &Path) -> io::Result<File> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    writeln!(file, "{}", std::process::id())?;
    Ok(file)
}

fn lock_is_stale(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > STALE_LOCK_AGE)
}

/// Readers never observe a partially written record
fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
    let directory = path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            "record path did not have a parent directory",
        )
    })?;
    fs::create_dir_all(directory)?;

    let mut builder = Builder::new();
    builder.prefix(".PID");
    #[cfg(unix)]
    {
        use std::fs::Permissions;
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(Permissions::from_mode(0o600));
    }

    let mut file = builder.tempfile_in(directory)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|error| error.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_record_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = PidRecordStore::new(dir.path().join("PID"));
        assert!(store.load().unwrap().is_none());
        assert!(!store.remove().unwrap());
    }

    #[test]
    fn test_save_replaces_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = PidRecordStore::new(dir.path().join("nested").join("PID"));

        store
            .save(&ServiceProcessRecord::new(100, "/usr/bin/oscal-server"))
            .unwrap();
        store
            .save(&ServiceProcessRecord::new(200, "/usr/bin/oscal-server"))
            .unwrap();

        assert_eq!(store.load().unwrap().unwrap().pid, 200);
        assert!(store.remove().unwrap());
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_corrupt_record_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = PidRecordStore::new(dir.path().join("PID"));
        fs::write(store.path(), "garbage").unwrap();
        assert!(matches!(store.load(), Err(RunnerError::Record(_))));
    }

    #[test]
    fn test_start_lock_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let store = PidRecordStore::new(dir.path().join("PID"));
        assert_eq!(store.lock_path(), dir.path().join("PID.lock"));

        let lock = store.acquire_start_lock().unwrap();
        assert!(store.lock_path().exists());
        assert!(store.acquire_start_lock().is_err());

        drop(lock);
        assert!(!store.lock_path().exists());
        assert!(store.acquire_start_lock().is_ok());
    }
}
