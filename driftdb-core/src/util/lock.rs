//! Advisory lock file guarding a table directory against a second writer process

use crate::{DriftError, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

/// An exclusive `flock` on `<root>/<table>/table.lock`.
///
/// The file holds the owner's process ID to make stale locks easy to
/// diagnose. The lock is dropped with the file handle.
pub struct LockFile {
    file: File,
    path: PathBuf,
}

impl LockFile {
    pub const FILE_NAME: &'static str = "table.lock";

    /// Lock `path`, failing immediately if another handle holds it
    pub fn acquire<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        // No truncate here: a failed attempt must not wipe the holder's pid.
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;

        if let Err(e) = Self::try_lock(&file) {
            let holder = fs::read_to_string(&path).unwrap_or_default();
            return Err(DriftError::Locked(format!(
                "{:?} held by pid {} ({})",
                path,
                holder.trim(),
                e
            )));
        }

        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        file.flush()?;

        Ok(Self { file, path })
    }

    #[cfg(unix)]
    fn try_lock(file: &File) -> io::Result<()> {
        use libc::{flock, LOCK_EX, LOCK_NB};

        let fd = file.as_raw_fd();
        let result = unsafe { flock(fd, LOCK_EX | LOCK_NB) };
        if result != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn try_lock(_file: &File) -> io::Result<()> {
        Ok(())
    }

    /// Remove the lock file and drop the lock
    pub fn release(self) -> Result<()> {
        let LockFile { file, path } = self;
        let removed = fs::remove_file(&path);
        drop(file);
        match removed {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
