//-
// Copyright (c) 2023, Jason Lingle
//
// This file is part of Pigeonhole.
//
// Pigeonhole is free software: you can  redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Pigeonhole is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Pigeonhole. If not, see <http://www.gnu.org/licenses/>.

//! Miscellaneous functions for working with files.

use std::fs;
use std::io::{self, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use log::error;
use rand::{rngs::OsRng, Rng};

use crate::support::error::Error;

/// Write `data` into the file at `path`, atomically.
///
/// The file will first be staged within `tmp`.
///
/// If `overwrite` is true, this will replace anything already at `path`. If
/// false, the call will fail if `path` already exists.
pub fn spit(
    tmp: impl AsRef<Path>,
    path: impl AsRef<Path>,
    overwrite: bool,
    mode: u32,
    data: &[u8],
) -> io::Result<()> {
    let mut tf = tempfile::NamedTempFile::new_in(tmp)?;
    tf.as_file_mut().write_all(data)?;
    chmod(tf.path(), mode)?;
    tf.as_file_mut().sync_all()?;
    if overwrite {
        tf.persist(path)?;
    } else {
        tf.persist_noclobber(path)?;
    }
    Ok(())
}

/// Read the whole file at `path`.
///
/// A file which does not exist reads as empty.
pub fn slurp(path: impl AsRef<Path>) -> io::Result<Vec<u8>> {
    let mut data = Vec::new();
    match fs::File::open(path) {
        Ok(mut f) => {
            f.read_to_end(&mut data)?;
        }
        Err(e) if io::ErrorKind::NotFound == e.kind() => (),
        Err(e) => return Err(e),
    }
    Ok(data)
}

/// Delete `target` by moving it into the directory given by `garbage` (with a
/// new random name) and recursively removing it in the background.
///
/// This is used to make removal of large directory trees both fast and atomic.
pub fn delete_async(
    target: impl AsRef<Path>,
    garbage: impl AsRef<Path>,
) -> io::Result<()> {
    let target = target.as_ref();
    let garbage = garbage.as_ref();

    loop {
        let name = format!("garbage.{}", OsRng.gen::<u64>());
        let dst = garbage.join(name);

        match fs::rename(target, &dst) {
            Ok(()) => {
                std::thread::spawn(move || {
                    if let Err(e) = fs::remove_dir_all(&dst) {
                        error!("Failed to remove {}: {}", dst.display(), e);
                    }
                });
                break;
            }
            Err(e) if io::ErrorKind::AlreadyExists == e.kind() => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(())
}

pub fn chmod(path: impl AsRef<Path>, mode: u32) -> io::Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

pub trait IgnoreKinds {
    fn ignore_not_found(self) -> Self;
}

impl<R: Default> IgnoreKinds for Result<R, io::Error> {
    fn ignore_not_found(self) -> Self {
        match self {
            Ok(r) => Ok(r),
            Err(e) if io::ErrorKind::NotFound == e.kind() => Ok(R::default()),
            Err(e) => Err(e),
        }
    }
}

pub trait ErrorTransforms {
    type Coerced;
    fn on_exists(self, error: Error) -> Self::Coerced;
    fn on_not_found(self, error: Error) -> Self::Coerced;
}

impl<R, E: Into<Error>> ErrorTransforms for Result<R, E> {
    type Coerced = Result<R, Error>;

    fn on_exists(self, error: Error) -> Result<R, Error> {
        match self.map_err(|e| e.into()) {
            Err(Error::Io(e)) if is_exists(&e) => Err(error),
            s => s,
        }
    }

    fn on_not_found(self, error: Error) -> Result<R, Error> {
        match self.map_err(|e| e.into()) {
            Err(Error::Io(e)) if io::ErrorKind::NotFound == e.kind() => {
                Err(error)
            }
            s => s,
        }
    }
}

/// Whether `e` indicates that the destination of an operation was already
/// occupied.
///
/// Renaming a directory onto a non-empty directory fails with `ENOTEMPTY`
/// rather than `EEXIST`, so both count.
fn is_exists(e: &io::Error) -> bool {
    io::ErrorKind::AlreadyExists == e.kind()
        || Some(nix::libc::ENOTEMPTY) == e.raw_os_error()
        || Some(nix::libc::EEXIST) == e.raw_os_error()
}

#[cfg(test)]
mod test {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn spit_and_slurp() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("f");

        assert!(slurp(&path).unwrap().is_empty());

        spit(root.path(), &path, false, 0o600, b"hello").unwrap();
        assert_eq!(b"hello".to_vec(), slurp(&path).unwrap());

        assert!(spit(root.path(), &path, false, 0o600, b"world").is_err());
        spit(root.path(), &path, true, 0o600, b"world").unwrap();
        assert_eq!(b"world".to_vec(), slurp(&path).unwrap());
    }

    #[test]
    fn rename_onto_populated_directory_is_exists() {
        let root = TempDir::new().unwrap();
        let src = root.path().join("src");
        let dst = root.path().join("dst");
        fs::create_dir(&src).unwrap();
        fs::create_dir(&dst).unwrap();
        fs::create_dir(dst.join("child")).unwrap();

        assert_matches!(
            Err(Error::MailboxExists(_)),
            fs::rename(&src, &dst)
                .on_exists(Error::MailboxExists("dst".to_owned()))
        );
    }

    #[test]
    fn ignore_not_found() {
        let root = TempDir::new().unwrap();
        fs::remove_file(root.path().join("nx"))
            .ignore_not_found()
            .unwrap();
    }
}
