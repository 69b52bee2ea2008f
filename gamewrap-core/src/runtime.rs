/*
 * gamewrap-core
 *
 * Copyright (C) 2024-2026 Gamewrap Contributors
 * SPDX-License-Identifier: GPL-3.0-only
 *
 * This library is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, version 3.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use std::{
    fs::{create_dir_all, hard_link, read_dir, read_link, remove_dir_all},
    os::unix::fs::symlink,
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use walkdir::WalkDir;

use crate::{
    err,
    error::*,
    lock::{Lock, LockFlags},
    log::Logger,
    utils::basename,
    Error,
    ErrorKind,
};

pub mod capture;
pub mod compose;
pub mod desktop;

const COPY_PREFIX: &str = "tmp-";

/*
 * A runtime is the read-only tree mounted in place of the host's /usr.
 * Either a sysroot containing usr/ or a bare merged-/usr tree; the
 * distinction decides where the .ref lock file lives and what gets
 * mounted. The lock is held for as long as the Runtime is alive, then
 * inherited by the adverb across exec.
 */
#[derive(Debug)]
pub struct Runtime {
    root: String,
    usr: String,
    sysroot: bool,
    lock: Option<Lock>,
    scratch: String,
    overrides: String,
}

impl Runtime {
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn usr(&self) -> &str {
        &self.usr
    }

    /* True when the root carries etc/, var/, ... alongside usr/. */
    pub fn is_sysroot(&self) -> bool {
        self.sysroot
    }

    pub fn overrides(&self) -> &str {
        &self.overrides
    }

    pub fn scratch(&self) -> &str {
        &self.scratch
    }

    pub fn lock(&self) -> Option<&Lock> {
        self.lock.as_ref()
    }

    pub fn take_lock(&mut self) -> Option<Lock> {
        self.lock.take()
    }

    /* Runtime-relative path of an entry, honouring the sysroot layout. */
    pub fn path(&self, rel: &str) -> String {
        format!("{}/{}", self.root, rel.trim_start_matches('/'))
    }

    pub fn cleanup(&self) {
        remove_dir_all(&self.scratch).ok();
    }
}

#[derive(Debug, Default)]
pub struct RuntimeBuilder {
    root: String,
    copy_into: Option<String>,
    gc: bool,
}

impl RuntimeBuilder {
    pub fn new(root: &str) -> Self {
        Self {
            root: root.trim_end_matches('/').into(),
            ..Self::default()
        }
    }

    pub fn copy_into(mut self, dir: Option<&str>) -> Self {
        self.copy_into = dir.map(|dir| dir.trim_end_matches('/').into());
        self
    }

    pub fn gc_runtimes(mut self, gc: bool) -> Self {
        self.gc = gc;
        self
    }

    /* Validates once; the resulting record is construct-only. */
    pub fn build(self, logger: &Logger) -> Result<Runtime> {
        if !Path::new(&self.root).is_dir() {
            err!(ErrorKind::IOError(self.root.clone(), std::io::ErrorKind::NotFound))?
        }

        let sysroot = Path::new(&format!("{}/usr", self.root)).is_dir();

        if let Some(copies) = &self.copy_into {
            if self.gc {
                gc_copies(copies, logger);
            }
        }

        let (root, lock) = match &self.copy_into {
            Some(copies) => {
                let copy = copy_runtime(&self.root, copies)?;
                /* Our private copy: exclusive, and created on demand. */
                let lock = Lock::open(&ref_file(&copy, sysroot), LockFlags::CREATE | LockFlags::WRITE | LockFlags::WAIT)?;

                (copy, lock)
            }
            None => {
                /* Shared with any concurrent launcher: readers coexist. */
                let lock = Lock::open(&ref_file(&self.root, sysroot), LockFlags::CREATE | LockFlags::WAIT)?;

                (self.root.clone(), lock)
            }
        };
        let usr = match sysroot {
            true => format!("{}/usr", root),
            false => root.clone(),
        };
        let scratch = scratch_dir()?;
        let overrides = format!("{}/overrides", scratch);

        create_dir_all(format!("{}/lib", overrides)).prepend_io(|| overrides.clone())?;
        create_dir_all(format!("{}/share", overrides)).prepend_io(|| overrides.clone())?;

        Ok(Runtime {
            root,
            usr,
            sysroot,
            lock: Some(lock),
            scratch,
            overrides,
        })
    }
}

fn ref_file(root: &str, sysroot: bool) -> String {
    match sysroot {
        true => format!("{}/usr/.ref", root),
        false => format!("{}/.ref", root),
    }
}

fn scratch_dir() -> Result<String> {
    let stamp = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_micros();
    let dir = format!("{}/gamewrap-{}-{}", std::env::temp_dir().display(), std::process::id(), stamp);

    create_dir_all(&dir).prepend_io(|| dir.clone())?;
    Ok(dir)
}

/*
 * Per-launch mutable copy: hardlink regular files, replicate symlinks and
 * directory structure. Hardlinks keep the copy cheap while the original
 * stays immutable through the read-only bind.
 */
fn copy_runtime(source: &str, copies: &str) -> Result<String> {
    let stamp = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_micros();
    let dest = format!("{}/{}{}-{}", copies, COPY_PREFIX, std::process::id(), stamp);

    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.generic()?;
        let rel = entry.path().strip_prefix(source).generic()?;
        let target = format!("{}/{}", dest, rel.display());
        let file_type = entry.file_type();

        if file_type.is_dir() {
            create_dir_all(&target).prepend_io(|| target.clone())?;
        } else if file_type.is_symlink() {
            let points_to = read_link(entry.path()).prepend_io(|| entry.path().display().to_string())?;

            symlink(&points_to, &target).prepend_io(|| target.clone())?;
        } else if hard_link(entry.path(), &target).is_err() {
            std::fs::copy(entry.path(), &target).prepend_io(|| target.clone())?;
        }
    }

    Ok(dest)
}

/* Delete stale copies; one whose .ref cannot be write-locked is in use. */
fn gc_copies(copies: &str, logger: &Logger) {
    let entries = match read_dir(copies) {
        Ok(entries) => entries,
        Err(_) => return,
    };

    for entry in entries.filter_map(|entry| entry.ok()) {
        let path = entry.path().display().to_string();

        if !basename(&path).starts_with(COPY_PREFIX) {
            continue;
        }

        let sysroot = Path::new(&format!("{}/usr", path)).is_dir();

        match Lock::open(&ref_file(&path, sysroot), LockFlags::WRITE) {
            Ok(lock) => {
                logger.info(&format!("Deleting stale runtime copy '{}'", path));
                drop(lock);

                if let Err(error) = remove_dir_all(&path) {
                    logger.warn(&format!("Unable to delete '{}': {}", path, error));
                }
            }
            Err(_) => logger.debug(&format!("Runtime copy '{}' is still in use", path)),
        }
    }
}
