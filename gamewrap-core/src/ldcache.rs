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
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{read_to_string, rename, write},
    process::Command,
};

use crate::{
    constants::{EX_UNAVAILABLE, EX_USAGE, LDCONFIG_EXECUTABLE},
    err,
    error::*,
    exec::wait_helper,
    Error,
    ErrorKind,
};

#[derive(Debug)]
pub enum LdCacheError {
    UnabsolutePath(String),
    UnrepresentablePath(String),
}

impl Display for LdCacheError {
    fn fmt(&self, fmter: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::UnabsolutePath(dir) => write!(fmter, "ld.so search path '{}' must be absolute", dir),
            Self::UnrepresentablePath(dir) => {
                write!(fmter, "ld.so search path '{}' cannot be written to ld.so.conf", dir)
            }
        }
    }
}

impl ErrorTrait for LdCacheError {
    fn code(&self) -> i32 {
        match self {
            Self::UnabsolutePath(_) => EX_USAGE,
            Self::UnrepresentablePath(_) => EX_UNAVAILABLE,
        }
    }
}

/*
 * Regenerate ${dir}/ld.so.cache from ${dir}/runtime-ld.so.conf plus the
 * prepended extra directories. ldconfig overwrites its output in place, so
 * it writes to new-ld.so.cache and the rename makes the swap atomic for
 * concurrent readers.
 */
pub fn regenerate(dir: &str, extra_dirs: &[String], verbose: bool) -> Result<()> {
    regenerate_with(LDCONFIG_EXECUTABLE, dir, extra_dirs, verbose)
}

pub fn regenerate_with(ldconfig: &str, dir: &str, extra_dirs: &[String], verbose: bool) -> Result<()> {
    let conf = format!("{}/ld.so.conf", dir);
    let staging = format!("{}/new-ld.so.cache", dir);
    let cache = format!("{}/ld.so.cache", dir);

    write(&conf, conf_contents(dir, extra_dirs)?).prepend_io(|| conf.clone())?;

    let mut command = Command::new(ldconfig);

    command.arg("-f").arg(&conf).arg("-C").arg(&staging).arg("-X");

    if verbose {
        command.arg("-v");
    }

    match wait_helper("ldconfig", &mut command)? {
        0 => (),
        code => err!(ErrorKind::ChildFailure("ldconfig", code))?,
    }

    rename(&staging, &cache).prepend_io(|| cache.clone())
}

fn conf_contents(dir: &str, extra_dirs: &[String]) -> Result<String> {
    let mut contents = String::new();

    for extra in extra_dirs {
        if !extra.starts_with('/') {
            err!(LdCacheError::UnabsolutePath(extra.clone()))?
        }

        if extra.contains('\n') || extra.contains('\t') {
            err!(LdCacheError::UnrepresentablePath(extra.clone()))?
        }

        contents.push_str(extra);
        contents.push('\n');
    }

    let runtime_conf = format!("{}/runtime-ld.so.conf", dir);

    contents.push_str(&read_to_string(&runtime_conf).prepend_io(|| runtime_conf.clone())?);
    Ok(contents)
}

#[cfg(test)]
mod test {
    use std::{fs::create_dir_all, os::unix::fs::PermissionsExt, path::Path};

    use super::*;

    fn scratch(name: &str) -> String {
        let dir = format!("{}/gamewrap-ldcache-{}-{}", std::env::temp_dir().display(), std::process::id(), name);

        create_dir_all(&dir).unwrap();
        dir
    }

    /* Stands in for ldconfig: copies its -f input to its -C output. */
    fn shim(dir: &str) -> String {
        let path = format!("{}/fake-ldconfig", dir);

        write(&path, "#!/bin/sh\nwhile [ $# -gt 0 ]; do\n  case $1 in\n    -f) conf=$2; shift 2;;\n    -C) out=$2; shift 2;;\n    *) shift;;\n  esac\ndone\ncat \"$conf\" > \"$out\"\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn conf_prepends_extras() {
        let dir = scratch("conf");

        write(format!("{}/runtime-ld.so.conf", dir), "/usr/lib/x86_64-linux-gnu\n").unwrap();

        let contents = conf_contents(&dir, &["/overrides/lib/x86_64-linux-gnu".into()]).unwrap();

        assert_eq!(contents, "/overrides/lib/x86_64-linux-gnu\n/usr/lib/x86_64-linux-gnu\n");
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn rejects_bad_paths() {
        let dir = scratch("bad");

        write(format!("{}/runtime-ld.so.conf", dir), "").unwrap();

        assert_eq!(conf_contents(&dir, &["relative/lib".into()]).unwrap_err().code(), EX_USAGE);
        assert!(conf_contents(&dir, &["/lib\nwith-newline".into()]).is_err());
        assert!(conf_contents(&dir, &["/lib\twith-tab".into()]).is_err());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn regenerates_atomically() {
        let dir = scratch("atomic");

        write(format!("{}/runtime-ld.so.conf", dir), "/usr/lib\n").unwrap();

        let ldconfig = shim(&dir);

        regenerate_with(&ldconfig, &dir, &["/overrides/lib".into()], false).unwrap();

        assert!(!Path::new(&format!("{}/new-ld.so.cache", dir)).exists());
        assert_eq!(read_to_string(format!("{}/ld.so.cache", dir)).unwrap(), "/overrides/lib\n/usr/lib\n");

        /* Same inputs, same bytes. */
        regenerate_with(&ldconfig, &dir, &["/overrides/lib".into()], false).unwrap();
        assert_eq!(read_to_string(format!("{}/ld.so.cache", dir)).unwrap(), "/overrides/lib\n/usr/lib\n");
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
