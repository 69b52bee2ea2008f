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

use std::{env::var, os::unix::net::UnixStream, path::Path};

use crate::{constants::PRGNAME, err, Error, ErrorKind, Result};

pub use arguments::Arguments;

pub mod arguments;

pub fn print_warning(message: &str) {
    eprintln!("{}: warning: {}", *PRGNAME, message);
}

pub fn print_error(message: &str) {
    eprintln!("{}: error: {}", *PRGNAME, message);
}

pub fn check_socket(socket: &str) -> bool {
    UnixStream::connect(Path::new(socket)).is_ok()
}

pub fn env_var(env: &'static str) -> Result<String> {
    match var(env) {
        Ok(var) => Ok(var),
        Err(_) => err!(ErrorKind::EnvVarUnset(env)),
    }
}

/* Interpret "1"/"true"/"yes" as enabled, anything else as disabled. */
pub fn env_flag(env: &str) -> Option<bool> {
    var(env).ok().map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
}

/*
 * Helpers ship alongside whichever binary is running: try the executable's
 * own directory first, then PATH.
 */
pub fn helper_path(name: &str) -> Option<String> {
    if let Ok(exe) = std::fs::read_link("/proc/self/exe") {
        if let Some(dir) = exe.parent() {
            let sibling = format!("{}/{}", dir.display(), name);

            if Path::new(&sibling).is_file() {
                return Some(sibling);
            }
        }
    }

    crate::exec::resolve_program(name)
}

pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

pub fn dirname(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(idx) => &path[.. idx],
        None => ".",
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn path_components() {
        assert_eq!(basename("/usr/lib/libfoo.so"), "libfoo.so");
        assert_eq!(basename("libfoo.so"), "libfoo.so");
        assert_eq!(dirname("/usr/lib/libfoo.so"), "/usr/lib");
        assert_eq!(dirname("/libfoo.so"), "/");
        assert_eq!(dirname("libfoo.so"), ".");
    }
}
