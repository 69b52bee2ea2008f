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

use std::{fs::read_dir, process::Command};

use crate::{
    constants::{EX_OSFILE, LOCALE_GEN_EXECUTABLE},
    err,
    error::*,
    exec::wait_helper,
    utils::{helper_path, print_warning},
    Error,
    ErrorKind,
};

/*
 * Populate dir with any locales the surrounding OS is missing. The helper
 * signals "locales were missing and have been generated" with EX_OSFILE,
 * which is success with a cold-start warning rather than a failure. True
 * means the directory is non-empty and the caller should point LOCPATH at
 * it.
 */
pub fn generate(dir: &str) -> Result<bool> {
    let helper = match helper_path(LOCALE_GEN_EXECUTABLE) {
        Some(helper) => helper,
        None => err!(ErrorKind::Unsupported(format!("'{}' helper not found", LOCALE_GEN_EXECUTABLE)))?,
    };

    generate_with(&helper, dir)
}

pub fn generate_with(helper: &str, dir: &str) -> Result<bool> {
    let mut command = Command::new(helper);

    command.arg("--output-dir").arg(dir).arg("--verbose");

    match wait_helper("locale-gen", &mut command)? {
        0 => (),
        EX_OSFILE => print_warning("Locales were missing at OS level; generated copies will slow down this launch."),
        code => err!(ErrorKind::ChildFailure("locale-gen", code))?,
    }

    Ok(read_dir(dir).map(|mut entries| entries.next().is_some()).unwrap_or(false))
}

#[cfg(test)]
mod test {
    use std::{
        fs::{create_dir_all, write},
        os::unix::fs::PermissionsExt,
    };

    use super::*;

    fn scratch(name: &str) -> String {
        let dir = format!("{}/gamewrap-locale-{}-{}", std::env::temp_dir().display(), std::process::id(), name);

        create_dir_all(&dir).unwrap();
        dir
    }

    fn shim(dir: &str, script: &str) -> String {
        let path = format!("{}/fake-locale-gen", dir);

        write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn missing_locales_exit_code_is_success() {
        let dir = scratch("osfile");
        let output = scratch("osfile-out");
        let helper = shim(&dir, "#!/bin/sh\nshift\ntouch \"$1/en_US.UTF-8\"\nexit 72\n");

        assert!(generate_with(&helper, &output).unwrap());
        std::fs::remove_dir_all(&dir).unwrap();
        std::fs::remove_dir_all(&output).unwrap();
    }

    #[test]
    fn empty_output_reports_false() {
        let dir = scratch("empty");
        let output = scratch("empty-out");
        let helper = shim(&dir, "#!/bin/sh\nexit 0\n");

        assert!(!generate_with(&helper, &output).unwrap());
        std::fs::remove_dir_all(&dir).unwrap();
        std::fs::remove_dir_all(&output).unwrap();
    }

    #[test]
    fn other_failures_surface() {
        let dir = scratch("fail");
        let output = scratch("fail-out");
        let helper = shim(&dir, "#!/bin/sh\nexit 1\n");

        assert!(generate_with(&helper, &output).is_err());
        std::fs::remove_dir_all(&dir).unwrap();
        std::fs::remove_dir_all(&output).unwrap();
    }
}
