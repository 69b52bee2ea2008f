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

use std::{fs::create_dir_all, os::unix::fs::symlink, path::Path};

use crate::{constants::HOME, err, error::*, Error, ErrorKind};

/*
 * How the container sees $HOME: the real one, or a per-app private tree
 * mounted over it so games cannot scribble on the user's actual dotfiles.
 */
#[derive(Debug, Clone, PartialEq)]
pub enum HomeMode {
    Shared,
    Private(String),
}

pub fn plan(share_home: Option<bool>, home_override: Option<&str>, app_id: Option<&str>) -> Result<HomeMode> {
    match share_home {
        Some(true) | None => Ok(HomeMode::Shared),
        Some(false) => {
            if let Some(path) = home_override {
                return Ok(HomeMode::Private(path.into()));
            }

            match app_id {
                Some(id) => Ok(HomeMode::Private(format!("{}/.var/app/{}/home", *HOME, id))),
                None => err!(ErrorKind::Usage(
                    "An app id (--freedesktop-app-id or --steam-app-id) is required to unshare the home directory.".into()
                )),
            }
        }
    }
}

/*
 * Flatpak-style private home: XDG base dirs plus short compatibility
 * symlinks. Idempotent, and never touches entries the user replaced.
 */
pub fn prepare(fake_home: &str) -> Result<()> {
    for dir in [".cache", ".config", ".local/share"] {
        let path = format!("{}/{}", fake_home, dir);

        create_dir_all(&path).prepend_io(|| path.clone())?;
    }

    for (target, link) in [(".cache", "cache"), (".config", "config"), (".local/share", "data")] {
        let link_path = format!("{}/{}", fake_home, link);

        match symlink(target, &link_path) {
            Ok(()) => (),
            Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists => (),
            Err(error) => Err(error).prepend_io(|| link_path.clone())?,
        }
    }

    Ok(())
}

pub fn apply(mode: &HomeMode, args: &mut crate::exec::args::ExecutionArgs) -> Result<()> {
    match mode {
        HomeMode::Shared => {
            args.bind(&HOME, &HOME);
        }
        HomeMode::Private(fake_home) => {
            prepare(fake_home)?;
            args.bind(fake_home, &HOME);
            args.setenv("XDG_CACHE_HOME", &format!("{}/.cache", *HOME));
            args.setenv("XDG_CONFIG_HOME", &format!("{}/.config", *HOME));
            args.setenv("XDG_DATA_HOME", &format!("{}/.local/share", *HOME));
        }
    }

    args.setenv("HOME", &HOME);
    Ok(())
}
