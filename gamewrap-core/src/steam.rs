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

use std::{env::var, fs::canonicalize, path::Path};

use crate::{constants::HOME, err, error::*, Error, ErrorKind};

/*
 * Valve never promised a single discovery mechanism, so this follows what
 * the client actually leaves behind: the compat tool variable when Steam
 * launched us, otherwise the ~/.steam symlink farm, otherwise the default
 * data directories.
 */
#[derive(Debug, Clone, PartialEq)]
pub struct SteamInstall {
    pub install_path: String,
    pub data_path: String,
}

pub fn discover() -> Result<SteamInstall> {
    discover_in(&HOME, var("STEAM_COMPAT_CLIENT_INSTALL_PATH").ok())
}

pub fn discover_in(home: &str, compat_install: Option<String>) -> Result<SteamInstall> {
    let data_path = format!("{}/.steam", home);

    if let Some(install) = compat_install {
        if Path::new(&install).is_dir() {
            return Ok(SteamInstall {
                install_path: install,
                data_path,
            });
        }
    }

    for link in ["root", "steam"] {
        let path = format!("{}/.steam/{}", home, link);

        if let Ok(resolved) = canonicalize(&path) {
            if resolved.is_dir() {
                return Ok(SteamInstall {
                    install_path: resolved.display().to_string(),
                    data_path,
                });
            }
        }
    }

    for fallback in [
        format!("{}/.local/share/Steam", home),
        format!("{}/.var/app/com.valvesoftware.Steam/.local/share/Steam", home),
    ] {
        if Path::new(&fallback).is_dir() {
            return Ok(SteamInstall {
                install_path: fallback,
                data_path,
            });
        }
    }

    err!(ErrorKind::Unsupported("Unable to locate a Steam installation.".into()))
}

/*
 * Reverse-DNS app id for per-app state: an explicit id wins, then the
 * Steam app id in the conventional namespace.
 */
pub fn freedesktop_app_id(explicit: Option<&str>, steam_app_id: Option<&str>) -> Option<String> {
    match explicit {
        Some(id) if !id.is_empty() => Some(id.into()),
        _ => match steam_app_id {
            Some(id) if !id.is_empty() => Some(format!("com.steampowered.App{}", id)),
            _ => None,
        },
    }
}

#[cfg(test)]
mod test {
    use std::{
        fs::{create_dir_all, write},
        os::unix::fs::symlink,
    };

    use super::*;

    fn scratch(name: &str) -> String {
        let dir = format!("{}/gamewrap-steam-{}-{}", std::env::temp_dir().display(), std::process::id(), name);

        create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn compat_variable_wins() {
        let home = scratch("compat");
        let install = format!("{}/custom-steam", home);

        create_dir_all(&install).unwrap();
        create_dir_all(format!("{}/.local/share/Steam", home)).unwrap();

        let found = discover_in(&home, Some(install.clone())).unwrap();

        assert_eq!(found.install_path, install);
        std::fs::remove_dir_all(&home).unwrap();
    }

    #[test]
    fn symlink_farm_resolution() {
        let home = scratch("farm");
        let install = format!("{}/steam-install", home);

        create_dir_all(&install).unwrap();
        create_dir_all(format!("{}/.steam", home)).unwrap();
        symlink(&install, format!("{}/.steam/root", home)).unwrap();

        let found = discover_in(&home, None).unwrap();

        assert_eq!(found.install_path, install);
        assert_eq!(found.data_path, format!("{}/.steam", home));
        std::fs::remove_dir_all(&home).unwrap();
    }

    #[test]
    fn dangling_symlink_falls_through() {
        let home = scratch("dangling");

        create_dir_all(format!("{}/.steam", home)).unwrap();
        symlink("/nonexistent", format!("{}/.steam/root", home)).unwrap();
        create_dir_all(format!("{}/.local/share/Steam", home)).unwrap();
        write(format!("{}/.local/share/Steam/steam.sh", home), "").unwrap();

        let found = discover_in(&home, None).unwrap();

        assert_eq!(found.install_path, format!("{}/.local/share/Steam", home));
        std::fs::remove_dir_all(&home).unwrap();
    }

    #[test]
    fn missing_install_is_unsupported() {
        let home = scratch("none");

        assert!(discover_in(&home, None).is_err());
        std::fs::remove_dir_all(&home).unwrap();
    }

    #[test]
    fn app_id_derivation() {
        assert_eq!(freedesktop_app_id(Some("org.example.Game"), Some("440")).as_deref(), Some("org.example.Game"));
        assert_eq!(freedesktop_app_id(None, Some("440")).as_deref(), Some("com.steampowered.App440"));
        assert_eq!(freedesktop_app_id(None, None), None);
        assert_eq!(freedesktop_app_id(Some(""), Some("")), None);
    }
}
