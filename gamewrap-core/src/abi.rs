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

use std::{fs::create_dir_all, os::unix::fs::symlink};

use crate::{error::*, utils::basename};

/*
 * Placeholder expanded by the dynamic linker at load time. A single
 * environment value containing this token multiplexes every ABI: each
 * dlopen site resolves it to the platform of the loading process.
 */
pub const DL_TOKEN: &str = "${PLATFORM}-linux-gnu";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Abi {
    pub tuple: &'static str,
    pub libqual: &'static str,
    /* Values the dynamic linker may substitute for ${PLATFORM}. */
    pub platforms: &'static [&'static str],
    /* Canonical interpreter path inside a runtime of this ABI. */
    pub ld_so: &'static str,
    /* Directory suffixes identifying this ABI in vendor library paths. */
    pub dir_suffixes: &'static [&'static str],
}

pub const X86_64: Abi = Abi {
    tuple: "x86_64-linux-gnu",
    libqual: "lib64",
    platforms: &["x86_64", "haswell", "xeon_phi"],
    ld_so: "/lib64/ld-linux-x86-64.so.2",
    dir_suffixes: &["/x86_64-linux-gnu", "/lib64", "/ubuntu12_64"],
};

pub const I386: Abi = Abi {
    tuple: "i386-linux-gnu",
    libqual: "lib32",
    platforms: &["i386", "i486", "i586", "i686"],
    ld_so: "/lib/ld-linux.so.2",
    dir_suffixes: &["/i386-linux-gnu", "/lib32", "/ubuntu12_32"],
};

pub const SUPPORTED_ABIS: &[Abi] = &[X86_64, I386];

impl Abi {
    pub fn from_tuple(tuple: &str) -> Option<&'static Abi> {
        SUPPORTED_ABIS.iter().find(|abi| abi.tuple == tuple)
    }

    /*
     * Infer an ABI from a library's containing directory, for vendor trees
     * that encode the ABI in the path rather than the multiarch tuple.
     */
    pub fn from_dir_suffix(dir: &str) -> Option<&'static Abi> {
        let dir = dir.trim_end_matches('/');

        SUPPORTED_ABIS
            .iter()
            .find(|abi| abi.dir_suffixes.iter().any(|suffix| dir.ends_with(suffix)))
    }

    /* Library directories scanned for drivers, most specific first. */
    pub fn search_dirs(&self) -> Vec<String> {
        vec![
            format!("/lib/{}", self.tuple),
            format!("/usr/lib/{}", self.tuple),
            "/lib".into(),
            "/usr/lib".into(),
            format!("/{}", self.libqual),
            format!("/usr/{}", self.libqual),
        ]
    }
}

/*
 * Create ${root}/${tuple} plus one alias symlink per ${PLATFORM} expansion
 * so the token path resolves for every platform string the linker may
 * produce. Idempotent.
 */
pub fn ensure_abi_dir(root: &str, abi: &Abi) -> Result<String> {
    let dir = format!("{}/{}", root, abi.tuple);

    create_dir_all(&dir).prepend_io(|| dir.clone())?;

    for platform in abi.platforms {
        let alias = format!("{}/{}-linux-gnu", root, platform);

        if alias == dir {
            continue;
        }

        match symlink(abi.tuple, &alias) {
            Ok(()) => (),
            Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists => (),
            Err(error) => Err(error).prepend_io(|| alias.clone())?,
        }
    }

    Ok(dir)
}

/* The in-variable form of a module path: ${root}/${DL_TOKEN}/${basename}. */
pub fn token_path(root: &str, module: &str) -> String {
    format!("{}/{}/{}", root, DL_TOKEN, basename(module))
}

#[cfg(test)]
mod test {
    use std::path::Path;

    use super::*;

    #[test]
    fn tuple_lookup() {
        assert_eq!(Abi::from_tuple("x86_64-linux-gnu"), Some(&X86_64));
        assert_eq!(Abi::from_tuple("i386-linux-gnu"), Some(&I386));
        assert_eq!(Abi::from_tuple("aarch64-linux-gnu"), None);
    }

    #[test]
    fn overlay_dir_inference() {
        assert_eq!(Abi::from_dir_suffix("/home/gamer/.steam/ubuntu12_32"), Some(&I386));
        assert_eq!(Abi::from_dir_suffix("/home/gamer/.steam/ubuntu12_64/"), Some(&X86_64));
        assert_eq!(Abi::from_dir_suffix("/usr/lib/x86_64-linux-gnu"), Some(&X86_64));
        assert_eq!(Abi::from_dir_suffix("/opt/vendor"), None);
    }

    #[test]
    fn token_path_shape() {
        assert_eq!(
            token_path("/overrides", "/usr/lib/i386-linux-gnu/libfoo.so"),
            "/overrides/${PLATFORM}-linux-gnu/libfoo.so"
        );
    }

    #[test]
    fn abi_dir_aliases() {
        let root = format!("{}/gamewrap-abi-{}", std::env::temp_dir().display(), std::process::id());
        let dir = ensure_abi_dir(&root, &I386).unwrap();

        assert!(Path::new(&dir).is_dir());

        for platform in I386.platforms {
            let alias = format!("{}/{}-linux-gnu", root, platform);

            assert!(Path::new(&alias).exists(), "missing alias {}", alias);
        }

        /* Second run is a no-op. */
        ensure_abi_dir(&root, &I386).unwrap();
        std::fs::remove_dir_all(&root).unwrap();
    }
}
