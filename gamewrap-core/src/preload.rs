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
    fs::read_link,
    os::unix::fs::symlink,
    path::Path,
};

use indexmap::IndexSet;

use crate::{
    abi::{ensure_abi_dir, token_path, Abi},
    constants::{EX_UNAVAILABLE, EX_USAGE, GAME_OVERLAY_BASENAME},
    err,
    error::*,
    exec::environ::Environ,
    utils::{basename, dirname, print_warning},
    Error,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PreloadKind {
    LdAudit,
    LdPreload,
}

impl PreloadKind {
    pub fn variable(&self) -> &'static str {
        match self {
            Self::LdAudit => "LD_AUDIT",
            Self::LdPreload => "LD_PRELOAD",
        }
    }
}

#[derive(Debug)]
pub enum PreloadError {
    UnknownAbi(String, String),
    MalformedOption(String),
    ConflictingLink(String, String),
}

impl Display for PreloadError {
    fn fmt(&self, fmter: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::UnknownAbi(module, abi) => write!(fmter, "Preload module '{}': unsupported ABI '{}'", module, abi),
            Self::MalformedOption(option) => write!(fmter, "Malformed preload option '{}'", option),
            Self::ConflictingLink(link, target) => {
                write!(fmter, "Preload link '{}' already points elsewhere than '{}'", link, target)
            }
        }
    }
}

impl ErrorTrait for PreloadError {
    fn code(&self) -> i32 {
        match self {
            Self::ConflictingLink(..) => EX_UNAVAILABLE,
            _ => EX_USAGE,
        }
    }
}

/*
 * One MODULE[:abi=TUPLE] occurrence of --ld-audit/--ld-preload, consumed
 * once when the final per-variable search paths are computed.
 */
#[derive(Debug, Clone)]
pub struct PreloadModule {
    pub kind: PreloadKind,
    pub module: String,
    pub abi: Option<&'static Abi>,
}

impl PreloadModule {
    pub fn parse(kind: PreloadKind, option: &str) -> Result<Self> {
        let (module, abi) = match option.split_once(":abi=") {
            Some((module, tuple)) => match Abi::from_tuple(tuple) {
                Some(abi) => (module, Some(abi)),
                None => err!(PreloadError::UnknownAbi(module.into(), tuple.into()))?,
            },
            None => (option, None),
        };

        if module.is_empty() {
            err!(PreloadError::MalformedOption(option.into()))?
        }

        Ok(Self {
            kind,
            module: module.into(),
            abi,
        })
    }
}

pub struct PreloadResolver {
    root: String,
    verbose: bool,
}

impl PreloadResolver {
    pub fn new(root: &str, verbose: bool) -> Self {
        Self {
            root: root.into(),
            verbose,
        }
    }

    /*
     * Compute the final LD_AUDIT/LD_PRELOAD values. ABI-tagged modules are
     * linked into their per-ABI directory and referenced through the
     * ${PLATFORM} token so a single colon-joined value loads the right
     * library at every dlopen site; untagged modules pass through
     * unchanged. Entries are deduplicated preserving first appearance, and
     * an empty result forces the variable unset rather than empty.
     */
    pub fn resolve(&self, modules: &[PreloadModule], env: &mut Environ) -> Result<()> {
        let mut audit: IndexSet<String> = IndexSet::new();
        let mut preload: IndexSet<String> = IndexSet::new();

        for module in modules {
            let search = match module.kind {
                PreloadKind::LdAudit => &mut audit,
                PreloadKind::LdPreload => &mut preload,
            };
            let abi = module.abi.or_else(|| infer_overlay_abi(&module.module));

            if !Path::new(&module.module).exists() {
                if self.verbose {
                    print_warning(&format!("Preload module '{}' not found; ignoring", module.module));
                }

                continue;
            }

            match abi {
                Some(abi) => {
                    let dir = ensure_abi_dir(&self.root, abi)?;
                    let link = format!("{}/{}", dir, basename(&module.module));

                    self.link_module(&link, &module.module)?;
                    search.insert(token_path(&self.root, &module.module));
                }
                None => {
                    search.insert(module.module.clone());
                }
            }
        }

        apply(env, PreloadKind::LdAudit, &audit);
        apply(env, PreloadKind::LdPreload, &preload);
        Ok(())
    }

    fn link_module(&self, link: &str, target: &str) -> Result<()> {
        match symlink(target, link) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists => {
                match read_link(link).map(|existing| existing.as_os_str() == std::ffi::OsStr::new(target)) {
                    Ok(true) => Ok(()),
                    _ => err!(PreloadError::ConflictingLink(link.into(), target.into())),
                }
            }
            Err(error) => Err(error).prepend_io(|| link.into()),
        }
    }
}

fn apply(env: &mut Environ, kind: PreloadKind, search: &IndexSet<String>) {
    match search.is_empty() {
        true => env.unset(kind.variable()),
        false => env.set(kind.variable(), &search.iter().cloned().collect::<Vec<_>>().join(":"), true),
    }
}

/*
 * The Steam overlay ships without ABI tags; its vendor directory layout is
 * the only hint.
 */
fn infer_overlay_abi(module: &str) -> Option<&'static Abi> {
    match basename(module) == GAME_OVERLAY_BASENAME {
        true => Abi::from_dir_suffix(dirname(module)),
        false => None,
    }
}

#[cfg(test)]
mod test {
    use std::fs::{create_dir_all, write};

    use super::*;

    fn scratch(name: &str) -> String {
        let dir = format!("{}/gamewrap-preload-{}-{}", std::env::temp_dir().display(), std::process::id(), name);

        create_dir_all(&dir).unwrap();
        dir
    }

    fn plant(dir: &str, rel: &str) -> String {
        let path = format!("{}/{}", dir, rel);

        create_dir_all(dirname(&path)).unwrap();
        write(&path, "elf").unwrap();
        path
    }

    #[test]
    fn per_abi_multiplexing() {
        let host = scratch("host");
        let overrides = scratch("mux");
        let lib64 = plant(&host, "lib/x86_64-linux-gnu/libfoo.so");
        let lib32 = plant(&host, "lib/i386-linux-gnu/libfoo.so");
        let modules = vec![
            PreloadModule::parse(PreloadKind::LdPreload, &format!("{}:abi=x86_64-linux-gnu", lib64)).unwrap(),
            PreloadModule::parse(PreloadKind::LdPreload, &format!("{}:abi=i386-linux-gnu", lib32)).unwrap(),
        ];
        let mut env = Environ::new();

        PreloadResolver::new(&overrides, false).resolve(&modules, &mut env).unwrap();

        /* One symlink per ABI, one deduplicated token entry. */
        assert_eq!(
            read_link(format!("{}/x86_64-linux-gnu/libfoo.so", overrides)).unwrap().to_str().unwrap(),
            lib64
        );
        assert_eq!(
            read_link(format!("{}/i386-linux-gnu/libfoo.so", overrides)).unwrap().to_str().unwrap(),
            lib32
        );
        assert_eq!(env.get("LD_PRELOAD"), Some(format!("{}/${{PLATFORM}}-linux-gnu/libfoo.so", overrides).as_str()));

        std::fs::remove_dir_all(&host).unwrap();
        std::fs::remove_dir_all(&overrides).unwrap();
    }

    #[test]
    fn untagged_passes_through_ordered() {
        let host = scratch("raw");
        let first = plant(&host, "lib/libfirst.so");
        let second = plant(&host, "lib/libsecond.so");
        let overrides = scratch("raw-overrides");
        let modules = vec![
            PreloadModule::parse(PreloadKind::LdPreload, &first).unwrap(),
            PreloadModule::parse(PreloadKind::LdPreload, &second).unwrap(),
            PreloadModule::parse(PreloadKind::LdPreload, &first).unwrap(),
        ];
        let mut env = Environ::new();

        PreloadResolver::new(&overrides, false).resolve(&modules, &mut env).unwrap();
        assert_eq!(env.get("LD_PRELOAD"), Some(format!("{}:{}", first, second).as_str()));

        std::fs::remove_dir_all(&host).unwrap();
        std::fs::remove_dir_all(&overrides).unwrap();
    }

    #[test]
    fn empty_forces_unset() {
        let overrides = scratch("empty");
        let mut env = Environ::new();

        env.set("LD_PRELOAD", "/stale/libold.so", true);
        PreloadResolver::new(&overrides, false).resolve(&[], &mut env).unwrap();

        assert_eq!(env.policy("LD_PRELOAD"), Some(&crate::exec::environ::EnvPolicy::Unset));
        assert_eq!(env.policy("LD_AUDIT"), Some(&crate::exec::environ::EnvPolicy::Unset));

        std::fs::remove_dir_all(&overrides).unwrap();
    }

    #[test]
    fn missing_module_dropped() {
        let overrides = scratch("gone");
        let modules = vec![PreloadModule::parse(PreloadKind::LdPreload, "/nonexistent/libgone.so").unwrap()];
        let mut env = Environ::new();

        PreloadResolver::new(&overrides, false).resolve(&modules, &mut env).unwrap();
        assert_eq!(env.get("LD_PRELOAD"), None);

        std::fs::remove_dir_all(&overrides).unwrap();
    }

    #[test]
    fn overlay_abi_inferred() {
        let host = scratch("overlay");
        let overlay = plant(&host, "ubuntu12_32/gameoverlayrenderer.so");
        let overrides = scratch("overlay-overrides");
        let modules = vec![PreloadModule::parse(PreloadKind::LdPreload, &overlay).unwrap()];
        let mut env = Environ::new();

        PreloadResolver::new(&overrides, false).resolve(&modules, &mut env).unwrap();

        assert!(Path::new(&format!("{}/i386-linux-gnu/gameoverlayrenderer.so", overrides)).exists());
        assert_eq!(
            env.get("LD_PRELOAD"),
            Some(format!("{}/${{PLATFORM}}-linux-gnu/gameoverlayrenderer.so", overrides).as_str())
        );

        std::fs::remove_dir_all(&host).unwrap();
        std::fs::remove_dir_all(&overrides).unwrap();
    }

    #[test]
    fn conflicting_link_rejected() {
        let host = scratch("conflict-host");
        let lib_a = plant(&host, "a/libfoo.so");
        let lib_b = plant(&host, "b/libfoo.so");
        let overrides = scratch("conflict");
        let modules = vec![
            PreloadModule::parse(PreloadKind::LdPreload, &format!("{}:abi=x86_64-linux-gnu", lib_a)).unwrap(),
            PreloadModule::parse(PreloadKind::LdPreload, &format!("{}:abi=x86_64-linux-gnu", lib_b)).unwrap(),
        ];
        let mut env = Environ::new();
        let error = PreloadResolver::new(&overrides, false).resolve(&modules, &mut env).unwrap_err();

        assert!(error.downcast::<PreloadError>().is_ok_and(|e| matches!(e, PreloadError::ConflictingLink(..))));

        std::fs::remove_dir_all(&host).unwrap();
        std::fs::remove_dir_all(&overrides).unwrap();
    }

    #[test]
    fn unknown_abi_rejected() {
        let error = PreloadModule::parse(PreloadKind::LdAudit, "/lib/libfoo.so:abi=sparc64-linux-gnu").unwrap_err();

        assert_eq!(error.code(), EX_USAGE);
    }
}
