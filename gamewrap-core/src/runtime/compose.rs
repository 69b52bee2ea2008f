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
    fs::{read_dir, read_link},
    path::Path,
};

use crate::{
    constants::{CONTAINER_RUNTIME_DIR, HOST_MOUNT, OVERRIDES_MOUNT},
    error::*,
    exec::args::ExecutionArgs,
    log::Logger,
    runtime::Runtime,
};

/* Aliases of /usr that either mirror the host or collapse into symlinks. */
const USR_ALIASES: &[&str] = &["bin", "sbin", "lib", "lib32", "lib64", "libexec"];

/* Mutable state mirrored entry-by-entry from the runtime. */
const MUTABLE_TREES: &[&str] = &["etc", "var/cache", "var/lib"];

/*
 * Identity-bearing files that must come from the host, never the runtime.
 */
const MUTABLE_DENYLIST: &[&str] = &[
    "/etc/group",
    "/etc/hosts",
    "/etc/machine-id",
    "/etc/passwd",
    "/etc/resolv.conf",
    "/var/lib/dbus",
    "/var/lib/dhcp",
    "/var/lib/sudo",
    "/var/lib/urandom",
];

const HOST_COPIES: &[&str] = &[
    "/etc/machine-id",
    "/etc/resolv.conf",
    "/etc/host.conf",
    "/etc/hosts",
    "/etc/passwd",
    "/etc/group",
];

/*
 * Emits the container's filesystem plan: the runtime as /usr, mutable
 * state mirrored read-only, identity files from the host, the whole host
 * tree at /run/host for captured graphics, and the overrides tree last.
 * The overrides directory must be fully populated before the argv this
 * contributes to is executed.
 */
pub struct Composer<'a> {
    runtime: &'a Runtime,
    host_root: String,
}

impl<'a> Composer<'a> {
    pub fn new(runtime: &'a Runtime) -> Self {
        Self {
            runtime,
            host_root: String::new(),
        }
    }

    /* Tests point the host at a fabricated tree. */
    pub fn with_host_root(mut self, root: &str) -> Self {
        self.host_root = root.trim_end_matches('/').into();
        self
    }

    pub fn compose(&self, args: &mut ExecutionArgs, logger: &Logger) -> Result<()> {
        self.mount_usr(args)?;
        self.bind_runtime_etc(args);
        self.mount_volatile(args);
        self.mirror_mutable_trees(args, logger)?;
        self.bind_host_copies(args);

        args.robind(&self.host_path("/"), HOST_MOUNT);
        Ok(())
    }

    pub fn mount_overrides(&self, args: &mut ExecutionArgs) {
        args.robind(self.runtime.overrides(), OVERRIDES_MOUNT);
    }

    fn host_path(&self, path: &str) -> String {
        match self.host_root.is_empty() {
            true => path.into(),
            false => format!("{}{}", self.host_root, path),
        }
    }

    fn mount_usr(&self, args: &mut ExecutionArgs) -> Result<()> {
        args.robind(self.runtime.usr(), "/usr");

        for alias in USR_ALIASES {
            let in_runtime = match self.runtime.is_sysroot() {
                true => self.runtime.path(alias),
                false => format!("{}/{}", self.runtime.usr(), alias),
            };
            let dest = format!("/{}", alias);

            match read_link(&in_runtime) {
                /* The runtime dictates its own merged-usr layout. */
                Ok(target) => args.symlink(target.to_str().unwrap_or_default(), &dest),
                Err(_) => match self.runtime.is_sysroot() && Path::new(&in_runtime).is_dir() {
                    true => args.robind(&in_runtime, &dest),
                    false => {
                        if Path::new(&format!("{}/{}", self.runtime.usr(), alias)).is_dir() {
                            args.symlink(&format!("usr/{}", alias), &dest);
                        }
                    }
                },
            }
        }

        Ok(())
    }

    fn bind_runtime_etc(&self, args: &mut ExecutionArgs) {
        for path in ["etc/alternatives", "etc/ld.so.cache"] {
            let in_runtime = self.runtime.path(path);

            if Path::new(&in_runtime).exists() {
                args.robind(&in_runtime, &format!("/{}", path));
            }
        }
    }

    fn mount_volatile(&self, args: &mut ExecutionArgs) {
        args.tmpfs("/run");
        args.tmpfs("/tmp");
        args.tmpfs("/var");
        args.symlink("../run", "/var/run");
        args.dir(&CONTAINER_RUNTIME_DIR);
        args.setenv("XDG_RUNTIME_DIR", &CONTAINER_RUNTIME_DIR);
    }

    /*
     * Each child of the runtime's etc, var/cache and var/lib appears in
     * the container as a symlink (preserving the runtime's target) or a
     * read-only bind, minus the identity denylist.
     */
    fn mirror_mutable_trees(&self, args: &mut ExecutionArgs, logger: &Logger) -> Result<()> {
        if !self.runtime.is_sysroot() {
            return Ok(());
        }

        for tree in MUTABLE_TREES {
            let source = self.runtime.path(tree);
            let entries = match read_dir(&source) {
                Ok(entries) => entries,
                Err(_) => {
                    logger.debug(&format!("Runtime has no {}", tree));
                    continue;
                }
            };
            let mut names: Vec<String> = entries
                .filter_map(|entry| entry.ok())
                .filter_map(|entry| entry.file_name().into_string().ok())
                .collect();

            names.sort();

            for name in names {
                let dest = format!("/{}/{}", tree, name);

                if MUTABLE_DENYLIST.contains(&dest.as_str()) {
                    continue;
                }

                let in_runtime = format!("{}/{}", source, name);

                match read_link(&in_runtime) {
                    Ok(target) => args.symlink(target.to_str().unwrap_or_default(), &dest),
                    Err(_) => args.robind(&in_runtime, &dest),
                }
            }
        }

        Ok(())
    }

    fn bind_host_copies(&self, args: &mut ExecutionArgs) {
        for path in HOST_COPIES {
            if Path::new(&self.host_path(path)).exists() {
                args.robind(&self.host_path(path), path);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::{
        fs::{create_dir_all, write},
        os::unix::fs::symlink,
    };

    use super::*;
    use crate::runtime::RuntimeBuilder;

    fn scratch(name: &str) -> String {
        let dir = format!("{}/gamewrap-compose-{}-{}", std::env::temp_dir().display(), std::process::id(), name);

        create_dir_all(&dir).unwrap();
        dir
    }

    fn plant_runtime(root: &str) {
        create_dir_all(format!("{}/usr/bin", root)).unwrap();
        create_dir_all(format!("{}/usr/lib", root)).unwrap();
        create_dir_all(format!("{}/etc", root)).unwrap();
        create_dir_all(format!("{}/var/lib/dbus", root)).unwrap();
        create_dir_all(format!("{}/var/lib/apt", root)).unwrap();
        symlink("usr/bin", format!("{}/bin", root)).unwrap();
        symlink("usr/lib", format!("{}/lib", root)).unwrap();
        write(format!("{}/etc/ld.so.cache", root), "cache").unwrap();
        write(format!("{}/etc/passwd", root), "runtime-passwd").unwrap();
        write(format!("{}/etc/profile", root), "profile").unwrap();
        symlink("../usr/share/zoneinfo/UTC", format!("{}/etc/localtime", root)).unwrap();
    }

    fn rendered(args: &ExecutionArgs) -> Vec<String> {
        args.args().iter().flatten().map(|arg| arg.to_str().unwrap().to_string()).collect()
    }

    fn window(args: &[String], flag: &str, first: &str) -> Option<Vec<String>> {
        args.windows(3)
            .find(|window| window[0] == flag && window[1] == first)
            .map(|window| window.to_vec())
    }

    #[test]
    fn plan_mounts_runtime_and_host() {
        let root = scratch("plan");
        let host = scratch("plan-host");

        plant_runtime(&root);
        create_dir_all(format!("{}/etc", host)).unwrap();
        write(format!("{}/etc/passwd", host), "host-passwd").unwrap();
        write(format!("{}/etc/machine-id", host), "abc").unwrap();

        let logger = Logger::new("test");
        let runtime = RuntimeBuilder::new(&root).build(&logger).unwrap();
        let composer = Composer::new(&runtime).with_host_root(&host);
        let mut args = ExecutionArgs::new();

        composer.compose(&mut args, &logger).unwrap();

        let argv = rendered(&args);

        /* Runtime /usr and merged-usr aliases. */
        assert!(window(&argv, "--ro-bind", &format!("{}/usr", root)).is_some());
        assert_eq!(window(&argv, "--symlink", "usr/bin").unwrap()[2], "/bin");

        /* Runtime etc entries mirrored; denylist filtered. */
        assert!(window(&argv, "--ro-bind", &format!("{}/etc/profile", root)).is_some());
        assert!(window(&argv, "--symlink", "../usr/share/zoneinfo/UTC").is_some());
        assert!(!argv.iter().any(|arg| arg == &format!("{}/etc/passwd", root)));
        assert!(!argv.iter().any(|arg| arg == "/var/lib/dbus"));
        assert!(argv.iter().any(|arg| arg == "/var/lib/apt"));

        /* Host identity files win. */
        let passwd = window(&argv, "--ro-bind", &format!("{}/etc/passwd", host)).unwrap();

        assert_eq!(passwd[2], "/etc/passwd");

        /* Host tree appears at /run/host. */
        assert_eq!(window(&argv, "--ro-bind", &format!("{}/", host)).unwrap()[2], HOST_MOUNT);

        runtime.cleanup();
        std::fs::remove_dir_all(&root).unwrap();
        std::fs::remove_dir_all(&host).unwrap();
    }

    #[test]
    fn volatile_mounts() {
        let root = scratch("volatile");

        plant_runtime(&root);

        let logger = Logger::new("test");
        let runtime = RuntimeBuilder::new(&root).build(&logger).unwrap();
        let mut args = ExecutionArgs::new();

        Composer::new(&runtime).compose(&mut args, &logger).unwrap();

        let argv = rendered(&args);

        for tmpfs in ["/run", "/tmp", "/var"] {
            assert!(window(&argv, "--tmpfs", tmpfs).is_some() || argv.iter().any(|arg| arg == tmpfs));
        }

        assert_eq!(window(&argv, "--symlink", "../run").unwrap()[2], "/var/run");

        runtime.cleanup();
        std::fs::remove_dir_all(&root).unwrap();
    }
}
