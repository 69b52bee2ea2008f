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
    ffi::{CStr, CString},
    fmt::{Debug, Formatter},
    os::unix::io::RawFd,
};

use nix::{
    errno::Errno,
    fcntl::{fcntl, FcntlArg, OFlag, SealFlag},
    sys::memfd::{memfd_create, MemFdCreateFlag},
    sys::stat::Mode,
    unistd::{close, lseek, write, Whence},
};

use crate::{error::*, exec::environ::Environ};

/*
 * Accumulates the command line and the ordered set of file descriptors a
 * child will inherit. Inherited fds keep their parent numbers: the spawn
 * path clears FD_CLOEXEC on exactly this set and closes everything else,
 * so any fd number embedded in an argument stays valid in the child.
 */
pub struct ExecutionArgs {
    args: Vec<Option<CString>>,
    fds: Vec<RawFd>,
    env: Environ,
    finished: bool,
}

impl Default for ExecutionArgs {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionArgs {
    pub fn new() -> Self {
        Self {
            args: Vec::new(),
            fds: Vec::new(),
            env: Environ::new(),
            finished: false,
        }
    }

    pub fn with_environ(env: Environ) -> Self {
        Self {
            env,
            ..Self::new()
        }
    }

    pub fn add_arg(&mut self, arg: &str) {
        assert!(!self.finished, "argument appended to a finished builder");
        self.args.push(Some(CString::new(arg).expect("argument contains an interior NUL")));
    }

    pub fn add_args(&mut self, args: &[&str]) {
        for arg in args {
            self.add_arg(arg);
        }
    }

    /* bwrap-flavoured conveniences. */
    pub fn bind(&mut self, src: &str, dest: &str) {
        self.add_args(&["--bind", src, dest]);
    }

    pub fn robind(&mut self, src: &str, dest: &str) {
        self.add_args(&["--ro-bind", src, dest]);
    }

    pub fn symlink(&mut self, target: &str, dest: &str) {
        self.add_args(&["--symlink", target, dest]);
    }

    pub fn dir(&mut self, dest: &str) {
        self.add_args(&["--dir", dest]);
    }

    pub fn tmpfs(&mut self, dest: &str) {
        self.add_args(&["--tmpfs", dest]);
    }

    pub fn setenv(&mut self, var: &str, value: &str) {
        self.add_args(&["--setenv", var, value]);
    }

    pub fn set_env(&mut self, name: &str, value: &str, overwrite: bool) {
        self.env.set(name, value, overwrite);
    }

    pub fn unset_env(&mut self, name: &str) {
        self.env.unset(name);
    }

    pub fn environ(&self) -> &Environ {
        &self.env
    }

    pub fn environ_mut(&mut self) -> &mut Environ {
        &mut self.env
    }

    /* The builder owns the fd from here on. */
    pub fn add_fd(&mut self, fd: RawFd) {
        assert!(!self.finished, "fd appended to a finished builder");
        self.fds.push(fd);
    }

    /*
     * Materialize bytes as a sealed anonymous file and mount them read-only
     * in the container. The fd number lands in the argument vector, so this
     * relies on the inherited-fd convention above.
     */
    pub fn add_args_data(&mut self, name_hint: &str, bytes: &[u8], mount_point: &str) -> Result<()> {
        let fd = seal_data(name_hint, bytes)?;

        self.add_arg("--ro-bind-data");
        self.add_arg(&fd.to_string());
        self.add_arg(mount_point);
        self.add_fd(fd);
        Ok(())
    }

    /* Move other's arguments and fds in; other remains empty but usable. */
    pub fn append(&mut self, other: &mut ExecutionArgs) {
        assert!(!self.finished, "arguments appended to a finished builder");
        assert!(!other.finished, "a finished builder cannot be appended");
        self.args.append(&mut other.args);
        self.fds.append(&mut other.fds);
        self.env.merge(std::mem::take(&mut other.env));
    }

    pub fn finish(&mut self) {
        if !self.finished {
            self.args.push(None);
            self.finished = true;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn argv(&self) -> Vec<&CStr> {
        assert!(self.finished, "argument vector taken from an unfinished builder");
        self.args.iter().flatten().map(|arg| arg.as_c_str()).collect()
    }

    pub fn args(&self) -> &[Option<CString>] {
        &self.args
    }

    pub fn fds(&self) -> &[RawFd] {
        &self.fds
    }
}

impl Debug for ExecutionArgs {
    fn fmt(&self, fmter: &mut Formatter<'_>) -> std::result::Result<(), std::fmt::Error> {
        let args: Vec<&str> = self.args.iter().flatten().filter_map(|arg| arg.to_str().ok()).collect();

        writeln!(fmter, "argv: {:?}", args)?;
        writeln!(fmter, "fds:  {:?}", self.fds)?;
        writeln!(fmter, "env:  {:?}", self.env)
    }
}

/*
 * memfd when available, unlinked tmpfile otherwise. Seals prevent the
 * container from mutating the data after the planner has written it;
 * O_TMPFILE contents are merely unreachable rather than immutable.
 */
fn seal_data(name_hint: &str, bytes: &[u8]) -> Result<RawFd> {
    let name = CString::new(name_hint).unwrap_or_else(|_| CString::new("gamewrap-data").unwrap());
    let fd = match memfd_create(&name, MemFdCreateFlag::MFD_ALLOW_SEALING) {
        Ok(fd) => fd,
        Err(error) if error.as_errno() == Some(Errno::ENOSYS) => return tmpfile_data(bytes),
        Err(error) => Err(error).prepend(|| format!("Unable to create anonymous file '{}'", name_hint))?,
    };

    match write_all(fd, bytes) {
        Ok(()) => (),
        Err(error) => {
            close(fd).ok();
            return Err(error);
        }
    }

    let seals = SealFlag::F_SEAL_SHRINK | SealFlag::F_SEAL_GROW | SealFlag::F_SEAL_WRITE | SealFlag::F_SEAL_SEAL;

    if let Err(error) = fcntl(fd, FcntlArg::F_ADD_SEALS(seals)) {
        close(fd).ok();
        Err(error).prepend(|| format!("Unable to seal anonymous file '{}'", name_hint))?
    }

    Ok(fd)
}

fn tmpfile_data(bytes: &[u8]) -> Result<RawFd> {
    let fd = nix::fcntl::open("/tmp", OFlag::O_TMPFILE | OFlag::O_RDWR | OFlag::O_EXCL, Mode::from_bits_truncate(0o600))
        .prepend(|| "Unable to create an anonymous temporary file".into())?;

    match write_all(fd, bytes) {
        Ok(()) => Ok(fd),
        Err(error) => {
            close(fd).ok();
            Err(error)
        }
    }
}

fn write_all(fd: RawFd, mut bytes: &[u8]) -> Result<()> {
    while !bytes.is_empty() {
        let written = write(fd, bytes).prepend(|| "Unable to write anonymous file data".into())?;

        bytes = &bytes[written ..];
    }

    lseek(fd, 0, Whence::SeekSet).prepend(|| "Unable to rewind anonymous file".into())?;
    Ok(())
}

#[cfg(test)]
mod test {
    use std::{fs::File, io::Read, os::unix::io::FromRawFd};

    use super::*;

    #[test]
    fn terminator_is_last_and_unique() {
        let mut args = ExecutionArgs::new();

        args.add_args(&["--ro-bind", "/usr", "/usr"]);
        args.finish();
        args.finish();

        assert!(args.args().last().unwrap().is_none());
        assert_eq!(args.args().iter().filter(|arg| arg.is_none()).count(), 1);
        assert_eq!(args.argv().len(), 3);
    }

    #[test]
    #[should_panic]
    fn finished_rejects_args() {
        let mut args = ExecutionArgs::new();

        args.finish();
        args.add_arg("--dev");
    }

    #[test]
    fn append_moves_and_leaves_usable() {
        let mut args = ExecutionArgs::new();
        let mut other = ExecutionArgs::new();

        other.robind("/etc/hosts", "/etc/hosts");
        other.add_fd(7);
        args.append(&mut other);

        assert_eq!(args.args().len(), 3);
        assert_eq!(args.fds(), &[7]);
        assert!(other.args().is_empty());
        assert!(other.fds().is_empty());

        other.add_arg("--proc");
        assert_eq!(other.args().len(), 1);
    }

    #[test]
    fn data_args_reference_sealed_fd() {
        let mut args = ExecutionArgs::new();

        args.add_args_data("xauth", b"magic-cookie", "/run/gamewrap/Xauthority").unwrap();

        let fd = args.fds()[0];
        let argv: Vec<String> = args.args().iter().flatten().map(|arg| arg.to_str().unwrap().to_string()).collect();

        assert_eq!(argv[0], "--ro-bind-data");
        assert_eq!(argv[1], fd.to_string());
        assert_eq!(argv[2], "/run/gamewrap/Xauthority");

        /* Sealed writes must fail; the data remains readable. */
        assert!(write(fd, b"tamper").is_err());

        let mut contents = String::new();
        let mut file = unsafe { File::from_raw_fd(fd) };

        file.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "magic-cookie");
    }
}
