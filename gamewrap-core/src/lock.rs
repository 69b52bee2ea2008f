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
    mem::zeroed,
    os::unix::io::RawFd,
};

use bitflags::bitflags;
use nix::{
    errno::Errno,
    fcntl::{open, OFlag},
    sys::stat::Mode,
    unistd::close,
};

use crate::{
    constants::{EX_TEMPFAIL, EX_UNAVAILABLE, EX_USAGE},
    err,
    error::*,
    Error,
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LockFlags: u32 {
        /* Create the file if it is missing; implies a read-write open. */
        const CREATE = 1 << 0;
        /* Block until the lock becomes available. */
        const WAIT = 1 << 1;
        /* Take a write (exclusive) lock rather than a read lock. */
        const WRITE = 1 << 2;
        /* Fail instead of falling back to a process-oriented lock. */
        const REQUIRE_OFD = 1 << 3;
        /* Skip the open-file-description attempt entirely. */
        const PROCESS_ORIENTED = 1 << 4;
    }
}

#[derive(Debug)]
pub enum LockError {
    Busy(String),
    Io(String, Errno),
    FlagConflict,
    OfdUnavailable(String),
}

impl Display for LockError {
    fn fmt(&self, fmter: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Busy(path) => write!(fmter, "Unable to lock '{}': file is busy", path),
            Self::Io(path, errno) => write!(fmter, "Unable to lock '{}': {}", path, errno.desc()),
            Self::FlagConflict => write!(fmter, "REQUIRE_OFD and PROCESS_ORIENTED lock flags are mutually exclusive."),
            Self::OfdUnavailable(path) => {
                write!(fmter, "Unable to lock '{}': open-file-description locks are unsupported by this kernel", path)
            }
        }
    }
}

impl ErrorTrait for LockError {
    fn code(&self) -> i32 {
        match self {
            Self::Busy(_) => EX_TEMPFAIL,
            Self::FlagConflict => EX_USAGE,
            _ => EX_UNAVAILABLE,
        }
    }
}

/*
 * An advisory fcntl record lock over a whole file. While the Lock owns its
 * fd the lock is held; closing the fd releases it. Open-file-description
 * locks are preferred: they survive fork() and are released only when the
 * last descriptor to the description is closed, which is what allows the
 * planner to hand a held lock to the adverb across exec.
 */
#[derive(Debug)]
pub struct Lock {
    fd: RawFd,
    ofd: bool,
    armed: bool,
}

impl Lock {
    pub fn open(path: &str, flags: LockFlags) -> Result<Self> {
        if flags.contains(LockFlags::REQUIRE_OFD | LockFlags::PROCESS_ORIENTED) {
            err!(LockError::FlagConflict)?
        }

        let mut open_flags = OFlag::O_CLOEXEC | OFlag::O_NOCTTY;

        if flags.contains(LockFlags::CREATE) {
            open_flags |= OFlag::O_CREAT | OFlag::O_RDWR;
        } else if flags.contains(LockFlags::WRITE) {
            open_flags |= OFlag::O_RDWR;
        } else {
            open_flags |= OFlag::O_RDONLY;
        }

        let fd = match open(path, open_flags, Mode::from_bits_truncate(0o644)) {
            Ok(fd) => fd,
            Err(error) => err!(LockError::Io(path.into(), error.as_errno().unwrap_or(Errno::UnknownErrno)))?,
        };

        match take_lock(fd, path, flags) {
            Ok(ofd) => Ok(Self {
                fd,
                ofd,
                armed: true,
            }),
            Err(error) => {
                close(fd).ok();
                Err(error)
            }
        }
    }

    /* Construct from an already-locked fd; the caller transfers ownership. */
    pub fn adopt(fd: RawFd, ofd: bool) -> Self {
        Self {
            fd,
            ofd,
            armed: true,
        }
    }

    pub fn is_ofd(&self) -> bool {
        self.ofd
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /* Yield the fd and disarm automatic release. */
    pub fn steal_fd(mut self) -> RawFd {
        self.armed = false;
        self.fd
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        if self.armed {
            close(self.fd).ok();
        }
    }
}

fn take_lock(fd: RawFd, path: &str, flags: LockFlags) -> Result<bool> {
    let mut ofd = !flags.contains(LockFlags::PROCESS_ORIENTED);

    loop {
        let cmd = match (ofd, flags.contains(LockFlags::WAIT)) {
            (true, true) => libc::F_OFD_SETLKW,
            (true, false) => libc::F_OFD_SETLK,
            (false, true) => libc::F_SETLKW,
            (false, false) => libc::F_SETLK,
        };
        let mut record: libc::flock = unsafe { zeroed() };

        record.l_type = match flags.contains(LockFlags::WRITE) {
            true => libc::F_WRLCK as libc::c_short,
            false => libc::F_RDLCK as libc::c_short,
        };
        record.l_whence = libc::SEEK_SET as libc::c_short;

        if unsafe { libc::fcntl(fd, cmd, &record) } == 0 {
            break Ok(ofd);
        }

        match Errno::last() {
            /* Ancient kernels report OFD commands as invalid arguments. */
            Errno::EINVAL if ofd => match flags.contains(LockFlags::REQUIRE_OFD) {
                true => err!(LockError::OfdUnavailable(path.into()))?,
                false => ofd = false,
            },
            Errno::EINTR => continue,
            Errno::EACCES | Errno::EAGAIN => err!(LockError::Busy(path.into()))?,
            errno => err!(LockError::Io(path.into(), errno))?,
        }
    }
}
