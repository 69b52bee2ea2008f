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
    env,
    ffi::{CStr, CString},
    os::unix::io::RawFd,
    path::Path,
    process::Command,
    result::Result as StdResult,
};

use nix::unistd::{execve, fork, ForkResult, Pid};

use crate::{
    constants::{DEFAULT_PATH, EX_EXEC_FAILED},
    err,
    error,
    error::*,
    exec::args::ExecutionArgs,
    Error,
    ErrorKind,
};

pub mod args;
pub mod environ;

/*
 * Everything a child performs between fork and exec. All of it must be
 * async-signal-safe (signal-safety(7)): raw syscalls only, no allocation,
 * failures reported with write(2, ..) and _exit.
 */
#[derive(Debug, Default)]
pub struct ChildSetup {
    /* fds whose FD_CLOEXEC is cleared; every other cloexec fd vanishes on exec. */
    pub inherit_fds: Vec<RawFd>,
    /* Deliver SIGTERM to the child when its parent dies. */
    pub die_with_parent: bool,
    /* dup2 a preserved "original stdout" back onto fd 1. */
    pub restore_stdout: Option<RawFd>,
}

impl ChildSetup {
    /* Runs in the forked child; the &self data was built before the fork. */
    unsafe fn apply(&self) -> StdResult<(), &'static str> {
        let mut mask: libc::sigset_t = std::mem::zeroed();

        libc::sigemptyset(&mut mask);

        if libc::sigprocmask(libc::SIG_SETMASK, &mask, std::ptr::null_mut()) != 0 {
            return Err("sigprocmask");
        }

        for signum in 1 .. libc::SIGRTMAX() {
            if signum == libc::SIGKILL || signum == libc::SIGSTOP {
                continue;
            }

            libc::signal(signum, libc::SIG_DFL);
        }

        if self.die_with_parent && libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) != 0 {
            return Err("PR_SET_PDEATHSIG");
        }

        if let Some(stdout) = self.restore_stdout {
            if libc::dup2(stdout, libc::STDOUT_FILENO) < 0 {
                return Err("dup2");
            }
        }

        /*
         * Everything at or above fd 3 dies with the exec unless it is in
         * the inherited set. Walking a bounded range keeps this signal-safe
         * where reading /proc/self/fd would not be.
         */
        let max_fd = match libc::sysconf(libc::_SC_OPEN_MAX) {
            limit if limit > 0 && limit <= 4096 => limit as RawFd,
            _ => 4096,
        };

        for fd in 3 .. max_fd {
            if self.restore_stdout == Some(fd) || self.inherit_fds.contains(&fd) {
                continue;
            }

            libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);
        }

        for fd in &self.inherit_fds {
            if libc::fcntl(*fd, libc::F_SETFD, 0) != 0 {
                return Err("F_SETFD");
            }
        }

        Ok(())
    }
}

/*
 * Replace the current process. The inherited-fd set has FD_CLOEXEC cleared
 * here rather than in a child: there is no fork on this path, and every
 * other close-on-exec descriptor disappears with the exec itself. Returns
 * only on failure.
 */
pub fn exec_replace(program: &str, execution: &ExecutionArgs, base_env: Vec<(String, String)>) -> Error {
    let path = match CString::new(program) {
        Ok(path) => path,
        Err(_) => return exec_failure(program),
    };
    let argv = execution.argv();
    let envp = execution.environ().serialize(base_env);
    let envp: Vec<&CStr> = envp.iter().map(|var| var.as_c_str()).collect();

    for fd in execution.fds() {
        if unsafe { libc::fcntl(*fd, libc::F_SETFD, 0) } != 0 {
            return error!(ErrorKind::IOError(format!("fd {}", fd), std::io::ErrorKind::InvalidInput));
        }
    }

    match execve(path.as_c_str(), &argv, &envp) {
        Ok(_) => unreachable!(),
        Err(_) => exec_failure(program),
    }
}

fn exec_failure(program: &str) -> Error {
    error!(ErrorKind::ProcessInitFailure(program.to_string().leak(), std::io::ErrorKind::NotFound))
}

/*
 * fork + exec with the child-setup contract. The program path must already
 * be absolute (see resolve_program); argv and envp are fully prepared
 * CStrings so nothing allocates after the fork.
 */
pub fn spawn_supervised(program: &CStr, argv: &[CString], envp: &[CString], setup: &ChildSetup) -> Result<Pid> {
    let argv_ref: Vec<&CStr> = argv.iter().map(|arg| arg.as_c_str()).collect();
    let envp_ref: Vec<&CStr> = envp.iter().map(|var| var.as_c_str()).collect();

    match unsafe { fork() } {
        Ok(ForkResult::Parent { child }) => Ok(child),
        Ok(ForkResult::Child) => {
            if let Err(stage) = unsafe { setup.apply() } {
                child_abort(stage);
            }

            execve(program, &argv_ref, &envp_ref).ok();
            child_abort("exec");
        }
        Err(_) => err!(ErrorKind::ProcessInitFailure("fork", std::io::ErrorKind::OutOfMemory)),
    }
}

fn child_abort(stage: &str) -> ! {
    let msg = b"unable to start child: ";

    unsafe {
        libc::write(libc::STDERR_FILENO, msg.as_ptr() as *const libc::c_void, msg.len());
        libc::write(libc::STDERR_FILENO, stage.as_ptr() as *const libc::c_void, stage.len());
        libc::write(libc::STDERR_FILENO, b"\n".as_ptr() as *const libc::c_void, 1);
        libc::_exit(EX_EXEC_FAILED);
    }
}

/* Resolve an executable against PATH the way execvp would. */
pub fn resolve_program(program: &str) -> Option<String> {
    if program.contains('/') {
        return match Path::new(program).is_file() {
            true => Some(program.into()),
            false => None,
        };
    }

    let path = env::var("PATH").unwrap_or_else(|_| DEFAULT_PATH.into());

    path.split(':')
        .filter(|dir| !dir.is_empty())
        .map(|dir| format!("{}/{}", dir, program))
        .find(|candidate| Path::new(candidate).is_file())
}

pub fn wait_helper(name: &'static str, command: &mut Command) -> Result<i32> {
    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(error) => err!(ErrorKind::ProcessInitFailure(name, error.kind()))?,
    };

    match child.wait() {
        Ok(status) => Ok(status.code().unwrap_or(EX_EXEC_FAILED)),
        Err(error) => err!(ErrorKind::ProcessWaitFailure(name, error.kind())),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn resolves_absolute_and_path() {
        assert_eq!(resolve_program("/bin/sh").as_deref(), Some("/bin/sh"));
        assert!(resolve_program("/nonexistent/gamewrap").is_none());
        assert!(resolve_program("sh").is_some_and(|path| path.ends_with("/sh")));
    }
}
