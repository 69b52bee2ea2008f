/*
 * gamewrap-adverb
 *
 * Copyright (C) 2024-2026 Gamewrap Contributors
 * SPDX-License-Identifier: GPL-3.0-only
 *
 * This program is free software: you can redistribute it and/or modify
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
    ffi::CString,
    fs::{create_dir_all, read_dir, read_to_string, remove_dir_all},
    sync::atomic::{AtomicI32, Ordering},
    thread::sleep,
    time::{Duration, Instant},
};

use nix::{
    errno::Errno,
    sys::signal::{sigaction, sigprocmask, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal},
    sys::wait::{waitpid, WaitPidFlag, WaitStatus},
    unistd::{getpid, Pid},
};

use gamewrap_core::{
    constants::{EX_SOFTWARE, FORWARD_SIGNALS, PROCESS_SLEEP_DURATION},
    err,
    error::*,
    exec::{environ::Environ, resolve_program, spawn_supervised, ChildSetup},
    ldcache,
    locale,
    lock::Lock,
    log::Logger,
    preload::PreloadResolver,
    Error,
    ErrorKind,
};

use crate::{
    cli::{AdverbOptions, LockRequest},
    command,
};

/*
 * POSIX signal handlers are process-global, so the forwarding target
 * cannot be threaded through arguments; this is the only global in the
 * program. Zero means "no child yet": the signal falls back to its
 * default disposition so Ctrl-C still kills the adverb during setup.
 */
static CHILD_PID: AtomicI32 = AtomicI32::new(0);

extern "C" fn forward_signal(signum: libc::c_int) {
    let child = CHILD_PID.load(Ordering::Relaxed);

    if child > 0 {
        unsafe {
            libc::kill(child, signum);
        }
    } else {
        unsafe {
            libc::signal(signum, libc::SIG_DFL);
            libc::raise(signum);
        }
    }
}

pub fn run(options: AdverbOptions) -> Result<i32> {
    let mut logger = Logger::new("adverb");

    logger.set_verbosity(options.verbosity);

    /* Prepare: process attributes, stdout diversion, locks. */
    let subreaping = options.subreaper || options.terminate_timeout >= 0.0;

    if options.exit_with_parent && unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) } != 0 {
        err!(ErrorKind::Internal("unable to arm PR_SET_PDEATHSIG"))?
    }

    if subreaping && unsafe { libc::prctl(libc::PR_SET_CHILD_SUBREAPER, 1) } != 0 {
        err!(ErrorKind::Internal("unable to become a subreaper"))?
    }

    /*
     * stdout belongs to the wrapped command; our own chatter goes to
     * stderr. The original stdout is preserved close-on-exec and dup2'd
     * back into place between fork and exec.
     */
    let preserved_stdout = unsafe { libc::fcntl(libc::STDOUT_FILENO, libc::F_DUPFD_CLOEXEC, 3) };

    if preserved_stdout < 0 || unsafe { libc::dup2(libc::STDERR_FILENO, libc::STDOUT_FILENO) } < 0 {
        err!(ErrorKind::Internal("unable to divert stdout"))?
    }

    let mut locks = Vec::new();

    for request in &options.locks {
        match request {
            LockRequest::Adopt(fd) => {
                /* The lock must stay here, not leak into the child. */
                unsafe {
                    libc::fcntl(*fd, libc::F_SETFD, libc::FD_CLOEXEC);
                }

                locks.push(Lock::adopt(*fd, true));
            }
            LockRequest::Open(path, flags) => locks.push(Lock::open(path, *flags)?),
        }
    }

    /* Plan: mutate the child's environment before it exists. */
    let scratch = scratch_dir()?;
    let mut environ = Environ::snapshot();
    let preload_root = format!("{}/preload", scratch);

    create_dir_all(&preload_root).prepend_io(|| preload_root.clone())?;
    PreloadResolver::new(&preload_root, logger.verbose()).resolve(&options.preloads, &mut environ)?;

    match &options.ld_cache_dir {
        Some(dir) => match ldcache::regenerate(dir, &options.ld_so_paths, logger.verbose()) {
            Ok(()) => {
                if let Some(value) = &options.ld_library_path {
                    environ.set("LD_LIBRARY_PATH", value, true);
                }
            }
            /* Keep the caller's longer LD_LIBRARY_PATH when ldconfig fails. */
            Err(error) => error.warn(),
        },
        None => {
            if let Some(value) = &options.ld_library_path {
                environ.set("LD_LIBRARY_PATH", value, true);
            }
        }
    }

    if options.generate_locales {
        let locale_dir = format!("{}/locales", scratch);

        create_dir_all(&locale_dir).prepend_io(|| locale_dir.clone())?;

        match locale::generate(&locale_dir) {
            Ok(true) => environ.set("LOCPATH", &locale_dir, true),
            Ok(false) => logger.debug("No locales were generated."),
            Err(error) => error.warn(),
        }
    }

    /* Launch. */
    let argv: Vec<String> = command::wrap(&options);
    let program = match resolve_program(&argv[0]) {
        Some(program) => program,
        None => err!(ErrorKind::ProcessInitFailure(argv[0].clone().leak(), std::io::ErrorKind::NotFound))?,
    };
    let program = CString::new(program).generic()?;
    let argv: Vec<CString> = argv
        .iter()
        .map(|arg| CString::new(arg.as_str()))
        .collect::<std::result::Result<_, _>>()
        .generic()?;
    let envp = environ.serialize(std::env::vars());
    let setup = ChildSetup {
        inherit_fds: options.pass_fds.clone(),
        die_with_parent: false,
        restore_stdout: Some(preserved_stdout),
    };

    install_forwarding()?;

    let mut chld = SigSet::empty();

    chld.add(Signal::SIGCHLD);
    sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(&chld), None).ok();

    let child = spawn_supervised(&program, &argv, &envp, &setup)?;

    CHILD_PID.store(child.as_raw(), Ordering::Relaxed);
    logger.debug(&format!("Started process {}", child));

    /* Wait: the child's status is ours; descendants are reaped after. */
    let code = wait_for_child(child)?;

    CHILD_PID.store(0, Ordering::Relaxed);

    if subreaping {
        drain_descendants(options.terminate_timeout, options.terminate_idle_timeout, &logger);
    }

    /* Exit: release the locks, clean up, report. */
    drop(locks);
    remove_dir_all(&scratch).ok();
    logger.info(&format!("Wrapped command exited with status {}", code));
    Ok(code)
}

fn install_forwarding() -> Result<()> {
    let action = SigAction::new(SigHandler::Handler(forward_signal), SaFlags::SA_RESTART, SigSet::empty());

    for signum in FORWARD_SIGNALS {
        let signal = Signal::try_from(*signum).expect("forwarded signals are valid");

        if unsafe { sigaction(signal, &action) }.is_err() {
            err!(ErrorKind::Internal("unable to install signal forwarding"))?
        }
    }

    Ok(())
}

fn scratch_dir() -> Result<String> {
    let dir = format!("{}/gamewrap-adverb-{}", std::env::temp_dir().display(), std::process::id());

    create_dir_all(&dir).prepend_io(|| dir.clone())?;
    Ok(dir)
}

/*
 * Reap everything, but only the supervised child decides the exit code:
 * WEXITSTATUS, or 128+signal, or EX_SOFTWARE for a termination the wait
 * status cannot express.
 */
fn wait_for_child(child: Pid) -> Result<i32> {
    loop {
        match waitpid(None, None) {
            Ok(WaitStatus::Exited(pid, code)) if pid == child => break Ok(code),
            Ok(WaitStatus::Signaled(pid, signal, _)) if pid == child => break Ok(128 + signal as i32),
            Ok(WaitStatus::Exited(..)) | Ok(WaitStatus::Signaled(..)) => continue,
            Ok(_) => continue,
            Err(error) if error.as_errno() == Some(Errno::EINTR) => continue,
            Err(error) if error.as_errno() == Some(Errno::ECHILD) => break Ok(EX_SOFTWARE),
            Err(_) => break Ok(EX_SOFTWARE),
        }
    }
}

/*
 * Staged termination of whatever the child left behind. A negative
 * timeout reaps at whatever pace the descendants choose; zero skips
 * straight to SIGKILL. SIGCONT accompanies every stage so stopped
 * processes can act on the signal.
 */
fn drain_descendants(timeout: f64, idle_timeout: f64, logger: &Logger) {
    if timeout < 0.0 {
        drain_blocking();
        return;
    }

    if reap_for(idle_timeout) {
        return;
    }

    if timeout > 0.0 {
        signal_descendants(Signal::SIGTERM, logger);

        if reap_for(timeout) {
            return;
        }
    }

    signal_descendants(Signal::SIGKILL, logger);
    drain_blocking();
}

fn drain_blocking() {
    loop {
        match waitpid(None, None) {
            Ok(_) => continue,
            Err(error) if error.as_errno() == Some(Errno::EINTR) => continue,
            Err(_) => break,
        }
    }
}

/* Poll-reap until no children remain or the deadline passes. */
fn reap_for(seconds: f64) -> bool {
    let deadline = Instant::now() + Duration::from_secs_f64(seconds.max(0.0));

    loop {
        match waitpid(None, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => {
                if Instant::now() >= deadline {
                    break false;
                }

                sleep(PROCESS_SLEEP_DURATION);
            }
            Ok(_) => continue,
            Err(error) if error.as_errno() == Some(Errno::EINTR) => continue,
            Err(_) => break true,
        }
    }
}

fn signal_descendants(signal: Signal, logger: &Logger) {
    for pid in children_of(getpid()) {
        logger.debug(&format!("Sending {} to process {}", signal, pid));
        nix::sys::signal::kill(pid, signal).ok();
        nix::sys::signal::kill(pid, Signal::SIGCONT).ok();
    }
}

/*
 * As a subreaper, orphaned descendants reparent to us; /proc is the only
 * way to enumerate them before they exit.
 */
fn children_of(parent: Pid) -> Vec<Pid> {
    let entries = match read_dir("/proc") {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter_map(|name| name.parse::<i32>().ok())
        .filter(|pid| stat_ppid(*pid) == Some(parent.as_raw()))
        .map(Pid::from_raw)
        .collect()
}

fn stat_ppid(pid: i32) -> Option<i32> {
    let stat = read_to_string(format!("/proc/{}/stat", pid)).ok()?;

    /* The command name may contain spaces; fields resume after its ')'. */
    let after_comm = stat.rsplit_once(')')?.1;

    after_comm.split_whitespace().nth(1)?.parse().ok()
}
