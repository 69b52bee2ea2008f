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

use std::os::unix::io::RawFd;

use gamewrap_core::{
    constants::{VERSION_MAJOR, VERSION_MINOR, VERSION_PATCH},
    err,
    lock::LockFlags,
    preload::{PreloadKind, PreloadModule},
    utils::arguments::{Arguments, InvalidArgument, Operand as Op},
    Error,
    Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shell {
    None,
    After,
    Fail,
    Instead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    None,
    Auto,
    Tty,
    Xterm,
}

/* A lock the supervisor must hold: either adopted or opened by itself. */
#[derive(Debug, Clone)]
pub enum LockRequest {
    Adopt(RawFd),
    Open(String, LockFlags),
}

#[derive(Debug)]
pub struct AdverbOptions {
    pub locks: Vec<LockRequest>,
    pub pass_fds: Vec<RawFd>,
    pub preloads: Vec<PreloadModule>,
    pub ld_cache_dir: Option<String>,
    pub ld_so_paths: Vec<String>,
    pub ld_library_path: Option<String>,
    pub generate_locales: bool,
    pub shell: Shell,
    pub terminal: Terminal,
    pub subreaper: bool,
    pub exit_with_parent: bool,
    /* Seconds; negative means "reap descendants for as long as it takes". */
    pub terminate_timeout: f64,
    pub terminate_idle_timeout: f64,
    pub verbosity: i8,
    pub command: Vec<String>,
}

impl Default for AdverbOptions {
    fn default() -> Self {
        Self {
            locks: Vec::new(),
            pass_fds: Vec::new(),
            preloads: Vec::new(),
            ld_cache_dir: None,
            ld_so_paths: Vec::new(),
            ld_library_path: None,
            generate_locales: false,
            shell: Shell::None,
            terminal: Terminal::Auto,
            subreaper: false,
            exit_with_parent: false,
            terminate_timeout: -1.0,
            terminate_idle_timeout: 0.0,
            verbosity: 1,
            command: Vec::new(),
        }
    }
}

pub fn parse(args: &mut Arguments) -> Result<AdverbOptions> {
    let mut options = AdverbOptions::default();

    /* These toggles affect every --lock-file that follows them. */
    let mut lock_flags = LockFlags::empty();

    while let Some(operand) = args.next() {
        match operand {
            Op::LongPos("fd", value) => options.locks.push(LockRequest::Adopt(parse_fd("--fd", value)?)),
            Op::LongPos("lock-file", value) => options.locks.push(LockRequest::Open(value.into(), lock_flags)),
            Op::LongPos("pass-fd", value) => options.pass_fds.push(parse_fd("--pass-fd", value)?),
            Op::Long("create") => lock_flags |= LockFlags::CREATE,
            Op::Long("no-create") => lock_flags &= !LockFlags::CREATE,
            Op::Long("write") => lock_flags |= LockFlags::WRITE,
            Op::Long("no-write") => lock_flags &= !LockFlags::WRITE,
            Op::Long("wait") => lock_flags |= LockFlags::WAIT,
            Op::Long("no-wait") => lock_flags &= !LockFlags::WAIT,
            Op::LongPos("ld-audit", value) => options.preloads.push(PreloadModule::parse(PreloadKind::LdAudit, value)?),
            Op::LongPos("ld-preload", value) => {
                options.preloads.push(PreloadModule::parse(PreloadKind::LdPreload, value)?)
            }
            Op::LongPos("regenerate-ld.so-cache", value) => options.ld_cache_dir = Some(value.into()),
            Op::LongPos("add-ld.so-path", value) => options.ld_so_paths.push(value.into()),
            Op::LongPos("set-ld-library-path", value) => options.ld_library_path = Some(value.into()),
            Op::Long("generate-locales") => options.generate_locales = true,
            Op::LongPos("shell", value) => {
                options.shell = match value {
                    "none" => Shell::None,
                    "after" => Shell::After,
                    "fail" => Shell::Fail,
                    "instead" => Shell::Instead,
                    _ => err!(InvalidArgument::InvalidValue("--shell", value.into()))?,
                }
            }
            Op::LongPos("terminal", value) => {
                options.terminal = match value {
                    "none" => Terminal::None,
                    "auto" => Terminal::Auto,
                    "tty" => Terminal::Tty,
                    "xterm" => Terminal::Xterm,
                    _ => err!(InvalidArgument::InvalidValue("--terminal", value.into()))?,
                }
            }
            Op::Long("batch") => {
                options.shell = Shell::None;
                options.terminal = Terminal::None;
            }
            Op::Long("subreaper") => options.subreaper = true,
            Op::Long("exit-with-parent") => options.exit_with_parent = true,
            Op::LongPos("terminate-timeout", value) => {
                options.terminate_timeout = parse_seconds("--terminate-timeout", value)?
            }
            Op::LongPos("terminate-idle-timeout", value) => {
                /* Negative idle delays clamp to "start terminating now". */
                options.terminate_idle_timeout = parse_seconds("--terminate-idle-timeout", value)?.max(0.0)
            }
            Op::Long("verbose") | Op::Short('v') => options.verbosity += 1,
            Op::Long("version") => {
                println!("gamewrap-adverb {}.{}.{}", *VERSION_MAJOR, *VERSION_MINOR, *VERSION_PATCH);
                std::process::exit(0);
            }
            _ => args.invalid_operand()?,
        }
    }

    options.command = args.trailing().iter().map(|arg| arg.to_string()).collect();

    if options.command.is_empty() {
        err!(InvalidArgument::CommandUnspecified)?
    }

    Ok(options)
}

fn parse_fd(option: &'static str, value: &str) -> Result<RawFd> {
    match value.parse::<RawFd>() {
        Ok(fd) if fd >= 0 => Ok(fd),
        _ => err!(InvalidArgument::InvalidValue(option, value.into())),
    }
}

fn parse_seconds(option: &'static str, value: &str) -> Result<f64> {
    match value.parse::<f64>() {
        Ok(seconds) if seconds.is_finite() => Ok(seconds),
        _ => err!(InvalidArgument::InvalidValue(option, value.into())),
    }
}

#[cfg(test)]
mod test {
    use gamewrap_core::constants::EX_USAGE;

    use super::*;

    fn parsed(args: Vec<&'static str>) -> Result<AdverbOptions> {
        parse(&mut Arguments::from(args).populate())
    }

    #[test]
    fn full_surface() {
        let options = parsed(vec![
            "--subreaper",
            "--exit-with-parent",
            "--create",
            "--write",
            "--lock-file",
            "/tmp/runtime/.ref",
            "--no-create",
            "--lock-file",
            "/tmp/other/.ref",
            "--fd",
            "5",
            "--pass-fd",
            "9",
            "--ld-preload",
            "/lib/libfoo.so:abi=x86_64-linux-gnu",
            "--terminate-timeout",
            "2",
            "--terminate-idle-timeout",
            "1",
            "--",
            "game.sh",
            "--level=1",
        ])
        .unwrap();

        assert!(options.subreaper);
        assert!(options.exit_with_parent);
        assert_eq!(options.locks.len(), 3);
        assert!(matches!(
            options.locks[0],
            LockRequest::Open(ref path, flags) if path == "/tmp/runtime/.ref"
                && flags == LockFlags::CREATE | LockFlags::WRITE
        ));
        assert!(matches!(
            options.locks[1],
            LockRequest::Open(_, flags) if flags == LockFlags::WRITE
        ));
        assert!(matches!(options.locks[2], LockRequest::Adopt(5)));
        assert_eq!(options.pass_fds, vec![9]);
        assert_eq!(options.preloads.len(), 1);
        assert_eq!(options.terminate_timeout, 2.0);
        assert_eq!(options.terminate_idle_timeout, 1.0);
        assert_eq!(options.command, vec!["game.sh", "--level=1"]);
    }

    #[test]
    fn idle_timeout_clamps() {
        let options = parsed(vec!["--terminate-idle-timeout", "-3", "--", "true"]).unwrap();

        assert_eq!(options.terminate_idle_timeout, 0.0);
    }

    #[test]
    fn batch_overrides_interactivity() {
        let options = parsed(vec!["--shell", "after", "--terminal", "xterm", "--batch", "--", "true"]).unwrap();

        assert_eq!(options.shell, Shell::None);
        assert_eq!(options.terminal, Terminal::None);
    }

    #[test]
    fn command_required() {
        assert_eq!(parsed(vec!["--subreaper"]).unwrap_err().code(), EX_USAGE);
    }

    #[test]
    fn bad_values_are_usage_errors() {
        assert_eq!(parsed(vec!["--fd", "wat", "--", "true"]).unwrap_err().code(), EX_USAGE);
        assert_eq!(parsed(vec!["--shell", "sometimes", "--", "true"]).unwrap_err().code(), EX_USAGE);
        assert_eq!(parsed(vec!["--terminate-timeout", "soon", "--", "true"]).unwrap_err().code(), EX_USAGE);
    }
}
