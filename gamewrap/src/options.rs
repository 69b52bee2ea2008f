/*
 * gamewrap
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

use std::env::var;

use gamewrap_core::{
    constants::{VERSION_MAJOR, VERSION_MINOR, VERSION_PATCH},
    err,
    utils::{
        arguments::{Arguments, InvalidArgument, Operand as Op},
        env_flag,
    },
    Error,
    Result,
};

/*
 * Steam hands us configuration through the environment; the command line
 * exists for humans and overrides it. Both funnel into this one record.
 */
#[derive(Debug)]
pub struct WrapOptions {
    pub runtime: Option<String>,
    pub runtime_base: Option<String>,
    pub copy_runtime_into: Option<String>,
    pub gc_runtimes: bool,
    pub share_home: Option<bool>,
    pub home: Option<String>,
    pub freedesktop_app_id: Option<String>,
    pub steam_app_id: Option<String>,
    pub env_if_host: Vec<(String, String)>,
    pub host_ld_preload: Vec<String>,
    pub remove_game_overlay: bool,
    pub host_graphics: bool,
    pub host_fallback: bool,
    pub generate_locales: bool,
    pub share_pid: bool,
    pub batch: bool,
    pub shell: Option<String>,
    pub terminal: Option<String>,
    pub only_prepare: bool,
    pub test: bool,
    pub verbosity: i8,
    pub command: Vec<String>,
}

impl Default for WrapOptions {
    fn default() -> Self {
        Self {
            runtime: env_opt("PRESSURE_VESSEL_RUNTIME"),
            runtime_base: env_opt("PRESSURE_VESSEL_RUNTIME_BASE"),
            copy_runtime_into: env_opt("PRESSURE_VESSEL_COPY_RUNTIME_INTO"),
            gc_runtimes: env_flag("PRESSURE_VESSEL_GC_RUNTIMES").unwrap_or(true),
            share_home: env_flag("PRESSURE_VESSEL_SHARE_HOME"),
            home: env_opt("PRESSURE_VESSEL_HOME"),
            freedesktop_app_id: env_opt("PRESSURE_VESSEL_FDO_APP_ID"),
            steam_app_id: env_opt("SteamAppId"),
            env_if_host: Vec::new(),
            host_ld_preload: Vec::new(),
            remove_game_overlay: env_flag("PRESSURE_VESSEL_REMOVE_GAME_OVERLAY").unwrap_or(false),
            host_graphics: env_flag("PRESSURE_VESSEL_HOST_GRAPHICS").unwrap_or(true),
            host_fallback: false,
            generate_locales: env_flag("PRESSURE_VESSEL_GENERATE_LOCALES").unwrap_or(true),
            share_pid: env_flag("PRESSURE_VESSEL_SHARE_PID").unwrap_or(true),
            batch: env_flag("PRESSURE_VESSEL_BATCH").unwrap_or(false),
            shell: env_opt("PRESSURE_VESSEL_SHELL"),
            terminal: env_opt("PRESSURE_VESSEL_TERMINAL"),
            only_prepare: false,
            test: false,
            verbosity: match env_flag("PRESSURE_VESSEL_VERBOSE").unwrap_or(false) {
                true => 2,
                false => 1,
            },
            command: Vec::new(),
        }
    }
}

pub fn parse(args: &mut Arguments) -> Result<WrapOptions> {
    let mut options = WrapOptions::default();

    while let Some(operand) = args.next() {
        match operand {
            Op::LongPos("runtime", value) => options.runtime = Some(value.into()),
            Op::LongPos("runtime-base", value) => options.runtime_base = Some(value.into()),
            Op::LongPos("copy-runtime-into", value) => options.copy_runtime_into = Some(value.into()),
            Op::Long("gc-runtimes") => options.gc_runtimes = true,
            Op::Long("no-gc-runtimes") => options.gc_runtimes = false,
            Op::Long("share-home") => options.share_home = Some(true),
            Op::Long("unshare-home") => options.share_home = Some(false),
            Op::LongPos("home", value) => {
                options.home = Some(value.into());
                options.share_home = Some(false);
            }
            Op::LongPos("freedesktop-app-id", value) => options.freedesktop_app_id = Some(value.into()),
            Op::LongPos("steam-app-id", value) => options.steam_app_id = Some(value.into()),
            Op::LongPos("env-if-host", value) => match value.split_once('=') {
                Some((name, val)) if !name.is_empty() => options.env_if_host.push((name.into(), val.into())),
                _ => err!(InvalidArgument::InvalidValue("--env-if-host", value.into()))?,
            },
            Op::LongPos("host-ld-preload", value) => options.host_ld_preload.push(value.into()),
            Op::Long("keep-game-overlay") => options.remove_game_overlay = false,
            Op::Long("remove-game-overlay") => options.remove_game_overlay = true,
            Op::Long("with-host-graphics") => options.host_graphics = true,
            Op::Long("without-host-graphics") => options.host_graphics = false,
            Op::Long("host-fallback") => options.host_fallback = true,
            Op::Long("generate-locales") => options.generate_locales = true,
            Op::Long("no-generate-locales") => options.generate_locales = false,
            Op::LongPos("shell", value) => options.shell = Some(value.into()),
            Op::LongPos("terminal", value) => options.terminal = Some(value.into()),
            Op::Long("batch") => options.batch = true,
            Op::Long("only-prepare") => options.only_prepare = true,
            Op::Long("test") => options.test = true,
            Op::Long("verbose") | Op::Short('v') => options.verbosity += 1,
            Op::Long("version") => {
                println!("gamewrap {}.{}.{}", *VERSION_MAJOR, *VERSION_MINOR, *VERSION_PATCH);
                std::process::exit(0);
            }
            _ => args.invalid_operand()?,
        }
    }

    options.command = args.trailing().iter().map(|arg| arg.to_string()).collect();

    if options.batch {
        options.shell = None;
        options.terminal = None;
    }

    if options.command.is_empty() && !options.test && !options.only_prepare {
        err!(InvalidArgument::CommandUnspecified)?
    }

    Ok(options)
}

/* The runtime may be named relative to wherever the runtimes live. */
pub fn resolve_runtime(options: &WrapOptions) -> Result<Option<String>> {
    match &options.runtime {
        None => Ok(None),
        Some(runtime) if runtime.starts_with('/') => Ok(Some(runtime.clone())),
        Some(runtime) => match &options.runtime_base {
            Some(base) => Ok(Some(format!("{}/{}", base, runtime))),
            None => err!(InvalidArgument::UnsuppliedOperand(
                "--runtime",
                "A relative runtime requires --runtime-base."
            )),
        },
    }
}

fn env_opt(name: &str) -> Option<String> {
    var(name).ok().filter(|value| !value.is_empty())
}
