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

use std::{env::var, time::Duration};

use lazy_static::lazy_static;
use nix::unistd::{getegid, geteuid};
use signal_hook::consts::*;

/* sysexits(3) values shared between the planner and the adverb. */
pub const EX_USAGE: i32 = 64;
pub const EX_SOFTWARE: i32 = 70;
pub const EX_OSFILE: i32 = 72;
pub const EX_TEMPFAIL: i32 = 75;
pub const EX_UNAVAILABLE: i32 = 69;
pub const EX_EXEC_FAILED: i32 = 127;

pub static PROCESS_SLEEP_DURATION: Duration = Duration::from_millis(100);

pub const BWRAP_EXECUTABLE: &str = "bwrap";
pub const DEFAULT_PATH: &str = "/usr/local/bin:/bin:/usr/bin";
pub const LDCONFIG_EXECUTABLE: &str = "/sbin/ldconfig";
pub const LOCALE_GEN_EXECUTABLE: &str = "gamewrap-locale-gen";
pub const CAPTURE_LIBS_EXECUTABLE: &str = "gamewrap-capture-libs";
pub const XTERM_EXECUTABLE: &str = "xterm";

/* Signals forwarded from the adverb to its child while one is running. */
pub const FORWARD_SIGNALS: &[i32; 6] = &[SIGHUP, SIGINT, SIGQUIT, SIGTERM, SIGUSR1, SIGUSR2];

/* Mount point of the planner's own tooling inside the container. */
pub const TOOLS_MOUNT: &str = "/run/gamewrap";
pub const OVERRIDES_MOUNT: &str = "/overrides";
pub const HOST_MOUNT: &str = "/run/host";

pub const GAME_OVERLAY_BASENAME: &str = "gameoverlayrenderer.so";

#[macro_export]
macro_rules! format_str {
    ( $( $x:expr ),+ ) => {
        format!($( $x, )+).leak()
    };
}

#[macro_export]
macro_rules! to_static_str {
    ( $x:expr ) => {
        $x.to_string().leak()
    };
}

lazy_static! {
    pub static ref PRGNAME: &'static str = std::env::args()
        .next()
        .and_then(|arg| arg.rsplit('/').next().map(|name| name.to_string().leak() as &'static str))
        .unwrap_or("gamewrap");
    pub static ref VERBOSE: bool = var("PRESSURE_VESSEL_VERBOSE").is_ok_and(|v| v == "1");
    pub static ref UID: u32 = geteuid().as_raw();
    pub static ref GID: u32 = getegid().as_raw();
    pub static ref HOME: &'static str = env("HOME");
    pub static ref VERSION_MAJOR: u32 = env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap();
    pub static ref VERSION_MINOR: u32 = env!("CARGO_PKG_VERSION_MINOR").parse().unwrap();
    pub static ref VERSION_PATCH: u32 = env!("CARGO_PKG_VERSION_PATCH").parse().unwrap();
    pub static ref TERM: &'static str = env_opt("TERM");
    pub static ref WAYLAND_DISPLAY: &'static str = env_opt("WAYLAND_DISPLAY");
    pub static ref X11_DISPLAY: &'static str = env_opt("DISPLAY");
    pub static ref XAUTHORITY: &'static str = env_opt("XAUTHORITY");
    pub static ref PULSE_SERVER: &'static str = env_opt("PULSE_SERVER");
    pub static ref PULSE_CLIENTCONFIG: &'static str = env_opt("PULSE_CLIENTCONFIG");
    pub static ref DBUS_SESSION_BUS_ADDRESS: &'static str = env_opt("DBUS_SESSION_BUS_ADDRESS");
    pub static ref DBUS_SYSTEM_BUS_ADDRESS: &'static str =
        env_default("DBUS_SYSTEM_BUS_ADDRESS", "unix:path=/var/run/dbus/system_bus_socket");
    pub static ref XDG_RUNTIME_DIR: &'static str = env_opt("XDG_RUNTIME_DIR");
    pub static ref CONTAINER_RUNTIME_DIR: String = format!("/run/user/{}", *UID);
    pub static ref WAYLAND_SOCKET: String = format!("{}/{}", *XDG_RUNTIME_DIR, *WAYLAND_DISPLAY);
    pub static ref STEAM_APP_ID: &'static str = env_opt("SteamAppId");
    pub static ref STEAM_RUNTIME: &'static str = env_opt("STEAM_RUNTIME");
}

fn env(env: &'static str) -> &'static str {
    use crate::{error, Error, ErrorKind};

    var(env).map_or_else(|_| error!(ErrorKind::EnvVarUnset(env)).fatal(), |var| var.leak())
}

fn env_opt(env: &str) -> &'static str {
    var(env).map_or_else(|_| "", |var| var.leak())
}

fn env_default(env: &str, default: &'static str) -> &'static str {
    var(env).map_or_else(|_| default, |var| var.leak())
}
