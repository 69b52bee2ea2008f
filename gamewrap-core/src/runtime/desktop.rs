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

use std::{fs::read, path::Path};

use crate::{
    constants::{
        CONTAINER_RUNTIME_DIR,
        DBUS_SESSION_BUS_ADDRESS,
        DBUS_SYSTEM_BUS_ADDRESS,
        PULSE_SERVER,
        WAYLAND_DISPLAY,
        WAYLAND_SOCKET,
        X11_DISPLAY,
        XAUTHORITY,
        XDG_RUNTIME_DIR,
    },
    exec::args::ExecutionArgs,
    log::Logger,
    utils::check_socket,
};

/*
 * Each desktop integration is best-effort: a missing socket means the
 * container runs without that service, never that the launch fails.
 */
pub fn apply(args: &mut ExecutionArgs, logger: &Logger) {
    wayland(args, logger);
    x11(args, logger);
    pulseaudio(args, logger);
    dbus(args, logger);
}

fn wayland(args: &mut ExecutionArgs, logger: &Logger) {
    if WAYLAND_DISPLAY.is_empty() {
        return;
    }

    if !check_socket(&WAYLAND_SOCKET) {
        logger.debug(&format!("Wayland socket '{}' unavailable; skipping", *WAYLAND_SOCKET));
        return;
    }

    args.robind(&WAYLAND_SOCKET, &format!("{}/wayland-0", *CONTAINER_RUNTIME_DIR));
    args.setenv("WAYLAND_DISPLAY", "wayland-0");
}

/*
 * The X11 socket is bound in place; the credential cookie crosses over as
 * a sealed anonymous file rather than a bind of the user's Xauthority,
 * whose path may not exist inside the container's home layout.
 */
fn x11(args: &mut ExecutionArgs, logger: &Logger) {
    if X11_DISPLAY.is_empty() || !X11_DISPLAY.contains(':') {
        return;
    }

    let display: Vec<&str> = X11_DISPLAY.split(':').collect();

    if display[0].is_empty() || display[0] == "unix" {
        let socket = format!("/tmp/.X11-unix/X{}", display[1].split('.').next().unwrap_or(display[1]));

        if !Path::new(&socket).exists() {
            logger.debug(&format!("X11 socket '{}' unavailable; skipping", socket));
            return;
        }

        args.robind(&socket, &socket);
    }

    args.setenv("DISPLAY", *X11_DISPLAY);

    if !XAUTHORITY.is_empty() {
        if let Ok(cookie) = read(*XAUTHORITY) {
            let container_xauth = format!("{}/Xauthority", *CONTAINER_RUNTIME_DIR);

            if args.add_args_data("Xauthority", &cookie, &container_xauth).is_ok() {
                args.setenv("XAUTHORITY", &container_xauth);
            }
        }
    }
}

fn pulseaudio(args: &mut ExecutionArgs, logger: &Logger) {
    let socket = match PULSE_SERVER.strip_prefix("unix:") {
        Some(path) => path.to_string(),
        None => format!("{}/pulse/native", *XDG_RUNTIME_DIR),
    };

    if !check_socket(&socket) {
        logger.debug(&format!("PulseAudio socket '{}' unavailable; skipping", socket));
        return;
    }

    let container_socket = format!("{}/pulse/native", *CONTAINER_RUNTIME_DIR);
    let config = format!("{}/pulse/config", *CONTAINER_RUNTIME_DIR);
    let contents = format!("default-server = unix:{}\nenable-shm = false\n", container_socket);

    args.robind(&socket, &container_socket);

    if args.add_args_data("pulse-client.conf", contents.as_bytes(), &config).is_ok() {
        args.setenv("PULSE_CLIENTCONFIG", &config);
    }

    args.setenv("PULSE_SERVER", &format!("unix:{}", container_socket));
}

fn dbus(args: &mut ExecutionArgs, logger: &Logger) {
    if let Some(socket) = unix_address(&DBUS_SESSION_BUS_ADDRESS) {
        if check_socket(&socket) {
            let container_socket = format!("{}/bus", *CONTAINER_RUNTIME_DIR);

            args.robind(&socket, &container_socket);
            args.setenv("DBUS_SESSION_BUS_ADDRESS", &format!("unix:path={}", container_socket));
        } else {
            logger.debug(&format!("D-Bus session socket '{}' unavailable; skipping", socket));
        }
    }

    if let Some(socket) = unix_address(&DBUS_SYSTEM_BUS_ADDRESS) {
        if check_socket(&socket) {
            args.robind(&socket, "/var/run/dbus/system_bus_socket");
        } else {
            logger.debug(&format!("D-Bus system socket '{}' unavailable; skipping", socket));
        }
    }
}

fn unix_address(address: &str) -> Option<String> {
    address
        .split(';')
        .find_map(|transport| transport.strip_prefix("unix:"))
        .and_then(|params| params.split(',').find_map(|param| param.strip_prefix("path=")))
        .map(|path| path.into())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_unix_bus_addresses() {
        assert_eq!(unix_address("unix:path=/run/user/1000/bus").as_deref(), Some("/run/user/1000/bus"));
        assert_eq!(
            unix_address("unix:path=/run/dbus/socket,guid=abc").as_deref(),
            Some("/run/dbus/socket")
        );
        assert_eq!(unix_address("tcp:host=localhost,port=1"), None);
        assert_eq!(unix_address("unix:abstract=/tmp/dbus-abc"), None);
    }
}
