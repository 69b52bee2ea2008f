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

use nix::unistd::isatty;

use gamewrap_core::constants::XTERM_EXECUTABLE;

use crate::cli::{AdverbOptions, Shell, Terminal};

/*
 * Decide the argv actually executed: the requested command, optionally
 * wrapped in a shell preamble for debugging, optionally wrapped in an
 * xterm when there is no terminal to inherit.
 */
pub fn wrap(options: &AdverbOptions) -> Vec<String> {
    let mut command = shell_wrap(options.shell, &options.command);

    let terminal = match options.terminal {
        Terminal::Auto => match isatty(libc::STDIN_FILENO).unwrap_or(false) {
            true => Terminal::Tty,
            false => Terminal::Xterm,
        },
        terminal => terminal,
    };

    if let Terminal::Xterm = terminal {
        let mut wrapped = vec![XTERM_EXECUTABLE.to_string(), "-e".into()];

        wrapped.append(&mut command);
        command = wrapped;
    }

    command
}

fn shell_wrap(shell: Shell, command: &[String]) -> Vec<String> {
    let mut wrapped = match shell {
        Shell::None => return command.to_vec(),
        Shell::Instead => return vec!["bash".into()],
        /* Keep the command's status observable in $?, then drop to bash. */
        Shell::After => vec!["sh".to_string(), "-c".into(), "\"$@\"; bash".into(), "sh".into()],
        Shell::Fail => vec![
            "sh".to_string(),
            "-c".into(),
            "\"$@\"; status=$?; if [ $status -ne 0 ]; then bash; fi; exit $status".into(),
            "sh".into(),
        ],
    };

    wrapped.extend(command.iter().cloned());
    wrapped
}
