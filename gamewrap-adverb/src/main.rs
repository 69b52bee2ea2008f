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

use std::process::exit;

use nix::sys::signal::{sigprocmask, SigSet, SigmaskHow, Signal};

use gamewrap_core::utils::Arguments;

mod cli;
mod command;
mod supervisor;

fn main() {
    /*
     * SIGCHLD stays blocked until the wait loop: nothing here wants to be
     * interrupted by an early helper exiting.
     */
    let mut chld = SigSet::empty();

    chld.add(Signal::SIGCHLD);
    sigprocmask(SigmaskHow::SIG_BLOCK, Some(&chld), None).ok();

    let arguments = &mut Arguments::new().populate();
    let result = cli::parse(arguments).and_then(supervisor::run);

    match result {
        Ok(code) => exit(code),
        Err(error) => error.handle(),
    }
}
