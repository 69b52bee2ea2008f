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

use std::fmt::{Display, Formatter, Result as FmtResult};

use time::{format_description::FormatItem, macros::format_description, OffsetDateTime, UtcOffset};

use crate::constants::PRGNAME;

const DATE_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second][offset_hour][offset_minute]");
const UTC_OFFSET: &[FormatItem<'static>] = format_description!("[offset_hour]");

#[derive(PartialEq)]
pub enum Level {
    Info,
    Warn,
    Error,
    Debug,
}

impl Level {
    fn to_str(&self) -> &str {
        match self {
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Debug => "DEBUG",
        }
    }

    fn verbosity(&self) -> i8 {
        match self {
            Self::Error => 0,
            Self::Warn => 1,
            Self::Info => 2,
            Self::Debug => 3,
        }
    }
}

impl Display for Level {
    fn fmt(&self, fmter: &mut Formatter<'_>) -> FmtResult {
        write!(fmter, "{}", self.to_str())
    }
}

/*
 * Diagnostics go to stderr with a `prgname:` prefix; stdout belongs to the
 * wrapped command and to the planner's machine-readable output.
 */
pub struct Logger {
    verbosity: i8,
    module: &'static str,
    offset: UtcOffset,
}

impl Logger {
    pub fn new(module_name: &'static str) -> Self {
        /*
         * Cache the local offset once at construction: after fork, or once
         * threads exist, time's local-offset lookup refuses to run.
         */
        let ofs = OffsetDateTime::now_local()
            .unwrap_or(OffsetDateTime::now_utc())
            .format(UTC_OFFSET)
            .unwrap();
        let ofs = UtcOffset::parse(ofs.as_str(), UTC_OFFSET).unwrap();

        Self {
            verbosity: 1,
            module: module_name,
            offset: ofs,
        }
    }

    pub fn set_verbosity(&mut self, verbosity: i8) {
        self.verbosity = verbosity
    }

    pub fn verbose(&self) -> bool {
        self.verbosity >= 2
    }

    pub fn log(&self, level: Level, msg: &str) {
        if level.verbosity() > self.verbosity {
            return;
        }

        if let Level::Debug = level {
            let time = OffsetDateTime::now_utc().to_offset(self.offset);

            eprintln!("{}: [{}] [{}] {}", *PRGNAME, time.format(DATE_FORMAT).unwrap(), self.module, msg);
        } else {
            eprintln!("{}: {}: {}", *PRGNAME, level.to_str().to_lowercase(), msg);
        }
    }

    pub fn info(&self, msg: &str) {
        self.log(Level::Info, msg)
    }

    pub fn warn(&self, msg: &str) {
        self.log(Level::Warn, msg)
    }

    pub fn debug(&self, msg: &str) {
        self.log(Level::Debug, msg)
    }
}
