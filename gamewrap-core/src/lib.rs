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

use std::fmt::{Debug, Display, Formatter, Result as FmtResult};

use crate::constants::{EX_EXEC_FAILED, EX_SOFTWARE, EX_UNAVAILABLE, EX_USAGE};

pub mod abi;
pub mod constants;
pub mod error;
pub mod exec;
pub mod graphics;
pub mod home;
pub mod ldcache;
pub mod locale;
pub mod lock;
pub mod log;
pub mod preload;
pub mod runtime;
pub mod steam;
pub mod utils;

pub use error::*;

#[derive(Debug)]
pub enum ErrorKind {
    EnvVarUnset(&'static str),
    ProcessInitFailure(&'static str, std::io::ErrorKind),
    ProcessWaitFailure(&'static str, std::io::ErrorKind),
    ChildFailure(&'static str, i32),
    IOError(String, std::io::ErrorKind),
    Message(&'static str),
    Usage(String),
    Unsupported(String),
    Internal(&'static str),
}

impl Display for ErrorKind {
    fn fmt(&self, fmter: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::EnvVarUnset(var) => write!(fmter, "${var} is unset."),
            Self::ProcessInitFailure(exec, err) => write!(fmter, "Unable to initialize '{exec}': {err}"),
            Self::ProcessWaitFailure(exec, err) => write!(fmter, "Unable to wait on '{exec}': {err}"),
            Self::ChildFailure(exec, code) => write!(fmter, "'{exec}' exited with code {code}."),
            Self::IOError(path, error) => write!(fmter, "'{path}': {error}"),
            Self::Message(err) => write!(fmter, "{}", err),
            Self::Usage(err) => write!(fmter, "{}", err),
            Self::Unsupported(err) => write!(fmter, "{}", err),
            Self::Internal(err) => write!(fmter, "Internal error: {}", err),
        }
    }
}

impl ErrorTrait for ErrorKind {
    fn code(&self) -> i32 {
        match self {
            Self::ProcessInitFailure(..) => EX_EXEC_FAILED,
            Self::Usage(..) => EX_USAGE,
            Self::Internal(..) => EX_SOFTWARE,
            _ => EX_UNAVAILABLE,
        }
    }
}
