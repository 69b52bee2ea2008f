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

use std::{collections::BTreeMap, env, ffi::CString};

#[derive(Debug, Clone, PartialEq)]
pub enum EnvPolicy {
    Set(String),
    Unset,
}

/*
 * Mapping of variable name to set / forced-unset; a name absent from the
 * mapping is inherited from whatever base environment the caller resolves
 * against. A set value may be empty: empty and unset are distinct states.
 */
#[derive(Debug, Clone, Default)]
pub struct Environ {
    vars: BTreeMap<String, EnvPolicy>,
}

impl Environ {
    pub fn new() -> Self {
        Self::default()
    }

    /* Every observed VAR=VAL of the process environment becomes set(VAL). */
    pub fn snapshot() -> Self {
        Self {
            vars: env::vars().map(|(name, value)| (name, EnvPolicy::Set(value))).collect(),
        }
    }

    pub fn set(&mut self, name: &str, value: &str, overwrite: bool) {
        if !overwrite && self.vars.contains_key(name) {
            return;
        }

        self.vars.insert(name.into(), EnvPolicy::Set(value.into()));
    }

    pub fn unset(&mut self, name: &str) {
        self.vars.insert(name.into(), EnvPolicy::Unset);
    }

    /* Drop any explicit policy, reverting the variable to inheritance. */
    pub fn inherit(&mut self, name: &str) {
        self.vars.remove(name);
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        match self.vars.get(name) {
            Some(EnvPolicy::Set(value)) => Some(value),
            _ => None,
        }
    }

    pub fn policy(&self, name: &str) -> Option<&EnvPolicy> {
        self.vars.get(name)
    }

    /* Set and forced-unset entries, in sorted order. */
    pub fn explicit(&self) -> impl Iterator<Item = (&str, &EnvPolicy)> {
        self.vars.iter().map(|(name, policy)| (name.as_str(), policy))
    }

    pub fn merge(&mut self, other: Environ) {
        self.vars.extend(other.vars)
    }

    /*
     * Resolve against an inherited base environment into the VAR=VAL form
     * handed to exec. Set entries win over the base, forced-unset entries
     * are omitted, and the result is deterministically ordered.
     */
    pub fn serialize<I>(&self, base: I) -> Vec<CString>
    where
        I: IntoIterator<Item = (String, String)>, {
        let mut resolved: BTreeMap<String, String> = base
            .into_iter()
            .filter(|(name, _)| !self.vars.contains_key(name))
            .collect();

        for (name, policy) in &self.vars {
            if let EnvPolicy::Set(value) = policy {
                resolved.insert(name.clone(), value.clone());
            }
        }

        resolved
            .iter()
            .map(|(name, value)| CString::new(format!("{}={}", name, value)).unwrap())
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn base() -> Vec<(String, String)> {
        vec![("HOME".into(), "/home/gamer".into()), ("TERM".into(), "xterm".into())]
    }

    #[test]
    fn trichotomy() {
        let mut environ = Environ::new();

        environ.set("LD_PRELOAD", "/overrides/libfoo.so", true);
        environ.unset("LD_AUDIT");

        assert_eq!(environ.policy("LD_PRELOAD"), Some(&EnvPolicy::Set("/overrides/libfoo.so".into())));
        assert_eq!(environ.policy("LD_AUDIT"), Some(&EnvPolicy::Unset));
        assert_eq!(environ.policy("HOME"), None);
    }

    #[test]
    fn set_without_overwrite() {
        let mut environ = Environ::new();

        environ.set("STEAM_RUNTIME", "0", true);
        environ.set("STEAM_RUNTIME", "1", false);
        assert_eq!(environ.get("STEAM_RUNTIME"), Some("0"));

        environ.set("STEAM_RUNTIME", "1", true);
        assert_eq!(environ.get("STEAM_RUNTIME"), Some("1"));
    }

    #[test]
    fn serialized_union() {
        let mut environ = Environ::new();

        environ.set("LD_PRELOAD", "/overrides/libfoo.so", true);
        environ.unset("TERM");

        let serialized = environ.serialize(base());
        let expected: Vec<&str> = vec!["HOME=/home/gamer", "LD_PRELOAD=/overrides/libfoo.so"];

        assert_eq!(serialized.iter().map(|cs| cs.to_str().unwrap()).collect::<Vec<_>>(), expected);
    }

    #[test]
    fn empty_is_not_unset() {
        let mut environ = Environ::new();

        environ.set("LD_AUDIT", "", true);

        let serialized = environ.serialize(Vec::new());

        assert_eq!(serialized[0].to_str().unwrap(), "LD_AUDIT=");
    }

    #[test]
    fn explicit_sorted() {
        let mut environ = Environ::new();

        environ.unset("ZDOTDIR");
        environ.set("DISPLAY", ":0", true);
        environ.set("COLORTERM", "truecolor", true);

        let keys: Vec<&str> = environ.explicit().map(|(name, _)| name).collect();

        assert_eq!(keys, vec!["COLORTERM", "DISPLAY", "ZDOTDIR"]);
    }
}
