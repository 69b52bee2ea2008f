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

use std::fs::{read_to_string, write};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{error::*, Error};

/*
 * EGL and Vulkan loaders share this manifest shape: a version string and an
 * ICD block naming the driver library. Vendors attach extra keys
 * (api_version, functions, ...) which must survive a rewrite untouched,
 * hence the flattened remainder maps.
 */
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IcdManifest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_format_version: Option<String>,
    #[serde(rename = "ICD")]
    pub icd: IcdBlock,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IcdBlock {
    pub library_path: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl IcdManifest {
    pub fn load(path: &str) -> Result<Self> {
        let contents = read_to_string(path).prepend_io(|| path.into())?;

        serde_json::from_str(&contents).prepend(|| format!("Unable to parse ICD manifest '{}'", path))
    }

    pub fn library_path(&self) -> &str {
        &self.icd.library_path
    }

    /*
     * Write a copy whose library_path points at the captured in-container
     * location; everything else round-trips unchanged.
     */
    pub fn write_rewritten(&self, path: &str, new_library_path: &str) -> Result<()> {
        let mut rewritten = self.clone();

        rewritten.icd.library_path = new_library_path.into();
        write(path, serde_json::to_string_pretty(&rewritten).generic()?).prepend_io(|| path.into())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const VENDOR_MANIFEST: &str = r#"{
        "file_format_version": "1.0.0",
        "ICD": {
            "library_path": "/usr/lib/x86_64-linux-gnu/libEGL_vendor.so.0",
            "api_version": "1.5"
        },
        "comment": "vendor-specific"
    }"#;

    #[test]
    fn extra_keys_survive() {
        let manifest: IcdManifest = serde_json::from_str(VENDOR_MANIFEST).unwrap();

        assert_eq!(manifest.library_path(), "/usr/lib/x86_64-linux-gnu/libEGL_vendor.so.0");
        assert_eq!(manifest.icd.extra["api_version"], "1.5");
        assert_eq!(manifest.extra["comment"], "vendor-specific");
    }

    #[test]
    fn rewrite_round_trips() {
        let dir = format!("{}/gamewrap-manifest-{}", std::env::temp_dir().display(), std::process::id());

        std::fs::create_dir_all(&dir).unwrap();

        let original: IcdManifest = serde_json::from_str(VENDOR_MANIFEST).unwrap();
        let rewritten_path = format!("{}/0-x86_64-linux-gnu.json", dir);

        original
            .write_rewritten(&rewritten_path, "/overrides/lib/x86_64-linux-gnu/glvnd/0/libEGL_vendor.so.0")
            .unwrap();

        let rewritten = IcdManifest::load(&rewritten_path).unwrap();

        assert_eq!(rewritten.library_path(), "/overrides/lib/x86_64-linux-gnu/glvnd/0/libEGL_vendor.so.0");

        /* Replacing the path back yields the semantic input. */
        let mut restored = rewritten.clone();

        restored.icd.library_path = original.library_path().into();
        assert_eq!(restored, original);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
