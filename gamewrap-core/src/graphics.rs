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

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::read_dir,
    path::Path,
};

use crate::{abi::Abi, graphics::manifest::IcdManifest, utils::basename};

pub mod manifest;

/*
 * SONAMEs the NVIDIA proprietary stack is known to dlopen behind the
 * loader's back; fed verbatim to the capture helper as glob patterns.
 */
pub const NVIDIA_PATTERNS: &[&str] = &[
    "libcuda.so*",
    "libglxserver_nvidia.so*",
    "libEGL_nvidia.so*",
    "libGLESv1_CM_nvidia.so*",
    "libGLESv2_nvidia.so*",
    "libGLX_nvidia.so*",
    "libnvcuvid.so*",
    "libnvidia-*.so*",
    "libnvoptix.so*",
    "libOpenCL.so*",
    "libXNVCtrl.so*",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcdKind {
    Egl,
    Vulkan,
    Vdpau,
    VaApi,
}

impl IcdKind {
    /* Subdirectory name inside the per-ABI overrides tree. */
    pub fn capture_dir(&self) -> &'static str {
        match self {
            Self::Egl => "glvnd",
            Self::Vulkan => "vulkan",
            Self::Vdpau => "vdpau",
            Self::VaApi => "dri",
        }
    }

    /* Manifest search paths for the JSON-bearing kinds, highest priority first. */
    pub fn manifest_dirs(&self, abi: &Abi) -> Vec<String> {
        match self {
            Self::Egl => vec![
                "/etc/glvnd/egl_vendor.d".into(),
                format!("/usr/lib/{}/GL/glvnd/egl_vendor.d", abi.tuple),
                "/usr/share/glvnd/egl_vendor.d".into(),
            ],
            Self::Vulkan => vec![
                "/etc/vulkan/icd.d".into(),
                "/usr/local/etc/vulkan/icd.d".into(),
                "/usr/local/share/vulkan/icd.d".into(),
                "/usr/share/vulkan/icd.d".into(),
            ],
            _ => Vec::new(),
        }
    }
}

impl Display for IcdKind {
    fn fmt(&self, fmter: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Egl => write!(fmter, "EGL"),
            Self::Vulkan => write!(fmter, "Vulkan"),
            Self::Vdpau => write!(fmter, "VDPAU"),
            Self::VaApi => write!(fmter, "VA-API"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibraryClass {
    Nonexistent,
    AbsolutePath,
    Soname,
}

/*
 * One driver as seen on the host: where its manifest lives (JSON kinds),
 * what the manifest or scan referenced, and what that reference resolved
 * to. Resolution failures are recorded per entry rather than failing the
 * inspection.
 */
#[derive(Debug, Clone)]
pub struct IcdDetails {
    pub kind: IcdKind,
    pub manifest_path: Option<String>,
    pub manifest: Option<IcdManifest>,
    pub library: String,
    pub resolved: Option<String>,
    pub class: LibraryClass,
    pub error: Option<String>,
}

impl IcdDetails {
    pub fn resolved_library(&self) -> Option<&str> {
        self.resolved.as_deref()
    }

    pub fn usable(&self) -> bool {
        self.error.is_none() && self.class != LibraryClass::Nonexistent
    }
}

/* Everything captured for one ABI. */
#[derive(Debug)]
pub struct AbiGraphics {
    pub abi: &'static Abi,
    pub icds: Vec<IcdDetails>,
}

impl AbiGraphics {
    pub fn of_kind(&self, kind: IcdKind) -> impl Iterator<Item = &IcdDetails> {
        self.icds.iter().filter(move |icd| icd.kind == kind)
    }
}

/*
 * Enumerates per-ABI graphics drivers on a host tree. The root is "/" in
 * production; tests point it at a fabricated sysroot.
 */
pub struct HostInspector {
    root: String,
}

impl HostInspector {
    pub fn new(root: &str) -> Self {
        Self {
            root: root.trim_end_matches('/').into(),
        }
    }

    pub fn host_path(&self, path: &str) -> String {
        format!("{}{}", self.root, path)
    }

    pub fn inspect(&self, abi: &'static Abi) -> AbiGraphics {
        let mut icds = Vec::new();

        for kind in [IcdKind::Egl, IcdKind::Vulkan] {
            icds.extend(self.enumerate_manifests(abi, kind));
        }

        icds.extend(self.scan_drivers(abi, IcdKind::Vdpau, "vdpau", |name| name.starts_with("libvdpau_")));
        icds.extend(self.scan_drivers(abi, IcdKind::VaApi, "dri", |name| name.ends_with("_drv_video.so")));

        /* Soname-only duplicates collapse to the first occurrence. */
        let mut seen: Vec<String> = Vec::new();

        icds.retain(|icd| match icd.class {
            LibraryClass::Soname => match seen.contains(&icd.library) {
                true => false,
                false => {
                    seen.push(icd.library.clone());
                    true
                }
            },
            _ => true,
        });

        AbiGraphics { abi, icds }
    }

    /* DRI drivers are captured wholesale rather than per-manifest. */
    pub fn dri_drivers(&self, abi: &Abi) -> Vec<String> {
        let mut drivers = Vec::new();

        for libdir in abi.search_dirs() {
            let dri = format!("{}/dri", libdir);

            for name in self.list_dir(&dri) {
                if name.ends_with(".so") && !drivers.iter().any(|existing: &String| basename(existing) == name) {
                    drivers.push(format!("{}/{}", dri, name));
                }
            }
        }

        drivers.sort();
        drivers
    }

    /* The legacy S3TC decompressor is dlopen'd by Mesa when present. */
    pub fn txc_dxtn(&self, abi: &Abi) -> Option<String> {
        abi.search_dirs()
            .iter()
            .map(|libdir| format!("{}/libtxc_dxtn.so", libdir))
            .find(|path| Path::new(&self.host_path(path)).exists())
    }

    fn enumerate_manifests(&self, abi: &'static Abi, kind: IcdKind) -> Vec<IcdDetails> {
        let mut details = Vec::new();

        for dir in kind.manifest_dirs(abi) {
            let mut names = self.list_dir(&dir);

            names.sort();

            for name in names {
                if !name.ends_with(".json") {
                    continue;
                }

                let manifest_path = format!("{}/{}", dir, name);

                details.push(self.resolve_manifest(abi, kind, &manifest_path));
            }
        }

        details
    }

    fn resolve_manifest(&self, abi: &Abi, kind: IcdKind, manifest_path: &str) -> IcdDetails {
        let manifest = match IcdManifest::load(&self.host_path(manifest_path)) {
            Ok(manifest) => manifest,
            Err(error) => {
                return IcdDetails {
                    kind,
                    manifest_path: Some(manifest_path.into()),
                    manifest: None,
                    library: String::new(),
                    resolved: None,
                    class: LibraryClass::Nonexistent,
                    error: Some(error.kind().to_string()),
                }
            }
        };
        let library = manifest.library_path().to_string();
        let (class, resolved, error) = self.resolve_library(abi, crate::utils::dirname(manifest_path), &library);

        IcdDetails {
            kind,
            manifest_path: Some(manifest_path.into()),
            manifest: Some(manifest),
            library,
            resolved,
            class,
            error,
        }
    }

    /*
     * Absolute paths stand on their own; anything with a directory
     * component is relative to the manifest; a bare SONAME is searched in
     * the ABI's library directories. $LIB expands to the multiarch libdir.
     */
    fn resolve_library(&self, abi: &Abi, manifest_dir: &str, library: &str) -> (LibraryClass, Option<String>, Option<String>) {
        let library = library.replace("$LIB", &format!("lib/{}", abi.tuple));

        if library.starts_with('/') {
            return match Path::new(&self.host_path(&library)).exists() {
                true => (LibraryClass::AbsolutePath, Some(library), None),
                false => (LibraryClass::Nonexistent, None, Some(format!("'{}' not found on host", library))),
            };
        }

        if library.contains('/') {
            let joined = format!("{}/{}", manifest_dir, library);

            return match Path::new(&self.host_path(&joined)).exists() {
                true => (LibraryClass::AbsolutePath, Some(joined), None),
                false => (LibraryClass::Nonexistent, None, Some(format!("'{}' not found on host", joined))),
            };
        }

        for dir in abi.search_dirs() {
            let candidate = format!("{}/{}", dir, library);

            if Path::new(&self.host_path(&candidate)).exists() {
                return (LibraryClass::Soname, Some(candidate), None);
            }
        }

        /*
         * A SONAME we cannot see may still be resolvable by the container's
         * linker; keep it, the loader decides.
         */
        (LibraryClass::Soname, None, None)
    }

    fn scan_drivers<F>(&self, abi: &'static Abi, kind: IcdKind, subdir: &str, matches: F) -> Vec<IcdDetails>
    where
        F: Fn(&str) -> bool, {
        let mut details = Vec::new();

        for libdir in abi.search_dirs() {
            let dir = format!("{}/{}", libdir, subdir);
            let mut names = self.list_dir(&dir);

            names.sort();

            for name in names {
                if !matches(&name) || !name.contains(".so") {
                    continue;
                }

                let path = format!("{}/{}", dir, name);

                if details.iter().any(|icd: &IcdDetails| basename(&icd.library) == name) {
                    continue;
                }

                details.push(IcdDetails {
                    kind,
                    manifest_path: None,
                    manifest: None,
                    library: path.clone(),
                    resolved: Some(path),
                    class: LibraryClass::AbsolutePath,
                    error: None,
                });
            }
        }

        details
    }

    fn list_dir(&self, dir: &str) -> Vec<String> {
        match read_dir(self.host_path(dir)) {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok())
                .filter_map(|entry| entry.file_name().into_string().ok())
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod test {
    use std::fs::{create_dir_all, write};

    use super::*;
    use crate::abi::X86_64;

    fn sysroot(name: &str) -> String {
        let root = format!("{}/gamewrap-host-{}-{}", std::env::temp_dir().display(), std::process::id(), name);

        create_dir_all(&root).unwrap();
        root
    }

    fn plant(root: &str, path: &str, contents: &str) {
        let full = format!("{}{}", root, path);

        create_dir_all(crate::utils::dirname(&full)).unwrap();
        write(&full, contents).unwrap();
    }

    #[test]
    fn absolute_manifest_resolution() {
        let root = sysroot("abs");

        plant(&root, "/usr/lib/x86_64-linux-gnu/libEGL_vendor.so.0", "elf");
        plant(
            &root,
            "/usr/share/glvnd/egl_vendor.d/10_vendor.json",
            r#"{"file_format_version":"1.0.0","ICD":{"library_path":"/usr/lib/x86_64-linux-gnu/libEGL_vendor.so.0"}}"#,
        );

        let graphics = HostInspector::new(&root).inspect(&X86_64);
        let egl: Vec<&IcdDetails> = graphics.of_kind(IcdKind::Egl).collect();

        assert_eq!(egl.len(), 1);
        assert_eq!(egl[0].class, LibraryClass::AbsolutePath);
        assert_eq!(egl[0].resolved_library(), Some("/usr/lib/x86_64-linux-gnu/libEGL_vendor.so.0"));
        assert!(egl[0].usable());

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn soname_manifests_collapse() {
        let root = sysroot("soname");
        let manifest = r#"{"file_format_version":"1.0.0","ICD":{"library_path":"libEGL_mesa.so.0"}}"#;

        plant(&root, "/usr/lib/x86_64-linux-gnu/libEGL_mesa.so.0", "elf");
        plant(&root, "/etc/glvnd/egl_vendor.d/50_mesa.json", manifest);
        plant(&root, "/usr/share/glvnd/egl_vendor.d/50_mesa.json", manifest);

        let graphics = HostInspector::new(&root).inspect(&X86_64);
        let egl: Vec<&IcdDetails> = graphics.of_kind(IcdKind::Egl).collect();

        assert_eq!(egl.len(), 1);
        assert_eq!(egl[0].class, LibraryClass::Soname);
        assert_eq!(egl[0].manifest_path.as_deref(), Some("/etc/glvnd/egl_vendor.d/50_mesa.json"));

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn missing_library_recorded_not_fatal() {
        let root = sysroot("missing");

        plant(
            &root,
            "/usr/share/vulkan/icd.d/broken.json",
            r#"{"ICD":{"library_path":"/usr/lib/x86_64-linux-gnu/libvulkan_gone.so"}}"#,
        );

        let graphics = HostInspector::new(&root).inspect(&X86_64);
        let vulkan: Vec<&IcdDetails> = graphics.of_kind(IcdKind::Vulkan).collect();

        assert_eq!(vulkan.len(), 1);
        assert_eq!(vulkan[0].class, LibraryClass::Nonexistent);
        assert!(!vulkan[0].usable());
        assert!(vulkan[0].error.is_some());

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn driver_scans() {
        let root = sysroot("scan");

        plant(&root, "/usr/lib/x86_64-linux-gnu/vdpau/libvdpau_radeonsi.so.1.0.0", "elf");
        plant(&root, "/usr/lib/x86_64-linux-gnu/dri/radeonsi_drv_video.so", "elf");
        plant(&root, "/usr/lib/x86_64-linux-gnu/dri/radeonsi_dri.so", "elf");
        plant(&root, "/usr/lib/dri/radeonsi_dri.so", "elf");

        let inspector = HostInspector::new(&root);
        let graphics = inspector.inspect(&X86_64);

        assert_eq!(graphics.of_kind(IcdKind::Vdpau).count(), 1);
        assert_eq!(graphics.of_kind(IcdKind::VaApi).count(), 1);

        /* Basename collisions across libdirs keep the most specific path. */
        let dri = inspector.dri_drivers(&X86_64);

        assert_eq!(
            dri,
            vec![
                "/usr/lib/x86_64-linux-gnu/dri/radeonsi_dri.so",
                "/usr/lib/x86_64-linux-gnu/dri/radeonsi_drv_video.so"
            ]
        );

        std::fs::remove_dir_all(&root).unwrap();
    }
}
