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
    fs::{canonicalize, create_dir_all, read_link, symlink_metadata},
    os::unix::fs::symlink,
    process::Command,
};

use indexmap::IndexSet;

use crate::{
    abi::{Abi, DL_TOKEN, SUPPORTED_ABIS},
    constants::{CAPTURE_LIBS_EXECUTABLE, HOST_MOUNT, OVERRIDES_MOUNT},
    err,
    error::*,
    exec::{args::ExecutionArgs, wait_helper},
    graphics::{AbiGraphics, HostInspector, IcdKind, LibraryClass, NVIDIA_PATTERNS},
    log::Logger,
    runtime::Runtime,
    utils::{basename, helper_path},
    Error,
    ErrorKind,
};

/*
 * What the capture helper pulls from the host when the host's version is
 * the one the container must use: the GL stack and everything the drivers
 * or glibc reach for behind the loader's back.
 */
pub const CAPTURE_PATTERNS: &[&str] = &[
    "gl:",
    "libdrm.so.2",
    "libdrm_*.so*",
    "libvulkan.so.1",
    "libva.so.*",
    "libva-drm.so.*",
    "libva-glx.so.*",
    "libva-x11.so.*",
    "libvdpau.so.1",
    /* dlopen'd by glibc for IDN hostname resolution. */
    "libidn2.so.0",
];

pub struct CaptureOptions<'a> {
    pub bwrap: &'a str,
    pub verbose: bool,
}

#[derive(Debug, Default)]
pub struct GraphicsSummary {
    pub abis: Vec<&'static Abi>,
    pub host_libc_abis: Vec<&'static Abi>,
    pub egl_manifests: Vec<String>,
    pub vulkan_manifests: Vec<String>,
    pub va_api_dirs: IndexSet<String>,
}

impl GraphicsSummary {
    /* Whether locale data should come from the host rather than the runtime. */
    pub fn uses_host_libc(&self) -> bool {
        !self.host_libc_abis.is_empty()
    }

    pub fn apply_env(&self, args: &mut ExecutionArgs) {
        if !self.egl_manifests.is_empty() {
            args.setenv("__EGL_VENDOR_LIBRARY_FILENAMES", &self.egl_manifests.join(":"));
        }

        if !self.vulkan_manifests.is_empty() {
            args.setenv("VK_ICD_FILENAMES", &self.vulkan_manifests.join(":"));
        }

        args.setenv("VDPAU_DRIVER_PATH", &format!("{}/lib/{}/vdpau", OVERRIDES_MOUNT, DL_TOKEN));

        if !self.va_api_dirs.is_empty() {
            args.setenv(
                "LIBVA_DRIVERS_PATH",
                &self.va_api_dirs.iter().cloned().collect::<Vec<_>>().join(":"),
            );
        }
    }
}

/*
 * Populate the overrides tree with the host graphics stack, one ABI at a
 * time. A failing ABI is a warning; a host and container with no ABI in
 * common is fatal.
 */
pub fn capture_graphics(
    runtime: &Runtime,
    inspector: &HostInspector,
    args: &mut ExecutionArgs,
    opts: &CaptureOptions,
    logger: &Logger,
) -> Result<GraphicsSummary> {
    let mut summary = GraphicsSummary::default();

    for abi in SUPPORTED_ABIS {
        match capture_abi(runtime, inspector, args, abi, opts, &mut summary) {
            Ok(()) => summary.abis.push(abi),
            Err(error) => logger.warn(&format!("Unable to capture {} graphics stack: {}", abi.tuple, error.kind())),
        }
    }

    if summary.abis.is_empty() {
        err!(ErrorKind::Unsupported(
            "No supported CPU architectures are common to host and container".into()
        ))?
    }

    if summary.uses_host_libc() && summary.host_libc_abis.len() != summary.abis.len() {
        logger.warn("Some architectures use the host glibc and some use the runtime's; locale data follows the host.");
    }

    summary.apply_env(args);
    Ok(summary)
}

fn capture_abi(
    runtime: &Runtime,
    inspector: &HostInspector,
    args: &mut ExecutionArgs,
    abi: &'static Abi,
    opts: &CaptureOptions,
    summary: &mut GraphicsSummary,
) -> Result<()> {
    let libdir = format!("{}/lib/{}", runtime.overrides(), abi.tuple);

    create_dir_all(&libdir).prepend_io(|| libdir.clone())?;
    run_capture_helper(runtime, &libdir, opts)?;

    let graphics = inspector.inspect(abi);

    capture_icds(&graphics, runtime.overrides(), summary)?;
    capture_dri(inspector, abi, &libdir)?;

    /*
     * A libc.so.6 symlink in the overrides means the helper chose the
     * host's glibc; the interpreter must match it or nothing loads.
     */
    if is_symlink(&format!("{}/libc.so.6", libdir)) {
        let in_runtime = resolve_runtime_ld_so(runtime, abi, opts)?;
        let on_host = canonicalize(inspector.host_path(abi.ld_so))
            .prepend_io(|| abi.ld_so.into())?
            .display()
            .to_string();

        args.robind(&on_host, &in_runtime);
        summary.host_libc_abis.push(abi);
    }

    Ok(())
}

/*
 * The helper runs in a nested container whose root is the host and whose
 * /usr is the runtime, so it can compare both sides of every SONAME and
 * keep the newer one. Capture results are symlinks into /run/host.
 */
fn run_capture_helper(runtime: &Runtime, libdir: &str, opts: &CaptureOptions) -> Result<()> {
    let helper = match helper_path(CAPTURE_LIBS_EXECUTABLE) {
        Some(helper) => helper,
        None => err!(ErrorKind::Unsupported(format!("'{}' helper not found", CAPTURE_LIBS_EXECUTABLE)))?,
    };
    let mut command = Command::new(opts.bwrap);

    command
        .arg("--ro-bind")
        .arg("/")
        .arg("/")
        .arg("--ro-bind")
        .arg(runtime.usr())
        .arg("/usr")
        .arg("--bind")
        .arg(libdir)
        .arg(libdir)
        .arg(helper)
        .arg(format!("--dest={}", libdir))
        .arg(format!("--link-target={}", HOST_MOUNT));

    if opts.verbose {
        command.arg("--verbose");
    }

    command.args(CAPTURE_PATTERNS).args(NVIDIA_PATTERNS);

    match wait_helper("capture-libs", &mut command)? {
        0 => Ok(()),
        code => err!(ErrorKind::ChildFailure("capture-libs", code)),
    }
}

/*
 * JSON-bearing kinds: absolute drivers are captured into numbered
 * per-sequence directories (vendors reuse basenames) and get rewritten
 * manifests; SONAME-only manifests are referenced on the host through
 * /run/host. Directory-scan kinds land flat in vdpau/ and dri/.
 */
pub fn capture_icds(graphics: &AbiGraphics, overrides: &str, summary: &mut GraphicsSummary) -> Result<()> {
    let tuple = graphics.abi.tuple;

    for (kind, share_dir) in [(IcdKind::Egl, "share/glvnd/egl_vendor.d"), (IcdKind::Vulkan, "share/vulkan/icd.d")] {
        let mut sequence = 0;

        create_dir_all(format!("{}/{}", overrides, share_dir)).prepend_io(|| share_dir.into())?;

        let manifests = match kind {
            IcdKind::Egl => &mut summary.egl_manifests,
            _ => &mut summary.vulkan_manifests,
        };

        for icd in graphics.of_kind(kind).filter(|icd| icd.usable()) {
            match icd.class {
                LibraryClass::AbsolutePath => {
                    let (resolved, manifest) = match (icd.resolved_library(), &icd.manifest) {
                        (Some(resolved), Some(manifest)) => (resolved, manifest),
                        _ => continue,
                    };
                    let name = basename(resolved);
                    let capture_dir = format!("{}/lib/{}/{}/{}", overrides, tuple, kind.capture_dir(), sequence);

                    create_dir_all(&capture_dir).prepend_io(|| capture_dir.clone())?;
                    link_into(&format!("{}/{}", capture_dir, name), &format!("{}{}", HOST_MOUNT, resolved))?;

                    let container_lib =
                        format!("{}/lib/{}/{}/{}/{}", OVERRIDES_MOUNT, tuple, kind.capture_dir(), sequence, name);
                    let manifest_name = format!("{}-{}.json", sequence, tuple);
                    let manifest_path = format!("{}/{}/{}", overrides, share_dir, manifest_name);

                    manifest.write_rewritten(&manifest_path, &container_lib)?;
                    manifests.push(format!("{}/{}/{}", OVERRIDES_MOUNT, share_dir, manifest_name));
                    sequence += 1;
                }
                LibraryClass::Soname => {
                    if let Some(manifest_path) = &icd.manifest_path {
                        manifests.push(format!("{}{}", HOST_MOUNT, manifest_path));
                    }
                }
                LibraryClass::Nonexistent => (),
            }
        }
    }

    for icd in graphics.of_kind(IcdKind::Vdpau).filter(|icd| icd.usable()) {
        let resolved = icd.resolved_library().unwrap();
        let dir = format!("{}/lib/{}/vdpau", overrides, tuple);

        create_dir_all(&dir).prepend_io(|| dir.clone())?;
        link_into(&format!("{}/{}", dir, basename(resolved)), &format!("{}{}", HOST_MOUNT, resolved))?;
    }

    for icd in graphics.of_kind(IcdKind::VaApi).filter(|icd| icd.usable()) {
        let resolved = icd.resolved_library().unwrap();
        let dir = format!("{}/lib/{}/dri", overrides, tuple);

        create_dir_all(&dir).prepend_io(|| dir.clone())?;
        link_into(&format!("{}/{}", dir, basename(resolved)), &format!("{}{}", HOST_MOUNT, resolved))?;
        summary.va_api_dirs.insert(format!("{}/lib/{}/dri", OVERRIDES_MOUNT, tuple));
    }

    Ok(())
}

/* Mesa drivers and the S3TC decompressor, collected by directory scan. */
fn capture_dri(inspector: &HostInspector, abi: &Abi, libdir: &str) -> Result<()> {
    let dri = format!("{}/dri", libdir);
    let drivers = inspector.dri_drivers(abi);

    if !drivers.is_empty() {
        create_dir_all(&dri).prepend_io(|| dri.clone())?;
    }

    for driver in drivers {
        link_into(&format!("{}/{}", dri, basename(&driver)), &format!("{}{}", HOST_MOUNT, driver))?;
    }

    if let Some(txc) = inspector.txc_dxtn(abi) {
        link_into(&format!("{}/{}", libdir, basename(&txc)), &format!("{}{}", HOST_MOUNT, txc))?;
    }

    Ok(())
}

fn resolve_runtime_ld_so(runtime: &Runtime, abi: &Abi, opts: &CaptureOptions) -> Result<String> {
    let mut command = Command::new(opts.bwrap);

    command
        .arg("--ro-bind")
        .arg(runtime.usr())
        .arg("/usr")
        .arg("--symlink")
        .arg("usr/lib")
        .arg("/lib")
        .arg("--symlink")
        .arg("usr/lib64")
        .arg("/lib64")
        .arg("readlink")
        .arg("-e")
        .arg(abi.ld_so);

    let output = match command.output() {
        Ok(output) => output,
        Err(error) => err!(ErrorKind::ProcessInitFailure("bwrap", error.kind()))?,
    };

    if !output.status.success() {
        err!(ErrorKind::Unsupported(format!("Unable to resolve '{}' inside the runtime", abi.ld_so)))?
    }

    match String::from_utf8(output.stdout).map(|s| s.trim().to_string()) {
        Ok(path) if !path.is_empty() => Ok(path),
        _ => err!(ErrorKind::Unsupported(format!("Unable to resolve '{}' inside the runtime", abi.ld_so))),
    }
}

fn is_symlink(path: &str) -> bool {
    symlink_metadata(path).map(|meta| meta.file_type().is_symlink()).unwrap_or(false)
}

fn link_into(link: &str, target: &str) -> Result<()> {
    match symlink(target, link) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists => {
            match read_link(link).map(|existing| existing.as_os_str() == std::ffi::OsStr::new(target)) {
                Ok(true) => Ok(()),
                _ => err!(ErrorKind::IOError(link.into(), std::io::ErrorKind::AlreadyExists)),
            }
        }
        Err(error) => Err(error).prepend_io(|| link.into()),
    }
}

#[cfg(test)]
mod test {
    use std::fs::write;

    use super::*;
    use crate::abi::X86_64;

    fn scratch(name: &str) -> String {
        let dir = format!("{}/gamewrap-capture-{}-{}", std::env::temp_dir().display(), std::process::id(), name);

        create_dir_all(&dir).unwrap();
        dir
    }

    fn plant(root: &str, path: &str, contents: &str) {
        let full = format!("{}{}", root, path);

        create_dir_all(crate::utils::dirname(&full)).unwrap();
        write(&full, contents).unwrap();
    }

    #[test]
    fn absolute_icd_rewrite() {
        let host = scratch("icd-host");
        let overrides = scratch("icd-overrides");

        plant(&host, "/usr/lib/x86_64-linux-gnu/libEGL_vendor.so.0", "elf");
        plant(
            &host,
            "/usr/share/glvnd/egl_vendor.d/10_vendor.json",
            r#"{"file_format_version":"1.0.0","ICD":{"library_path":"/usr/lib/x86_64-linux-gnu/libEGL_vendor.so.0"}}"#,
        );

        let graphics = HostInspector::new(&host).inspect(&X86_64);
        let mut summary = GraphicsSummary::default();

        capture_icds(&graphics, &overrides, &mut summary).unwrap();

        /* Captured symlink points through /run/host. */
        let link = format!("{}/lib/x86_64-linux-gnu/glvnd/0/libEGL_vendor.so.0", overrides);

        assert_eq!(
            read_link(&link).unwrap().to_str().unwrap(),
            "/run/host/usr/lib/x86_64-linux-gnu/libEGL_vendor.so.0"
        );

        /* Rewritten manifest names the in-container library. */
        let manifest =
            crate::graphics::manifest::IcdManifest::load(&format!("{}/share/glvnd/egl_vendor.d/0-x86_64-linux-gnu.json", overrides))
                .unwrap();

        assert_eq!(
            manifest.library_path(),
            "/overrides/lib/x86_64-linux-gnu/glvnd/0/libEGL_vendor.so.0"
        );
        assert_eq!(
            summary.egl_manifests,
            vec!["/overrides/share/glvnd/egl_vendor.d/0-x86_64-linux-gnu.json"]
        );

        std::fs::remove_dir_all(&host).unwrap();
        std::fs::remove_dir_all(&overrides).unwrap();
    }

    #[test]
    fn soname_icd_stays_on_host() {
        let host = scratch("soname-host");
        let overrides = scratch("soname-overrides");

        plant(&host, "/usr/lib/x86_64-linux-gnu/libvulkan_radeon.so", "elf");
        plant(
            &host,
            "/usr/share/vulkan/icd.d/radeon_icd.x86_64.json",
            r#"{"file_format_version":"1.0.0","ICD":{"library_path":"libvulkan_radeon.so"}}"#,
        );

        let graphics = HostInspector::new(&host).inspect(&X86_64);
        let mut summary = GraphicsSummary::default();

        capture_icds(&graphics, &overrides, &mut summary).unwrap();

        assert_eq!(
            summary.vulkan_manifests,
            vec!["/run/host/usr/share/vulkan/icd.d/radeon_icd.x86_64.json"]
        );

        std::fs::remove_dir_all(&host).unwrap();
        std::fs::remove_dir_all(&overrides).unwrap();
    }

    #[test]
    fn vendor_basename_collisions_get_sequences() {
        let host = scratch("seq-host");
        let overrides = scratch("seq-overrides");

        plant(&host, "/opt/amd/libEGL_vendor.so.0", "amd");
        plant(&host, "/opt/nvidia/libEGL_vendor.so.0", "nvidia");
        plant(
            &host,
            "/usr/share/glvnd/egl_vendor.d/10_amd.json",
            r#"{"ICD":{"library_path":"/opt/amd/libEGL_vendor.so.0"}}"#,
        );
        plant(
            &host,
            "/usr/share/glvnd/egl_vendor.d/20_nvidia.json",
            r#"{"ICD":{"library_path":"/opt/nvidia/libEGL_vendor.so.0"}}"#,
        );

        let graphics = HostInspector::new(&host).inspect(&X86_64);
        let mut summary = GraphicsSummary::default();

        capture_icds(&graphics, &overrides, &mut summary).unwrap();

        assert_eq!(
            read_link(format!("{}/lib/x86_64-linux-gnu/glvnd/0/libEGL_vendor.so.0", overrides)).unwrap().to_str().unwrap(),
            "/run/host/opt/amd/libEGL_vendor.so.0"
        );
        assert_eq!(
            read_link(format!("{}/lib/x86_64-linux-gnu/glvnd/1/libEGL_vendor.so.0", overrides)).unwrap().to_str().unwrap(),
            "/run/host/opt/nvidia/libEGL_vendor.so.0"
        );

        std::fs::remove_dir_all(&host).unwrap();
        std::fs::remove_dir_all(&overrides).unwrap();
    }

    #[test]
    fn env_multiplexing() {
        let mut summary = GraphicsSummary::default();

        summary.egl_manifests.push("/overrides/share/glvnd/egl_vendor.d/0-x86_64-linux-gnu.json".into());
        summary.va_api_dirs.insert("/overrides/lib/x86_64-linux-gnu/dri".into());
        summary.va_api_dirs.insert("/overrides/lib/i386-linux-gnu/dri".into());

        let mut args = ExecutionArgs::new();

        summary.apply_env(&mut args);

        let argv: Vec<String> = args.args().iter().flatten().map(|arg| arg.to_str().unwrap().to_string()).collect();
        let setenv =
            |name: &str| argv.windows(3).find(|w| w[0] == "--setenv" && w[1] == name).map(|w| w[2].clone());

        assert_eq!(
            setenv("__EGL_VENDOR_LIBRARY_FILENAMES").as_deref(),
            Some("/overrides/share/glvnd/egl_vendor.d/0-x86_64-linux-gnu.json")
        );
        assert_eq!(setenv("VK_ICD_FILENAMES"), None);
        assert_eq!(
            setenv("VDPAU_DRIVER_PATH").as_deref(),
            Some("/overrides/lib/${PLATFORM}-linux-gnu/vdpau")
        );
        assert_eq!(
            setenv("LIBVA_DRIVERS_PATH").as_deref(),
            Some("/overrides/lib/x86_64-linux-gnu/dri:/overrides/lib/i386-linux-gnu/dri")
        );
    }
}
