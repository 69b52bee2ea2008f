/*
 * gamewrap
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

use std::{env::var, fs::read_link, path::Path};

use gamewrap_core::{
    constants::{BWRAP_EXECUTABLE, GAME_OVERLAY_BASENAME, HOST_MOUNT, TOOLS_MOUNT},
    err,
    error::*,
    exec::{args::ExecutionArgs, exec_replace, resolve_program},
    graphics::HostInspector,
    home,
    log::Logger,
    runtime::{
        capture::{capture_graphics, CaptureOptions},
        compose::Composer,
        desktop,
        Runtime,
        RuntimeBuilder,
    },
    steam,
    utils::basename,
    Error,
    ErrorKind,
};

use crate::options::{resolve_runtime, WrapOptions};

const ADVERB_EXECUTABLE: &str = "gamewrap-adverb";
const LDSO_MOUNT: &str = "/run/gamewrap/ldso";

/*
 * Everything the adverb needs to rebuild ld.so.cache from inside: a
 * writable directory seeded with the runtime's search paths, and the
 * override directories that take precedence.
 */
struct LdsoPlan {
    container_dir: String,
    override_dirs: Vec<String>,
}

pub fn execute(options: WrapOptions) -> Result<()> {
    let mut logger = Logger::new("wrap");

    logger.set_verbosity(options.verbosity);

    match resolve_runtime(&options)? {
        Some(runtime_root) => match prepare_container(&options, &runtime_root, &logger) {
            Ok(()) => Ok(()),
            Err(error) if options.host_fallback => {
                logger.warn(&format!("Container setup failed ({}); falling back to the host OS", error.kind()));
                execute_on_host(&options, &logger)
            }
            Err(error) => Err(error),
        },
        None if options.host_fallback => execute_on_host(&options, &logger),
        None => err!(ErrorKind::Usage("A runtime is required; pass --runtime or --host-fallback.".into())),
    }
}

/*
 * Assemble the whole container plan, then become bwrap. Everything after
 * the exec happens inside the container, where the adverb carries on with
 * the inherited lock.
 */
fn prepare_container(options: &WrapOptions, runtime_root: &str, logger: &Logger) -> Result<()> {
    let bwrap = find_bwrap()?;
    let mut runtime = RuntimeBuilder::new(runtime_root)
        .copy_into(options.copy_runtime_into.as_deref())
        .gc_runtimes(options.gc_runtimes)
        .build(logger)?;
    let inspector = HostInspector::new("/");
    let composer = Composer::new(&runtime);
    let mut args = ExecutionArgs::new();

    args.add_arg(BWRAP_EXECUTABLE);
    args.add_args(&["--proc", "/proc"]);
    args.add_args(&["--dev-bind", "/dev", "/dev"]);

    if !options.share_pid {
        logger.warn("Unsharing the process ID namespace is not supported; continuing with the host's.");
    }

    composer.compose(&mut args, logger)?;

    /*
     * Our own tooling must exist inside the container for the adverb;
     * mounted before anything that lands underneath it.
     */
    let tools_dir = executable_dir()?;

    args.robind(&tools_dir, TOOLS_MOUNT);

    let mut ldso = None;

    if options.host_graphics {
        let capture = CaptureOptions {
            bwrap: &bwrap,
            verbose: logger.verbose(),
        };
        let summary = capture_graphics(&runtime, &inspector, &mut args, &capture, logger)?;

        ldso = prepare_ldso_dir(&runtime, &summary, &mut args)?;
    }

    desktop::apply(&mut args, logger);

    /* The overrides tree is complete; only now may it be mounted. */
    composer.mount_overrides(&mut args);

    let app_id = steam::freedesktop_app_id(options.freedesktop_app_id.as_deref(), options.steam_app_id.as_deref());
    let mode = home::plan(options.share_home, options.home.as_deref(), app_id.as_deref())?;

    home::apply(&mode, &mut args)?;

    if let Ok(install) = steam::discover() {
        logger.debug(&format!("Using Steam installation at '{}'", install.install_path));
    }

    append_adverb(options, &mut runtime, &mut args, ldso.as_ref())?;
    args.finish();

    if options.verbosity > 2 {
        eprintln!("{:?}", args);
    }

    if options.test || options.only_prepare {
        emit_plan(&args);
        runtime.cleanup();
        return Ok(());
    }

    /* Replaces this process on success. */
    Err(exec_replace(&bwrap, &args, std::env::vars().collect()))
}

fn prepare_ldso_dir(
    runtime: &Runtime,
    summary: &gamewrap_core::runtime::capture::GraphicsSummary,
    args: &mut ExecutionArgs,
) -> Result<Option<LdsoPlan>> {
    let dir = format!("{}/ldso", runtime.scratch());

    std::fs::create_dir_all(&dir).prepend_io(|| dir.clone())?;

    let mut conf = String::new();
    let mut override_dirs = Vec::new();

    for abi in &summary.abis {
        override_dirs.push(format!("/overrides/lib/{}", abi.tuple));
        conf.push_str(&format!("/usr/lib/{}\n", abi.tuple));
        conf.push_str(&format!("/usr/{}\n", abi.libqual));
    }

    conf.push_str("/usr/lib\n");

    let seed = format!("{}/runtime-ld.so.conf", dir);

    std::fs::write(&seed, conf).prepend_io(|| seed.clone())?;

    /* ldconfig writes its staging cache here, so this bind is writable. */
    args.bind(&dir, LDSO_MOUNT);

    Ok(Some(LdsoPlan {
        container_dir: LDSO_MOUNT.into(),
        override_dirs,
    }))
}

/*
 * The in-container command line: the adverb supervises the game, holding
 * the runtime lock it inherits by fd and rewriting the linker environment
 * from inside.
 */
fn append_adverb(options: &WrapOptions, runtime: &mut Runtime, args: &mut ExecutionArgs, ldso: Option<&LdsoPlan>) -> Result<()> {
    args.add_arg(&format!("{}/{}", TOOLS_MOUNT, ADVERB_EXECUTABLE));
    args.add_args(&["--subreaper", "--exit-with-parent"]);

    if options.verbosity > 1 {
        args.add_arg("--verbose");
    }

    if let Some(lock) = runtime.take_lock() {
        let fd = lock.steal_fd();

        args.add_arg(&format!("--fd={}", fd));
        args.add_fd(fd);
    }

    if let Some(plan) = ldso {
        args.add_arg(&format!("--regenerate-ld.so-cache={}", plan.container_dir));

        for dir in &plan.override_dirs {
            args.add_arg(&format!("--add-ld.so-path={}", dir));
        }

        args.add_arg(&format!("--set-ld-library-path={}", plan.override_dirs.join(":")));
    }

    if options.generate_locales {
        args.add_arg("--generate-locales");
    }

    if let Some(shell) = &options.shell {
        args.add_arg(&format!("--shell={}", shell));
    }

    match (&options.terminal, &options.shell) {
        (Some(terminal), _) => args.add_arg(&format!("--terminal={}", terminal)),
        /* A shell with no terminal preference leaves the adverb on auto. */
        (None, Some(_)) => (),
        (None, None) => args.add_arg("--batch"),
    }

    for module in host_preloads(options) {
        args.add_arg(&format!("--ld-preload={}", module));
    }

    args.add_arg("--");
    args.add_args(&options.command.iter().map(|arg| arg.as_str()).collect::<Vec<_>>());
    Ok(())
}

/*
 * Host preload modules cross into the container under /run/host. The
 * Steam overlay is recognisable by basename and may be filtered out; its
 * ABI is tagged from the vendor directory so one entry per ABI collapses
 * into a single ${PLATFORM} reference on the other side.
 */
fn host_preloads(options: &WrapOptions) -> Vec<String> {
    options
        .host_ld_preload
        .iter()
        .filter(|module| !(options.remove_game_overlay && basename(module) == GAME_OVERLAY_BASENAME))
        .map(|module| {
            let in_container = format!("{}{}", HOST_MOUNT, module);

            match gamewrap_core::abi::Abi::from_dir_suffix(gamewrap_core::utils::dirname(module)) {
                Some(abi) => format!("{}:abi={}", in_container, abi.tuple),
                None => in_container,
            }
        })
        .collect()
}

/*
 * No runtime: run the command directly against the host OS, applying only
 * the environment the caller reserved for that case.
 */
fn execute_on_host(options: &WrapOptions, logger: &Logger) -> Result<()> {
    if options.command.is_empty() {
        return Ok(());
    }

    let mut args = ExecutionArgs::new();

    for (name, value) in &options.env_if_host {
        args.set_env(name, value, true);
    }

    for module in &options.host_ld_preload {
        if options.remove_game_overlay && basename(module) == GAME_OVERLAY_BASENAME {
            continue;
        }

        let preload = match args.environ().get("LD_PRELOAD") {
            Some(existing) => format!("{}:{}", existing, module),
            None => module.clone(),
        };

        args.set_env("LD_PRELOAD", &preload, true);
    }

    for arg in &options.command {
        args.add_arg(arg);
    }

    args.finish();
    logger.info("Running on the host OS without a runtime.");

    let program = match resolve_program(&options.command[0]) {
        Some(program) => program,
        None => err!(ErrorKind::ProcessInitFailure(options.command[0].clone().leak(), std::io::ErrorKind::NotFound))?,
    };

    Err(exec_replace(&program, &args, std::env::vars().collect()))
}

/*
 * $BWRAP wins, then PATH, then the copies Flatpak installs for systems
 * without a setuid bwrap, then a sibling of this executable.
 */
fn find_bwrap() -> Result<String> {
    if let Ok(explicit) = var("BWRAP") {
        if Path::new(&explicit).is_file() {
            return Ok(explicit);
        }
    }

    if let Some(on_path) = resolve_program(BWRAP_EXECUTABLE) {
        return Ok(on_path);
    }

    for candidate in ["/usr/libexec/flatpak-bwrap", "/usr/lib/flatpak/flatpak-bwrap"] {
        if Path::new(candidate).is_file() {
            return Ok(candidate.into());
        }
    }

    let sibling = format!("{}/{}", executable_dir()?, BWRAP_EXECUTABLE);

    match Path::new(&sibling).is_file() {
        true => Ok(sibling),
        false => err!(ErrorKind::Unsupported("Unable to locate a bwrap executable.".into())),
    }
}

fn executable_dir() -> Result<String> {
    let exe = read_link("/proc/self/exe").prepend_io(|| "/proc/self/exe".into())?;

    match exe.parent() {
        Some(dir) => Ok(dir.display().to_string()),
        None => err!(ErrorKind::Internal("executable has no parent directory")),
    }
}

/* Machine-readable plan on stdout: one argv element per line, fds after. */
fn emit_plan(args: &ExecutionArgs) {
    for arg in args.args().iter().flatten() {
        println!("{}", arg.to_str().unwrap_or("?"));
    }

    for fd in args.fds() {
        println!("fd {}", fd);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::options::parse;
    use gamewrap_core::utils::Arguments;

    fn options(args: Vec<&'static str>) -> WrapOptions {
        parse(&mut Arguments::from(args).populate()).unwrap()
    }

    #[test]
    fn overlay_filter_and_abi_tagging() {
        let mut opts = options(vec![
            "--host-ld-preload",
            "/home/gamer/.steam/ubuntu12_64/gameoverlayrenderer.so",
            "--host-ld-preload",
            "/usr/lib/x86_64-linux-gnu/libMangoHud.so",
            "--",
            "game.sh",
        ]);

        let preloads = host_preloads(&opts);

        assert_eq!(preloads.len(), 2);
        assert_eq!(
            preloads[0],
            "/run/host/home/gamer/.steam/ubuntu12_64/gameoverlayrenderer.so:abi=x86_64-linux-gnu"
        );
        assert_eq!(preloads[1], "/run/host/usr/lib/x86_64-linux-gnu/libMangoHud.so:abi=x86_64-linux-gnu");

        opts.remove_game_overlay = true;

        let filtered = host_preloads(&opts);

        assert_eq!(filtered.len(), 1);
        assert!(filtered[0].contains("libMangoHud.so"));
    }
}
