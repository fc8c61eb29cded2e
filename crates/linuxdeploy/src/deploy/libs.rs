use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::Receiver;

use crate::error::Result;
use crate::ldd::{self, LddLine};
use crate::tools;

use super::request::{DeployFlags, DeployRequest};
use super::{DeployerInner, TaskMsg};

pub(super) fn run_libs_consumer(inner: Arc<DeployerInner>, rx: Receiver<TaskMsg>) {
    while let Ok(msg) = rx.recv() {
        match msg {
            TaskMsg::Deploy(req, token) => {
                process_lib_task(&inner, req);
                drop(token);
            }
            TaskMsg::Shutdown => break,
        }
    }
    inner.log("libraries processing finished");
}

fn process_lib_task(inner: &Arc<DeployerInner>, req: DeployRequest) {
    let libpath = req.full_path();

    if can_skip_library(inner, &libpath) {
        inner.log(&format!("skipping library: {}", libpath.display()));
        return;
    }

    inner.log(&format!("processing library: {}", libpath.display()));

    let dependencies = match ldd_dependencies(inner, &libpath) {
        Ok(deps) => deps,
        Err(e) => {
            inner.log(&format!(
                "warning: dependency check for {} failed: {e}",
                libpath.display()
            ));
            return;
        }
    };

    inner.mark_processed(&libpath);

    let flags = req.flags | DeployFlags::LDD_DEPENDENCY;
    inner.add_copy_task(req.source_root, req.source_path, req.target_path, flags);

    for dep in dependencies {
        if !inner.is_processed(&dep) {
            inner.add_lib_task("", dep, "lib", flags);
        }
    }
}

fn can_skip_library(inner: &DeployerInner, libpath: &Path) -> bool {
    libpath
        .to_string_lossy()
        .starts_with("linux-vdso.so")
        || inner.is_processed(libpath)
}

/// Run ldd on a binary and return its resolved dependency paths. Sonames
/// the linker could not locate go through the extra-dir resolver.
pub(super) fn ldd_dependencies(inner: &Arc<DeployerInner>, path: &Path) -> Result<Vec<PathBuf>> {
    inner.log(&format!("inspecting {}", path.display()));

    let output = tools::run_capture(&inner.ldd_path, [path.as_os_str()])?;
    let mut dependencies = Vec::new();

    for line in output.lines() {
        match ldd::parse_ldd_line(line) {
            LddLine::Dependency { soname, path: libpath } => {
                let resolved = if libpath.is_empty() {
                    let found = inner.resolver.resolve(&soname);
                    inner.log(&format!(
                        "resolved {} to {}",
                        soname,
                        found.display()
                    ));
                    found
                } else {
                    PathBuf::from(libpath)
                };
                dependencies.push(resolved);
            }
            LddLine::Skip => {
                let line = line.trim();
                if !line.is_empty() {
                    inner.log(&format!("skipping ldd line: {line}"));
                }
            }
        }
    }

    Ok(dependencies)
}
