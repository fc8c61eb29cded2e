use std::path::{Path, PathBuf};

use crate::logging::LogSink;

/// Classification of a single trimmed line of `ldd` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LddLine {
    /// A dependency entry. `path` is empty when the linker reported the
    /// library as `not found`; the resolver then probes extra search dirs.
    Dependency { soname: String, path: String },
    /// Anything the dependency walk cannot use (empty lines, the statically
    /// linked note, entries without a load address).
    Skip,
}

pub fn parse_ldd_line(line: &str) -> LddLine {
    let line = line.trim();
    if line.is_empty() {
        return LddLine::Skip;
    }

    let Some((left, right)) = line.split_once(" => ") else {
        return LddLine::Skip;
    };

    let soname = left.trim().to_string();
    let right = right.trim();

    if right == "not found" {
        return LddLine::Dependency {
            soname,
            path: String::new(),
        };
    }

    // The usable portion ends where the load address starts:
    //   libfoo.so.1 => /usr/lib/libfoo.so.1 (0x00007fff...)
    let Some(addr) = right.rfind("(0x") else {
        return LddLine::Skip;
    };

    LddLine::Dependency {
        soname,
        path: right[..addr].trim().to_string(),
    }
}

/// Resolves bare sonames against user-supplied extra library directories.
pub struct LibraryResolver {
    extra_dirs: Vec<PathBuf>,
}

impl LibraryResolver {
    pub fn new() -> Self {
        Self {
            extra_dirs: Vec::new(),
        }
    }

    /// Register an extra search directory. Relative paths are resolved
    /// against the working directory first, then against the target
    /// executable's directory; directories that do not exist are dropped.
    pub fn add_search_dir(&mut self, raw: &str, exe_dir: &Path, sink: &dyn LogSink) {
        let raw = raw.trim();
        if raw.is_empty() {
            return;
        }

        let mut candidate = PathBuf::from(raw);
        if !candidate.is_absolute() {
            let cwd_based = std::env::current_dir()
                .map(|cwd| cwd.join(raw))
                .unwrap_or_else(|_| candidate.clone());
            candidate = if cwd_based.exists() {
                cwd_based
            } else {
                exe_dir.join(raw)
            };
        }

        if !candidate.exists() {
            sink.line(&format!(
                "warning: dropping library search dir {raw}: not found"
            ));
            return;
        }

        sink.line(&format!(
            "added library search dir {}",
            candidate.display()
        ));
        self.extra_dirs.push(candidate);
    }

    /// First registered directory containing a file named exactly `soname`
    /// wins; otherwise the bare soname is returned and the copy stage will
    /// report the failure.
    pub fn resolve(&self, soname: &str) -> PathBuf {
        for dir in &self.extra_dirs {
            let candidate = dir.join(soname);
            if candidate.exists() {
                return candidate;
            }
        }
        PathBuf::from(soname)
    }
}

impl Default for LibraryResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::NullSink;

    fn dep(soname: &str, path: &str) -> LddLine {
        LddLine::Dependency {
            soname: soname.to_string(),
            path: path.to_string(),
        }
    }

    #[test]
    fn parses_resolved_dependency() {
        assert_eq!(
            parse_ldd_line("libfoo.so.1 => /usr/lib/libfoo.so.1 (0x00007fff)"),
            dep("libfoo.so.1", "/usr/lib/libfoo.so.1")
        );
    }

    #[test]
    fn parses_not_found_as_empty_path() {
        assert_eq!(parse_ldd_line("libnix.so => not found"), dep("libnix.so", ""));
    }

    #[test]
    fn vdso_line_keeps_soname_with_empty_path() {
        // The scheduler later drops this via the vdso predicate.
        assert_eq!(
            parse_ldd_line("\tlinux-vdso.so.1 => (0x00007ffd)"),
            dep("linux-vdso.so.1", "")
        );
    }

    #[test]
    fn skips_lines_without_arrow() {
        assert_eq!(parse_ldd_line("/lib64/ld-linux-x86-64.so.2 (0x0000)"), LddLine::Skip);
        assert_eq!(parse_ldd_line("statically linked"), LddLine::Skip);
    }

    #[test]
    fn skips_empty_and_unusable_lines() {
        assert_eq!(parse_ldd_line(""), LddLine::Skip);
        assert_eq!(parse_ldd_line("   "), LddLine::Skip);
        assert_eq!(parse_ldd_line("libfoo.so => garbage without address"), LddLine::Skip);
    }

    #[test]
    fn resolver_prefers_first_matching_dir() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let first = tmp.path().join("first");
        let second = tmp.path().join("second");
        std::fs::create_dir_all(&first).expect("mkdir first");
        std::fs::create_dir_all(&second).expect("mkdir second");
        std::fs::write(second.join("liba.so"), b"x").expect("write second/liba");

        let mut resolver = LibraryResolver::new();
        resolver.add_search_dir(first.to_str().expect("utf8"), tmp.path(), &NullSink);
        resolver.add_search_dir(second.to_str().expect("utf8"), tmp.path(), &NullSink);

        assert_eq!(resolver.resolve("liba.so"), second.join("liba.so"));

        std::fs::write(first.join("liba.so"), b"x").expect("write first/liba");
        assert_eq!(resolver.resolve("liba.so"), first.join("liba.so"));
    }

    #[test]
    fn resolver_falls_back_to_bare_soname() {
        let resolver = LibraryResolver::new();
        assert_eq!(resolver.resolve("libmissing.so.9"), PathBuf::from("libmissing.so.9"));
    }

    #[test]
    fn nonexistent_search_dirs_are_dropped() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut resolver = LibraryResolver::new();
        resolver.add_search_dir("no-such-dir-anywhere", tmp.path(), &NullSink);
        assert_eq!(resolver.resolve("libx.so"), PathBuf::from("libx.so"));
    }
}
