use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::logging::LogSink;

// Low-level ABI libraries that must come from the host system, not the
// bundle. Matching is by lowercase basename prefix.
const DEFAULT_BLACKLIST: &[&str] = &[
    "libcom_err.so",
    "libcrypt.so",
    "libdl.so",
    "libexpat.so",
    "libfontconfig.so",
    "libgcc_s.so",
    "libglib-2.0.so",
    "libgpg-error.so",
    "libgssapi_krb5.so",
    "libgssapi.so",
    "libhcrypto.so",
    "libheimbase.so",
    "libheimntlm.so",
    "libhx509.so",
    "libice.so",
    "libidn.so",
    "libk5crypto.so",
    "libkeyutils.so",
    "libkrb5.so",
    "libkrb5support.so",
    "libm.so",
    "libp11-kit.so",
    "libpcre.so",
    "libpthread.so",
    "libresolv.so",
    "libroken.so",
    "librt.so",
    "libsasl2.so",
    "libsm.so",
    "libusb-1.0.so",
    "libuuid.so",
    "libwind.so",
    "libz.so",
    "libstdc",
    "libgobject",
    "libc.so",
    "libdbus-1.so",
    "libgl.so",
    "libdrm.so",
];

pub fn default_blacklist() -> Vec<String> {
    DEFAULT_BLACKLIST.iter().map(|s| s.to_string()).collect()
}

/// Parse a user blacklist file: one lowercase prefix per line, `#` comments.
pub fn parse_blacklist_file(path: &Path) -> Result<Vec<String>> {
    let contents = fs::read_to_string(path)
        .map_err(|e| Error::msg(format!("failed to read blacklist {}: {e}", path.display())))?;

    let mut blacklist = Vec::new();
    for line in contents.lines() {
        let item = line.trim();
        if item.is_empty() || item.starts_with('#') {
            continue;
        }
        blacklist.push(item.to_lowercase());
    }
    Ok(blacklist)
}

/// Combined blacklist for a run: entries from the user file (when readable)
/// plus the built-in list when requested.
pub fn load_blacklist(
    file: Option<&Path>,
    include_default: bool,
    sink: &dyn LogSink,
) -> Vec<String> {
    let mut blacklist = Vec::new();

    if let Some(path) = file {
        match parse_blacklist_file(path) {
            Ok(mut entries) => {
                sink.line(&format!(
                    "parsed {} blacklisted prefixes from {}",
                    entries.len(),
                    path.display()
                ));
                blacklist.append(&mut entries);
            }
            Err(e) => sink.line(&format!("warning: {e}")),
        }
    }

    if include_default {
        blacklist.extend(default_blacklist());
    }

    blacklist
}

pub fn is_blacklisted(basename: &str, blacklist: &[String]) -> bool {
    let name = basename.to_lowercase();
    blacklist.iter().any(|prefix| name.starts_with(prefix))
}

/// End-of-run sweep: delete every regular file under `lib_dir` whose
/// basename matches a blacklisted prefix.
pub fn remove_blacklisted(lib_dir: &Path, blacklist: &[String], sink: &dyn LogSink) {
    if blacklist.is_empty() {
        sink.line("no libraries blacklisted");
        return;
    }
    if !lib_dir.is_dir() {
        return;
    }

    sink.line("removing blacklisted libraries");
    for entry in walkdir::WalkDir::new(lib_dir) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                sink.line(&format!("warning: blacklist sweep: {e}"));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let basename = entry.file_name().to_string_lossy();
        if is_blacklisted(&basename, blacklist) {
            match fs::remove_file(entry.path()) {
                Ok(()) => sink.line(&format!(
                    "removed blacklisted library {}",
                    entry.path().display()
                )),
                Err(e) => sink.line(&format!(
                    "warning: failed to remove {}: {e}",
                    entry.path().display()
                )),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::NullSink;

    #[test]
    fn matches_prefix_case_insensitively_on_filename() {
        let blacklist = vec!["libstdc".to_string()];
        assert!(is_blacklisted("libstdc++.so.6", &blacklist));
        assert!(is_blacklisted("LIBSTDC++.SO.6", &blacklist));
        assert!(!is_blacklisted("libfoo.so.1", &blacklist));
    }

    #[test]
    fn exact_so_prefixes_do_not_overmatch() {
        let blacklist = vec!["libc.so".to_string()];
        assert!(is_blacklisted("libc.so.6", &blacklist));
        assert!(!is_blacklisted("libcups.so.2", &blacklist));
    }

    #[test]
    fn parses_file_skipping_comments_and_blanks() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("libs.blacklist");
        fs::write(&path, "# comment\nlibFoo.so\n\n  libBar.so  \n").expect("write");

        let parsed = parse_blacklist_file(&path).expect("parse");
        assert_eq!(parsed, vec!["libfoo.so".to_string(), "libbar.so".to_string()]);
    }

    #[test]
    fn sweep_removes_only_matching_files() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let lib = tmp.path().join("lib");
        fs::create_dir_all(&lib).expect("mkdir lib");
        fs::write(lib.join("libstdc++.so.6"), b"x").expect("write stdc++");
        fs::write(lib.join("libfoo.so.1"), b"x").expect("write foo");

        remove_blacklisted(&lib, &default_blacklist(), &NullSink);

        assert!(!lib.join("libstdc++.so.6").exists());
        assert!(lib.join("libfoo.so.1").exists());
    }

    #[test]
    fn empty_blacklist_removes_nothing() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let lib = tmp.path().join("lib");
        fs::create_dir_all(&lib).expect("mkdir lib");
        fs::write(lib.join("libc.so.6"), b"x").expect("write libc");

        remove_blacklisted(&lib, &[], &NullSink);
        assert!(lib.join("libc.so.6").exists());
    }
}
