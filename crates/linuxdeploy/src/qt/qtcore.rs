use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::logging::LogSink;

// Hardcoded build-prefix paths embedded in libQt5Core as null-terminated
// key=value strings, and their bundle-relative replacements.
const QT_PATH_VARIABLES: &[(&str, &str)] = &[
    ("qt_prfxpath=", "."),
    ("qt_adatpath=", "."),
    ("qt_docspath=", "doc"),
    ("qt_hdrspath=", "include"),
    ("qt_libspath=", "lib"),
    ("qt_lbexpath=", "libexec"),
    ("qt_binspath=", "bin"),
    ("qt_plugpath=", "plugins"),
    ("qt_impspath=", "imports"),
    ("qt_qml2path=", "qml"),
    ("qt_datapath=", "."),
    ("qt_trnspath=", "translations"),
    ("qt_xmplpath=", "examples"),
    ("qt_demopath=", "demos"),
    ("qt_tstspath=", "tests"),
    ("qt_hpfxpath=", "."),
    ("qt_hbinpath=", "bin"),
    ("qt_hdatpath=", "."),
    ("qt_stngpath=", "."),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceOutcome {
    Replaced,
    KeyNotFound,
    TerminatorNotFound,
    ValueTooShort,
}

/// Rewrite the embedded path table of an already-deployed libQt5Core so it
/// resolves relative to the bundle root. The file size never changes.
pub fn patch_qtcore(path: &Path, sink: &dyn LogSink) -> Result<()> {
    let metadata = fs::metadata(path)
        .map_err(|e| Error::msg(format!("failed to stat {}: {e}", path.display())))?;
    let mut contents = fs::read(path)
        .map_err(|e| Error::msg(format!("failed to read {}: {e}", path.display())))?;

    for (key, replacement) in QT_PATH_VARIABLES {
        match replace_path_variable(&mut contents, key.as_bytes(), replacement.as_bytes()) {
            ReplaceOutcome::Replaced => {}
            ReplaceOutcome::KeyNotFound => {
                sink.line(&format!("{key} not present in {}", path.display()));
            }
            ReplaceOutcome::TerminatorNotFound => {
                sink.line(&format!(
                    "warning: no terminator after {key} in {}",
                    path.display()
                ));
            }
            ReplaceOutcome::ValueTooShort => {
                sink.line(&format!(
                    "warning: value of {key} too short for replacement in {}",
                    path.display()
                ));
            }
        }
    }

    fs::write(path, &contents)
        .map_err(|e| Error::msg(format!("failed to write {}: {e}", path.display())))?;
    fs::set_permissions(path, metadata.permissions())
        .map_err(|e| Error::msg(format!("failed to restore mode on {}: {e}", path.display())))?;
    Ok(())
}

/// Overwrite the null-terminated value following the first occurrence of
/// `varname`, padding with NULs. The buffer length is never changed and a
/// value region shorter than the replacement is left untouched.
pub fn replace_path_variable(
    buffer: &mut [u8],
    varname: &[u8],
    replacement: &[u8],
) -> ReplaceOutcome {
    let Some(start) = find_subslice(buffer, varname) else {
        return ReplaceOutcome::KeyNotFound;
    };

    let value_start = start + varname.len();
    let Some(len) = buffer[value_start..].iter().position(|&b| b == 0) else {
        return ReplaceOutcome::TerminatorNotFound;
    };
    if len < replacement.len() {
        return ReplaceOutcome::ValueTooShort;
    }

    let value_end = value_start + len;
    buffer[value_start..value_start + replacement.len()].copy_from_slice(replacement);
    for byte in &mut buffer[value_start + replacement.len()..value_end] {
        *byte = 0;
    }
    ReplaceOutcome::Replaced
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
