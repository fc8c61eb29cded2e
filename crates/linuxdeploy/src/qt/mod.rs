pub mod fanout;
pub mod qml;
pub mod qtcore;
pub mod translations;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::logging::LogSink;
use crate::tools;

const KNOWN_KEYS: &[&str] = &[
    "QT_INSTALL_PREFIX",
    "QT_INSTALL_ARCHDATA",
    "QT_INSTALL_DATA",
    "QT_INSTALL_HEADERS",
    "QT_INSTALL_LIBS",
    "QT_INSTALL_LIBEXECS",
    "QT_INSTALL_BINS",
    "QT_INSTALL_PLUGINS",
    "QT_INSTALL_IMPORTS",
    "QT_INSTALL_QML",
    "QT_INSTALL_TRANSLATIONS",
    "QT_INSTALL_CONFIGURATION",
    "QT_HOST_PREFIX",
    "QT_HOST_DATA",
    "QT_HOST_BINS",
    "QT_HOST_LIBS",
    "QMAKE_VERSION",
    "QT_VERSION",
];

/// Path table from `qmake -query`. Populated once at startup; immutable for
/// the rest of the run.
pub struct QtEnv {
    vars: BTreeMap<String, String>,
    environment_set: bool,
}

impl QtEnv {
    pub fn unavailable() -> Self {
        Self {
            vars: BTreeMap::new(),
            environment_set: false,
        }
    }

    /// Query the path table. Failure leaves Qt support disabled and is not
    /// fatal to the run.
    pub fn query(qmake: Option<&Path>, sink: &dyn LogSink) -> Self {
        let Some(qmake) = qmake else {
            sink.line("warning: qmake not found; Qt deployment disabled");
            return Self::unavailable();
        };

        sink.line(&format!("querying qmake environment via {}", qmake.display()));
        match Self::query_inner(qmake) {
            Ok(env) => env,
            Err(e) => {
                sink.line(&format!("warning: qmake query failed: {e}"));
                Self::unavailable()
            }
        }
    }

    fn query_inner(qmake: &Path) -> Result<Self> {
        let output = tools::run_capture(qmake, ["-query"])?;
        let env = Self::from_query_output(&output);
        if env.vars.is_empty() {
            return Err(Error::msg("qmake -query produced no recognized keys"));
        }
        Ok(env)
    }

    pub fn from_query_output(output: &str) -> Self {
        let mut vars = BTreeMap::new();
        for line in output.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim();
            if KNOWN_KEYS.contains(&key) {
                vars.insert(key.to_string(), value.trim().to_string());
            }
        }
        Self {
            environment_set: !vars.is_empty(),
            vars,
        }
    }

    pub fn is_set(&self) -> bool {
        self.environment_set
    }

    fn path_of(&self, key: &str) -> PathBuf {
        PathBuf::from(self.vars.get(key).map(String::as_str).unwrap_or(""))
    }

    pub fn bins_path(&self) -> PathBuf {
        self.path_of("QT_INSTALL_BINS")
    }

    pub fn plugins_path(&self) -> PathBuf {
        self.path_of("QT_INSTALL_PLUGINS")
    }

    pub fn libexecs_path(&self) -> PathBuf {
        self.path_of("QT_INSTALL_LIBEXECS")
    }

    pub fn data_path(&self) -> PathBuf {
        self.path_of("QT_INSTALL_DATA")
    }

    pub fn qml_path(&self) -> PathBuf {
        self.path_of("QT_INSTALL_QML")
    }

    pub fn translations_path(&self) -> PathBuf {
        self.path_of("QT_INSTALL_TRANSLATIONS")
    }
}

/// Resolve the qmake binary: explicit hint first, then PATH fallbacks in
/// the order qmake, qmake-qt5, qmake-qt4.
pub fn resolve_qmake(hint: Option<&str>) -> Option<PathBuf> {
    if let Some(hint) = hint.map(str::trim).filter(|s| !s.is_empty()) {
        let candidate = PathBuf::from(hint);
        if candidate.exists() {
            return Some(candidate);
        }
    }

    for name in ["qmake", "qmake-qt5", "qmake-qt4"] {
        if let Some(found) = tools::find_tool(name) {
            return Some(found);
        }
    }
    None
}
