//! Installed-package bookkeeping and missing-import detection
//!
//! The registry is a small JSON file of `{name, date, time}` records. Older
//! files stored a bare list of names; those are migrated on load.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::Context;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::protocol::FileMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub name: String,
    /// DD/MM/YYYY
    pub date: String,
    /// HH:MM
    pub time: String,
}

impl PackageRecord {
    pub fn now(name: impl Into<String>) -> Self {
        let now = chrono::Local::now();
        Self {
            name: name.into(),
            date: now.format("%d/%m/%Y").to_string(),
            time: now.format("%H:%M").to_string(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredEntry {
    Record(PackageRecord),
    Name(String),
}

#[derive(Debug, Clone, Default)]
pub struct PackageRegistry {
    path: Option<PathBuf>,
    records: Vec<PackageRecord>,
}

impl PackageRegistry {
    /// Registry that is never written to disk
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load from `path`. A missing file is an empty registry; an unreadable
    /// one is logged and treated as empty.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = match fs::read_to_string(&path) {
            Ok(raw) => match parse_records(&raw) {
                Ok((records, migrated)) => {
                    if migrated {
                        info!(path = %path.display(), count = records.len(), "Migrated package list to record format");
                    }
                    records
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Package registry unreadable, starting empty");
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read package registry");
                Vec::new()
            }
        };
        Self {
            path: Some(path),
            records,
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.records.iter().map(|r| r.name.clone()).collect()
    }

    pub fn records(&self) -> &[PackageRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.iter().any(|r| r.name == name)
    }

    /// Remember a package. Returns false if it was already known.
    pub fn record(&mut self, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() || self.contains(name) {
            return false;
        }
        self.records.push(PackageRecord::now(name));
        debug!(package = name, "Package recorded");
        true
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(&self.records)?;
        fs::write(path, json).with_context(|| format!("writing {}", path.display()))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

fn parse_records(raw: &str) -> Result<(Vec<PackageRecord>, bool), serde_json::Error> {
    let entries: Vec<StoredEntry> = serde_json::from_str(raw)?;
    let mut migrated = false;
    let records = entries
        .into_iter()
        .map(|entry| match entry {
            StoredEntry::Record(record) => record,
            StoredEntry::Name(name) => {
                migrated = true;
                PackageRecord::now(name)
            }
        })
        .collect();
    Ok((records, migrated))
}

static IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:import|from)\s+([a-zA-Z0-9_]+)").expect("Invalid import regex")
});

const STD_LIBS: &[&str] = &[
    "abc", "aifc", "argparse", "array", "ast", "asyncio", "atexit", "audioop",
    "base64", "bdb", "binascii", "bisect", "builtins", "bz2", "calendar", "cgi",
    "cgitb", "chunk", "cmath", "cmd", "code", "codecs", "codeop", "collections",
    "colorsys", "compileall", "concurrent", "configparser", "contextlib", "contextvars",
    "copy", "copyreg", "cProfile", "crypt", "csv", "ctypes", "curses", "dataclasses",
    "datetime", "dbm", "decimal", "difflib", "dis", "distutils", "doctest", "email",
    "encodings", "ensurepip", "enum", "errno", "faulthandler", "fcntl", "filecmp",
    "fileinput", "fnmatch", "formatter", "fractions", "ftplib", "functools", "gc",
    "getopt", "getpass", "gettext", "glob", "graphlib", "grp", "gzip", "hashlib",
    "heapq", "hmac", "html", "http", "imaplib", "imghdr", "imp", "importlib",
    "inspect", "io", "ipaddress", "itertools", "json", "keyword", "lib2to3",
    "linecache", "locale", "logging", "lzma", "mailbox", "mailcap", "marshal",
    "math", "mimetypes", "mmap", "modulefinder", "msilib", "msvcrt", "multiprocessing",
    "netrc", "nis", "nntplib", "numbers", "operator", "optparse", "os", "ossaudiodev",
    "parser", "pathlib", "pdb", "pickle", "pickletools", "pipes", "pkgutil", "platform",
    "plistlib", "poplib", "posix", "pprint", "profile", "pstats", "pty", "pwd",
    "py_compile", "pyclbr", "pydoc", "queue", "quopri", "random", "re", "readline",
    "reprlib", "resource", "rlcompleter", "runpy", "sched", "secrets", "select",
    "selectors", "shelve", "shlex", "shutil", "signal", "site", "smtpd", "smtplib",
    "sndhdr", "socket", "socketserver", "spwd", "sqlite3", "ssl", "stat", "statistics",
    "string", "stringprep", "struct", "subprocess", "sunau", "symbol", "symtable",
    "sys", "sysconfig", "syslog", "tabnanny", "tarfile", "telnetlib", "tempfile",
    "termios", "test", "textwrap", "threading", "time", "timeit", "tkinter", "token",
    "tokenize", "trace", "traceback", "tracemalloc", "tty", "turtle", "turtledemo",
    "types", "typing", "unicodedata", "unittest", "urllib", "uu", "uuid", "venv",
    "warnings", "wave", "weakref", "webbrowser", "winreg", "winsound", "wsgiref",
    "xdrlib", "xml", "xmlrpc", "zipapp", "zipfile", "zipimport", "zlib", "zoneinfo",
];

/// Import name → distribution name, where they differ
const PACKAGE_OVERRIDES: &[(&str, &str)] = &[
    ("PIL", "pillow"),
    ("sklearn", "scikit-learn"),
    ("bs4", "beautifulsoup4"),
    ("cv2", "opencv-python"),
    ("yaml", "pyyaml"),
    ("dateutil", "python-dateutil"),
];

fn distribution_name(module: &str) -> &str {
    PACKAGE_OVERRIDES
        .iter()
        .find(|(import, _)| *import == module)
        .map(|(_, dist)| *dist)
        .unwrap_or(module)
}

/// Third-party packages `source` imports that are neither in the standard
/// library, a local `<name>.py` file, nor `installed`. Order of first use.
pub fn detect_missing_packages(source: &str, files: &FileMap, installed: &[String]) -> Vec<String> {
    let installed: HashSet<&str> = installed.iter().map(String::as_str).collect();
    let local_modules: BTreeSet<&str> = files
        .keys()
        .filter_map(|path| path.rsplit('/').next())
        .filter_map(|name| name.strip_suffix(".py"))
        .collect();

    let mut missing: Vec<String> = Vec::new();
    for captures in IMPORT_RE.captures_iter(source) {
        let module = &captures[1];
        if STD_LIBS.contains(&module) || local_modules.contains(module) {
            continue;
        }
        let dist = distribution_name(module);
        if installed.contains(dist) || missing.iter().any(|m| m == dist) {
            continue;
        }
        missing.push(dist.to_string());
    }
    missing
}
