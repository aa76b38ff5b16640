//! Writes `<LIB>_FOUND` / `<LIB>_PATH` for the consuming build.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use serde_json::{json, Map, Value};

use crate::provision::result::LibraryExport;
use crate::util::fs::write_string;

/// Output format of the exported variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    /// `KEY=VALUE` lines
    #[default]
    Env,
    /// `set(KEY VALUE)` script for `include()`
    Cmake,
    /// Object keyed by library
    Json,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Env => "env",
            ExportFormat::Cmake => "cmake",
            ExportFormat::Json => "json",
        }
    }

    /// `<install-root>/provision.<ext>`
    pub fn default_path(&self, install_root: &Path) -> PathBuf {
        install_root.join(format!("provision.{}", self.extension()))
    }

    pub fn render(&self, exports: &[LibraryExport]) -> String {
        match self {
            ExportFormat::Env => {
                let mut out = String::new();
                for e in exports {
                    let _ = writeln!(out, "{}={}", e.found_var, on_off(e.found));
                    let _ = writeln!(out, "{}={}", e.path_var, path_value(e));
                }
                out
            }
            ExportFormat::Cmake => {
                let mut out = String::from("# Generated by lyncs-provision\n");
                for e in exports {
                    let _ = writeln!(out, "set({} {})", e.found_var, on_off(e.found));
                    let _ = writeln!(out, "set({} \"{}\")", e.path_var, path_value(e));
                }
                out
            }
            ExportFormat::Json => {
                let mut map = Map::new();
                for e in exports {
                    let mut entry = Map::new();
                    entry.insert("found".to_string(), json!(e.found));
                    entry.insert("path".to_string(), json!(e.path));
                    entry.insert(e.found_var.clone(), json!(on_off(e.found)));
                    entry.insert(e.path_var.clone(), json!(path_value(e)));
                    map.insert(e.library.clone(), Value::Object(entry));
                }
                let mut out = serde_json::to_string_pretty(&Value::Object(map)).unwrap_or_default();
                out.push('\n');
                out
            }
        }
    }

    /// Render and write to `path`.
    pub fn write(&self, exports: &[LibraryExport], path: &Path) -> Result<()> {
        write_string(path, &self.render(exports))
            .with_context(|| format!("failed to export results to {}", path.display()))
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "env" => Ok(ExportFormat::Env),
            "cmake" => Ok(ExportFormat::Cmake),
            "json" => Ok(ExportFormat::Json),
            _ => Err(format!("unknown export format '{}'; expected env, cmake or json", s)),
        }
    }
}

fn on_off(found: bool) -> &'static str {
    if found {
        "ON"
    } else {
        "OFF"
    }
}

fn path_value(e: &LibraryExport) -> String {
    e.path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn exports() -> Vec<LibraryExport> {
        vec![
            LibraryExport {
                library: "lime".to_string(),
                found_var: "LIME_FOUND".to_string(),
                found: true,
                path_var: "LIME_PATH".to_string(),
                path: Some(PathBuf::from("/opt/ext")),
            },
            LibraryExport {
                library: "QUDA".to_string(),
                found_var: "QUDA_FOUND".to_string(),
                found: false,
                path_var: "QUDA_PATH".to_string(),
                path: None,
            },
        ]
    }

    #[test]
    fn test_env_format() {
        assert_eq!(
            ExportFormat::Env.render(&exports()),
            "LIME_FOUND=ON\nLIME_PATH=/opt/ext\nQUDA_FOUND=OFF\nQUDA_PATH=\n"
        );
    }

    #[test]
    fn test_cmake_format() {
        let out = ExportFormat::Cmake.render(&exports());
        assert!(out.contains("set(LIME_FOUND ON)\n"));
        assert!(out.contains("set(LIME_PATH \"/opt/ext\")\n"));
        assert!(out.contains("set(QUDA_FOUND OFF)\n"));
    }

    #[test]
    fn test_json_format() {
        let out = ExportFormat::Json.render(&exports());
        let value: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["lime"]["found"], Value::Bool(true));
        assert_eq!(value["lime"]["LIME_PATH"], "/opt/ext");
        assert_eq!(value["QUDA"]["path"], Value::Null);
    }

    #[test]
    fn test_write_default_path() {
        let tmp = TempDir::new().unwrap();
        let path = ExportFormat::Cmake.default_path(tmp.path());
        assert_eq!(path, tmp.path().join("provision.cmake"));
        ExportFormat::Cmake.write(&exports(), &path).unwrap();
        assert!(std::fs::read_to_string(path).unwrap().contains("LIME_FOUND"));
    }

    #[test]
    fn test_parse() {
        assert_eq!("json".parse::<ExportFormat>(), Ok(ExportFormat::Json));
        assert!("yaml".parse::<ExportFormat>().is_err());
    }
}
