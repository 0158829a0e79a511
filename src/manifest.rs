//! Python dependency manifest parsing and environment verification
//!
//! The Atari bridge embeds a Python interpreter, so the crate ships a
//! `requirements.txt`-style manifest describing the interpreter environment
//! it expects. This module parses that format (one specifier per line,
//! `name[extras]>=version`, `#` comments ignored), serializes it back, and
//! can check the active interpreter against it via `importlib.metadata`.
//!
//! Resolution of conflicts between entries stays with pip; this module only
//! validates the text and compares installed versions against constraints.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

use anyhow::{anyhow, Context, Result};
use pyo3::prelude::*;
use regex::Regex;

/// The manifest bundled with the crate, consumed by `puck doctor`.
pub const BUNDLED_MANIFEST: &str = include_str!("../python/requirements.txt");

/// Version comparison operator in a dependency specifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `>=`
    Ge,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `<`
    Lt,
    /// `~=` (compatible release)
    Compatible,
}

impl Comparator {
    fn as_str(self) -> &'static str {
        match self {
            Comparator::Eq => "==",
            Comparator::Ne => "!=",
            Comparator::Ge => ">=",
            Comparator::Le => "<=",
            Comparator::Gt => ">",
            Comparator::Lt => "<",
            Comparator::Compatible => "~=",
        }
    }

    fn parse(op: &str) -> Option<Self> {
        match op {
            "==" => Some(Comparator::Eq),
            "!=" => Some(Comparator::Ne),
            ">=" => Some(Comparator::Ge),
            "<=" => Some(Comparator::Le),
            ">" => Some(Comparator::Gt),
            "<" => Some(Comparator::Lt),
            "~=" => Some(Comparator::Compatible),
            _ => None,
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single operator-and-version pair, e.g. `>=2.0.0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    /// Comparison operator
    pub op: Comparator,
    /// Version string as written in the manifest
    pub version: String,
}

impl Constraint {
    /// Whether `installed` satisfies this constraint.
    ///
    /// Versions are compared numerically component by component; missing
    /// components count as zero. Pre-release tags are not interpreted.
    pub fn matches(&self, installed: &str) -> bool {
        let ord = compare_versions(installed, &self.version);
        match self.op {
            Comparator::Eq => ord == std::cmp::Ordering::Equal,
            Comparator::Ne => ord != std::cmp::Ordering::Equal,
            Comparator::Ge => ord != std::cmp::Ordering::Less,
            Comparator::Le => ord != std::cmp::Ordering::Greater,
            Comparator::Gt => ord == std::cmp::Ordering::Greater,
            Comparator::Lt => ord == std::cmp::Ordering::Less,
            Comparator::Compatible => {
                // ~=X.Y means >=X.Y within the same X series
                if ord == std::cmp::Ordering::Less {
                    return false;
                }
                let spec: Vec<&str> = self.version.split('.').collect();
                if spec.len() < 2 {
                    return true;
                }
                let prefix = &spec[..spec.len() - 1];
                let inst: Vec<&str> = installed.split('.').collect();
                inst.len() >= prefix.len()
                    && prefix
                        .iter()
                        .zip(&inst)
                        .all(|(a, b)| version_component(a) == version_component(b))
            }
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.op, self.version)
    }
}

/// One dependency specifier line: package name, optional extras, and the
/// version constraints that bound acceptable releases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    /// Package name as written
    pub name: String,
    /// Extras requested in square brackets, e.g. `atari`
    pub extras: Vec<String>,
    /// Version constraints, in declaration order
    pub constraints: Vec<Constraint>,
}

impl Requirement {
    /// Whether `installed` satisfies every constraint of this requirement.
    pub fn matches(&self, installed: &str) -> bool {
        self.constraints.iter().all(|c| c.matches(installed))
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if !self.extras.is_empty() {
            write!(f, "[{}]", self.extras.join(","))?;
        }
        for (i, c) in self.constraints.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

/// A parsed dependency manifest.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    requirements: Vec<Requirement>,
}

fn spec_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<name>[A-Za-z0-9][A-Za-z0-9._-]*)(?:\[(?P<extras>[^\]]+)\])?\s*(?P<rest>.*)$")
            .expect("specifier regex")
    })
}

fn constraint_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<op>==|!=|>=|<=|~=|>|<)\s*(?P<version>[A-Za-z0-9.+*!_-]+)$")
            .expect("constraint regex")
    })
}

impl Manifest {
    /// Parse manifest text. Comment and blank lines are skipped; any other
    /// line must be a valid dependency specifier.
    pub fn parse(text: &str) -> Result<Self> {
        let mut requirements = Vec::new();

        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            // Trailing comments are part of the format too
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }

            requirements.push(
                parse_specifier(line)
                    .ok_or_else(|| anyhow!("line {}: invalid dependency specifier '{raw}'", idx + 1))?,
            );
        }

        Ok(Self { requirements })
    }

    /// Read and parse a manifest file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading manifest {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing manifest {}", path.display()))
    }

    /// Requirements in declaration order.
    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    /// Look up a requirement by package name.
    pub fn get(&self, name: &str) -> Option<&Requirement> {
        self.requirements.iter().find(|r| r.name == name)
    }

    /// The set of declared package names.
    pub fn package_names(&self) -> BTreeSet<&str> {
        self.requirements.iter().map(|r| r.name.as_str()).collect()
    }

    /// Number of requirements.
    pub fn len(&self) -> usize {
        self.requirements.len()
    }

    /// Whether the manifest declares no requirements.
    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }
}

impl fmt::Display for Manifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for r in &self.requirements {
            writeln!(f, "{r}")?;
        }
        Ok(())
    }
}

fn parse_specifier(line: &str) -> Option<Requirement> {
    let caps = spec_line_re().captures(line)?;
    let name = caps.name("name")?.as_str().to_string();

    let extras = caps
        .name("extras")
        .map(|m| {
            m.as_str()
                .split(',')
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let rest = caps.name("rest").map(|m| m.as_str().trim()).unwrap_or("");
    let mut constraints = Vec::new();
    if !rest.is_empty() {
        for part in rest.split(',') {
            let caps = constraint_re().captures(part.trim())?;
            constraints.push(Constraint {
                op: Comparator::parse(caps.name("op")?.as_str())?,
                version: caps.name("version")?.as_str().to_string(),
            });
        }
    }

    Some(Requirement { name, extras, constraints })
}

fn version_component(s: &str) -> u64 {
    // Take the leading digits; "0rc1" compares as 0
    let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

fn compare_versions(a: &str, b: &str) -> std::cmp::Ordering {
    let pa: Vec<u64> = a.split('.').map(version_component).collect();
    let pb: Vec<u64> = b.split('.').map(version_component).collect();
    let len = pa.len().max(pb.len());
    for i in 0..len {
        let ca = pa.get(i).copied().unwrap_or(0);
        let cb = pb.get(i).copied().unwrap_or(0);
        match ca.cmp(&cb) {
            std::cmp::Ordering::Equal => continue,
            other => return other,
        }
    }
    std::cmp::Ordering::Equal
}

/// Result of checking one manifest entry against the active interpreter.
#[derive(Debug, Clone)]
pub struct PackageStatus {
    /// Package name from the manifest
    pub name: String,
    /// Installed version, if the package could be found
    pub installed: Option<String>,
    /// Whether the installed version satisfies the manifest entry
    pub satisfied: bool,
}

/// Check every manifest entry against the embedded Python interpreter.
///
/// Uses `importlib.metadata.version`, so it sees exactly the environment
/// the gymnasium bridge will import from.
pub fn verify_python_env(manifest: &Manifest) -> Result<Vec<PackageStatus>> {
    Python::with_gil(|py| {
        let metadata = py.import_bound("importlib.metadata")?;

        let mut statuses = Vec::with_capacity(manifest.len());
        for req in manifest.requirements() {
            let installed: Option<String> =
                match metadata.call_method1("version", (req.name.as_str(),)) {
                    Ok(v) => Some(v.extract()?),
                    Err(_) => None,
                };
            let satisfied = installed.as_deref().map(|v| req.matches(v)).unwrap_or(false);
            statuses.push(PackageStatus { name: req.name.clone(), installed, satisfied });
        }
        Ok(statuses)
    })
}
