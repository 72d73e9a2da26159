// src/version/mod.rs

//! Package versions and dependency constraints
//!
//! Versions have the form `[epoch:]version[-release]`. The version part is
//! compared as semver when it parses as such, otherwise as dotted numbers.

use crate::error::{Error, Result};
use semver::Version as SemVer;
use std::cmp::Ordering;
use std::fmt;
use strum_macros::{Display, EnumString};

/// A parsed package version
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    pub epoch: u64,
    pub version: String,
    pub release: Option<String>,
}

fn invalid(input: &str, what: &str) -> Error {
    Error::Parse {
        entity: format!("version `{input}`"),
        field: what.to_string(),
    }
}

impl Version {
    /// Parse a version string
    ///
    /// - "1.2.3" → epoch=0, version="1.2.3", release=None
    /// - "2:1.2.3-4" → epoch=2, version="1.2.3", release=Some("4")
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let (epoch_str, rest) = match s.split_once(':') {
            Some((e, r)) => (e, r),
            None => ("0", s),
        };

        let epoch = if epoch_str.is_empty() {
            0
        } else {
            epoch_str.parse::<u64>().map_err(|_| invalid(s, "epoch"))?
        };

        let (version, release) = match rest.split_once('-') {
            Some((v, r)) => (v.to_string(), Some(r.to_string())),
            None => (rest.to_string(), None),
        };

        if version.is_empty() {
            return Err(invalid(s, "version component"));
        }

        Ok(Self {
            epoch,
            version,
            release,
        })
    }

    /// Normalise to semver, padding or truncating to major.minor.patch
    fn to_semver(&self) -> SemVer {
        if let Ok(v) = SemVer::parse(&self.version) {
            return v;
        }

        let parts: Vec<&str> = self.version.split('.').collect();
        let num = |i: usize| {
            parts
                .get(i)
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(0)
        };
        SemVer::new(num(0), num(1), num(2))
    }

    pub fn compare(&self, other: &Version) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| self.to_semver().cmp(&other.to_semver()))
            // Parts beyond major.minor.patch
            .then_with(|| compare_dotted(&self.version, &other.version))
            .then_with(|| self.release.cmp(&other.release))
    }
}

/// Numeric-aware comparison of dotted version strings beyond the third part
fn compare_dotted(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (Some(l), None) if is_zero(l) => continue,
            (None, Some(r)) if is_zero(r) => continue,
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            (Some(l), Some(r)) => {
                let ord = match (l.parse::<u64>(), r.parse::<u64>()) {
                    (Ok(l), Ok(r)) => l.cmp(&r),
                    _ => l.cmp(r),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

fn is_zero(part: &str) -> bool {
    part.trim_matches('0').is_empty()
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch > 0 {
            write!(f, "{}:", self.epoch)?;
        }
        write!(f, "{}", self.version)?;
        if let Some(ref release) = self.release {
            write!(f, "-{}", release)?;
        }
        Ok(())
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Comparison operator of one constraint clause
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum Op {
    #[strum(serialize = ">=")]
    AtLeast,
    #[strum(serialize = "<=")]
    AtMost,
    #[strum(serialize = "!=")]
    Not,
    #[strum(serialize = ">")]
    Above,
    #[strum(serialize = "<")]
    Below,
    #[strum(serialize = "=")]
    Exactly,
}

impl Op {
    fn holds(self, ordering: Ordering) -> bool {
        match self {
            Op::AtLeast => ordering != Ordering::Less,
            Op::AtMost => ordering != Ordering::Greater,
            Op::Not => ordering != Ordering::Equal,
            Op::Above => ordering == Ordering::Greater,
            Op::Below => ordering == Ordering::Less,
            Op::Exactly => ordering == Ordering::Equal,
        }
    }
}

/// Dependency constraint: comma-separated clauses that must all hold
///
/// `">= 1.0, < 2.0"`; a bare version means `=`; empty or `*` accepts
/// anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionConstraint {
    clauses: Vec<(Op, Version)>,
}

impl VersionConstraint {
    /// Accepts every version
    pub fn any() -> Self {
        Self::default()
    }

    pub fn is_any(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || s == "*" {
            return Ok(Self::any());
        }

        let clauses = s
            .split(',')
            .map(|clause| {
                let clause = clause.trim();
                let split = clause
                    .find(|c: char| !matches!(c, '<' | '>' | '=' | '!'))
                    .unwrap_or(clause.len());
                let (op, version) = clause.split_at(split);
                let op = match op {
                    "" => Op::Exactly,
                    op => op
                        .parse::<Op>()
                        .map_err(|_| invalid(clause, "constraint operator"))?,
                };
                Ok((op, Version::parse(version)?))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { clauses })
    }

    pub fn satisfies(&self, version: &Version) -> bool {
        self.clauses
            .iter()
            .all(|(op, bound)| op.holds(version.compare(bound)))
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.clauses.is_empty() {
            return write!(f, "*");
        }
        for (i, (op, version)) in self.clauses.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{op} {version}")?;
        }
        Ok(())
    }
}
