//! Semantic Versioning 2.0.0 range expressions.
//!
//! A range is a disjunction (`||`) of comparator sets; a comparator set is a
//! conjunction of comparators separated by whitespace or commas. Supported
//! forms: `=`, `!=`, `>`, `>=`, `<`, `<=`, wildcards (`x`, `X`, `*`, or
//! missing components), hyphen ranges (`1.2 - 1.4.5`), and the `^` / `~`
//! shorthands. Every form is desugared into plain bound comparators at parse
//! time, so evaluation is a straight scan.

use semver::{BuildMetadata, Prerelease, Version};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid version range '{range}': {reason}")]
pub struct RangeError {
    pub range: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid version '{version}': {reason}")]
pub struct VersionError {
    pub version: String,
    pub reason: String,
}

/// Parse a version leniently: a leading `v` is accepted and missing minor or
/// patch components are filled with zero (`14.1` becomes `14.1.0`).
pub fn parse_version(input: &str) -> Result<Version, VersionError> {
    let trimmed = input.trim();
    let stripped = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);

    if let Ok(v) = Version::parse(stripped) {
        return Ok(v);
    }

    let err = |reason: &str| VersionError {
        version: input.to_owned(),
        reason: reason.to_owned(),
    };

    let split_at = stripped.find(['-', '+']).unwrap_or(stripped.len());
    let (core, rest) = stripped.split_at(split_at);
    let parts: Vec<&str> = core.split('.').collect();
    if parts.is_empty() || parts.len() > 3 || parts.iter().any(|p| p.is_empty()) {
        return Err(err("expected MAJOR[.MINOR[.PATCH]]"));
    }
    let mut numbers = [0_u64; 3];
    for (slot, part) in numbers.iter_mut().zip(&parts) {
        *slot = part
            .parse()
            .map_err(|_| err("version components must be numeric"))?;
    }
    let padded = format!("{}.{}.{}{rest}", numbers[0], numbers[1], numbers[2]);
    Version::parse(&padded).map_err(|e| err(&e.to_string()))
}

/// Precedence ordering per SemVer 2.0.0: build metadata is ignored.
pub fn cmp_precedence(a: &Version, b: &Version) -> Ordering {
    (a.major, a.minor, a.patch)
        .cmp(&(b.major, b.minor, b.patch))
        .then_with(|| a.pre.cmp(&b.pre))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Comparator {
    Cmp(Op, Version),
    /// Excludes `[lower, upper)`; produced by `!=` with a wildcard.
    Exclude { lower: Version, upper: Version },
    /// Matches nothing; produced by `>*` and `<*`.
    Never,
}

impl Comparator {
    fn matches(&self, v: &Version) -> bool {
        match self {
            Comparator::Cmp(op, bound) => {
                let ord = cmp_precedence(v, bound);
                match op {
                    Op::Eq => ord == Ordering::Equal,
                    Op::Ne => ord != Ordering::Equal,
                    Op::Gt => ord == Ordering::Greater,
                    Op::Ge => ord != Ordering::Less,
                    Op::Lt => ord == Ordering::Less,
                    Op::Le => ord != Ordering::Greater,
                }
            }
            Comparator::Exclude { lower, upper } => {
                cmp_precedence(v, lower) == Ordering::Less
                    || cmp_precedence(v, upper) != Ordering::Less
            }
            Comparator::Never => false,
        }
    }

    /// Whether this comparator names a pre-release on the same release tuple
    /// as `v`, which opts `v` into pre-release matching.
    fn admits_prerelease_of(&self, v: &Version) -> bool {
        let bound = match self {
            Comparator::Cmp(_, bound) => bound,
            Comparator::Exclude { lower, .. } => lower,
            Comparator::Never => return false,
        };
        !bound.pre.is_empty()
            && bound.major == v.major
            && bound.minor == v.minor
            && bound.patch == v.patch
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ComparatorSet(Vec<Comparator>);

impl ComparatorSet {
    fn matches(&self, v: &Version) -> bool {
        if !v.pre.is_empty() && !self.0.iter().any(|c| c.admits_prerelease_of(v)) {
            return false;
        }
        self.0.iter().all(|c| c.matches(v))
    }
}

/// A parsed version range. Keeps the original text for display and
/// serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionRange {
    raw: String,
    sets: Vec<ComparatorSet>,
}

impl PartialEq for VersionRange {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for VersionRange {}

impl VersionRange {
    pub fn parse(input: &str) -> Result<Self, RangeError> {
        let err = |reason: String| RangeError {
            range: input.to_owned(),
            reason,
        };

        let mut sets = Vec::new();
        for alternative in input.split("||") {
            let set = parse_set(alternative).map_err(err)?;
            sets.push(set);
        }
        Ok(Self {
            raw: input.trim().to_owned(),
            sets,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.sets.iter().any(|set| set.matches(version))
    }

    /// Highest candidate satisfying the range, or `None` when nothing matches.
    pub fn best_match<'a, I>(&self, candidates: I) -> Option<&'a Version>
    where
        I: IntoIterator<Item = &'a Version>,
    {
        candidates
            .into_iter()
            .filter(|v| self.matches(v))
            .max_by(|a, b| cmp_precedence(a, b).then_with(|| a.cmp(b)))
    }
}

/// Check a single version string against a range string.
pub fn matches(version: &str, range: &str) -> Result<bool, RangeError> {
    let range = VersionRange::parse(range)?;
    let version = parse_version(version).map_err(|e| RangeError {
        range: range.raw.clone(),
        reason: e.to_string(),
    })?;
    Ok(range.matches(&version))
}

impl FromStr for VersionRange {
    type Err = RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for VersionRange {
    type Error = RangeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<VersionRange> for String {
    fn from(value: VersionRange) -> Self {
        value.raw
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// A version as written in a range; `None` components are wildcards.
#[derive(Debug, Clone)]
struct Partial {
    major: Option<u64>,
    minor: Option<u64>,
    patch: Option<u64>,
    pre: Prerelease,
}

impl Partial {
    fn is_full(&self) -> bool {
        self.patch.is_some()
    }

    fn is_any(&self) -> bool {
        self.major.is_none()
    }

    /// Lowest version covered by the partial.
    fn floor(&self) -> Version {
        Version {
            major: self.major.unwrap_or(0),
            minor: self.minor.unwrap_or(0),
            patch: self.patch.unwrap_or(0),
            pre: self.pre.clone(),
            build: BuildMetadata::EMPTY,
        }
    }

    /// First version past everything the partial covers. Only meaningful when
    /// at least the major component is set and the partial is not full.
    fn ceiling(&self) -> Result<Version, String> {
        Ok(match (self.major, self.minor) {
            (Some(major), Some(minor)) => Version::new(major, bump(minor)?, 0),
            (Some(major), None) => Version::new(bump(major)?, 0, 0),
            _ => Version::new(0, 0, 0),
        })
    }
}

fn bump(component: u64) -> Result<u64, String> {
    component
        .checked_add(1)
        .ok_or_else(|| "version component too large".to_owned())
}

fn parse_partial(token: &str) -> Result<Partial, String> {
    let token = token.trim();
    let token = token
        .strip_prefix('v')
        .or_else(|| token.strip_prefix('V'))
        .unwrap_or(token);
    if token.is_empty() {
        return Err("missing version".to_owned());
    }

    // Build metadata never affects matching.
    let token = token.split_once('+').map_or(token, |(core, _)| core);
    let (core, pre) = match token.split_once('-') {
        Some((core, pre)) => (core, Some(pre)),
        None => (token, None),
    };

    let parts: Vec<&str> = core.split('.').collect();
    if parts.len() > 3 {
        return Err(format!("too many version components in '{token}'"));
    }

    let mut values = [None; 3];
    let mut wildcard_seen = false;
    for (slot, part) in values.iter_mut().zip(&parts) {
        if matches!(*part, "x" | "X" | "*") {
            wildcard_seen = true;
            continue;
        }
        if wildcard_seen {
            return Err(format!("numeric component after wildcard in '{token}'"));
        }
        let n: u64 = part
            .parse()
            .map_err(|_| format!("invalid version component '{part}' in '{token}'"))?;
        *slot = Some(n);
    }

    let pre = match pre {
        Some(p) => {
            if values.iter().any(Option::is_none) {
                return Err(format!(
                    "pre-release '{p}' requires a full MAJOR.MINOR.PATCH version"
                ));
            }
            Prerelease::new(p).map_err(|e| format!("invalid pre-release '{p}': {e}"))?
        }
        None => Prerelease::EMPTY,
    };

    Ok(Partial {
        major: values[0],
        minor: values[1],
        patch: values[2],
        pre,
    })
}

const OPERATORS: [&str; 9] = [">=", "<=", "!=", "==", ">", "<", "=", "^", "~"];

fn split_operator(token: &str) -> (&str, &str) {
    for op in OPERATORS {
        if let Some(rest) = token.strip_prefix(op) {
            // `~>` is accepted as an alias of `~`.
            let rest = rest.strip_prefix('>').filter(|_| op == "~").unwrap_or(rest);
            return (op, rest);
        }
    }
    ("", token)
}

fn tokenize(set: &str) -> Vec<String> {
    let raw: Vec<&str> = set
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .collect();

    // Re-attach operators written apart from their version: `>= 1.2`.
    let mut tokens: Vec<String> = Vec::with_capacity(raw.len());
    let mut pending_op: Option<&str> = None;
    for t in raw {
        if let Some(op) = pending_op.take() {
            tokens.push(format!("{op}{t}"));
        } else if OPERATORS.contains(&t) || t == "~>" {
            pending_op = Some(t);
        } else {
            tokens.push(t.to_owned());
        }
    }
    if let Some(op) = pending_op {
        tokens.push(op.to_owned());
    }
    tokens
}

fn parse_set(set: &str) -> Result<ComparatorSet, String> {
    let tokens = tokenize(set);
    if tokens.is_empty() {
        return Err("empty comparator set".to_owned());
    }

    let mut comparators = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        if tokens.get(i + 1).map(String::as_str) == Some("-") {
            let upper = tokens
                .get(i + 2)
                .ok_or_else(|| "hyphen range is missing its upper bound".to_owned())?;
            desugar_hyphen(&tokens[i], upper, &mut comparators)?;
            i += 3;
            continue;
        }
        desugar(&tokens[i], &mut comparators)?;
        i += 1;
    }
    Ok(ComparatorSet(comparators))
}

fn desugar_hyphen(lower: &str, upper: &str, out: &mut Vec<Comparator>) -> Result<(), String> {
    let lo = parse_partial(lower)?;
    let hi = parse_partial(upper)?;
    if !lo.is_any() {
        out.push(Comparator::Cmp(Op::Ge, lo.floor()));
    }
    if hi.is_any() {
        return Ok(());
    }
    if hi.is_full() {
        out.push(Comparator::Cmp(Op::Le, hi.floor()));
    } else {
        out.push(Comparator::Cmp(Op::Lt, hi.ceiling()?));
    }
    Ok(())
}

fn desugar(token: &str, out: &mut Vec<Comparator>) -> Result<(), String> {
    let (op, rest) = split_operator(token);
    let p = parse_partial(rest)?;

    match op {
        "" | "=" | "==" => {
            if p.is_any() {
                // Matches everything.
            } else if p.is_full() {
                out.push(Comparator::Cmp(Op::Eq, p.floor()));
            } else {
                out.push(Comparator::Cmp(Op::Ge, p.floor()));
                out.push(Comparator::Cmp(Op::Lt, p.ceiling()?));
            }
        }
        "!=" => {
            if p.is_any() {
                out.push(Comparator::Never);
            } else if p.is_full() {
                out.push(Comparator::Cmp(Op::Ne, p.floor()));
            } else {
                out.push(Comparator::Exclude {
                    lower: p.floor(),
                    upper: p.ceiling()?,
                });
            }
        }
        ">" => {
            if p.is_any() {
                out.push(Comparator::Never);
            } else if p.is_full() {
                out.push(Comparator::Cmp(Op::Gt, p.floor()));
            } else {
                out.push(Comparator::Cmp(Op::Ge, p.ceiling()?));
            }
        }
        ">=" => {
            if !p.is_any() {
                out.push(Comparator::Cmp(Op::Ge, p.floor()));
            }
        }
        "<" => {
            if p.is_any() {
                out.push(Comparator::Never);
            } else {
                out.push(Comparator::Cmp(Op::Lt, p.floor()));
            }
        }
        "<=" => {
            if p.is_any() {
                // Matches everything.
            } else if p.is_full() {
                out.push(Comparator::Cmp(Op::Le, p.floor()));
            } else {
                out.push(Comparator::Cmp(Op::Lt, p.ceiling()?));
            }
        }
        "~" => {
            if p.is_any() {
                return Ok(());
            }
            out.push(Comparator::Cmp(Op::Ge, p.floor()));
            let major = p.major.unwrap_or(0);
            let upper = match p.minor {
                Some(minor) => Version::new(major, bump(minor)?, 0),
                None => Version::new(bump(major)?, 0, 0),
            };
            out.push(Comparator::Cmp(Op::Lt, upper));
        }
        "^" => {
            if p.is_any() {
                return Ok(());
            }
            out.push(Comparator::Cmp(Op::Ge, p.floor()));
            let major = p.major.unwrap_or(0);
            let upper = match (major, p.minor, p.patch) {
                (0, None, _) => Version::new(1, 0, 0),
                (0, Some(0), None) => Version::new(0, 1, 0),
                (0, Some(0), Some(patch)) => Version::new(0, 0, bump(patch)?),
                (0, Some(minor), _) => Version::new(0, bump(minor)?, 0),
                (major, _, _) => Version::new(bump(major)?, 0, 0),
            };
            out.push(Comparator::Cmp(Op::Lt, upper));
        }
        other => return Err(format!("unsupported operator '{other}'")),
    }
    Ok(())
}
