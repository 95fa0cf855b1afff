//! Version tokens and requirement predicates.
//!
//! A [`Version`] is a dotted list of segments. Numeric segments compare
//! numerically, alphabetic segments mark a prerelease and sort below any
//! numeric segment at the same position, and trailing zeros are
//! insignificant (`1.0 == 1`).
//!
//! A [`Requirement`] is a conjunction of `(op, version)` constraints such as
//! `>= 1.2, < 2` or the pessimistic `~> 1.2`.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while parsing versions and requirements.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    /// The string is not a well-formed version token.
    #[error("Malformed version number string: {0:?}")]
    Malformed(String),

    /// The string is not a well-formed requirement.
    #[error("Illformed requirement: {0:?}")]
    Requirement(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Segment {
    Num(u64),
    Str(String),
}

impl Segment {
    fn compare(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Num(a), Self::Num(b)) => a.cmp(b),
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            // Prerelease markers sort below releases.
            (Self::Num(_), Self::Str(_)) => Ordering::Greater,
            (Self::Str(_), Self::Num(_)) => Ordering::Less,
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Num(n) => write!(f, "{n}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

/// A comparable version token (e.g. `2`, `1.4.6`, `3.0.pre1`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    raw: String,
    segments: Vec<Segment>,
}

impl Version {
    /// Parse a version string.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError::Malformed`] if the string is empty, does not
    /// start with a digit, or contains characters other than ASCII
    /// alphanumerics, `.` and `-`.
    pub fn new(s: &str) -> Result<Self, VersionError> {
        let raw = s.trim();
        let malformed = || VersionError::Malformed(s.to_string());

        if !raw.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(malformed());
        }
        if raw
            .chars()
            .any(|c| !(c.is_ascii_alphanumeric() || c == '.' || c == '-'))
        {
            return Err(malformed());
        }

        let mut segments = Vec::new();
        for (i, part) in raw.split('-').enumerate() {
            if i > 0 {
                segments.push(Segment::Str("pre".to_string()));
            }
            for piece in part.split('.') {
                if piece.is_empty() {
                    return Err(malformed());
                }
                segments.extend(split_runs(piece).map_err(|()| malformed())?);
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// The version `0`, lower bound of every default requirement.
    pub fn zero() -> Self {
        Self {
            raw: "0".to_string(),
            segments: vec![Segment::Num(0)],
        }
    }

    /// Return the version string as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether any segment is alphabetic.
    pub fn is_prerelease(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::Str(_)))
    }

    /// The release portion: every segment before the first alphabetic one.
    pub fn release(&self) -> Self {
        if !self.is_prerelease() {
            return self.clone();
        }
        let segments: Vec<Segment> = self
            .segments
            .iter()
            .take_while(|s| matches!(s, Segment::Num(_)))
            .cloned()
            .collect();
        Self::from_segments(segments)
    }

    /// The exclusive upper bound used by `~>`: drop prerelease segments and
    /// the last release segment, then increment what remains.
    ///
    /// `1.2.3` bumps to `1.3`, `1.2` bumps to `2`, `5` bumps to `6`.
    pub fn bump(&self) -> Self {
        let mut segments: Vec<Segment> = self
            .segments
            .iter()
            .take_while(|s| matches!(s, Segment::Num(_)))
            .cloned()
            .collect();
        if segments.len() > 1 {
            segments.pop();
        }
        match segments.last_mut() {
            Some(Segment::Num(n)) if *n < u64::MAX => *n += 1,
            // Nothing numeric to increment, or it is already at the limit.
            _ => segments.push(Segment::Num(1)),
        }
        Self::from_segments(segments)
    }

    fn from_segments(segments: Vec<Segment>) -> Self {
        let raw = segments
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(".");
        Self { raw, segments }
    }

    fn canonical(&self) -> &[Segment] {
        let mut end = self.segments.len();
        while end > 1 && self.segments[end - 1] == Segment::Num(0) {
            end -= 1;
        }
        &self.segments[..end]
    }
}

/// Split `"10rc2"` into `[10, "rc", 2]`.
fn split_runs(piece: &str) -> Result<Vec<Segment>, ()> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut numeric = None;

    for c in piece.chars() {
        let is_digit = c.is_ascii_digit();
        if numeric.is_some_and(|n| n != is_digit) {
            out.push(make_segment(&current, numeric == Some(true))?);
            current.clear();
        }
        numeric = Some(is_digit);
        current.push(c);
    }
    if !current.is_empty() {
        out.push(make_segment(&current, numeric == Some(true))?);
    }
    Ok(out)
}

fn make_segment(run: &str, numeric: bool) -> Result<Segment, ()> {
    if numeric {
        run.parse().map(Segment::Num).map_err(|_| ())
    } else {
        Ok(Segment::Str(run.to_string()))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b) = (self.canonical(), other.canonical());
        let zero = Segment::Num(0);
        for i in 0..a.len().max(b.len()) {
            let lhs = a.get(i).unwrap_or(&zero);
            let rhs = b.get(i).unwrap_or(&zero);
            match lhs.compare(rhs) {
                Ordering::Equal => {}
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical().hash(state);
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Version {
    type Error = VersionError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(&s)
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.raw
    }
}

impl AsRef<str> for Version {
    fn as_ref(&self) -> &str {
        &self.raw
    }
}

/// Comparison operator of a single requirement constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Op {
    /// `=`
    Eq,
    /// `!=`
    Ne,
    /// `>`
    Gt,
    /// `<`
    Lt,
    /// `>=`
    Ge,
    /// `<=`
    Le,
    /// `~>`: at least this version, below its [`Version::bump`].
    Pessimistic,
}

impl Op {
    // Longest tokens first so `>=` is not read as `>`.
    const TOKENS: [(&'static str, Op); 7] = [
        ("~>", Op::Pessimistic),
        (">=", Op::Ge),
        ("<=", Op::Le),
        ("!=", Op::Ne),
        (">", Op::Gt),
        ("<", Op::Lt),
        ("=", Op::Eq),
    ];

    /// The operator as written in a requirement string.
    pub fn as_str(self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Ne => "!=",
            Op::Gt => ">",
            Op::Lt => "<",
            Op::Ge => ">=",
            Op::Le => "<=",
            Op::Pessimistic => "~>",
        }
    }

    fn matches(self, version: &Version, bound: &Version) -> bool {
        match self {
            Op::Eq => version == bound,
            Op::Ne => version != bound,
            Op::Gt => version > bound,
            Op::Lt => version < bound,
            Op::Ge => version >= bound,
            Op::Le => version <= bound,
            Op::Pessimistic => version >= bound && version.release() < bound.bump(),
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A version-range predicate: every constraint must hold.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Requirement {
    constraints: Vec<(Op, Version)>,
}

impl Requirement {
    /// Parse a requirement such as `"> 5"`, `">= 1.0, < 2"` or `"1.4.6"`
    /// (a bare version means `=`).
    ///
    /// # Errors
    ///
    /// Returns [`VersionError::Requirement`] for an empty constraint and
    /// [`VersionError::Malformed`] for a bad version inside a constraint.
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let mut constraints = Vec::new();
        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() {
                return Err(VersionError::Requirement(s.to_string()));
            }
            let (op, rest) = Op::TOKENS
                .iter()
                .find_map(|(token, op)| part.strip_prefix(token).map(|rest| (*op, rest)))
                .unwrap_or((Op::Eq, part));
            constraints.push((op, Version::new(rest.trim())?));
        }
        Ok(Self { constraints })
    }

    /// A requirement matching exactly `version`.
    pub fn exact(version: Version) -> Self {
        Self {
            constraints: vec![(Op::Eq, version)],
        }
    }

    /// Whether `version` satisfies every constraint.
    pub fn is_satisfied_by(&self, version: &Version) -> bool {
        self.constraints
            .iter()
            .all(|(op, bound)| op.matches(version, bound))
    }

    /// Whether this is the catch-all `>= 0`.
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    /// The individual constraints.
    pub fn constraints(&self) -> &[(Op, Version)] {
        &self.constraints
    }
}

impl Default for Requirement {
    fn default() -> Self {
        Self {
            constraints: vec![(Op::Ge, Version::zero())],
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (op, version)) in self.constraints.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{op} {version}")?;
        }
        Ok(())
    }
}

impl FromStr for Requirement {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Requirement {
    type Error = VersionError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Requirement> for String {
    fn from(r: Requirement) -> Self {
        r.to_string()
    }
}
