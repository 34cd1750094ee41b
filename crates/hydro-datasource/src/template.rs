//! Path template expansion and reverse matching.
//!
//! Templates turn a [`DataReference`] into concrete backend addresses.
//! Placeholders: `{var}`, `{tile}`, `{yyyy}`, `{mm}`, `{dd}`, `{hh}`,
//! plus free-form tags looked up in the reference, e.g.
//! `data/{var}/{yyyy}/{mm}/{dd}.tif`.

use chrono::{DateTime, Datelike, Duration, Months, TimeZone, Timelike, Utc};
use hydro_common::{DataError, DataResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::backend::BackendKind;
use crate::codec::DataFormat;
use crate::reference::DataReference;

/// Tie-break rule when two candidates are equally distant in time.
///
/// Time-series backfill conventionally prefers the older file, but the
/// rule is configurable rather than hard-coded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    #[default]
    PreferOlder,
    PreferNewer,
}

/// A concrete backend address derived from a reference and a template.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPath {
    /// Which connector variant handles this address
    pub backend: BackendKind,
    /// Backend-specific address (filesystem path, remote path, object key)
    pub address: String,
    /// Expected payload encoding at this address
    pub format: DataFormat,
    /// Timestamp this candidate encodes; None for static datasets
    pub time: Option<DateTime<Utc>>,
}

/// Finest time granularity a pattern encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum TimeUnit {
    Year,
    Month,
    Day,
    Hour,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Literal(String),
    Var,
    Tile,
    Year,
    Month,
    Day,
    Hour,
    Tag(String),
}

/// A naming pattern bound to a backend and a payload format.
#[derive(Debug, Clone)]
pub struct PathTemplate {
    pattern: String,
    tokens: Vec<Token>,
    backend: BackendKind,
    format: DataFormat,
    valid_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

impl PathTemplate {
    /// Parse a pattern. Fails on unbalanced or empty placeholders.
    pub fn new(
        pattern: impl Into<String>,
        backend: BackendKind,
        format: DataFormat,
    ) -> DataResult<Self> {
        let pattern = pattern.into();
        let tokens = parse_tokens(&pattern)?;
        Ok(Self {
            pattern,
            tokens,
            backend,
            format,
            valid_range: None,
        })
    }

    /// Declare the closed time range for which this template holds data.
    pub fn with_valid_range(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.valid_range = Some((start, end));
        self
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn format(&self) -> DataFormat {
        self.format
    }

    /// True when the pattern encodes a timestamp.
    pub fn is_time_indexed(&self) -> bool {
        self.time_unit().is_some()
    }

    /// Expand the template against a reference. Purely functional.
    ///
    /// Fails with a template error when a placeholder has no value in
    /// the reference, or when the reference timestamp falls outside the
    /// declared valid range.
    pub fn resolve(&self, reference: &DataReference) -> DataResult<ResolvedPath> {
        if let (Some((start, end)), Some(t)) = (self.valid_range, reference.time) {
            if t < start || t > end {
                return Err(DataError::Template(format!(
                    "timestamp {} outside valid range [{}, {}] of '{}'",
                    t.format("%Y-%m-%d %H:%M"),
                    start.format("%Y-%m-%d %H:%M"),
                    end.format("%Y-%m-%d %H:%M"),
                    self.pattern
                )));
            }
        }

        let mut address = String::with_capacity(self.pattern.len());
        for token in &self.tokens {
            match token {
                Token::Literal(s) => address.push_str(s),
                Token::Var => address.push_str(&reference.variable),
                Token::Tile => match &reference.tile {
                    Some(tile) => address.push_str(tile),
                    None => {
                        return Err(DataError::Template(format!(
                            "'{}' requires a tile, none in reference {}",
                            self.pattern, reference
                        )))
                    }
                },
                Token::Tag(key) => match reference.tags.get(key) {
                    Some(value) => address.push_str(value),
                    None => {
                        return Err(DataError::Template(format!(
                            "'{}' requires tag '{}', none in reference {}",
                            self.pattern, key, reference
                        )))
                    }
                },
                Token::Year | Token::Month | Token::Day | Token::Hour => {
                    let t = reference.time.ok_or_else(|| {
                        DataError::Template(format!(
                            "'{}' is time-indexed but reference {} has no timestamp",
                            self.pattern, reference
                        ))
                    })?;
                    match token {
                        Token::Year => address.push_str(&format!("{:04}", t.year())),
                        Token::Month => address.push_str(&format!("{:02}", t.month())),
                        Token::Day => address.push_str(&format!("{:02}", t.day())),
                        Token::Hour => address.push_str(&format!("{:02}", t.hour())),
                        _ => unreachable!(),
                    }
                }
            }
        }

        Ok(ResolvedPath {
            backend: self.backend,
            address,
            format: self.format,
            time: reference.time,
        })
    }

    /// Ordered candidates for a nearest-available search.
    ///
    /// The exact timestamp comes first, then shifted candidates ordered
    /// nearest-to-farthest within `tolerance`, equal distances broken by
    /// `tie_break`. Without a tolerance (or for non-time-indexed
    /// templates) this is just the exact resolution.
    pub fn candidates(
        &self,
        reference: &DataReference,
        tolerance: Option<Duration>,
        tie_break: TieBreak,
    ) -> DataResult<Vec<ResolvedPath>> {
        let exact = self.resolve(reference)?;

        let (unit, base, tolerance) = match (self.time_unit(), reference.time, tolerance) {
            (Some(unit), Some(base), Some(tol)) if tol > Duration::zero() => (unit, base, tol),
            _ => return Ok(vec![exact]),
        };

        let max_steps = max_steps_within(unit, tolerance);
        let mut shifted: Vec<(Duration, DateTime<Utc>)> = Vec::new();
        for step in 1..=max_steps {
            for sign in [-1i64, 1] {
                let Some(t) = shift_time(base, sign * step as i64, unit) else {
                    continue;
                };
                let distance = (t - base).abs();
                if distance > tolerance {
                    continue;
                }
                if let Some((start, end)) = self.valid_range {
                    if t < start || t > end {
                        continue;
                    }
                }
                shifted.push((distance, t));
            }
        }
        // Month and year steps have variable length, so equal step counts
        // are not equal distances. Order by the actual distance; the
        // tie-break only decides exact ties.
        shifted.sort_by(|(da, ta), (db, tb)| {
            da.cmp(db).then_with(|| match tie_break {
                TieBreak::PreferOlder => ta.cmp(tb),
                TieBreak::PreferNewer => tb.cmp(ta),
            })
        });

        let mut seen: HashSet<String> = HashSet::new();
        seen.insert(exact.address.clone());
        let mut out = vec![exact];
        for (_, t) in shifted {
            let candidate = self.resolve(&reference.with_time(t))?;
            if seen.insert(candidate.address.clone()) {
                out.push(candidate);
            }
        }

        Ok(out)
    }

    /// Longest pattern prefix containing no placeholders, cut at the last
    /// separator. This is the listing prefix for discovery scans.
    pub fn static_prefix(&self) -> &str {
        let head = match self.pattern.find('{') {
            Some(idx) => &self.pattern[..idx],
            None => &self.pattern,
        };
        match head.rfind('/') {
            Some(idx) => &head[..idx],
            None => "",
        }
    }

    /// Reverse-match a concrete address against the pattern.
    ///
    /// Recovers the encoded timestamp and the captured placeholder values
    /// (keyed "var", "tile" and tag names). Returns None when the address
    /// does not fit the pattern.
    pub fn extract(
        &self,
        address: &str,
    ) -> Option<(Option<DateTime<Utc>>, BTreeMap<String, String>)> {
        let mut pos = 0usize;
        let mut captures: BTreeMap<String, String> = BTreeMap::new();
        let bytes = address.as_bytes();

        for (i, token) in self.tokens.iter().enumerate() {
            match token {
                Token::Literal(lit) => {
                    if !address[pos..].starts_with(lit.as_str()) {
                        return None;
                    }
                    pos += lit.len();
                }
                Token::Year => {
                    let s = take_digits(bytes, pos, 4)?;
                    captures.insert("yyyy".into(), s);
                    pos += 4;
                }
                Token::Month | Token::Day | Token::Hour => {
                    let s = take_digits(bytes, pos, 2)?;
                    let key = match token {
                        Token::Month => "mm",
                        Token::Day => "dd",
                        _ => "hh",
                    };
                    captures.insert(key.into(), s);
                    pos += 2;
                }
                Token::Var | Token::Tile | Token::Tag(_) => {
                    // Variable-width capture: stop at the next literal.
                    let end = match self.tokens.get(i + 1) {
                        Some(Token::Literal(next)) => {
                            pos + address[pos..].find(next.as_str())?
                        }
                        None => address.len(),
                        // Two adjacent variable-width placeholders are
                        // ambiguous; refuse the match.
                        Some(_) => return None,
                    };
                    if end == pos {
                        return None;
                    }
                    let key = match token {
                        Token::Var => "var".to_string(),
                        Token::Tile => "tile".to_string(),
                        Token::Tag(k) => k.clone(),
                        _ => unreachable!(),
                    };
                    captures.insert(key, address[pos..end].to_string());
                    pos = end;
                }
            }
        }

        if pos != address.len() {
            return None;
        }

        let time = match captures.get("yyyy") {
            Some(y) => {
                let year: i32 = y.parse().ok()?;
                let month: u32 = captures.get("mm").map_or(Ok(1), |s| s.parse()).ok()?;
                let day: u32 = captures.get("dd").map_or(Ok(1), |s| s.parse()).ok()?;
                let hour: u32 = captures.get("hh").map_or(Ok(0), |s| s.parse()).ok()?;
                Some(Utc.with_ymd_and_hms(year, month, day, hour, 0, 0).single()?)
            }
            None => None,
        };
        captures.retain(|k, _| !matches!(k.as_str(), "yyyy" | "mm" | "dd" | "hh"));

        Some((time, captures))
    }

    fn time_unit(&self) -> Option<TimeUnit> {
        let mut finest = None;
        for token in &self.tokens {
            let unit = match token {
                Token::Year => TimeUnit::Year,
                Token::Month => TimeUnit::Month,
                Token::Day => TimeUnit::Day,
                Token::Hour => TimeUnit::Hour,
                _ => continue,
            };
            finest = Some(finest.map_or(unit, |f: TimeUnit| f.max(unit)));
        }
        finest
    }
}

fn parse_tokens(pattern: &str) -> DataResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut literal = String::new();
    let mut chars = pattern.char_indices();

    while let Some((_, c)) = chars.next() {
        if c != '{' {
            if c == '}' {
                return Err(DataError::Template(format!(
                    "unbalanced '}}' in pattern '{}'",
                    pattern
                )));
            }
            literal.push(c);
            continue;
        }
        if !literal.is_empty() {
            tokens.push(Token::Literal(std::mem::take(&mut literal)));
        }
        let mut name = String::new();
        let mut closed = false;
        for (_, c) in chars.by_ref() {
            if c == '}' {
                closed = true;
                break;
            }
            name.push(c);
        }
        if !closed {
            return Err(DataError::Template(format!(
                "unterminated placeholder in pattern '{}'",
                pattern
            )));
        }
        let token = match name.as_str() {
            "" => {
                return Err(DataError::Template(format!(
                    "empty placeholder in pattern '{}'",
                    pattern
                )))
            }
            "var" => Token::Var,
            "tile" => Token::Tile,
            "yyyy" => Token::Year,
            "mm" => Token::Month,
            "dd" => Token::Day,
            "hh" => Token::Hour,
            _ => Token::Tag(name),
        };
        tokens.push(token);
    }
    if !literal.is_empty() {
        tokens.push(Token::Literal(literal));
    }
    Ok(tokens)
}

fn take_digits(bytes: &[u8], pos: usize, n: usize) -> Option<String> {
    if pos + n > bytes.len() {
        return None;
    }
    let slice = &bytes[pos..pos + n];
    if !slice.iter().all(u8::is_ascii_digit) {
        return None;
    }
    // All-ASCII by construction.
    Some(String::from_utf8(slice.to_vec()).ok()?)
}

fn shift_time(base: DateTime<Utc>, steps: i64, unit: TimeUnit) -> Option<DateTime<Utc>> {
    match unit {
        TimeUnit::Hour => base.checked_add_signed(Duration::hours(steps)),
        TimeUnit::Day => base.checked_add_signed(Duration::days(steps)),
        TimeUnit::Month => {
            let months = Months::new(steps.unsigned_abs() as u32);
            if steps >= 0 {
                base.checked_add_months(months)
            } else {
                base.checked_sub_months(months)
            }
        }
        TimeUnit::Year => {
            let months = Months::new(12 * steps.unsigned_abs() as u32);
            if steps >= 0 {
                base.checked_add_months(months)
            } else {
                base.checked_sub_months(months)
            }
        }
    }
}

/// Upper bound on shift count for a tolerance window.
///
/// Month and year shifts have variable length; the bound over-generates
/// slightly and `candidates` filters by actual distance afterwards.
fn max_steps_within(unit: TimeUnit, tolerance: Duration) -> u32 {
    let steps = match unit {
        TimeUnit::Hour => tolerance.num_hours(),
        TimeUnit::Day => tolerance.num_days(),
        TimeUnit::Month => tolerance.num_days() / 28,
        TimeUnit::Year => tolerance.num_days() / 365,
    };
    steps.clamp(0, u32::MAX as i64) as u32
}
