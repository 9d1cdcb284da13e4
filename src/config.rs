//! Typed parameter bundle for the normalization engine, with `key=value`
//! persistence.

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::str::FromStr;

use crate::errs::{RfError, RfResult};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ScoringMethod {
    Ding,
    Rouskin,
    Siegfried,
    Zubradt,
}

impl ScoringMethod {
    pub fn from_code(code: u8) -> RfResult<Self> {
        match code {
            1 => Ok(Self::Ding),
            2 => Ok(Self::Rouskin),
            3 => Ok(Self::Siegfried),
            4 => Ok(Self::Zubradt),
            other => Err(RfError::Config(format!(
                "scoring method must be 1-4, got {other}"
            ))),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::Ding => 1,
            Self::Rouskin => 2,
            Self::Siegfried => 3,
            Self::Zubradt => 4,
        }
    }

    pub fn requires_untreated(&self) -> bool {
        matches!(self, Self::Ding | Self::Siegfried)
    }

    pub fn accepts_denatured(&self) -> bool {
        matches!(self, Self::Siegfried)
    }

    pub fn default_window(&self) -> WindowSize {
        match self {
            Self::Ding | Self::Siegfried => WindowSize::WholeTranscript,
            Self::Rouskin | Self::Zubradt => WindowSize::Bases(50),
        }
    }
}

impl Display for ScoringMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Ding => "Ding",
            Self::Rouskin => "Rouskin",
            Self::Siegfried => "Siegfried",
            Self::Zubradt => "Zubradt",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum NormMethod {
    TwoEightPercent,
    Winsor90,
    BoxPlot,
}

impl NormMethod {
    pub fn from_code(code: u8) -> RfResult<Self> {
        match code {
            1 => Ok(Self::TwoEightPercent),
            2 => Ok(Self::Winsor90),
            3 => Ok(Self::BoxPlot),
            other => Err(RfError::Config(format!(
                "normalization method must be 1-3, got {other}"
            ))),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::TwoEightPercent => 1,
            Self::Winsor90 => 2,
            Self::BoxPlot => 3,
        }
    }
}

impl Display for NormMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::TwoEightPercent => "2-8%",
            Self::Winsor90 => "90% Winsorize",
            Self::BoxPlot => "box-plot",
        };
        write!(f, "{name}")
    }
}

/// Normalization window, either the whole transcript or a fixed number of
/// bases.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum WindowSize {
    WholeTranscript,
    Bases(usize),
}

impl WindowSize {
    pub fn effective(&self, transcript_len: usize) -> usize {
        match self {
            Self::WholeTranscript => transcript_len,
            Self::Bases(w) => std::cmp::min(*w, transcript_len),
        }
    }
}

impl Display for WindowSize {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WholeTranscript => write!(f, "whole-transcript"),
            Self::Bases(w) => write!(f, "{w}"),
        }
    }
}

impl FromStr for WindowSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "whole-transcript" {
            Ok(Self::WholeTranscript)
        } else {
            s.parse::<usize>()
                .map(Self::Bases)
                .map_err(|_| format!("invalid window {s:?}"))
        }
    }
}

/// The set of nucleotide characters the experiment is informative on. `N`
/// stands for all four; `U` is folded into `T`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ReactiveBases {
    bases: BTreeSet<char>,
}

impl ReactiveBases {
    pub fn all() -> Self {
        Self { bases: BTreeSet::from(['A', 'C', 'G', 'T']) }
    }

    pub fn contains(&self, base: char) -> bool {
        let base = match base.to_ascii_uppercase() {
            'U' => 'T',
            b => b,
        };
        self.bases.contains(&base)
    }

    pub fn is_all(&self) -> bool {
        self.bases.len() == 4
    }

    /// Member characters in canonical (DNA, sorted) spelling.
    pub fn chars(&self) -> impl Iterator<Item = char> + '_ {
        self.bases.iter().copied()
    }

    pub fn union(&self, other: &Self) -> Self {
        Self { bases: self.bases.union(&other.bases).copied().collect() }
    }
}

impl Display for ReactiveBases {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.is_all() {
            write!(f, "N")
        } else {
            for base in &self.bases {
                write!(f, "{base}")?;
            }
            Ok(())
        }
    }
}

impl FromStr for ReactiveBases {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err("reactive bases cannot be empty".to_owned());
        }
        if s.eq_ignore_ascii_case("N") {
            return Ok(Self::all());
        }
        let mut bases = BTreeSet::new();
        for ch in s.chars() {
            match ch.to_ascii_uppercase() {
                'N' => return Ok(Self::all()),
                'U' => bases.insert('T'),
                b @ ('A' | 'C' | 'G' | 'T') => bases.insert(b),
                other => {
                    return Err(format!(
                        "invalid reactive base {other:?}, expected A, C, G, \
                         T, U or N"
                    ))
                }
            };
        }
        Ok(Self { bases })
    }
}

/// Validated parameter bundle for scoring and normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct NormConfig {
    pub scoring: ScoringMethod,
    pub norm: NormMethod,
    pub norm_window: WindowSize,
    /// None means the offset tracks the window.
    pub window_offset: Option<usize>,
    pub reactive_bases: ReactiveBases,
    pub norm_independent: bool,
    pub pseudocount: f64,
    pub max_score: f64,
    pub mean_coverage: f64,
    pub median_coverage: f64,
    /// Per-base coverage floor below which positions are reported as NaN.
    pub nan: u32,
    pub remap_reactivities: bool,
    pub max_untreated_mut: f64,
    pub raw: bool,
}

impl NormConfig {
    pub fn with_methods(scoring: ScoringMethod, norm: NormMethod) -> Self {
        Self {
            scoring,
            norm,
            norm_window: scoring.default_window(),
            window_offset: None,
            reactive_bases: ReactiveBases::all(),
            norm_independent: false,
            pseudocount: 1f64,
            max_score: 10f64,
            mean_coverage: 0f64,
            median_coverage: 0f64,
            nan: 10,
            remap_reactivities: false,
            max_untreated_mut: 0.05,
            raw: false,
        }
    }

    pub fn validate(&self) -> RfResult<()> {
        let fail = |msg: String| Err(RfError::Config(msg));
        if let WindowSize::Bases(w) = self.norm_window {
            if w < 3 {
                return fail(format!("norm-window must be >= 3, got {w}"));
            }
            if let Some(offset) = self.window_offset {
                if offset == 0 || offset > w {
                    return fail(format!(
                        "window-offset must be in [1, {w}], got {offset}"
                    ));
                }
            }
        } else if self.window_offset.is_some() {
            return fail(
                "window-offset requires a fixed norm-window".to_owned(),
            );
        }
        if !(self.pseudocount > 0f64) {
            return fail(format!(
                "pseudocount must be > 0, got {}",
                self.pseudocount
            ));
        }
        if !(self.max_score > 0f64) {
            return fail(format!(
                "max-score must be > 0, got {}",
                self.max_score
            ));
        }
        if !self.mean_coverage.is_finite() || self.mean_coverage < 0f64 {
            return fail(format!(
                "mean-coverage must be >= 0, got {}",
                self.mean_coverage
            ));
        }
        if !self.median_coverage.is_finite() || self.median_coverage < 0f64 {
            return fail(format!(
                "median-coverage must be >= 0, got {}",
                self.median_coverage
            ));
        }
        if self.nan == 0 {
            return fail("nan coverage floor must be >= 1".to_owned());
        }
        if !(self.max_untreated_mut > 0f64 && self.max_untreated_mut <= 1f64) {
            return fail(format!(
                "max-untreated-mut must be in (0, 1], got {}",
                self.max_untreated_mut
            ));
        }
        if self.raw && self.remap_reactivities {
            return fail(
                "remap-reactivities applies to normalized values and cannot \
                 be combined with raw"
                    .to_owned(),
            );
        }
        Ok(())
    }

    /// Window actually used for a transcript of the given length.
    pub fn effective_window(&self, transcript_len: usize) -> usize {
        self.norm_window.effective(transcript_len)
    }

    pub fn effective_offset(&self, effective_window: usize) -> usize {
        self.window_offset.unwrap_or(effective_window)
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> RfResult<()> {
        std::fs::write(path, self.serialize()).map_err(RfError::Io)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> RfResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config = Self::deserialize(&raw)?;
        config.validate()?;
        Ok(config)
    }

    fn serialize(&self) -> String {
        let mut out = String::new();
        let mut push = |key: &str, value: String| {
            out.push_str(key);
            out.push('=');
            out.push_str(&value);
            out.push('\n');
        };
        push("scoring-method", self.scoring.code().to_string());
        push("norm-method", self.norm.code().to_string());
        push("norm-window", self.norm_window.to_string());
        if let Some(offset) = self.window_offset {
            push("window-offset", offset.to_string());
        }
        push("reactive-bases", self.reactive_bases.to_string());
        push("norm-independent", self.norm_independent.to_string());
        push("pseudocount", self.pseudocount.to_string());
        push("max-score", self.max_score.to_string());
        push("mean-coverage", self.mean_coverage.to_string());
        push("median-coverage", self.median_coverage.to_string());
        push("nan", self.nan.to_string());
        push("remap-reactivities", self.remap_reactivities.to_string());
        push("max-untreated-mut", self.max_untreated_mut.to_string());
        push("raw", self.raw.to_string());
        out
    }

    fn deserialize(raw: &str) -> RfResult<Self> {
        fn parse<T: FromStr>(key: &str, value: &str) -> RfResult<T> {
            value.parse::<T>().map_err(|_| {
                RfError::Config(format!("invalid value {value:?} for {key}"))
            })
        }

        let mut pairs = Vec::new();
        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                RfError::Config(format!("expected key=value, got {line:?}"))
            })?;
            pairs.push((key.trim(), value.trim()));
        }

        let mut scoring = ScoringMethod::Ding;
        let mut norm = NormMethod::TwoEightPercent;
        let mut window: Option<WindowSize> = None;
        for &(key, value) in &pairs {
            match key {
                "scoring-method" => {
                    scoring = ScoringMethod::from_code(parse(key, value)?)?
                }
                "norm-method" => {
                    norm = NormMethod::from_code(parse(key, value)?)?
                }
                "norm-window" => window = Some(parse(key, value)?),
                _ => {}
            }
        }
        let mut config = Self::with_methods(scoring, norm);
        if let Some(window) = window {
            config.norm_window = window;
        }
        for (key, value) in pairs {
            match key {
                "scoring-method" | "norm-method" | "norm-window" => {}
                "window-offset" => {
                    config.window_offset = Some(parse(key, value)?)
                }
                "reactive-bases" => {
                    config.reactive_bases = parse(key, value)?
                }
                "norm-independent" => {
                    config.norm_independent = parse(key, value)?
                }
                "pseudocount" => config.pseudocount = parse(key, value)?,
                "max-score" => config.max_score = parse(key, value)?,
                "mean-coverage" => config.mean_coverage = parse(key, value)?,
                "median-coverage" => {
                    config.median_coverage = parse(key, value)?
                }
                "nan" => config.nan = parse(key, value)?,
                "remap-reactivities" => {
                    config.remap_reactivities = parse(key, value)?
                }
                "max-untreated-mut" => {
                    config.max_untreated_mut = parse(key, value)?
                }
                "raw" => config.raw = parse(key, value)?,
                unknown => {
                    return Err(RfError::Config(format!(
                        "unrecognized option {unknown:?}"
                    )))
                }
            }
        }
        Ok(config)
    }
}

#[cfg(test)]
mod config_tests {
    use super::*;

    #[test]
    fn test_window_defaults_follow_scoring() {
        let ding =
            NormConfig::with_methods(ScoringMethod::Ding, NormMethod::BoxPlot);
        assert_eq!(ding.norm_window, WindowSize::WholeTranscript);
        assert_eq!(ding.effective_window(2000), 2000);

        let rouskin = NormConfig::with_methods(
            ScoringMethod::Rouskin,
            NormMethod::Winsor90,
        );
        assert_eq!(rouskin.norm_window, WindowSize::Bases(50));
        assert_eq!(rouskin.effective_window(20), 20);
        assert_eq!(rouskin.effective_offset(50), 50);
    }

    #[test]
    fn test_validation_rejects_contradictions() {
        let mut config = NormConfig::with_methods(
            ScoringMethod::Rouskin,
            NormMethod::Winsor90,
        );
        config.norm_window = WindowSize::Bases(2);
        assert!(config.validate().is_err());

        config.norm_window = WindowSize::Bases(50);
        config.window_offset = Some(60);
        assert!(config.validate().is_err());

        config.window_offset = Some(25);
        assert!(config.validate().is_ok());

        config.raw = true;
        config.remap_reactivities = true;
        assert!(config.validate().is_err());

        config.remap_reactivities = false;
        config.pseudocount = 0f64;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reactive_bases_parse_and_display() {
        let all = "N".parse::<ReactiveBases>().unwrap();
        assert!(all.contains('A') && all.contains('U'));
        assert_eq!(all.to_string(), "N");

        let ac = "AC".parse::<ReactiveBases>().unwrap();
        assert!(ac.contains('a'));
        assert!(!ac.contains('G'));
        assert_eq!(ac.to_string(), "AC");

        // U folds into T, full unions collapse back to N
        let gu = "GU".parse::<ReactiveBases>().unwrap();
        assert_eq!(gu.to_string(), "GT");
        assert_eq!(ac.union(&gu).to_string(), "ACGT".parse::<ReactiveBases>().unwrap().to_string());
        assert!("X".parse::<ReactiveBases>().is_err());
        assert!("".parse::<ReactiveBases>().is_err());
    }

    #[test]
    fn test_key_value_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("norm.conf");

        let mut config = NormConfig::with_methods(
            ScoringMethod::Siegfried,
            NormMethod::BoxPlot,
        );
        config.norm_window = WindowSize::Bases(600);
        config.window_offset = Some(200);
        config.reactive_bases = "AC".parse().unwrap();
        config.norm_independent = true;
        config.mean_coverage = 25f64;
        config.max_untreated_mut = 0.02;
        config.to_file(&path).unwrap();

        let restored = NormConfig::from_file(&path).unwrap();
        assert_eq!(restored, config);
    }

    #[test]
    fn test_unknown_key_rejected() {
        match NormConfig::deserialize("scoring-method=2\nbogus=1\n") {
            Err(RfError::Config(msg)) => assert!(msg.contains("bogus")),
            other => panic!("expected config error, got {other:?}"),
        }
    }
}
