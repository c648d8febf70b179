//! Parameter Store - Single Write Path For Every Option
//!
//! Numeric input is clamped to the declared range, the same way the bounded
//! sliders and spinners of the front end limit it. Clamping is never an error.

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::algorithm::{DitherAlgorithm, UnknownAlgorithm};

pub const GAMMA_MIN: f64 = 0.0;
pub const GAMMA_MAX: f64 = 3.0;
/// Gamma moves in steps of 0.05
pub const GAMMA_STEPS_PER_UNIT: u32 = 20;

pub const BIAS_MIN: i32 = -256;
pub const BIAS_MAX: i32 = 256;

pub const GAIN_PERCENT_MIN: u32 = 0;
pub const GAIN_PERCENT_MAX: u32 = 1500;

pub const QUANTIZE_BITS_MIN: u8 = 1;
pub const QUANTIZE_BITS_MAX: u8 = 8;

pub const MAX_COLORS_MIN: u16 = 1;
pub const MAX_COLORS_MAX: u16 = 255;

pub const DEFAULT_DESTINATION: &str = "ditherout.png";
pub const DEFAULT_MAX_COLORS: i64 = 256;

const GAMMA_MAX_STEPS: u32 = 60;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Unknown algorithm label: {0}")]
    UnknownAlgorithm(String),

    #[error("Field {field} expects {expected}")]
    KindMismatch { field: Field, expected: &'static str },
}

impl From<UnknownAlgorithm> for StoreError {
    fn from(e: UnknownAlgorithm) -> Self {
        StoreError::UnknownAlgorithm(e.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Source,
    Destination,
    Gamma,
    PreBias,
    GainPercent,
    PostBias,
    QuantizeBits,
    MaxColors,
    Algorithm,
}

impl Field {
    pub const ALL: [Field; 9] = [
        Field::Source,
        Field::Destination,
        Field::Gamma,
        Field::PreBias,
        Field::GainPercent,
        Field::PostBias,
        Field::QuantizeBits,
        Field::MaxColors,
        Field::Algorithm,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Field::Source => "source",
            Field::Destination => "destination",
            Field::Gamma => "gamma",
            Field::PreBias => "pre_bias",
            Field::GainPercent => "gain_percent",
            Field::PostBias => "post_bias",
            Field::QuantizeBits => "quantize_bits",
            Field::MaxColors => "max_colors",
            Field::Algorithm => "algorithm",
        }
    }

    /// Free-text path fields only take effect on the next triggered cycle.
    pub fn triggers_cycle(self) -> bool {
        !matches!(self, Field::Source | Field::Destination)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Real(f64),
    Label(String),
    Path(PathBuf),
}

impl FieldValue {
    fn kind(&self) -> &'static str {
        match self {
            FieldValue::Int(_) => "an integer",
            FieldValue::Real(_) => "a number",
            FieldValue::Label(_) => "a label",
            FieldValue::Path(_) => "a path",
        }
    }
}

/// What `set` actually stored
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub field: Field,
    pub value: FieldValue,
    pub clamped: bool,
}

/// Complete configuration for one compilation pass.
///
/// Fields are private: every value has been through the store's clamping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParameterSet {
    source: Option<PathBuf>,
    destination: PathBuf,
    gamma_steps: u32,
    pre_bias: i32,
    gain_percent: u32,
    post_bias: i32,
    quantize_bits: u8,
    max_colors: u16,
    algorithm: DitherAlgorithm,
}

impl Default for ParameterSet {
    fn default() -> Self {
        Self {
            source: None,
            destination: PathBuf::from(DEFAULT_DESTINATION),
            gamma_steps: GAMMA_STEPS_PER_UNIT,
            pre_bias: 0,
            gain_percent: 100,
            post_bias: 0,
            quantize_bits: 4,
            max_colors: clamp_int(DEFAULT_MAX_COLORS, MAX_COLORS_MIN.into(), MAX_COLORS_MAX.into()).0 as u16,
            algorithm: DitherAlgorithm::default(),
        }
    }
}

impl ParameterSet {
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn gamma(&self) -> f64 {
        // Dividing keeps the shortest decimal form (23 / 20 == 1.15 exactly as printed)
        self.gamma_steps as f64 / GAMMA_STEPS_PER_UNIT as f64
    }

    pub fn pre_bias(&self) -> i32 {
        self.pre_bias
    }

    pub fn gain_percent(&self) -> u32 {
        self.gain_percent
    }

    /// Multiplicative gain factor handed to the tool
    pub fn gain(&self) -> f64 {
        self.gain_percent as f64 / 100.0
    }

    pub fn post_bias(&self) -> i32 {
        self.post_bias
    }

    pub fn quantize_bits(&self) -> u8 {
        self.quantize_bits
    }

    pub fn max_colors(&self) -> u16 {
        self.max_colors
    }

    pub fn algorithm(&self) -> DitherAlgorithm {
        self.algorithm
    }

    pub fn get(&self, field: Field) -> FieldValue {
        match field {
            Field::Source => FieldValue::Path(self.source.clone().unwrap_or_default()),
            Field::Destination => FieldValue::Path(self.destination.clone()),
            Field::Gamma => FieldValue::Real(self.gamma()),
            Field::PreBias => FieldValue::Int(self.pre_bias.into()),
            Field::GainPercent => FieldValue::Int(self.gain_percent.into()),
            Field::PostBias => FieldValue::Int(self.post_bias.into()),
            Field::QuantizeBits => FieldValue::Int(self.quantize_bits.into()),
            Field::MaxColors => FieldValue::Int(self.max_colors.into()),
            Field::Algorithm => FieldValue::Label(self.algorithm.label().to_string()),
        }
    }
}

/// Owned by the interactive session for its whole lifetime.
#[derive(Debug, Clone, Default)]
pub struct ParameterStore {
    current: ParameterSet,
}

impl ParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Immutable copy for one compilation pass
    pub fn snapshot(&self) -> ParameterSet {
        self.current.clone()
    }

    /// Point update. Numeric values clamp; labels must be in the closed table.
    pub fn set(&mut self, field: Field, value: FieldValue) -> Result<Applied, StoreError> {
        match (field, value) {
            (Field::Source, FieldValue::Path(path)) => Ok(self.set_source(path)),
            (Field::Destination, FieldValue::Path(path)) => Ok(self.set_destination(path)),
            (Field::Algorithm, FieldValue::Label(label)) => self.set_algorithm_label(&label),
            (Field::Gamma, FieldValue::Real(v)) => Ok(self.set_gamma(v)),
            (Field::Gamma, FieldValue::Int(v)) => Ok(self.set_gamma(v as f64)),
            (field, FieldValue::Int(v)) if is_integer_field(field) => Ok(self.set_integer(field, v)),
            (field, FieldValue::Real(v)) if is_integer_field(field) => {
                Ok(self.set_integer(field, real_to_int(v)))
            }
            (field, value) => Err(StoreError::KindMismatch {
                field,
                expected: expected_kind(field, &value),
            }),
        }
    }

    pub fn set_source(&mut self, path: impl Into<PathBuf>) -> Applied {
        let path = path.into();
        self.current.source = if path.as_os_str().is_empty() { None } else { Some(path.clone()) };
        Applied { field: Field::Source, value: FieldValue::Path(path), clamped: false }
    }

    pub fn set_destination(&mut self, path: impl Into<PathBuf>) -> Applied {
        let path = path.into();
        self.current.destination = path.clone();
        Applied { field: Field::Destination, value: FieldValue::Path(path), clamped: false }
    }

    pub fn set_gamma(&mut self, gamma: f64) -> Applied {
        let clamped = gamma.is_nan() || gamma < GAMMA_MIN || gamma > GAMMA_MAX;
        let steps = if gamma.is_nan() {
            0
        } else {
            (gamma * GAMMA_STEPS_PER_UNIT as f64)
                .round()
                .clamp(0.0, GAMMA_MAX_STEPS as f64) as u32
        };
        self.current.gamma_steps = steps;
        let applied = Applied {
            field: Field::Gamma,
            value: FieldValue::Real(self.current.gamma()),
            clamped,
        };
        log_clamp(&applied, &gamma);
        applied
    }

    pub fn set_pre_bias(&mut self, bias: i64) -> Applied {
        self.set_integer(Field::PreBias, bias)
    }

    pub fn set_gain_percent(&mut self, percent: i64) -> Applied {
        self.set_integer(Field::GainPercent, percent)
    }

    pub fn set_post_bias(&mut self, bias: i64) -> Applied {
        self.set_integer(Field::PostBias, bias)
    }

    pub fn set_quantize_bits(&mut self, bits: i64) -> Applied {
        self.set_integer(Field::QuantizeBits, bits)
    }

    pub fn set_max_colors(&mut self, colors: i64) -> Applied {
        self.set_integer(Field::MaxColors, colors)
    }

    pub fn set_algorithm(&mut self, algorithm: DitherAlgorithm) -> Applied {
        self.current.algorithm = algorithm;
        Applied {
            field: Field::Algorithm,
            value: FieldValue::Label(algorithm.label().to_string()),
            clamped: false,
        }
    }

    pub fn set_algorithm_label(&mut self, label: &str) -> Result<Applied, StoreError> {
        let algorithm = DitherAlgorithm::from_label(label)?;
        Ok(self.set_algorithm(algorithm))
    }

    fn set_integer(&mut self, field: Field, value: i64) -> Applied {
        let s = &mut self.current;
        let (stored, clamped) = match field {
            Field::PreBias | Field::PostBias => {
                let (v, c) = clamp_int(value, BIAS_MIN.into(), BIAS_MAX.into());
                if field == Field::PreBias {
                    s.pre_bias = v as i32;
                } else {
                    s.post_bias = v as i32;
                }
                (v, c)
            }
            Field::GainPercent => {
                let (v, c) = clamp_int(value, GAIN_PERCENT_MIN.into(), GAIN_PERCENT_MAX.into());
                s.gain_percent = v as u32;
                (v, c)
            }
            Field::QuantizeBits => {
                let (v, c) = clamp_int(value, QUANTIZE_BITS_MIN.into(), QUANTIZE_BITS_MAX.into());
                s.quantize_bits = v as u8;
                (v, c)
            }
            Field::MaxColors => {
                let (v, c) = clamp_int(value, MAX_COLORS_MIN.into(), MAX_COLORS_MAX.into());
                s.max_colors = v as u16;
                (v, c)
            }
            // Callers only route integer fields here.
            _ => unreachable!("{field} is not an integer field"),
        };
        let applied = Applied { field, value: FieldValue::Int(stored), clamped };
        log_clamp(&applied, &value);
        applied
    }
}

fn is_integer_field(field: Field) -> bool {
    matches!(
        field,
        Field::PreBias | Field::GainPercent | Field::PostBias | Field::QuantizeBits | Field::MaxColors
    )
}

fn expected_kind(field: Field, value: &FieldValue) -> &'static str {
    match field {
        Field::Source | Field::Destination => "a path",
        Field::Algorithm => "a label",
        Field::Gamma => "a number",
        _ if matches!(value, FieldValue::Label(_) | FieldValue::Path(_)) => "an integer",
        _ => value.kind(),
    }
}

/// NaN goes to the lower bound; infinities saturate.
pub(crate) fn real_to_int(value: f64) -> i64 {
    if value.is_nan() {
        i64::MIN
    } else {
        value.round() as i64
    }
}

fn clamp_int(value: i64, min: i64, max: i64) -> (i64, bool) {
    let clamped = value.clamp(min, max);
    (clamped, clamped != value)
}

fn log_clamp(applied: &Applied, requested: &dyn fmt::Debug) {
    if applied.clamped {
        tracing::debug!(
            field = %applied.field,
            requested = ?requested,
            applied = ?applied.value,
            "Clamped out-of-range value"
        );
    }
}
