//! Dithering Algorithms - Closed Label/Token Table
//!
//! The selector shows labels; the tool only understands tokens.
//! Both live in one exhaustive match so neither can drift from the enum.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A label outside the closed table: the selector and the table disagree
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown algorithm label: {0}")]
pub struct UnknownAlgorithm(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DitherAlgorithm {
    None,
    FloydSteinberg,
    DiffuseLargeErrorsOnly,
}

impl DitherAlgorithm {
    /// Every algorithm, in the order the selector lists them
    pub const ALL: [DitherAlgorithm; 3] = [
        DitherAlgorithm::None,
        DitherAlgorithm::FloydSteinberg,
        DitherAlgorithm::DiffuseLargeErrorsOnly,
    ];

    /// (display label, tool token)
    fn names(self) -> (&'static str, &'static str) {
        match self {
            DitherAlgorithm::None => ("None", "nop"),
            DitherAlgorithm::FloydSteinberg => ("Floyd-Steinberg", "fs"),
            DitherAlgorithm::DiffuseLargeErrorsOnly => ("Diffuse large errors only", "err1"),
        }
    }

    pub fn label(self) -> &'static str {
        self.names().0
    }

    pub fn token(self) -> &'static str {
        self.names().1
    }

    /// Resolve a selector label. Labels are controlled by this crate, so a miss
    /// means the selector and the table disagree.
    pub fn from_label(label: &str) -> Result<Self, UnknownAlgorithm> {
        Self::ALL
            .into_iter()
            .find(|algo| algo.label() == label)
            .ok_or_else(|| UnknownAlgorithm(label.to_string()))
    }

    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|algo| algo.token() == token)
    }
}

impl Default for DitherAlgorithm {
    fn default() -> Self {
        Self::FloydSteinberg
    }
}

impl fmt::Display for DitherAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl TryFrom<String> for DitherAlgorithm {
    type Error = UnknownAlgorithm;

    fn try_from(label: String) -> Result<Self, Self::Error> {
        Self::from_label(&label)
    }
}

impl From<DitherAlgorithm> for String {
    fn from(algo: DitherAlgorithm) -> Self {
        algo.label().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_and_tokens_unique() {
        for (i, a) in DitherAlgorithm::ALL.iter().enumerate() {
            for b in &DitherAlgorithm::ALL[i + 1..] {
                assert_ne!(a.label(), b.label());
                assert_ne!(a.token(), b.token());
            }
        }
    }

    #[test]
    fn test_label_token_bijection() {
        for algo in DitherAlgorithm::ALL {
            assert_eq!(DitherAlgorithm::from_label(algo.label()).unwrap(), algo);
            assert_eq!(DitherAlgorithm::from_token(algo.token()), Some(algo));
        }
    }

    #[test]
    fn test_known_tokens() {
        assert_eq!(DitherAlgorithm::from_label("None").unwrap().token(), "nop");
        assert_eq!(DitherAlgorithm::from_label("Floyd-Steinberg").unwrap().token(), "fs");
        assert_eq!(
            DitherAlgorithm::from_label("Diffuse large errors only").unwrap().token(),
            "err1"
        );
    }

    #[test]
    fn test_unknown_label_rejected() {
        let err = DitherAlgorithm::from_label("Atkinson").unwrap_err();
        assert_eq!(err, UnknownAlgorithm("Atkinson".into()));
        assert!(err.to_string().contains("Atkinson"));
        // Tokens are not labels
        assert!(DitherAlgorithm::from_label("fs").is_err());
    }

    #[test]
    fn test_serde_uses_label() {
        let json = serde_json::to_string(&DitherAlgorithm::DiffuseLargeErrorsOnly).unwrap();
        assert_eq!(json, r#""Diffuse large errors only""#);
        let back: DitherAlgorithm = serde_json::from_str(r#""None""#).unwrap();
        assert_eq!(back, DitherAlgorithm::None);
        assert!(serde_json::from_str::<DitherAlgorithm>(r#""nop""#).is_err());
    }

    #[test]
    fn test_unknown_label_fails_on_every_path() {
        use crate::params::{Field, FieldValue, ParameterStore, StoreError};
        use crate::pipeline::{CompileRequest, PipelineCompiler, PipelineError};

        let mut store = ParameterStore::new();
        let err = store
            .set(Field::Algorithm, FieldValue::Label("Sierra".into()))
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownAlgorithm(ref l) if l == "Sierra"));

        let request = CompileRequest {
            source: Some("in.png".into()),
            algorithm: Some("Sierra".into()),
            ..Default::default()
        };
        let err = PipelineCompiler::new("dither").compile_request(&request).unwrap_err();
        assert!(matches!(err, PipelineError::UnknownAlgorithm(ref l) if l == "Sierra"));

        let err = serde_json::from_str::<DitherAlgorithm>(r#""Sierra""#).unwrap_err();
        assert!(err.to_string().contains("Sierra"));
    }
}
