//! Toleration specs in `key=value:effect:operator` form.

use k8s_openapi::api::core::v1::Toleration;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{AppError, Result};

/// Toleration operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TolerationOperator {
    Exists,
    Equal,
}

impl TolerationOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            TolerationOperator::Exists => "Exists",
            TolerationOperator::Equal => "Equal",
        }
    }
}

impl fmt::Display for TolerationOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed toleration.
///
/// Empty segments are kept as `None`: no key with `Exists` tolerates every
/// taint, no effect matches every effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TolerationSpec {
    pub key: Option<String>,
    pub value: Option<String>,
    pub effect: Option<String>,
    pub operator: TolerationOperator,
}

impl TolerationSpec {
    /// Parses a list of raw tolerations, rejecting exact duplicates before
    /// looking at any entry's syntax.
    pub fn parse_all<S: AsRef<str>>(raw: &[S]) -> Result<Vec<TolerationSpec>> {
        let mut seen = HashSet::new();
        for entry in raw {
            if !seen.insert(entry.as_ref()) {
                return Err(AppError::DuplicateToleration(entry.as_ref().to_string()));
            }
        }
        raw.iter().map(|entry| entry.as_ref().parse()).collect()
    }

    pub fn to_k8s(&self) -> Toleration {
        Toleration {
            key: self.key.clone(),
            value: self.value.clone(),
            effect: self.effect.clone(),
            operator: Some(self.operator.as_str().to_string()),
            toleration_seconds: None,
        }
    }
}

impl FromStr for TolerationSpec {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: String| AppError::InvalidToleration {
            raw: s.to_string(),
            reason,
        };

        let parts: Vec<&str> = s.split(':').collect();
        let [key_value, effect, operator] = parts.as_slice() else {
            return Err(invalid(format!(
                "expected format key=value:effect:operator, got {} segment(s)",
                parts.len()
            )));
        };

        let operator = match *operator {
            "Exists" => TolerationOperator::Exists,
            "Equal" => TolerationOperator::Equal,
            other => {
                return Err(invalid(format!(
                    "operator must be Equal or Exists, got {:?}",
                    other
                )))
            }
        };

        let (key, value) = match key_value.split_once('=') {
            Some((key, value)) => (key, value),
            None => (*key_value, ""),
        };
        let non_empty = |v: &str| (!v.is_empty()).then(|| v.to_string());

        let spec = TolerationSpec {
            key: non_empty(key),
            value: non_empty(value),
            effect: non_empty(effect),
            operator,
        };

        if spec.key.is_none() && spec.operator == TolerationOperator::Equal {
            return Err(invalid(
                "an empty key is only allowed with the Exists operator".to_string(),
            ));
        }

        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(
        key: Option<&str>,
        value: Option<&str>,
        effect: Option<&str>,
        operator: TolerationOperator,
    ) -> TolerationSpec {
        TolerationSpec {
            key: key.map(str::to_string),
            value: value.map(str::to_string),
            effect: effect.map(str::to_string),
            operator,
        }
    }

    #[test]
    fn test_parse_tolerate_everything() {
        let parsed: TolerationSpec = "::Exists".parse().unwrap();
        assert_eq!(parsed, spec(None, None, None, TolerationOperator::Exists));
    }

    #[test]
    fn test_parse_key_with_any_effect() {
        let parsed: TolerationSpec = "node.kubernetes.io/disk-pressure=::Exists".parse().unwrap();
        assert_eq!(
            parsed,
            spec(
                Some("node.kubernetes.io/disk-pressure"),
                None,
                None,
                TolerationOperator::Exists
            )
        );
    }

    #[test]
    fn test_parse_key_with_specific_effect() {
        let parsed: TolerationSpec = "node.kubernetes.io/not-ready=:NoExecute:Exists"
            .parse()
            .unwrap();
        assert_eq!(
            parsed,
            spec(
                Some("node.kubernetes.io/not-ready"),
                None,
                Some("NoExecute"),
                TolerationOperator::Exists
            )
        );
    }

    #[test]
    fn test_parse_key_value_equal() {
        let parsed: TolerationSpec = "dedicated=gpu:NoSchedule:Equal".parse().unwrap();
        assert_eq!(
            parsed,
            spec(
                Some("dedicated"),
                Some("gpu"),
                Some("NoSchedule"),
                TolerationOperator::Equal
            )
        );
    }

    #[test]
    fn test_parse_rejects_wrong_segment_count() {
        let err = "key:value".parse::<TolerationSpec>().unwrap_err();
        assert!(matches!(err, AppError::InvalidToleration { ref raw, .. } if raw == "key:value"));
    }

    #[test]
    fn test_parse_rejects_unknown_operator() {
        let err = "key=value:NoSchedule:Invalid"
            .parse::<TolerationSpec>()
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidToleration { .. }));
    }

    #[test]
    fn test_parse_rejects_equal_without_key() {
        assert!(":NoSchedule:Equal".parse::<TolerationSpec>().is_err());
    }

    #[test]
    fn test_parse_all_rejects_duplicates() {
        let raw = vec!["::Exists".to_string(), "::Exists".to_string()];
        let err = TolerationSpec::parse_all(&raw).unwrap_err();
        assert_eq!(err, AppError::DuplicateToleration("::Exists".to_string()));
    }

    #[test]
    fn test_parse_all_reports_duplicates_before_syntax() {
        let raw = vec!["bad", "bad"];
        let err = TolerationSpec::parse_all(&raw).unwrap_err();
        assert!(matches!(err, AppError::DuplicateToleration(_)));
    }

    #[test]
    fn test_to_k8s() {
        let toleration = "dedicated=gpu:NoSchedule:Equal"
            .parse::<TolerationSpec>()
            .unwrap()
            .to_k8s();

        assert_eq!(toleration.key.as_deref(), Some("dedicated"));
        assert_eq!(toleration.value.as_deref(), Some("gpu"));
        assert_eq!(toleration.effect.as_deref(), Some("NoSchedule"));
        assert_eq!(toleration.operator.as_deref(), Some("Equal"));
        assert_eq!(toleration.toleration_seconds, None);
    }
}
