//! Resource spec builder
//!
//! Turns human readable limit strings ("500m", "512Mi") into container
//! resource limits and projects job variables into environment variables.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use ferry_core::domain::job::JobVariable;
use k8s_openapi::api::core::v1::EnvVar;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity as KubeQuantity;
use thiserror::Error;

pub const RESOURCE_CPU: &str = "cpu";
pub const RESOURCE_MEMORY: &str = "memory";

/// A quantity string that failed to parse
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid quantity {input:?}: {reason}")]
pub struct InvalidQuantity {
    pub input: String,
    pub reason: &'static str,
}

/// A limit that failed to parse, naming the resource it was for
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("error parsing {resource} resource limit: {source}")]
pub struct ResourceParseError {
    pub resource: &'static str,
    #[source]
    pub source: InvalidQuantity,
}

/// A validated resource quantity
///
/// Keeps the notation as written for the API server alongside its numeric value.
#[derive(Debug, Clone, PartialEq)]
pub struct Quantity {
    raw: String,
    value: f64,
}

impl Quantity {
    /// Numeric value in base units (cores, bytes)
    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn to_kube(&self) -> KubeQuantity {
        KubeQuantity(self.raw.clone())
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for Quantity {
    type Err = InvalidQuantity;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| InvalidQuantity {
            input: input.to_string(),
            reason,
        };

        let bytes = input.as_bytes();
        let sign_len = usize::from(matches!(bytes.first(), Some(b'+' | b'-')));
        let number_len = bytes[sign_len..]
            .iter()
            .take_while(|b| b.is_ascii_digit() || **b == b'.')
            .count();

        let (number, suffix) = input.split_at(sign_len + number_len);
        let mantissa = &number[sign_len..];
        if !mantissa.bytes().any(|b| b.is_ascii_digit()) {
            return Err(invalid("expected a number"));
        }
        if mantissa.matches('.').count() > 1 {
            return Err(invalid("more than one decimal point"));
        }

        let number: f64 = number.parse().map_err(|_| invalid("expected a number"))?;
        let value = match suffix_scale(suffix).ok_or_else(|| invalid("unknown suffix"))? {
            Scale::Binary(multiplier) => number * multiplier,
            Scale::Decimal(exponent) if exponent >= 0 => number * 10f64.powi(exponent),
            Scale::Decimal(exponent) => number / 10f64.powi(-exponent),
        };

        Ok(Self {
            raw: input.to_string(),
            value,
        })
    }
}

enum Scale {
    Binary(f64),
    Decimal(i32),
}

fn suffix_scale(suffix: &str) -> Option<Scale> {
    let scale = match suffix {
        "" => Scale::Decimal(0),
        "n" => Scale::Decimal(-9),
        "u" => Scale::Decimal(-6),
        "m" => Scale::Decimal(-3),
        "k" => Scale::Decimal(3),
        "M" => Scale::Decimal(6),
        "G" => Scale::Decimal(9),
        "T" => Scale::Decimal(12),
        "P" => Scale::Decimal(15),
        "E" => Scale::Decimal(18),
        "Ki" => Scale::Binary(2f64.powi(10)),
        "Mi" => Scale::Binary(2f64.powi(20)),
        "Gi" => Scale::Binary(2f64.powi(30)),
        "Ti" => Scale::Binary(2f64.powi(40)),
        "Pi" => Scale::Binary(2f64.powi(50)),
        "Ei" => Scale::Binary(2f64.powi(60)),
        exponent if exponent.starts_with(['e', 'E']) => {
            let digits = &exponent[1..];
            let unsigned = digits.strip_prefix(['+', '-']).unwrap_or(digits);
            if unsigned.is_empty() || !unsigned.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            Scale::Decimal(digits.parse().ok()?)
        }
        _ => return None,
    };
    Some(scale)
}

/// Requested container limits; `None` means no limit for that resource
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceLimits {
    pub cpu: Option<Quantity>,
    pub memory: Option<Quantity>,
}

impl ResourceLimits {
    pub fn is_empty(&self) -> bool {
        self.cpu.is_none() && self.memory.is_none()
    }

    /// Limits keyed by resource name, containing only the requested ones
    pub fn to_resource_list(&self) -> BTreeMap<String, KubeQuantity> {
        [(RESOURCE_CPU, &self.cpu), (RESOURCE_MEMORY, &self.memory)]
            .into_iter()
            .filter_map(|(name, quantity)| {
                quantity
                    .as_ref()
                    .map(|quantity| (name.to_string(), quantity.to_kube()))
            })
            .collect()
    }
}

/// Parses CPU and memory limits; an empty string requests no limit
pub fn limits(cpu: &str, memory: &str) -> Result<ResourceLimits, ResourceParseError> {
    Ok(ResourceLimits {
        cpu: parse_limit(RESOURCE_CPU, cpu)?,
        memory: parse_limit(RESOURCE_MEMORY, memory)?,
    })
}

fn parse_limit(
    resource: &'static str,
    input: &str,
) -> Result<Option<Quantity>, ResourceParseError> {
    if input.is_empty() {
        return Ok(None);
    }

    let to_error = |source| ResourceParseError { resource, source };
    let quantity: Quantity = input.parse().map_err(to_error)?;
    if quantity.value() < 0.0 {
        return Err(to_error(InvalidQuantity {
            input: input.to_string(),
            reason: "limits must not be negative",
        }));
    }

    Ok(Some(quantity))
}

/// Projects job variables 1:1 into container environment variables
///
/// Order is preserved and duplicate keys are kept.
pub fn to_env_vars(variables: &[JobVariable]) -> Vec<EnvVar> {
    variables
        .iter()
        .map(|variable| EnvVar {
            name: variable.key.clone(),
            value: Some(variable.value.clone()),
            ..Default::default()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_scale_cpu_and_memory() {
        let limits = limits("500m", "50Mi").unwrap();
        assert_eq!(limits.cpu.as_ref().unwrap().value(), 0.5);
        assert_eq!(
            limits.memory.as_ref().unwrap().value(),
            (50 * 1024 * 1024) as f64
        );

        let list = limits.to_resource_list();
        assert_eq!(list.len(), 2);
        assert_eq!(list["cpu"], KubeQuantity("500m".to_string()));
        assert_eq!(list["memory"], KubeQuantity("50Mi".to_string()));
    }

    #[test]
    fn test_empty_dimension_is_omitted() {
        let cpu_only = limits("2", "").unwrap();
        assert_eq!(cpu_only.cpu.as_ref().unwrap().value(), 2.0);
        assert!(cpu_only.memory.is_none());
        assert_eq!(cpu_only.to_resource_list().keys().collect::<Vec<_>>(), vec!["cpu"]);

        let none = limits("", "").unwrap();
        assert!(none.is_empty());
        assert!(none.to_resource_list().is_empty());
    }

    #[test]
    fn test_malformed_cpu_is_reported() {
        let err = limits("half", "1Gi").unwrap_err();
        assert_eq!(err.resource, "cpu");
        assert!(err.to_string().contains("cpu"));
    }

    #[test]
    fn test_malformed_memory_is_reported() {
        let err = limits("1", "12XB").unwrap_err();
        assert_eq!(err.resource, "memory");
        assert_eq!(err.source.reason, "unknown suffix");
    }

    #[test]
    fn test_negative_limit_is_rejected() {
        assert!(limits("-1", "").is_err());
    }

    #[test]
    fn test_quantity_notations() {
        let value = |s: &str| s.parse::<Quantity>().unwrap().value();
        assert_eq!(value("1k"), 1000.0);
        assert_eq!(value("1Ki"), 1024.0);
        assert_eq!(value("1.5Gi"), 1.5 * 1024.0 * 1024.0 * 1024.0);
        assert_eq!(value("128974848"), 128974848.0);
        assert_eq!(value("129e6"), 129_000_000.0);
        assert_eq!(value("2E"), 2e18);
        assert_eq!(value("250u"), 0.00025);
        assert_eq!(value(".5"), 0.5);
    }

    #[test]
    fn test_quantity_rejects_garbage() {
        for input in ["", "m", "1..2", "1.2.3", "1e", "1e+", "1 Mi", "Mi1", "+"] {
            assert!(input.parse::<Quantity>().is_err(), "{input:?} should not parse");
        }
    }

    #[test]
    fn test_env_vars_preserve_order_and_duplicates() {
        let vars = vec![
            JobVariable::new("B", "1"),
            JobVariable::new("A", "2"),
            JobVariable::new("B", "3"),
        ];

        let env = to_env_vars(&vars);
        let pairs: Vec<(&str, Option<&str>)> = env
            .iter()
            .map(|var| (var.name.as_str(), var.value.as_deref()))
            .collect();
        assert_eq!(
            pairs,
            vec![("B", Some("1")), ("A", Some("2")), ("B", Some("3"))]
        );
    }
}
