use alloc::string::{String, ToString};
use core::fmt;
use core::str::FromStr;

use burn_core::tensor::{DType, bf16, f16};
use serde::{Deserialize, Serialize};

use crate::error::{CceError, Result};

/// Threshold below which the fused kernel skips gradient contributions of a logit.
///
/// Either an explicit value or a named policy scaled by the machine epsilon of the
/// precision the kernel runs in. See [resolve_eps].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FilterEpsRepr", into = "FilterEpsRepr")]
pub enum FilterEps {
    /// Use this threshold as is.
    Value(f64),
    /// Conservative filtering, the default.
    Auto,
    /// More aggressive filtering, trading a slightly larger numeric deviation for speed.
    High,
}

impl FromStr for FilterEps {
    type Err = CceError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "auto" => Ok(FilterEps::Auto),
            "high" => Ok(FilterEps::High),
            other => Err(CceError::UnknownFilterEps(other.to_string())),
        }
    }
}

impl fmt::Display for FilterEps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterEps::Value(value) => write!(f, "{value}"),
            FilterEps::Auto => f.write_str("auto"),
            FilterEps::High => f.write_str("high"),
        }
    }
}

impl From<f64> for FilterEps {
    fn from(value: f64) -> Self {
        FilterEps::Value(value)
    }
}

impl From<f32> for FilterEps {
    fn from(value: f32) -> Self {
        FilterEps::Value(value as f64)
    }
}

/// Wire form: a bare number or a policy name.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum FilterEpsRepr {
    Value(f64),
    Policy(String),
}

impl TryFrom<FilterEpsRepr> for FilterEps {
    type Error = CceError;

    fn try_from(repr: FilterEpsRepr) -> Result<Self> {
        match repr {
            FilterEpsRepr::Value(value) => Ok(FilterEps::Value(value)),
            FilterEpsRepr::Policy(name) => name.parse(),
        }
    }
}

impl From<FilterEps> for FilterEpsRepr {
    fn from(eps: FilterEps) -> Self {
        match eps {
            FilterEps::Value(value) => FilterEpsRepr::Value(value),
            policy => FilterEpsRepr::Policy(policy.to_string()),
        }
    }
}

/// Machine epsilon of a floating point `dtype`: the gap between `1.0` and the next
/// representable value.
pub fn machine_epsilon(dtype: DType) -> Result<f64> {
    match dtype {
        DType::F64 => Ok(f64::EPSILON),
        DType::F32 | DType::Flex32 => Ok(f32::EPSILON as f64),
        DType::F16 => Ok(f16::EPSILON.to_f64()),
        DType::BF16 => Ok(bf16::EPSILON.to_f64()),
        other => Err(CceError::UnsupportedDType(other)),
    }
}

/// Resolves the filter threshold for logits computed in `dtype`.
///
/// | policy | `bf16` | other floats |
/// |--------|--------|--------------|
/// | `auto` | `eps / 8` | `eps / 10` |
/// | `high` | `eps / 10` | `eps / 12` |
///
/// An explicit value is returned unchanged and `None` disables filtering. `bf16` keeps
/// only 8 bits of precision, so it gets the larger threshold.
pub fn resolve_eps(filter_eps: Option<&FilterEps>, dtype: DType) -> Result<Option<f64>> {
    let divisor = match filter_eps {
        None => return Ok(None),
        Some(FilterEps::Value(value)) => return Ok(Some(*value)),
        Some(FilterEps::Auto) if dtype == DType::BF16 => 8.0,
        Some(FilterEps::Auto) => 10.0,
        Some(FilterEps::High) if dtype == DType::BF16 => 10.0,
        Some(FilterEps::High) => 12.0,
    };

    let eps = machine_epsilon(dtype)? / divisor;
    log::debug!("Resolved filter eps {eps:e} for {dtype:?}");

    Ok(Some(eps))
}

/// Same as [resolve_eps] with the policy given by name.
///
/// Fails with [CceError::UnknownFilterEps] if the name is not `auto` or `high`.
pub fn resolve_eps_str(filter_eps: Option<&str>, dtype: DType) -> Result<Option<f64>> {
    let filter_eps = filter_eps.map(FilterEps::from_str).transpose()?;
    resolve_eps(filter_eps.as_ref(), dtype)
}
