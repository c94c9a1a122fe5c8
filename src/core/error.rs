use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("failed to read config {path}: {message}")]
    Read { path: String, message: String },
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("bad age spec {spec:?}: token {token:?} is not N, N-M or N-")]
    AgeSpec { spec: String, token: String },
    #[error("missing required field `{0}`")]
    Missing(&'static str),
    #[error("invalid `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PlanError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("no feasible plan: {0}")]
    ModelInfeasible(String),
    #[error("solver did not converge: {0}")]
    NumericNonconvergence(String),
    #[error(
        "tax mismatch at age {age}: solver carried {solved:.2}, replay computed {recomputed:.2}"
    )]
    InternalInconsistency {
        age: u32,
        solved: f64,
        recomputed: f64,
    },
}
