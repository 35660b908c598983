use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RefitResult<T> = Result<T, RefitError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefitErrorCategory {
    Configuration,
    MissingCalibration,
    Skipped,
    ConvergenceFailure,
    InvariantViolation,
}

impl RefitErrorCategory {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "ConfigurationError",
            Self::MissingCalibration => "MissingCalibration",
            Self::Skipped => "Skipped",
            Self::ConvergenceFailure => "ConvergenceFailure",
            Self::InvariantViolation => "InvariantViolation",
        }
    }

    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Configuration => 2,
            Self::MissingCalibration | Self::Skipped => 0,
            Self::ConvergenceFailure => 4,
            Self::InvariantViolation => 5,
        }
    }

    /// Fatal categories abort the pipeline; the rest only affect one event.
    pub const fn is_fatal(self) -> bool {
        matches!(self, Self::Configuration | Self::InvariantViolation)
    }
}

impl Display for RefitErrorCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str((*self).as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefitError {
    category: RefitErrorCategory,
    placeholder: &'static str,
    message: String,
}

impl RefitError {
    pub fn new(
        category: RefitErrorCategory,
        placeholder: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            placeholder,
            message: message.into(),
        }
    }

    pub fn configuration(placeholder: &'static str, message: impl Into<String>) -> Self {
        Self::new(RefitErrorCategory::Configuration, placeholder, message)
    }

    pub fn missing_calibration(placeholder: &'static str, message: impl Into<String>) -> Self {
        Self::new(RefitErrorCategory::MissingCalibration, placeholder, message)
    }

    pub fn skipped(placeholder: &'static str, message: impl Into<String>) -> Self {
        Self::new(RefitErrorCategory::Skipped, placeholder, message)
    }

    pub fn convergence_failure(placeholder: &'static str, message: impl Into<String>) -> Self {
        Self::new(RefitErrorCategory::ConvergenceFailure, placeholder, message)
    }

    pub fn invariant_violation(placeholder: &'static str, message: impl Into<String>) -> Self {
        Self::new(RefitErrorCategory::InvariantViolation, placeholder, message)
    }

    pub const fn category(&self) -> RefitErrorCategory {
        self.category
    }

    pub const fn placeholder(&self) -> &'static str {
        self.placeholder
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn is_fatal(&self) -> bool {
        self.category.is_fatal()
    }

    pub const fn exit_code(&self) -> i32 {
        self.category.exit_code()
    }

    pub fn diagnostic_line(&self) -> String {
        let severity = if self.category.is_fatal() {
            "ERROR"
        } else {
            "WARNING"
        };
        format!("{}: [{}] {}", severity, self.placeholder, self.message)
    }
}

impl Display for RefitError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}] {}",
            self.category.as_str(),
            self.placeholder,
            self.message
        )
    }
}

impl Error for RefitError {}
