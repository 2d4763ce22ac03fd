//! Validation report: the three-pass health check over a profile.

use std::fmt;

/// How bad a finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// One finding from a validation pass.
#[derive(Debug, Clone)]
pub struct Issue {
    pub severity: Severity,
    pub message: String,
}

impl Issue {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "[{}] {}", tag, self.message)
    }
}

/// Aggregate of the structural, per-field, and cross-field passes.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub structural: Vec<Issue>,
    pub fields: Vec<Issue>,
    pub cross: Vec<Issue>,
}

impl ValidationReport {
    pub fn issues(&self) -> impl Iterator<Item = &Issue> {
        self.structural
            .iter()
            .chain(self.fields.iter())
            .chain(self.cross.iter())
    }

    pub fn error_count(&self) -> usize {
        self.issues()
            .filter(|i| i.severity == Severity::Error)
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.issues()
            .filter(|i| i.severity == Severity::Warning)
            .count()
    }

    /// True when no pass produced an error (warnings are acceptable).
    pub fn is_ok(&self) -> bool {
        self.error_count() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warnings_do_not_fail_the_report() {
        let mut report = ValidationReport::default();
        report.cross.push(Issue::warning("privileged broadcast port"));
        assert!(report.is_ok());
        assert_eq!(report.warning_count(), 1);

        report.fields.push(Issue::error("bad port"));
        assert!(!report.is_ok());
        assert_eq!(report.error_count(), 1);
    }
}
