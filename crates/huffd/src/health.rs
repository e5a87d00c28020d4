//! Health status reported on `/health-check`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Health {
    /// Accepting jobs with at least one idle worker
    #[default]
    Ready,
    /// Accepting jobs, but every worker is occupied
    Busy,
    /// Shutdown requested; no new jobs
    ShuttingDown,
}

impl Health {
    pub fn accepts_jobs(&self) -> bool {
        !matches!(self, Self::ShuttingDown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_default_is_ready() {
        assert_eq!(Health::default(), Health::Ready);
    }

    #[test]
    fn health_serializes_screaming_snake_case() {
        insta::assert_json_snapshot!(
            [Health::Ready, Health::Busy, Health::ShuttingDown],
            @r#"
        [
          "READY",
          "BUSY",
          "SHUTTING_DOWN"
        ]
        "#
        );
    }

    #[test]
    fn health_deserializes_screaming_snake_case() {
        assert_eq!(
            serde_json::from_str::<Health>("\"SHUTTING_DOWN\"").unwrap(),
            Health::ShuttingDown
        );
        assert!(Health::Busy.accepts_jobs());
        assert!(!Health::ShuttingDown.accepts_jobs());
    }
}
