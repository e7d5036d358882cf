use thiserror::Error;

/// Failure classes of a reconciliation run.
///
/// Everything except `Transient` aborts the run. `Transient` is retried at the
/// point where it happened and only escalates once the attempt budget is spent.
#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("remote command failed on {host}: {reason}")]
    Transient { host: String, reason: String },

    #[error(
        "volume {volume}: transfer failed to every destination candidate: {}",
        candidates.join(", ")
    )]
    PlacementExhausted {
        volume: String,
        candidates: Vec<String>,
    },

    #[error("lookup miss: {0}")]
    LookupMiss(String),
}

impl MigrateError {
    #[inline]
    pub fn is_transient(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<MigrateError>(),
            Some(MigrateError::Transient { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_is_detected_through_anyhow() {
        let err: anyhow::Error = MigrateError::Transient {
            host: "h".into(),
            reason: "exit 255".into(),
        }
        .into();
        assert!(MigrateError::is_transient(&err));

        let fatal: anyhow::Error = MigrateError::LookupMiss("x".into()).into();
        assert!(!MigrateError::is_transient(&fatal));
    }

    #[test]
    fn placement_exhausted_names_all_candidates() {
        let err = MigrateError::PlacementExhausted {
            volume: "vol-1".into(),
            candidates: vec!["/a".into(), "/b".into()],
        };
        assert_eq!(
            err.to_string(),
            "volume vol-1: transfer failed to every destination candidate: /a, /b"
        );
    }
}
