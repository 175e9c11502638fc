//! # Build options.
//!
//! [`BuildOptions`] carries the caller-level knobs the orchestrator merges
//! over the seeded defaults at construction time. Anything not covered
//! here can be set through a [`BuildState`] override patch — the hook a
//! thin CLI entry point uses for process-start-time argument overrides.

use crate::store::{BuildState, ReporterKind};

/// Caller-level configuration for one build invocation.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Halt the build if it runs longer than this. `0` disables.
    /// Defaults to one hour when unset.
    pub timeout_seconds: Option<u64>,
    /// Grace window after a stderr chunk before the build gives up.
    /// Defaults to 1000ms when unset; `0` disables.
    pub error_timeout_ms: Option<u64>,
    /// Reporter flavor the presentation layer should provide.
    pub reporter_kind: Option<ReporterKind>,
}

impl BuildOptions {
    /// State patch equivalent of these options.
    pub(crate) fn to_patch(&self) -> BuildState {
        BuildState {
            timeout_seconds: self.timeout_seconds,
            error_timeout_ms: self.error_timeout_ms,
            reporter_kind: self.reporter_kind,
            ..BuildState::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_options_patch_nothing() {
        let patch = BuildOptions::default().to_patch();
        assert!(patch.timeout_seconds.is_none());
        assert!(patch.error_timeout_ms.is_none());
        assert!(patch.reporter_kind.is_none());
    }

    #[test]
    fn set_options_become_state() {
        let patch = BuildOptions {
            timeout_seconds: Some(30),
            error_timeout_ms: Some(0),
            reporter_kind: Some(ReporterKind::TeamCity),
        }
        .to_patch();
        assert_eq!(patch.timeout_seconds, Some(30));
        assert_eq!(patch.error_timeout_ms, Some(0));
        assert_eq!(patch.reporter_kind, Some(ReporterKind::TeamCity));
    }
}
