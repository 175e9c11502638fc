//! # Command-rewriting helpers for common tool launchers.
//!
//! Thin wrappers that rewrite a [`ProcessSpec`] before handing it to
//! [`run`](crate::ops::run): package-manager launchers get the platform
//! command extension, locally-installed binaries get the
//! `./node_modules/.bin` path treatment, and [`shell`] wraps a whole
//! command line in the platform shell.
//!
//! Rewriting keeps late-bound arguments late-bound: a spec whose args are
//! resolved from state still resolves them at spawn time, with the
//! original command prepended.

use std::sync::Arc;

use crate::ops::combinators::run;
use crate::ops::op::OpRef;
use crate::tasks::{ArgSource, ProcessSpec};

const CMD_EXT: &str = if cfg!(windows) { ".cmd" } else { "" };

/// Moves the spec's command into the front of its argument list and
/// installs `launcher` as the command to spawn.
fn reroute(mut spec: ProcessSpec, launcher: impl Into<String>) -> ProcessSpec {
    let original = std::mem::take(&mut spec.command);
    spec.args = match spec.args {
        ArgSource::Literal(mut args) => {
            args.insert(0, original);
            ArgSource::Literal(args)
        }
        ArgSource::FromState(f) => ArgSource::FromState(Arc::new(move |state| {
            let mut args = f(state);
            args.insert(0, original.clone());
            args
        })),
    };
    spec.command = launcher.into();
    spec
}

/// Runs the spec's command through `npm`.
pub fn npm(spec: ProcessSpec) -> OpRef {
    run(reroute(spec, format!("npm{CMD_EXT}")))
}

/// Runs the spec's command as an `npm run` script.
pub fn npm_run(spec: ProcessSpec) -> OpRef {
    run(reroute(reroute(spec, "run"), format!("npm{CMD_EXT}")))
}

/// Runs the spec's command through `yarn`.
pub fn yarn(spec: ProcessSpec) -> OpRef {
    run(reroute(spec, format!("yarn{CMD_EXT}")))
}

/// Runs the spec's command as a script passed to `node`.
pub fn node(spec: ProcessSpec) -> OpRef {
    run(reroute(spec, "node"))
}

/// Runs a binary installed into the project's `node_modules/.bin`.
pub fn node_bin(mut spec: ProcessSpec) -> OpRef {
    spec.command = bin_path(&spec.command);
    run(spec)
}

fn bin_path(command: &str) -> String {
    let path = format!("./node_modules/.bin/{command}");
    if cfg!(windows) {
        path.replace('/', "\\") + CMD_EXT
    } else {
        path
    }
}

/// Runs the spec's command line through the platform shell
/// (`sh -c` on Unix, `cmd /C` on Windows).
pub fn shell(spec: ProcessSpec) -> OpRef {
    let launcher = if cfg!(windows) { "cmd" } else { "sh" };
    let flag = if cfg!(windows) { "/C" } else { "-c" };
    let mut spec = reroute(spec, launcher);
    spec = match spec.args {
        ArgSource::Literal(mut args) => {
            args.insert(0, flag.to_string());
            spec.args = ArgSource::Literal(args);
            spec
        }
        ArgSource::FromState(f) => {
            let flag = flag.to_string();
            spec.args = ArgSource::FromState(Arc::new(move |state| {
                let mut args = f(state);
                args.insert(0, flag.clone());
                args
            }));
            spec
        }
    };
    run(spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::BuildState;

    fn resolved_args(spec: &ProcessSpec) -> Vec<String> {
        match &spec.args {
            ArgSource::Literal(args) => args.clone(),
            ArgSource::FromState(f) => f(&BuildState::default()),
        }
    }

    #[test]
    fn reroute_prepends_the_original_command() {
        let spec = reroute(ProcessSpec::new("install").args(["--frozen-lockfile"]), "yarn");
        assert_eq!(spec.command, "yarn");
        assert_eq!(resolved_args(&spec), vec!["install", "--frozen-lockfile"]);
    }

    #[test]
    fn reroute_keeps_late_bound_args_late_bound() {
        let spec = ProcessSpec::new("test").args_from_state(|s| {
            vec![s
                .get("suite")
                .and_then(|v| v.as_str())
                .unwrap_or("unit")
                .to_string()]
        });
        let spec = reroute(spec, "npm");
        assert_eq!(spec.command, "npm");
        assert_eq!(resolved_args(&spec), vec!["test", "unit"]);
    }

    #[test]
    fn npm_run_nests_the_script_name_behind_run() {
        // build the rewritten spec the same way npm_run() does
        let spec = reroute(reroute(ProcessSpec::new("lint"), "run"), format!("npm{CMD_EXT}"));
        assert_eq!(resolved_args(&spec), vec!["run", "lint"]);
    }

    #[cfg(unix)]
    #[test]
    fn node_bin_points_into_node_modules() {
        assert_eq!(bin_path("tsc"), "./node_modules/.bin/tsc");
    }
}
