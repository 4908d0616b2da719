use std::collections::HashMap;
use std::process::Command as Process;

use thiserror::Error;

use crate::tokenize::tokenize;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("command {index} ({command:?}) failed with exit code {code}: {output}")]
    NonZeroExit {
        index: usize,
        command: String,
        code: i32,
        output: String,
    },
    #[error("command {index} ({command:?}) could not be started: {source}")]
    Spawn {
        index: usize,
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("command {index} ({command:?}) is malformed: {source}")]
    Malformed {
        index: usize,
        command: String,
        #[source]
        source: crate::tokenize::TokenizeError,
    },
}

/// Substitutes `%(name)s`-style named parameters into `template`.
pub fn substitute(template: &str, subs: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let bytes = template.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && template[i..].starts_with("%(") {
            if let Some(close) = template[i..].find(")s") {
                let name = &template[i + 2..i + close];
                if let Some(value) = subs.get(name) {
                    out.push_str(value);
                    i += close + 2;
                    continue;
                }
            }
        }
        out.push(template[i..].chars().next().unwrap());
        i += template[i..].chars().next().unwrap().len_utf8();
    }
    out
}

/// Runs an ordered list of command templates, substituting named
/// parameters and tokenizing without a shell.
///
/// In `strict` mode a nonzero exit aborts the sequence immediately and
/// returns the error; commands after the failing one are never run. In
/// lenient mode nonzero exits are tolerated, but a missing executable is
/// still a hard failure.
pub struct CommandRunner;

impl CommandRunner {
    pub fn run(templates: &[&str], subs: &HashMap<String, String>) -> Result<Vec<String>, CommandError> {
        Self::execute(templates, subs, true)
    }

    pub fn run_lenient(
        templates: &[&str],
        subs: &HashMap<String, String>,
    ) -> Result<Vec<String>, CommandError> {
        Self::execute(templates, subs, false)
    }

    fn execute(
        templates: &[&str],
        subs: &HashMap<String, String>,
        strict: bool,
    ) -> Result<Vec<String>, CommandError> {
        let mut results = Vec::with_capacity(templates.len());
        for (index, template) in templates.iter().enumerate() {
            let command = substitute(template, subs);
            let argv = tokenize(&command).map_err(|source| CommandError::Malformed {
                index,
                command: command.clone(),
                source,
            })?;
            if argv.is_empty() {
                results.push(String::new());
                continue;
            }
            tracing::debug!(index, command = %command, "running command");
            let output = Process::new(&argv[0])
                .args(&argv[1..])
                .output()
                .map_err(|source| CommandError::Spawn {
                    index,
                    command: command.clone(),
                    source,
                })?;
            // stdout and stderr are captured on separate pipes by
            // `Command::output`; merge them into one stream here so callers
            // see the same combined output a shell's `2>&1` would give them.
            let mut merged = String::from_utf8_lossy(&output.stdout).into_owned();
            merged.push_str(&String::from_utf8_lossy(&output.stderr));
            let code = output.status.code().unwrap_or(-1);
            tracing::debug!(index, code, "command finished");
            if !output.status.success() && strict {
                return Err(CommandError::NonZeroExit {
                    index,
                    command,
                    code,
                    output: merged,
                });
            }
            results.push(merged);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_named_parameters() {
        let mut subs = HashMap::new();
        subs.insert("iface".to_string(), "eth1".to_string());
        subs.insert("mark".to_string(), "0x20000000".to_string());
        assert_eq!(
            substitute("tc qdisc del dev %(iface)s root", &subs),
            "tc qdisc del dev eth1 root"
        );
        assert_eq!(
            substitute("mark=%(mark)s mark again %(mark)s", &subs),
            "mark=0x20000000 mark again 0x20000000"
        );
    }

    #[test]
    fn strict_mode_stops_at_first_failure() {
        let subs = HashMap::new();
        let templates = ["true", "false", "true"];
        let err = CommandRunner::run(&templates, &subs).unwrap_err();
        assert!(matches!(err, CommandError::NonZeroExit { index: 1, .. }));
    }

    #[test]
    fn lenient_mode_tolerates_nonzero_exit() {
        let subs = HashMap::new();
        let templates = ["true", "false", "true"];
        let results = CommandRunner::run_lenient(&templates, &subs).unwrap();
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn missing_executable_fails_even_when_lenient() {
        let subs = HashMap::new();
        let templates = ["this-binary-should-not-exist-anywhere"];
        let err = CommandRunner::run_lenient(&templates, &subs).unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));
    }
}
