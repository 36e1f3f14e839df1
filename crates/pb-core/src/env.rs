//! Remote environment reconstruction
//!
//! The remote container's environment is read by running `env` inside it
//! and parsing the dump. Values may contain embedded newlines, so a line
//! without a `KEY=value` split is treated as a continuation of the
//! previous key's value rather than a parse error.

use std::collections::HashMap;

use crate::types::RemoteIdentity;

/// Variables set by the proxy image's base layer; meaningless or
/// conflicting when applied locally.
const STRIPPED_VARS: [&str; 3] = ["HOME", "PATH", "HOSTNAME"];

/// Environment surfaced to the eventual local/container command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionEnvironment {
    vars: HashMap<String, String>,
}

impl SessionEnvironment {
    /// Build the session environment from a raw remote `env` dump.
    ///
    /// Strips host-specific variables and adds the two session-identifying
    /// entries naming the pod and container.
    pub fn from_remote(dump: &str, identity: &RemoteIdentity) -> Self {
        let mut vars = parse_env_dump(dump);
        for key in STRIPPED_VARS {
            vars.remove(key);
        }
        vars.insert(
            "TELEPRESENCE_POD".to_string(),
            identity.pod_name.clone(),
        );
        vars.insert(
            "TELEPRESENCE_CONTAINER".to_string(),
            identity.container_name.clone(),
        );
        Self { vars }
    }

    /// The environment when remote retrieval never succeeded: empty but
    /// for the session-identifying entries.
    pub fn empty_for(identity: &RemoteIdentity) -> Self {
        Self::from_remote("", identity)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.vars.iter()
    }
}

/// Parse an `env` dump into a key/value mapping.
///
/// Each line is split on the first `=`. A line lacking a split is a
/// continuation of the most recently seen key's value and is appended
/// with a preceding newline. Continuation lines before any key are
/// dropped.
pub fn parse_env_dump(dump: &str) -> HashMap<String, String> {
    let mut result = HashMap::new();
    let mut prior_key: Option<String> = None;
    for line in dump.lines() {
        match line.split_once('=') {
            Some((key, value)) => {
                result.insert(key.to_string(), value.to_string());
                prior_key = Some(key.to_string());
            }
            None => {
                // Prior key's value contains one or more newlines
                if let Some(key) = &prior_key {
                    if let Some(value) = result.get_mut(key) {
                        value.push('\n');
                        value.push_str(line);
                    }
                }
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DeploymentKind;

    fn identity() -> RemoteIdentity {
        RemoteIdentity {
            namespace: "default".to_string(),
            pod_name: "web-1234".to_string(),
            container_name: "web".to_string(),
            kind: DeploymentKind::Deployment,
            run_id: None,
        }
    }

    #[test]
    fn test_parse_simple_dump() {
        let parsed = parse_env_dump("A=1\nB=2\n");
        assert_eq!(parsed.get("A").unwrap(), "1");
        assert_eq!(parsed.get("B").unwrap(), "2");
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn test_parse_continuation_lines() {
        let parsed = parse_env_dump("A=1\nB=2\nC=line1\ncontinued\nD=4");
        assert_eq!(parsed.get("A").unwrap(), "1");
        assert_eq!(parsed.get("B").unwrap(), "2");
        assert_eq!(parsed.get("C").unwrap(), "line1\ncontinued");
        assert_eq!(parsed.get("D").unwrap(), "4");
    }

    #[test]
    fn test_parse_is_idempotent() {
        let parsed = parse_env_dump("A=1\nC=line1\ncontinued\nD=4");
        // Reconstruct a dump from the mapping and re-parse
        let mut keys: Vec<_> = parsed.keys().collect();
        keys.sort();
        let rejoined: String = keys
            .iter()
            .map(|k| format!("{}={}\n", k, parsed[*k]))
            .collect();
        assert_eq!(parse_env_dump(&rejoined), parsed);
    }

    #[test]
    fn test_leading_continuation_dropped() {
        let parsed = parse_env_dump("orphan line\nA=1");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed.get("A").unwrap(), "1");
    }

    #[test]
    fn test_value_with_equals_kept_whole() {
        let parsed = parse_env_dump("OPTS=-Dkey=value");
        assert_eq!(parsed.get("OPTS").unwrap(), "-Dkey=value");
    }

    #[test]
    fn test_host_vars_stripped_and_synthetic_added() {
        let env = SessionEnvironment::from_remote(
            "HOME=/root\nPATH=/usr/bin\nHOSTNAME=web-1234\nDB_URL=postgres://db\n",
            &identity(),
        );
        assert!(!env.contains("HOME"));
        assert!(!env.contains("PATH"));
        assert!(!env.contains("HOSTNAME"));
        assert_eq!(env.get("DB_URL").unwrap(), "postgres://db");
        assert_eq!(env.get("TELEPRESENCE_POD").unwrap(), "web-1234");
        assert_eq!(env.get("TELEPRESENCE_CONTAINER").unwrap(), "web");
    }

    #[test]
    fn test_empty_environment_keeps_synthetic_vars() {
        let env = SessionEnvironment::empty_for(&identity());
        assert_eq!(env.len(), 2);
        assert!(env.contains("TELEPRESENCE_POD"));
        assert!(env.contains("TELEPRESENCE_CONTAINER"));
    }
}
