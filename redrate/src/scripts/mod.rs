//! Atomic procedure registry
//!
//! The three limiting algorithms run on the store as Lua procedures. They are
//! invoked by SHA-1 identity (`EVALSHA`) rather than by re-sending their
//! bodies, so the store must have them cached. [`Scripts`] owns the sources and
//! identities and knows how to check for and register them.

use crate::error::{Error, Result};
use crate::store::{Cmd, Connection, Value};
use sha1::{Digest, Sha1};
use std::fmt;
use tracing::{debug, info};

const ALLOW_N_SOURCE: &str = include_str!("allow_n.lua");
const ALLOW_AT_MOST_SOURCE: &str = include_str!("allow_at_most.lua");
const CONCURRENCY_TAKE_SOURCE: &str = include_str!("concurrency_take.lua");

/// Procedure family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScriptKind {
    /// Strict token bucket admission
    AllowN,
    /// Partial token bucket admission
    AllowAtMost,
    /// Lease acquire/refresh
    ConcurrencyTake,
}

impl ScriptKind {
    /// All families, in the order existence checks are issued
    pub const ALL: [ScriptKind; 3] = [
        ScriptKind::AllowN,
        ScriptKind::AllowAtMost,
        ScriptKind::ConcurrencyTake,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ScriptKind::AllowN => "allow_n",
            ScriptKind::AllowAtMost => "allow_at_most",
            ScriptKind::ConcurrencyTake => "concurrency_take",
        }
    }

    fn source(&self) -> &'static str {
        match self {
            ScriptKind::AllowN => ALLOW_N_SOURCE,
            ScriptKind::AllowAtMost => ALLOW_AT_MOST_SOURCE,
            ScriptKind::ConcurrencyTake => CONCURRENCY_TAKE_SOURCE,
        }
    }
}

impl fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One procedure: its body and content identity
#[derive(Debug, Clone)]
pub struct Script {
    kind: ScriptKind,
    source: &'static str,
    sha: String,
}

impl Script {
    fn new(kind: ScriptKind) -> Self {
        let source = kind.source();
        Self {
            kind,
            source,
            sha: sha1_hex(source),
        }
    }

    pub fn kind(&self) -> ScriptKind {
        self.kind
    }

    pub fn source(&self) -> &str {
        self.source
    }

    /// Lowercase hex SHA-1 of the source, as the store computes it
    pub fn sha(&self) -> &str {
        &self.sha
    }
}

/// Registry of the procedures a limiter invokes
#[derive(Debug, Clone)]
pub struct Scripts {
    scripts: [Script; 3],
}

impl Default for Scripts {
    fn default() -> Self {
        Self::new()
    }
}

impl Scripts {
    pub fn new() -> Self {
        Self {
            scripts: ScriptKind::ALL.map(Script::new),
        }
    }

    pub fn get(&self, kind: ScriptKind) -> &Script {
        // ALL is declared in the same order as `scripts`
        &self.scripts[kind as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Script> {
        self.scripts.iter()
    }

    /// Family whose identity is `sha`, if any
    pub fn kind_of(&self, sha: &str) -> Option<ScriptKind> {
        self.scripts
            .iter()
            .find(|s| s.sha.eq_ignore_ascii_case(sha))
            .map(|s| s.kind)
    }

    /// `SCRIPT EXISTS` check for one family
    pub fn exists_cmd(&self, kind: ScriptKind) -> Cmd {
        Cmd::new("SCRIPT").arg("EXISTS").arg(self.get(kind).sha())
    }

    /// `EVALSHA` invocation against a single key
    pub fn invoke_cmd(&self, kind: ScriptKind, key: &str, args: &[String]) -> Cmd {
        let mut cmd = Cmd::new("EVALSHA").arg(self.get(kind).sha()).arg(1).arg(key);
        for arg in args {
            cmd = cmd.arg(arg);
        }
        cmd
    }

    /// Register every procedure with the store in one round trip
    ///
    /// The identity the store reports back must match the local one, otherwise
    /// later invocations could never succeed.
    pub async fn load<C: Connection + ?Sized>(&self, conn: &C) -> Result<()> {
        let cmds: Vec<Cmd> = self
            .scripts
            .iter()
            .map(|s| Cmd::new("SCRIPT").arg("LOAD").arg(s.source))
            .collect();

        let replies = conn.pipeline(&cmds).await?;
        if replies.len() != cmds.len() {
            return Err(Error::MalformedReply(format!(
                "SCRIPT LOAD: expected {} replies, got {}",
                cmds.len(),
                replies.len()
            )));
        }

        for (script, reply) in self.scripts.iter().zip(replies) {
            match reply {
                Value::Data(sha) | Value::Status(sha) if sha.eq_ignore_ascii_case(&script.sha) => {
                    debug!("Loaded script {} as {}", script.kind, sha);
                }
                Value::Data(sha) | Value::Status(sha) => {
                    return Err(Error::MalformedReply(format!(
                        "SCRIPT LOAD {}: store reported identity {}, expected {}",
                        script.kind, sha, script.sha
                    )));
                }
                Value::Error(msg) => {
                    return Err(Error::Command(format!(
                        "SCRIPT LOAD {}: {}",
                        script.kind, msg
                    )));
                }
                other => {
                    return Err(Error::MalformedReply(format!(
                        "SCRIPT LOAD {}: unexpected reply {:?}",
                        script.kind, other
                    )));
                }
            }
        }

        info!("Registered {} scripts with the store", self.scripts.len());
        Ok(())
    }
}

pub(crate) fn sha1_hex(source: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(source.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha1_known_vector() {
        // sha1("") and sha1("abc") from FIPS 180
        assert_eq!(sha1_hex(""), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
        assert_eq!(sha1_hex("abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn test_registry_identities() {
        let scripts = Scripts::new();
        for kind in ScriptKind::ALL {
            let script = scripts.get(kind);
            assert_eq!(script.kind(), kind);
            assert_eq!(script.sha().len(), 40);
            assert_eq!(script.sha(), sha1_hex(script.source()));
            assert_eq!(scripts.kind_of(script.sha()), Some(kind));
        }
        assert_eq!(scripts.kind_of("0000"), None);
    }

    #[test]
    fn test_identities_are_distinct() {
        let scripts = Scripts::new();
        let shas: std::collections::HashSet<_> = scripts.iter().map(|s| s.sha()).collect();
        assert_eq!(shas.len(), 3);
    }

    #[test]
    fn test_commands() {
        let scripts = Scripts::new();
        let sha = scripts.get(ScriptKind::AllowN).sha().to_string();

        let exists = scripts.exists_cmd(ScriptKind::AllowN);
        assert_eq!(exists.args(), &["SCRIPT", "EXISTS", sha.as_str()]);

        let invoke = scripts.invoke_cmd(
            ScriptKind::AllowN,
            "rate:user",
            &["10".to_string(), "5".to_string()],
        );
        assert_eq!(
            invoke.args(),
            &["EVALSHA", sha.as_str(), "1", "rate:user", "10", "5"]
        );
    }
}
