//! Cache-miss recovery protocol
//!
//! Every batch that invokes procedures is sent together with one `SCRIPT
//! EXISTS` check per procedure family it uses. If any check reports the
//! procedure missing, or any invocation comes back `NOSCRIPT`, the replies of
//! that round trip are discarded, all procedures are registered again and the
//! identical batch is resubmitted. The number of reloads is bounded.

use crate::error::{Error, Result};
use crate::reply::decode_exists;
use crate::scripts::{ScriptKind, Scripts};
use crate::store::{Cmd, Connection, Value};
use tracing::{debug, error, warn};

/// Maximum number of reload cycles before a batch fails
pub const MAX_SCRIPT_RELOADS: u32 = 10;

/// Commands for one round trip, plus the procedure families they invoke
#[derive(Debug, Clone, Default)]
pub(crate) struct Batch {
    families: Vec<ScriptKind>,
    commands: Vec<Cmd>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a command; `family` is the procedure it invokes, if any
    pub fn push(&mut self, family: Option<ScriptKind>, cmd: Cmd) {
        if let Some(kind) = family {
            if !self.families.contains(&kind) {
                self.families.push(kind);
                self.families.sort();
            }
        }
        self.commands.push(cmd);
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Existence checks first, then the queued commands in order
    fn round_trip_commands(&self, scripts: &Scripts) -> Vec<Cmd> {
        let mut cmds = Vec::with_capacity(self.families.len() + self.commands.len());
        cmds.extend(self.families.iter().map(|kind| scripts.exists_cmd(*kind)));
        cmds.extend(self.commands.iter().cloned());
        cmds
    }
}

enum Attempt {
    Done(Vec<Value>),
    Miss,
}

/// Run `batch`, reloading procedures on a cache miss
///
/// Returns one reply per queued command (existence replies stripped). A transport
/// failure or a malformed existence reply fails immediately without retry.
pub(crate) async fn execute<C: Connection + ?Sized>(
    conn: &C,
    scripts: &Scripts,
    batch: &Batch,
) -> Result<Vec<Value>> {
    if batch.is_empty() {
        return Ok(Vec::new());
    }

    let cmds = batch.round_trip_commands(scripts);
    let mut reloads = 0;

    loop {
        match attempt(conn, &cmds, batch.families.len()).await? {
            Attempt::Done(replies) => return Ok(replies),
            Attempt::Miss if reloads >= MAX_SCRIPT_RELOADS => {
                error!(
                    "Scripts still missing after {} reloads, giving up on batch of {} commands",
                    reloads,
                    batch.len()
                );
                return Err(Error::TooManyRetries { reloads });
            }
            Attempt::Miss => {
                reloads += 1;
                warn!(
                    "Script cache miss, reloading scripts (attempt {}/{})",
                    reloads, MAX_SCRIPT_RELOADS
                );
                scripts.load(conn).await?;
            }
        }
    }
}

async fn attempt<C: Connection + ?Sized>(
    conn: &C,
    cmds: &[Cmd],
    checks: usize,
) -> Result<Attempt> {
    debug!(
        "Sending round trip with {} commands ({} existence checks)",
        cmds.len(),
        checks
    );

    let mut replies = conn.pipeline(cmds).await?;
    if replies.len() != cmds.len() {
        return Err(Error::MalformedReply(format!(
            "expected {} replies, got {}",
            cmds.len(),
            replies.len()
        )));
    }

    let results = replies.split_off(checks);

    let mut missing = false;
    for exists in &replies {
        if !decode_exists(exists)? {
            missing = true;
        }
    }
    if missing || results.iter().any(Value::is_noscript) {
        return Ok(Attempt::Miss);
    }

    Ok(Attempt::Done(results))
}
