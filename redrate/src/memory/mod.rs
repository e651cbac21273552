//! In-process store double
//!
//! [`MemoryStore`] speaks the subset of the Redis command set the limiter, the
//! procedures and a client handshake use, and runs the three limiting
//! procedures through native models instead of Lua. Procedures are recognised by identity, so `SCRIPT
//! EXISTS`, `SCRIPT LOAD`, `SCRIPT FLUSH` and `NOSCRIPT` behave as on a real
//! store, including cache eviction.
//!
//! The clock is manual: it starts at the current whole second and only moves
//! through [`MemoryStore::advance`]. Faults can be injected to exercise the
//! recovery paths.
//!
//! # Example
//!
//! ```
//! use redrate::memory::MemoryStore;
//! use redrate::{Limit, Limiter};
//!
//! # tokio_test::block_on(async {
//! let store = MemoryStore::new();
//! let limiter = Limiter::with_defaults(store.clone());
//!
//! let res = limiter.allow("user:1", Limit::per_second(10)).await.unwrap();
//! assert_eq!(res.allowed, 1);
//! assert_eq!(res.remaining, 9);
//! # });
//! ```

pub(crate) mod model;

use crate::error::TransportError;
use crate::scripts::{ScriptKind, Scripts, sha1_hex};
use crate::store::{Cmd, Connection, Value};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Offset used by the rate procedures for their clock
const JAN_1_2017: f64 = 1_483_228_800.0;

#[derive(Debug, Clone)]
enum Data {
    Str(String),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Entry {
    data: Data,
    /// Unix seconds
    expires_at: Option<f64>,
}

#[derive(Debug)]
struct Inner {
    keys: HashMap<String, Entry>,
    loaded: HashSet<String>,
    registry: Scripts,
    /// Unix seconds
    now: f64,
    evict_every_round_trip: bool,
    malformed_exists: bool,
    fail_next: usize,
    round_trips: usize,
    script_loads: usize,
    last_round_trip: Vec<Cmd>,
}

/// Shared in-memory store; clones share state
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as f64)
            .unwrap_or(JAN_1_2017);
        Self::starting_at(now)
    }

    /// A store whose clock reads `unix_secs`, for runs that must agree exactly
    pub fn starting_at(unix_secs: f64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                keys: HashMap::new(),
                loaded: HashSet::new(),
                registry: Scripts::new(),
                now: unix_secs,
                evict_every_round_trip: false,
                malformed_exists: false,
                fail_next: 0,
                round_trips: 0,
                script_loads: 0,
                last_round_trip: Vec::new(),
            })),
        }
    }

    /// Move the store clock forward
    pub fn advance(&self, by: Duration) {
        self.inner.lock().now += by.as_secs_f64();
    }

    /// Drop every cached procedure, as after a restart
    pub fn flush_scripts(&self) {
        self.inner.lock().loaded.clear();
    }

    /// Drop every cached procedure at the start of each round trip
    pub fn evict_scripts_every_round_trip(&self, enabled: bool) {
        self.inner.lock().evict_every_round_trip = enabled;
    }

    /// Answer `SCRIPT EXISTS` with an empty array
    pub fn malformed_exists_replies(&self, enabled: bool) {
        self.inner.lock().malformed_exists = enabled;
    }

    /// Fail the next `n` round trips with [`TransportError::ConnectionClosed`]
    pub fn fail_next_round_trips(&self, n: usize) {
        self.inner.lock().fail_next = n;
    }

    /// Round trips attempted so far, failed ones included
    pub fn round_trips(&self) -> usize {
        self.inner.lock().round_trips
    }

    /// `SCRIPT LOAD` commands executed so far
    pub fn script_loads(&self) -> usize {
        self.inner.lock().script_loads
    }

    /// Commands of the most recent round trip
    pub fn last_round_trip(&self) -> Vec<Cmd> {
        self.inner.lock().last_round_trip.clone()
    }

    /// Whether `key` currently exists
    pub fn contains_key(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        inner.purge_if_expired(key);
        inner.keys.contains_key(key)
    }

    /// Execute `cmds` as one round trip
    pub fn execute(&self, cmds: &[Cmd]) -> Result<Vec<Value>, TransportError> {
        let mut inner = self.inner.lock();
        inner.round_trips += 1;
        inner.last_round_trip = cmds.to_vec();

        if inner.fail_next > 0 {
            inner.fail_next -= 1;
            return Err(TransportError::ConnectionClosed);
        }
        if inner.evict_every_round_trip {
            inner.loaded.clear();
        }

        Ok(cmds.iter().map(|cmd| inner.dispatch(cmd)).collect())
    }
}

#[async_trait]
impl Connection for MemoryStore {
    async fn pipeline(&self, cmds: &[Cmd]) -> Result<Vec<Value>, TransportError> {
        self.execute(cmds)
    }
}

fn err(msg: impl Into<String>) -> Value {
    Value::Error(msg.into())
}

fn wrong_type() -> Value {
    err("WRONGTYPE Operation against a key holding the wrong kind of value")
}

fn wrong_args(name: &str) -> Value {
    err(format!(
        "ERR wrong number of arguments for '{}' command",
        name.to_lowercase()
    ))
}

impl Inner {
    fn purge_if_expired(&mut self, key: &str) {
        let now = self.now;
        if let Some(entry) = self.keys.get(key) {
            if entry.expires_at.is_some_and(|at| at <= now) {
                self.keys.remove(key);
            }
        }
    }

    fn entry(&mut self, key: &str) -> Option<&mut Entry> {
        self.purge_if_expired(key);
        self.keys.get_mut(key)
    }

    fn dispatch(&mut self, cmd: &Cmd) -> Value {
        let Some((_, args)) = cmd.args().split_first() else {
            return err("ERR empty command");
        };
        let name = cmd.name();
        match name.as_str() {
            "PING" => Value::Status("PONG".to_string()),
            "AUTH" | "SELECT" | "CLIENT" => Value::Status("OK".to_string()),
            "TIME" => self.time(),
            "GET" => self.get(args),
            "SET" => self.set(args),
            "DEL" => self.del(args),
            "EXPIRE" => self.expire(args),
            "TTL" => self.ttl(args),
            "HGET" => self.hget(args),
            "HSET" => self.hset(args),
            "HDEL" => self.hdel(args),
            "HLEN" => self.hlen(args),
            "HGETALL" => self.hgetall(args),
            "SCRIPT" => self.script(args),
            "EVALSHA" => self.evalsha(args),
            _ => err(format!("ERR unknown command '{}'", name.to_lowercase())),
        }
    }

    fn time(&self) -> Value {
        let secs = self.now.floor();
        let micros = ((self.now - secs) * 1_000_000.0).floor();
        Value::Array(vec![
            Value::Data((secs as i64).to_string()),
            Value::Data((micros as i64).to_string()),
        ])
    }

    fn get(&mut self, args: &[String]) -> Value {
        let [key] = args else {
            return wrong_args("GET");
        };
        match self.entry(key) {
            None => Value::Nil,
            Some(Entry {
                data: Data::Str(s), ..
            }) => Value::Data(s.clone()),
            Some(_) => wrong_type(),
        }
    }

    fn set(&mut self, args: &[String]) -> Value {
        let (key, value, expires_at) = match args {
            [key, value] => (key, value, None),
            [key, value, opt, secs] if opt.eq_ignore_ascii_case("EX") => {
                match secs.parse::<u64>() {
                    Ok(secs) if secs > 0 => (key, value, Some(self.now + secs as f64)),
                    _ => return err("ERR invalid expire time in 'set' command"),
                }
            }
            _ => return err("ERR syntax error"),
        };
        self.keys.insert(
            key.clone(),
            Entry {
                data: Data::Str(value.clone()),
                expires_at,
            },
        );
        Value::Status("OK".to_string())
    }

    fn del(&mut self, args: &[String]) -> Value {
        if args.is_empty() {
            return wrong_args("DEL");
        }
        let mut removed = 0;
        for key in args {
            if self.entry(key).is_some() {
                self.keys.remove(key);
                removed += 1;
            }
        }
        Value::Int(removed)
    }

    fn expire(&mut self, args: &[String]) -> Value {
        let [key, secs] = args else {
            return wrong_args("EXPIRE");
        };
        let Ok(secs) = secs.parse::<i64>() else {
            return err("ERR value is not an integer or out of range");
        };
        let now = self.now;
        match self.entry(key) {
            Some(entry) => {
                entry.expires_at = Some(now + secs as f64);
                Value::Int(1)
            }
            None => Value::Int(0),
        }
    }

    fn ttl(&mut self, args: &[String]) -> Value {
        let [key] = args else {
            return wrong_args("TTL");
        };
        let now = self.now;
        match self.entry(key) {
            None => Value::Int(-2),
            Some(Entry {
                expires_at: None, ..
            }) => Value::Int(-1),
            Some(Entry {
                expires_at: Some(at),
                ..
            }) => Value::Int((*at - now).round() as i64),
        }
    }

    fn hash(&mut self, key: &str) -> Result<Option<&mut HashMap<String, String>>, Value> {
        match self.entry(key) {
            None => Ok(None),
            Some(Entry {
                data: Data::Hash(h),
                ..
            }) => Ok(Some(h)),
            Some(_) => Err(wrong_type()),
        }
    }

    fn hget(&mut self, args: &[String]) -> Value {
        let [key, field] = args else {
            return wrong_args("HGET");
        };
        match self.hash(key) {
            Ok(Some(h)) => h.get(field).cloned().map_or(Value::Nil, Value::Data),
            Ok(None) => Value::Nil,
            Err(e) => e,
        }
    }

    fn hset(&mut self, args: &[String]) -> Value {
        if args.len() < 3 || args.len() % 2 == 0 {
            return wrong_args("HSET");
        }
        let key = &args[0];
        match self.hash(key) {
            Err(e) => return e,
            Ok(None) => {
                self.keys.insert(
                    key.clone(),
                    Entry {
                        data: Data::Hash(HashMap::new()),
                        expires_at: None,
                    },
                );
            }
            Ok(Some(_)) => {}
        }
        let Ok(Some(h)) = self.hash(key) else {
            return wrong_type();
        };
        let mut added = 0;
        for pair in args[1..].chunks(2) {
            if h.insert(pair[0].clone(), pair[1].clone()).is_none() {
                added += 1;
            }
        }
        Value::Int(added)
    }

    fn hdel(&mut self, args: &[String]) -> Value {
        if args.len() < 2 {
            return wrong_args("HDEL");
        }
        let key = &args[0];
        let (removed, now_empty) = match self.hash(key) {
            Err(e) => return e,
            Ok(None) => return Value::Int(0),
            Ok(Some(h)) => {
                let removed = args[1..]
                    .iter()
                    .filter(|field| h.remove(*field).is_some())
                    .count();
                (removed, h.is_empty())
            }
        };
        if now_empty {
            self.keys.remove(key);
        }
        Value::Int(removed as i64)
    }

    fn hlen(&mut self, args: &[String]) -> Value {
        let [key] = args else {
            return wrong_args("HLEN");
        };
        match self.hash(key) {
            Ok(Some(h)) => Value::Int(h.len() as i64),
            Ok(None) => Value::Int(0),
            Err(e) => e,
        }
    }

    fn hgetall(&mut self, args: &[String]) -> Value {
        let [key] = args else {
            return wrong_args("HGETALL");
        };
        match self.hash(key) {
            Ok(Some(h)) => Value::Array(
                h.iter()
                    .flat_map(|(k, v)| [Value::Data(k.clone()), Value::Data(v.clone())])
                    .collect(),
            ),
            Ok(None) => Value::Array(Vec::new()),
            Err(e) => e,
        }
    }

    fn script(&mut self, args: &[String]) -> Value {
        let Some(sub) = args.first() else {
            return wrong_args("SCRIPT");
        };
        match sub.to_uppercase().as_str() {
            "EXISTS" => {
                if self.malformed_exists {
                    return Value::Array(Vec::new());
                }
                Value::Array(
                    args[1..]
                        .iter()
                        .map(|sha| Value::Int(self.loaded.contains(&sha.to_lowercase()) as i64))
                        .collect(),
                )
            }
            "LOAD" => {
                let [_, body] = args else {
                    return wrong_args("SCRIPT|LOAD");
                };
                self.script_loads += 1;
                let sha = sha1_hex(body);
                if self.registry.kind_of(&sha).is_none() {
                    return err("ERR this store only runs the redrate procedures");
                }
                self.loaded.insert(sha.clone());
                Value::Data(sha)
            }
            "FLUSH" => {
                self.loaded.clear();
                Value::Status("OK".to_string())
            }
            other => err(format!("ERR unknown subcommand '{other}'")),
        }
    }

    fn evalsha(&mut self, args: &[String]) -> Value {
        let [sha, numkeys, rest @ ..] = args else {
            return wrong_args("EVALSHA");
        };
        let sha = sha.to_lowercase();
        if !self.loaded.contains(&sha) {
            return err("NOSCRIPT No matching script. Please use EVAL.");
        }
        let Some(kind) = self.registry.kind_of(&sha) else {
            return err("NOSCRIPT No matching script. Please use EVAL.");
        };
        if numkeys != "1" || rest.is_empty() {
            return err("ERR procedures take exactly one key");
        }
        let (key, argv) = (&rest[0], &rest[1..]);

        match kind {
            ScriptKind::AllowN | ScriptKind::AllowAtMost => self.run_rate(kind, key, argv),
            ScriptKind::ConcurrencyTake => self.run_take(key, argv),
        }
    }

    fn run_rate(&mut self, kind: ScriptKind, key: &str, argv: &[String]) -> Value {
        let args = match model::RateArgs::parse(argv) {
            Ok(args) => args,
            Err(msg) => return err(format!("ERR Error running script {kind}: {msg}")),
        };
        let stored = match self.entry(key) {
            None => None,
            Some(Entry {
                data: Data::Str(s), ..
            }) => s.parse::<f64>().ok(),
            Some(_) => return wrong_type(),
        };

        let now = self.now - JAN_1_2017;
        let outcome = match kind {
            ScriptKind::AllowN => model::allow_n(stored, now, args),
            _ => model::allow_at_most(stored, now, args),
        };

        if let Some((tat, ex)) = outcome.write {
            self.keys.insert(
                key.to_string(),
                Entry {
                    data: Data::Str(tat.to_string()),
                    expires_at: Some(self.now + ex as f64),
                },
            );
        }
        outcome.reply
    }

    fn run_take(&mut self, key: &str, argv: &[String]) -> Value {
        let args = match model::LeaseArgs::parse(argv) {
            Ok(args) => args,
            Err(msg) => return err(format!("ERR Error running script concurrency_take: {msg}")),
        };
        let now = self.now.floor() as i64;
        let store_now = self.now;

        let mut leases = match self.hash(key) {
            Ok(Some(h)) => std::mem::take(h),
            Ok(None) => HashMap::new(),
            Err(e) => return e,
        };
        let previous_expiry = self.keys.get(key).and_then(|e| e.expires_at);

        let (reply, extend) = model::concurrency_take(&mut leases, now, &args);

        if leases.is_empty() {
            self.keys.remove(key);
        } else {
            let min_expiry = store_now + args.ttl as f64;
            let expires_at = match previous_expiry {
                Some(at) if !extend || at >= min_expiry => Some(at),
                _ if extend => Some(min_expiry),
                other => other,
            };
            self.keys.insert(
                key.to_string(),
                Entry {
                    data: Data::Hash(leases),
                    expires_at,
                },
            );
        }
        reply
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(store: &MemoryStore, cmd: Cmd) -> Value {
        store.execute(&[cmd]).unwrap().remove(0)
    }

    #[test]
    fn test_strings_and_expiry() {
        let store = MemoryStore::new();
        assert_eq!(run(&store, Cmd::new("GET").arg("k")), Value::Nil);
        assert_eq!(
            run(&store, Cmd::new("SET").arg("k").arg("v").arg("EX").arg(2)),
            Value::Status("OK".to_string())
        );
        assert_eq!(
            run(&store, Cmd::new("GET").arg("k")),
            Value::Data("v".to_string())
        );
        assert_eq!(run(&store, Cmd::new("TTL").arg("k")), Value::Int(2));

        store.advance(Duration::from_secs(2));
        assert_eq!(run(&store, Cmd::new("GET").arg("k")), Value::Nil);
        assert!(!store.contains_key("k"));
    }

    #[test]
    fn test_time_follows_the_manual_clock() {
        let store = MemoryStore::starting_at(1_700_000_000.0);
        assert_eq!(
            run(&store, Cmd::new("TIME")),
            Value::Array(vec![
                Value::Data("1700000000".to_string()),
                Value::Data("0".to_string()),
            ])
        );
        store.advance(Duration::from_millis(1_250));
        assert_eq!(
            run(&store, Cmd::new("TIME")),
            Value::Array(vec![
                Value::Data("1700000001".to_string()),
                Value::Data("250000".to_string()),
            ])
        );
        assert_eq!(
            run(&store, Cmd::new("CLIENT").arg("SETINFO").arg("LIB-NAME").arg("x")),
            Value::Status("OK".to_string())
        );
    }

    #[test]
    fn test_hash_commands() {
        let store = MemoryStore::new();
        assert_eq!(
            run(&store, Cmd::new("HSET").arg("h").arg("a").arg("1").arg("b").arg("2")),
            Value::Int(2)
        );
        assert_eq!(run(&store, Cmd::new("HLEN").arg("h")), Value::Int(2));
        assert_eq!(
            run(&store, Cmd::new("HGET").arg("h").arg("a")),
            Value::Data("1".to_string())
        );
        assert_eq!(
            run(&store, Cmd::new("HDEL").arg("h").arg("a").arg("zz")),
            Value::Int(1)
        );
        assert_eq!(run(&store, Cmd::new("HDEL").arg("h").arg("b")), Value::Int(1));
        assert!(!store.contains_key("h"));
        assert_eq!(run(&store, Cmd::new("HDEL").arg("h").arg("b")), Value::Int(0));
    }

    #[test]
    fn test_wrong_type() {
        let store = MemoryStore::new();
        run(&store, Cmd::new("SET").arg("k").arg("v"));
        assert!(run(&store, Cmd::new("HLEN").arg("k")).is_error());
        assert!(run(&store, Cmd::new("NOPE")).is_error());
    }

    #[test]
    fn test_script_cache_lifecycle() {
        let store = MemoryStore::new();
        let scripts = Scripts::new();
        let script = scripts.get(ScriptKind::AllowN);

        let exists = Cmd::new("SCRIPT").arg("EXISTS").arg(script.sha());
        assert_eq!(run(&store, exists.clone()), Value::Array(vec![Value::Int(0)]));

        let eval = scripts.invoke_cmd(
            ScriptKind::AllowN,
            "rate:k",
            &["1".into(), "1".into(), "1".into(), "1".into()],
        );
        assert!(run(&store, eval.clone()).is_noscript());

        assert_eq!(
            run(&store, Cmd::new("SCRIPT").arg("LOAD").arg(script.source())),
            Value::Data(script.sha().to_string())
        );
        assert_eq!(run(&store, exists.clone()), Value::Array(vec![Value::Int(1)]));
        assert!(matches!(run(&store, eval.clone()), Value::Array(_)));

        store.flush_scripts();
        assert_eq!(run(&store, exists), Value::Array(vec![Value::Int(0)]));
        assert!(run(&store, eval).is_noscript());
    }

    #[test]
    fn test_unknown_script_body_rejected() {
        let store = MemoryStore::new();
        let reply = run(&store, Cmd::new("SCRIPT").arg("LOAD").arg("return 1"));
        assert!(reply.is_error());
    }

    #[test]
    fn test_lease_hash_expiry_follows_ttl() {
        let store = MemoryStore::new();
        let scripts = Scripts::new();
        let script = scripts.get(ScriptKind::ConcurrencyTake);
        run(&store, Cmd::new("SCRIPT").arg("LOAD").arg(script.source()));

        let take = scripts.invoke_cmd(
            ScriptKind::ConcurrencyTake,
            "concurrency:k",
            &["req".into(), "1".into(), "3".into()],
        );
        assert_eq!(
            run(&store, take),
            Value::Array(vec![Value::Int(1), Value::Int(1)])
        );
        assert_eq!(run(&store, Cmd::new("TTL").arg("concurrency:k")), Value::Int(3));

        store.advance(Duration::from_secs(3));
        assert!(!store.contains_key("concurrency:k"));
    }

    #[test]
    fn test_fault_injection() {
        let store = MemoryStore::new();
        store.fail_next_round_trips(2);
        assert!(store.execute(&[Cmd::new("PING")]).is_err());
        assert!(store.execute(&[Cmd::new("PING")]).is_err());
        assert_eq!(
            store.execute(&[Cmd::new("PING")]).unwrap(),
            vec![Value::Status("PONG".to_string())]
        );
        assert_eq!(store.round_trips(), 3);
        assert_eq!(store.last_round_trip(), vec![Cmd::new("PING")]);
    }
}
