#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tally_client::ClientState;
use tally_client::clock::ManualClock;
use tally_client::config::ClientConfig;
use tally_client::date::{CalendarWidget, local_midnight};
use tally_client::rpc::CommandTransport;
use tokio::sync::oneshot;

/// What the bridge hands back: the command's answer, or a call failure.
pub type Reply = Result<Value, String>;

pub fn ok(data: Value) -> Reply {
    Ok(data)
}

/// The backend's error shape, answered in place of data.
pub fn app_error(kind: &str, detail: &str) -> Reply {
    Ok(json!({ "type": kind, "data": detail }))
}

pub fn not_found() -> Reply {
    Ok(json!({ "type": "NotFound" }))
}

pub fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0)
        .single()
        .expect("valid utc instant")
}

pub fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

/// Wednesday 2026-02-18 09:00 UTC.
pub fn clock() -> ManualClock {
    ManualClock::new(utc(2026, 2, 18, 9, 0))
}

/// Answers each command from its own queue; a command whose queue is
/// exhausted fails at the transport.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<BTreeMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, command: &str, reply: Reply) -> Self {
        self.replies
            .lock()
            .entry(command.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    pub fn push(&self, command: &str, reply: Reply) {
        self.replies
            .lock()
            .entry(command.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, command: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|(name, _)| name == command)
            .count()
    }
}

impl CommandTransport for ScriptedTransport {
    async fn invoke(&self, command: &str, payload: Value) -> Result<Value, String> {
        self.calls.lock().push((command.to_string(), payload));
        let reply = self
            .replies
            .lock()
            .get_mut(command)
            .and_then(VecDeque::pop_front);
        reply.unwrap_or_else(|| Err(format!("no scripted reply for {command}")))
    }
}

/// Each call waits until the test releases it through the sender handed
/// out for that command.
#[derive(Default)]
pub struct GatedTransport {
    gates: Mutex<BTreeMap<String, VecDeque<oneshot::Receiver<Reply>>>>,
    calls: Mutex<Vec<String>>,
}

impl GatedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gate(&self, command: &str) -> oneshot::Sender<Reply> {
        let (tx, rx) = oneshot::channel();
        self.gates
            .lock()
            .entry(command.to_string())
            .or_default()
            .push_back(rx);
        tx
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

impl CommandTransport for GatedTransport {
    async fn invoke(&self, command: &str, _payload: Value) -> Result<Value, String> {
        self.calls.lock().push(command.to_string());
        let gate = self
            .gates
            .lock()
            .get_mut(command)
            .and_then(VecDeque::pop_front);
        match gate {
            Some(gate) => gate
                .await
                .unwrap_or_else(|_| Err("gate dropped".to_string())),
            None => Err(format!("no gate for {command}")),
        }
    }
}

/// Yields to the other futures of a `join!` until `done` holds.
pub async fn settle_until(mut done: impl FnMut() -> bool) {
    for _ in 0..100 {
        if done() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition never held");
}

pub fn state<T: CommandTransport>(clock: &ManualClock, transport: T) -> ClientState<T> {
    state_with(clock, transport, "")
}

pub fn state_with<T: CommandTransport>(
    clock: &ManualClock,
    transport: T,
    extra_toml: &str,
) -> ClientState<T> {
    let raw = format!("timezone = \"America/New_York\"\n{extra_toml}");
    let config = ClientConfig::from_toml_str(&raw).expect("test config");
    ClientState::new(config, Arc::new(clock.clone()), transport)
}

/// Widget that shows whatever it was last told to.
pub struct EchoWidget {
    pub tz: Tz,
    pub shown: Option<DateTime<Tz>>,
    pub gotos: Vec<NaiveDate>,
}

impl EchoWidget {
    pub fn new(tz: Tz) -> Self {
        Self {
            tz,
            shown: None,
            gotos: Vec::new(),
        }
    }
}

impl CalendarWidget for EchoWidget {
    fn displayed_date(&self) -> Option<DateTime<Tz>> {
        self.shown.clone()
    }

    fn goto_date(&mut self, date: NaiveDate) {
        self.gotos.push(date);
        self.shown = Some(local_midnight(&self.tz, date));
    }
}
