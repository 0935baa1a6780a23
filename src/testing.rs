//! In-process collaborator fakes for tests

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::channels::{GenerationRequest, MailSource, NotificationChannel, SendOptions, TextGenerator};
use crate::error::TransportError;
use crate::models::RawMessage;

#[derive(Debug, Clone)]
pub struct SentRecord {
    pub address: String,
    pub text: String,
    pub options: SendOptions,
}

#[derive(Debug, Clone, Copy)]
enum Failure {
    Permanent,
    Transient(usize),
}

/// Channel that records sends and fails on demand
#[derive(Default)]
pub struct FakeChannel {
    sent: Mutex<Vec<SentRecord>>,
    failures: Mutex<HashMap<String, Failure>>,
    attempts: Mutex<HashMap<String, usize>>,
}

impl FakeChannel {
    pub fn sent(&self) -> Vec<SentRecord> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, address: &str) -> Vec<SentRecord> {
        self.sent()
            .into_iter()
            .filter(|s| s.address == address)
            .collect()
    }

    pub fn attempts(&self, address: &str) -> usize {
        self.attempts.lock().unwrap().get(address).copied().unwrap_or(0)
    }

    pub fn fail_permanently(&self, address: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(address.to_string(), Failure::Permanent);
    }

    /// Fail the next `times` sends to `address` with a transient error
    pub fn fail_transiently(&self, address: &str, times: usize) {
        self.failures
            .lock()
            .unwrap()
            .insert(address.to_string(), Failure::Transient(times));
    }

    pub fn heal(&self, address: &str) {
        self.failures.lock().unwrap().remove(address);
    }
}

#[async_trait]
impl NotificationChannel for FakeChannel {
    async fn send(
        &self,
        address: &str,
        text: &str,
        options: &SendOptions,
    ) -> Result<String, TransportError> {
        *self
            .attempts
            .lock()
            .unwrap()
            .entry(address.to_string())
            .or_default() += 1;

        {
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(address) {
                Some(Failure::Permanent) => {
                    return Err(TransportError::Permanent("chat not found".into()))
                }
                Some(Failure::Transient(left)) if *left > 0 => {
                    *left -= 1;
                    return Err(TransportError::Transient("connection reset".into()));
                }
                _ => {}
            }
        }

        let mut sent = self.sent.lock().unwrap();
        sent.push(SentRecord {
            address: address.to_string(),
            text: text.to_string(),
            options: *options,
        });
        Ok(format!("msg-{}", sent.len()))
    }
}

/// Generator replaying a scripted list of results
pub struct FakeGenerator {
    script: Mutex<VecDeque<Result<String, TransportError>>>,
    calls: Mutex<usize>,
}

impl FakeGenerator {
    pub fn new(script: Vec<Result<String, TransportError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl TextGenerator for FakeGenerator {
    fn model(&self) -> &str {
        "fake-model"
    }

    async fn generate(&self, _request: &GenerationRequest<'_>) -> Result<String, TransportError> {
        *self.calls.lock().unwrap() += 1;
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Permanent("script exhausted".into())))
    }
}

/// Mailbox held in memory
#[derive(Default)]
pub struct FakeMailSource {
    inbox: Mutex<Vec<RawMessage>>,
    acked: Mutex<HashSet<String>>,
    fetch_failures: Mutex<usize>,
    fetches: Mutex<usize>,
}

impl FakeMailSource {
    pub fn push(&self, uid: &str, body: &str) {
        self.inbox
            .lock()
            .unwrap()
            .push(RawMessage::new(uid, body.as_bytes().to_vec()));
    }

    pub fn acked(&self) -> HashSet<String> {
        self.acked.lock().unwrap().clone()
    }

    pub fn fetches(&self) -> usize {
        *self.fetches.lock().unwrap()
    }

    /// Fail the next `times` fetches with a transient error
    pub fn fail_fetches(&self, times: usize) {
        *self.fetch_failures.lock().unwrap() = times;
    }

    fn check_fetch(&self) -> Result<(), TransportError> {
        *self.fetches.lock().unwrap() += 1;
        let mut failures = self.fetch_failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(TransportError::Transient("mail server unreachable".into()));
        }
        Ok(())
    }

    fn last(messages: Vec<RawMessage>, limit: usize) -> Vec<RawMessage> {
        let skip = messages.len().saturating_sub(limit);
        messages.into_iter().skip(skip).collect()
    }
}

#[async_trait]
impl MailSource for FakeMailSource {
    async fn fetch_unseen(
        &self,
        _sender: &str,
        limit: usize,
    ) -> Result<Vec<RawMessage>, TransportError> {
        self.check_fetch()?;
        let acked = self.acked();
        let unseen = self
            .inbox
            .lock()
            .unwrap()
            .iter()
            .filter(|m| !acked.contains(&m.uid))
            .cloned()
            .collect();
        Ok(Self::last(unseen, limit))
    }

    async fn fetch_latest(
        &self,
        _sender: &str,
        limit: usize,
    ) -> Result<Vec<RawMessage>, TransportError> {
        self.check_fetch()?;
        let all = self.inbox.lock().unwrap().clone();
        Ok(Self::last(all, limit))
    }

    async fn acknowledge(&self, uids: &[String]) -> Result<usize, TransportError> {
        let mut acked = self.acked.lock().unwrap();
        Ok(uids.iter().filter(|u| acked.insert(u.to_string())).count())
    }
}
