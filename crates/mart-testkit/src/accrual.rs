//! Scripted stand-in for the accrual authority client.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use mart_accrual::{AccrualClient, AccrualError};
use mart_money::Money;
use mart_schemas::{AccrualReply, OrderStatus};

/// One scripted answer to a fetch.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// A decoded success reply.
    Reply(AccrualReply),
    /// The authority has never heard of the order.
    NotFound,
    /// The whole retry budget came back empty.
    NoAnswer,
}

impl ScriptedReply {
    /// A reply carrying only a status.
    pub fn status(number: &str, status: OrderStatus) -> Self {
        Self::Reply(AccrualReply {
            number: number.to_string(),
            status,
            accrual: None,
        })
    }

    /// A PROCESSED reply awarding `accrual`.
    pub fn processed(number: &str, accrual: Money) -> Self {
        Self::Reply(AccrualReply {
            number: number.to_string(),
            status: OrderStatus::Processed,
            accrual: Some(accrual),
        })
    }
}

struct Script {
    queue: VecDeque<ScriptedReply>,
    last: ScriptedReply,
}

impl Script {
    fn next(&mut self) -> ScriptedReply {
        self.queue.pop_front().unwrap_or_else(|| self.last.clone())
    }
}

#[derive(Default)]
struct ScriptState {
    scripts: HashMap<String, Script>,
    calls: HashMap<String, usize>,
}

/// Accrual authority that answers from per-number scripts.
///
/// Replies are consumed in order; once a script runs out its final entry
/// repeats forever. Numbers that were never scripted answer
/// [`AccrualError::NotFound`], like the real authority does for orders it
/// has never seen. Replies are normalized the way the HTTP client
/// normalizes them, so a scripted REGISTERED comes out as NEW.
#[derive(Default)]
pub struct ScriptedAccrual {
    state: Mutex<ScriptState>,
}

impl ScriptedAccrual {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        // Keep working even if a panicking test poisoned the lock.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Install the reply sequence for `number`, replacing any earlier
    /// script. An empty sequence erases the script, so the number answers
    /// `NotFound` again.
    pub fn script<I>(&self, number: &str, replies: I)
    where
        I: IntoIterator<Item = ScriptedReply>,
    {
        let queue: VecDeque<ScriptedReply> = replies.into_iter().collect();
        let mut state = self.lock();
        match queue.back().cloned() {
            Some(last) => {
                state.scripts.insert(number.to_string(), Script { queue, last });
            }
            None => {
                state.scripts.remove(number);
            }
        }
    }

    /// How many times `number` has been fetched.
    pub fn calls(&self, number: &str) -> usize {
        self.lock().calls.get(number).copied().unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl AccrualClient for ScriptedAccrual {
    async fn fetch(&self, number: &str) -> Result<AccrualReply, AccrualError> {
        let scripted = {
            let mut state = self.lock();
            *state.calls.entry(number.to_string()).or_insert(0) += 1;
            match state.scripts.get_mut(number) {
                Some(script) => script.next(),
                None => ScriptedReply::NotFound,
            }
        };

        match scripted {
            ScriptedReply::Reply(mut reply) => {
                reply.status = reply.status.normalized();
                Ok(reply)
            }
            ScriptedReply::NotFound => Err(AccrualError::NotFound(number.to_string())),
            ScriptedReply::NoAnswer => Err(AccrualError::NoAnswer {
                attempts: 3,
                last: "scripted outage".to_string(),
            }),
        }
    }
}
