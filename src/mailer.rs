//! Outgoing account emails.
//!
//! Messages go through a bounded queue drained by a fixed set of worker tasks.
//! A send that hits the provider's rate limit is retried after a fixed delay;
//! any other failure is logged and dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use handlebars::Handlebars;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::RenderError;
use crate::models::Role;

pub const CONFIRMATION_SUBJECT: &str = "Your LMS Analytics account confirmation and credentials";

const STUDENT_CONFIRMATION: &str = r#"<p>Hello {{name}},</p>
<p>Your student account has been created.</p>
<p>Student ID: <strong>{{username}}</strong><br>Password: <strong>{{password}}</strong></p>
<p>Sign in and change your password from your profile page.</p>"#;

const LECTURER_CONFIRMATION: &str = r#"<p>Hello {{name}},</p>
<p>Your lecturer account has been created.</p>
<p>Lecturer ID: <strong>{{username}}</strong><br>Password: <strong>{{password}}</strong></p>
<p>Sign in and change your password from your profile page.</p>"#;

#[derive(Debug, Clone, PartialEq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("transport failure: {0}")]
    Transport(String),
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, email: &Email) -> Result<(), MailError>;
}

/// Logs instead of sending. Used when no mail provider is configured.
#[derive(Debug, Default)]
pub struct LogTransport;

#[async_trait]
impl MailTransport for LogTransport {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        info!(to = %email.to, subject = %email.subject, "email (log transport)");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct ConfirmationContext<'a> {
    name: &'a str,
    username: &'a str,
    password: &'a str,
}

/// New-account confirmation; students and lecturers get different wording.
pub fn confirmation_email(
    role: Role,
    name: &str,
    to: &str,
    username: &str,
    password: &str,
) -> Result<Email, RenderError> {
    let template = match role {
        Role::Student => STUDENT_CONFIRMATION,
        Role::Lecturer | Role::Staff => LECTURER_CONFIRMATION,
    };
    let html_body = Handlebars::new().render_template(
        template,
        &ConfirmationContext {
            name,
            username,
            password,
        },
    )?;

    Ok(Email {
        to: to.to_string(),
        subject: CONFIRMATION_SUBJECT.to_string(),
        html_body,
    })
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    /// Still rate limited after the last attempt.
    GaveUp { attempts: u32 },
    Failed { attempts: u32, reason: String },
}

/// Sends one email, retrying only on rate limiting.
pub async fn deliver(
    transport: &dyn MailTransport,
    email: &Email,
    policy: RetryPolicy,
) -> DeliveryOutcome {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match transport.send(email).await {
            Ok(()) => return DeliveryOutcome::Delivered { attempts: attempt },
            Err(MailError::RateLimited(reason)) if attempt < max_attempts => {
                warn!(to = %email.to, attempt, %reason, "rate limit hit, retrying in {:?}", policy.delay);
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
            Err(MailError::RateLimited(reason)) => {
                error!(to = %email.to, attempts = attempt, %reason, "failed to send email");
                return DeliveryOutcome::GaveUp { attempts: attempt };
            }
            Err(MailError::Transport(reason)) => {
                error!(to = %email.to, %reason, "unexpected error sending email");
                return DeliveryOutcome::Failed {
                    attempts: attempt,
                    reason,
                };
            }
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    delivered: AtomicU64,
    gave_up: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryStats {
    pub delivered: u64,
    pub gave_up: u64,
    pub failed: u64,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("mail queue is full")]
    Full,

    #[error("mail queue is closed")]
    Closed,
}

pub struct MailQueue {
    sender: mpsc::Sender<Email>,
    workers: Vec<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl MailQueue {
    /// Spawns `worker_count` workers on the current tokio runtime.
    pub fn start(
        transport: Arc<dyn MailTransport>,
        worker_count: usize,
        capacity: usize,
        policy: RetryPolicy,
    ) -> Self {
        let (sender, receiver) = mpsc::channel::<Email>(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let counters = Arc::new(Counters::default());

        let workers = (0..worker_count.max(1))
            .map(|id| {
                let receiver = Arc::clone(&receiver);
                let transport = Arc::clone(&transport);
                let counters = Arc::clone(&counters);
                tokio::spawn(async move {
                    worker(id, receiver, transport, counters, policy).await;
                })
            })
            .collect();

        info!(workers = worker_count.max(1), capacity, "mail queue started");
        Self {
            sender,
            workers,
            counters,
        }
    }

    /// Queues an email without waiting. The caller never sees delivery errors.
    pub fn enqueue(&self, email: Email) -> Result<(), QueueError> {
        self.sender.try_send(email).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::Full,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })
    }

    pub fn stats(&self) -> DeliveryStats {
        DeliveryStats {
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            gave_up: self.counters.gave_up.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Closes the queue, drains what is left and returns the final counts.
    pub async fn shutdown(self) -> DeliveryStats {
        let MailQueue {
            sender,
            workers,
            counters,
        } = self;
        drop(sender);
        for handle in workers {
            if let Err(e) = handle.await {
                error!("mail worker panicked: {e}");
            }
        }
        DeliveryStats {
            delivered: counters.delivered.load(Ordering::Relaxed),
            gave_up: counters.gave_up.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
        }
    }
}

async fn worker(
    id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<Email>>>,
    transport: Arc<dyn MailTransport>,
    counters: Arc<Counters>,
    policy: RetryPolicy,
) {
    loop {
        let next = receiver.lock().await.recv().await;
        let Some(email) = next else {
            debug!(worker = id, "mail queue closed");
            break;
        };

        let counter = match deliver(transport.as_ref(), &email, policy).await {
            DeliveryOutcome::Delivered { .. } => &counters.delivered,
            DeliveryOutcome::GaveUp { .. } => &counters.gave_up,
            DeliveryOutcome::Failed { .. } => &counters.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}
