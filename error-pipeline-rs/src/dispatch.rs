//! # Report Dispatch
//!
//! A finished report goes to exactly one destination: a developer callback,
//! or a chat notification addressed to a fixed recipient list.

use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Deserialize};
use uuid::Uuid;

use crate::error::Result;
use crate::exception::ExceptionHandle;

/// A finished report as handed to a callback
#[derive(Debug, Clone, Copy)]
pub struct Report<'a> {
    /// Severity label, e.g. `Warning`
    pub category: &'a str,
    pub text: &'a str,
    /// Application code, passed through verbatim
    pub code: Option<i64>,
    pub exception: Option<&'a ExceptionHandle>,
}

/// Developer-supplied report sink
pub type ReportCallback = Arc<dyn Fn(&Report<'_>) + Send + Sync>;

/// Message handed to the outbound chat channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Comma-joined recipient ids
    pub peer_ids: String,
    pub message: String,
    /// Correlation token; always 0 so the endpoint does not deduplicate
    pub random_id: i64,
    pub dont_parse_links: bool,
}

/// Outbound notification transport
#[cfg_attr(test, mockall::automock)]
pub trait NotificationChannel: Send + Sync {
    /// Delivers one message to every listed recipient
    fn send(&self, message: &OutboundMessage) -> Result<()>;
}

/// Where finished reports go
#[derive(Clone)]
pub enum DispatchTarget {
    Callback(ReportCallback),
    Notify {
        recipients: Vec<i64>,
        channel: Arc<dyn NotificationChannel>,
    },
}

impl DispatchTarget {
    pub fn callback<F>(callback: F) -> Self
    where
        F: Fn(&Report<'_>) + Send + Sync + 'static,
    {
        DispatchTarget::Callback(Arc::new(callback))
    }

    pub fn recipients<I>(recipients: I, channel: Arc<dyn NotificationChannel>) -> Self
    where
        I: IntoIterator<Item = i64>,
    {
        DispatchTarget::Notify {
            recipients: recipients.into_iter().collect(),
            channel,
        }
    }
}

impl fmt::Debug for DispatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchTarget::Callback(_) => f.write_str("Callback(..)"),
            DispatchTarget::Notify { recipients, .. } => {
                f.debug_struct("Notify").field("recipients", recipients).finish()
            }
        }
    }
}

/// Delivers finished reports to the configured target
#[derive(Debug, Clone)]
pub struct ReportDispatcher {
    target: DispatchTarget,
}

impl ReportDispatcher {
    pub fn new(target: DispatchTarget) -> Self {
        Self { target }
    }

    pub fn target(&self) -> &DispatchTarget {
        &self.target
    }

    /// Delivers one report. Channel failures are logged and dropped.
    pub fn dispatch(&self, category: &str, message: &str, code: Option<i64>, exception: Option<&ExceptionHandle>) {
        let report_id = Uuid::new_v4();

        match &self.target {
            DispatchTarget::Callback(callback) => {
                tracing::debug!(%report_id, category, "Dispatching report to callback");
                callback(&Report {
                    category,
                    text: message,
                    code,
                    exception,
                });
            }
            DispatchTarget::Notify { recipients, channel } => {
                let outbound = OutboundMessage {
                    peer_ids: join_recipients(recipients),
                    message: message.to_string(),
                    random_id: 0,
                    dont_parse_links: true,
                };
                tracing::debug!(%report_id, category, peer_ids = %outbound.peer_ids, "Dispatching report to chat");

                if let Err(e) = channel.send(&outbound) {
                    tracing::warn!(%report_id, category, error = %e, "Failed to deliver error report");
                }
            }
        }
    }
}

fn join_recipients(recipients: &[i64]) -> String {
    recipients
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
