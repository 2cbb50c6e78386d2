use super::document::DocumentId;
use super::subscription::{Period, SubscriptionId};
use super::transaction::TransactionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum JobKind {
    GenerateDocuments {
        subscription: SubscriptionId,
        period: Period,
    },
    RenderDocument {
        document: DocumentId,
        force: bool,
    },
    ProcessTransaction {
        transaction: TransactionId,
    },
    MarkOverdue {
        document: DocumentId,
    },
}

impl JobKind {
    pub fn job_type(&self) -> &'static str {
        match self {
            JobKind::GenerateDocuments { .. } => "generate-documents",
            JobKind::RenderDocument { .. } => "render-document",
            JobKind::ProcessTransaction { .. } => "process-transaction",
            JobKind::MarkOverdue { .. } => "mark-overdue",
        }
    }

    pub fn target_id(&self) -> String {
        match self {
            JobKind::GenerateDocuments {
                subscription,
                period,
            } => format!("{}:{}", subscription, period.key()),
            JobKind::RenderDocument { document, .. } | JobKind::MarkOverdue { document } => {
                document.to_string()
            }
            JobKind::ProcessTransaction { transaction } => transaction.to_string(),
        }
    }

    /// Content derived key: two descriptors for the same work share it.
    pub fn dedup_key(&self) -> String {
        format!("{}:{}", self.job_type(), self.target_id())
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub scheduled_at: DateTime<Utc>,
    pub attempts: u32,
    pub status: JobStatus,
    pub last_error: Option<String>,
}

impl Job {
    pub fn new(kind: JobKind, scheduled_at: DateTime<Utc>) -> Self {
        Self {
            id: JobId::new(),
            kind,
            scheduled_at,
            attempts: 0,
            status: JobStatus::Pending,
            last_error: None,
        }
    }

    pub fn dedup_key(&self) -> String {
        self.kind.dedup_key()
    }
}
