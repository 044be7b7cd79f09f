use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;
use uuid::Uuid;

use super::message_service::MessageService;
use crate::error::{AppError, AppResult};
use crate::models::Message;

/// Platform notifications sent into a candidate's inbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    ApplicationReceived,
    ApplicationAccepted,
    ApplicationRejected,
    InterviewScheduled,
}

impl TemplateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateKind::ApplicationReceived => "application_received",
            TemplateKind::ApplicationAccepted => "application_accepted",
            TemplateKind::ApplicationRejected => "application_rejected",
            TemplateKind::InterviewScheduled => "interview_scheduled",
        }
    }

    /// Render the fixed body. Params only fill named slots; anything else
    /// in `params` is ignored.
    pub fn render(&self, params: &BTreeMap<String, String>) -> AppResult<String> {
        let slot = |name: &str| {
            params
                .get(name)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
        };
        let position = slot("position")
            .map(|p| format!(" for {p}"))
            .unwrap_or_default();

        let body = match self {
            TemplateKind::ApplicationReceived => {
                format!("Your application{position} has been received.")
            }
            TemplateKind::ApplicationAccepted => {
                format!("Congratulations! Your application{position} has been accepted.")
            }
            TemplateKind::ApplicationRejected => format!(
                "Thank you for your interest. Your application{position} was not selected."
            ),
            TemplateKind::InterviewScheduled => {
                let scheduled_at = slot("scheduled_at").ok_or_else(|| {
                    AppError::Validation("interview_scheduled requires scheduled_at".into())
                })?;
                format!("An interview{position} has been scheduled for {scheduled_at}.")
            }
        };
        Ok(body)
    }
}

/// Posts templated system messages through the regular send pipeline.
#[derive(Clone)]
pub struct SystemNotifier {
    messages: MessageService,
}

impl SystemNotifier {
    pub fn new(messages: MessageService) -> Self {
        Self { messages }
    }

    pub async fn notify(
        &self,
        recipient_id: Uuid,
        context_id: Option<&str>,
        kind: TemplateKind,
        params: &BTreeMap<String, String>,
    ) -> AppResult<Message> {
        let body = kind.render(params)?;
        let message = self
            .messages
            .send_system(recipient_id, context_id, body)
            .await?;
        info!(
            recipient_id = %recipient_id,
            template = kind.as_str(),
            message_id = %message.id,
            "system notification delivered"
        );
        Ok(message)
    }
}
