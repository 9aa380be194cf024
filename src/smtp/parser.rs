use mail_parser::MessageParser;

/// Header fields of a received message worth a log line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSummary {
    pub subject: String,
    pub message_id: Option<String>,
}

/// Extract the subject and message id from raw message data
pub fn summarize(raw_email: &[u8]) -> Option<MessageSummary> {
    let message = MessageParser::default().parse(raw_email)?;

    let subject = message.subject().unwrap_or("(No Subject)").to_string();
    let message_id = message.message_id().map(|id| id.to_string());

    Some(MessageSummary {
        subject,
        message_id,
    })
}
