//! Multipart email assembly and SMTP delivery.

use std::path::PathBuf;

use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::{Message, SmtpTransport, Transport};

/// A fully resolved email, attachments already on local disk.
#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<PathBuf>,
}

/// Delivers mail. Sends are blocking; callers run them on a blocking
/// worker. Tests substitute a recording double.
pub trait Mailer: Send + Sync {
    fn send(&self, email: &OutgoingEmail) -> anyhow::Result<()>;
}

/// Talks to a plain SMTP server, `localhost:25` by default.
pub struct SmtpMailer {
    host: String,
}

impl SmtpMailer {
    pub fn new(host: impl Into<String>) -> SmtpMailer {
        SmtpMailer { host: host.into() }
    }
}

impl Mailer for SmtpMailer {
    fn send(&self, email: &OutgoingEmail) -> anyhow::Result<()> {
        let from: Mailbox = email.from.parse()?;
        let to: Mailbox = email.to.parse()?;

        let mut multipart = MultiPart::mixed().singlepart(SinglePart::plain(email.body.clone()));

        for path in &email.attachments {
            let filename = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "attachment".to_owned());
            let content = std::fs::read(path)?;
            let content_type = ContentType::parse("application/octet-stream")?;
            multipart = multipart.singlepart(Attachment::new(filename).body(content, content_type));
        }

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(email.subject.clone())
            .multipart(multipart)?;

        log::debug!("sending email to {} via {}", email.to, self.host);
        let transport = SmtpTransport::builder_dangerous(&self.host).build();
        transport.send(&message)?;

        Ok(())
    }
}
