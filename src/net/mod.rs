//! Outbound network glue: HTTP fetch/download, SMTP, ICMP probes, and
//! Wake-on-LAN. The fetch/mail/ping surfaces are traits so tests can swap
//! in recording doubles.

pub mod email;
pub mod fetch;
pub mod ping;
pub mod wol;

pub use email::{Mailer, OutgoingEmail, SmtpMailer};
pub use fetch::{download_page, get_page, Fetcher, HttpFetcher};
pub use ping::{Pinger, SystemPinger};
pub use wol::wake_on_lan;
