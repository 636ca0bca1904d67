// Service layer - delivery seams the action executor depends on

pub mod email;
pub mod notify;

pub use email::{EmailError, EmailSender, LoggingEmailSender, SmtpEmailService};
pub use notify::{NotificationReceipt, NotificationSender, NotificationService, NotifyError};
