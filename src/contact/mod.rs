pub mod contacter;
pub mod fcm;
pub mod twilio;

pub use contacter::{Contacter, ReminderAlert};
pub use twilio::{TwilioContacter, VerificationStatus};
