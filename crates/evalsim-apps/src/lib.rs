//! Minimal reference applications: just enough concrete `App`
//! implementations (mail, AUI messaging, reminders) to exercise
//! `evalsim-runtime::Environment` end to end. No agent policy, no GUI,
//! no trace tooling — those stay out of scope.

pub mod aui;
pub mod mail;
pub mod reminder;

pub use aui::AuiApp;
pub use mail::MailApp;
pub use reminder::ReminderApp;
