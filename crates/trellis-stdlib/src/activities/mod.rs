//! The standard activity handlers

/// Email, in-app notification, and error-log activities
pub mod notify;

/// Record CRUD activities over the record-store collaborator
pub mod records;

/// Outbound webhook activity
pub mod webhook;
