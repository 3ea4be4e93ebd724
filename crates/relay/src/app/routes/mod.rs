pub mod outbox;
pub mod system;
