pub mod notification;
pub mod pubsub;
