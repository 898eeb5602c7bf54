pub mod notification;
pub mod publish;
pub mod pubsub;
pub mod response;
pub mod retry;
pub mod topic;
pub mod validation;
