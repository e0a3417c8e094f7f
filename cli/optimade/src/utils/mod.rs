pub mod logger;
pub mod message;
pub mod view;
