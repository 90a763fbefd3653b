//! recollect — recall engine for a group-chat image-archive bot.
//! Remembers image-bearing messages, tags them to people in a durable
//! store, and resurfaces them on nickname triggers or a randomized
//! count-driven schedule.

pub mod cache;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod scheduler;
pub mod store;
