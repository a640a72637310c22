//! Connection-pool admission control: how many connections may be pending/active at once.

mod broker;

pub use broker::{Broker, BrokerQuota};
