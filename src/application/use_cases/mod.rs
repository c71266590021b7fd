pub mod payments;
pub mod plan_catalog;
pub mod subscriptions;
