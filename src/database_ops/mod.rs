pub mod appointments;
pub mod file_migration;
pub mod link_targets;
pub mod permissions;
pub mod prices;
pub mod reconcile;
pub mod seed_catalog;
pub mod seed_fees;
pub mod seed_patients;
