//! Database migrations for Periscope.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2025_01_10_090000_create_projects;
mod m2025_01_10_090100_create_event_groups_and_events;
mod m2025_01_10_090200_create_alerts;
mod m2025_01_10_090300_create_alert_destinations;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_01_10_090000_create_projects::Migration),
            Box::new(m2025_01_10_090100_create_event_groups_and_events::Migration),
            Box::new(m2025_01_10_090200_create_alerts::Migration),
            Box::new(m2025_01_10_090300_create_alert_destinations::Migration),
        ]
    }
}
