//! Migration to create the alert destination tables.
//!
//! Creates the destination type catalogue, per-project destinations and the
//! per-destination notification rows driven by the alerting scheduler.

use sea_orm_migration::prelude::*;

use super::m2025_01_10_090000_create_projects::Projects;
use super::m2025_01_10_090200_create_alerts::Alerts;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AlertDestinationTypes::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AlertDestinationTypes::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(AlertDestinationTypes::Key).text().not_null())
                    .col(ColumnDef::new(AlertDestinationTypes::Title).text().not_null())
                    .col(
                        ColumnDef::new(AlertDestinationTypes::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(AlertDestinationTypes::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_alert_destination_types_key")
                    .table(AlertDestinationTypes::Table)
                    .col(AlertDestinationTypes::Key)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ProjectAlertDestinations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ProjectAlertDestinations::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ProjectAlertDestinations::ProjectId)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ProjectAlertDestinations::AlertDestinationTypeId)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ProjectAlertDestinations::Configuration)
                            .json_binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ProjectAlertDestinations::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ProjectAlertDestinations::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_project_alert_destinations_project_id")
                            .from(
                                ProjectAlertDestinations::Table,
                                ProjectAlertDestinations::ProjectId,
                            )
                            .to(Projects::Table, Projects::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_project_alert_destinations_type_id")
                            .from(
                                ProjectAlertDestinations::Table,
                                ProjectAlertDestinations::AlertDestinationTypeId,
                            )
                            .to(AlertDestinationTypes::Table, AlertDestinationTypes::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_project_alert_destinations_project_id")
                    .table(ProjectAlertDestinations::Table)
                    .col(ProjectAlertDestinations::ProjectId)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(AlertDestinationNotifications::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AlertDestinationNotifications::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(AlertDestinationNotifications::AlertId)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AlertDestinationNotifications::ProjectAlertDestinationId)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AlertDestinationNotifications::TotalAttempts)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(AlertDestinationNotifications::AttemptedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(AlertDestinationNotifications::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(AlertDestinationNotifications::FailedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(AlertDestinationNotifications::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(AlertDestinationNotifications::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_alert_destination_notifications_alert_id")
                            .from(
                                AlertDestinationNotifications::Table,
                                AlertDestinationNotifications::AlertId,
                            )
                            .to(Alerts::Table, Alerts::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_alert_destination_notifications_destination_id")
                            .from(
                                AlertDestinationNotifications::Table,
                                AlertDestinationNotifications::ProjectAlertDestinationId,
                            )
                            .to(
                                ProjectAlertDestinations::Table,
                                ProjectAlertDestinations::Id,
                            )
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_alert_destination_notifications_alert_id")
                    .table(AlertDestinationNotifications::Table)
                    .col(AlertDestinationNotifications::AlertId)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        // Dispatch scans pending rows by staleness
        manager
            .create_index(
                Index::create()
                    .name("idx_alert_destination_notifications_pending")
                    .table(AlertDestinationNotifications::Table)
                    .col(AlertDestinationNotifications::CompletedAt)
                    .col(AlertDestinationNotifications::UpdatedAt)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(
                Table::drop()
                    .table(AlertDestinationNotifications::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(
                Table::drop()
                    .table(ProjectAlertDestinations::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(AlertDestinationTypes::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum AlertDestinationTypes {
    Table,
    Id,
    Key,
    Title,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum ProjectAlertDestinations {
    Table,
    Id,
    ProjectId,
    AlertDestinationTypeId,
    Configuration,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum AlertDestinationNotifications {
    Table,
    Id,
    AlertId,
    ProjectAlertDestinationId,
    TotalAttempts,
    AttemptedAt,
    CompletedAt,
    FailedAt,
    CreatedAt,
    UpdatedAt,
}
