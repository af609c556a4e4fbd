//! Migration to create the alerts table.

use sea_orm_migration::prelude::*;

use super::m2025_01_10_090000_create_projects::Projects;
use super::m2025_01_10_090100_create_event_groups_and_events::EventGroups;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Alerts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Alerts::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Alerts::ProjectId).integer().not_null())
                    .col(ColumnDef::new(Alerts::EventGroupId).integer().not_null())
                    .col(ColumnDef::new(Alerts::Title).text().not_null())
                    .col(ColumnDef::new(Alerts::Description).text().null())
                    .col(
                        ColumnDef::new(Alerts::TriggeredAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Alerts::NotifiedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Alerts::EscalatedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Alerts::AcknowledgedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Alerts::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Alerts::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_alerts_project_id")
                            .from(Alerts::Table, Alerts::ProjectId)
                            .to(Projects::Table, Projects::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_alerts_event_group_id")
                            .from(Alerts::Table, Alerts::EventGroupId)
                            .to(EventGroups::Table, EventGroups::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // An event group raises at most one alert
        manager
            .create_index(
                Index::create()
                    .name("uq_alerts_event_group_id")
                    .table(Alerts::Table)
                    .col(Alerts::EventGroupId)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_alerts_project_id")
                    .table(Alerts::Table)
                    .col(Alerts::ProjectId)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_alerts_notified_at_triggered_at")
                    .table(Alerts::Table)
                    .col(Alerts::NotifiedAt)
                    .col(Alerts::TriggeredAt)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Alerts::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub(crate) enum Alerts {
    Table,
    Id,
    ProjectId,
    EventGroupId,
    Title,
    Description,
    TriggeredAt,
    NotifiedAt,
    EscalatedAt,
    AcknowledgedAt,
    CreatedAt,
    UpdatedAt,
}
