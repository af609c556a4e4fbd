//! Migration to create the event_groups and events tables.
//!
//! `event_groups` holds one row per (project, aggregation key) with the running
//! occurrence count. `events` holds one row per persisted occurrence.

use sea_orm_migration::prelude::*;

use super::m2025_01_10_090000_create_projects::Projects;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(EventGroups::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(EventGroups::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(EventGroups::ProjectId).integer().not_null())
                    .col(ColumnDef::new(EventGroups::AggregationKey).text().not_null())
                    .col(
                        ColumnDef::new(EventGroups::TotalCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(EventGroups::EventReceivedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(EventGroups::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(EventGroups::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_event_groups_project_id")
                            .from(EventGroups::Table, EventGroups::ProjectId)
                            .to(Projects::Table, Projects::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // One group per aggregation key within a project
        manager
            .create_index(
                Index::create()
                    .name("uq_event_groups_project_aggregation_key")
                    .table(EventGroups::Table)
                    .col(EventGroups::ProjectId)
                    .col(EventGroups::AggregationKey)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Events::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Events::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Events::EventId).text().not_null())
                    .col(ColumnDef::new(Events::Title).text().not_null())
                    .col(ColumnDef::new(Events::Fingerprint).text().not_null())
                    .col(ColumnDef::new(Events::RawFingerprint).json_binary().null())
                    .col(ColumnDef::new(Events::StackTrace).json_binary().null())
                    .col(ColumnDef::new(Events::Payload).json_binary().null())
                    .col(ColumnDef::new(Events::EventGroupId).integer().not_null())
                    .col(ColumnDef::new(Events::ProjectId).integer().not_null())
                    .col(
                        ColumnDef::new(Events::EmittedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Events::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Events::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_events_event_group_id")
                            .from(Events::Table, Events::EventGroupId)
                            .to(EventGroups::Table, EventGroups::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_events_project_id")
                            .from(Events::Table, Events::ProjectId)
                            .to(Projects::Table, Projects::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_events_event_group_id")
                    .table(Events::Table)
                    .col(Events::EventGroupId)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_events_project_id_emitted_at")
                    .table(Events::Table)
                    .col(Events::ProjectId)
                    .col(Events::EmittedAt)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Events::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(EventGroups::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub(crate) enum EventGroups {
    Table,
    Id,
    ProjectId,
    AggregationKey,
    TotalCount,
    EventReceivedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Events {
    Table,
    Id,
    EventId,
    Title,
    Fingerprint,
    RawFingerprint,
    StackTrace,
    Payload,
    EventGroupId,
    ProjectId,
    EmittedAt,
    CreatedAt,
    UpdatedAt,
}
