use sea_orm_migration::prelude::*;

use crate::utils::{apply_policies, drop_policies, RlsCommand, RlsPolicy, RlsRole, CURRENT_USER, IS_ADMIN};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[derive(DeriveIden)]
enum Projects {
    Table,
    Id,
    Title,
    Description,
    School,
    Address,
    OwnerId,
    OwnerName,
    OwnerEmail,
    CreatedAt,
}

fn policies() -> Vec<RlsPolicy> {
    let owner = format!("owner_id = {}", CURRENT_USER);
    vec![
        RlsPolicy::new("projects are public", "projects", RlsCommand::Select, RlsRole::Public)
            .using("true"),
        RlsPolicy::new("users create own projects", "projects", RlsCommand::Insert, RlsRole::Authenticated)
            .check(&owner),
        RlsPolicy::new("owners edit projects", "projects", RlsCommand::Update, RlsRole::Authenticated)
            .using(&owner)
            .check(&owner),
        RlsPolicy::new("owners and admins delete projects", "projects", RlsCommand::Delete, RlsRole::Authenticated)
            .using(&format!("{} OR {}", owner, IS_ADMIN)),
    ]
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Projects::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Projects::Id)
                            .text()
                            .not_null()
                            .primary_key()
                            .default(Expr::cust("gen_random_uuid()::text")),
                    )
                    .col(ColumnDef::new(Projects::Title).text().not_null())
                    .col(ColumnDef::new(Projects::Description).text().not_null())
                    .col(ColumnDef::new(Projects::School).text().not_null().default(""))
                    .col(ColumnDef::new(Projects::Address).text().not_null())
                    .col(ColumnDef::new(Projects::OwnerId).text().not_null())
                    .col(ColumnDef::new(Projects::OwnerName).text().not_null().default(""))
                    .col(ColumnDef::new(Projects::OwnerEmail).text().not_null().default(""))
                    .col(
                        ColumnDef::new(Projects::CreatedAt)
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
                    .name("idx_projects_owner")
                    .table(Projects::Table)
                    .col(Projects::OwnerId)
                    .to_owned(),
            )
            .await?;
        println!(" -> Table 'projects' created.");

        apply_policies(manager, "projects", &policies()).await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        drop_policies(manager, &policies()).await?;
        manager
            .drop_table(Table::drop().table(Projects::Table).to_owned())
            .await
    }
}
