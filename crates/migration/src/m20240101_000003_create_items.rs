use sea_orm_migration::prelude::*;

use crate::utils::{apply_policies, drop_policies, exec, RlsCommand, RlsPolicy, RlsRole, CURRENT_USER};

#[derive(DeriveMigrationName)]
pub struct Migration;

// No foreign key to projects: deleting a project leaves its items in place
// unless the client asks for a cascading batch.
#[derive(DeriveIden)]
enum Items {
    Table,
    Id,
    ProjectId,
    Name,
    Needed,
    Received,
    CreatedAt,
}

fn policies() -> Vec<RlsPolicy> {
    let project_owner = format!(
        "EXISTS (SELECT 1 FROM public.projects p WHERE p.id = project_id AND p.owner_id = {})",
        CURRENT_USER
    );
    vec![
        RlsPolicy::new("items are public", "items", RlsCommand::Select, RlsRole::Public)
            .using("true"),
        RlsPolicy::new("owners add items", "items", RlsCommand::Insert, RlsRole::Authenticated)
            .check(&project_owner),
        RlsPolicy::new("owners update items", "items", RlsCommand::Update, RlsRole::Authenticated)
            .using(&project_owner)
            .check(&project_owner),
        RlsPolicy::new("owners delete items", "items", RlsCommand::Delete, RlsRole::Authenticated)
            .using(&project_owner),
    ]
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Items::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Items::Id)
                            .text()
                            .not_null()
                            .primary_key()
                            .default(Expr::cust("gen_random_uuid()::text")),
                    )
                    .col(ColumnDef::new(Items::ProjectId).text().not_null())
                    .col(ColumnDef::new(Items::Name).text().not_null())
                    .col(ColumnDef::new(Items::Needed).integer().not_null())
                    .col(ColumnDef::new(Items::Received).integer().not_null().default(0))
                    .col(
                        ColumnDef::new(Items::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        exec(
            manager,
            "ALTER TABLE public.items ADD CONSTRAINT items_quantities \
             CHECK (needed >= 1 AND received >= 0 AND received <= needed);",
        )
        .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_items_project_created")
                    .table(Items::Table)
                    .col(Items::ProjectId)
                    .col(Items::CreatedAt)
                    .to_owned(),
            )
            .await?;
        println!(" -> Table 'items' created.");

        apply_policies(manager, "items", &policies()).await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        drop_policies(manager, &policies()).await?;
        manager
            .drop_table(Table::drop().table(Items::Table).to_owned())
            .await
    }
}
