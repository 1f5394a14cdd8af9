use sea_orm_migration::prelude::*;

use crate::utils::{apply_policies, drop_policies, RlsCommand, RlsPolicy, RlsRole, CURRENT_USER};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
    Name,
    School,
    Email,
    Phone,
    Role,
    CreatedAt,
}

fn policies() -> Vec<RlsPolicy> {
    let own = format!("id = {}", CURRENT_USER);
    vec![
        RlsPolicy::new("profiles are readable", "users", RlsCommand::Select, RlsRole::Public)
            .using("true"),
        // the role column cannot be raised by its owner
        RlsPolicy::new("users create own profile", "users", RlsCommand::Insert, RlsRole::Authenticated)
            .check(&format!("{} AND role = 'standard'", own)),
        RlsPolicy::new("users edit own profile", "users", RlsCommand::Update, RlsRole::Authenticated)
            .using(&own)
            .check(&format!(
                "{} AND role = (SELECT u.role FROM public.users u WHERE u.id = {})",
                own, CURRENT_USER
            )),
    ]
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Users::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Users::Id).text().not_null().primary_key())
                    .col(ColumnDef::new(Users::Name).text().not_null().default(""))
                    .col(ColumnDef::new(Users::School).text().not_null().default(""))
                    .col(ColumnDef::new(Users::Email).text().not_null().default(""))
                    .col(
                        ColumnDef::new(Users::Phone)
                            .string_len(11)
                            .check(Expr::cust("phone ~ '^[0-9]*$'")),
                    )
                    .col(
                        ColumnDef::new(Users::Role)
                            .text()
                            .not_null()
                            .default("standard")
                            .check(Expr::cust("role IN ('standard', 'admin')")),
                    )
                    .col(
                        ColumnDef::new(Users::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;
        println!(" -> Table 'users' created.");

        apply_policies(manager, "users", &policies()).await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        drop_policies(manager, &policies()).await?;
        manager
            .drop_table(Table::drop().table(Users::Table).to_owned())
            .await
    }
}
