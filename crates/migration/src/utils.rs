use sea_orm_migration::prelude::*;

/// Command a row level security policy applies to
#[derive(Debug, Clone)]
pub enum RlsCommand {
    Select,
    Insert,
    Update,
    Delete,
    All,
}

/// Database role a policy is granted to
#[derive(Debug, Clone)]
pub enum RlsRole {
    Public,
    Authenticated,
    Anon,
    CustomRole(String),
}

/// A row level security policy on a table of the public schema
#[derive(Debug, Clone)]
pub struct RlsPolicy {
    pub name: String,
    pub table: String,
    pub command: RlsCommand,
    pub role: RlsRole,
    pub using: Option<String>,
    pub check: Option<String>,
}

impl RlsPolicy {
    pub fn new(name: &str, table: &str, command: RlsCommand, role: RlsRole) -> Self {
        Self {
            name: name.to_string(),
            table: table.to_string(),
            command,
            role,
            using: None,
            check: None,
        }
    }

    pub fn using(mut self, expr: &str) -> Self {
        self.using = Some(expr.to_string());
        self
    }

    pub fn check(mut self, expr: &str) -> Self {
        self.check = Some(expr.to_string());
        self
    }

    pub fn create_policy_sql(&self) -> String {
        let command = match self.command {
            RlsCommand::Select => "SELECT",
            RlsCommand::Insert => "INSERT",
            RlsCommand::Update => "UPDATE",
            RlsCommand::Delete => "DELETE",
            RlsCommand::All => "ALL",
        };

        let role = match &self.role {
            RlsRole::Public => "PUBLIC",
            RlsRole::Authenticated => "AUTHENTICATED",
            RlsRole::Anon => "ANON",
            RlsRole::CustomRole(role_name) => role_name,
        };

        let using_clause = match &self.using {
            Some(expr) => format!(" USING ({})", expr),
            None => String::new(),
        };
        let check_clause = match &self.check {
            Some(expr) => format!(" WITH CHECK ({})", expr),
            None => String::new(),
        };

        format!(
            "CREATE POLICY \"{}\" ON public.{} FOR {} TO {}{}{};",
            self.name, self.table, command, role, using_clause, check_clause
        )
    }

    pub fn drop_policy_sql(&self) -> String {
        format!("DROP POLICY IF EXISTS \"{}\" ON public.{};", self.name, self.table)
    }
}

pub fn enable_rls_sql(table: &str) -> String {
    format!("ALTER TABLE public.{} ENABLE ROW LEVEL SECURITY;", table)
}

/// The signed-in user's id as stored in the text key columns
pub const CURRENT_USER: &str = "auth.uid()::text";

/// True when the signed-in user has the admin role
pub const IS_ADMIN: &str =
    "EXISTS (SELECT 1 FROM public.users u WHERE u.id = auth.uid()::text AND u.role = 'admin')";

/// Run raw SQL statements
pub async fn exec(manager: &SchemaManager<'_>, sql: &str) -> Result<(), DbErr> {
    manager.get_connection().execute_unprepared(sql).await?;
    Ok(())
}

/// Enable row level security on `table` and create its policies
pub async fn apply_policies(
    manager: &SchemaManager<'_>,
    table: &str,
    policies: &[RlsPolicy],
) -> Result<(), DbErr> {
    exec(manager, &enable_rls_sql(table)).await?;
    for policy in policies {
        exec(manager, &policy.create_policy_sql()).await?;
        println!(" -> RLS policy '{}' created on {}.", policy.name, table);
    }
    Ok(())
}

/// Drop the policies created by [`apply_policies`]
pub async fn drop_policies(manager: &SchemaManager<'_>, policies: &[RlsPolicy]) -> Result<(), DbErr> {
    for policy in policies {
        exec(manager, &policy.drop_policy_sql()).await?;
    }
    Ok(())
}
