use std::sync::Arc;

use sala_solidaria::models::normalize_phone;
use sala_solidaria::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init();

    let store = MemoryStore::new();
    let app = SalaSolidaria::with_backends(
        Arc::new(store.clone()),
        Arc::new(LocalIdentity::new()),
        ClientOptions::default(),
    );

    println!("Starting profile propagation demo");

    app.sign_up("ana@escola.br", "segredo123").await?;
    app.save_profile(&ProfileUpdate::new("Ana", "Escola X")).await?;
    for title in ["Horta", "Biblioteca"] {
        app.create_project(&ProjectDraft::new(title, "Projeto da turma", "Rua A, 1"))
            .await?;
    }

    let phone = normalize_phone("(11) 98765-4321");
    let report = app
        .save_profile(&ProfileUpdate::new("Ana Souza", "Escola Y").with_phone(&phone))
        .await?;
    println!(
        "Saved profile of {} and updated {} project(s)",
        report.profile.name,
        report.updated_projects.len()
    );

    for project in app.dashboard_projects().await? {
        println!("  {} -> {} / {}", project.title, project.owner_name, project.school);
    }

    // A failing batch leaves profile and projects as they were
    store.fail_next_batch_after(1).await;
    match app
        .save_profile(&ProfileUpdate::new("Ana Souza", "Escola Z"))
        .await
    {
        Err(e) => println!("Save failed: {}", e),
        Ok(_) => println!("Unexpected success"),
    }
    for project in app.dashboard_projects().await? {
        println!("  {} still at {}", project.title, project.school);
    }

    let first = app.browse_projects().await?;
    if let Some(project) = first.first() {
        let card = app.contact_card(&project.id).await?;
        println!(
            "Contact for {}: {} <{}> {}",
            card.project_title,
            card.owner_name,
            card.email,
            card.phone.unwrap_or_default()
        );
    }

    app.shutdown();
    Ok(())
}
