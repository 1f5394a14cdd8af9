use std::sync::Arc;

use log::info;
use sala_solidaria::prelude::*;
use tokio::time::{sleep, Duration};

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init();

    // Everything runs in memory, no backend needed
    let app = SalaSolidaria::with_backends(
        Arc::new(MemoryStore::new()),
        Arc::new(LocalIdentity::new()),
        ClientOptions::default(),
    );

    println!("Starting ledger demo");

    app.sign_up("ana@escola.br", "segredo123").await?;
    app.save_profile(&ProfileUpdate::new("Ana Souza", "Escola Estadual X"))
        .await?;

    let project = app
        .create_project(&ProjectDraft::new(
            "Volta às aulas",
            "Material escolar para a turma do 5º ano",
            "Rua das Flores, 10",
        ))
        .await?;
    println!("Created project {} at {}", project.title, project.school);

    // Print every snapshot of the needs list from a separate task
    let mut items = app.subscribe_items(&project.id).await?;
    let cancel = items.cancel_handle();
    let watcher = tokio::spawn(async move {
        while let Some(snapshot) = items.next().await {
            match snapshot {
                Ok(items) => {
                    println!("-- {} item(s)", items.len());
                    for item in items {
                        println!(
                            "   {:<10} {:>3}/{:<3} ({}%)",
                            item.name,
                            item.received,
                            item.needed,
                            item.progress_percent()
                        );
                    }
                }
                Err(e) => println!("listener failed: {}", e.user_message()),
            }
        }
        info!("watcher finished");
    });

    let caderno = app.add_item(&project.id, "Caderno", 10).await?;
    app.add_item(&project.id, "Lápis", 30).await?;

    app.record_received(&project.id, &caderno.id, 4).await?;
    match app.record_received(&project.id, &caderno.id, 7).await {
        Err(e) => println!("Rejected: {}", e.user_message()),
        Ok(_) => println!("Unexpectedly accepted"),
    }
    app.record_received(&project.id, &caderno.id, 6).await?;

    sleep(Duration::from_millis(100)).await;
    cancel.cancel();
    let _ = watcher.await;

    app.sign_out().await?;
    app.shutdown();
    println!("Ledger demo finished");
    Ok(())
}
