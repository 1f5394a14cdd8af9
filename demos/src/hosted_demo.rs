use std::env;

use sala_solidaria::prelude::*;
use tokio::time::{timeout, Duration};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    pretty_env_logger::init();

    // SALA_BACKEND_URL and SALA_API_KEY select the backend
    let config = Config::from_env()?
        .with_options(ClientOptions::default().with_poll_interval(Duration::from_secs(1)));
    let app = SalaSolidaria::connect(config)?;

    let email = env::var("SALA_DEMO_EMAIL").unwrap_or_else(|_| "professora@example.com".to_string());
    let password = env::var("SALA_DEMO_PASSWORD").unwrap_or_else(|_| "senha-de-teste".to_string());

    println!("Signing in as {}", email);
    let user = app.sign_in(&email, &password).await?;
    let session = app.current_session();
    println!(
        "Signed in as {} ({})",
        user.id,
        session.profile.as_ref().map(|p| p.name.as_str()).unwrap_or("no profile")
    );

    let projects = app.dashboard_projects().await?;
    println!("Dashboard has {} project(s)", projects.len());

    if let Some(project) = projects.first() {
        println!("Watching items of '{}' for a few seconds", project.title);
        let mut items = app.subscribe_items(&project.id).await?;
        while let Ok(Some(snapshot)) = timeout(Duration::from_secs(5), items.next()).await {
            match snapshot {
                Ok(items) => {
                    for item in items {
                        println!("  {}: {}/{}", item.name, item.received, item.needed);
                    }
                }
                Err(e) => {
                    println!("Listener failed: {}", e);
                    break;
                }
            }
        }
        items.cancel();
    }

    app.sign_out().await?;
    app.shutdown();
    Ok(())
}
