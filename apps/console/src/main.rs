use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use auth_core::{
    ControllerState, GatewayConfig, IdentityGateway, Navigator, RedirectTransport, Routes,
    SessionController,
};
use clap::{Parser, Subcommand};
use shared::domain::IdentityProvider;
use shared::error::AuthError;
use tokio::sync::broadcast;
use tracing::info;
use url::Url;

mod config;

#[derive(Parser, Debug)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Status,
    SignIn { email: String, password: String },
    Register { email: String, password: String },
    Social { provider: IdentityProvider },
    SignOut,
}

struct ConsoleNavigator;

impl Navigator for ConsoleNavigator {
    fn navigate_to(&self, path: &str) {
        println!("navigate -> {path}");
    }
}

struct ConsoleRedirectTransport;

impl RedirectTransport for ConsoleRedirectTransport {
    fn open(&self, url: &Url) -> Result<(), AuthError> {
        println!("open this link to continue sign-in: {url}");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let cli = Cli::parse();
    let settings = config::load_settings();
    info!(provider_url = %settings.provider_url, "console starting");

    let gateway_config =
        GatewayConfig::new(settings.provider_url.clone(), settings.api_key.clone())
            .with_redirect_uri(settings.redirect_uri.clone());
    let gateway = IdentityGateway::with_transport(gateway_config, Arc::new(ConsoleRedirectTransport));
    let routes = Routes {
        landing: settings.landing_route.clone(),
        sign_in: settings.sign_in_route.clone(),
    };
    let controller = SessionController::new_with_navigator(gateway, Arc::new(ConsoleNavigator), routes);
    let mut states = controller.subscribe();
    controller.start().await;

    match cli.command {
        Command::Status => {
            wait_until(&controller, &mut states, |state| !state.pending).await?;
            // A redirect completed on a previous run lands as a change
            // notification moments after the first settle; absorb it
            // before reporting.
            let _ = tokio::time::timeout(Duration::from_millis(300), states.recv()).await;
            let state = controller.state().await;
            print_state(&state)?;
            let route = if state.session.is_some() {
                settings.landing_route.as_str()
            } else {
                settings.sign_in_route.as_str()
            };
            println!("route -> {route}");
        }
        Command::SignIn { email, password } => {
            controller.sign_in_with_password(&email, &password).await?;
            let state = wait_until(&controller, &mut states, |state| state.session.is_some()).await?;
            print_state(&state)?;
        }
        Command::Register { email, password } => {
            controller.register_with_password(&email, &password).await?;
            let state = wait_until(&controller, &mut states, |state| state.session.is_some()).await?;
            print_state(&state)?;
        }
        Command::Social { provider } => {
            controller.sign_in_with_provider(provider).await?;
            println!("finish sign-in through the opened link, then run `console status`");
        }
        Command::SignOut => {
            controller.sign_out().await?;
            let state = wait_until(&controller, &mut states, |state| {
                state.session.is_none() && !state.pending
            })
            .await?;
            print_state(&state)?;
        }
    }

    controller.shutdown().await;
    Ok(())
}

async fn wait_until<F>(
    controller: &SessionController,
    states: &mut broadcast::Receiver<ControllerState>,
    predicate: F,
) -> Result<ControllerState>
where
    F: Fn(&ControllerState) -> bool,
{
    let current = controller.state().await;
    if predicate(&current) {
        return Ok(current);
    }

    let outcome = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match states.recv().await {
                Ok(state) if predicate(&state) => return Ok(state),
                Ok(_) => continue,
                Err(error) => return Err(anyhow!("session state stream ended: {error}")),
            }
        }
    })
    .await;

    match outcome {
        Ok(result) => result,
        Err(_) => bail!("timed out waiting for the session state to settle"),
    }
}

fn print_state(state: &ControllerState) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(state)?);
    Ok(())
}
