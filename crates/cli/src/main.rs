//! Plantorium CLI - storefront session and cart client.
//!
//! # Usage
//!
//! ```bash
//! # Sign in with a token pair issued by the login flow
//! plantorium session login --access-token <token> --refresh-token <token>
//!
//! # Add a product to the cart (local until signed in)
//! plantorium cart add --product 64f1c2 --price 450 --discount 10 --quantity 2
//!
//! # Show the active cart with its pricing summary
//! plantorium cart show
//! ```
//!
//! # Commands
//!
//! - `session` - Sign in, sign out, inspect the stored session
//! - `cart` - Show and edit the active cart
//!
//! Every command prints one JSON document to stdout. Logs go to stderr and
//! follow `RUST_LOG`; set `PLANTORIUM_LOG_FORMAT=json` for structured logs.

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::sync::Arc;

use clap::{Parser, Subcommand};
use plantorium_client::{ClientConfig, FileStore};
use plantorium_core::CartLineId;
use rust_decimal::Decimal;
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::CliError;

#[derive(Parser)]
#[command(name = "plantorium")]
#[command(author, version, about = "Plantorium storefront client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the signed-in session
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
    /// Show and edit the active cart
    Cart {
        #[command(subcommand)]
        action: CartAction,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    /// Store a token pair and migrate the local cart to the account
    Login {
        /// Access token issued at sign-in
        #[arg(long)]
        access_token: String,

        /// Refresh token issued at sign-in
        #[arg(long)]
        refresh_token: String,
    },
    /// Forget the session and return to the local cart
    Logout,
    /// Show whether a session is stored and which cart is active
    Status,
    /// Store the order-scoped token issued when checkout starts
    OrderToken {
        /// Order token
        token: String,
    },
}

#[derive(Subcommand)]
enum CartAction {
    /// Show the active cart
    Show,
    /// Add a product to the active cart
    Add {
        /// Product ID
        #[arg(short, long)]
        product: String,

        /// List price per unit
        #[arg(long)]
        price: Decimal,

        /// Discount percentage (0-100)
        #[arg(long, default_value = "0")]
        discount: Decimal,

        /// Units to add
        #[arg(short, long, default_value_t = 1)]
        quantity: u32,
    },
    /// Set the quantity of a cart line
    Set {
        /// Cart line ID
        line: String,

        /// New quantity (at least 1)
        quantity: u32,
    },
    /// Remove a cart line
    Remove {
        /// Cart line ID
        line: String,
    },
    /// Re-fetch the account cart
    Sync,
    /// Drop ordered products from the cart after payment
    CompleteOrder {
        /// IDs of the products that were ordered
        #[arg(required = true)]
        products: Vec<String>,
    },
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &ClientConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "plantorium_client=info,plantorium_cli=info".into());

    let is_json = std::env::var("PLANTORIUM_LOG_FORMAT").is_ok_and(|format| format == "json");
    let json_layer = is_json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_writer(std::io::stderr)
    });
    let text_layer = (!is_json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match ClientConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            init_tracing();
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(2);
        }
    };

    // Sentry must be initialized before the tracing subscriber
    let _sentry_guard = init_sentry(&config);
    init_tracing();

    if let Err(e) = run(cli, &config).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli, config: &ClientConfig) -> Result<(), CliError> {
    let storage = Arc::new(FileStore::new(&config.store_path));
    let cart = plantorium_client::connect(config, storage)?;

    match cli.command {
        Commands::Session { action } => match action {
            SessionAction::Login {
                access_token,
                refresh_token,
            } => commands::session::login(&cart, &access_token, &refresh_token).await?,
            SessionAction::Logout => commands::session::logout(&cart)?,
            SessionAction::Status => commands::session::status(&cart)?,
            SessionAction::OrderToken { token } => commands::session::order_token(&cart, token)?,
        },
        Commands::Cart { action } => {
            commands::cart::resume(&cart).await?;
            match action {
                CartAction::Show => commands::cart::show(&cart)?,
                CartAction::Add {
                    product,
                    price,
                    discount,
                    quantity,
                } => commands::cart::add(&cart, product, price, discount, quantity).await?,
                CartAction::Set { line, quantity } => {
                    commands::cart::set(&cart, &CartLineId::new(line), quantity).await?;
                }
                CartAction::Remove { line } => {
                    commands::cart::remove(&cart, &CartLineId::new(line)).await?;
                }
                CartAction::Sync => commands::cart::sync(&cart).await?,
                CartAction::CompleteOrder { products } => {
                    commands::cart::complete_order(&cart, products)?;
                }
            }
        }
    }
    Ok(())
}
