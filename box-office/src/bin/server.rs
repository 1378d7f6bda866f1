//! Box Office HTTP server.
//!
//! Without credentials the server runs in demo mode: orders in memory, an
//! in-memory ticketing provider seeded with one event (`demo`), a mock
//! payment gateway and confirmations written to the log. Each fallback is
//! logged at `warn`.
//!
//! # Usage
//!
//! ```bash
//! # demo mode
//! cargo run --bin box-office-server
//!
//! # real collaborators
//! DATABASE_URL=postgres://localhost/box_office \
//! TICKETING_API_KEY=sk_... \
//! STRIPE_SECRET_KEY=sk_test_... STRIPE_CONNECTED_ACCOUNT=acct_... \
//! SMTP_HOST=smtp.gmail.com SMTP_USERNAME=... SMTP_PASSWORD=... SMTP_FROM=tickets@example.com \
//! cargo run --bin box-office-server
//! ```

use anyhow::Context;
use box_office::{
    app::{BoxOffice, CatalogService, CheckoutSettings},
    config::Config,
    metrics::register_business_metrics,
    notifier::{ConsoleNotifier, SmtpNotifier, TicketNotifier},
    payment_gateway::{MockPaymentGateway, PaymentGateway, StripeGateway},
    provider::{HttpTicketingProvider, InMemoryTicketingProvider, TicketingProvider},
    repository::{InMemoryOrderRepository, OrderRepository, PostgresOrderRepository},
    server::{build_router, AppState},
    Bundle, BundleComponent, BundleId, EventId, Money, OrderEnvironment, TicketType, TicketTypeId,
};
use box_office_core::environment::SystemClock;
use metrics_exporter_prometheus::PrometheusBuilder;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const PROVIDER_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,box_office=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Box Office server");

    let config = Config::from_env();
    info!(
        bind = %config.bind_address(),
        metrics = %config.metrics_address(),
        database = config.database.url.is_some(),
        provider = %config.provider.base_url,
        currency = %config.payments.currency,
        max_issuance_attempts = ?config.orders.max_issuance_attempts,
        smtp = config.smtp.is_configured(),
        "Configuration loaded"
    );

    // Metrics
    let metrics_addr: SocketAddr = config
        .metrics_address()
        .parse()
        .context("invalid metrics address")?;
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .context("failed to install Prometheus exporter")?;
    register_business_metrics();
    info!(address = %metrics_addr, "Metrics exporter listening");

    let repository = order_repository(&config).await?;
    let provider = ticketing_provider(&config)?;
    let gateway = payment_gateway(&config)?;
    let notifier = ticket_notifier(&config)?;

    let clock = Arc::new(SystemClock);
    let catalog = Arc::new(CatalogService::new(
        Arc::clone(&provider),
        clock.clone(),
        config.provider.inventory_max_age(),
    ));
    let refresh = Arc::clone(&catalog).spawn_refresh_loop(config.provider.inventory_refresh());

    let env = OrderEnvironment::new(
        clock,
        provider,
        notifier,
        config.provider.issuance_timeout(),
    )
    .with_max_issuance_attempts(config.orders.max_issuance_attempts);

    let box_office = Arc::new(BoxOffice::new(
        catalog,
        repository,
        gateway,
        env,
        CheckoutSettings {
            currency: config.payments.currency.clone(),
            platform_fee_percent: config.payments.platform_fee_percent,
        },
    ));

    box_office
        .report_pending_on_startup()
        .await
        .context("failed to list pending orders")?;

    let app = build_router(AppState::new(box_office));
    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    refresh.abort();
    info!("Server stopped");
    Ok(())
}

async fn order_repository(config: &Config) -> anyhow::Result<Arc<dyn OrderRepository>> {
    let Some(url) = &config.database.url else {
        warn!("DATABASE_URL not set, orders are kept in memory and lost on restart");
        return Ok(Arc::new(InMemoryOrderRepository::new()));
    };

    info!("Connecting to order database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(url)
        .await
        .context("failed to connect to PostgreSQL")?;
    let repository = PostgresOrderRepository::new(pool);
    repository.migrate().await.context("failed to migrate order schema")?;
    info!("Order database ready");
    Ok(Arc::new(repository))
}

fn ticketing_provider(config: &Config) -> anyhow::Result<Arc<dyn TicketingProvider>> {
    match &config.provider.api_key {
        Some(api_key) => {
            let provider = HttpTicketingProvider::new(
                config.provider.base_url.clone(),
                api_key.clone(),
                PROVIDER_REQUEST_TIMEOUT,
            )
            .context("failed to build ticketing provider client")?;
            Ok(Arc::new(provider))
        },
        None => {
            warn!("TICKETING_API_KEY not set, using the in-memory demo provider (event id: demo)");
            Ok(demo_provider().shared())
        },
    }
}

fn payment_gateway(config: &Config) -> anyhow::Result<Arc<dyn PaymentGateway>> {
    match &config.payments.stripe_secret_key {
        Some(secret_key) => {
            let gateway = StripeGateway::new(
                config.payments.stripe_base_url.clone(),
                secret_key.clone(),
                config.payments.stripe_connected_account.clone(),
                config.payments.frontend_url.clone(),
                config.payments.session_timeout(),
            )
            .context("failed to configure Stripe")?;
            Ok(Arc::new(gateway))
        },
        None => {
            warn!("STRIPE_SECRET_KEY not set, using the mock payment gateway; no money moves");
            Ok(MockPaymentGateway::new().shared())
        },
    }
}

fn ticket_notifier(config: &Config) -> anyhow::Result<Arc<dyn TicketNotifier>> {
    let smtp = &config.smtp;
    match (&smtp.host, &smtp.username, &smtp.password, &smtp.from) {
        (Some(host), Some(username), Some(password), Some(from)) => {
            let notifier = SmtpNotifier::new(host.clone(), smtp.port, username.clone(), password.clone(), from)
                .context("failed to configure SMTP notifier")?;
            info!(host = %host, port = smtp.port, "Buyer confirmations sent over SMTP");
            Ok(Arc::new(notifier))
        },
        _ => {
            warn!("SMTP_HOST, SMTP_USERNAME, SMTP_PASSWORD or SMTP_FROM not set, confirmations are only logged");
            Ok(Arc::new(ConsoleNotifier::new()))
        },
    }
}

fn demo_provider() -> InMemoryTicketingProvider {
    let listing = |id: &str, name: &str, price: u64, remaining: u32| TicketType {
        id: TicketTypeId::new(id),
        name: name.to_string(),
        price: Money::from_minor(price),
        remaining,
        max_per_order: 10,
    };
    let provider = InMemoryTicketingProvider::new();
    provider.add_event(
        EventId::new("demo"),
        vec![
            listing("adult", "Adult", 2_500, 50),
            listing("child", "Child", 1_200, 30),
            listing("community", "Community pass", 0, 20),
        ],
        vec![Bundle {
            id: BundleId::new("family"),
            name: "Family (2 adults + 2 children)".to_string(),
            price: Money::from_minor(6_500),
            max_quantity: 4,
            components: vec![
                BundleComponent {
                    ticket_type_id: TicketTypeId::new("adult"),
                    quantity: 2,
                },
                BundleComponent {
                    ticket_type_id: TicketTypeId::new("child"),
                    quantity: 2,
                },
            ],
        }],
    );
    provider
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            warn!(error = %error, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(error) => {
                warn!(error = %error, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down gracefully..."),
        () = terminate => info!("Received SIGTERM, shutting down gracefully..."),
    }
}
