use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde_json::{Value, json};
use tracing::error;
use tracing_subscriber::EnvFilter;

use session_gate::api::{ApiError, HttpAuthApi};
use session_gate::config::ConfigError;
use session_gate::gate::{Action, NavigationGate, RouteLocation, RoutePolicy};
use session_gate::session::Session;
use session_gate::{AuthFlow, ClientConfig, ErrorCode, FileTokenStore, FlowError, FlowOutcome, Flush, SessionManager};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Flow(#[from] FlowError),
    #[error("invalid JSON output: {0}")]
    Json(#[from] serde_json::Error),
    #[error("not signed in")]
    NotSignedIn,
}

impl CliError {
    fn user_message(&self) -> String {
        match self {
            Self::Api(e) => e.user_message(),
            Self::Flow(e) => e.user_message(),
            Self::Config(_) | Self::Json(_) | Self::NotSignedIn => self.to_string(),
        }
    }
}

impl ErrorCode for CliError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Config(e) => e.error_code(),
            Self::Api(e) => e.error_code(),
            Self::Flow(e) => e.error_code(),
            Self::Json(_) => "E_OUTPUT",
            Self::NotSignedIn => "E_NOT_SIGNED_IN",
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "session-gate", about = "Client session lifecycle and navigation gate")]
struct Cli {
    /// Identity server base URL (overrides `AUTH_API_BASE_URL`).
    #[arg(long)]
    base_url: Option<String>,

    /// Token store file (overrides `AUTH_STORE_PATH`).
    #[arg(long)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the hydrated session phase and user.
    Status,
    Login(LoginArgs),
    Register(RegisterArgs),
    Reactivate(Credentials),
    Logout,
    /// Print the signed-in user, fetching it if missing.
    Whoami,
    /// Print the gate decision for a route under the hydrated session.
    Route(RouteArgs),
}

#[derive(Args, Debug)]
struct Credentials {
    #[arg(long)]
    email: String,
    #[arg(long, env = "AUTH_PASSWORD", hide_env_values = true)]
    password: String,
}

#[derive(Args, Debug)]
struct LoginArgs {
    #[command(flatten)]
    credentials: Credentials,

    /// Reactivate right away if the account turns out to be deactivated.
    #[arg(long, default_value_t = false)]
    reactivate: bool,
}

#[derive(Args, Debug)]
struct RegisterArgs {
    #[arg(long)]
    username: String,
    #[command(flatten)]
    credentials: Credentials,
}

#[derive(Args, Debug)]
struct RouteArgs {
    primary: String,
    secondary: Option<String>,
    #[arg(long, default_value_t = false)]
    splash_done: bool,
}

struct CliContext {
    config: ClientConfig,
    api: Arc<HttpAuthApi>,
    session: Arc<SessionManager>,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(code = e.error_code(), error = %e, "command failed");
            eprintln!("error: {}", e.user_message());
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let mut config = ClientConfig::from_env()?;
    if let Some(base_url) = cli.base_url.as_deref() {
        config = config.with_base_url(base_url)?;
    }
    if let Some(store) = cli.store {
        config.store_path = store;
    }

    let api = Arc::new(HttpAuthApi::from_config(&config)?);
    let store = Arc::new(FileTokenStore::new(config.store_path.clone()));
    let session = Arc::new(SessionManager::new(api.clone(), store));
    session.hydrate().await;

    let ctx = CliContext { config, api, session };
    match cli.command {
        Command::Status => print_json(&session_json(&ctx.session.snapshot())),
        Command::Login(args) => run_login(&ctx, args).await,
        Command::Register(args) => {
            let flow = ctx.flow();
            let c = &args.credentials;
            let outcome = flow.register(&args.username, &c.email, &c.password).await?;
            finish(&ctx, &flow, outcome).await
        }
        Command::Reactivate(c) => {
            let flow = ctx.flow();
            let outcome = flow.reactivate_with(&c.email, &c.password).await?;
            finish(&ctx, &flow, outcome).await
        }
        Command::Logout => {
            ctx.session.sign_out().await;
            print_json(&session_json(&ctx.session.snapshot()))
        }
        Command::Whoami => run_whoami(&ctx).await,
        Command::Route(args) => run_route(&ctx, &args),
    }
}

impl CliContext {
    fn flow(&self) -> AuthFlow {
        AuthFlow::new(self.api.clone(), self.session.clone())
    }

    fn policy(&self) -> RoutePolicy {
        RoutePolicy::from_config(&self.config)
    }
}

async fn run_login(ctx: &CliContext, args: LoginArgs) -> Result<(), CliError> {
    let flow = ctx.flow();
    let c = &args.credentials;
    let mut outcome = flow.login(&c.email, &c.password).await?;
    if args.reactivate && matches!(outcome, FlowOutcome::ReactivationOffered { .. }) {
        outcome = flow.reactivate(&c.password).await?;
    }
    finish(ctx, &flow, outcome).await
}

/// Commit a staged result the way a screen does once its notification ends,
/// then report where the gate sends the user from the auth screens.
async fn finish(ctx: &CliContext, flow: &AuthFlow, outcome: FlowOutcome) -> Result<(), CliError> {
    if let FlowOutcome::ReactivationOffered { email } = outcome {
        return print_json(&json!({
            "status": "account_deactivated",
            "email": email,
            "hint": "run `session-gate reactivate` or log in again with --reactivate",
        }));
    }

    let Flush::Committed(session) = flow.notification_finished().await else {
        return Err(CliError::NotSignedIn);
    };

    let policy = ctx.policy();
    let mut gate = NavigationGate::new(policy.clone());
    gate.on_splash_finished();
    gate.on_route_change(RouteLocation::at(&policy.auth_group, None));
    let redirect = gate.on_session_change(session.phase());

    let mut out = session_json(&session);
    out["redirect"] = redirect.map_or(Value::Null, |to| Value::String(to.to_string()));
    print_json(&out)
}

async fn run_whoami(ctx: &CliContext) -> Result<(), CliError> {
    if !ctx.session.snapshot().is_logged_in() {
        return Err(CliError::NotSignedIn);
    }
    ctx.session.ensure_user().await;
    let session = ctx.session.snapshot();
    match session.user() {
        Some(user) => print_json(&serde_json::to_value(user)?),
        None if session.is_logged_in() => print_json(&json!({ "user": null })),
        None => Err(CliError::NotSignedIn),
    }
}

fn run_route(ctx: &CliContext, args: &RouteArgs) -> Result<(), CliError> {
    let route = RouteLocation::from_segments(&args.primary, args.secondary.as_deref().unwrap_or(""));
    let phase = ctx.session.phase();
    let action = ctx.policy().decide(phase, &route, args.splash_done);
    let (decision, target) = match action {
        Action::Allow => ("allow", Value::Null),
        Action::Hold => ("hold", Value::Null),
        Action::Redirect(to) => ("redirect", Value::String(to.to_string())),
    };
    print_json(&json!({
        "phase": phase.as_str(),
        "route": route.to_string(),
        "action": decision,
        "target": target,
    }))
}

fn session_json(session: &Session) -> Value {
    json!({
        "phase": session.phase().as_str(),
        "generation": session.generation(),
        "user": session.user(),
    })
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
