pub mod report;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use axum::{
    Router,
    extract::{Json, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::{PlanDocument, load_plan};
use crate::core::{ObjectiveWeights, PlanError, PlanOptions, PlanReport, solve_plan};

#[derive(Debug, Parser)]
#[command(
    name = "drawdown",
    about = "Tax-aware retirement withdrawal planner (after-tax, IRA and Roth accounts)"
)]
pub struct Cli {
    #[arg(short, long, global = true, help = "Log model and solver details to stderr")]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Solve a plan document and print the withdrawal schedule.
    Plan(PlanArgs),
    /// Serve the planner over HTTP.
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

#[derive(Debug, Clone, Args)]
pub struct PlanArgs {
    #[arg(help = "Plan document (TOML, or JSON with a .json extension)")]
    pub config: PathBuf,
    #[arg(long, help = "Allow a SEPP schedule from the IRA before 59")]
    pub sepp: bool,
    #[arg(long, conflicts_with = "json", help = "Print the schedule as CSV")]
    pub csv: bool,
    #[arg(long, help = "Print the full report as JSON")]
    pub json: bool,
    #[arg(long, help = "Report amounts in start-of-plan dollars")]
    pub real: bool,
    #[arg(
        long,
        default_value_t = 0.0,
        help = "Objective weight rewarding Roth withdrawals (at most 1e-4)"
    )]
    pub roth_bias: f64,
    #[arg(
        long,
        default_value_t = 0.0,
        help = "Objective weight rewarding withdrawals net of tax (at most 1e-4)"
    )]
    pub smoothing: f64,
    #[arg(
        long,
        default_value_t = 1e-6,
        help = "Largest relative constraint violation accepted from the solver"
    )]
    pub tolerance: f64,
}

impl PlanArgs {
    pub fn options(&self) -> PlanOptions {
        PlanOptions {
            sepp_enabled: self.sepp,
            real_dollars: self.real,
            weights: ObjectiveWeights {
                roth_bias: self.roth_bias,
                smoothing: self.smoothing,
                ..ObjectiveWeights::default()
            },
            tolerance: self.tolerance,
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Plan(args) => {
            let text = tokio::task::spawn_blocking(move || run_plan_command(&args))
                .await
                .context("planner task failed")??;
            print!("{text}");
            Ok(())
        }
        Command::Serve { port } => run_http_server(port)
            .await
            .with_context(|| format!("HTTP server on port {port} failed")),
    }
}

/// Loads, solves and renders one plan in the format `args` asks for.
pub fn run_plan_command(args: &PlanArgs) -> anyhow::Result<String> {
    let config = load_plan(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let report = solve_plan(&config, &args.options())?;
    render(&report, args)
}

fn render(report: &PlanReport, args: &PlanArgs) -> anyhow::Result<String> {
    if args.json {
        let mut text = serde_json::to_string_pretty(report).context("serializing report")?;
        text.push('\n');
        Ok(text)
    } else if args.csv {
        report::render_csv(report)
    } else {
        report::render_table(report).context("formatting report table")
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlanRequest {
    config: PlanDocument,
    #[serde(default)]
    sepp: bool,
    #[serde(default)]
    real: bool,
    #[serde(default)]
    roth_bias: f64,
    #[serde(default)]
    smoothing: f64,
}

impl PlanRequest {
    fn options(&self) -> PlanOptions {
        PlanOptions {
            sepp_enabled: self.sepp,
            real_dollars: self.real,
            weights: ObjectiveWeights {
                roth_bias: self.roth_bias,
                smoothing: self.smoothing,
                ..ObjectiveWeights::default()
            },
            ..PlanOptions::default()
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

pub fn router() -> Router {
    Router::new()
        .route("/api/plan", post(plan_handler))
        .fallback(not_found_handler)
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "drawdown HTTP API listening");
    axum::serve(listener, router()).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn plan_handler(payload: Result<Json<PlanRequest>, JsonRejection>) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("Invalid plan request: {}", rejection.body_text()),
            );
        }
    };

    let solved = tokio::task::spawn_blocking(move || -> Result<PlanReport, PlanError> {
        let options = request.options();
        let config = request.config.into_plan()?;
        solve_plan(&config, &options)
    })
    .await;

    match solved {
        Ok(Ok(report)) => json_response(StatusCode::OK, report),
        Ok(Err(err)) => {
            warn!(error = %err, "plan request failed");
            error_response(status_for(&err), &err.to_string())
        }
        Err(err) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("planner task failed: {err}"),
        ),
    }
}

fn status_for(err: &PlanError) -> StatusCode {
    match err {
        PlanError::Config(_) => StatusCode::BAD_REQUEST,
        PlanError::ModelInfeasible(_) | PlanError::NumericNonconvergence(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        PlanError::InternalInconsistency { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ConfigError;
    use axum::body::to_bytes;
    use serde_json::Value;

    fn fixture(name: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests/fixtures")
            .join(name)
    }

    fn plan_args(config: PathBuf) -> PlanArgs {
        PlanArgs {
            config,
            sepp: false,
            csv: false,
            json: false,
            real: false,
            roth_bias: 0.0,
            smoothing: 0.0,
            tolerance: 1e-6,
        }
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("readable body");
        serde_json::from_slice(&bytes).expect("JSON body")
    }

    fn request(json: &str) -> Result<Json<PlanRequest>, JsonRejection> {
        Ok(Json(serde_json::from_str(json).expect("valid request JSON")))
    }

    #[test]
    fn cli_parses_plan_flags() {
        let cli = Cli::try_parse_from([
            "drawdown",
            "plan",
            "plan.toml",
            "--sepp",
            "--csv",
            "--roth-bias",
            "1e-5",
            "-v",
        ])
        .expect("valid command line");
        assert!(cli.verbose);
        let Command::Plan(args) = cli.command else {
            panic!("expected plan subcommand");
        };
        let options = args.options();
        assert!(options.sepp_enabled);
        assert!(args.csv);
        assert_eq!(options.weights.roth_bias, 1e-5);
        assert_eq!(options.weights.tax_tie_break, ObjectiveWeights::default().tax_tie_break);
    }

    #[test]
    fn cli_rejects_csv_with_json() {
        assert!(Cli::try_parse_from(["drawdown", "plan", "p.toml", "--csv", "--json"]).is_err());
    }

    #[test]
    fn cli_serve_defaults_port() {
        let cli = Cli::try_parse_from(["drawdown", "serve"]).expect("valid command line");
        assert!(matches!(cli.command, Command::Serve { port: 8080 }));
    }

    #[test]
    fn plan_command_renders_each_format() {
        let mut args = plan_args(fixture("flat.toml"));
        let table = run_plan_command(&args).expect("solves");
        assert!(table.starts_with("Yearly spending <= 100000\n"), "{table}");

        args.csv = true;
        let csv = run_plan_command(&args).expect("solves");
        assert!(csv.starts_with("spend goal,100000\n"), "{csv}");

        args.csv = false;
        args.json = true;
        let json: Value = serde_json::from_str(&run_plan_command(&args).expect("solves"))
            .expect("JSON output");
        assert_eq!(json["retirementYears"].as_array().map(Vec::len), Some(50));
    }

    #[test]
    fn plan_command_reports_missing_file() {
        let err = run_plan_command(&plan_args(fixture("missing.toml"))).expect_err("no file");
        assert!(format!("{err:#}").contains("missing.toml"));
    }

    #[test]
    fn error_statuses_follow_error_kind() {
        assert_eq!(
            status_for(&PlanError::Config(ConfigError::Missing("startage"))),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&PlanError::ModelInfeasible("x".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&PlanError::InternalInconsistency {
                age: 60,
                solved: 1.0,
                recomputed: 2.0
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn plan_endpoint_returns_report() {
        let response = plan_handler(request(
            r#"{"config": {"startage": 60, "endage": 70, "returns": 0,
                           "aftertax": {"bal": 100000, "basis": 100000}},
                "real": true}"#,
        ))
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).map(|v| v.as_bytes()),
            Some(&b"no-store"[..])
        );
        let body = body_json(response).await;
        let floor = body["spendingFloor"].as_f64().expect("numeric floor");
        assert!((floor - 10_000.0).abs() < 0.01, "floor {floor}");
        assert_eq!(body["realDollars"], Value::Bool(true));
    }

    #[tokio::test]
    async fn plan_endpoint_maps_errors_to_statuses() {
        let response = plan_handler(request(r#"{"config": {"endage": 70}}"#)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"].as_str().is_some_and(|e| e.contains("startage")));

        let response = plan_handler(request(
            r#"{"config": {"startage": 60, "endage": 65,
                           "expense": {"yacht": {"age": "60-", "amount": 1e9}}}}"#,
        ))
        .await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn unknown_routes_get_json_404() {
        let response = not_found_handler().await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"], "Not found");
    }
}
