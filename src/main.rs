//! Spin Operator - runs SpinApps on Kubernetes

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{ArgAction, Parser, Subcommand};
use kube::{Api, Client, CustomResourceExt};

use spin_operator::controller::runner::{executor_controller, spin_app_controller, ControllerFuture};
use spin_operator::controller::{ExecutorContext, SpinAppContext, SpinKubeClientImpl, FIELD_MANAGER};
use spin_operator::crd::{SpinApp, SpinAppExecutor};
use spin_operator::telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig};
use spin_operator::webhook::{self, WebhookState};

/// Spin Operator - converges SpinApps into Deployments, Services and runtime config
#[derive(Parser, Debug)]
#[command(name = "spin-operator", version, about, long_about = None)]
struct Cli {
    /// Print the CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controllers and admission webhooks (default mode)
    Run(RunArgs),
}

/// Run mode arguments
#[derive(Parser, Debug)]
struct RunArgs {
    /// Listen address of the admission webhook server
    #[arg(long, env = "SPIN_OPERATOR_WEBHOOK_ADDR", default_value = "0.0.0.0:9443")]
    webhook_addr: SocketAddr,

    /// Directory holding the webhook serving `tls.crt` and `tls.key`
    #[arg(
        long,
        env = "SPIN_OPERATOR_CERT_DIR",
        default_value = "/tmp/k8s-webhook-server/serving-certs"
    )]
    cert_dir: PathBuf,

    /// Serve the admission webhooks
    #[arg(
        long,
        env = "SPIN_OPERATOR_ENABLE_WEBHOOKS",
        default_value_t = true,
        action = ArgAction::Set
    )]
    enable_webhooks: bool,

    /// Server-side apply the CRDs on startup
    #[arg(long, env = "SPIN_OPERATOR_INSTALL_CRDS")]
    install_crds: bool,

    /// PEM bundle copied into default `spin-ca` secrets
    #[arg(
        long,
        env = "SPIN_OPERATOR_CA_BUNDLE_PATH",
        default_value = "/etc/ssl/certs/ca-certificates.crt"
    )]
    ca_bundle_path: PathBuf,

    /// Deadline of one SpinApp reconcile pass
    #[arg(long, env = "SPIN_OPERATOR_RECONCILE_TIMEOUT_SECS", default_value_t = 60)]
    reconcile_timeout_secs: u64,
}

impl Default for RunArgs {
    fn default() -> Self {
        // Parsing no arguments applies every default and env fallback
        RunArgs::parse_from(["run"])
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("failed to install rustls crypto provider: {e:?}");
        std::process::exit(1);
    }

    let cli = Cli::parse();

    if cli.crd {
        let app = serde_yaml::to_string(&SpinApp::crd())
            .map_err(|e| anyhow::anyhow!("failed to serialize SpinApp CRD: {}", e))?;
        let executor = serde_yaml::to_string(&SpinAppExecutor::crd())
            .map_err(|e| anyhow::anyhow!("failed to serialize SpinAppExecutor CRD: {}", e))?;
        println!("{app}---\n{executor}");
        return Ok(());
    }

    init_telemetry(&TelemetryConfig::from_env("spin-operator"))?;

    let args = match cli.command {
        Some(Commands::Run(args)) => args,
        None => RunArgs::default(),
    };
    let result = run(args).await;
    shutdown_telemetry();
    result
}

/// Apply both CRDs with server-side apply
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::{Patch, PatchParams};

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for crd in [SpinApp::crd(), SpinAppExecutor::crd()] {
        let name = crd.metadata.name.clone().unwrap_or_default();
        tracing::info!(crd = %name, "installing CRD");
        crds.patch(&name, &params, &Patch::Apply(&crd))
            .await
            .map_err(|e| anyhow::anyhow!("failed to install CRD {}: {}", name, e))?;
    }
    Ok(())
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    tracing::info!("spin-operator starting...");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("failed to create Kubernetes client: {}", e))?;

    if args.install_crds {
        ensure_crds_installed(&client).await?;
    }

    let mut app_ctx = SpinAppContext::from_client(client.clone())
        .with_reconcile_timeout(Duration::from_secs(args.reconcile_timeout_secs));
    match spin_operator::cacerts::load_ca_bundle(&args.ca_bundle_path).await {
        Ok(bundle) => app_ctx = app_ctx.with_ca_bundle(bundle),
        Err(e) => {
            // Apps asking for default CA certs will fail to reconcile
            tracing::warn!(error = %e, "no CA bundle loaded, default CA secrets are disabled");
        }
    }
    let executor_ctx = ExecutorContext::from_client(client.clone());

    tracing::info!("starting controllers...");
    let controllers: Vec<ControllerFuture> = vec![
        spin_app_controller(client.clone(), Arc::new(app_ctx)),
        executor_controller(client.clone(), Arc::new(executor_ctx)),
    ];
    let controllers = futures::future::join_all(controllers);

    if args.enable_webhooks {
        let state = Arc::new(WebhookState::new(Arc::new(SpinKubeClientImpl::new(client))));
        let server = webhook::serve(args.webhook_addr, &args.cert_dir, state);
        tokio::select! {
            _ = controllers => tracing::info!("controllers stopped"),
            result = server => {
                result.map_err(|e| anyhow::anyhow!("webhook server failed: {}", e))?;
            }
        }
    } else {
        tracing::info!("admission webhooks disabled");
        controllers.await;
    }

    tracing::info!("spin-operator shut down");
    Ok(())
}
