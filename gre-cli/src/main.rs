use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use gre_core::client::GreClient;
use gre_core::config::{BuilderOptions, EndpointSet, EnvironmentType};
use gre_core::document::{Despatch, Document};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gre")]
#[command(about = "Build, sign and submit SUNAT electronic waybills (GRE)")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a despatch JSON file to unsigned UBL XML.
    Build {
        #[arg(long)]
        despatch: PathBuf,
        #[command(flatten)]
        render: RenderArgs,
    },
    /// Render and sign a despatch with a PEM bundle (certificate and private key).
    Sign {
        #[arg(long)]
        despatch: PathBuf,
        #[arg(long, env = "GRE_CERT")]
        cert: PathBuf,
        #[command(flatten)]
        render: RenderArgs,
    },
    /// Build, sign and submit a despatch; prints the ticket as JSON.
    Send {
        #[arg(long)]
        despatch: PathBuf,
        #[arg(long, env = "GRE_CERT")]
        cert: PathBuf,
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Query the status of a submitted ticket.
    Status {
        #[arg(long)]
        ticket: String,
        /// Write the CDR XML here when SUNAT returns one.
        #[arg(long)]
        cdr_output: Option<PathBuf>,
        #[command(flatten)]
        api: ApiArgs,
    },
}

#[derive(Args)]
struct RenderArgs {
    /// Escape free text instead of wrapping it in CDATA.
    #[arg(long)]
    autoescape: bool,
    /// Pretty-print with this many spaces (at most 16).
    #[arg(long, value_parser = clap::value_parser!(u64).range(0..=16))]
    indent: Option<u64>,
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct ApiArgs {
    #[arg(long, env = "GRE_CLIENT_ID")]
    client_id: String,
    #[arg(long, env = "GRE_CLIENT_SECRET", hide_env_values = true)]
    client_secret: String,
    #[arg(long, env = "GRE_RUC")]
    ruc: Option<String>,
    #[arg(long, env = "GRE_USER")]
    user: Option<String>,
    #[arg(long, env = "GRE_PASSWORD", hide_env_values = true)]
    password: Option<String>,
    #[arg(long, env = "GRE_ENV", default_value = "production")]
    env: String,
    #[arg(long, env = "GRE_API_URL")]
    api_url: Option<String>,
    #[arg(long, env = "GRE_CPE_URL")]
    cpe_url: Option<String>,
}

impl ApiArgs {
    fn configure(&self, client: &mut GreClient) -> Result<()> {
        let env: EnvironmentType = self.env.parse()?;
        let defaults = EndpointSet::for_env(env);
        client
            .set_endpoints(EndpointSet::new(
                self.api_url.clone().unwrap_or_else(|| defaults.auth().to_string()),
                self.cpe_url
                    .clone()
                    .unwrap_or_else(|| defaults.submission().to_string()),
            ))
            .set_api_credentials(&self.client_id, &self.client_secret);
        match (&self.ruc, &self.user, &self.password) {
            (Some(ruc), Some(user), Some(password)) => {
                client.set_sol_credentials(ruc, user, password);
            }
            (None, None, None) => {}
            _ => bail!("SOL credentials need all of --ruc, --user and --password"),
        }
        Ok(())
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_despatch(path: &Path) -> Result<Despatch> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading despatch {}", path.display()))?;
    let despatch: Despatch = serde_json::from_str(&json)
        .with_context(|| format!("parsing despatch {}", path.display()))?;
    debug!(path = %path.display(), name = %despatch.name(), "loaded despatch");
    Ok(despatch)
}

fn client_with_cert(cert: &Path) -> Result<GreClient> {
    let pem = std::fs::read_to_string(cert)
        .with_context(|| format!("reading certificate {}", cert.display()))?;
    let mut client = GreClient::with_defaults()?;
    client.set_certificate(&pem)?;
    Ok(client)
}

fn apply_render(client: &mut GreClient, render: &RenderArgs) {
    let mut options = BuilderOptions::empty();
    options.set(BuilderOptions::AUTOESCAPE, render.autoescape);
    if let Some(indent) = render.indent {
        options.set(BuilderOptions::INDENT, indent);
    }
    client.set_builder_options(options);
}

fn emit(output: Option<&Path>, content: &str) -> Result<()> {
    match output {
        Some(path) => std::fs::write(path, content)
            .with_context(|| format!("writing {}", path.display())),
        None => {
            println!("{content}");
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Build { despatch, render } => {
            let document = load_despatch(&despatch)?;
            let mut client = GreClient::with_defaults()?;
            apply_render(&mut client, &render);
            let xml = client.build_xml(&document)?;
            emit(render.output.as_deref(), &xml)?;
        }
        Commands::Sign {
            despatch,
            cert,
            render,
        } => {
            let document = load_despatch(&despatch)?;
            let mut client = client_with_cert(&cert)?;
            apply_render(&mut client, &render);
            let signed = client.sign(&document)?;
            emit(render.output.as_deref(), &signed)?;
        }
        Commands::Send {
            despatch,
            cert,
            api,
        } => {
            let document = load_despatch(&despatch)?;
            let mut client = client_with_cert(&cert)?;
            api.configure(&mut client)?;
            let result = client.send(&document).await?;
            info!(ticket = result.ticket(), "despatch submitted");
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Status {
            ticket,
            cdr_output,
            api,
        } => {
            let mut client = GreClient::with_defaults()?;
            api.configure(&mut client)?;
            let status = client.get_status(Some(&ticket)).await?;
            if let (Some(path), Some(xml)) = (cdr_output.as_deref(), status.cdr_xml()) {
                std::fs::write(path, xml)
                    .with_context(|| format!("writing CDR {}", path.display()))?;
            }
            let summary = serde_json::json!({
                "code": status.code(),
                "state": status.state(),
                "error": status.error(),
                "cdr_generated": status.cdr_generated(),
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}
