//! Pregão CLI — acquisition and inventory commands.
//!
//! Commands:
//! - `aquisicao processa-dado` — run one ETL end to end (download missing
//!   archives, parse, write Parquet)
//! - `inventario` — show which artifacts are on disk and which requests the
//!   next run would issue, without touching the network

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pregao_core::{Etl, EtlConfig, EtlKind, RetrievalReport};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pregao", about = "Pregão — incremental B3 quote acquisition and ETL")]
struct Cli {
    /// Debug-level logging (overridden by RUST_LOG).
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Data acquisition commands.
    Aquisicao {
        #[command(subcommand)]
        action: AquisicaoAction,
    },
    /// List artifacts on disk and the requests the next run would issue.
    Inventario {
        #[command(flatten)]
        etl: EtlArgs,
    },
}

#[derive(Subcommand)]
enum AquisicaoAction {
    /// Run the full extract → transform → load pipeline of one ETL.
    ProcessaDado {
        #[command(flatten)]
        etl: EtlArgs,

        /// Also write the retrieval report as JSON to this path.
        #[arg(long)]
        relatorio: Option<PathBuf>,
    },
}

#[derive(clap::Args)]
struct EtlArgs {
    /// ETL name: cotacao_b3_diaria, cotacao_b3_mensal.
    #[arg(long)]
    etl: EtlKind,

    /// TOML config file. Flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding raw artifacts.
    #[arg(long)]
    entrada: Option<PathBuf>,

    /// Directory receiving Parquet tables.
    #[arg(long)]
    saida: Option<PathBuf>,

    /// Create missing input/output directories (true/false).
    #[arg(long)]
    criar_caminho: Option<bool>,

    /// Calendar days, today included, to reconcile.
    #[arg(long)]
    lookback_days: Option<u32>,
}

impl EtlArgs {
    fn resolve_config(&self) -> Result<EtlConfig> {
        let mut config = match &self.config {
            Some(path) => EtlConfig::from_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => EtlConfig::default(),
        };
        if let Some(dir) = &self.entrada {
            config.input_dir = dir.clone();
        }
        if let Some(dir) = &self.saida {
            config.output_dir = dir.clone();
        }
        if let Some(create) = self.criar_caminho {
            config.create_dirs = create;
        }
        if let Some(days) = self.lookback_days {
            config.source.lookback_days = days;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Aquisicao {
            action: AquisicaoAction::ProcessaDado { etl, relatorio },
        } => run_processa_dado(&etl, relatorio.as_deref()),
        Commands::Inventario { etl } => run_inventario(&etl),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_target(false)
        .init();
}

fn run_processa_dado(args: &EtlArgs, report_path: Option<&Path>) -> Result<()> {
    let config = args.resolve_config()?;
    info!(
        etl = %args.etl,
        entrada = %config.input_dir.display(),
        saida = %config.output_dir.display(),
        lookback_days = config.source.lookback_days,
        "starting"
    );
    let mut etl = args
        .etl
        .build(&config)
        .with_context(|| format!("building ETL {}", args.etl))?;

    etl.pipeline()
        .with_context(|| format!("running ETL {}", args.etl))?;

    let Some(report) = etl.retrieval_report() else {
        return Ok(());
    };
    print_report(report);

    if let Some(path) = report_path {
        let json = serde_json::to_string_pretty(report)?;
        std::fs::write(path, json)
            .with_context(|| format!("writing report {}", path.display()))?;
        println!("Report saved to: {}", path.display());
    }

    if report.has_failures() {
        for (key, detail) in report.failures() {
            eprintln!("Error for {key}: {detail}");
        }
        std::process::exit(1);
    }

    Ok(())
}

fn run_inventario(args: &EtlArgs) -> Result<()> {
    let config = args.resolve_config()?;
    let etl = args.etl.build(&config)?;
    let store = etl.store();
    let inventory = store.inventory()?;
    let (start, today) = etl.window();

    println!("ETL:       {}", args.etl);
    println!("Directory: {}", store.dir().display());
    println!("Window:    {start} .. {today}");
    println!("Artifacts: {}", inventory.len());
    if let (Some(first), Some(last)) = (inventory.first(), inventory.last()) {
        println!("  {} .. {}", store.naming().stem(*first), store.naming().stem(*last));
    }

    let pending = etl.pending_requests()?;
    println!("Pending:   {}", pending.len());
    for key in &pending {
        println!("  {key}");
    }
    Ok(())
}

fn print_report(report: &RetrievalReport) {
    println!();
    println!("=== Retrieval: {} ===", report.source);
    println!("Requested: {}", report.len());
    println!("Found:     {}", report.found());
    println!("Not found: {}", report.not_found());
    println!("Failed:    {}", report.failed());
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_override_config_defaults() {
        let cli = Cli::try_parse_from([
            "pregao",
            "aquisicao",
            "processa-dado",
            "--etl",
            "cotacao_b3_mensal",
            "--entrada",
            "/tmp/in",
            "--criar-caminho",
            "false",
            "--lookback-days",
            "7",
        ])
        .unwrap();

        let Commands::Aquisicao {
            action: AquisicaoAction::ProcessaDado { etl, relatorio },
        } = cli.command
        else {
            panic!("expected processa-dado");
        };
        assert_eq!(etl.etl, EtlKind::CotacaoB3Mensal);
        assert!(relatorio.is_none());

        let config = etl.resolve_config().unwrap();
        assert_eq!(config.input_dir, PathBuf::from("/tmp/in"));
        assert_eq!(config.output_dir, EtlConfig::default().output_dir);
        assert!(!config.create_dirs);
        assert_eq!(config.source.lookback_days, 7);
    }

    #[test]
    fn unknown_etl_is_rejected() {
        assert!(Cli::try_parse_from(["pregao", "inventario", "--etl", "nope"]).is_err());
    }

    #[test]
    fn zero_lookback_is_rejected() {
        let cli = Cli::try_parse_from(["pregao", "inventario", "--etl", "cotacao_b3_diaria", "--lookback-days", "0"])
            .unwrap();
        let Commands::Inventario { etl } = cli.command else {
            panic!("expected inventario");
        };
        assert!(etl.resolve_config().is_err());
    }
}
