use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};

use pocogen::analyzer;
use pocogen::config::{CodeGeneratorConfig, Provider, DEFAULT_CONFIG_FILE};
use pocogen::emitter::CodeEmitter;
use pocogen::error::CodeGenError;
use pocogen::logger;
use pocogen::readers;

#[derive(Parser)]
#[command(
    name = "pocogen",
    version,
    about = "Reverse-engineer a relational schema into ORM entity sources"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Connect to a database, introspect its schema and emit entity sources
    Generate(GenerateArgs),
}

#[derive(Args)]
struct GenerateArgs {
    /// Database connection string
    #[arg(short = 'c', long = "connection")]
    connection: Option<String>,

    /// Database engine
    #[arg(short = 'p', long = "provider", value_enum)]
    provider: Option<Provider>,

    /// Namespace for the emitted code
    #[arg(short = 'n', long = "namespace")]
    namespace: Option<String>,

    /// Output directory
    #[arg(short = 'o', long = "output")]
    output: Option<String>,

    /// Pluralize collection names
    #[arg(long)]
    pluralize: Option<bool>,

    /// Emit validation annotations
    #[arg(long = "data-annotations")]
    data_annotations: Option<bool>,

    /// Path to the JSON config file
    #[arg(long = "config", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
}

impl GenerateArgs {
    /// CLI flags override config-file values when present.
    fn apply_to(self, config: &mut CodeGeneratorConfig) {
        if let Some(connection) = self.connection {
            config.connection = Some(connection);
        }
        if let Some(provider) = self.provider {
            config.provider = Some(provider.invariant_name().to_string());
        }
        if let Some(namespace) = self.namespace {
            config.namespace = namespace;
        }
        if let Some(output) = self.output {
            config.output = output;
        }
        if let Some(pluralize) = self.pluralize {
            config.pluralize = pluralize;
        }
        if let Some(data_annotations) = self.data_annotations {
            config.data_annotations = data_annotations;
        }
    }
}

async fn generate(args: GenerateArgs) -> Result<(), CodeGenError> {
    let mut config = CodeGeneratorConfig::load(&args.config)?;
    args.apply_to(&mut config);
    let connection = config.require_connection()?.to_string();

    let reader = readers::create_reader(config.provider_name(), &connection)?;
    let tables = reader.read_tables().await?;
    log::info!("Introspected {} tables", tables.len());

    let relationships = analyzer::analyze_all(&tables);
    log::info!("Classified {} relationships", relationships.len());

    let written = CodeEmitter::new(&config).emit(&tables, &relationships)?;
    log::info!("Generated {} source files", written.len());
    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(e) = logger::init_logger(Path::new("."), log::LevelFilter::Info) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();
    let code = match cli.command {
        Command::Generate(args) => match generate(args).await {
            Ok(()) => {
                log::info!("Code generation completed");
                0
            }
            Err(e) => {
                log::error!("Code generation failed. EXCEPTION: {}", e);
                1
            }
        },
    };
    std::process::exit(code);
}
