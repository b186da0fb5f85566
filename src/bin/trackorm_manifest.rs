use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use trackorm::{EntitySchema, Manifest, ProxyType, SchemaCatalog};

#[derive(Parser)]
#[command(name = "trackorm-manifest")]
#[command(about = "Normalizes entity schemas and prints their synthesized shape")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the column and relation manifest of each entity.
    Manifest {
        /// JSON file holding one schema or an array of schemas; `-` reads stdin.
        input: PathBuf,
        #[arg(long)]
        entity: Option<String>,
        #[arg(long)]
        compact: bool,
    },
    /// Print the schemas after foreign keys and back-references were added.
    Normalize {
        input: PathBuf,
        #[arg(long)]
        compact: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Manifest {
            input,
            entity,
            compact,
        } => {
            let catalog = load_catalog(&input)?;
            let manifests = manifests(&catalog, entity.as_deref())?;
            print_json(&manifests, compact)
        }
        Command::Normalize { input, compact } => {
            let catalog = load_catalog(&input)?;
            print_json(catalog.schemas(), compact)
        }
    }
}

fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read schemas from stdin")?;
        return Ok(buf);
    }
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn load_catalog(path: &Path) -> Result<SchemaCatalog> {
    let raw = read_input(path)?;
    let json: serde_json::Value =
        serde_json::from_str(&raw).with_context(|| format!("{} is not valid JSON", path.display()))?;

    let schemas: Vec<EntitySchema> = if json.is_array() {
        serde_json::from_value(json).context("expected an array of entity schemas")?
    } else {
        vec![serde_json::from_value(json).context("expected an entity schema")?]
    };

    let mut catalog = SchemaCatalog::from_schemas(schemas).context("invalid schema set")?;
    catalog.normalize().context("schema normalization failed")?;
    Ok(catalog)
}

fn manifests(catalog: &SchemaCatalog, entity: Option<&str>) -> Result<Vec<Manifest>> {
    let selected: Vec<&EntitySchema> = match entity {
        Some(name) => vec![
            catalog
                .get(name)
                .ok_or_else(|| anyhow!("entity '{}' is not in the input", name))?,
        ],
        None => catalog.schemas().iter().collect(),
    };

    selected
        .into_iter()
        .map(|schema| {
            ProxyType::synthesize(schema)
                .map(|proxy_type| proxy_type.manifest().clone())
                .with_context(|| format!("failed to synthesize '{}'", schema.name))
        })
        .collect()
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T, compact: bool) -> Result<()> {
    let out = if compact {
        serde_json::to_string(value)?
    } else {
        serde_json::to_string_pretty(value)?
    };
    println!("{}", out);
    Ok(())
}
