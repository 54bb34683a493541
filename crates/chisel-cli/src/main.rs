use std::path::PathBuf;

use anyhow::{bail, Result};
use chisel_contracts::models::{EngineRegistry, Operation};
use chisel_contracts::providers::Provider;
use chisel_engine::adapters::StabilityAdapter;
use chisel_engine::ops::providers_for;
use chisel_engine::storage::LocalFs;
use chisel_engine::{ApiResult, ChiselConfig, Data, FnStage, ImageRef, LinearFlow, Op, ProviderContext};
use clap::{Args, Parser, Subcommand};
use serde_json::{Map, Value};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "chisel", version, about = "Image generation API adapters")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate images from a prompt.
    Txt2img(Txt2ImgArgs),
    /// Rework an existing image guided by a prompt.
    Img2img(Img2ImgArgs),
    /// Inpaint the masked region of an image.
    Edit(EditArgs),
    /// Upscale an image.
    Upscale(UpscaleArgs),
    /// Generate from a prompt, then upscale the first result.
    Flow(FlowArgs),
    /// Delete every file in the temp store.
    Purge(PurgeArgs),
    /// List which providers (and engines) can perform each operation.
    Providers(ProvidersArgs),
}

#[derive(Debug, Args)]
struct CommonArgs {
    #[arg(long, default_value = "stable_diffusion_api")]
    provider: Provider,
    /// Vendor parameter override; the value is parsed as JSON, else kept as text.
    #[arg(long = "param", value_name = "KEY=VALUE")]
    params: Vec<String>,
    /// Engine (stability_ai) or model id (hf).
    #[arg(long)]
    engine: Option<String>,
    #[arg(long)]
    storage_dir: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct Txt2ImgArgs {
    prompt: String,
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Debug, Parser)]
struct Img2ImgArgs {
    prompt: String,
    /// Local path or http(s) URL.
    #[arg(long)]
    image: String,
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Debug, Parser)]
struct EditArgs {
    prompt: String,
    #[arg(long)]
    image: String,
    #[arg(long)]
    mask: String,
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Debug, Parser)]
struct UpscaleArgs {
    #[arg(long)]
    image: String,
    #[arg(long)]
    prompt: Option<String>,
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Debug, Parser)]
struct FlowArgs {
    prompt: String,
    #[arg(long)]
    upscale_provider: Option<Provider>,
    /// Extra prompt handed to the upscaler alongside the generated image.
    #[arg(long)]
    upscale_prompt: Option<String>,
    #[arg(long)]
    events: Option<PathBuf>,
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Debug, Parser)]
struct PurgeArgs {
    #[arg(long)]
    storage_dir: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct ProvidersArgs {
    /// Only show this operation, e.g. txt2img or upscale.
    #[arg(long)]
    operation: Option<Operation>,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("chisel error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Txt2img(args) => {
            let mut op = build_op(Operation::TxtToImg, &args.common)?;
            print_result(&op.call(args.prompt)?);
        }
        Command::Img2img(args) => {
            let mut op = build_op(Operation::ImgToImg, &args.common)?;
            let input = Data::List(vec![
                Data::from(args.prompt),
                Data::from(ImageRef::parse(&args.image)),
            ]);
            print_result(&op.call(input)?);
        }
        Command::Edit(args) => {
            let mut op = build_op(Operation::ImgEdit, &args.common)?;
            let input = Data::List(vec![
                Data::from(args.prompt),
                Data::from(ImageRef::parse(&args.image)),
                Data::from(ImageRef::parse(&args.mask)),
            ]);
            print_result(&op.call(input)?);
        }
        Command::Upscale(args) => {
            let mut op = build_op(Operation::SuperRes, &args.common)?;
            let image = Data::from(ImageRef::parse(&args.image));
            let input = match args.prompt {
                Some(prompt) => Data::List(vec![Data::from(prompt), image]),
                None => image,
            };
            print_result(&op.call(input)?);
        }
        Command::Flow(args) => return run_flow(args),
        Command::Purge(args) => {
            let config = load_config(args.storage_dir.as_ref());
            let store = LocalFs::new(&config.storage_dir)?;
            let removed = store.cleanup_tmp_storage();
            println!("removed {removed} file(s) from {}", store.tmp_dir().display());
        }
        Command::Providers(args) => {
            let operations = match args.operation {
                Some(operation) => vec![operation],
                None => Operation::ALL.to_vec(),
            };
            for line in support_lines(&EngineRegistry::default(), &operations) {
                println!("{line}");
            }
        }
    }
    Ok(0)
}

fn run_flow(args: FlowArgs) -> Result<i32> {
    let mut flow = LinearFlow::new();
    if let Some(events) = &args.events {
        flow = flow.with_events(events);
    }
    flow.add(build_op(Operation::TxtToImg, &args.common)?);

    if let Some(upscale_provider) = args.upscale_provider {
        let upscale_common = CommonArgs {
            provider: upscale_provider,
            params: Vec::new(),
            engine: None,
            storage_dir: args.common.storage_dir.clone(),
        };
        if let Some(upscale_prompt) = args.upscale_prompt.clone() {
            flow.add(FnStage::new("attach_upscale_prompt", move |input: Data| {
                Ok(Data::List(vec![Data::from(upscale_prompt.clone()), input]))
            }));
        }
        flow.add(build_op(Operation::SuperRes, &upscale_common)?);
    }

    let output = flow.call(args.prompt)?;
    match output.as_result() {
        Some(result) => print_result(result),
        None => bail!("flow finished without images ({} output)", output.kind_name()),
    }
    if let Some(events) = flow.events() {
        eprintln!("events: {}", events.path().display());
    }
    Ok(0)
}

fn support_lines(registry: &EngineRegistry, operations: &[Operation]) -> Vec<String> {
    let mut lines = Vec::new();
    for &operation in operations {
        lines.push(format!(
            "{operation} ({} -> {})",
            operation.input_kind(),
            operation.output_kind()
        ));
        for provider in providers_for(operation) {
            let engines = registry
                .for_provider(provider, operation)
                .into_iter()
                .map(|engine| engine.name)
                .collect::<Vec<String>>();
            if engines.is_empty() {
                lines.push(format!("  {provider}"));
            } else {
                lines.push(format!("  {provider}: {}", engines.join(", ")));
            }
        }
    }
    lines
}

fn load_config(storage_dir: Option<&PathBuf>) -> ChiselConfig {
    let config = ChiselConfig::from_env();
    match storage_dir {
        Some(dir) => config.with_storage_dir(dir),
        None => config,
    }
}

fn build_op(operation: Operation, common: &CommonArgs) -> Result<Op> {
    let config = load_config(common.storage_dir.as_ref());
    let ctx = ProviderContext::from_config(&config)?;
    let mut params = parse_params(&common.params)?;

    let mut op = match (common.provider, common.engine.as_deref()) {
        (Provider::StabilityAi, Some(engine)) => Op::from_adapter(Box::new(
            StabilityAdapter::with_engine(ctx, operation, Some(engine))?,
        )),
        (Provider::HuggingFace, Some(model_id)) => {
            params.insert("model_id".to_string(), Value::String(model_id.to_string()));
            Op::new(operation, Provider::HuggingFace, ctx)?
        }
        (provider, Some(_)) => bail!("--engine is not supported for {provider}"),
        (provider, None) => Op::new(operation, provider, ctx)?,
    };

    let dropped = op.set_params(&params);
    if !dropped.is_empty() {
        tracing::warn!(op = %op.name(), ?dropped, "ignored unknown params");
    }
    Ok(op)
}

fn parse_params(raw: &[String]) -> Result<Map<String, Value>> {
    let mut params = Map::new();
    for entry in raw {
        let (key, value) = parse_param(entry)?;
        params.insert(key, value);
    }
    Ok(params)
}

fn parse_param(raw: &str) -> Result<(String, Value)> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("--param expects KEY=VALUE, got '{raw}'");
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("--param key is empty in '{raw}'");
    }
    let value = value.trim();
    let parsed = serde_json::from_str::<Value>(value)
        .unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), parsed))
}

fn print_result(result: &ApiResult) {
    for record in result {
        match &record.remote_url {
            Some(url) => println!("{} {url}", record.local_path.display()),
            None => println!("{}", record.local_path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use serde_json::json;

    use super::{parse_param, parse_params, support_lines, Cli, Command};
    use chisel_contracts::models::{EngineRegistry, Operation};
    use chisel_contracts::providers::Provider;

    #[test]
    fn param_values_parse_as_json_or_text() {
        assert_eq!(parse_param("width=768").unwrap(), ("width".to_string(), json!(768)));
        assert_eq!(
            parse_param("safety_checker=no").unwrap(),
            ("safety_checker".to_string(), json!("no"))
        );
        assert_eq!(
            parse_param(" seed = null ").unwrap(),
            ("seed".to_string(), json!(null))
        );
        assert_eq!(
            parse_param("prompt=a=b").unwrap(),
            ("prompt".to_string(), json!("a=b"))
        );
    }

    #[test]
    fn malformed_params_are_rejected() {
        assert!(parse_param("width").is_err());
        assert!(parse_param("=3").is_err());
        assert!(parse_params(&["n=2".to_string(), "oops".to_string()]).is_err());
    }

    #[test]
    fn later_params_override_earlier_ones() {
        let params = parse_params(&["n=1".to_string(), "n=3".to_string()]).unwrap();
        assert_eq!(params.get("n"), Some(&json!(3)));
    }

    #[test]
    fn cli_parses_provider_aliases_and_repeated_params() {
        let cli = Cli::try_parse_from([
            "chisel",
            "txt2img",
            "a cat",
            "--provider",
            "stability",
            "--param",
            "steps=40",
            "--param",
            "cfg_scale=7",
        ])
        .unwrap();
        let Command::Txt2img(args) = cli.command else {
            panic!("expected txt2img");
        };
        assert_eq!(args.prompt, "a cat");
        assert_eq!(args.common.provider, Provider::StabilityAi);
        assert_eq!(args.common.params, vec!["steps=40", "cfg_scale=7"]);
    }

    #[test]
    fn cli_rejects_unknown_provider() {
        let err = Cli::try_parse_from(["chisel", "txt2img", "a cat", "--provider", "midjourney"])
            .unwrap_err()
            .to_string();
        assert!(err.contains("Unknown provider 'midjourney'"));
    }

    #[test]
    fn providers_accepts_operation_aliases() {
        let cli = Cli::try_parse_from(["chisel", "providers", "--operation", "upscale"]).unwrap();
        let Command::Providers(args) = cli.command else {
            panic!("expected providers");
        };
        assert_eq!(args.operation, Some(Operation::SuperRes));
        assert!(Cli::try_parse_from(["chisel", "providers", "--operation", "sketch"]).is_err());
    }

    #[test]
    fn support_lines_list_providers_with_their_engines() {
        let lines = support_lines(&EngineRegistry::default(), &[Operation::SuperRes]);
        assert_eq!(
            lines,
            vec![
                "super_res (image -> image)".to_string(),
                "  stability_ai: stable-diffusion-x4-latent-upscaler, esrgan-v1-x2plus".to_string(),
                "  stable_diffusion_api".to_string(),
            ]
        );

        let lines = support_lines(&EngineRegistry::default(), &[Operation::TxtToImg]);
        assert_eq!(lines[0], "txt_to_img (text -> image)");
    }
}
