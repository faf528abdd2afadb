use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::Path;
use tracing_subscriber::EnvFilter;

// Import from chunkmaster-core
use chunkmaster_core::{
    print_validation_report, DocumentOutput, DocumentProcessor, EngineConfig, HtmlPreprocessor,
    InputFormat, ModelValidator, PipelineStages, Preprocessor, StepProfiler,
};

#[derive(Parser)]
#[command(name = "chunkmaster")]
#[command(about = "Restructure generated study guides into typed documents")]
struct Args {
    /// Path to the study guide (Markdown or HTML)
    #[arg(short, long)]
    input: String,

    /// Path to custom config file (YAML format)
    #[arg(short, long)]
    config: Option<String>,

    /// Input format: auto, markdown, or html
    #[arg(long, default_value = "auto")]
    format: String,

    /// Output file path (if not specified, auto-generated based on input)
    #[arg(short, long)]
    output: Option<String>,

    /// Output format: json, yaml, or outline
    #[arg(short = 'f', long, default_value = "json")]
    output_format: String,

    /// Only run the hierarchy repair and write the repaired HTML
    #[arg(long)]
    repair_only: bool,

    /// Skip the hierarchy repair pre-pass
    #[arg(long)]
    no_repair: bool,

    /// Check the produced document (and repaired tree) and print a report
    #[arg(long)]
    validate: bool,

    /// Enable detailed profiling of all pipeline steps
    #[arg(long)]
    profile: bool,

    /// Dump all intermediate pipeline stage outputs to a directory
    #[arg(long)]
    dump_stages: bool,

    /// Directory for stage dump output
    #[arg(long, default_value = "test_outputs/stages")]
    stages_dir: String,

    /// Print the effective configuration as YAML and exit
    #[arg(long)]
    show_config: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args = Args::parse();

    println!("🦀 ChunkMaster Study Guide Restructurer");

    let config = EngineConfig::load_with_fallback(args.config.as_deref());
    if let Some(config_path) = &args.config {
        println!("📋 Loaded config from: {}", config_path);
    } else {
        println!("📋 Using default config");
    }

    if args.show_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    let input_path = Path::new(&args.input);
    if !input_path.exists() {
        eprintln!("❌ Input file not found: {}", args.input);
        std::process::exit(1);
    }

    if let Err(e) = run(&args, config, input_path) {
        eprintln!("❌ Processing failed: {e}");
        std::process::exit(1);
    }

    Ok(())
}

fn run(args: &Args, config: EngineConfig, input_path: &Path) -> Result<()> {
    let format = parse_format(&args.format)?;
    let raw = std::fs::read_to_string(input_path)?;
    let validator = ModelValidator::new(&config)?;

    // Apply CLI overrides to config
    let mut processor = DocumentProcessor::new(config)?;
    if args.no_repair {
        processor.set_repair_pre_pass(false);
    }

    println!("📄 Processing: {}", args.input);

    if args.repair_only {
        let (html, report) = processor.repair_str(&raw, format)?;
        let output_path = args
            .output
            .clone()
            .unwrap_or_else(|| default_output_path(input_path, "repaired.html"));
        std::fs::write(&output_path, &html)?;
        println!(
            "✅ Repair attached {} sub-challenge(s) under {} achievement(s), {} unattached",
            report.attached, report.achievements, report.unattached
        );
        println!("💾 Repaired HTML saved to: {}", output_path);
        if args.validate {
            validate_repaired_html(&validator, &html)?;
        }
        return Ok(());
    }

    // Stage dump mode: capture and save all intermediates
    if args.dump_stages {
        println!("\n🔬 Pipeline stage dump mode");
        let stages = processor.process_capture_stages(&raw, format)?;
        save_stages(&stages, &args.stages_dir)?;
        println!("\n✅ All stages dumped to: {}", args.stages_dir);
        return Ok(());
    }

    let mut profiler = StepProfiler::new(args.profile);
    let output =
        processor.process_with_profiler(&raw, format, Some(input_path), &mut profiler)?;
    profiler.print_summary();
    if args.profile {
        println!("\n📊 Rule Timings:");
        for (rule, duration) in processor.engine().timing_totals() {
            println!("   {:.<35} {:.3}ms", rule, duration.as_secs_f64() * 1000.0);
        }
    }

    println!("✅ Successfully restructured document");
    println!("📊 Document metrics:");
    println!("   - Title: {}", output.document.title);
    println!("   - Parts: {}", output.document.parts.len());
    if let Some(report) = &output.repair_report {
        println!(
            "   - Sub-challenges attached: {} ({} unattached)",
            report.attached, report.unattached
        );
    }

    if args.validate {
        print_validation_report(&validator.validate_document(&output.document));
        if output.repair_report.is_some() {
            let (html, _) = processor.repair_str(&raw, format)?;
            validate_repaired_html(&validator, &html)?;
        }
    }

    let output_path = args.output.clone().unwrap_or_else(|| {
        let extension = match args.output_format.as_str() {
            "yaml" => "yaml",
            "outline" => "txt",
            _ => "json",
        };
        default_output_path(input_path, &format!("chunkmaster.{extension}"))
    });
    save_output(&output, &output_path, &args.output_format)
}

fn parse_format(format: &str) -> Result<Option<InputFormat>> {
    match format.to_ascii_lowercase().as_str() {
        "auto" => Ok(None),
        "markdown" | "md" => Ok(Some(InputFormat::Markdown)),
        "html" => Ok(Some(InputFormat::Html)),
        other => Err(anyhow!("unknown input format '{other}' (expected auto, markdown or html)")),
    }
}

fn default_output_path(input_path: &Path, suffix: &str) -> String {
    let input_name = input_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    format!("{input_name}_{suffix}")
}

fn validate_repaired_html(validator: &ModelValidator, html: &str) -> Result<()> {
    let tree = HtmlPreprocessor::new().parse(html)?;
    print_validation_report(&validator.validate_repaired_tree(&tree));
    Ok(())
}

fn save_stages(stages: &PipelineStages, output_dir: &str) -> Result<()> {
    use std::fs;
    fs::create_dir_all(output_dir)?;

    // Stage 1: Parsed tree
    let parsed_path = format!("{}/stage1_parsed.html", output_dir);
    fs::write(&parsed_path, &stages.parsed_html)?;
    println!("  💾 {}", parsed_path);

    // Stage 2: Repaired tree
    if let Some(repaired) = &stages.repaired_html {
        let repaired_path = format!("{}/stage2_repaired.html", output_dir);
        fs::write(&repaired_path, repaired)?;
        println!("  💾 {}", repaired_path);
    }

    // Stage 3: Final document
    let document_path = format!("{}/stage3_document.json", output_dir);
    fs::write(&document_path, serde_json::to_string_pretty(&stages.document)?)?;
    println!("  💾 {} ({} parts)", document_path, stages.document.parts.len());

    // Summary file: quick reference for validation scripts
    let summary = serde_json::json!({
        "captured_at": chrono::Utc::now().to_rfc3339(),
        "input_format": stages.input_format,
        "confidence": stages.confidence,
        "title": stages.document_title,
        "part_titles": stages.part_titles,
        "conclusion_synthesized": stages.conclusion_synthesized,
        "repair_report": stages.repair_report,
    });
    let summary_path = format!("{}/summary.json", output_dir);
    fs::write(&summary_path, serde_json::to_string_pretty(&summary)?)?;
    println!("  💾 {}", summary_path);

    Ok(())
}

fn save_output(output: &DocumentOutput, output_path: &str, format: &str) -> Result<()> {
    output.save_with_format(output_path, format)?;

    match format {
        "yaml" => println!("💾 YAML results saved to: {}", output_path),
        "outline" => println!("💾 Outline saved to: {}", output_path),
        "json" => println!("💾 JSON results saved to: {}", output_path),
        _ => {
            println!("⚠️  Unknown output format '{}', using default json format", format);
            println!("💾 JSON results saved to: {}", output_path);
        }
    }

    Ok(())
}
