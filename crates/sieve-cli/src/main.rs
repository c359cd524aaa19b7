use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use sieve_contracts::events::EventWriter;
use sieve_contracts::expr::{attribute_names, FORMS};
use sieve_contracts::feedback::Feedback;
use sieve_contracts::models::{ModelSelector, VISION};
use sieve_contracts::scene::{NodeKind, SceneGraph, SceneSnapshot};
use sieve_contracts::schema::Stage;
use sieve_engine::methods::method_names;
use sieve_engine::observation::{frame_images, load_screenshot};
use sieve_engine::{
    ActionStage, Conversation, DescribeStage, MutationPolicy, OpenAiVisionModel, RetryController, RuntimeConfig,
    StageDriver, StepStage,
};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "sieve-rs", version, about = "Structured-output runtime for visual puzzle agents")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load runtime configuration and run the network guard.
    CheckConfig(CheckConfigArgs),
    /// Print the output contract for a stage.
    Schema(SchemaArgs),
    /// Run one recorded model reply against a scene snapshot.
    Replay(ReplayArgs),
    /// Run a full turn against the configured model.
    Solve(SolveArgs),
}

#[derive(Debug, Parser)]
struct CheckConfigArgs {
    #[arg(long)]
    require_browser: bool,
    #[arg(long)]
    require_openai: bool,
}

#[derive(Debug, Parser)]
struct SchemaArgs {
    #[arg(long, default_value = "actions")]
    stage: String,
}

#[derive(Debug, Parser)]
struct ReplayArgs {
    #[arg(long, default_value = "actions")]
    stage: String,
    #[arg(long)]
    scene: PathBuf,
    #[arg(long)]
    response: PathBuf,
    /// Write the mutated scene here on success.
    #[arg(long)]
    out: Option<PathBuf>,
    #[arg(long)]
    no_structure_check: bool,
}

#[derive(Debug, Parser)]
struct SolveArgs {
    #[arg(long, default_value = "actions")]
    stage: String,
    #[arg(long)]
    scene: PathBuf,
    #[arg(long)]
    prompt: PathBuf,
    #[arg(long)]
    screenshot: Option<PathBuf>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long, default_value_t = 3)]
    attempts: usize,
    /// Per-call model timeout in seconds.
    #[arg(long, default_value_t = 30)]
    timeout: u64,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    restore_on_failure: bool,
    #[arg(long)]
    no_structure_check: bool,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("sieve-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::CheckConfig(args) => run_check_config(args),
        Command::Schema(args) => {
            println!("{}", system_prompt(parse_stage(&args.stage)?));
            Ok(0)
        }
        Command::Replay(args) => {
            let (code, report) = replay(&args)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(code)
        }
        Command::Solve(args) => run_solve(args),
    }
}

fn run_check_config(args: CheckConfigArgs) -> Result<i32> {
    let config = RuntimeConfig::from_env();
    config.require(args.require_browser, false, args.require_openai)?;
    let destinations = config.validate(None)?;
    if destinations.is_empty() {
        eprintln!("warning: BENCHMARK_URL is not set; nothing to check");
    }
    for destination in &destinations {
        println!(
            "{}: {} ({:?})",
            destination.name, destination.url, destination.decision
        );
    }
    println!("{config:#?}");
    Ok(0)
}

fn parse_stage(raw: &str) -> Result<Stage> {
    match Stage::parse(raw.trim()) {
        Some(stage) => Ok(stage),
        None => bail!(
            "unknown stage '{raw}' (expected one of: {})",
            Stage::NAMES.join(", ")
        ),
    }
}

fn stage_driver(stage: Stage, structure_check: bool) -> Box<dyn StageDriver> {
    match stage {
        Stage::Describe => Box::new(DescribeStage::new()),
        Stage::Actions => Box::new(ActionStage::new().with_structure_check(structure_check)),
        Stage::Steps => Box::new(StepStage::default()),
    }
}

/// Contract text sent as the system message and printed by `schema`.
fn system_prompt(stage: Stage) -> String {
    let mut lines = vec![
        "Reply with exactly one JSON document and nothing else.".to_string(),
        String::new(),
        format!("Document fields ({stage} stage):"),
    ];
    for (path, constraint) in stage.schema().describe() {
        lines.push(format!("  {path}: {constraint}"));
    }
    lines.push(String::new());
    match stage {
        Stage::Describe => {
            lines.push("Describe every frame you were shown by its id, e.g. \"f0\".".to_string());
            lines.push("Relations point from one frame to another, or to null for the page.".to_string());
        }
        Stage::Actions => {
            lines.push("Operations:".to_string());
            let stage = ActionStage::new();
            lines.extend(stage.registry().catalogue().into_iter().map(|line| format!("  {line}")));
        }
        Stage::Steps => {
            lines.push("Tools:".to_string());
            let stage = StepStage::default();
            lines.extend(stage.tools().signatures().into_iter().map(|line| format!("  {line}")));
            lines.push("Nodes (call methods as \"<node or binding>.<method>\"):".to_string());
            for kind in [NodeKind::Frame, NodeKind::Interactable, NodeKind::Keypoint] {
                lines.push(format!("  {kind} methods: {}", method_names(kind).join(", ")));
                lines.push(format!("  {kind} attributes: {}", attribute_names(kind).join(", ")));
            }
            lines.push(format!("Expression forms: {}", FORMS.join(", ")));
        }
    }
    lines.join("\n")
}

fn load_scene(path: &Path) -> Result<SceneGraph> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read scene ({})", path.display()))?;
    let snapshot: SceneSnapshot = serde_json::from_str(&raw)
        .with_context(|| format!("invalid scene snapshot ({})", path.display()))?;
    SceneGraph::from_snapshot(&snapshot)
        .with_context(|| format!("scene snapshot rejected ({})", path.display()))
}

fn write_scene(path: &Path, scene: &SceneGraph) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let raw = serde_json::to_string_pretty(&scene.snapshot())?;
    fs::write(path, raw).with_context(|| format!("failed to write scene ({})", path.display()))
}

/// Exit code 2 and the feedback payload when the reply is rejected.
fn replay(args: &ReplayArgs) -> Result<(i32, Value)> {
    let stage = parse_stage(&args.stage)?;
    let mut scene = load_scene(&args.scene)?;
    let reply = fs::read_to_string(&args.response)
        .with_context(|| format!("failed to read response ({})", args.response.display()))?;
    let driver = stage_driver(stage, !args.no_structure_check);
    match driver.run_reply(&reply, &mut scene) {
        Ok((parsed, output)) => {
            if let Some(out) = &args.out {
                write_scene(out, &scene)?;
            }
            Ok((
                0,
                json!({
                    "status": "ok",
                    "stage": stage.as_str(),
                    "source": parsed.source.as_str(),
                    "results": output.to_json(),
                }),
            ))
        }
        Err(err) => Ok((2, Feedback::new(1, err.feedback_entries()).to_json())),
    }
}

fn run_solve(args: SolveArgs) -> Result<i32> {
    let stage = parse_stage(&args.stage)?;
    fs::create_dir_all(&args.out)
        .with_context(|| format!("failed to create {}", args.out.display()))?;
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let events = EventWriter::new(&events_path, Uuid::new_v4().to_string());

    let config = RuntimeConfig::from_env();
    config.validate(Some(&events))?;
    config.require(false, false, true)?;

    let selection = ModelSelector::default().select(args.model.as_deref(), VISION)?;
    if let Some(reason) = &selection.fallback_reason {
        eprintln!("warning: {reason} Using {}.", selection.model.name);
    }
    let model = OpenAiVisionModel::from_config(&config, &selection.model.name)
        .context("OPENAI_API_KEY is not set")?;

    let mut scene = load_scene(&args.scene)?;
    let prompt = fs::read_to_string(&args.prompt)
        .with_context(|| format!("failed to read prompt ({})", args.prompt.display()))?;
    let mut images = match &args.screenshot {
        Some(path) => frame_images(&load_screenshot(path)?, &scene)?,
        None => Vec::new(),
    };
    if let Some(limit) = selection.model.max_images {
        images.truncate(limit as usize);
    }
    let mut conversation = Conversation::new(system_prompt(stage));
    conversation.push_user(prompt, images);

    let policy = if args.restore_on_failure {
        MutationPolicy::RestoreOnFailure
    } else {
        MutationPolicy::Retain
    };
    let mut controller = RetryController::new(model)
        .with_max_attempts(args.attempts)
        .with_timeout(Duration::from_secs(args.timeout))
        .with_mutation_policy(policy)
        .with_events(events.clone());
    let driver = stage_driver(stage, !args.no_structure_check);
    let outcome = controller.run_turn(driver.as_ref(), &conversation, &mut scene)?;

    let scene_path = args.out.join("scene.json");
    write_scene(&scene_path, &scene)?;
    println!(
        "{}",
        json!({
            "status": "ok",
            "attempts": outcome.attempts,
            "results": outcome.results_json(),
            "scene": scene_path.display().to_string(),
            "events": events_path.display().to_string(),
        })
    );
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        path
    }

    const SCENE: &str = r#"{"frames": [{"bounds": {"x": 0, "y": 0, "width": 400, "height": 300}}]}"#;

    #[test]
    fn unknown_stage_lists_choices() {
        let err = parse_stage("shell").unwrap_err();
        assert!(err.to_string().contains("describe, actions, steps"));
        assert_eq!(parse_stage(" steps ").unwrap(), Stage::Steps);
    }

    #[test]
    fn system_prompt_carries_the_whitelists() {
        let actions = system_prompt(Stage::Actions);
        assert!(actions.contains("$.actions[].op"));
        assert!(actions.contains("split("));

        let describe = system_prompt(Stage::Describe);
        assert!(describe.contains("$.descriptions[].frame"));
        assert!(describe.contains("$.objective: string (required)"));

        let steps = system_prompt(Stage::Steps);
        assert!(steps.contains("frame methods: split"));
        assert!(steps.contains("click("));
        assert!(steps.contains("Expression forms: var"));
    }

    #[test]
    fn replay_applies_reply_and_writes_scene() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let args = ReplayArgs {
            stage: "actions".to_string(),
            scene: write(temp.path(), "scene.json", SCENE),
            response: write(
                temp.path(),
                "reply.txt",
                "```json\n{\"actions\":[{\"op\":\"split\",\"args\":{\"axis\":\"x\",\"ratio\":0.5}}]}\n```",
            ),
            out: Some(temp.path().join("out/scene.json")),
            no_structure_check: true,
        };
        let (code, report) = replay(&args)?;
        assert_eq!(code, 0);
        assert_eq!(report["source"], "fenced");
        assert_eq!(report["results"], json!([["f1", "f2"]]));

        let written = load_scene(&temp.path().join("out/scene.json"))?;
        assert_eq!(written.terminal_frames().count(), 2);
        Ok(())
    }

    #[test]
    fn replay_describe_stage_stores_objective() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let args = ReplayArgs {
            stage: "describe".to_string(),
            scene: write(temp.path(), "scene.json", SCENE),
            response: write(
                temp.path(),
                "reply.txt",
                r#"{"descriptions":[{"frame":"f0","text":"slider puzzle"}],"objective":"Drag the piece into the gap."}"#,
            ),
            out: Some(temp.path().join("described.json")),
            no_structure_check: false,
        };
        let (code, report) = replay(&args)?;
        assert_eq!(code, 0);
        assert_eq!(report["results"], json!(["Drag the piece into the gap."]));

        let written = load_scene(&temp.path().join("described.json"))?;
        assert_eq!(written.objective(), Some("Drag the piece into the gap."));
        Ok(())
    }

    #[test]
    fn replay_rejection_prints_feedback() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let args = ReplayArgs {
            stage: "actions".to_string(),
            scene: write(temp.path(), "scene.json", SCENE),
            response: write(temp.path(), "reply.txt", r#"{"actions":[{"op":"shell","args":{}}]}"#),
            out: None,
            no_structure_check: false,
        };
        let (code, report) = replay(&args)?;
        assert_eq!(code, 2);
        assert_eq!(report["status"], "rejected");
        assert_eq!(report["errors"][0]["kind"], "unknown_operation");
        Ok(())
    }
}
