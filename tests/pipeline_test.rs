use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use frugal_prompts::config::{Config, DispatchConfig};
use frugal_prompts::dispatch::{LocalDispatcher, RateLimitedDispatcher};
use frugal_prompts::eval::report::{summarize, ResultsObject};
use frugal_prompts::eval::{Evaluator, Metric};
use frugal_prompts::generation::{run_generation, Dispatcher};
use frugal_prompts::prompt::filler::PromptBuilder;
use frugal_prompts::prompt::template::TemplateTable;
use frugal_prompts::prompt::ShapeFlags;
use frugal_prompts::responder::{Responder, ResponderError};

/// Replies "reply to <utterance>" using the utterance line of the prompt.
struct Parrot;

#[async_trait]
impl Responder for Parrot {
    async fn respond(&self, prompts: &[String]) -> Result<Vec<String>, ResponderError> {
        Ok(prompts
            .iter()
            .map(|p| {
                let utterance = p.lines().rev().nth(1).unwrap_or("");
                format!("Person2: reply to {}", utterance.trim_start_matches("Person1 says: "))
            })
            .collect())
    }

    fn model_name(&self) -> &str {
        "parrot"
    }
}

fn context_lines() -> Vec<Value> {
    vec![
        json!({"history": "__SILENCE__", "current_utterance": "Person1: hi", "response": "Person2: reply to Person1: hi", "summary": "They greet."}),
        json!({"history": "Person1: hi\nPerson2: hello", "current_utterance": "Person1: do you like jazz", "response": "Person2: reply to Person1: do you like jazz", "summary": "They greet."}),
        json!({"history": "Person1: hi\nPerson2: hello\nPerson1: do you like jazz", "current_utterance": "Person1: what about blues", "response": "Person2: i prefer rock", "summary": "They talk about jazz."}),
    ]
}

fn write_context(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("full.txt");
    let body: Vec<String> = context_lines().iter().map(Value::to_string).collect();
    std::fs::write(&path, body.join("\n")).unwrap();
    path
}

#[tokio::test]
async fn test_generate_then_evaluate() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_context(dir.path());

    // 1. Template from the shipped table
    let table = TemplateTable::load(std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("templates.toml").as_path()).unwrap();
    let query = frugal_prompts::prompt::template::TemplateQuery {
        model: "flan-t5",
        prompt_type: "manual",
        few_shot: false,
        background_knowledge: false,
        history_signal: "full",
        dataset: "MSC",
    };
    let template = table.lookup(&query).unwrap();
    let flags = ShapeFlags { use_shorter_template: true, ..Default::default() };
    let builder = PromptBuilder::new(Some(template), flags.resolve()).unwrap();

    // 2. Generate with a local dispatcher, two batches in flight
    let dispatcher = Dispatcher::Local(LocalDispatcher::new(Arc::new(Parrot), 1, 2));
    let output = dir.path().join("outputs/MSC/flan-t5_manual_zs_nbk_full.jsonl");
    let summary = run_generation(&builder, &dispatcher, &input, &output, &dir.path().join("tmp"))
        .await
        .unwrap();
    assert_eq!(summary.prompts, 2);
    assert_eq!(summary.written, 2);

    let lines: Vec<Value> = std::fs::read_to_string(&output)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines[0]["id"], 1);
    assert_eq!(lines[1]["id"], 2);
    assert!(lines[0]["prompts"].as_str().unwrap().starts_with("Summary of the conversation so far: They greet."));

    // 3. Evaluate
    let evaluator = Evaluator::new(&Config::default());
    let evaluation = evaluator
        .compute(&output, &[Metric::Bleu, Metric::Rouge, Metric::Length])
        .await
        .unwrap();
    assert_eq!(evaluation.evaluated_instances, 2);
    assert!(evaluation.logs.is_empty());

    // the first reply echoes its gold response, the second does not
    let rouge_l = &evaluation.scores["rouge"]["rougeL"];
    assert!(rouge_l[0] > rouge_l[1]);

    // 4. Reduce against the dataset size
    let reduced = summarize(&evaluation, 4);
    let results = ResultsObject::from_reduced(&reduced);
    assert!(results.prompt_len > 0.0);
    assert!(results.bertscore_f1.is_none());
    let scaled = evaluation.scores["length"]["response_length"].iter().sum::<f64>() / 2.0 * 0.5;
    assert!((results.output_len.unwrap() - scaled).abs() < 1e-12);
}

#[tokio::test]
async fn test_exhausted_batches_still_produce_lines() {
    struct Down;

    #[async_trait]
    impl Responder for Down {
        async fn respond(&self, _prompts: &[String]) -> Result<Vec<String>, ResponderError> {
            Err(ResponderError::Api { status: 503, message: "overloaded".into() })
        }
        fn model_name(&self) -> &str {
            "down"
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let input = write_context(dir.path());
    let flags = ShapeFlags { use_shorter_template: true, current_utterance_only: true, ..Default::default() };
    let template = frugal_prompts::prompt::template::TemplateSpec::parse("Person1 says: {}\nPerson2 replies:").unwrap();
    let builder = PromptBuilder::new(Some(template), flags.resolve()).unwrap();
    let dispatcher = Dispatcher::RateLimited(
        RateLimitedDispatcher::new(Arc::new(Down), 2, &DispatchConfig::default()).with_timing(Duration::ZERO, Duration::ZERO),
    );

    let output = dir.path().join("out.jsonl");
    let summary = run_generation(&builder, &dispatcher, &input, &output, &dir.path().join("tmp"))
        .await
        .unwrap();
    assert_eq!(summary.written, 2);

    let evaluation = Evaluator::new(&Config::default())
        .compute(&output, &[Metric::Length])
        .await
        .unwrap();
    // empty predictions are scored as the sentinel
    assert_eq!(evaluation.scores["length"]["response_length"], vec![2.0, 2.0]);
}

#[test]
fn test_template_subcommand_prints_template() {
    let output = Command::new(env!("CARGO_BIN_EXE_frugal-prompts"))
        .args(["template", "-m", "flan-t5", "--prompt-type", "manual", "--hst", "none"])
        .current_dir(env!("CARGO_MANIFEST_DIR"))
        .stderr(Stdio::null())
        .output()
        .expect("Failed to run frugal-prompts");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim_end(), "Person1 says: {}\nPerson2 replies:");
}

#[test]
fn test_invalid_experiment_is_rejected() {
    let status = Command::new(env!("CARGO_BIN_EXE_frugal-prompts"))
        .args(["template", "-m", "dv3", "--prompt-type", "ppl"])
        .current_dir(env!("CARGO_MANIFEST_DIR"))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .expect("Failed to run frugal-prompts");
    assert!(!status.success());
}

#[test]
fn test_ground_truth_subcommand() {
    let dir = tempfile::tempdir().unwrap();
    let dump = dir.path().join("tc.json");
    std::fs::write(
        &dump,
        json!({"t_1": {"content": [{"message": "hi there"}, {"message": "hello , friend"}, {"message": "how are you"}]}}).to_string(),
    )
    .unwrap();
    let out = dir.path().join("gt/tc_previous_utterances.txt");

    let status = Command::new(env!("CARGO_BIN_EXE_frugal-prompts"))
        .args(["ground-truth", "--source", "topical-chat", "--input"])
        .arg(&dump)
        .arg("--output")
        .arg(&out)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .expect("Failed to run frugal-prompts");
    assert!(status.success());

    let content = std::fs::read_to_string(&out).unwrap();
    let turns: Vec<Value> = content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0]["history"], "__SILENCE__");
}

#[test]
fn test_ground_truth_multi_session_chat() {
    let dir = tempfile::tempdir().unwrap();
    let dump = dir.path().join("msc.jsonl");
    let dialogue = json!({
        "dialog": [{"text": "back again"}, {"text": "welcome"}, {"text": "how was it"}, {"text": "fun"}],
        "previous_dialogs": [{"dialog": [{"text": "hello"}, {"text": "hi"}, {"text": "bye"}]}]
    });
    std::fs::write(&dump, format!("{}\n", dialogue)).unwrap();
    let out = dir.path().join("msc_previous_utterances.txt");

    let status = Command::new(env!("CARGO_BIN_EXE_frugal-prompts"))
        .args(["ground-truth", "--source", "multi-session-chat", "--msc-version", "2", "--input"])
        .arg(&dump)
        .arg("--output")
        .arg(&out)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .expect("Failed to run frugal-prompts");
    assert!(status.success());

    let turns: Vec<Value> = std::fs::read_to_string(&out)
        .unwrap()
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0]["current_utterance"], "Welcome.");
    assert_eq!(turns[0]["history"], "__SILENCE__\nhello\nhi\nbye");
}

#[test]
fn test_eval_flag_only_on_generate() {
    for subcommand in ["evaluate", "template"] {
        let status = Command::new(env!("CARGO_BIN_EXE_frugal-prompts"))
            .args([subcommand, "-m", "flan-t5", "--prompt-type", "manual", "--hst", "none", "-e"])
            .current_dir(env!("CARGO_MANIFEST_DIR"))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .expect("Failed to run frugal-prompts");
        assert!(!status.success(), "{} accepted -e", subcommand);
    }
}
