use anyhow::{anyhow, bail, Result};
use motif_atlas::contribution::ContributionPanel;
use motif_atlas::dot_bracket::{validate_structure, CandidateStructure, SAMPLE_STRUCTURES};
use motif_atlas::motif::Motif;
use motif_atlas::progress::{ProgressTracker, SubmissionPhase};
use motif_atlas::session::SubmissionSession;
use motif_atlas::submission::api_base_url;
use serde::Serialize;
use std::{env, fs, thread, time::Duration};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Serialize)]
struct MotifSummary {
    id: String,
    new: bool,
    length: usize,
    num_occurrences: u64,
    loops: usize,
    dot_bracket: String,
    svg_bytes: usize,
}

fn usage() {
    eprintln!(
        "Usage:\n  \
  motif_atlas_cli --version\n  \
  motif_atlas_cli samples\n  \
  motif_atlas_cli validate <structure-or-@file>\n  \
  motif_atlas_cli submit <structure-or-@file> [options]\n\n\
Submit options:\n  \
  --cancel-after SECONDS   abort the analysis after SECONDS\n  \
  --no-wait                skip the redirect countdown after results\n  \
  --contribute             offer newly discovered motifs to the shared catalog\n  \
  --name NAME              attribution name for the contribution\n  \
  --email EMAIL            attribution email for the contribution\n  \
  --save-structure         include the input structure in the contribution\n\n  \
  Backend base URL comes from MOTIF_ATLAS_API_URL (default http://127.0.0.1:5000)"
    );
}

fn load_structure_arg(value: &str) -> Result<String> {
    if let Some(path) = value.strip_prefix('@') {
        fs::read_to_string(path).map_err(|e| anyhow!("Could not read structure file '{path}': {e}"))
    } else {
        Ok(value.to_string())
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    println!("{text}");
    Ok(())
}

fn summarize(motifs: &[Motif]) -> Vec<MotifSummary> {
    motifs
        .iter()
        .map(|m| MotifSummary {
            id: m.id.clone(),
            new: m.is_new(),
            length: m.length,
            num_occurrences: m.num_occurrences,
            loops: m.loops,
            dot_bracket: m.dot_bracket.clone(),
            svg_bytes: m.svg.len(),
        })
        .collect()
}

fn cmd_samples() -> Result<()> {
    for (name, structure) in SAMPLE_STRUCTURES {
        println!("{name}: {structure}");
    }
    Ok(())
}

fn cmd_validate(raw: &str) -> Result<()> {
    let structure = validate_structure(raw).map_err(|e| anyhow!("{e}"))?;
    println!("{structure}");
    Ok(())
}

#[derive(Default)]
struct SubmitOptions {
    cancel_after: Option<Duration>,
    no_wait: bool,
    contribute: bool,
    name: String,
    email: String,
    save_structure: bool,
}

fn parse_submit_options(args: &[String]) -> Result<SubmitOptions> {
    let mut options = SubmitOptions::default();
    let mut idx = 0usize;
    while idx < args.len() {
        match args[idx].as_str() {
            "--cancel-after" => {
                let value = args
                    .get(idx + 1)
                    .ok_or_else(|| anyhow!("Missing value after --cancel-after"))?;
                let seconds: f64 = value
                    .parse()
                    .map_err(|_| anyhow!("Invalid --cancel-after value '{value}'"))?;
                if !seconds.is_finite() || seconds < 0.0 {
                    bail!("--cancel-after must be a non-negative number of seconds");
                }
                options.cancel_after = Some(Duration::from_secs_f64(seconds));
                idx += 2;
            }
            "--no-wait" => {
                options.no_wait = true;
                idx += 1;
            }
            "--contribute" => {
                options.contribute = true;
                idx += 1;
            }
            "--name" => {
                options.name = args
                    .get(idx + 1)
                    .ok_or_else(|| anyhow!("Missing value after --name"))?
                    .clone();
                idx += 2;
            }
            "--email" => {
                options.email = args
                    .get(idx + 1)
                    .ok_or_else(|| anyhow!("Missing value after --email"))?
                    .clone();
                idx += 2;
            }
            "--save-structure" => {
                options.save_structure = true;
                idx += 1;
            }
            other => bail!("Unknown submit option '{other}'. Try: motif_atlas_cli"),
        }
    }
    Ok(options)
}

fn run_contribution(
    structure: &CandidateStructure,
    motifs: &[Motif],
    options: &SubmitOptions,
) -> Result<()> {
    let Some(mut panel) = ContributionPanel::offer(motifs, Some(structure.clone())) else {
        println!("No newly discovered motifs; nothing to contribute.");
        return Ok(());
    };
    panel.edit_name(&options.name);
    panel.edit_email(&options.email);
    panel.set_save_structure(options.save_structure);
    let outcome = panel.submit(&api_base_url()).map_err(|e| anyhow!("{e}"))?;
    if outcome.ok {
        println!("Contribution accepted: {}", outcome.message);
        Ok(())
    } else {
        bail!("Contribution rejected: {}", outcome.message)
    }
}

fn cmd_submit(raw: &str, options: &SubmitOptions) -> Result<()> {
    let structure = validate_structure(raw).map_err(|e| anyhow!("{e}"))?;
    println!("Input structure: {structure}");

    let mut tracker = ProgressTracker::new();
    tracker.begin();
    let mut session = SubmissionSession::begin(structure.clone());
    let started = std::time::Instant::now();
    let mut printed = 0usize;
    loop {
        let finished = session.poll(&mut tracker);
        for line in &tracker.progress_log()[printed.min(tracker.progress_log().len())..] {
            println!("{line}");
        }
        printed = tracker.progress_log().len();
        if finished {
            break;
        }
        if let Some(cancel_after) = options.cancel_after {
            if started.elapsed() >= cancel_after {
                eprintln!("Cancelling analysis ...");
                session.cancel();
            }
        }
        thread::sleep(POLL_INTERVAL);
    }

    match tracker.phase() {
        SubmissionPhase::Cancelled => {
            println!("{}", tracker.headline());
            Ok(())
        }
        SubmissionPhase::Failed => bail!(
            "{}",
            tracker.error_message().unwrap_or("analysis failed")
        ),
        SubmissionPhase::Succeeded => {
            println!("{}", tracker.headline());
            for line in tracker.display_lines() {
                println!("{line}");
            }
            let motifs = tracker.result().unwrap_or_default().to_vec();
            print_json(&summarize(&motifs))?;

            if !options.no_wait {
                while let Some(remaining) = tracker.redirect_remaining() {
                    if remaining == 0 {
                        break;
                    }
                    println!("Redirecting in {remaining} seconds");
                    thread::sleep(Duration::from_secs(1));
                    if tracker.tick_redirect() {
                        break;
                    }
                }
            }
            if options.contribute {
                run_contribution(&structure, &motifs, options)?;
            }
            Ok(())
        }
        SubmissionPhase::Idle | SubmissionPhase::Submitting => {
            bail!("Analysis ended without a terminal state")
        }
    }
}

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("--version") => {
            println!("motif_atlas_cli {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some("samples") => cmd_samples(),
        Some("validate") => {
            let raw = args
                .get(2)
                .ok_or_else(|| anyhow!("Missing structure argument"))?;
            cmd_validate(&load_structure_arg(raw)?)
        }
        Some("submit") => {
            let raw = args
                .get(2)
                .ok_or_else(|| anyhow!("Missing structure argument"))?;
            let options = parse_submit_options(&args[3..])?;
            cmd_submit(&load_structure_arg(raw)?, &options)
        }
        _ => {
            usage();
            bail!("Missing or unknown command")
        }
    }
}
