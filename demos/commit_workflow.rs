use anyhow::Context;
use rxrcli::config::{DeviceConfig, LogTarget};
use rxrcli::session::{CommitOptions, SessionRecordLevel, SessionRecorder, XrSession};
use std::path::PathBuf;

fn usage() -> ! {
    eprintln!(
        "Usage: cargo run --example commit_workflow -- <host> <user> <candidate.cfg> [--commit] [--confirmed <secs>] [--record <out.jsonl>]"
    );
    std::process::exit(2);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 4 {
        usage();
    }
    let (host, user, candidate) = (&args[1], &args[2], PathBuf::from(&args[3]));

    let mut commit = false;
    let mut confirmed = None;
    let mut record_to = None;
    let mut rest = args.iter().skip(4);
    while let Some(flag) = rest.next() {
        match flag.as_str() {
            "--commit" => commit = true,
            "--confirmed" => {
                let secs = rest.next().unwrap_or_else(|| usage());
                confirmed = Some(secs.parse::<u32>().context("--confirmed takes seconds")?);
            }
            "--record" => record_to = Some(PathBuf::from(rest.next().unwrap_or_else(|| usage()))),
            _ => usage(),
        }
    }

    let password = std::env::var("XR_PASSWORD").context("XR_PASSWORD is not set")?;
    let config = DeviceConfig::new(host.as_str(), user.as_str(), password).with_log(LogTarget::Stderr);
    let recorder = SessionRecorder::new(SessionRecordLevel::KeyEventsOnly);
    let mut session = XrSession::new(config).with_recorder(recorder.clone());

    session.open().await.context("open session")?;
    let result = run(&mut session, &candidate, commit, confirmed).await;
    session.close().await;

    if let Some(path) = record_to {
        std::fs::write(&path, recorder.to_jsonl()?)
            .with_context(|| format!("write recording to {}", path.display()))?;
        println!("recording written to {}", path.display());
    }
    result
}

async fn run(
    session: &mut XrSession,
    candidate: &std::path::Path,
    commit: bool,
    confirmed: Option<u32>,
) -> anyhow::Result<()> {
    session
        .load_candidate_config(Some(candidate), None)
        .await
        .context("stage candidate")?;

    let diff = session.compare_config().await?;
    if diff.trim().is_empty() {
        println!("candidate produces no changes");
        session.discard_config().await?;
        return Ok(());
    }
    println!("--- pending changes ---\n{diff}");

    if !commit {
        session.discard_config().await?;
        println!("dry run, candidate discarded");
        return Ok(());
    }

    let mut options = CommitOptions::new().with_comment("commit_workflow demo");
    if let Some(secs) = confirmed {
        options = options.with_confirmed(secs);
    }
    session.commit_config(&options).await.context("commit")?;
    println!("committed, state={}", session.config_state());
    Ok(())
}
