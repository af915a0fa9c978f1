use clap::Parser;
use echoes_rust_server::engine::{RoundEngine, SolveOutcome};
use echoes_rust_server::puzzle;
use echoes_rust_server::reward::{MockIssuerOptions, MockTestnetIssuer, RewardIssuer};
use echoes_rust_server::types::{ActionKind, PlayerAction, Position, RoomConfig};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Run only the named scenario.
    #[arg(long)]
    scenario: Option<String>,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    run_id: Option<String>,
    #[arg(long)]
    summary_out: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize)]
struct ScenarioResultLine {
    scenario: String,
    seed: u64,
    #[serde(rename = "roundsPlayed")]
    rounds_played: u32,
    #[serde(rename = "finalScore")]
    final_score: i64,
    escaped: bool,
    resets: u32,
    #[serde(rename = "claimAttempts")]
    claim_attempts: u32,
    #[serde(rename = "claimedUsd")]
    claimed_usd: u32,
    anomalies: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
struct RunSummary {
    #[serde(rename = "runId")]
    run_id: String,
    #[serde(rename = "startedAtMs")]
    started_at_ms: u64,
    #[serde(rename = "finishedAtMs")]
    finished_at_ms: u64,
    #[serde(rename = "scenarioCount")]
    scenario_count: usize,
    #[serde(rename = "anomalyCount")]
    anomaly_count: usize,
    #[serde(rename = "escapeCounts")]
    escape_counts: BTreeMap<String, usize>,
    scenarios: Vec<ScenarioResultLine>,
}

#[derive(Clone, Debug, Serialize)]
struct StructuredLogLine {
    #[serde(rename = "timestampMs")]
    timestamp_ms: u64,
    level: String,
    event: String,
    #[serde(rename = "runId")]
    run_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    scenario: Option<String>,
    details: Value,
}

const SCENARIO_NAMES: [&str; 4] = [
    "score-escape",
    "round-cap-escape",
    "collision-reset",
    "claim-retry",
];

fn main() {
    let cli = Cli::parse();
    let seed = cli.seed.unwrap_or_else(now_ms);
    let run_started_at_ms = now_ms();
    let run_id = cli
        .run_id
        .clone()
        .unwrap_or_else(|| default_run_id(seed, run_started_at_ms));

    let scenarios: Vec<&str> = match cli.scenario.as_deref() {
        Some(name) => {
            if !SCENARIO_NAMES.contains(&name) {
                eprintln!("[simulate] unknown scenario: {name}");
                std::process::exit(2);
            }
            vec![SCENARIO_NAMES
                .iter()
                .find(|known| **known == name)
                .copied()
                .unwrap_or(SCENARIO_NAMES[0])]
        }
        None => SCENARIO_NAMES.to_vec(),
    };

    let mut has_anomaly = false;
    let mut scenario_results = Vec::new();
    let mut escape_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut total_anomalies = 0usize;

    for name in scenarios {
        emit_log(
            "info",
            "scenario_started",
            &run_id,
            Some(name),
            json!({ "seed": seed }),
        );

        let result = match name {
            "score-escape" => run_score_escape(seed),
            "round-cap-escape" => run_round_cap_escape(seed),
            "collision-reset" => run_collision_reset(seed),
            "claim-retry" => run_claim_retry(seed),
            _ => unreachable!("scenario list is fixed"),
        };

        for anomaly in &result.anomalies {
            emit_log(
                "warn",
                "anomaly_detected",
                &run_id,
                Some(name),
                json!({ "message": anomaly }),
            );
        }
        if !result.anomalies.is_empty() {
            has_anomaly = true;
        }
        total_anomalies += result.anomalies.len();
        *escape_counts
            .entry(if result.escaped { "escaped" } else { "stuck" }.to_string())
            .or_insert(0) += 1;

        emit_log(
            "info",
            "scenario_finished",
            &run_id,
            Some(name),
            json!({
                "roundsPlayed": result.rounds_played,
                "finalScore": result.final_score,
                "escaped": result.escaped,
                "anomalyCount": result.anomalies.len(),
            }),
        );

        println!(
            "{}",
            serde_json::to_string(&result).expect("scenario result should serialize")
        );
        scenario_results.push(result);
    }

    let summary = RunSummary {
        run_id: run_id.clone(),
        started_at_ms: run_started_at_ms,
        finished_at_ms: now_ms(),
        scenario_count: scenario_results.len(),
        anomaly_count: total_anomalies,
        escape_counts,
        scenarios: scenario_results,
    };

    if let Some(path) = cli.summary_out.as_ref() {
        if let Err(error) = write_summary(path, &summary) {
            emit_log(
                "error",
                "summary_write_failed",
                &run_id,
                None,
                json!({
                    "path": path.to_string_lossy(),
                    "error": error.to_string(),
                }),
            );
            std::process::exit(2);
        }
    }

    emit_log(
        "info",
        "run_finished",
        &run_id,
        None,
        json!({
            "scenarioCount": summary.scenario_count,
            "anomalyCount": summary.anomaly_count,
            "escapeCounts": summary.escape_counts,
        }),
    );

    if has_anomaly {
        std::process::exit(1);
    }
}

/// A short zig-zag away from spawn, one action per step.
fn walk(engine: &mut RoundEngine, participant_id: &str, steps: u64) -> Result<(), String> {
    for step in 0..steps {
        let action = PlayerAction {
            kind: ActionKind::Move,
            position: Position {
                x: 100.0 + (step as f32 + 1.0) * 40.0,
                y: if step % 2 == 0 { 100.0 } else { 180.0 },
            },
            elapsed_ms: step * 50,
        };
        engine
            .record_action(participant_id, action)
            .map_err(|error| error.to_string())?;
    }
    Ok(())
}

/// Solves the current round with the correct sequence and, when the engine
/// schedules an advance, applies it immediately (the server would wait out
/// the settle delay first).
fn solve_and_settle(
    engine: &mut RoundEngine,
    participant_id: &str,
    anomalies: &mut Vec<String>,
) -> SolveOutcome {
    let round = engine.round_number();
    if !puzzle::check_sequence(round, &puzzle::target_sequence(round)) {
        anomalies.push(format!("round {round} target sequence does not verify"));
    }
    let outcome = match engine.solve_puzzle(participant_id) {
        Ok(outcome) => outcome,
        Err(error) => {
            anomalies.push(format!("solve failed in round {round}: {error}"));
            return SolveOutcome::Ignored;
        }
    };
    if let SolveOutcome::Advancing { generation, .. } = outcome {
        if !engine.apply_scheduled_advance(generation) {
            anomalies.push(format!("scheduled advance rejected in round {round}"));
        }
    }
    outcome
}

fn check_engine_anomalies(engine: &mut RoundEngine, anomalies: &mut Vec<String>) {
    let snapshot = engine.build_snapshot(false);
    if snapshot.round_number == 0 || snapshot.round_number > engine.config.max_rounds {
        anomalies.push(format!("round out of range: {}", snapshot.round_number));
    }
    for participant in &snapshot.participants {
        if participant.score < 0 {
            anomalies.push(format!(
                "negative score for {}: {}",
                participant.id, participant.score
            ));
        }
        if !participant.x.is_finite() || !participant.y.is_finite() {
            anomalies.push(format!("non-finite position for {}", participant.id));
        }
    }
    if snapshot.round_number <= 1 {
        for trail in &snapshot.ghost_trails {
            if !trail.points.is_empty() {
                anomalies.push(format!(
                    "ghost trail present in round 1 for {}",
                    trail.participant_id
                ));
            }
        }
    }
}

fn run_score_escape(seed: u64) -> ScenarioResultLine {
    let mut anomalies = Vec::new();
    let config = RoomConfig {
        score_threshold: 3_000,
        ..RoomConfig::default()
    };
    let mut engine = RoundEngine::new(config);
    setup_single(&mut engine, &mut anomalies);

    for _ in 0..engine.config.max_rounds {
        if engine.has_won() {
            break;
        }
        if let Err(error) = walk(&mut engine, "sim_1", 3) {
            anomalies.push(error);
        }
        solve_and_settle(&mut engine, "sim_1", &mut anomalies);
        check_engine_anomalies(&mut engine, &mut anomalies);
    }

    let snapshot = engine.build_snapshot(false);
    let score = snapshot.participants[0].score;
    if !engine.has_won() {
        anomalies.push("score threshold never triggered a win".to_string());
    }
    if engine.round_number() != 3 {
        anomalies.push(format!(
            "expected win at round 3, got round {}",
            engine.round_number()
        ));
    }

    ScenarioResultLine {
        scenario: "score-escape".to_string(),
        seed,
        rounds_played: engine.round_number(),
        final_score: score,
        escaped: engine.has_won(),
        resets: 0,
        claim_attempts: 0,
        claimed_usd: 0,
        anomalies,
    }
}

fn run_round_cap_escape(seed: u64) -> ScenarioResultLine {
    let mut anomalies = Vec::new();
    let config = RoomConfig {
        score_threshold: 1_000_000,
        ..RoomConfig::default()
    };
    let mut engine = RoundEngine::new(config);
    setup_single(&mut engine, &mut anomalies);

    for _ in 0..engine.config.max_rounds {
        if engine.has_won() {
            break;
        }
        if let Err(error) = walk(&mut engine, "sim_1", 2) {
            anomalies.push(error);
        }
        solve_and_settle(&mut engine, "sim_1", &mut anomalies);
        check_engine_anomalies(&mut engine, &mut anomalies);
    }

    if !engine.has_won() {
        anomalies.push("round cap never triggered a win".to_string());
    }
    if engine.round_number() != engine.config.max_rounds {
        anomalies.push(format!(
            "expected win at round {}, got round {}",
            engine.config.max_rounds,
            engine.round_number()
        ));
    }

    let snapshot = engine.build_snapshot(false);
    ScenarioResultLine {
        scenario: "round-cap-escape".to_string(),
        seed,
        rounds_played: engine.round_number(),
        final_score: snapshot.participants[0].score,
        escaped: engine.has_won(),
        resets: 0,
        claim_attempts: 0,
        claimed_usd: 0,
        anomalies,
    }
}

fn run_collision_reset(seed: u64) -> ScenarioResultLine {
    let mut anomalies = Vec::new();
    let mut engine = RoundEngine::new(RoomConfig::default());
    setup_single(&mut engine, &mut anomalies);
    let mut resets = 0u32;

    if let Err(error) = walk(&mut engine, "sim_1", 4) {
        anomalies.push(error);
    }
    solve_and_settle(&mut engine, "sim_1", &mut anomalies);

    // Round 2: step onto a point visited in round 1. The frozen trail must
    // glitch the participant back to spawn.
    let revisit = PlayerAction {
        kind: ActionKind::Move,
        position: Position { x: 140.0, y: 100.0 },
        elapsed_ms: 50,
    };
    match engine.record_action("sim_1", revisit) {
        Ok(true) => match engine.collides("sim_1") {
            Ok(true) => match engine.reset_position("sim_1") {
                Ok(true) => resets += 1,
                Ok(false) => anomalies.push("reset ignored while playing".to_string()),
                Err(error) => anomalies.push(format!("reset failed: {error}")),
            },
            Ok(false) => anomalies.push("revisited trail point did not collide".to_string()),
            Err(error) => anomalies.push(format!("collision check failed: {error}")),
        },
        Ok(false) => anomalies.push("move ignored while playing".to_string()),
        Err(error) => anomalies.push(format!("move failed: {error}")),
    }

    let position = engine.participant_position("sim_1");
    if position != Some(engine.config.spawn) {
        anomalies.push(format!("expected spawn after reset, got {position:?}"));
    }
    check_engine_anomalies(&mut engine, &mut anomalies);

    let snapshot = engine.build_snapshot(false);
    ScenarioResultLine {
        scenario: "collision-reset".to_string(),
        seed,
        rounds_played: engine.round_number(),
        final_score: snapshot.participants[0].score,
        escaped: engine.has_won(),
        resets,
        claim_attempts: 0,
        claimed_usd: 0,
        anomalies,
    }
}

fn run_claim_retry(seed: u64) -> ScenarioResultLine {
    let mut anomalies = Vec::new();
    let config = RoomConfig {
        score_threshold: 1_000,
        ..RoomConfig::default()
    };
    let mut engine = RoundEngine::new(config);
    setup_single(&mut engine, &mut anomalies);
    solve_and_settle(&mut engine, "sim_1", &mut anomalies);
    if !engine.has_won() {
        anomalies.push("claim scenario never reached a win".to_string());
    }

    let mut claim_attempts = 0u32;
    let mut claimed_usd = 0u32;
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            anomalies.push(format!("runtime unavailable: {error}"));
            return claim_result(seed, &mut engine, claim_attempts, claimed_usd, anomalies);
        }
    };

    match engine.reward_claim_snapshot() {
        Ok((identity, amount_usd)) => {
            let flaky = MockTestnetIssuer::new(MockIssuerOptions {
                latency_ms: 0,
                failure_rate: 1.0,
                seed,
            });
            claim_attempts += 1;
            if runtime
                .block_on(flaky.submit_reward(&identity, amount_usd))
                .is_ok()
            {
                anomalies.push("always-failing issuer returned a receipt".to_string());
            }

            let stable = MockTestnetIssuer::new(MockIssuerOptions {
                latency_ms: 0,
                failure_rate: 0.0,
                seed,
            });
            claim_attempts += 1;
            match runtime.block_on(stable.submit_reward(&identity, amount_usd)) {
                Ok(receipt) => {
                    engine.record_reward_claimed(&receipt.reference, receipt.amount_usd);
                    claimed_usd = receipt.amount_usd;
                }
                Err(error) => anomalies.push(format!("retry claim failed: {error}")),
            }
        }
        Err(error) => anomalies.push(format!("claim snapshot failed: {error}")),
    }

    claim_result(seed, &mut engine, claim_attempts, claimed_usd, anomalies)
}

fn claim_result(
    seed: u64,
    engine: &mut RoundEngine,
    claim_attempts: u32,
    claimed_usd: u32,
    anomalies: Vec<String>,
) -> ScenarioResultLine {
    let snapshot = engine.build_snapshot(false);
    ScenarioResultLine {
        scenario: "claim-retry".to_string(),
        seed,
        rounds_played: engine.round_number(),
        final_score: snapshot.participants[0].score,
        escaped: engine.has_won(),
        resets: 0,
        claim_attempts,
        claimed_usd,
        anomalies,
    }
}

fn setup_single(engine: &mut RoundEngine, anomalies: &mut Vec<String>) {
    if let Err(error) = engine.add_participant("sim_1", "0xsimulated", true) {
        anomalies.push(format!("add participant failed: {error}"));
    }
    if let Err(error) = engine.start_game() {
        anomalies.push(format!("start failed: {error}"));
    }
}

fn default_run_id(seed: u64, timestamp_ms: u64) -> String {
    format!("sim-{seed}-{timestamp_ms}")
}

fn emit_log(level: &str, event: &str, run_id: &str, scenario: Option<&str>, details: Value) {
    let log_line = StructuredLogLine {
        timestamp_ms: now_ms(),
        level: level.to_string(),
        event: event.to_string(),
        run_id: run_id.to_string(),
        scenario: scenario.map(|value| value.to_string()),
        details,
    };
    eprintln!(
        "{}",
        serde_json::to_string(&log_line).expect("structured log should serialize")
    );
}

fn write_summary(path: &Path, summary: &RunSummary) -> io::Result<()> {
    let summary_text = serde_json::to_string_pretty(summary).expect("run summary should serialize");
    std::fs::write(path, summary_text)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_run_id_contains_seed_and_timestamp() {
        assert_eq!(default_run_id(42, 123456789), "sim-42-123456789");
    }

    #[test]
    fn write_summary_returns_error_when_parent_does_not_exist() {
        let now = now_ms();
        let target = std::env::temp_dir()
            .join(format!("echoes-missing-{now}"))
            .join("summary.json");
        let summary = RunSummary {
            run_id: "sim-1-1".to_string(),
            started_at_ms: 1,
            finished_at_ms: 2,
            scenario_count: 0,
            anomaly_count: 0,
            escape_counts: BTreeMap::new(),
            scenarios: Vec::new(),
        };
        assert!(write_summary(&target, &summary).is_err());
    }

    #[test]
    fn score_escape_scenario_is_clean() {
        let result = run_score_escape(7);
        assert!(result.anomalies.is_empty(), "{:?}", result.anomalies);
        assert!(result.escaped);
        assert_eq!(result.rounds_played, 3);
        assert_eq!(result.final_score, 3_000);
    }

    #[test]
    fn round_cap_scenario_is_clean() {
        let result = run_round_cap_escape(7);
        assert!(result.anomalies.is_empty(), "{:?}", result.anomalies);
        assert!(result.escaped);
        assert_eq!(result.rounds_played, 5);
    }

    #[test]
    fn collision_scenario_records_one_reset() {
        let result = run_collision_reset(7);
        assert!(result.anomalies.is_empty(), "{:?}", result.anomalies);
        assert_eq!(result.resets, 1);
        assert!(!result.escaped);
    }

    #[test]
    fn claim_retry_scenario_claims_on_second_attempt() {
        let result = run_claim_retry(7);
        assert!(result.anomalies.is_empty(), "{:?}", result.anomalies);
        assert_eq!(result.claim_attempts, 2);
        assert_eq!(result.claimed_usd, 25);
    }
}
