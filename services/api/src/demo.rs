use crate::infra::{parse_instant, parse_offset};
use chapter_tickets::config::AppConfig;
use chapter_tickets::error::AppError;
use chapter_tickets::workflows::authorization::{
    find_overlaps, AuthorizationWindow, BroadcastNotifier, DraftStaging, DuesStatus,
    InMemoryDirectory, InMemoryRequestStore, JsonFileRequestStore, Match, MatchId, Member,
    MemberId, RequestStatus, RequestStore, SubmissionCoordinator, SubmissionError,
    WindowEvaluator, WindowState,
};
use chapter_tickets::workflows::roster;
use chrono::{DateTime, Duration, FixedOffset, Utc};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;

const DEMO_CHAPTER: &str = "Rosario";

#[derive(Args, Debug)]
pub(crate) struct WindowsArgs {
    /// Match export (CSV) to evaluate
    #[arg(long)]
    pub(crate) matches: PathBuf,
    /// Evaluation instant (RFC 3339). Defaults to now.
    #[arg(long, value_parser = parse_instant)]
    pub(crate) at: Option<DateTime<Utc>>,
    /// Offset the window dates are written in, e.g. -03:00. Defaults to SCHEDULE_UTC_OFFSET.
    #[arg(long, value_parser = parse_offset)]
    pub(crate) offset: Option<FixedOffset>,
}

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Instant the round runs at (RFC 3339). Defaults to now.
    #[arg(long, value_parser = parse_instant)]
    pub(crate) at: Option<DateTime<Utc>>,
    /// Persist requests to this JSON file instead of memory.
    #[arg(long)]
    pub(crate) requests_path: Option<PathBuf>,
}

pub(crate) fn run_windows(args: WindowsArgs) -> Result<(), AppError> {
    let WindowsArgs {
        matches,
        at,
        offset,
    } = args;

    let offset = match offset {
        Some(offset) => offset,
        None => AppConfig::load()?.authorization.schedule_offset,
    };
    let at = at.unwrap_or_else(Utc::now);
    let fixtures = roster::load_matches(&matches)?;
    let evaluator = WindowEvaluator::new(offset);

    println!(
        "Authorization windows at {} (schedule offset {})",
        at.to_rfc3339(),
        offset
    );
    for fixture in &fixtures {
        println!(
            "- {:<16} vs {:<16} {}",
            fixture.id,
            fixture.opponent,
            describe_state(evaluator.state(fixture, at))
        );
    }

    let overlaps = find_overlaps(&fixtures);
    if overlaps.is_empty() {
        println!("No overlapping windows.");
    } else {
        println!("Overlapping windows (fix the schedule before serving):");
        for overlap in overlaps {
            println!("  - {} <-> {}", overlap.first, overlap.second);
        }
    }

    Ok(())
}

fn describe_state(state: WindowState) -> String {
    match state {
        WindowState::Upcoming { opens_at } => format!("upcoming, opens {}", opens_at.to_rfc3339()),
        WindowState::Open { closes_at } => format!("open, closes {}", closes_at.to_rfc3339()),
        other => other.label().to_string(),
    }
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs { at, requests_path } = args;
    let at = at.unwrap_or_else(Utc::now);
    let directory = demo_directory(at);

    println!("Chapter ticket authorization demo");
    match requests_path {
        Some(path) => {
            println!("- requests persisted to {}", path.display());
            run_round(Arc::new(JsonFileRequestStore::open(path)?), directory, at).await
        }
        None => run_round(Arc::new(InMemoryRequestStore::new()), directory, at).await,
    }
}

async fn run_round<S>(
    store: Arc<S>,
    directory: InMemoryDirectory,
    at: DateTime<Utc>,
) -> Result<(), AppError>
where
    S: RequestStore + 'static,
{
    let notifier = Arc::new(BroadcastNotifier::default());
    let mut events = notifier.subscribe();
    let directory = Arc::new(directory);
    let coordinator = SubmissionCoordinator::new(
        store,
        notifier,
        directory.clone(),
        directory,
        WindowEvaluator::utc(),
    );

    let open = match coordinator.open_matches(at) {
        Ok(open) => open,
        Err(err) => {
            println!("  Match directory unavailable: {}", err);
            return Ok(());
        }
    };
    let Some(fixture) = open.first() else {
        println!("  No authorization window is open at {}", at.to_rfc3339());
        return Ok(());
    };
    println!(
        "- Open window: {} vs {} ({})",
        fixture.id, fixture.opponent, fixture.competition
    );

    let candidates = match coordinator.candidates(&fixture.id, DEMO_CHAPTER).await {
        Ok(candidates) => candidates,
        Err(err) => {
            println!("  Candidates unavailable: {}", err);
            return Ok(());
        }
    };
    println!("- {} eligible members in {}", candidates.len(), DEMO_CHAPTER);

    // Two operators from the same chapter stage overlapping selections.
    let mut front_desk = DraftStaging::new("front-desk", fixture.id.clone());
    let mut treasurer = DraftStaging::new("treasurer", fixture.id.clone());
    for member in candidates.iter().take(2) {
        front_desk.toggle(member.id.clone());
    }
    for member in candidates.iter().skip(1) {
        treasurer.toggle(member.id.clone());
    }

    let (first, second) = tokio::join!(
        coordinator.submit_draft(&mut front_desk, DEMO_CHAPTER, at),
        coordinator.submit_draft(&mut treasurer, DEMO_CHAPTER, at),
    );

    for (label, outcome, draft) in [
        ("front-desk", first, &mut front_desk),
        ("treasurer", second, &mut treasurer),
    ] {
        match outcome {
            Ok(receipt) => println!("  {}: {} requests committed", label, receipt.requests.len()),
            Err(SubmissionError::Duplicate { member_ids, .. }) => {
                println!(
                    "  {}: rejected, already requested: {}",
                    label,
                    join(&member_ids)
                );
                draft.remove(&member_ids);
                match coordinator.submit_draft(draft, DEMO_CHAPTER, at).await {
                    Ok(receipt) => println!(
                        "  {}: retried without conflicts, {} requests committed",
                        label,
                        receipt.requests.len()
                    ),
                    Err(err) => println!("  {}: retry failed: {}", label, err),
                }
            }
            Err(err) => println!("  {}: submission failed: {}", label, err),
        }
    }

    let requests = match coordinator.requests(&fixture.id, Some(DEMO_CHAPTER)).await {
        Ok(requests) => requests,
        Err(err) => {
            println!("  Requests unavailable: {}", err);
            return Ok(());
        }
    };
    let decisions = [RequestStatus::Approved, RequestStatus::Rejected]
        .into_iter()
        .cycle();
    for (request, decision) in requests.iter().zip(decisions) {
        match coordinator.update_status(&request.id, decision).await {
            Ok(updated) => println!(
                "  {} ({}) -> {}",
                updated.id, updated.member.name, updated.status
            ),
            Err(err) => println!("  {} could not be reviewed: {}", request.id, err),
        }
    }
    if let Some(approved) = requests.first() {
        match coordinator
            .update_status(&approved.id, RequestStatus::CancellationRequested)
            .await
        {
            Ok(updated) => println!("  {} -> {}", updated.id, updated.status),
            Err(err) => println!("  Cancellation refused: {}", err),
        }
    }

    let summary = match coordinator.summary(&fixture.id, Some(DEMO_CHAPTER)).await {
        Ok(summary) => summary,
        Err(err) => {
            println!("  Summary unavailable: {}", err);
            return Ok(());
        }
    };
    println!("Summary for {} ({} submitted)", DEMO_CHAPTER, summary.total_submitted);
    for (status, count) in &summary.count_by_status {
        println!("  - {:<24} {}", status, count);
    }

    let mut delivered = 0;
    while events.try_recv().is_ok() {
        delivered += 1;
    }
    println!("- {} lifecycle events published", delivered);

    Ok(())
}

fn join(ids: &[MemberId]) -> String {
    ids.iter()
        .map(|id| id.0.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// One match with a window around `at`, one upcoming, one away fixture, and two rosters.
fn demo_directory(at: DateTime<Utc>) -> InMemoryDirectory {
    let window = |opens: DateTime<Utc>, closes: DateTime<Utc>| {
        AuthorizationWindow::new(
            &opens.format("%d/%m/%Y").to_string(),
            &opens.format("%H:%M").to_string(),
            &closes.format("%d/%m/%Y").to_string(),
            &closes.format("%H:%M").to_string(),
        )
    };
    let fixture = |id: &str, opponent: &str, is_home: bool, window: AuthorizationWindow| Match {
        id: MatchId(id.to_string()),
        opponent: opponent.to_string(),
        competition: "Qualifiers".to_string(),
        kickoff: None,
        venue: (if is_home { "Monumental" } else { "Away" }).to_string(),
        is_home,
        is_neutral: false,
        is_suspended: false,
        window,
    };

    let mut directory = InMemoryDirectory::new();
    let scheduled = [
        fixture(
            "m-home",
            "Brazil",
            true,
            window(at - Duration::days(1), at + Duration::days(2)),
        ),
        fixture(
            "m-next",
            "Uruguay",
            true,
            window(at + Duration::days(10), at + Duration::days(12)),
        ),
        fixture(
            "m-away",
            "Chile",
            false,
            window(at - Duration::days(1), at + Duration::days(2)),
        ),
    ];
    for entry in scheduled {
        if let Err(err) = directory.schedule(entry) {
            println!("  Skipping demo fixture: {}", err);
        }
    }

    let roster = [
        ("r-01", DEMO_CHAPTER, "Ana Gomez", DuesStatus::Current),
        ("r-02", DEMO_CHAPTER, "Bruno Diaz", DuesStatus::Current),
        ("r-03", DEMO_CHAPTER, "Carla Ruiz", DuesStatus::Current),
        ("r-04", DEMO_CHAPTER, "Dario Paz", DuesStatus::Overdue),
        ("m-01", "Madrid", "Elena Sosa", DuesStatus::Current),
    ];
    for (index, (id, chapter, name, dues)) in roster.into_iter().enumerate() {
        let member = Member {
            id: MemberId(id.to_string()),
            chapter: chapter.to_string(),
            name: name.to_string(),
            national_id: format!("30{:06}", index * 1111),
            category: "adult".to_string(),
            dues,
        };
        if let Err(err) = directory.enroll(member) {
            println!("  Skipping demo member: {}", err);
        }
    }

    directory
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_directory_has_exactly_one_open_window() {
        let at = Utc::now();
        let directory = demo_directory(at);
        let evaluator = WindowEvaluator::utc();
        let open = evaluator.active_matches(directory.matches(), at);
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id.0, "m-home");
        assert_eq!(directory.members().len(), 5);
    }

    #[tokio::test]
    async fn demo_round_completes_in_memory() {
        run_demo(DemoArgs::default()).await.expect("demo runs");
    }
}
